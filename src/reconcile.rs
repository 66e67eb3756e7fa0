/// Membership reconciliation
///
/// Combines the freshness policy, the profile source and the membership
/// cache into one "ensure fresh, then answer" operation. Refreshes happen
/// synchronously on the query path. Concurrent queries for the same user
/// join one in-flight refresh and all observe its result, success or error.
use crate::{
    error::{SyncError, SyncResult},
    freshness::FreshnessPolicy,
    mapping::{GroupMappings, IdentityLinks},
    membership::{MembershipCache, MembershipEntry},
    metrics,
    profile::ProfileSource,
    GroupId, UserId,
};
use chrono::{DateTime, Utc};
use std::collections::{BTreeSet, HashMap};
use std::sync::{Arc, Mutex, PoisonError};
use tracing::{debug, error, info, warn};

/// Answer to a membership query
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Membership {
    Member,
    NotMember,
    /// The user has no external identity; never a member
    NoLinkedIdentity,
    /// The group has no IAM mapping; never a member
    UnmappedGroup,
}

impl Membership {
    pub fn is_member(self) -> bool {
        self == Membership::Member
    }

    fn label(self) -> &'static str {
        match self {
            Membership::Member => "member",
            Membership::NotMember => "not_member",
            Membership::NoLinkedIdentity => "unlinked",
            Membership::UnmappedGroup => "unmapped",
        }
    }
}

/// IAM groups gained and lost by a refresh
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RefreshOutcome {
    pub added: BTreeSet<String>,
    pub removed: BTreeSet<String>,
}

impl RefreshOutcome {
    pub fn between(previous: Option<&MembershipEntry>, current: &MembershipEntry) -> Self {
        let empty = BTreeSet::new();
        let before = previous.map(|e| &e.groups).unwrap_or(&empty);

        Self {
            added: current.groups.difference(before).cloned().collect(),
            removed: before.difference(&current.groups).cloned().collect(),
        }
    }

    pub fn is_unchanged(&self) -> bool {
        self.added.is_empty() && self.removed.is_empty()
    }
}

/// Outcome of one refresh, handed to every query that joined it
type RefreshResult = Result<MembershipEntry, Arc<SyncError>>;

/// One staleness episode for one user
type Flight = Arc<tokio::sync::OnceCell<RefreshResult>>;

/// The reconciliation core
pub struct Reconciler {
    links: Arc<dyn IdentityLinks>,
    mappings: Arc<dyn GroupMappings>,
    cache: Arc<dyn MembershipCache>,
    profiles: Arc<dyn ProfileSource>,
    policy: FreshnessPolicy,
    flights: Mutex<HashMap<UserId, Flight>>,
}

impl Reconciler {
    pub fn new(
        links: Arc<dyn IdentityLinks>,
        mappings: Arc<dyn GroupMappings>,
        cache: Arc<dyn MembershipCache>,
        profiles: Arc<dyn ProfileSource>,
        policy: FreshnessPolicy,
    ) -> Self {
        Self {
            links,
            mappings,
            cache,
            profiles,
            policy,
            flights: Mutex::new(HashMap::new()),
        }
    }

    pub fn policy(&self) -> FreshnessPolicy {
        self.policy
    }

    /// Is `user_id` currently a member of local group `group_id`?
    ///
    /// Refreshes the user's cached IAM groups first when they are missing
    /// or stale. A failed refresh is returned as an error and the cached
    /// entry is left exactly as it was.
    pub async fn is_member(&self, user_id: UserId, group_id: GroupId, now: DateTime<Utc>) -> SyncResult<bool> {
        Ok(self.membership(user_id, group_id, now).await?.is_member())
    }

    /// Like `is_member`, but says why a user is not a member
    pub async fn membership(
        &self,
        user_id: UserId,
        group_id: GroupId,
        now: DateTime<Utc>,
    ) -> SyncResult<Membership> {
        let result = self.resolve_membership(user_id, group_id, now).await;

        let label = match &result {
            Ok(membership) => membership.label(),
            Err(_) => "error",
        };
        metrics::MEMBERSHIP_DECISIONS_TOTAL
            .with_label_values(&[label])
            .inc();

        result
    }

    async fn resolve_membership(
        &self,
        user_id: UserId,
        group_id: GroupId,
        now: DateTime<Utc>,
    ) -> SyncResult<Membership> {
        let Some(entry) = self.ensure_fresh(user_id, now).await? else {
            return Ok(Membership::NoLinkedIdentity);
        };

        let Some(iam_group) = self.mappings.iam_group_name(group_id).await? else {
            debug!("Group {} has no IAM mapping", group_id);
            return Ok(Membership::UnmappedGroup);
        };

        if entry.contains(&iam_group) {
            Ok(Membership::Member)
        } else {
            Ok(Membership::NotMember)
        }
    }

    /// Local groups `user_id` belongs to according to their fresh IAM groups
    pub async fn local_groups(&self, user_id: UserId, now: DateTime<Utc>) -> SyncResult<BTreeSet<GroupId>> {
        match self.ensure_fresh(user_id, now).await? {
            Some(entry) => self.mappings.local_groups_for(&entry.groups).await,
            None => Ok(BTreeSet::new()),
        }
    }

    /// Make sure the cached entry for `user_id` is younger than the window
    ///
    /// Returns `None` when the user has no linked identity. After `Ok(Some)`
    /// the entry's `last_refresh` is within the window of `now`.
    pub async fn ensure_fresh(&self, user_id: UserId, now: DateTime<Utc>) -> SyncResult<Option<MembershipEntry>> {
        let Some(uid) = self.links.iam_uid(user_id).await? else {
            debug!("User {} has no linked IAM identity", user_id);
            return Ok(None);
        };

        if let Some(entry) = self.cache.get(user_id).await? {
            if self.is_current(&entry, &uid, now) {
                metrics::MEMBERSHIP_CACHE_LOOKUPS_TOTAL
                    .with_label_values(&["fresh"])
                    .inc();
                return Ok(Some(entry));
            }
        }

        let flight = self.join_flight(user_id);
        let result = flight
            .get_or_init(|| async { self.refresh(user_id, &uid, now).await.map_err(Arc::new) })
            .await
            .clone();
        self.land_flight(user_id, &flight);

        result.map(Some).map_err(|e| rejoin(&e))
    }

    fn is_current(&self, entry: &MembershipEntry, uid: &str, now: DateTime<Utc>) -> bool {
        entry.uid == uid && !self.policy.is_stale(Some(entry.last_refresh), now)
    }

    /// Run the remote refresh for a flight
    async fn refresh(&self, user_id: UserId, uid: &str, now: DateTime<Utc>) -> SyncResult<MembershipEntry> {
        // A flight that just landed may already have refreshed
        let previous = self.cache.get(user_id).await?;
        if let Some(entry) = &previous {
            if self.is_current(entry, uid, now) {
                metrics::MEMBERSHIP_CACHE_LOOKUPS_TOTAL
                    .with_label_values(&["fresh"])
                    .inc();
                return Ok(entry.clone());
            }
        }

        metrics::MEMBERSHIP_CACHE_LOOKUPS_TOTAL
            .with_label_values(&[if previous.is_some() { "stale" } else { "miss" }])
            .inc();

        let groups = self.profiles.fetch_groups(uid).await.map_err(|e| {
            warn!("Keeping cached membership for user {}: {}", user_id, e);
            e
        })?;

        let entry = MembershipEntry::new(uid, groups, now);
        self.cache.put(user_id, &entry).await.map_err(|e| {
            error!("Failed to store refreshed membership for user {}: {}", user_id, e);
            e
        })?;

        let outcome = RefreshOutcome::between(previous.as_ref(), &entry);
        if outcome.is_unchanged() {
            debug!("Refreshed IAM groups for user {} (unchanged)", user_id);
        } else {
            info!(
                "Refreshed IAM groups for user {}: added {:?}, removed {:?}",
                user_id, outcome.added, outcome.removed
            );
        }

        Ok(entry)
    }

    fn join_flight(&self, user_id: UserId) -> Flight {
        let mut flights = self.flights.lock().unwrap_or_else(PoisonError::into_inner);
        Arc::clone(flights.entry(user_id).or_default())
    }

    /// Forget a completed flight so the next staleness episode starts a new one
    fn land_flight(&self, user_id: UserId, flight: &Flight) {
        let mut flights = self.flights.lock().unwrap_or_else(PoisonError::into_inner);
        if flights
            .get(&user_id)
            .is_some_and(|current| Arc::ptr_eq(current, flight))
        {
            flights.remove(&user_id);
        }
    }

    #[cfg(test)]
    fn pending_flights(&self) -> usize {
        self.flights.lock().unwrap_or_else(PoisonError::into_inner).len()
    }
}

/// Rebuild an owned error from a shared refresh failure
fn rejoin(e: &SyncError) -> SyncError {
    match e {
        SyncError::ProfileFetch(e) => SyncError::ProfileFetch(e.clone()),
        SyncError::Authentication(msg) => SyncError::Authentication(msg.clone()),
        SyncError::Validation(msg) => SyncError::Validation(msg.clone()),
        SyncError::NotFound(msg) => SyncError::NotFound(msg.clone()),
        SyncError::Conflict(msg) => SyncError::Conflict(msg.clone()),
        SyncError::Internal(msg) => SyncError::Internal(msg.clone()),
        SyncError::Database(_) | SyncError::Io(_) => SyncError::Internal(e.to_string()),
    }
}
