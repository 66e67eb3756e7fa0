/// Membership cache
///
/// One entry per local user holding the last IAM group snapshot and when
/// it was taken. Only the reconciler writes entries.

pub mod memory;
pub mod sqlite;

pub use memory::InMemoryMembershipCache;
pub use sqlite::SqliteMembershipCache;

use crate::{error::SyncResult, UserId};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

/// Cached IAM membership for one user
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MembershipEntry {
    /// External identity id the snapshot was fetched for
    pub uid: String,
    /// IAM group names, exactly as last returned by the profile API
    pub groups: BTreeSet<String>,
    pub last_refresh: DateTime<Utc>,
}

impl MembershipEntry {
    pub fn new(uid: impl Into<String>, groups: BTreeSet<String>, last_refresh: DateTime<Utc>) -> Self {
        Self {
            uid: uid.into(),
            groups,
            last_refresh,
        }
    }

    pub fn contains(&self, iam_group: &str) -> bool {
        self.groups.contains(iam_group)
    }
}

/// Storage for membership entries, keyed by local user id
///
/// Last write wins per user; serialization of concurrent refreshes is the
/// reconciler's job.
#[async_trait]
pub trait MembershipCache: Send + Sync {
    async fn get(&self, user_id: UserId) -> SyncResult<Option<MembershipEntry>>;

    /// Replace the entry for `user_id` wholesale
    async fn put(&self, user_id: UserId, entry: &MembershipEntry) -> SyncResult<()>;
}
