/// Gated delivery for post-created events
///
/// The host owns notifications and email; it hands each new post to the
/// `Dispatcher`, which asks the reconciler about every recipient of a
/// restricted topic before calling back into the host's `Notifier`.
/// Private messages are never gated and never touch the membership cache.
use crate::{
    error::SyncResult,
    metrics,
    reconcile::{Membership, Reconciler},
    GroupId, UserId,
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::future::join_all;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Archetype {
    Regular,
    PrivateMessage,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Topic {
    pub id: i64,
    pub archetype: Archetype,
    /// Group a restricted category is limited to
    pub restricted_to: Option<GroupId>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NotificationLevel {
    Muted,
    Regular,
    Tracking,
    Watching,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Recipient {
    pub user_id: UserId,
    pub notification_level: NotificationLevel,
    #[serde(default)]
    pub mailing_list_mode: bool,
}

/// A post was created; who might hear about it
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PostCreated {
    pub post_id: i64,
    pub author_id: UserId,
    pub topic: Topic,
    pub recipients: Vec<Recipient>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EmailType {
    UserPosted,
    UserPrivateMessage,
    MailingList,
}

impl EmailType {
    pub fn as_str(self) -> &'static str {
        match self {
            EmailType::UserPosted => "user_posted",
            EmailType::UserPrivateMessage => "user_private_message",
            EmailType::MailingList => "mailing_list",
        }
    }
}

/// Host-side delivery
#[async_trait]
pub trait Notifier: Send + Sync {
    /// Create an in-app notification for `user_id` about `post`
    async fn notify(&self, user_id: UserId, post: &PostCreated) -> SyncResult<()>;

    async fn email(&self, user_id: UserId, post: &PostCreated, email_type: EmailType) -> SyncResult<()>;
}

/// Why a gated delivery was skipped
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SuppressReason {
    NotMember,
    NoLinkedIdentity,
    UnmappedGroup,
    /// Membership could not be confirmed (profile API failure)
    MembershipUnavailable,
}

impl SuppressReason {
    fn as_str(self) -> &'static str {
        match self {
            SuppressReason::NotMember => "not_member",
            SuppressReason::NoLinkedIdentity => "no_linked_identity",
            SuppressReason::UnmappedGroup => "unmapped_group",
            SuppressReason::MembershipUnavailable => "membership_unavailable",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Suppression {
    pub user_id: UserId,
    pub reason: SuppressReason,
}

/// What a dispatch run did, per recipient
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DispatchReport {
    pub notified: Vec<UserId>,
    pub emailed: Vec<UserId>,
    pub suppressed: Vec<Suppression>,
    /// Recipients whose host delivery call failed
    pub failed: Vec<UserId>,
}

enum Outcome {
    Skipped,
    Suppressed(SuppressReason),
    Delivered { notified: bool, emailed: bool },
    /// Notified, but the email did not go out
    EmailFailed,
    Failed,
}

#[derive(Clone, Copy)]
enum Channel {
    Post,
    MailingList,
}

impl Channel {
    fn as_str(self) -> &'static str {
        match self {
            Channel::Post => "post",
            Channel::MailingList => "mailing_list",
        }
    }
}

/// Gating call sites for notification, per-post email and mailing-list email
#[derive(Clone)]
pub struct Dispatcher {
    reconciler: Arc<Reconciler>,
    notifier: Arc<dyn Notifier>,
}

impl Dispatcher {
    pub fn new(reconciler: Arc<Reconciler>, notifier: Arc<dyn Notifier>) -> Self {
        Self {
            reconciler,
            notifier,
        }
    }

    /// Notify and email the recipients of a new post or reply
    ///
    /// Each recipient is evaluated independently; a failed membership check
    /// suppresses that recipient only.
    pub async fn post_created(&self, event: &PostCreated, now: DateTime<Utc>) -> DispatchReport {
        let email_type = match event.topic.archetype {
            Archetype::PrivateMessage => EmailType::UserPrivateMessage,
            Archetype::Regular => EmailType::UserPosted,
        };

        let outcomes = join_all(event.recipients.iter().map(|recipient| async move {
            if !Self::wants_post_notification(event, recipient) {
                return (recipient.user_id, Outcome::Skipped);
            }

            let outcome = match self.gate(recipient.user_id, event, now, Channel::Post).await {
                Err(reason) => Outcome::Suppressed(reason),
                Ok(()) => self.deliver_post(recipient.user_id, event, email_type).await,
            };
            (recipient.user_id, outcome)
        }))
        .await;

        Self::report(outcomes)
    }

    /// Send the mailing-list copy of a post to subscribers
    ///
    /// Private messages never go to mailing lists.
    pub async fn mailing_list(&self, event: &PostCreated, now: DateTime<Utc>) -> DispatchReport {
        if event.topic.archetype == Archetype::PrivateMessage {
            return DispatchReport::default();
        }

        let outcomes = join_all(event.recipients.iter().map(|recipient| async move {
            if !recipient.mailing_list_mode
                || recipient.user_id == event.author_id
                || recipient.notification_level == NotificationLevel::Muted
            {
                return (recipient.user_id, Outcome::Skipped);
            }

            let outcome = match self
                .gate(recipient.user_id, event, now, Channel::MailingList)
                .await
            {
                Err(reason) => Outcome::Suppressed(reason),
                Ok(()) => match self
                    .notifier
                    .email(recipient.user_id, event, EmailType::MailingList)
                    .await
                {
                    Ok(()) => Outcome::Delivered {
                        notified: false,
                        emailed: true,
                    },
                    Err(e) => {
                        warn!(
                            "Mailing list email to user {} for post {} failed: {}",
                            recipient.user_id, event.post_id, e
                        );
                        Outcome::Failed
                    }
                },
            };
            (recipient.user_id, outcome)
        }))
        .await;

        Self::report(outcomes)
    }

    fn wants_post_notification(event: &PostCreated, recipient: &Recipient) -> bool {
        if recipient.user_id == event.author_id {
            return false;
        }
        match event.topic.archetype {
            Archetype::PrivateMessage => recipient.notification_level != NotificationLevel::Muted,
            Archetype::Regular => recipient.notification_level == NotificationLevel::Watching,
        }
    }

    /// Decide whether `user_id` may receive content from the event's topic
    async fn gate(
        &self,
        user_id: UserId,
        event: &PostCreated,
        now: DateTime<Utc>,
        channel: Channel,
    ) -> Result<(), SuppressReason> {
        // Private messages bypass the IAM gate entirely
        if event.topic.archetype == Archetype::PrivateMessage {
            return Ok(());
        }
        let Some(group_id) = event.topic.restricted_to else {
            return Ok(());
        };

        let reason = match self.reconciler.membership(user_id, group_id, now).await {
            Ok(Membership::Member) => return Ok(()),
            Ok(Membership::NotMember) => SuppressReason::NotMember,
            Ok(Membership::NoLinkedIdentity) => SuppressReason::NoLinkedIdentity,
            Ok(Membership::UnmappedGroup) => SuppressReason::UnmappedGroup,
            Err(e) => {
                warn!(
                    "Could not confirm membership of user {} in group {}, not sending: {}",
                    user_id, group_id, e
                );
                SuppressReason::MembershipUnavailable
            }
        };

        debug!(
            "Suppressed {} delivery of post {} to user {}: {}",
            channel.as_str(),
            event.post_id,
            user_id,
            reason.as_str()
        );
        metrics::DELIVERIES_SUPPRESSED_TOTAL
            .with_label_values(&[channel.as_str(), reason.as_str()])
            .inc();
        Err(reason)
    }

    async fn deliver_post(&self, user_id: UserId, event: &PostCreated, email_type: EmailType) -> Outcome {
        if let Err(e) = self.notifier.notify(user_id, event).await {
            warn!(
                "Notification to user {} for post {} failed: {}",
                user_id, event.post_id, e
            );
            return Outcome::Failed;
        }

        match self.notifier.email(user_id, event, email_type).await {
            Ok(()) => Outcome::Delivered {
                notified: true,
                emailed: true,
            },
            Err(e) => {
                warn!(
                    "{} email to user {} for post {} failed: {}",
                    email_type.as_str(),
                    user_id,
                    event.post_id,
                    e
                );
                Outcome::EmailFailed
            }
        }
    }

    fn report(outcomes: Vec<(UserId, Outcome)>) -> DispatchReport {
        let mut report = DispatchReport::default();
        for (user_id, outcome) in outcomes {
            match outcome {
                Outcome::Skipped => {}
                Outcome::Suppressed(reason) => report.suppressed.push(Suppression { user_id, reason }),
                Outcome::Delivered { notified, emailed } => {
                    if notified {
                        report.notified.push(user_id);
                    }
                    if emailed {
                        report.emailed.push(user_id);
                    }
                }
                Outcome::EmailFailed => {
                    report.notified.push(user_id);
                    report.failed.push(user_id);
                }
                Outcome::Failed => report.failed.push(user_id),
            }
        }
        report
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn event(archetype: Archetype, recipients: Vec<Recipient>) -> PostCreated {
        PostCreated {
            post_id: 100,
            author_id: 1,
            topic: Topic {
                id: 50,
                archetype,
                restricted_to: Some(10),
            },
            recipients,
        }
    }

    fn recipient(user_id: UserId, level: NotificationLevel) -> Recipient {
        Recipient {
            user_id,
            notification_level: level,
            mailing_list_mode: false,
        }
    }

    #[test]
    fn test_email_type_names() {
        assert_eq!(EmailType::UserPosted.as_str(), "user_posted");
        assert_eq!(EmailType::UserPrivateMessage.as_str(), "user_private_message");
        assert_eq!(EmailType::MailingList.as_str(), "mailing_list");
    }

    #[test]
    fn test_who_wants_post_notifications() {
        let regular = event(Archetype::Regular, vec![]);
        assert!(Dispatcher::wants_post_notification(
            &regular,
            &recipient(2, NotificationLevel::Watching)
        ));
        assert!(!Dispatcher::wants_post_notification(
            &regular,
            &recipient(2, NotificationLevel::Tracking)
        ));
        // authors never hear about their own posts
        assert!(!Dispatcher::wants_post_notification(
            &regular,
            &recipient(1, NotificationLevel::Watching)
        ));

        let pm = event(Archetype::PrivateMessage, vec![]);
        assert!(Dispatcher::wants_post_notification(
            &pm,
            &recipient(2, NotificationLevel::Regular)
        ));
        assert!(!Dispatcher::wants_post_notification(
            &pm,
            &recipient(2, NotificationLevel::Muted)
        ));
    }

    #[test]
    fn test_event_deserializes() {
        let json = r#"{
            "post_id": 7,
            "author_id": 1,
            "topic": { "id": 3, "archetype": "private_message", "restricted_to": null },
            "recipients": [{ "user_id": 2, "notification_level": "watching" }]
        }"#;
        let event: PostCreated = serde_json::from_str(json).unwrap();
        assert_eq!(event.topic.archetype, Archetype::PrivateMessage);
        assert!(!event.recipients[0].mailing_list_mode);
    }
}
