//! Shared fixtures for integration tests
#![allow(dead_code)]

use async_trait::async_trait;
use iam_sync::{
    dispatch::{EmailType, Notifier, PostCreated},
    error::{ProfileFetchError, SyncError, SyncResult},
    profile::ProfileSource,
    UserId,
};
use std::collections::{BTreeSet, HashMap, HashSet};
use std::sync::{
    atomic::{AtomicUsize, Ordering},
    Mutex,
};

/// Stand-in for the remote profile API, answering per external identity
#[derive(Default)]
pub struct StubProfiles {
    responses: Mutex<HashMap<String, Result<BTreeSet<String>, ProfileFetchError>>>,
    calls: AtomicUsize,
}

impl StubProfiles {
    pub fn stub(&self, uid: &str, groups: &[&str]) {
        let groups = groups.iter().map(|g| g.to_string()).collect();
        self.responses
            .lock()
            .unwrap()
            .insert(uid.to_string(), Ok(groups));
    }

    pub fn fail(&self, uid: &str, e: ProfileFetchError) {
        self.responses
            .lock()
            .unwrap()
            .insert(uid.to_string(), Err(e));
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ProfileSource for StubProfiles {
    async fn fetch_groups(&self, uid: &str) -> Result<BTreeSet<String>, ProfileFetchError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.responses
            .lock()
            .unwrap()
            .get(uid)
            .cloned()
            .unwrap_or(Err(ProfileFetchError::Status(404)))
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Delivery {
    Notification { user_id: UserId, post_id: i64 },
    Email { user_id: UserId, post_id: i64, email_type: EmailType },
}

/// Host notifier that only records what it was asked to deliver
#[derive(Default)]
pub struct RecordingNotifier {
    deliveries: Mutex<Vec<Delivery>>,
    broken_notifications: Mutex<HashSet<UserId>>,
    broken_emails: Mutex<HashSet<UserId>>,
}

impl RecordingNotifier {
    /// Make every notification to `user_id` fail
    pub fn break_notifications(&self, user_id: UserId) {
        self.broken_notifications.lock().unwrap().insert(user_id);
    }

    /// Make every email to `user_id` fail
    pub fn break_emails(&self, user_id: UserId) {
        self.broken_emails.lock().unwrap().insert(user_id);
    }

    pub fn notifications_for(&self, user_id: UserId) -> usize {
        self.deliveries
            .lock()
            .unwrap()
            .iter()
            .filter(|d| matches!(d, Delivery::Notification { user_id: u, .. } if *u == user_id))
            .count()
    }

    pub fn emails(&self, user_id: UserId, post_id: i64, email_type: EmailType) -> usize {
        let wanted = Delivery::Email {
            user_id,
            post_id,
            email_type,
        };
        self.deliveries
            .lock()
            .unwrap()
            .iter()
            .filter(|d| **d == wanted)
            .count()
    }
}

#[async_trait]
impl Notifier for RecordingNotifier {
    async fn notify(&self, user_id: UserId, post: &PostCreated) -> SyncResult<()> {
        if self.broken_notifications.lock().unwrap().contains(&user_id) {
            return Err(SyncError::Internal("notification backend down".to_string()));
        }
        self.deliveries.lock().unwrap().push(Delivery::Notification {
            user_id,
            post_id: post.post_id,
        });
        Ok(())
    }

    async fn email(&self, user_id: UserId, post: &PostCreated, email_type: EmailType) -> SyncResult<()> {
        if self.broken_emails.lock().unwrap().contains(&user_id) {
            return Err(SyncError::Internal("mail relay down".to_string()));
        }
        self.deliveries.lock().unwrap().push(Delivery::Email {
            user_id,
            post_id: post.post_id,
            email_type,
        });
        Ok(())
    }
}
