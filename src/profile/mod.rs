/// Remote IAM profile access
///
/// The reconciler only sees the `ProfileSource` trait; `ProfileClient`
/// is the HTTP implementation used in production.

pub mod client;

pub use client::{ProfileClient, ProfileClientConfig, RetryPolicy};

use crate::error::ProfileFetchError;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

/// Profile document returned by `GET /profile/{uid}`
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct IamProfile {
    /// IAM group names the identity currently belongs to
    pub groups: Vec<String>,
}

/// Authoritative source of group membership for external identities
#[async_trait]
pub trait ProfileSource: Send + Sync {
    /// Current IAM group names for `uid`. This is a full snapshot; callers
    /// replace whatever they had before with it.
    async fn fetch_groups(&self, uid: &str) -> Result<BTreeSet<String>, ProfileFetchError>;
}
