//! iam-sync - IAM group membership reconciliation for discussion forums
//!
//! Keeps a per-user snapshot of IAM group membership, refreshes it from the
//! remote profile API when it is older than the freshness window, and gates
//! notification and email delivery for restricted topics on the result.

pub mod api;
pub mod config;
pub mod context;
pub mod db;
pub mod dispatch;
pub mod error;
pub mod freshness;
pub mod mapping;
pub mod membership;
pub mod metrics;
pub mod profile;
pub mod reconcile;
pub mod server;

/// Local forum user id
pub type UserId = i64;

/// Local forum group id
pub type GroupId = i64;

pub use dispatch::{Dispatcher, Notifier, PostCreated};
pub use error::{ProfileFetchError, SyncError, SyncResult};
pub use freshness::FreshnessPolicy;
pub use membership::{MembershipCache, MembershipEntry};
pub use profile::ProfileSource;
pub use reconcile::{Membership, Reconciler};
