/// Staleness decisions for cached membership
use crate::error::{SyncError, SyncResult};
use chrono::{DateTime, Duration, Utc};

/// Default window in seconds: cached membership younger than this is trusted
pub const DEFAULT_WINDOW_SECS: u64 = 15 * 60;

/// Returns true iff `now - last_refresh >= window`. A missing timestamp
/// is always stale.
pub fn is_stale(last_refresh: Option<DateTime<Utc>>, now: DateTime<Utc>, window: Duration) -> bool {
    match last_refresh {
        Some(at) => now - at >= window,
        None => true,
    }
}

/// Time-to-live policy applied by the reconciler
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FreshnessPolicy {
    window: Duration,
}

impl FreshnessPolicy {
    pub fn new(window: Duration) -> Self {
        Self { window }
    }

    /// Build a policy from a configured window, rejecting windows chrono
    /// cannot represent
    pub fn from_secs(secs: u64) -> SyncResult<Self> {
        i64::try_from(secs)
            .ok()
            .and_then(Duration::try_seconds)
            .map(Self::new)
            .ok_or_else(|| {
                SyncError::Validation(format!("Freshness window out of range: {}s", secs))
            })
    }

    pub fn window(&self) -> Duration {
        self.window
    }

    pub fn is_stale(&self, last_refresh: Option<DateTime<Utc>>, now: DateTime<Utc>) -> bool {
        is_stale(last_refresh, now, self.window)
    }
}

impl Default for FreshnessPolicy {
    fn default() -> Self {
        Self::new(Duration::seconds(DEFAULT_WINDOW_SECS as i64))
    }
}
