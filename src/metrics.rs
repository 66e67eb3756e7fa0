/// Metrics and telemetry for iam-sync
///
/// Provides Prometheus-compatible metrics for monitoring:
/// - Profile API fetch counts and latencies
/// - Membership cache hit/miss rates
/// - Membership decisions
/// - Suppressed deliveries at the gating call sites

use crate::error::ProfileFetchError;
use lazy_static::lazy_static;
use prometheus::{
    register_histogram, register_int_counter_vec, Encoder, Histogram, IntCounterVec, TextEncoder,
};

lazy_static! {
    // ========== Profile API Metrics ==========

    /// Profile fetches by outcome (ok, network, timeout, status, payload)
    pub static ref PROFILE_FETCHES_TOTAL: IntCounterVec = register_int_counter_vec!(
        "iam_profile_fetches_total",
        "Total number of IAM profile fetches",
        &["outcome"]
    )
    .unwrap();

    /// Profile fetch duration in seconds, retries included
    pub static ref PROFILE_FETCH_DURATION_SECONDS: Histogram = register_histogram!(
        "iam_profile_fetch_duration_seconds",
        "IAM profile fetch latencies in seconds",
        vec![0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0]
    )
    .unwrap();

    // ========== Cache Metrics ==========

    /// Membership cache lookups by result (fresh, stale, miss)
    pub static ref MEMBERSHIP_CACHE_LOOKUPS_TOTAL: IntCounterVec = register_int_counter_vec!(
        "iam_membership_cache_lookups_total",
        "Total number of membership cache lookups",
        &["result"]
    )
    .unwrap();

    // ========== Decision Metrics ==========

    /// Membership answers by result (member, not_member, unlinked, error)
    pub static ref MEMBERSHIP_DECISIONS_TOTAL: IntCounterVec = register_int_counter_vec!(
        "iam_membership_decisions_total",
        "Total number of membership decisions",
        &["result"]
    )
    .unwrap();

    /// Gated deliveries suppressed, by channel and reason
    pub static ref DELIVERIES_SUPPRESSED_TOTAL: IntCounterVec = register_int_counter_vec!(
        "iam_deliveries_suppressed_total",
        "Total number of notification or email deliveries suppressed by the IAM gate",
        &["channel", "reason"]
    )
    .unwrap();
}

/// Outcome label for a failed profile fetch
pub fn fetch_error_label(e: &ProfileFetchError) -> &'static str {
    match e {
        ProfileFetchError::Network(_) => "network",
        ProfileFetchError::Timeout(_) => "timeout",
        ProfileFetchError::Status(_) => "status",
        ProfileFetchError::Payload(_) => "payload",
    }
}

/// Render all registered metrics in Prometheus text format
pub fn render_metrics() -> String {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    let mut buffer = Vec::new();
    if let Err(e) = encoder.encode(&metric_families, &mut buffer) {
        tracing::error!("Failed to encode metrics: {}", e);
        return String::new();
    }
    String::from_utf8(buffer).unwrap_or_default()
}
