//! Prometheus Metrics Module
//!
//! Exposes mirror metrics via Prometheus format for monitoring.
//!
//! # Metrics Categories
//!
//! - **Frames**: stream frames received upstream and forwarded downstream
//! - **Fetches**: REST fetch outcomes per endpoint key
//! - **Connections**: reconnect attempts and connected relay sessions
//!
//! # Integration
//!
//! Metrics are exposed at `/metrics` on the ops server port.

use std::sync::OnceLock;

use metrics::{counter, describe_counter, describe_gauge, gauge};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};

// =============================================================================
// Global Metrics Handle
// =============================================================================

static PROMETHEUS_HANDLE: OnceLock<PrometheusHandle> = OnceLock::new();

/// Initialize the Prometheus metrics recorder.
///
/// # Panics
///
/// Panics if the recorder cannot be installed.
#[allow(clippy::expect_used)]
pub fn init_metrics() -> PrometheusHandle {
    PROMETHEUS_HANDLE
        .get_or_init(|| {
            let handle = PrometheusBuilder::new()
                .install_recorder()
                .expect("failed to install Prometheus recorder");

            register_metrics();
            handle
        })
        .clone()
}

/// Get the Prometheus handle for rendering metrics.
///
/// Returns `None` if metrics have not been initialized.
#[must_use]
pub fn get_metrics_handle() -> Option<PrometheusHandle> {
    PROMETHEUS_HANDLE.get().cloned()
}

// =============================================================================
// Metric Registration
// =============================================================================

fn register_metrics() {
    describe_counter!(
        "binance_mirror_frames_received_total",
        "Total stream frames received from the upstream"
    );
    describe_counter!(
        "binance_mirror_frames_forwarded_total",
        "Total frames forwarded to relay clients"
    );
    describe_counter!(
        "binance_mirror_fetches_total",
        "Total REST fetches by endpoint key and outcome"
    );
    describe_counter!(
        "binance_mirror_reconnects_total",
        "Total upstream stream reconnection attempts"
    );
    describe_gauge!(
        "binance_mirror_relay_sessions",
        "Number of connected relay clients"
    );
}

// =============================================================================
// Metric Recording Functions
// =============================================================================

/// Outcome label for REST fetches.
#[derive(Debug, Clone, Copy)]
pub enum FetchOutcome {
    /// Fetch succeeded; the cache was updated.
    Success,
    /// Fetch failed; the previous cache entry was kept.
    Failure,
}

impl FetchOutcome {
    const fn as_str(self) -> &'static str {
        match self {
            Self::Success => "success",
            Self::Failure => "failure",
        }
    }
}

/// Record one frame received from the upstream stream.
pub fn record_frame_received() {
    counter!("binance_mirror_frames_received_total").increment(1);
}

/// Record one frame forwarded to a relay client.
pub fn record_frame_forwarded() {
    counter!("binance_mirror_frames_forwarded_total").increment(1);
}

/// Record one REST fetch outcome.
pub fn record_fetch(key: &str, outcome: FetchOutcome) {
    counter!(
        "binance_mirror_fetches_total",
        "key" => key.to_string(),
        "outcome" => outcome.as_str()
    )
    .increment(1);
}

/// Record one upstream reconnection attempt.
pub fn record_reconnect() {
    counter!("binance_mirror_reconnects_total").increment(1);
}

/// Update the connected relay client gauge.
pub fn set_relay_clients(count: f64) {
    gauge!("binance_mirror_relay_sessions").set(count);
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fetch_outcome_labels() {
        assert_eq!(FetchOutcome::Success.as_str(), "success");
        assert_eq!(FetchOutcome::Failure.as_str(), "failure");
    }
}
