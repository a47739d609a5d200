//! Prometheus Metrics Module
//!
//! Exposes application metrics via Prometheus format for monitoring.
//!
//! # Metrics Categories
//!
//! - **Calls**: gRPC calls by service, method and status code
//! - **Latency**: time until the call's final status is known
//! - **Watchers**: open health watch subscriptions and updates pushed
//!
//! # Integration
//!
//! Metrics are exposed at `/metrics` on the ops server port.

use std::sync::OnceLock;
use std::time::Duration;

use metrics::{counter, describe_counter, describe_gauge, describe_histogram, gauge, histogram};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};

use crate::domain::health::ServingStatus;

// =============================================================================
// Global Metrics Handle
// =============================================================================

static PROMETHEUS_HANDLE: OnceLock<PrometheusHandle> = OnceLock::new();

/// Initialize the Prometheus metrics recorder.
///
/// # Panics
///
/// Panics if the recorder cannot be installed.
pub fn init_metrics() -> PrometheusHandle {
    PROMETHEUS_HANDLE
        .get_or_init(|| {
            let builder = PrometheusBuilder::new();
            let handle = builder
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

const RPC_CALLS: &str = "health_echo_rpc_calls_total";
const RPC_DURATION: &str = "health_echo_rpc_duration_seconds";
const WATCH_SUBSCRIBERS: &str = "health_echo_watch_subscribers";
const WATCH_UPDATES: &str = "health_echo_watch_updates_total";

fn register_metrics() {
    describe_counter!(RPC_CALLS, "Total gRPC calls by service, method and code");
    describe_histogram!(
        RPC_DURATION,
        "Time from request arrival to final call status, in seconds"
    );
    describe_gauge!(WATCH_SUBSCRIBERS, "Number of open health watch streams");
    describe_counter!(
        WATCH_UPDATES,
        "Total health status messages pushed to watch streams"
    );
}

// =============================================================================
// Metric Recording Functions
// =============================================================================

/// Record a completed gRPC call.
pub fn record_rpc_call(service: &str, method: &str, code: &str, duration: Duration) {
    counter!(
        RPC_CALLS,
        "service" => service.to_string(),
        "method" => method.to_string(),
        "code" => code.to_string()
    )
    .increment(1);
    histogram!(
        RPC_DURATION,
        "service" => service.to_string(),
        "method" => method.to_string()
    )
    .record(duration.as_secs_f64());
}

/// Record a watch stream opening.
pub fn watch_opened() {
    gauge!(WATCH_SUBSCRIBERS).increment(1.0);
}

/// Record a watch stream closing.
pub fn watch_closed() {
    gauge!(WATCH_SUBSCRIBERS).decrement(1.0);
}

/// Record a status pushed to a watcher.
pub fn record_watch_update(status: ServingStatus) {
    counter!(WATCH_UPDATES, "status" => status.as_str()).increment(1);
}

// =============================================================================
// Tests
// =============================================================================
