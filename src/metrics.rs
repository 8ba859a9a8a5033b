//! Prometheus metrics for the remote-call layer.
//!
//! Metrics cover:
//! - Single remote calls (count and latency per command)
//! - Read routing (attempt outcomes, stale locations, list reorders)
//! - Migration handshake steps and report batches
//! - Transactions and role resolutions
//!
//! All metrics are registered to a custom registry with the "tabletrpc" prefix
//! so they never collide with the host process's default registry. A metric
//! that fails to register is still returned, just not exported.

use once_cell::sync::Lazy;
use prometheus::{
    Encoder, HistogramOpts, HistogramVec, IntCounterVec, Registry, TextEncoder, opts,
};
use tracing::warn;

/// Custom Prometheus registry for tabletrpc metrics.
pub static REGISTRY: Lazy<Registry> = Lazy::new(|| {
    Registry::new_custom(Some("tabletrpc".to_string()), None).unwrap_or_else(|_| Registry::new())
});

// =============================================================================
// Metric Declaration Macros
// =============================================================================

/// Declare an IntCounterVec metric with labels.
macro_rules! define_counter_vec {
    ($name:ident, $metric_name:expr, $help:expr, [$($label:expr),+ $(,)?]) => {
        #[doc = $help]
        pub static $name: Lazy<IntCounterVec> = Lazy::new(|| {
            register_int_counter_vec_safe(&REGISTRY, $metric_name, $help, &[$($label),+])
        });
    };
}

/// Declare a HistogramVec metric with labels and buckets.
macro_rules! define_histogram_vec {
    ($name:ident, $metric_name:expr, $help:expr, [$($label:expr),+ $(,)?], [$($bucket:expr),+ $(,)?]) => {
        #[doc = $help]
        pub static $name: Lazy<HistogramVec> = Lazy::new(|| {
            register_histogram_vec_safe(&REGISTRY, $metric_name, $help, &[$($label),+], vec![$($bucket),+])
        });
    };
}

// =============================================================================
// Remote call metrics
// =============================================================================

define_counter_vec!(
    RPC_REQUESTS,
    "rpc_requests_total",
    "Total number of remote calls issued",
    ["command", "status"]
);
define_histogram_vec!(
    RPC_DURATION,
    "rpc_duration_seconds",
    "Remote call duration in seconds, including local timeout",
    ["command"],
    [0.001, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0]
);

// =============================================================================
// Routing metrics
// =============================================================================

define_counter_vec!(
    ROUTE_ATTEMPTS,
    "route_attempts_total",
    "Replica attempts during read routing",
    ["operation", "outcome"]
);
define_counter_vec!(
    ROUTE_STALE_LOCATIONS,
    "route_stale_locations_total",
    "Replicas that reported they no longer serve the range",
    ["operation"]
);
define_counter_vec!(
    ROUTE_LIST_REORDERS,
    "route_list_reorders_total",
    "Routing sequences that returned a reordered location list",
    ["operation"]
);

// =============================================================================
// Migration and reporting metrics
// =============================================================================

define_counter_vec!(
    MIGRATION_STEPS,
    "migration_steps_total",
    "Migration handshake steps by stage and status",
    ["stage", "status"]
);
define_counter_vec!(
    REPORT_BATCHES,
    "report_batches_total",
    "Tablet report batches sent to the root node",
    ["status"]
);

// =============================================================================
// Transaction and role metrics
// =============================================================================

define_counter_vec!(
    TRANSACTIONS,
    "transactions_total",
    "Transaction lifecycle events",
    ["outcome"]
);
define_counter_vec!(
    ROLE_RESOLUTIONS,
    "role_resolutions_total",
    "Role and mastership queries against the root node",
    ["query", "status"]
);

// =============================================================================
// Registration helpers
// =============================================================================

/// Register an IntCounterVec safely, returning a fallback on error.
fn register_int_counter_vec_safe(
    registry: &Registry,
    name: &str,
    help: &str,
    labels: &[&str],
) -> IntCounterVec {
    let counter =
        IntCounterVec::new(opts!(name, help), labels).expect("metric opts should be valid");
    match registry.register(Box::new(counter.clone())) {
        Ok(()) => counter,
        Err(e) => {
            warn!(name, error = %e, "Failed to register IntCounterVec metric, using unregistered fallback");
            counter
        }
    }
}

/// Register a HistogramVec safely, returning a fallback on error.
fn register_histogram_vec_safe(
    registry: &Registry,
    name: &str,
    help: &str,
    labels: &[&str],
    buckets: Vec<f64>,
) -> HistogramVec {
    let histogram = HistogramVec::new(HistogramOpts::new(name, help).buckets(buckets), labels)
        .expect("metric opts should be valid");
    match registry.register(Box::new(histogram.clone())) {
        Ok(()) => histogram,
        Err(e) => {
            warn!(name, error = %e, "Failed to register HistogramVec metric, using unregistered fallback");
            histogram
        }
    }
}

/// Force registration of every metric.
///
/// Idempotent. Metrics are otherwise registered lazily on first use, so a
/// scrape before any traffic would miss them.
pub fn init_metrics() {
    let _ = &*RPC_REQUESTS;
    let _ = &*RPC_DURATION;
    let _ = &*ROUTE_ATTEMPTS;
    let _ = &*ROUTE_STALE_LOCATIONS;
    let _ = &*ROUTE_LIST_REORDERS;
    let _ = &*MIGRATION_STEPS;
    let _ = &*REPORT_BATCHES;
    let _ = &*TRANSACTIONS;
    let _ = &*ROLE_RESOLUTIONS;
}

/// Encode all metrics in Prometheus text format.
pub fn encode_metrics() -> Result<String, Box<dyn std::error::Error>> {
    let encoder = TextEncoder::new();
    let metric_families = REGISTRY.gather();
    let mut buffer = Vec::new();
    encoder.encode(&metric_families, &mut buffer)?;
    Ok(String::from_utf8(buffer)?)
}

// =============================================================================
// Recording helpers
// =============================================================================

/// Record one remote call.
pub fn record_rpc(command: &str, status: &str, duration_secs: f64) {
    RPC_REQUESTS.with_label_values(&[command, status]).inc();
    RPC_DURATION
        .with_label_values(&[command])
        .observe(duration_secs);
}

/// Record one replica attempt; `outcome` is "success" or an error class.
pub fn record_route_attempt(operation: &str, outcome: &str) {
    ROUTE_ATTEMPTS
        .with_label_values(&[operation, outcome])
        .inc();
    if outcome == "stale" {
        ROUTE_STALE_LOCATIONS.with_label_values(&[operation]).inc();
    }
}

pub fn record_route_reorder(operation: &str) {
    ROUTE_LIST_REORDERS.with_label_values(&[operation]).inc();
}

pub fn record_migration_step(stage: &str, success: bool) {
    let status = if success { "success" } else { "error" };
    MIGRATION_STEPS.with_label_values(&[stage, status]).inc();
}

pub fn record_report_batch(success: bool) {
    let status = if success { "success" } else { "error" };
    REPORT_BATCHES.with_label_values(&[status]).inc();
}

pub fn record_transaction(outcome: &str) {
    TRANSACTIONS.with_label_values(&[outcome]).inc();
}

pub fn record_role_resolution(query: &str, success: bool) {
    let status = if success { "success" } else { "error" };
    ROLE_RESOLUTIONS.with_label_values(&[query, status]).inc();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_init_metrics_is_idempotent() {
        init_metrics();
        init_metrics();
    }

    #[test]
    fn test_encode_contains_prefixed_names() {
        record_rpc("get", "success", 0.002);
        record_route_attempt("scan", "stale");
        let text = encode_metrics().unwrap();
        assert!(text.contains("tabletrpc_rpc_requests_total"));
        assert!(text.contains("tabletrpc_route_stale_locations_total"));
    }

    #[test]
    fn test_stale_attempt_bumps_both_counters() {
        let before = ROUTE_STALE_LOCATIONS
            .with_label_values(&["metrics_test_op"])
            .get();
        record_route_attempt("metrics_test_op", "stale");
        record_route_attempt("metrics_test_op", "transient");
        assert_eq!(
            ROUTE_STALE_LOCATIONS
                .with_label_values(&["metrics_test_op"])
                .get(),
            before + 1
        );
        assert_eq!(
            ROUTE_ATTEMPTS
                .with_label_values(&["metrics_test_op", "transient"])
                .get(),
            1
        );
    }
}
