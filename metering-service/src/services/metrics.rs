//! Metrics module for metering-service.
//! Prometheus metrics for the ledger, quota decisions and webhook convergence.

use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use once_cell::sync::Lazy;
use prometheus::{
    histogram_opts, opts, register_histogram_vec, register_int_counter_vec, Encoder, HistogramVec,
    IntCounterVec, TextEncoder,
};
use std::sync::OnceLock;

/// Database query duration histogram
pub static DB_QUERY_DURATION: Lazy<HistogramVec> = Lazy::new(|| {
    register_histogram_vec!(
        histogram_opts!(
            "metering_db_query_duration_seconds",
            "Database query duration"
        ),
        &["operation"]
    )
    .expect("Failed to register DB_QUERY_DURATION")
});

/// Recorder for the `metrics` facade used by the HTTP middleware.
static HTTP_METRICS_HANDLE: OnceLock<Option<PrometheusHandle>> = OnceLock::new();

/// Usage records by outcome (recorded | duplicate)
pub static USAGE_RECORDS_TOTAL: OnceLock<IntCounterVec> = OnceLock::new();

/// Units added to counters
pub static USAGE_UNITS_TOTAL: OnceLock<IntCounterVec> = OnceLock::new();

/// Quota decisions (allow | deny)
pub static QUOTA_CHECKS_TOTAL: OnceLock<IntCounterVec> = OnceLock::new();

/// Webhook pipeline transitions (queued | duplicate | converged | skipped | failed)
pub static WEBHOOK_EVENTS_TOTAL: OnceLock<IntCounterVec> = OnceLock::new();

/// Error counter for alerting
pub static ERRORS_TOTAL: OnceLock<IntCounterVec> = OnceLock::new();

/// Initialize all metrics. Safe to call more than once.
pub fn init_metrics() {
    HTTP_METRICS_HANDLE.get_or_init(|| PrometheusBuilder::new().install_recorder().ok());

    USAGE_RECORDS_TOTAL.get_or_init(|| {
        register_int_counter_vec!(
            opts!(
                "metering_usage_records_total",
                "Usage record calls by tenant, metric and outcome"
            ),
            &["tenant_id", "metric", "outcome"]
        )
        .expect("Failed to register USAGE_RECORDS_TOTAL")
    });

    USAGE_UNITS_TOTAL.get_or_init(|| {
        register_int_counter_vec!(
            opts!(
                "metering_usage_units_total",
                "Units accumulated on usage counters"
            ),
            &["tenant_id", "metric"]
        )
        .expect("Failed to register USAGE_UNITS_TOTAL")
    });

    QUOTA_CHECKS_TOTAL.get_or_init(|| {
        register_int_counter_vec!(
            opts!("metering_quota_checks_total", "Quota decisions"),
            &["metric", "decision"]
        )
        .expect("Failed to register QUOTA_CHECKS_TOTAL")
    });

    WEBHOOK_EVENTS_TOTAL.get_or_init(|| {
        register_int_counter_vec!(
            opts!(
                "metering_webhook_events_total",
                "Webhook events by type and pipeline stage"
            ),
            &["event_type", "stage"]
        )
        .expect("Failed to register WEBHOOK_EVENTS_TOTAL")
    });

    ERRORS_TOTAL.get_or_init(|| {
        register_int_counter_vec!(
            opts!("metering_errors_total", "Total errors by type for alerting"),
            &["error_type", "operation"]
        )
        .expect("Failed to register ERRORS_TOTAL")
    });

    // Force initialization of lazy statics
    let _ = &*DB_QUERY_DURATION;
}

/// Get metrics in Prometheus text format.
pub fn get_metrics() -> String {
    let mut output = HTTP_METRICS_HANDLE
        .get()
        .and_then(|handle| handle.as_ref())
        .map(|handle| handle.render())
        .unwrap_or_default();

    let encoder = TextEncoder::new();
    let mut buffer = Vec::new();
    if let Err(e) = encoder.encode(&prometheus::gather(), &mut buffer) {
        tracing::warn!(error = %e, "Failed to encode metrics");
    }
    output.push_str(&String::from_utf8_lossy(&buffer));
    output
}

/// Record a usage call.
pub fn record_usage_outcome(tenant_id: &str, metric: &str, outcome: &str) {
    if let Some(counter) = USAGE_RECORDS_TOTAL.get() {
        counter.with_label_values(&[tenant_id, metric, outcome]).inc();
    }
}

/// Record units added to a counter.
pub fn record_usage_units(tenant_id: &str, metric: &str, units: i64) {
    if let Some(counter) = USAGE_UNITS_TOTAL.get() {
        counter
            .with_label_values(&[tenant_id, metric])
            .inc_by(units.max(0) as u64);
    }
}

/// Record a quota decision.
pub fn record_quota_check(metric: &str, decision: &str) {
    if let Some(counter) = QUOTA_CHECKS_TOTAL.get() {
        counter.with_label_values(&[metric, decision]).inc();
    }
}

/// Record a webhook pipeline transition.
pub fn record_webhook_event(event_type: &str, stage: &str) {
    if let Some(counter) = WEBHOOK_EVENTS_TOTAL.get() {
        counter.with_label_values(&[event_type, stage]).inc();
    }
}

/// Record an error for alerting.
pub fn record_error(error_type: &str, operation: &str) {
    if let Some(counter) = ERRORS_TOTAL.get() {
        counter.with_label_values(&[error_type, operation]).inc();
    }
}
