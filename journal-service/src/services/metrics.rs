//! Prometheus metrics for journal-service.

use once_cell::sync::Lazy;
use prometheus::{
    register_counter_vec, register_histogram_vec, CounterVec, HistogramVec, TextEncoder,
};

/// Post attempts by outcome (posted, already_posted, rejected, error).
pub static POSTS_TOTAL: Lazy<CounterVec> = Lazy::new(|| {
    register_counter_vec!(
        "journal_posts_total",
        "Total number of journal post attempts",
        &["outcome"]
    )
    .expect("Failed to register posts_total")
});

/// Reversals by status.
pub static REVERSALS_TOTAL: Lazy<CounterVec> = Lazy::new(|| {
    register_counter_vec!(
        "journal_reversals_total",
        "Total number of journal reversals",
        &["status"]
    )
    .expect("Failed to register reversals_total")
});

/// Transient database failures that caused a post to be retried.
pub static POST_RETRIES_TOTAL: Lazy<CounterVec> = Lazy::new(|| {
    register_counter_vec!(
        "journal_post_retries_total",
        "Total number of retried journal posts",
        &["operation"]
    )
    .expect("Failed to register post_retries_total")
});

/// Error counter for alerting.
pub static ERRORS_TOTAL: Lazy<CounterVec> = Lazy::new(|| {
    register_counter_vec!(
        "journal_errors_total",
        "Total number of errors by type",
        &["error_type"]
    )
    .expect("Failed to register errors_total")
});

/// COGS requests by outcome (posted, already_posted, skipped).
pub static COGS_TOTAL: Lazy<CounterVec> = Lazy::new(|| {
    register_counter_vec!(
        "journal_cogs_total",
        "Total number of COGS computations",
        &["outcome"]
    )
    .expect("Failed to register cogs_total")
});

/// Period closings by outcome (closed, rejected).
pub static PERIOD_CLOSINGS_TOTAL: Lazy<CounterVec> = Lazy::new(|| {
    register_counter_vec!(
        "journal_period_closings_total",
        "Total number of period closing attempts",
        &["outcome"]
    )
    .expect("Failed to register period_closings_total")
});

/// Integrity drift detected by the validator, by inconsistency kind.
pub static DRIFT_WARNINGS_TOTAL: Lazy<CounterVec> = Lazy::new(|| {
    register_counter_vec!(
        "journal_integrity_drift_total",
        "Total number of integrity drift warnings",
        &["kind", "severity"]
    )
    .expect("Failed to register integrity_drift_total")
});

/// Account counter by type.
pub static ACCOUNTS_CREATED: Lazy<CounterVec> = Lazy::new(|| {
    register_counter_vec!(
        "journal_accounts_created_total",
        "Total number of accounts created",
        &["account_type"]
    )
    .expect("Failed to register accounts_created")
});

/// Database query duration histogram.
pub static DB_QUERY_DURATION: Lazy<HistogramVec> = Lazy::new(|| {
    register_histogram_vec!(
        "journal_db_query_duration_seconds",
        "Database query duration in seconds",
        &["operation"],
        vec![0.001, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5]
    )
    .expect("Failed to register db_query_duration")
});

/// Initialize all metrics (forces lazy initialization).
pub fn init_metrics() {
    Lazy::force(&POSTS_TOTAL);
    Lazy::force(&REVERSALS_TOTAL);
    Lazy::force(&POST_RETRIES_TOTAL);
    Lazy::force(&ERRORS_TOTAL);
    Lazy::force(&COGS_TOTAL);
    Lazy::force(&PERIOD_CLOSINGS_TOTAL);
    Lazy::force(&DRIFT_WARNINGS_TOTAL);
    Lazy::force(&ACCOUNTS_CREATED);
    Lazy::force(&DB_QUERY_DURATION);
}

/// Get metrics in Prometheus text format.
pub fn get_metrics() -> String {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    encoder
        .encode_to_string(&metric_families)
        .unwrap_or_default()
}
