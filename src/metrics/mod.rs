//! Metrics module
//!
//! Prometheus counters and histograms for the upload pipeline.

pub mod server;

use lazy_static::lazy_static;
use prometheus::{
    register_counter, register_counter_vec, register_histogram_vec, register_int_gauge, Counter,
    CounterVec, HistogramVec, IntGauge,
};

lazy_static! {
    // Upload metrics
    pub static ref UPLOADS_TOTAL: CounterVec = register_counter_vec!(
        "tubely_uploads_total",
        "Total number of upload requests",
        &["kind", "status"]
    ).unwrap();

    pub static ref UPLOAD_BYTES_TOTAL: Counter = register_counter!(
        "tubely_upload_bytes_total",
        "Total asset bytes durably stored"
    ).unwrap();

    pub static ref UPLOAD_DURATION: HistogramVec = register_histogram_vec!(
        "tubely_upload_duration_seconds",
        "Upload duration in seconds",
        &["kind", "backend"],
        vec![0.005, 0.01, 0.05, 0.1, 0.5, 1.0, 5.0, 10.0, 30.0, 120.0]
    ).unwrap();

    // Auth metrics
    pub static ref AUTH_ATTEMPTS: CounterVec = register_counter_vec!(
        "tubely_auth_attempts_total",
        "Bearer token validation attempts",
        &["status"]
    ).unwrap();

    // Failures by the pipeline stage that rejected the request
    pub static ref PIPELINE_FAILURES: CounterVec = register_counter_vec!(
        "tubely_pipeline_failures_total",
        "Upload failures by pipeline stage",
        &["stage"]
    ).unwrap();

    pub static ref SPOOL_FILES_ACTIVE: IntGauge = register_int_gauge!(
        "tubely_spool_files_active",
        "Spool files currently on disk"
    ).unwrap();
}

/// Record a successful upload
pub fn record_upload_success(kind: &str, bytes: u64) {
    UPLOADS_TOTAL.with_label_values(&[kind, "success"]).inc();
    UPLOAD_BYTES_TOTAL.inc_by(bytes as f64);
}

/// Record a failed upload and the stage that stopped it
pub fn record_upload_failure(kind: &str, stage: &str) {
    UPLOADS_TOTAL.with_label_values(&[kind, "failure"]).inc();
    PIPELINE_FAILURES.with_label_values(&[stage]).inc();
}

/// Record upload duration
pub fn record_upload_duration(kind: &str, backend: &str, duration_secs: f64) {
    UPLOAD_DURATION
        .with_label_values(&[kind, backend])
        .observe(duration_secs);
}

/// Record authentication attempt
pub fn record_auth_attempt(success: bool) {
    let status = if success { "success" } else { "failure" };
    AUTH_ATTEMPTS.with_label_values(&[status]).inc();
}
