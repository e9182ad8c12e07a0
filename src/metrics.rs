//! Prometheus business metrics, registered on the default registry

use once_cell::sync::Lazy;
use prometheus::{
    register_histogram_vec, register_int_counter, register_int_counter_vec, register_int_gauge,
    register_int_gauge_vec, Encoder, HistogramVec, IntCounter, IntCounterVec, IntGauge,
    IntGaugeVec, TextEncoder,
};
use std::time::Duration;

static ACTIVE_STREAMS: Lazy<IntGauge> = Lazy::new(|| {
    register_int_gauge!("vms_active_streams", "Streams currently starting or running")
        .expect("failed to register vms_active_streams")
});

static ACTIVE_RECORDINGS: Lazy<IntGauge> = Lazy::new(|| {
    register_int_gauge!("vms_active_recordings", "Recordings currently capturing")
        .expect("failed to register vms_active_recordings")
});

static RECORDINGS_DELETED_TOTAL: Lazy<IntCounter> = Lazy::new(|| {
    register_int_counter!(
        "vms_retention_recordings_deleted_total",
        "Recordings soft-deleted by the retention policy"
    )
    .expect("failed to register vms_retention_recordings_deleted_total")
});

static RETENTION_FAILURES_TOTAL: Lazy<IntCounter> = Lazy::new(|| {
    register_int_counter!(
        "vms_retention_failures_total",
        "Expired recordings that could not be deleted"
    )
    .expect("failed to register vms_retention_failures_total")
});

static BYTES_FREED_TOTAL: Lazy<IntCounterVec> = Lazy::new(|| {
    register_int_counter_vec!(
        "vms_storage_bytes_freed_total",
        "Bytes removed from object storage",
        &["reason"]
    )
    .expect("failed to register vms_storage_bytes_freed_total")
});

static RECONCILIATION_FINDINGS: Lazy<IntGaugeVec> = Lazy::new(|| {
    register_int_gauge_vec!(
        "vms_reconciliation_findings",
        "Discrepancies found by the last reconciliation, per tenant",
        &["tenant", "kind"]
    )
    .expect("failed to register vms_reconciliation_findings")
});

static ORPHANS_DELETED_TOTAL: Lazy<IntCounter> = Lazy::new(|| {
    register_int_counter!(
        "vms_orphans_deleted_total",
        "Orphaned objects removed by explicit cleanup"
    )
    .expect("failed to register vms_orphans_deleted_total")
});

static MESSAGES_RETRIED_TOTAL: Lazy<IntCounterVec> = Lazy::new(|| {
    register_int_counter_vec!(
        "vms_messages_retried_total",
        "Messages republished after a handler failure",
        &["queue"]
    )
    .expect("failed to register vms_messages_retried_total")
});

static MESSAGES_DEAD_LETTERED_TOTAL: Lazy<IntCounterVec> = Lazy::new(|| {
    register_int_counter_vec!(
        "vms_messages_dead_lettered_total",
        "Messages sent to a dead-letter queue",
        &["queue"]
    )
    .expect("failed to register vms_messages_dead_lettered_total")
});

static JOB_RUNS_TOTAL: Lazy<IntCounterVec> = Lazy::new(|| {
    register_int_counter_vec!(
        "vms_job_runs_total",
        "Periodic job runs by outcome (success/error/skipped)",
        &["job", "status"]
    )
    .expect("failed to register vms_job_runs_total")
});

static JOB_DURATION_SECONDS: Lazy<HistogramVec> = Lazy::new(|| {
    register_histogram_vec!(
        "vms_job_duration_seconds",
        "Duration of periodic job runs",
        &["job"],
        vec![0.1, 1.0, 5.0, 30.0, 60.0, 300.0, 900.0, 3600.0]
    )
    .expect("failed to register vms_job_duration_seconds")
});

pub fn set_active_streams(count: i64) {
    ACTIVE_STREAMS.set(count);
}

pub fn set_active_recordings(count: i64) {
    ACTIVE_RECORDINGS.set(count);
}

pub fn record_retention_run(deleted: u64, failed: u64, freed_bytes: u64) {
    RECORDINGS_DELETED_TOTAL.inc_by(deleted);
    RETENTION_FAILURES_TOTAL.inc_by(failed);
    BYTES_FREED_TOTAL
        .with_label_values(&["retention"])
        .inc_by(freed_bytes);
}

pub fn set_reconciliation_findings(tenant: &str, orphaned: usize, missing: usize, mismatched: usize) {
    for (kind, count) in [("orphaned", orphaned), ("missing", missing), ("size_mismatch", mismatched)] {
        RECONCILIATION_FINDINGS
            .with_label_values(&[tenant, kind])
            .set(count as i64);
    }
}

pub fn record_orphans_deleted(count: u64, freed_bytes: u64) {
    ORPHANS_DELETED_TOTAL.inc_by(count);
    BYTES_FREED_TOTAL
        .with_label_values(&["orphan_cleanup"])
        .inc_by(freed_bytes);
}

pub fn record_message_retried(queue: &str) {
    MESSAGES_RETRIED_TOTAL.with_label_values(&[queue]).inc();
}

pub fn record_message_dead_lettered(queue: &str) {
    MESSAGES_DEAD_LETTERED_TOTAL.with_label_values(&[queue]).inc();
}

pub fn record_job_run(job: &str, status: &str) {
    JOB_RUNS_TOTAL.with_label_values(&[job, status]).inc();
}

pub fn record_job_duration(job: &str, duration: Duration) {
    JOB_DURATION_SECONDS
        .with_label_values(&[job])
        .observe(duration.as_secs_f64());
}

/// Default registry in the Prometheus text format
pub fn render() -> String {
    let mut buffer = Vec::new();
    if let Err(e) = TextEncoder::new().encode(&prometheus::gather(), &mut buffer) {
        log::warn!("Failed to encode metrics: {}", e);
    }
    String::from_utf8_lossy(&buffer).into_owned()
}
