//! Prometheus metrics for the bridge relayer
//!
//! Exposes metrics on /metrics endpoint for Prometheus scraping.

use lazy_static::lazy_static;
use prometheus::{
    register_counter_vec, register_gauge, register_gauge_vec, register_histogram_vec, CounterVec,
    Encoder, Gauge, GaugeVec, HistogramVec, TextEncoder,
};

lazy_static! {
    // Sync metrics
    pub static ref BLOCKS_SCANNED: CounterVec = register_counter_vec!(
        "relayer_blocks_scanned_total",
        "Total number of blocks scanned by catch-up batches",
        &["chain"]
    ).unwrap();

    pub static ref CHECKPOINT: GaugeVec = register_gauge_vec!(
        "relayer_checkpoint_block",
        "Last block fully scanned per chain",
        &["chain"]
    ).unwrap();

    pub static ref EVENTS_OBSERVED: CounterVec = register_counter_vec!(
        "relayer_events_observed_total",
        "Bridge events handed to the processor",
        &["chain", "path"]
    ).unwrap();

    // Request metrics
    pub static ref REQUESTS_FINISHED: CounterVec = register_counter_vec!(
        "relayer_requests_finished_total",
        "Bridge requests reaching a terminal status",
        &["from_chain", "to_chain", "status"]
    ).unwrap();

    pub static ref EXECUTION_FAILURES: CounterVec = register_counter_vec!(
        "relayer_execution_failures_total",
        "Destination execution failures by kind",
        &["to_chain", "kind"]
    ).unwrap();

    pub static ref EXECUTION_LATENCY: HistogramVec = register_histogram_vec!(
        "relayer_execution_latency_seconds",
        "Time from processing start to terminal status",
        &["to_chain"],
        vec![1.0, 2.0, 5.0, 10.0, 30.0, 60.0, 120.0, 300.0]
    ).unwrap();

    // Error metrics
    pub static ref ERRORS: CounterVec = register_counter_vec!(
        "relayer_errors_total",
        "Total number of errors",
        &["chain", "type"]
    ).unwrap();

    pub static ref RECONCILED: CounterVec = register_counter_vec!(
        "relayer_reconciled_total",
        "Stuck processing rows resolved by the reconciliation sweep",
        &["outcome"]
    ).unwrap();

    // Health metrics
    pub static ref UP: Gauge = register_gauge!(
        "relayer_up",
        "Whether the relayer is up and running"
    ).unwrap();

    pub static ref LAST_SUCCESSFUL_SYNC: GaugeVec = register_gauge_vec!(
        "relayer_last_successful_sync_timestamp",
        "Unix timestamp of the last checkpoint advance",
        &["chain"]
    ).unwrap();
}

/// Record a scanned batch and the new checkpoint
pub fn record_batch_scanned(chain: &str, blocks: u64, checkpoint: u64) {
    BLOCKS_SCANNED.with_label_values(&[chain]).inc_by(blocks as f64);
    record_checkpoint(chain, checkpoint);
}

pub fn record_checkpoint(chain: &str, checkpoint: u64) {
    CHECKPOINT.with_label_values(&[chain]).set(checkpoint as f64);
    LAST_SUCCESSFUL_SYNC
        .with_label_values(&[chain])
        .set(chrono::Utc::now().timestamp() as f64);
}

/// Record an event entering the processor; `path` is historical, live or recovery
pub fn record_event_observed(chain: &str, path: &str) {
    EVENTS_OBSERVED.with_label_values(&[chain, path]).inc();
}

pub fn record_request_finished(from_chain: &str, to_chain: &str, status: &str, seconds: f64) {
    REQUESTS_FINISHED
        .with_label_values(&[from_chain, to_chain, status])
        .inc();
    EXECUTION_LATENCY
        .with_label_values(&[to_chain])
        .observe(seconds);
}

pub fn record_execution_failure(to_chain: &str, kind: &str) {
    EXECUTION_FAILURES.with_label_values(&[to_chain, kind]).inc();
}

/// Record an error
pub fn record_error(chain: &str, error_type: &str) {
    ERRORS.with_label_values(&[chain, error_type]).inc();
}

pub fn record_reconciled(outcome: &str) {
    RECONCILED.with_label_values(&[outcome]).inc();
}

/// Set the up status
pub fn set_up(up: bool) {
    UP.set(if up { 1.0 } else { 0.0 });
}

/// Render the default registry in the text exposition format
pub fn gather_text() -> eyre::Result<String> {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    let mut buffer = Vec::new();
    encoder.encode(&metric_families, &mut buffer)?;
    Ok(String::from_utf8(buffer)?)
}
