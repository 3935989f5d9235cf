//! Central metrics registry and metric definitions
//!
//! Prometheus metrics for the harness. Metrics are registered lazily on
//! first access using once_cell::Lazy.

use once_cell::sync::Lazy;
use prometheus::{
    register_gauge, register_histogram, register_int_counter, register_int_counter_vec,
    register_int_gauge, Encoder, Gauge, Histogram, IntCounter, IntCounterVec, IntGauge,
    TextEncoder,
};

// ===== State Machine Metrics =====

/// Total number of commands applied to the state machine
pub static WRITES_APPLIED: Lazy<IntCounter> = Lazy::new(|| {
    register_int_counter!(
        "raftbench_writes_applied_total",
        "Total number of write commands applied to the state machine"
    )
    .expect("Failed to register writes applied counter")
});

/// Issue-to-apply latency histogram in milliseconds
pub static APPLY_LATENCY_MS: Lazy<Histogram> = Lazy::new(|| {
    register_histogram!(
        "raftbench_apply_latency_ms",
        "Latency between command issue and state machine apply in milliseconds",
        vec![1.0, 2.0, 5.0, 10.0, 25.0, 50.0, 100.0, 250.0, 500.0, 1000.0, 5000.0]
    )
    .expect("Failed to register apply latency histogram")
});

// ===== Driver Metrics =====

/// Total number of proposals that returned an error
pub static PROPOSE_FAILURES: Lazy<IntCounter> = Lazy::new(|| {
    register_int_counter!(
        "raftbench_propose_failures_total",
        "Total number of write proposals that failed to commit"
    )
    .expect("Failed to register propose failures counter")
});

// ===== Sampler Metrics =====

/// Write throughput observed over the last sampling interval
pub static INTERVAL_THROUGHPUT: Lazy<Gauge> = Lazy::new(|| {
    register_gauge!(
        "raftbench_interval_throughput",
        "Writes per second over the last sampling interval"
    )
    .expect("Failed to register interval throughput gauge")
});

/// Snapshot requests by outcome
pub static SNAPSHOTS: Lazy<IntCounterVec> = Lazy::new(|| {
    register_int_counter_vec!(
        "raftbench_snapshots_total",
        "Total number of snapshot requests",
        &["status"]
    )
    .expect("Failed to register snapshots counter")
});

// ===== Cluster Metrics =====

/// Members currently known to the consensus layer
pub static CLUSTER_MEMBERS: Lazy<IntGauge> = Lazy::new(|| {
    register_int_gauge!("raftbench_cluster_members", "Number of cluster members")
        .expect("Failed to register cluster members gauge")
});

/// Exports all registered metrics in Prometheus text format
pub fn export_prometheus() -> String {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    let mut buffer = Vec::new();

    if let Err(e) = encoder.encode(&metric_families, &mut buffer) {
        tracing::error!(error = %e, "Failed to encode Prometheus metrics");
        return String::new();
    }

    String::from_utf8(buffer).unwrap_or_default()
}
