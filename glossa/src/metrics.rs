//! Prometheus metrics for the dispatch core.
//!
//! Conditionally compiled behind the `metrics` feature flag.
//!
//! # Metrics
//!
//! ## Counters
//! - `glossa_tasks_dispatched_total` - Work messages handed off to nodes
//! - `glossa_tasks_parked_total` - Tasks parked on the pending queue
//! - `glossa_tasks_reclaimed_total` - Stuck tasks returned to PENDING
//! - `glossa_tasks_failed_total` - Tasks moved to FAILED by the sweepers
//!
//! ## Gauges
//! - `glossa_pending_queue_depth` - Current depth of the pending queue
#![cfg(feature = "metrics")]

use prometheus::{CounterVec, Gauge, Opts, Registry};
use std::sync::LazyLock;

/// Global Prometheus registry for glossa metrics.
pub static REGISTRY: LazyLock<Registry> = LazyLock::new(Registry::new);

/// Counter for work messages handed off, labeled by node.
pub static TASKS_DISPATCHED_TOTAL: LazyLock<CounterVec> = LazyLock::new(|| {
    let opts = Opts::new(
        "glossa_tasks_dispatched_total",
        "Work messages handed off to nodes",
    );
    CounterVec::new(opts, &["node_id"])
        .expect("glossa_tasks_dispatched_total metric creation failed")
});

/// Counter for tasks parked on the pending queue.
pub static TASKS_PARKED_TOTAL: LazyLock<prometheus::Counter> = LazyLock::new(|| {
    prometheus::Counter::new(
        "glossa_tasks_parked_total",
        "Tasks parked on the pending queue",
    )
    .expect("glossa_tasks_parked_total metric creation failed")
});

/// Counter for stuck tasks returned to PENDING by the reclaimer.
pub static TASKS_RECLAIMED_TOTAL: LazyLock<prometheus::Counter> = LazyLock::new(|| {
    prometheus::Counter::new(
        "glossa_tasks_reclaimed_total",
        "Stuck tasks returned to PENDING",
    )
    .expect("glossa_tasks_reclaimed_total metric creation failed")
});

/// Counter for tasks failed by the sweepers, labeled by reason.
pub static TASKS_FAILED_TOTAL: LazyLock<CounterVec> = LazyLock::new(|| {
    let opts = Opts::new(
        "glossa_tasks_failed_total",
        "Tasks moved to FAILED by the sweepers",
    );
    CounterVec::new(opts, &["reason"]).expect("glossa_tasks_failed_total metric creation failed")
});

/// Gauge for the current pending-queue depth.
pub static PENDING_QUEUE_DEPTH: LazyLock<Gauge> = LazyLock::new(|| {
    Gauge::new(
        "glossa_pending_queue_depth",
        "Current depth of the pending queue",
    )
    .expect("glossa_pending_queue_depth metric creation failed")
});

/// Register all metrics with the global registry. Idempotent.
pub fn init_metrics() -> anyhow::Result<()> {
    let registry = &*REGISTRY;

    for metric in [
        Box::new(TASKS_DISPATCHED_TOTAL.clone()) as Box<dyn prometheus::core::Collector>,
        Box::new(TASKS_PARKED_TOTAL.clone()),
        Box::new(TASKS_RECLAIMED_TOTAL.clone()),
        Box::new(TASKS_FAILED_TOTAL.clone()),
        Box::new(PENDING_QUEUE_DEPTH.clone()),
    ] {
        if let Err(e) = registry.register(metric) {
            let msg = e.to_string();
            if !msg.contains("Duplicate metrics collector registration attempted") {
                return Err(e.into());
            }
        }
    }

    Ok(())
}

pub fn record_task_dispatched(node_id: &str) {
    TASKS_DISPATCHED_TOTAL.with_label_values(&[node_id]).inc();
}

pub fn record_task_parked() {
    TASKS_PARKED_TOTAL.inc();
}

pub fn record_task_reclaimed() {
    TASKS_RECLAIMED_TOTAL.inc();
}

pub fn record_task_failed(reason: &str) {
    TASKS_FAILED_TOTAL.with_label_values(&[reason]).inc();
}

pub fn set_pending_depth(depth: f64) {
    PENDING_QUEUE_DEPTH.set(depth);
}

/// Gather all registered metrics in Prometheus text format.
pub fn gather_metrics() -> anyhow::Result<String> {
    let encoder = prometheus::TextEncoder::new();
    let metric_families = REGISTRY.gather();
    encoder.encode_to_string(&metric_families).map_err(Into::into)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn metrics_register_idempotently() {
        init_metrics().expect("metrics initialization should succeed");
        init_metrics().expect("second initialization should also succeed");
    }

    #[test]
    fn recorded_metrics_appear_in_gather_output() {
        init_metrics().expect("metrics initialization should succeed");
        record_task_dispatched("node-1");
        record_task_parked();
        record_task_failed("no_available_nodes");
        set_pending_depth(3.0);

        let output = gather_metrics().expect("gather should succeed");
        assert!(output.contains("glossa_tasks_dispatched_total"));
        assert!(output.contains("glossa_pending_queue_depth"));
    }
}
