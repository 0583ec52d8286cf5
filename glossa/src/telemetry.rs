//! Tracing spans and metric shims for the dispatch paths.
//!
//! The `record_*` helpers compile to no-ops unless the `metrics` feature is
//! enabled, so call sites stay unconditional.

use tracing::{info_span, Span};

/// Span covering one fast-path dispatch attempt.
#[must_use]
pub fn dispatch_span(task_id: impl AsRef<str>) -> Span {
    info_span!("glossa.dispatch", task_id = %task_id.as_ref())
}

/// Span covering the per-node handoff critical section.
#[must_use]
pub fn handoff_span(task_id: impl AsRef<str>, node_id: impl AsRef<str>) -> Span {
    info_span!(
        "glossa.handoff",
        task_id = %task_id.as_ref(),
        node_id = %node_id.as_ref(),
    )
}

/// Span covering one background sweep tick.
#[must_use]
pub fn sweep_span(name: &'static str) -> Span {
    info_span!("glossa.sweep", sweep = name)
}

#[allow(unused_variables)]
pub fn record_task_dispatched(node_id: &str) {
    #[cfg(feature = "metrics")]
    crate::metrics::record_task_dispatched(node_id);
}

pub fn record_task_parked() {
    #[cfg(feature = "metrics")]
    crate::metrics::record_task_parked();
}

pub fn record_task_reclaimed() {
    #[cfg(feature = "metrics")]
    crate::metrics::record_task_reclaimed();
}

#[allow(unused_variables)]
pub fn record_task_failed(reason: &str) {
    #[cfg(feature = "metrics")]
    crate::metrics::record_task_failed(reason);
}

#[allow(unused_variables)]
pub fn set_pending_depth(depth: f64) {
    #[cfg(feature = "metrics")]
    crate::metrics::set_pending_depth(depth);
}
