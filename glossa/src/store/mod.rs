//! The durable task repository seam.
//!
//! The repository is the single source of truth for task state; the broker
//! only carries hints. Every lifecycle transition is a guarded, single
//! atomic update that also advances `updated_at` — callers re-read the row
//! under a lock and the guard predicates defend against whatever raced in
//! between.

use async_trait::async_trait;
use chrono::NaiveDateTime;

use crate::node::NodeId;
use crate::task::{NewTask, Task, TaskId, TaskStatus};

#[cfg(feature = "postgres")]
mod postgres;
#[cfg(feature = "postgres")]
pub use postgres::PgTaskStore;

/// Filters for the listing surface.
#[derive(Clone, Debug, Default)]
pub struct TaskFilter {
    pub status: Option<TaskStatus>,
    pub source_language: Option<String>,
    /// Substring match against the comma-joined target-language column.
    pub target_language: Option<String>,
    /// Substring match against the inline text content.
    pub text_contains: Option<String>,
}

/// Terminal write a worker reports back for a task it executed.
#[derive(Clone, Debug, Default)]
pub struct TaskOutcome {
    pub result_file_path: Option<String>,
    pub error_message: Option<String>,
    pub accuracy: Option<f64>,
    pub transcribed_text: Option<String>,
}

/// Durable store of tasks and their lifecycle state.
#[async_trait]
pub trait TaskStore: Send + Sync {
    /// Persist a new task in PENDING with a zero retry counter and return
    /// the stored row.
    async fn insert(&self, new_task: NewTask) -> anyhow::Result<Task>;

    /// Point read.
    async fn find(&self, id: &TaskId) -> anyhow::Result<Option<Task>>;

    /// PENDING → DISPATCHING. Returns `false` when the task was no longer
    /// pending.
    async fn mark_dispatching(&self, id: &TaskId) -> anyhow::Result<bool>;

    /// DISPATCHING → PENDING, for a task that could not be placed after all.
    async fn revert_to_pending(&self, id: &TaskId) -> anyhow::Result<bool>;

    /// PENDING/DISPATCHING → PROCESSING with the assigned node recorded.
    async fn mark_processing(&self, id: &TaskId, node_id: &NodeId) -> anyhow::Result<bool>;

    /// Transition to FAILED with an error message. Unguarded: both the
    /// pending drain and the stuck-task reclaimer end tasks through this.
    async fn mark_failed(&self, id: &TaskId, error: &str) -> anyhow::Result<bool>;

    /// PROCESSING → PENDING with the node assignment cleared and the retry
    /// counter set. Used by stuck-task recovery.
    async fn release_for_retry(&self, id: &TaskId, retry_count: u32) -> anyhow::Result<bool>;

    /// Record a worker-reported terminal transition together with its
    /// artifacts. Fields left `None` keep their stored values.
    async fn record_outcome(
        &self,
        id: &TaskId,
        status: TaskStatus,
        outcome: TaskOutcome,
    ) -> anyhow::Result<bool>;

    /// Number of tasks currently PROCESSING on the given node.
    async fn count_processing(&self, node_id: &NodeId) -> anyhow::Result<u64>;

    /// All PROCESSING tasks whose `updated_at` is older than `older_than`.
    async fn list_stuck(&self, older_than: NaiveDateTime) -> anyhow::Result<Vec<Task>>;

    /// Filtered listing, newest first.
    async fn list(&self, filter: TaskFilter) -> anyhow::Result<Vec<Task>>;
}
