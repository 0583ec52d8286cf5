use std::fmt::Display;

use chrono::{Local, NaiveDateTime};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Current wall-clock time as a zone-less local timestamp.
///
/// Task rows and every broker message body carry timestamps in this form,
/// matching the zone-less columns the workers write back to.
pub fn now_local() -> NaiveDateTime {
    Local::now().naive_local()
}

/// Opaque identifier of a translation task.
#[derive(Clone, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TaskId(String);

impl TaskId {
    /// Wrap an existing identifier.
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Generate a fresh random identifier.
    pub fn generate() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    /// Get the identifier as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Display for TaskId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for TaskId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

impl From<String> for TaskId {
    fn from(value: String) -> Self {
        Self(value)
    }
}

/// Lifecycle states of a translation task.
///
/// A task is created in [`Pending`](TaskStatus::Pending), passes through
/// [`Dispatching`](TaskStatus::Dispatching) while a node is selected, runs as
/// [`Processing`](TaskStatus::Processing) once handed off, and terminates in
/// one of [`Completed`](TaskStatus::Completed), [`Failed`](TaskStatus::Failed)
/// or [`Cancelled`](TaskStatus::Cancelled).
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TaskStatus {
    Pending,
    Dispatching,
    Processing,
    Completed,
    Failed,
    Cancelled,
}

impl TaskStatus {
    /// Stable string form used in the repository and on the wire.
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskStatus::Pending => "PENDING",
            TaskStatus::Dispatching => "DISPATCHING",
            TaskStatus::Processing => "PROCESSING",
            TaskStatus::Completed => "COMPLETED",
            TaskStatus::Failed => "FAILED",
            TaskStatus::Cancelled => "CANCELLED",
        }
    }

    /// Parse the repository string form.
    pub fn parse(value: &str) -> Option<Self> {
        match value.to_ascii_uppercase().as_str() {
            "PENDING" => Some(TaskStatus::Pending),
            "DISPATCHING" => Some(TaskStatus::Dispatching),
            "PROCESSING" => Some(TaskStatus::Processing),
            "COMPLETED" => Some(TaskStatus::Completed),
            "FAILED" => Some(TaskStatus::Failed),
            "CANCELLED" => Some(TaskStatus::Cancelled),
            _ => None,
        }
    }

    /// Whether the task can make no further transitions.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            TaskStatus::Completed | TaskStatus::Failed | TaskStatus::Cancelled
        )
    }
}

impl Display for TaskStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A persisted translation task.
///
/// Exactly one of `text_content` and `audio_file_path` is populated at
/// creation; `assigned_node_id` is set only by a successful handoff and
/// cleared again when the task is reclaimed.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Task {
    pub id: TaskId,
    pub status: TaskStatus,
    pub source_language: String,
    pub target_languages: Vec<String>,
    pub text_content: Option<String>,
    pub audio_file_path: Option<String>,
    pub original_text: Option<String>,
    pub assigned_node_id: Option<crate::node::NodeId>,
    pub created_at: NaiveDateTime,
    pub updated_at: NaiveDateTime,
    pub result_file_path: Option<String>,
    pub error_message: Option<String>,
    pub retry_count: u32,
    pub accuracy: Option<f64>,
}

/// A task submission, before it has been persisted.
///
/// Built through [`NewTask::text`] or [`NewTask::audio`] so that exactly one
/// payload variant is populated.
#[derive(Clone, Debug)]
pub struct NewTask {
    pub id: TaskId,
    pub source_language: String,
    pub target_languages: Vec<String>,
    pub text_content: Option<String>,
    pub audio_file_path: Option<String>,
    pub original_text: Option<String>,
}

impl NewTask {
    /// A task translating inline text.
    pub fn text(
        source_language: impl Into<String>,
        target_languages: Vec<String>,
        content: impl Into<String>,
    ) -> Self {
        Self {
            id: TaskId::generate(),
            source_language: source_language.into(),
            target_languages,
            text_content: Some(content.into()),
            audio_file_path: None,
            original_text: None,
        }
    }

    /// A task transcribing and translating a previously stored audio file.
    pub fn audio(
        source_language: impl Into<String>,
        target_languages: Vec<String>,
        audio_file_path: impl Into<String>,
    ) -> Self {
        Self {
            id: TaskId::generate(),
            source_language: source_language.into(),
            target_languages,
            text_content: None,
            audio_file_path: Some(audio_file_path.into()),
            original_text: None,
        }
    }

    /// Use a caller-provided identifier instead of a generated one.
    pub fn with_id(mut self, id: impl Into<TaskId>) -> Self {
        self.id = id.into();
        self
    }

    /// Attach the original-text hint the worker scores transcription against.
    pub fn with_original_text(mut self, text: impl Into<String>) -> Self {
        self.original_text = Some(text.into());
        self
    }

    /// Materialize the pending task row.
    pub fn into_task(self, created_at: NaiveDateTime) -> Task {
        Task {
            id: self.id,
            status: TaskStatus::Pending,
            source_language: self.source_language,
            target_languages: self.target_languages,
            text_content: self.text_content,
            audio_file_path: self.audio_file_path,
            original_text: self.original_text,
            assigned_node_id: None,
            created_at,
            updated_at: created_at,
            result_file_path: None,
            error_message: None,
            retry_count: 0,
            accuracy: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_round_trips_through_strings() {
        for status in [
            TaskStatus::Pending,
            TaskStatus::Dispatching,
            TaskStatus::Processing,
            TaskStatus::Completed,
            TaskStatus::Failed,
            TaskStatus::Cancelled,
        ] {
            assert_eq!(TaskStatus::parse(status.as_str()), Some(status));
        }
        assert_eq!(TaskStatus::parse("pending"), Some(TaskStatus::Pending));
        assert_eq!(TaskStatus::parse("nonsense"), None);
    }

    #[test]
    fn terminal_states() {
        assert!(TaskStatus::Completed.is_terminal());
        assert!(TaskStatus::Failed.is_terminal());
        assert!(TaskStatus::Cancelled.is_terminal());
        assert!(!TaskStatus::Pending.is_terminal());
        assert!(!TaskStatus::Dispatching.is_terminal());
        assert!(!TaskStatus::Processing.is_terminal());
    }

    #[test]
    fn new_task_populates_exactly_one_payload() {
        let text = NewTask::text("en", vec!["zh".into()], "hello");
        assert!(text.text_content.is_some());
        assert!(text.audio_file_path.is_none());

        let audio = NewTask::audio("en", vec!["zh".into()], "/data/audio/a.wav");
        assert!(audio.text_content.is_none());
        assert!(audio.audio_file_path.is_some());
    }

    #[test]
    fn into_task_starts_pending_with_zero_retries() {
        let created = now_local();
        let task = NewTask::text("en", vec!["zh".into()], "hello").into_task(created);
        assert_eq!(task.status, TaskStatus::Pending);
        assert_eq!(task.retry_count, 0);
        assert!(task.assigned_node_id.is_none());
        assert_eq!(task.created_at, task.updated_at);
    }
}
