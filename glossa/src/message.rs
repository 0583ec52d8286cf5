//! Broker message bodies.
//!
//! Everything queued through the broker is a self-describing JSON record with
//! camelCase keys and zone-less ISO-8601 timestamps, the format the workers
//! already consume.

use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};

use crate::task::{now_local, Task, TaskId};

/// Envelope parked on the global pending queue when no node could take a
/// task at creation time.
///
/// Not authoritative: the task repository remains the source of truth, and an
/// envelope is dropped as soon as its task is no longer pending.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PendingTask {
    pub task_id: TaskId,
    pub retry_count: u32,
    pub added_at: NaiveDateTime,
}

impl PendingTask {
    pub fn new(task_id: TaskId, retry_count: u32) -> Self {
        Self {
            task_id,
            retry_count,
            added_at: now_local(),
        }
    }

    /// The follow-up envelope written on requeue.
    pub fn retried(&self) -> Self {
        Self::new(self.task_id.clone(), self.retry_count + 1)
    }
}

/// Work message pushed onto a node's task queue.
///
/// Carries everything the worker needs so it never has to read the task row
/// before starting.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskAssignment {
    pub task_id: TaskId,
    pub audio_file_path: Option<String>,
    pub text_content: Option<String>,
    pub source_language: String,
    pub target_languages: Vec<String>,
    pub original_text: Option<String>,
}

impl TaskAssignment {
    pub fn from_task(task: &Task) -> Self {
        Self {
            task_id: task.id.clone(),
            audio_file_path: task.audio_file_path.clone(),
            text_content: task.text_content.clone(),
            source_language: task.source_language.clone(),
            target_languages: task.target_languages.clone(),
            original_text: task.original_text.clone(),
        }
    }
}

/// Out-of-band command pushed onto a node's control queue, interleaved with
/// regular work. Discriminated by the `action` key.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "action")]
pub enum ControlMessage {
    #[serde(rename = "CANCEL_TASK", rename_all = "camelCase")]
    CancelTask {
        task_id: TaskId,
        timestamp: NaiveDateTime,
    },
}

impl ControlMessage {
    /// A cancellation command for the given task, stamped now.
    pub fn cancel(task_id: TaskId) -> Self {
        ControlMessage::CancelTask {
            task_id,
            timestamp: now_local(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pending_envelope_uses_worker_field_names() {
        let envelope = PendingTask::new(TaskId::from("t-1"), 3);
        let json = serde_json::to_string(&envelope).unwrap();
        assert!(json.contains("\"taskId\":\"t-1\""));
        assert!(json.contains("\"retryCount\":3"));
        assert!(json.contains("\"addedAt\""));

        let parsed: PendingTask = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, envelope);
    }

    #[test]
    fn retried_envelope_bumps_the_counter() {
        let envelope = PendingTask::new(TaskId::from("t-1"), 0);
        assert_eq!(envelope.retried().retry_count, 1);
        assert_eq!(envelope.retried().task_id, envelope.task_id);
    }

    #[test]
    fn control_message_is_action_tagged() {
        let message = ControlMessage::cancel(TaskId::from("t-9"));
        let json = serde_json::to_string(&message).unwrap();
        assert!(json.contains("\"action\":\"CANCEL_TASK\""));
        assert!(json.contains("\"taskId\":\"t-9\""));
        assert!(json.contains("\"timestamp\""));
    }

    #[test]
    fn timestamps_serialize_without_zone() {
        let envelope = PendingTask::new(TaskId::from("t-1"), 0);
        let json = serde_json::to_string(&envelope).unwrap();
        // No offset suffix on the local timestamp.
        assert!(!json.contains('Z'));
        assert!(!json.contains("+00:00"));
    }
}
