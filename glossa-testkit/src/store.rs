use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::NaiveDateTime;
use glossa::node::NodeId;
use glossa::store::{TaskFilter, TaskOutcome, TaskStore};
use glossa::task::{now_local, NewTask, Task, TaskId, TaskStatus};
use parking_lot::Mutex;

/// In-memory task repository with the same guarded transitions as the SQL
/// store: each mutation checks the current status and advances `updated_at`.
#[derive(Clone, Default)]
pub struct InMemoryTaskStore {
    tasks: Arc<Mutex<HashMap<TaskId, Task>>>,
}

impl InMemoryTaskStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Rewrite a task's `updated_at`, for aging fixtures.
    pub fn backdate_updated_at(&self, id: &TaskId, updated_at: NaiveDateTime) {
        if let Some(task) = self.tasks.lock().get_mut(id) {
            task.updated_at = updated_at;
        }
    }

    /// Overwrite a task's retry counter, for retry-ceiling fixtures.
    pub fn set_retry_count(&self, id: &TaskId, retry_count: u32) {
        if let Some(task) = self.tasks.lock().get_mut(id) {
            task.retry_count = retry_count;
        }
    }

    /// Every stored task, in no particular order.
    pub fn all_tasks(&self) -> Vec<Task> {
        self.tasks.lock().values().cloned().collect()
    }
}

#[async_trait]
impl TaskStore for InMemoryTaskStore {
    async fn insert(&self, new_task: NewTask) -> anyhow::Result<Task> {
        if new_task.target_languages.is_empty() {
            anyhow::bail!("a task needs at least one target language");
        }
        let task = new_task.into_task(now_local());
        let mut tasks = self.tasks.lock();
        if tasks.contains_key(&task.id) {
            anyhow::bail!("duplicate task id: {}", task.id);
        }
        tasks.insert(task.id.clone(), task.clone());
        Ok(task)
    }

    async fn find(&self, id: &TaskId) -> anyhow::Result<Option<Task>> {
        Ok(self.tasks.lock().get(id).cloned())
    }

    async fn mark_dispatching(&self, id: &TaskId) -> anyhow::Result<bool> {
        let mut tasks = self.tasks.lock();
        match tasks.get_mut(id) {
            Some(task) if task.status == TaskStatus::Pending => {
                task.status = TaskStatus::Dispatching;
                task.updated_at = now_local();
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn revert_to_pending(&self, id: &TaskId) -> anyhow::Result<bool> {
        let mut tasks = self.tasks.lock();
        match tasks.get_mut(id) {
            Some(task) if task.status == TaskStatus::Dispatching => {
                task.status = TaskStatus::Pending;
                task.updated_at = now_local();
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn mark_processing(&self, id: &TaskId, node_id: &NodeId) -> anyhow::Result<bool> {
        let mut tasks = self.tasks.lock();
        match tasks.get_mut(id) {
            Some(task)
                if matches!(
                    task.status,
                    TaskStatus::Pending | TaskStatus::Dispatching
                ) =>
            {
                task.status = TaskStatus::Processing;
                task.assigned_node_id = Some(node_id.clone());
                task.updated_at = now_local();
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn mark_failed(&self, id: &TaskId, error: &str) -> anyhow::Result<bool> {
        let mut tasks = self.tasks.lock();
        match tasks.get_mut(id) {
            Some(task) => {
                task.status = TaskStatus::Failed;
                task.error_message = Some(error.to_string());
                task.updated_at = now_local();
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn release_for_retry(&self, id: &TaskId, retry_count: u32) -> anyhow::Result<bool> {
        let mut tasks = self.tasks.lock();
        match tasks.get_mut(id) {
            Some(task) if task.status == TaskStatus::Processing => {
                task.status = TaskStatus::Pending;
                task.assigned_node_id = None;
                task.retry_count = retry_count;
                task.updated_at = now_local();
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn record_outcome(
        &self,
        id: &TaskId,
        status: TaskStatus,
        outcome: TaskOutcome,
    ) -> anyhow::Result<bool> {
        let mut tasks = self.tasks.lock();
        match tasks.get_mut(id) {
            Some(task) => {
                task.status = status;
                if let Some(path) = outcome.result_file_path {
                    task.result_file_path = Some(path);
                }
                if let Some(error) = outcome.error_message {
                    task.error_message = Some(error);
                }
                if let Some(accuracy) = outcome.accuracy {
                    task.accuracy = Some(accuracy);
                }
                if let Some(text) = outcome.transcribed_text {
                    task.text_content = Some(text);
                }
                task.updated_at = now_local();
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn count_processing(&self, node_id: &NodeId) -> anyhow::Result<u64> {
        Ok(self
            .tasks
            .lock()
            .values()
            .filter(|task| {
                task.status == TaskStatus::Processing
                    && task.assigned_node_id.as_ref() == Some(node_id)
            })
            .count() as u64)
    }

    async fn list_stuck(&self, older_than: NaiveDateTime) -> anyhow::Result<Vec<Task>> {
        let mut stuck: Vec<Task> = self
            .tasks
            .lock()
            .values()
            .filter(|task| task.status == TaskStatus::Processing && task.updated_at < older_than)
            .cloned()
            .collect();
        stuck.sort_by_key(|task| task.updated_at);
        Ok(stuck)
    }

    async fn list(&self, filter: TaskFilter) -> anyhow::Result<Vec<Task>> {
        let mut matched: Vec<Task> = self
            .tasks
            .lock()
            .values()
            .filter(|task| {
                filter.status.is_none_or(|status| task.status == status)
                    && filter
                        .source_language
                        .as_ref()
                        .is_none_or(|lang| &task.source_language == lang)
                    && filter.target_language.as_ref().is_none_or(|lang| {
                        task.target_languages.join(",").contains(lang.as_str())
                    })
                    && filter.text_contains.as_ref().is_none_or(|needle| {
                        task.text_content
                            .as_ref()
                            .is_some_and(|text| text.contains(needle.as_str()))
                    })
            })
            .cloned()
            .collect();
        matched.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(matched)
    }
}
