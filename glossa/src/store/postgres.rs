use async_trait::async_trait;
use chrono::NaiveDateTime;
use sqlx::postgres::{PgPoolOptions, PgRow};
use sqlx::{PgPool, Row};

use super::{TaskFilter, TaskOutcome, TaskStore};
use crate::config::PersistenceConfig;
use crate::node::NodeId;
use crate::task::{now_local, NewTask, Task, TaskId, TaskStatus};

/// PostgreSQL-backed task store.
///
/// Each lifecycle transition is a single guarded `UPDATE`; there is no
/// in-memory dirty tracking and no multi-statement transaction to leave
/// half-applied.
#[derive(Clone, Debug)]
pub struct PgTaskStore {
    pool: PgPool,
}

impl PgTaskStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Open a pool from persistence configuration.
    pub async fn connect(config: &PersistenceConfig) -> anyhow::Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(config.max_connections)
            .min_connections(config.min_connections)
            .acquire_timeout(std::time::Duration::from_secs(config.acquire_timeout_seconds))
            .connect(&config.connection_string)
            .await?;
        Ok(Self::new(pool))
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    fn task_from_row(row: &PgRow) -> anyhow::Result<Task> {
        let status_raw: String = row.try_get("status")?;
        let status = TaskStatus::parse(&status_raw)
            .ok_or_else(|| anyhow::anyhow!("unknown task status in row: {status_raw}"))?;
        let id: String = row.try_get("id")?;
        let target_languages: String = row.try_get("target_languages")?;
        let assigned: Option<String> = row.try_get("assigned_node_id")?;
        let retry_count: i32 = row.try_get("retry_count")?;

        Ok(Task {
            id: TaskId::from(id),
            status,
            source_language: row.try_get("source_language")?,
            target_languages: split_languages(&target_languages),
            text_content: row.try_get("text_content")?,
            audio_file_path: row.try_get("audio_file_path")?,
            original_text: row.try_get("original_text")?,
            assigned_node_id: assigned.map(NodeId::from),
            created_at: row.try_get("created_at")?,
            updated_at: row.try_get("updated_at")?,
            result_file_path: row.try_get("result_file_path")?,
            error_message: row.try_get("error_message")?,
            retry_count: retry_count.max(0) as u32,
            accuracy: row.try_get("accuracy")?,
        })
    }
}

fn split_languages(joined: &str) -> Vec<String> {
    joined
        .split(',')
        .map(str::trim)
        .filter(|part| !part.is_empty())
        .map(str::to_string)
        .collect()
}

const ALL_COLUMNS: &str = "id, status, audio_file_path, text_content, source_language, \
     target_languages, assigned_node_id, created_at, updated_at, result_file_path, \
     error_message, original_text, retry_count, accuracy";

#[async_trait]
impl TaskStore for PgTaskStore {
    async fn insert(&self, new_task: NewTask) -> anyhow::Result<Task> {
        if new_task.target_languages.is_empty() {
            anyhow::bail!("a task needs at least one target language");
        }

        let task = new_task.into_task(now_local());
        sqlx::query(
            r#"
            INSERT INTO translation_tasks (
                id, status, audio_file_path, text_content, source_language,
                target_languages, assigned_node_id, created_at, updated_at,
                result_file_path, error_message, original_text, retry_count, accuracy
            )
            VALUES ($1, $2, $3, $4, $5, $6, NULL, $7, $8, NULL, NULL, $9, 0, NULL)
            "#,
        )
        .bind(task.id.as_str())
        .bind(task.status.as_str())
        .bind(&task.audio_file_path)
        .bind(&task.text_content)
        .bind(&task.source_language)
        .bind(task.target_languages.join(","))
        .bind(task.created_at)
        .bind(task.updated_at)
        .bind(&task.original_text)
        .execute(&self.pool)
        .await?;

        Ok(task)
    }

    async fn find(&self, id: &TaskId) -> anyhow::Result<Option<Task>> {
        let row = sqlx::query(&format!(
            "SELECT {ALL_COLUMNS} FROM translation_tasks WHERE id = $1"
        ))
        .bind(id.as_str())
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(Self::task_from_row).transpose()
    }

    async fn mark_dispatching(&self, id: &TaskId) -> anyhow::Result<bool> {
        let result = sqlx::query(
            r#"
            UPDATE translation_tasks
            SET status = 'DISPATCHING', updated_at = $2
            WHERE id = $1 AND status = 'PENDING'
            "#,
        )
        .bind(id.as_str())
        .bind(now_local())
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn revert_to_pending(&self, id: &TaskId) -> anyhow::Result<bool> {
        let result = sqlx::query(
            r#"
            UPDATE translation_tasks
            SET status = 'PENDING', updated_at = $2
            WHERE id = $1 AND status = 'DISPATCHING'
            "#,
        )
        .bind(id.as_str())
        .bind(now_local())
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn mark_processing(&self, id: &TaskId, node_id: &NodeId) -> anyhow::Result<bool> {
        let result = sqlx::query(
            r#"
            UPDATE translation_tasks
            SET status = 'PROCESSING', assigned_node_id = $2, updated_at = $3
            WHERE id = $1 AND status IN ('PENDING', 'DISPATCHING')
            "#,
        )
        .bind(id.as_str())
        .bind(node_id.as_str())
        .bind(now_local())
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn mark_failed(&self, id: &TaskId, error: &str) -> anyhow::Result<bool> {
        let result = sqlx::query(
            r#"
            UPDATE translation_tasks
            SET status = 'FAILED', error_message = $2, updated_at = $3
            WHERE id = $1
            "#,
        )
        .bind(id.as_str())
        .bind(error)
        .bind(now_local())
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn release_for_retry(&self, id: &TaskId, retry_count: u32) -> anyhow::Result<bool> {
        let result = sqlx::query(
            r#"
            UPDATE translation_tasks
            SET status = 'PENDING', assigned_node_id = NULL,
                retry_count = $2, updated_at = $3
            WHERE id = $1 AND status = 'PROCESSING'
            "#,
        )
        .bind(id.as_str())
        .bind(retry_count as i32)
        .bind(now_local())
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn record_outcome(
        &self,
        id: &TaskId,
        status: TaskStatus,
        outcome: TaskOutcome,
    ) -> anyhow::Result<bool> {
        let result = sqlx::query(
            r#"
            UPDATE translation_tasks
            SET status = $2,
                result_file_path = COALESCE($3, result_file_path),
                error_message = COALESCE($4, error_message),
                accuracy = COALESCE($5, accuracy),
                text_content = COALESCE($6, text_content),
                updated_at = $7
            WHERE id = $1
            "#,
        )
        .bind(id.as_str())
        .bind(status.as_str())
        .bind(&outcome.result_file_path)
        .bind(&outcome.error_message)
        .bind(outcome.accuracy)
        .bind(&outcome.transcribed_text)
        .bind(now_local())
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn count_processing(&self, node_id: &NodeId) -> anyhow::Result<u64> {
        let row = sqlx::query(
            r#"
            SELECT COUNT(*) AS live
            FROM translation_tasks
            WHERE assigned_node_id = $1 AND status = 'PROCESSING'
            "#,
        )
        .bind(node_id.as_str())
        .fetch_one(&self.pool)
        .await?;
        let live: i64 = row.try_get("live")?;
        Ok(live.max(0) as u64)
    }

    async fn list_stuck(&self, older_than: NaiveDateTime) -> anyhow::Result<Vec<Task>> {
        let rows = sqlx::query(&format!(
            "SELECT {ALL_COLUMNS} FROM translation_tasks \
             WHERE status = 'PROCESSING' AND updated_at < $1 \
             ORDER BY updated_at ASC"
        ))
        .bind(older_than)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(Self::task_from_row).collect()
    }

    async fn list(&self, filter: TaskFilter) -> anyhow::Result<Vec<Task>> {
        let status = filter.status.map(|status| status.as_str().to_string());
        let rows = sqlx::query(&format!(
            "SELECT {ALL_COLUMNS} FROM translation_tasks \
             WHERE ($1::text IS NULL OR status = $1) \
               AND ($2::text IS NULL OR source_language = $2) \
               AND ($3::text IS NULL OR target_languages LIKE '%' || $3 || '%') \
               AND ($4::text IS NULL OR text_content LIKE '%' || $4 || '%') \
             ORDER BY created_at DESC"
        ))
        .bind(status)
        .bind(filter.source_language)
        .bind(filter.target_language)
        .bind(filter.text_contains)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(Self::task_from_row).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::split_languages;

    #[test]
    fn languages_split_on_commas_and_trim() {
        assert_eq!(split_languages("zh,ja, ko"), vec!["zh", "ja", "ko"]);
        assert_eq!(split_languages("zh"), vec!["zh"]);
        assert!(split_languages("").is_empty());
    }
}
