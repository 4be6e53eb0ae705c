//! SQLite-backed task record store.
//!
//! Stores [`TaskRecord`]s in a single `tasks` table. The schema is created
//! on connect, and commits carry the record's version in the `WHERE` clause
//! so stale writes fail fast instead of silently clobbering newer state.

use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions, SqliteRow};
use sqlx::Row;
use std::str::FromStr;

use async_trait::async_trait;

use super::record::{
    RecordError, TaskFiles, TaskProgress, TaskRecord, TaskStatus, TaskStore,
};

const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS tasks (
    task_id            TEXT PRIMARY KEY,
    url                TEXT NOT NULL,
    status             TEXT NOT NULL,
    progress           TEXT NOT NULL,
    title              TEXT,
    current_step       TEXT,
    current_step_index INTEGER NOT NULL DEFAULT 0,
    total_steps        INTEGER NOT NULL DEFAULT 0,
    step_progress      INTEGER NOT NULL DEFAULT 0,
    progress_message   TEXT NOT NULL DEFAULT '',
    error              TEXT,
    files              TEXT NOT NULL DEFAULT '{}',
    version            INTEGER NOT NULL DEFAULT 0,
    created_at         INTEGER NOT NULL,
    updated_at         INTEGER NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_tasks_status ON tasks (status);
CREATE INDEX IF NOT EXISTS idx_tasks_url ON tasks (url);
"#;

/// SQLite implementation of [`TaskStore`].
pub struct SqliteTaskStore {
    pool: SqlitePool,
}

impl SqliteTaskStore {
    /// Connects to the database, creating it (and the schema) if missing.
    ///
    /// # Arguments
    ///
    /// * `database_url` - SQLite connection string
    ///   (e.g., `sqlite://data/podforge.db` or `sqlite::memory:`)
    pub async fn connect(database_url: &str) -> Result<Self, RecordError> {
        let options = SqliteConnectOptions::from_str(database_url)
            .map_err(|e| RecordError::Storage(e.to_string()))?
            .create_if_missing(true);

        // An in-memory database exists per connection; a wider pool would
        // hand each connection its own empty database.
        let max_connections = if database_url.contains(":memory:") { 1 } else { 5 };

        let pool = SqlitePoolOptions::new()
            .max_connections(max_connections)
            .acquire_timeout(std::time::Duration::from_secs(30))
            .connect_with(options)
            .await?;

        let store = Self { pool };
        store.ensure_schema().await?;
        Ok(store)
    }

    /// Creates a store from an existing pool, ensuring the schema exists.
    pub async fn from_pool(pool: SqlitePool) -> Result<Self, RecordError> {
        let store = Self { pool };
        store.ensure_schema().await?;
        Ok(store)
    }

    /// Returns a reference to the connection pool.
    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    async fn ensure_schema(&self) -> Result<(), RecordError> {
        sqlx::query(SCHEMA).execute(&self.pool).await?;
        Ok(())
    }

    fn row_to_record(row: &SqliteRow) -> Result<TaskRecord, RecordError> {
        let status: String = row.get("status");
        let progress: String = row.get("progress");
        let files_json: String = row.get("files");

        let status = TaskStatus::parse(&status)
            .ok_or_else(|| RecordError::Storage(format!("unknown status '{}'", status)))?;
        let progress = TaskProgress::parse(&progress)
            .ok_or_else(|| RecordError::Storage(format!("unknown progress '{}'", progress)))?;
        let files: TaskFiles = serde_json::from_str(&files_json)?;

        Ok(TaskRecord {
            task_id: row.get("task_id"),
            url: row.get("url"),
            status,
            progress,
            title: row.get("title"),
            current_step: row.get("current_step"),
            current_step_index: row.get::<i64, _>("current_step_index") as u32,
            total_steps: row.get::<i64, _>("total_steps") as u32,
            step_progress: row.get::<i64, _>("step_progress") as u8,
            progress_message: row.get("progress_message"),
            error: row.get("error"),
            files,
            version: row.get("version"),
            created_at: row.get("created_at"),
            updated_at: row.get("updated_at"),
        })
    }
}

#[async_trait]
impl TaskStore for SqliteTaskStore {
    async fn insert(&self, record: &TaskRecord) -> Result<(), RecordError> {
        let files = serde_json::to_string(&record.files)?;
        sqlx::query(
            r#"
            INSERT INTO tasks (
                task_id, url, status, progress, title, current_step,
                current_step_index, total_steps, step_progress,
                progress_message, error, files, version, created_at, updated_at
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&record.task_id)
        .bind(&record.url)
        .bind(record.status.as_str())
        .bind(record.progress.as_str())
        .bind(&record.title)
        .bind(&record.current_step)
        .bind(record.current_step_index as i64)
        .bind(record.total_steps as i64)
        .bind(record.step_progress as i64)
        .bind(&record.progress_message)
        .bind(&record.error)
        .bind(&files)
        .bind(record.version)
        .bind(record.created_at)
        .bind(record.updated_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn get(&self, task_id: &str) -> Result<TaskRecord, RecordError> {
        let row = sqlx::query("SELECT * FROM tasks WHERE task_id = ?")
            .bind(task_id)
            .fetch_optional(&self.pool)
            .await?
            .ok_or_else(|| RecordError::Gone(task_id.to_string()))?;
        Self::row_to_record(&row)
    }

    async fn commit(&self, record: &mut TaskRecord) -> Result<(), RecordError> {
        let files = serde_json::to_string(&record.files)?;
        let result = sqlx::query(
            r#"
            UPDATE tasks SET
                url = ?, status = ?, progress = ?, title = ?, current_step = ?,
                current_step_index = ?, total_steps = ?, step_progress = ?,
                progress_message = ?, error = ?, files = ?, updated_at = ?,
                version = version + 1
            WHERE task_id = ? AND version = ?
            "#,
        )
        .bind(&record.url)
        .bind(record.status.as_str())
        .bind(record.progress.as_str())
        .bind(&record.title)
        .bind(&record.current_step)
        .bind(record.current_step_index as i64)
        .bind(record.total_steps as i64)
        .bind(record.step_progress as i64)
        .bind(&record.progress_message)
        .bind(&record.error)
        .bind(&files)
        .bind(record.updated_at)
        .bind(&record.task_id)
        .bind(record.version)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            let exists: bool =
                sqlx::query_scalar("SELECT EXISTS(SELECT 1 FROM tasks WHERE task_id = ?)")
                    .bind(&record.task_id)
                    .fetch_one(&self.pool)
                    .await?;
            return Err(if exists {
                RecordError::Conflict(record.task_id.clone())
            } else {
                RecordError::Gone(record.task_id.clone())
            });
        }

        record.version += 1;
        Ok(())
    }

    async fn list_unfinished(&self) -> Result<Vec<TaskRecord>, RecordError> {
        let rows =
            sqlx::query("SELECT * FROM tasks WHERE status IN ('pending', 'processing')")
                .fetch_all(&self.pool)
                .await?;
        rows.iter().map(Self::row_to_record).collect()
    }

    async fn find_by_url(&self, url: &str) -> Result<Option<TaskRecord>, RecordError> {
        let row = sqlx::query("SELECT * FROM tasks WHERE url = ? LIMIT 1")
            .bind(url)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(Self::row_to_record).transpose()
    }

    async fn delete(&self, task_id: &str) -> Result<(), RecordError> {
        let result = sqlx::query("DELETE FROM tasks WHERE task_id = ?")
            .bind(task_id)
            .execute(&self.pool)
            .await?;
        if result.rows_affected() == 0 {
            return Err(RecordError::Gone(task_id.to_string()));
        }
        Ok(())
    }
}
