//! Task records and the record store abstraction.
//!
//! A [`TaskRecord`] is the durable, user-visible state of one podcast
//! generation task: lifecycle status, fine-grained progress, the current
//! step, and the published artifact files. Records live in a [`TaskStore`],
//! which the pipeline consumes through a narrow get/commit/refresh
//! interface.
//!
//! Commits are version-checked: every successful commit bumps the record
//! version, and a commit against a stale version fails fast. A single
//! worker owns a task's record for the duration of one execution, so a
//! conflict means the record was deleted or externally rewritten; both are
//! treated as the graceful-exit case by the pipeline.

use std::collections::{BTreeMap, HashMap};
use std::fmt;

use async_trait::async_trait;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::Mutex;
use uuid::Uuid;

/// Errors that can occur in the task record store.
#[derive(Debug, Error)]
pub enum RecordError {
    /// The record no longer exists (deleted mid-execution).
    #[error("Task record gone: {0}")]
    Gone(String),

    /// A commit raced a concurrent writer; the in-memory copy is stale.
    #[error("Stale task record: {0}")]
    Conflict(String),

    /// The backing store failed.
    #[error("Store error: {0}")]
    Storage(String),

    /// SQL query failed.
    #[error("SQL error: {0}")]
    Sql(#[from] sqlx::Error),

    /// Serialization of a record column failed.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl RecordError {
    /// True when the error means the record is no longer ours to update.
    ///
    /// Both deletion and a stale-version conflict end the execution quietly;
    /// no other writer is ever legitimate for an in-flight task.
    pub fn is_gone(&self) -> bool {
        matches!(self, RecordError::Gone(_) | RecordError::Conflict(_))
    }
}

/// Overall task lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskStatus {
    Pending,
    Processing,
    Completed,
    Failed,
}

impl TaskStatus {
    /// Stable string form used in the database and in log output.
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskStatus::Pending => "pending",
            TaskStatus::Processing => "processing",
            TaskStatus::Completed => "completed",
            TaskStatus::Failed => "failed",
        }
    }

    /// Parses the stable string form.
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(TaskStatus::Pending),
            "processing" => Some(TaskStatus::Processing),
            "completed" => Some(TaskStatus::Completed),
            "failed" => Some(TaskStatus::Failed),
            _ => None,
        }
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Fine-grained state of the step currently being executed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskProgress {
    Waiting,
    Processing,
    Completed,
    Failed,
}

impl TaskProgress {
    /// Stable string form used in the database and in log output.
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskProgress::Waiting => "waiting",
            TaskProgress::Processing => "processing",
            TaskProgress::Completed => "completed",
            TaskProgress::Failed => "failed",
        }
    }

    /// Parses the stable string form.
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "waiting" => Some(TaskProgress::Waiting),
            "processing" => Some(TaskProgress::Processing),
            "completed" => Some(TaskProgress::Completed),
            "failed" => Some(TaskProgress::Failed),
            _ => None,
        }
    }
}

impl fmt::Display for TaskProgress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Target difficulty tier for generated content.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "lowercase")]
pub enum Level {
    Elementary,
    Intermediate,
    Advanced,
}

impl Level {
    /// All levels, in pipeline order.
    pub const ALL: [Level; 3] = [Level::Elementary, Level::Intermediate, Level::Advanced];

    /// Stable string form used in context keys, file names and prompts.
    pub fn as_str(&self) -> &'static str {
        match self {
            Level::Elementary => "elementary",
            Level::Intermediate => "intermediate",
            Level::Advanced => "advanced",
        }
    }
}

impl fmt::Display for Level {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Output language of a generated artifact.
///
/// `Cn` is the primary (native) language of generated dialogue; `En` is the
/// secondary language produced by translation.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "lowercase")]
pub enum Lang {
    Cn,
    En,
}

impl Lang {
    /// All languages, in pipeline order.
    pub const ALL: [Lang; 2] = [Lang::Cn, Lang::En];

    /// Stable string form used in context keys, file names and voice keys.
    pub fn as_str(&self) -> &'static str {
        match self {
            Lang::Cn => "cn",
            Lang::En => "en",
        }
    }
}

impl fmt::Display for Lang {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Speaker role of a dialogue turn.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Host,
    Guest,
}

impl Role {
    /// Stable string form used in file names and voice keys.
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Host => "host",
            Role::Guest => "guest",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Kind of published artifact.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ArtifactKind {
    Audio,
    Subtitle,
}

impl ArtifactKind {
    /// Stable string form used in file names.
    pub fn as_str(&self) -> &'static str {
        match self {
            ArtifactKind::Audio => "audio",
            ArtifactKind::Subtitle => "subtitle",
        }
    }

    /// File extension for this artifact kind.
    pub fn extension(&self) -> &'static str {
        match self {
            ArtifactKind::Audio => "mp3",
            ArtifactKind::Subtitle => "srt",
        }
    }
}

impl fmt::Display for ArtifactKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Published artifact file names for one level+language combination.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileSet {
    /// Merged audio track file name.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub audio: Option<String>,
    /// Bilingual subtitle file name.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub subtitle: Option<String>,
}

impl FileSet {
    fn set(&mut self, kind: ArtifactKind, filename: String) {
        match kind {
            ArtifactKind::Audio => self.audio = Some(filename),
            ArtifactKind::Subtitle => self.subtitle = Some(filename),
        }
    }

    fn get(&self, kind: ArtifactKind) -> Option<&str> {
        match kind {
            ArtifactKind::Audio => self.audio.as_deref(),
            ArtifactKind::Subtitle => self.subtitle.as_deref(),
        }
    }
}

/// Nested map of published artifacts: level → language → file set.
///
/// Mutation goes through [`TaskFiles::set`] so every write is an explicit
/// merge; there is no untyped JSON blob to keep in sync.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TaskFiles(BTreeMap<Level, BTreeMap<Lang, FileSet>>);

impl TaskFiles {
    /// Creates an empty file map.
    pub fn new() -> Self {
        Self::default()
    }

    /// Merges one artifact file name into the map.
    pub fn set(&mut self, level: Level, lang: Lang, kind: ArtifactKind, filename: String) {
        self.0
            .entry(level)
            .or_default()
            .entry(lang)
            .or_default()
            .set(kind, filename);
    }

    /// Looks up one artifact file name.
    pub fn get(&self, level: Level, lang: Lang, kind: ArtifactKind) -> Option<&str> {
        self.0.get(&level)?.get(&lang)?.get(kind)
    }

    /// True when no artifact has been registered yet.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

/// Durable state of one podcast generation task.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskRecord {
    /// Unique task identifier.
    pub task_id: String,
    /// Source article URL.
    pub url: String,
    /// Overall lifecycle status.
    pub status: TaskStatus,
    /// Fine-grained state of the current step.
    pub progress: TaskProgress,
    /// Resolved article title, once known.
    pub title: Option<String>,
    /// Name of the step currently (or last) executing.
    pub current_step: Option<String>,
    /// Index of the current step in the pipeline.
    pub current_step_index: u32,
    /// Total number of steps in the pipeline.
    pub total_steps: u32,
    /// Progress of the current step, 0-100.
    pub step_progress: u8,
    /// Free-text progress description for display.
    pub progress_message: String,
    /// Terminal error text, when failed.
    pub error: Option<String>,
    /// Published artifact files.
    pub files: TaskFiles,
    /// Optimistic-concurrency version, bumped on every commit.
    pub version: i64,
    /// Creation time, milliseconds since the epoch.
    pub created_at: i64,
    /// Last update time, milliseconds since the epoch.
    pub updated_at: i64,
}

impl TaskRecord {
    /// Creates a new pending record for a source URL.
    pub fn new(url: impl Into<String>) -> Self {
        let now = now_ms();
        Self {
            task_id: Uuid::new_v4().to_string(),
            url: url.into(),
            status: TaskStatus::Pending,
            progress: TaskProgress::Waiting,
            title: None,
            current_step: None,
            current_step_index: 0,
            total_steps: 0,
            step_progress: 0,
            progress_message: String::new(),
            error: None,
            files: TaskFiles::new(),
            version: 0,
            created_at: now,
            updated_at: now,
        }
    }

    /// Bumps the update timestamp to now.
    pub fn touch(&mut self) {
        self.updated_at = now_ms();
    }

    /// True when the record is in a state a new execution may start from.
    pub fn is_startable(&self) -> bool {
        matches!(self.status, TaskStatus::Pending | TaskStatus::Failed)
    }

    /// True when the record is neither completed nor failed.
    pub fn is_unfinished(&self) -> bool {
        matches!(self.status, TaskStatus::Pending | TaskStatus::Processing)
    }
}

/// Current time in milliseconds since the Unix epoch.
pub fn now_ms() -> i64 {
    Utc::now().timestamp_millis()
}

/// Narrow interface to the task record store.
///
/// `commit` is version-checked: it succeeds only when the stored version
/// matches `record.version`, then bumps both. `get` on a missing record
/// returns [`RecordError::Gone`], which callers treat as "deleted by the
/// user" and exit quietly.
#[async_trait]
pub trait TaskStore: Send + Sync {
    /// Inserts a new record.
    async fn insert(&self, record: &TaskRecord) -> Result<(), RecordError>;

    /// Loads the latest version of a record.
    async fn get(&self, task_id: &str) -> Result<TaskRecord, RecordError>;

    /// Reloads `record` in place from the store.
    ///
    /// Fails with [`RecordError::Gone`] when the record was deleted, which
    /// callers treat as the quiet-exit signal.
    async fn refresh(&self, record: &mut TaskRecord) -> Result<(), RecordError> {
        *record = self.get(&record.task_id).await?;
        Ok(())
    }

    /// Persists a record, bumping its version on success.
    async fn commit(&self, record: &mut TaskRecord) -> Result<(), RecordError>;

    /// Lists records that are neither completed nor failed.
    async fn list_unfinished(&self) -> Result<Vec<TaskRecord>, RecordError>;

    /// Finds a record by source URL, if any.
    async fn find_by_url(&self, url: &str) -> Result<Option<TaskRecord>, RecordError>;

    /// Deletes a record.
    async fn delete(&self, task_id: &str) -> Result<(), RecordError>;
}

/// In-memory task store for tests and ephemeral runs.
#[derive(Default)]
pub struct InMemoryTaskStore {
    records: Mutex<HashMap<String, TaskRecord>>,
}

impl InMemoryTaskStore {
    /// Creates an empty store.
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl TaskStore for InMemoryTaskStore {
    async fn insert(&self, record: &TaskRecord) -> Result<(), RecordError> {
        let mut records = self.records.lock().await;
        if records.contains_key(&record.task_id) {
            return Err(RecordError::Storage(format!(
                "duplicate task id: {}",
                record.task_id
            )));
        }
        records.insert(record.task_id.clone(), record.clone());
        Ok(())
    }

    async fn get(&self, task_id: &str) -> Result<TaskRecord, RecordError> {
        let records = self.records.lock().await;
        records
            .get(task_id)
            .cloned()
            .ok_or_else(|| RecordError::Gone(task_id.to_string()))
    }

    async fn commit(&self, record: &mut TaskRecord) -> Result<(), RecordError> {
        let mut records = self.records.lock().await;
        let stored = records
            .get_mut(&record.task_id)
            .ok_or_else(|| RecordError::Gone(record.task_id.clone()))?;
        if stored.version != record.version {
            return Err(RecordError::Conflict(record.task_id.clone()));
        }
        record.version += 1;
        *stored = record.clone();
        Ok(())
    }

    async fn list_unfinished(&self) -> Result<Vec<TaskRecord>, RecordError> {
        let records = self.records.lock().await;
        Ok(records
            .values()
            .filter(|r| r.is_unfinished())
            .cloned()
            .collect())
    }

    async fn find_by_url(&self, url: &str) -> Result<Option<TaskRecord>, RecordError> {
        let records = self.records.lock().await;
        Ok(records.values().find(|r| r.url == url).cloned())
    }

    async fn delete(&self, task_id: &str) -> Result<(), RecordError> {
        let mut records = self.records.lock().await;
        records
            .remove(task_id)
            .map(|_| ())
            .ok_or_else(|| RecordError::Gone(task_id.to_string()))
    }
}
