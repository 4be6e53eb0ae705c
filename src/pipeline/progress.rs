//! Durable progress reporting onto the task record.
//!
//! Every update is a read-modify-write against the record store and commits
//! immediately; there is no buffering. The tracker is the only writer for a
//! task while it executes, so a stale-version conflict or a missing record
//! means the task was deleted; `update_error` swallows that case with a
//! warning, everything else propagates it.

use std::sync::Arc;

use tracing::{info, warn};

use crate::storage::{
    ArtifactKind, Lang, Level, RecordError, TaskProgress, TaskRecord, TaskStatus, TaskStore,
};

/// Writes step progress, errors and artifact registrations to the task
/// record.
pub struct ProgressTracker {
    store: Arc<dyn TaskStore>,
    task_id: String,
    total_steps: u32,
}

impl ProgressTracker {
    /// Creates a tracker for one task execution.
    pub fn new(store: Arc<dyn TaskStore>, task_id: String, total_steps: u32) -> Self {
        Self {
            store,
            task_id,
            total_steps,
        }
    }

    /// The task this tracker reports for.
    pub fn task_id(&self) -> &str {
        &self.task_id
    }

    /// Total number of pipeline steps.
    pub fn total_steps(&self) -> u32 {
        self.total_steps
    }

    async fn load(&self) -> Result<TaskRecord, RecordError> {
        self.store.get(&self.task_id).await
    }

    async fn commit(&self, record: &mut TaskRecord) -> Result<(), RecordError> {
        record.touch();
        self.store.commit(record).await
    }

    /// Records the progress of one step.
    ///
    /// Fine-grained progress becomes `completed` exactly when `progress`
    /// reaches 100, `processing` otherwise.
    pub async fn update_progress(
        &self,
        step_index: u32,
        step_name: &str,
        progress: u8,
        message: &str,
    ) -> Result<(), RecordError> {
        let progress = progress.min(100);
        info!(
            task_id = %self.task_id,
            step = %step_name,
            index = step_index,
            progress,
            "Updating progress"
        );

        let mut record = self.load().await?;
        record.status = TaskStatus::Processing;
        record.progress = if progress == 100 {
            TaskProgress::Completed
        } else {
            TaskProgress::Processing
        };
        record.current_step = Some(step_name.to_string());
        record.current_step_index = step_index;
        record.total_steps = self.total_steps;
        record.step_progress = progress;
        record.progress_message = message.to_string();
        self.commit(&mut record).await
    }

    /// Records a terminal failure, preserving the last known step.
    ///
    /// A missing or stale record is swallowed: the task was deleted while
    /// running, and there is nothing left to report on.
    pub async fn update_error(&self, error: &str) -> Result<(), RecordError> {
        let mut record = match self.load().await {
            Ok(record) => record,
            Err(e) if e.is_gone() => {
                warn!(task_id = %self.task_id, "Cannot record error, task deleted");
                return Ok(());
            }
            Err(e) => return Err(e),
        };

        record.status = TaskStatus::Failed;
        record.progress = TaskProgress::Failed;
        record.step_progress = 0;
        record.progress_message = "Task execution failed".to_string();
        record.error = Some(error.to_string());

        match self.commit(&mut record).await {
            Ok(()) => Ok(()),
            Err(e) if e.is_gone() => {
                warn!(task_id = %self.task_id, "Cannot record error, task deleted");
                Ok(())
            }
            Err(e) => Err(e),
        }
    }

    /// Registers a published artifact in the record's file map.
    pub async fn update_files(
        &self,
        level: Level,
        lang: Lang,
        kind: ArtifactKind,
        filename: String,
    ) -> Result<(), RecordError> {
        let mut record = self.load().await?;
        record.files.set(level, lang, kind, filename);
        self.commit(&mut record).await
    }

    /// Writes the resolved episode title onto the record.
    pub async fn set_title(&self, title: &str) -> Result<(), RecordError> {
        let mut record = self.load().await?;
        record.title = Some(title.to_string());
        self.commit(&mut record).await
    }
}
