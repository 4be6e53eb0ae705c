//! The step pipeline processor.
//!
//! A [`TaskProcessor`] runs one task's full step list in order, from
//! `start_step` to the end. For every step it decides between executing and
//! skipping: a step is skipped when all of its declared outputs already
//! exist (as files under the task directory or non-empty context values),
//! which makes re-execution idempotent at step granularity: a resumed or
//! retried run never redoes finished work. The single exception is a
//! resumed retry targeting exactly the previously failed step, which always
//! re-executes.
//!
//! A step failing with a transient error is retried in place a bounded
//! number of times; exhausting those retries records the failure and aborts
//! the pass with [`TaskError::StepFailed`], the task-level retry boundary
//! handled by the runner. A task record deleted mid-run surfaces as
//! [`TaskError::RecordGone`], which callers treat as a quiet exit.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use serde_json::json;
use thiserror::Error;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

use crate::services::StepServices;
use crate::storage::{RecordError, TaskProgress, TaskStatus, TaskStore};

use super::context::TaskContext;
use super::progress::ProgressTracker;
use super::step::{keys, Step, StepError};
use super::steps::build_steps;

/// Task-level errors raised by a pipeline pass.
#[derive(Debug, Error)]
pub enum TaskError {
    /// A step exhausted its in-place retries (or violated its contract).
    #[error("Step '{step}' failed after {attempts} attempt(s): {source}")]
    StepFailed {
        step: String,
        attempts: u32,
        /// Whether a whole-pipeline retry may help.
        transient: bool,
        #[source]
        source: StepError,
    },

    /// The task record was deleted while the pipeline ran.
    #[error("Task record gone: {0}")]
    RecordGone(String),

    /// The wall-clock budget ran out between steps.
    #[error("Task exceeded its time budget of {budget:?}")]
    DeadlineExceeded { budget: Duration },

    /// The record store failed for a reason other than deletion.
    #[error("Record store error: {0}")]
    Record(#[source] RecordError),

    /// The context document could not be read or written.
    #[error("Context error: {0}")]
    Context(#[from] std::io::Error),
}

impl TaskError {
    /// True when a task-level retry is worth attempting.
    pub fn is_retryable(&self) -> bool {
        matches!(self, TaskError::StepFailed { transient: true, .. })
    }

    fn from_record(task_id: &str, e: RecordError) -> Self {
        if e.is_gone() {
            TaskError::RecordGone(task_id.to_string())
        } else {
            TaskError::Record(e)
        }
    }
}

/// Executes one task's step pipeline to completion.
pub struct TaskProcessor {
    task_id: String,
    task_dir: PathBuf,
    store: Arc<dyn TaskStore>,
    context: TaskContext,
    steps: Vec<Box<dyn Step>>,
    tracker: ProgressTracker,
    start_step: usize,
    /// Step name to force-execute on a resumed retry.
    resume_step: Option<String>,
    deadline: Option<(Instant, Duration)>,
    step_retries: u32,
    step_retry_delay: Duration,
}

impl TaskProcessor {
    /// Builds a processor for a task.
    ///
    /// Loads the task record, opens (or reloads) the context document,
    /// assembles the full step list and computes the starting step. With
    /// `is_retry` set, execution resumes at the previously failed step and
    /// that step is forced to re-execute.
    pub async fn new(
        task_id: &str,
        store: Arc<dyn TaskStore>,
        services: Arc<StepServices>,
        is_retry: bool,
    ) -> Result<Self, TaskError> {
        let record = store
            .get(task_id)
            .await
            .map_err(|e| TaskError::from_record(task_id, e))?;

        services.blob.ensure_task_dirs(task_id).await?;
        let task_dir = services.blob.task_dir(task_id);

        let mut context = TaskContext::load_or_init(&task_dir).await?;
        let mut seed = super::context::StepOutput::new();
        seed.insert(keys::TASK_ID.to_string(), json!(record.task_id));
        seed.insert(keys::URL.to_string(), json!(record.url));
        seed.insert(
            keys::TASK_DIR.to_string(),
            json!(task_dir.to_string_lossy()),
        );
        context.update(seed).await?;

        let steps = build_steps(&services);
        let tracker = ProgressTracker::new(store.clone(), task_id.to_string(), steps.len() as u32);

        let resume_step = if is_retry { record.current_step.clone() } else { None };
        let start_step = resume_step
            .as_deref()
            .and_then(|name| steps.iter().position(|s| s.name() == name))
            .unwrap_or(0);

        let config = &services.config;
        Ok(Self {
            task_id: task_id.to_string(),
            task_dir,
            store,
            context,
            steps,
            tracker,
            start_step,
            resume_step,
            deadline: config
                .task_deadline
                .map(|budget| (Instant::now() + budget, budget)),
            step_retries: config.max_step_retries,
            step_retry_delay: config.step_retry_delay,
        })
    }

    /// Total number of steps in the pipeline.
    pub fn total_steps(&self) -> usize {
        self.steps.len()
    }

    /// Index execution will start from.
    pub fn start_step(&self) -> usize {
        self.start_step
    }

    /// Runs the pipeline to completion.
    pub async fn run(mut self) -> Result<(), TaskError> {
        info!(
            task_id = %self.task_id,
            start_step = self.start_step,
            total_steps = self.steps.len(),
            "Starting pipeline"
        );

        match self.execute_steps().await {
            Ok(()) => self.complete().await,
            Err(e) => {
                self.handle_failure(&e).await;
                Err(e)
            }
        }
    }

    async fn execute_steps(&mut self) -> Result<(), TaskError> {
        self.mark_processing().await?;

        for i in self.start_step..self.steps.len() {
            if let Some((deadline, budget)) = self.deadline {
                if Instant::now() >= deadline {
                    return Err(TaskError::DeadlineExceeded { budget });
                }
            }

            self.context
                .set(keys::CURRENT_STEP_INDEX, json!(i))
                .await?;

            let name = self.steps[i].name().to_string();
            self.tracker
                .update_progress(i as u32, &name, 0, "Starting")
                .await
                .map_err(|e| TaskError::from_record(&self.task_id, e))?;

            if self.should_execute(i) {
                self.execute_step(i).await?;
            } else {
                debug!(task_id = %self.task_id, step = %name, "Skipping completed step");
                self.load_existing_outputs(i).await?;
                self.tracker
                    .update_progress(i as u32, &name, 100, "Already complete")
                    .await
                    .map_err(|e| TaskError::from_record(&self.task_id, e))?;
            }
        }

        Ok(())
    }

    /// Pure skip/execute decision for one step.
    ///
    /// A resumed retry always re-executes the step it resumes at; any other
    /// step is skipped when every declared output already exists as a file
    /// under the task directory or a non-empty context value.
    fn should_execute(&self, index: usize) -> bool {
        let step = &self.steps[index];
        if self
            .resume_step
            .as_deref()
            .is_some_and(|name| name == step.name())
        {
            return true;
        }

        !step.outputs().iter().all(|key| {
            self.context.has_non_empty(key) || self.task_dir.join(key).is_file()
        })
    }

    async fn execute_step(&mut self, index: usize) -> Result<(), TaskError> {
        let name = self.steps[index].name().to_string();
        let mut attempt: u32 = 0;

        loop {
            let result = self.steps[index]
                .execute(&mut self.context, &self.tracker)
                .await;

            match result {
                Ok(output) => {
                    self.context.update(output).await?;
                    self.tracker
                        .update_progress(index as u32, &name, 100, "Completed")
                        .await
                        .map_err(|e| TaskError::from_record(&self.task_id, e))?;
                    return Ok(());
                }
                Err(e) if e.is_record_gone() => {
                    return Err(TaskError::RecordGone(self.task_id.clone()));
                }
                Err(e) if e.is_transient() && attempt < self.step_retries => {
                    attempt += 1;
                    warn!(
                        task_id = %self.task_id,
                        step = %name,
                        attempt,
                        error = %e,
                        "Step failed, retrying in place"
                    );
                    tokio::time::sleep(self.step_retry_delay).await;
                }
                Err(e) => {
                    let attempts = attempt + 1;
                    error!(
                        task_id = %self.task_id,
                        step = %name,
                        attempts,
                        error = %e,
                        "Step failed"
                    );
                    self.tracker
                        .update_error(&e.to_string())
                        .await
                        .map_err(|re| TaskError::from_record(&self.task_id, re))?;
                    return Err(TaskError::StepFailed {
                        step: name,
                        attempts,
                        transient: e.is_transient(),
                        source: e,
                    });
                }
            }
        }
    }

    /// Re-registers the outputs of a skipped step whose context entries
    /// were lost but whose files survive on disk.
    async fn load_existing_outputs(&mut self, index: usize) -> Result<(), TaskError> {
        let outputs: Vec<String> = self.steps[index].outputs().to_vec();
        for key in outputs {
            if !self.context.has_non_empty(&key) && self.task_dir.join(&key).is_file() {
                self.context.set(key.clone(), json!(key)).await?;
            }
        }
        Ok(())
    }

    async fn mark_processing(&mut self) -> Result<(), TaskError> {
        let mut record = self
            .store
            .get(&self.task_id)
            .await
            .map_err(|e| TaskError::from_record(&self.task_id, e))?;
        record.status = TaskStatus::Processing;
        record.progress = TaskProgress::Processing;
        record.total_steps = self.steps.len() as u32;
        record.progress_message = "Task execution started".to_string();
        record.error = None;
        record.touch();
        self.store
            .commit(&mut record)
            .await
            .map_err(|e| TaskError::from_record(&self.task_id, e))
    }

    async fn complete(&mut self) -> Result<(), TaskError> {
        let mut record = self
            .store
            .get(&self.task_id)
            .await
            .map_err(|e| TaskError::from_record(&self.task_id, e))?;
        record.status = TaskStatus::Completed;
        record.progress = TaskProgress::Completed;
        record.step_progress = 100;
        record.progress_message = "Task completed".to_string();
        record.error = None;
        record.touch();
        self.store
            .commit(&mut record)
            .await
            .map_err(|e| TaskError::from_record(&self.task_id, e))?;

        info!(task_id = %self.task_id, "Pipeline completed");
        Ok(())
    }

    async fn handle_failure(&self, error: &TaskError) {
        match error {
            TaskError::RecordGone(task_id) => {
                // The task was deleted out from under us; nothing to report on
                warn!(task_id = %task_id, "Task deleted during processing, exiting quietly");
            }
            TaskError::StepFailed { .. } => {
                // Already recorded by the step failure path
            }
            other => {
                if let Err(e) = self.tracker.update_error(&other.to_string()).await {
                    warn!(task_id = %self.task_id, error = %e, "Failed to record task failure");
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retryable_classification() {
        let transient = TaskError::StepFailed {
            step: "fetch_content".to_string(),
            attempts: 2,
            transient: true,
            source: StepError::Fetch(crate::error::FetchError::EmptyContent("u".to_string())),
        };
        assert!(transient.is_retryable());

        let contract = TaskError::StepFailed {
            step: "fetch_content".to_string(),
            attempts: 1,
            transient: false,
            source: StepError::MissingInputs {
                step: "fetch_content".to_string(),
                keys: vec!["url".to_string()],
            },
        };
        assert!(!contract.is_retryable());

        assert!(!TaskError::RecordGone("t".to_string()).is_retryable());
        assert!(!TaskError::DeadlineExceeded {
            budget: Duration::from_secs(1)
        }
        .is_retryable());
    }

    #[test]
    fn test_from_record_maps_gone() {
        let gone = TaskError::from_record("t-1", RecordError::Gone("t-1".to_string()));
        assert!(matches!(gone, TaskError::RecordGone(_)));

        let conflict = TaskError::from_record("t-1", RecordError::Conflict("t-1".to_string()));
        assert!(matches!(conflict, TaskError::RecordGone(_)));

        let other = TaskError::from_record("t-1", RecordError::Storage("disk".to_string()));
        assert!(matches!(other, TaskError::Record(_)));
    }
}
