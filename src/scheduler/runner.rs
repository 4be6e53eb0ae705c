//! Bounded task runner.
//!
//! The runner owns a fixed-size worker pool: submissions acquire a
//! semaphore permit before a processor spawns, so excess submissions queue
//! instead of fanning out unbounded. It also supervises the task-level
//! retry: when a pipeline pass aborts with a retryable step failure, the
//! whole pass is re-attempted (resuming at the failed step) up to the
//! configured budget before the task is left failed.
//!
//! On startup, [`TaskRunner::check_incomplete_tasks`] force-fails every
//! record still pending or processing: no in-flight state is trusted across
//! a process restart, and the user must explicitly retry.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use tokio::sync::Semaphore;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

use crate::config::Config;
use crate::pipeline::{TaskError, TaskProcessor};
use crate::services::StepServices;
use crate::storage::{RecordError, TaskProgress, TaskStatus, TaskStore};

/// Progress message written to tasks reconciled after a restart.
const RESTART_MESSAGE: &str = "Task was not completed before application restart";

/// Counters describing a runner's lifetime activity.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RunnerStats {
    /// Tasks that ran to completion.
    pub tasks_completed: u64,
    /// Tasks that failed permanently.
    pub tasks_failed: u64,
    /// Tasks that exited quietly because their record was deleted.
    pub tasks_abandoned: u64,
}

#[derive(Default)]
struct SharedStats {
    completed: AtomicU64,
    failed: AtomicU64,
    abandoned: AtomicU64,
}

impl SharedStats {
    fn snapshot(&self) -> RunnerStats {
        RunnerStats {
            tasks_completed: self.completed.load(Ordering::SeqCst),
            tasks_failed: self.failed.load(Ordering::SeqCst),
            tasks_abandoned: self.abandoned.load(Ordering::SeqCst),
        }
    }
}

/// Accepts task executions and bounds their concurrency.
pub struct TaskRunner {
    store: Arc<dyn TaskStore>,
    services: Arc<StepServices>,
    config: Arc<Config>,
    limiter: Arc<Semaphore>,
    stats: Arc<SharedStats>,
}

impl TaskRunner {
    /// Creates a runner with a pool of `config.max_task_workers` workers.
    pub fn new(
        store: Arc<dyn TaskStore>,
        services: Arc<StepServices>,
        config: Arc<Config>,
    ) -> Self {
        let limiter = Arc::new(Semaphore::new(config.max_task_workers));
        info!(workers = config.max_task_workers, "Task runner ready");
        Self {
            store,
            services,
            config,
            limiter,
            stats: Arc::new(SharedStats::default()),
        }
    }

    /// Submits a task for execution.
    ///
    /// Returns immediately; the execution runs on the pool and the handle
    /// resolves when it finishes.
    pub fn submit(&self, task_id: &str) -> JoinHandle<()> {
        self.spawn(task_id.to_string(), false)
    }

    /// Re-submits a failed task, resuming at the step that failed.
    pub fn retry_task(&self, task_id: &str) -> JoinHandle<()> {
        self.spawn(task_id.to_string(), true)
    }

    fn spawn(&self, task_id: String, resume: bool) -> JoinHandle<()> {
        let store = self.store.clone();
        let services = self.services.clone();
        let config = self.config.clone();
        let limiter = self.limiter.clone();
        let stats = self.stats.clone();

        tokio::spawn(async move {
            let _permit = match limiter.acquire_owned().await {
                Ok(permit) => permit,
                Err(_) => {
                    warn!(task_id = %task_id, "Worker pool closed, dropping submission");
                    return;
                }
            };

            execute_with_retry(task_id, resume, store, services, config, stats).await;
        })
    }

    /// Lifetime counters for this runner.
    pub fn stats(&self) -> RunnerStats {
        self.stats.snapshot()
    }

    /// Number of currently idle workers.
    pub fn available_workers(&self) -> usize {
        self.limiter.available_permits()
    }

    /// Force-fails every record left pending or processing by a previous
    /// process. Returns the number of reconciled tasks.
    pub async fn check_incomplete_tasks(&self) -> Result<usize, RecordError> {
        let incomplete = self.store.list_unfinished().await?;
        let count = incomplete.len();

        for mut record in incomplete {
            record.status = TaskStatus::Failed;
            record.progress = TaskProgress::Failed;
            record.progress_message = RESTART_MESSAGE.to_string();
            record.touch();
            match self.store.commit(&mut record).await {
                Ok(()) => {
                    warn!(task_id = %record.task_id, "Marked interrupted task as failed")
                }
                Err(e) if e.is_gone() => {}
                Err(e) => return Err(e),
            }
        }

        if count > 0 {
            info!(count, "Reconciled interrupted tasks");
        }
        Ok(count)
    }
}

/// Runs a task's pipeline, wrapping it with the task-level retry loop.
///
/// A pass aborted by a retryable step failure is re-attempted after a delay
/// with the resume flag set, so completed steps are skipped and the failed
/// step re-executes. Exhausting the budget leaves the record failed.
async fn execute_with_retry(
    task_id: String,
    resume: bool,
    store: Arc<dyn TaskStore>,
    services: Arc<StepServices>,
    config: Arc<Config>,
    stats: Arc<SharedStats>,
) {
    let mut attempt: u32 = 0;

    loop {
        let is_retry = resume || attempt > 0;
        let result = run_once(&task_id, store.clone(), services.clone(), is_retry).await;

        match result {
            Ok(()) => {
                stats.completed.fetch_add(1, Ordering::SeqCst);
                info!(task_id = %task_id, "Task completed");
                return;
            }
            Err(TaskError::RecordGone(_)) => {
                stats.abandoned.fetch_add(1, Ordering::SeqCst);
                warn!(task_id = %task_id, "Task deleted during processing");
                return;
            }
            Err(e) if e.is_retryable() && attempt < config.max_task_retries => {
                attempt += 1;
                warn!(
                    task_id = %task_id,
                    attempt,
                    max = config.max_task_retries,
                    error = %e,
                    "Task failed, retrying whole pipeline"
                );
                tokio::time::sleep(config.task_retry_delay).await;
            }
            Err(e) => {
                stats.failed.fetch_add(1, Ordering::SeqCst);
                error!(task_id = %task_id, error = %e, "Task failed permanently");
                return;
            }
        }
    }
}

async fn run_once(
    task_id: &str,
    store: Arc<dyn TaskStore>,
    services: Arc<StepServices>,
    is_retry: bool,
) -> Result<(), TaskError> {
    let processor = TaskProcessor::new(task_id, store, services, is_retry).await?;
    processor.run().await
}
