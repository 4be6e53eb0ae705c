//! Command-line interface.
//!
//! Wires configuration, storage, services and the task runner together and
//! dispatches the subcommands:
//!
//! - `process <url>` - create a task and run its pipeline to completion
//! - `retry <task-id>` - re-run a failed task, resuming at the failed step
//! - `feeds` - poll the configured RSS feeds once
//! - `reconcile` - fail tasks left unfinished by a previous process
//! - `purge <task-id>` - delete a task record and its working directory

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context as _;
use clap::{Parser, Subcommand};
use tracing::info;

use crate::config::Config;
use crate::rss::FeedManager;
use crate::scheduler::TaskRunner;
use crate::services::StepServices;
use crate::storage::{SqliteTaskStore, TaskRecord, TaskStore};

/// Article-to-podcast pipeline.
#[derive(Debug, Parser)]
#[command(name = "podforge", version, about)]
pub struct Cli {
    /// Path to a YAML configuration file.
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// Log level filter (overridden by RUST_LOG).
    #[arg(long, default_value = "info", global = true)]
    pub log_level: String,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Create a task for a source URL and run it to completion.
    Process {
        /// Source article URL.
        url: String,
    },
    /// Retry a failed task, resuming at the step that failed.
    Retry {
        /// Task identifier.
        task_id: String,
    },
    /// Poll the configured RSS feeds once.
    Feeds,
    /// Mark tasks left unfinished by a previous process as failed.
    Reconcile,
    /// Delete a task record and its working directory.
    Purge {
        /// Task identifier.
        task_id: String,
    },
}

/// Parses command-line arguments.
pub fn parse_cli() -> Cli {
    Cli::parse()
}

/// Runs a parsed CLI invocation.
pub async fn run_with_cli(cli: Cli) -> anyhow::Result<()> {
    let config = match &cli.config {
        Some(path) => Config::from_yaml_file(path)
            .with_context(|| format!("loading config from {}", path.display()))?,
        None => Config::default(),
    }
    .overlay_env()?;
    config.validate()?;
    let config = Arc::new(config);

    let store: Arc<dyn TaskStore> = Arc::new(
        SqliteTaskStore::connect(&config.database_url)
            .await
            .with_context(|| format!("connecting to {}", config.database_url))?,
    );
    let services = StepServices::from_config(config.clone())?;
    let runner = Arc::new(TaskRunner::new(store.clone(), services.clone(), config.clone()));

    match cli.command {
        Command::Process { url } => {
            let record = TaskRecord::new(&url);
            store.insert(&record).await?;
            info!(task_id = %record.task_id, url = %url, "Created task");

            runner.submit(&record.task_id).await?;
            report_outcome(&store, &record.task_id).await?;
        }
        Command::Retry { task_id } => {
            let record = store.get(&task_id).await?;
            anyhow::ensure!(
                record.is_startable(),
                "task {} is {}, only pending or failed tasks can be retried",
                task_id,
                record.status
            );

            runner.retry_task(&task_id).await?;
            report_outcome(&store, &task_id).await?;
        }
        Command::Feeds => {
            let manager = FeedManager::new(store, runner.clone(), config);
            let submitted = manager.poll_all().await;
            println!("Submitted {} new task(s)", submitted);
        }
        Command::Reconcile => {
            let count = runner.check_incomplete_tasks().await?;
            println!("Reconciled {} interrupted task(s)", count);
        }
        Command::Purge { task_id } => {
            store.delete(&task_id).await?;
            services.blob.purge_task(&task_id).await?;
            println!("Purged task {}", task_id);
        }
    }

    Ok(())
}

async fn report_outcome(store: &Arc<dyn TaskStore>, task_id: &str) -> anyhow::Result<()> {
    let record = store.get(task_id).await?;
    match record.error {
        Some(error) => anyhow::bail!("task {} failed: {}", task_id, error),
        None => {
            println!("Task {} {}", task_id, record.status);
            Ok(())
        }
    }
}
