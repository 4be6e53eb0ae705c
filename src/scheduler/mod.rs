//! Task scheduling: the bounded worker pool and task-level retry.
//!
//! One component lives here: [`runner::TaskRunner`], which accepts task
//! submissions, bounds concurrency with a fixed-size pool, supervises
//! whole-task retries after a step-escalated failure, and reconciles
//! orphaned in-progress records after a process restart.

pub mod runner;

pub use runner::{RunnerStats, TaskRunner};
