//! The resumable step pipeline.
//!
//! This module is the core of podforge: an ordered, resumable sequence of
//! named steps that turns a source article into per-level, per-language
//! podcast artifacts.
//!
//! # Architecture
//!
//! - **Context** ([`context::TaskContext`]): the durable per-task key/value
//!   scratch space, persisted to `context.json` after every mutation
//! - **Step** ([`step::Step`]): one named unit of work with declared input
//!   and output keys, validated around the step body
//! - **Progress** ([`progress::ProgressTracker`]): durable progress, error
//!   and artifact-registration writes onto the task record
//! - **Processor** ([`processor::TaskProcessor`]): the execution state
//!   machine handling skip/execute decisions, bounded in-place step
//!   retries, and escalation to the task-level retry boundary
//!
//! # Pipeline flow
//!
//! 1. Fetch the source article and extract text plus a candidate title
//! 2. Resolve the episode title (LLM fallback when the page has none)
//! 3. Per level: rewrite the article for the target difficulty
//! 4. Per level: generate the primary-language dialogue
//! 5. Per level: translate the dialogue into the secondary language
//! 6. Per level × language: synthesize per-turn audio
//! 7. Per level × language: compute bilingual subtitles from audio timings
//! 8. Per level × language: merge turns into the published track
//!
//! Steps within one task run strictly sequentially; parallelism exists only
//! across tasks, bounded by the scheduler's worker pool.

pub mod context;
pub mod processor;
pub mod progress;
pub mod step;
pub mod steps;

pub use context::{StepOutput, TaskContext};
pub use processor::{TaskError, TaskProcessor};
pub use progress::ProgressTracker;
pub use step::{keys, Step, StepError};
pub use steps::build_steps;
