//! The step abstraction.
//!
//! A step is one named unit of pipeline work with declared input and output
//! context keys. [`Step::execute`] wraps the step body with contract
//! checks: missing inputs fail before any work happens, and a body that
//! returns an output map missing a declared key fails before the bad result
//! can propagate, catching silent implementation bugs at the boundary.

use async_trait::async_trait;
use thiserror::Error;

use crate::error::{AudioError, FetchError, GenerationError, SynthesisError};
use crate::storage::{Lang, Level, RecordError};

use super::context::{StepOutput, TaskContext};
use super::progress::ProgressTracker;

/// Errors raised by step execution.
#[derive(Debug, Error)]
pub enum StepError {
    /// Required context keys are absent; the step body never ran.
    #[error("Step '{step}' is missing required inputs: {}", .keys.join(", "))]
    MissingInputs { step: String, keys: Vec<String> },

    /// The step body ran but its output map lacks declared keys.
    #[error("Step '{step}' produced incomplete output, missing: {}", .keys.join(", "))]
    IncompleteOutput { step: String, keys: Vec<String> },

    /// Article fetching failed.
    #[error(transparent)]
    Fetch(#[from] FetchError),

    /// LLM generation failed.
    #[error(transparent)]
    Generation(#[from] GenerationError),

    /// Speech synthesis failed.
    #[error(transparent)]
    Synthesis(#[from] SynthesisError),

    /// Audio probing or concatenation failed.
    #[error(transparent)]
    Audio(#[from] AudioError),

    /// A progress or record update failed mid-step.
    #[error(transparent)]
    Record(#[from] RecordError),

    /// Reading or writing working files failed.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// An intermediate artifact was malformed or empty.
    #[error("Invalid step data: {0}")]
    Invalid(String),
}

impl StepError {
    /// True for failures of external collaborators that may succeed on a
    /// retry. Contract violations and malformed artifacts are not retried:
    /// they indicate a bug, not a flaky dependency.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            StepError::Fetch(_)
                | StepError::Generation(_)
                | StepError::Synthesis(_)
                | StepError::Audio(_)
        )
    }

    /// True when the task record disappeared underneath the step.
    pub fn is_record_gone(&self) -> bool {
        matches!(self, StepError::Record(e) if e.is_gone())
    }
}

/// One named, input/output-declared unit of pipeline work.
#[async_trait]
pub trait Step: Send + Sync {
    /// Stable step name; also the resumption key stored on the task record.
    fn name(&self) -> &str;

    /// Difficulty level this step is scoped to, if any.
    fn level(&self) -> Option<Level> {
        None
    }

    /// Language this step is scoped to, if any.
    fn lang(&self) -> Option<Lang> {
        None
    }

    /// Context keys that must exist before the body runs.
    fn inputs(&self) -> &[String];

    /// Context keys the body must produce.
    fn outputs(&self) -> &[String];

    /// The step body. Implementations perform the actual work and return
    /// the output map; they never validate their own contract.
    async fn run(
        &self,
        ctx: &mut TaskContext,
        tracker: &ProgressTracker,
    ) -> Result<StepOutput, StepError>;

    /// Validates inputs, runs the body, validates outputs.
    async fn execute(
        &self,
        ctx: &mut TaskContext,
        tracker: &ProgressTracker,
    ) -> Result<StepOutput, StepError> {
        let missing = ctx.validate_keys(self.inputs());
        if !missing.is_empty() {
            return Err(StepError::MissingInputs {
                step: self.name().to_string(),
                keys: missing,
            });
        }

        let output = self.run(ctx, tracker).await?;

        let missing: Vec<String> = self
            .outputs()
            .iter()
            .filter(|k| !output.contains_key(k.as_str()))
            .cloned()
            .collect();
        if !missing.is_empty() {
            return Err(StepError::IncompleteOutput {
                step: self.name().to_string(),
                keys: missing,
            });
        }

        Ok(output)
    }
}

/// Context key names shared between steps and the processor.
pub mod keys {
    use crate::storage::{Lang, Level};

    /// Task identifier, seeded at construction.
    pub const TASK_ID: &str = "task_id";
    /// Source URL, seeded at construction.
    pub const URL: &str = "url";
    /// Absolute task working directory, seeded at construction.
    pub const TASK_DIR: &str = "task_dir";
    /// Index of the step currently executing.
    pub const CURRENT_STEP_INDEX: &str = "current_step_index";
    /// Optional style parameters forwarded into prompts.
    pub const STYLE_PARAMS: &str = "style_params";

    /// Raw article text file produced by the fetch step.
    pub const RAW_CONTENT_FILE: &str = "raw_content.txt";
    /// Raw article text value produced by the fetch step.
    pub const RAW_CONTENT: &str = "raw_content";
    /// Candidate title from the fetched page (may be empty).
    pub const RAW_TITLE: &str = "raw_title";
    /// Resolved episode title.
    pub const TITLE: &str = "title";

    /// Level-adapted article text file.
    pub fn content(level: Level) -> String {
        format!("{}/content.txt", level.as_str())
    }

    /// Dialogue file for a level and language.
    pub fn dialogue(level: Level, lang: Lang) -> String {
        format!("{}/dialogue_{}.json", level.as_str(), lang.as_str())
    }

    /// Per-turn audio file list for a level and language.
    pub fn audio_files(level: Level, lang: Lang) -> String {
        format!("{}/audio_files_{}.json", level.as_str(), lang.as_str())
    }

    /// Subtitle artifact for a level and language.
    pub fn subtitle(level: Level, lang: Lang) -> String {
        format!("{}/subtitle_{}.srt", level.as_str(), lang.as_str())
    }

    /// Merged audio artifact for a level and language.
    pub fn merged_audio(level: Level, lang: Lang) -> String {
        format!("{}/merged_audio_{}.mp3", level.as_str(), lang.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::{InMemoryTaskStore, TaskRecord, TaskStore};
    use serde_json::json;
    use std::sync::Arc;

    struct EchoStep {
        inputs: Vec<String>,
        outputs: Vec<String>,
        produce: Vec<String>,
    }

    #[async_trait]
    impl Step for EchoStep {
        fn name(&self) -> &str {
            "echo"
        }

        fn inputs(&self) -> &[String] {
            &self.inputs
        }

        fn outputs(&self) -> &[String] {
            &self.outputs
        }

        async fn run(
            &self,
            _ctx: &mut TaskContext,
            _tracker: &ProgressTracker,
        ) -> Result<StepOutput, StepError> {
            let mut out = StepOutput::new();
            for key in &self.produce {
                out.insert(key.clone(), json!("value"));
            }
            Ok(out)
        }
    }

    async fn fixture() -> (tempfile::TempDir, TaskContext, ProgressTracker) {
        let dir = tempfile::tempdir().expect("tempdir");
        let ctx = TaskContext::load_or_init(dir.path()).await.expect("ctx");
        let store = Arc::new(InMemoryTaskStore::new());
        let record = TaskRecord::new("https://example.com");
        store.insert(&record).await.expect("insert");
        let tracker = ProgressTracker::new(store, record.task_id.clone(), 1);
        (dir, ctx, tracker)
    }

    #[tokio::test]
    async fn test_execute_rejects_missing_inputs() {
        let (_guard, mut ctx, tracker) = fixture().await;
        let step = EchoStep {
            inputs: vec!["needed_a".to_string(), "needed_b".to_string()],
            outputs: vec![],
            produce: vec![],
        };

        let err = step.execute(&mut ctx, &tracker).await.expect_err("missing inputs");
        match err {
            StepError::MissingInputs { step, keys } => {
                assert_eq!(step, "echo");
                assert_eq!(keys, vec!["needed_a", "needed_b"]);
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_execute_rejects_incomplete_output() {
        let (_guard, mut ctx, tracker) = fixture().await;
        let step = EchoStep {
            inputs: vec![],
            outputs: vec!["present".to_string(), "forgotten".to_string()],
            produce: vec!["present".to_string()],
        };

        let err = step
            .execute(&mut ctx, &tracker)
            .await
            .expect_err("incomplete output");
        match err {
            StepError::IncompleteOutput { step, keys } => {
                assert_eq!(step, "echo");
                assert_eq!(keys, vec!["forgotten"]);
            }
            other => panic!("unexpected error: {other:?}"),
        }

        // The rejected output never reaches the context
        assert!(!ctx.has("present"));
    }

    #[tokio::test]
    async fn test_execute_passes_through_complete_output() {
        let (_guard, mut ctx, tracker) = fixture().await;
        let step = EchoStep {
            inputs: vec![],
            outputs: vec!["result".to_string()],
            produce: vec!["result".to_string(), "extra".to_string()],
        };

        let output = step.execute(&mut ctx, &tracker).await.expect("execute");
        assert!(output.contains_key("result"));
        assert!(output.contains_key("extra"));
    }

    #[test]
    fn test_transient_classification() {
        let transient = StepError::Fetch(FetchError::EmptyContent("u".to_string()));
        assert!(transient.is_transient());

        let contract = StepError::MissingInputs {
            step: "s".to_string(),
            keys: vec![],
        };
        assert!(!contract.is_transient());

        let invalid = StepError::Invalid("bad file".to_string());
        assert!(!invalid.is_transient());
    }

    #[test]
    fn test_key_builders() {
        use crate::storage::{Lang, Level};
        assert_eq!(keys::content(Level::Elementary), "elementary/content.txt");
        assert_eq!(
            keys::dialogue(Level::Advanced, Lang::En),
            "advanced/dialogue_en.json"
        );
        assert_eq!(
            keys::audio_files(Level::Intermediate, Lang::Cn),
            "intermediate/audio_files_cn.json"
        );
        assert_eq!(
            keys::merged_audio(Level::Elementary, Lang::En),
            "elementary/merged_audio_en.mp3"
        );
    }
}
