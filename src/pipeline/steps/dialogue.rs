//! Per-level dialogue generation.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::json;
use tracing::info;

use crate::pipeline::context::{StepOutput, TaskContext};
use crate::pipeline::progress::ProgressTracker;
use crate::pipeline::step::{keys, Step, StepError};
use crate::services::{generator, StepServices};
use crate::storage::{Lang, Level};

use super::{task_dir, write_json_file};

/// Generates the primary-language dialogue from level-adapted content.
pub struct DialogueStep {
    name: String,
    level: Level,
    services: Arc<StepServices>,
    inputs: Vec<String>,
    outputs: Vec<String>,
}

impl DialogueStep {
    pub fn new(level: Level, services: Arc<StepServices>) -> Self {
        Self {
            name: format!("dialogue:{}", level),
            level,
            services,
            inputs: vec![keys::content(level)],
            outputs: vec![keys::dialogue(level, Lang::Cn)],
        }
    }
}

#[async_trait]
impl Step for DialogueStep {
    fn name(&self) -> &str {
        &self.name
    }

    fn level(&self) -> Option<Level> {
        Some(self.level)
    }

    fn inputs(&self) -> &[String] {
        &self.inputs
    }

    fn outputs(&self) -> &[String] {
        &self.outputs
    }

    async fn run(
        &self,
        ctx: &mut TaskContext,
        _tracker: &ProgressTracker,
    ) -> Result<StepOutput, StepError> {
        let content_key = keys::content(self.level);
        let content_file = ctx.get_str(&content_key).ok_or_else(|| {
            StepError::Invalid(format!("context value for '{}' is not a path", content_key))
        })?;
        let dir = task_dir(ctx)?;
        let content = tokio::fs::read_to_string(dir.join(content_file)).await?;
        if content.trim().is_empty() {
            return Err(StepError::Invalid(format!(
                "adapted content file '{}' is empty",
                content_file
            )));
        }

        let turns = generator::generate_dialogue(
            self.services.generator.as_ref(),
            &content,
            self.services.config.min_dialogue_turns,
        )
        .await?;

        let relative = keys::dialogue(self.level, Lang::Cn);
        write_json_file(ctx, &relative, &turns).await?;
        info!(level = %self.level, turns = turns.len(), "Generated dialogue");

        let mut output = StepOutput::new();
        output.insert(relative.clone(), json!(relative));
        Ok(output)
    }
}
