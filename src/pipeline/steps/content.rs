//! Per-level content adaptation.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::json;
use tracing::info;

use crate::pipeline::context::{StepOutput, TaskContext};
use crate::pipeline::progress::ProgressTracker;
use crate::pipeline::step::{keys, Step, StepError};
use crate::services::{generator, StepServices};
use crate::storage::Level;

use super::task_dir;

/// Rewrites the raw article for one target difficulty level.
pub struct ContentAdaptStep {
    name: String,
    level: Level,
    services: Arc<StepServices>,
    inputs: Vec<String>,
    outputs: Vec<String>,
}

impl ContentAdaptStep {
    pub fn new(level: Level, services: Arc<StepServices>) -> Self {
        Self {
            name: format!("content:{}", level),
            level,
            services,
            inputs: vec![keys::RAW_CONTENT.to_string(), keys::TITLE.to_string()],
            outputs: vec![keys::content(level)],
        }
    }
}

#[async_trait]
impl Step for ContentAdaptStep {
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
        let raw_content = ctx
            .get_str(keys::RAW_CONTENT)
            .ok_or_else(|| StepError::Invalid("raw content is empty".to_string()))?
            .to_string();
        let style_params = ctx.get(keys::STYLE_PARAMS).cloned();

        let adapted = generator::adapt_content(
            self.services.generator.as_ref(),
            self.level,
            &raw_content,
            style_params.as_ref(),
        )
        .await?;

        let relative = keys::content(self.level);
        let dir = task_dir(ctx)?;
        let path = dir.join(&relative);
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::write(path, &adapted).await?;
        info!(level = %self.level, chars = adapted.len(), "Adapted content");

        let mut output = StepOutput::new();
        output.insert(relative.clone(), json!(relative));
        Ok(output)
    }
}
