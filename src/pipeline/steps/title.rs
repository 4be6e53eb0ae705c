//! Episode title resolution.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::json;
use tracing::info;

use crate::pipeline::context::{StepOutput, TaskContext};
use crate::pipeline::progress::ProgressTracker;
use crate::pipeline::step::{keys, Step, StepError};
use crate::services::{generator, StepServices};

/// Uses the fetched page title when present, otherwise asks the LLM for
/// one; either way the resolved title is written onto the task record.
pub struct GenerateTitleStep {
    services: Arc<StepServices>,
    inputs: Vec<String>,
    outputs: Vec<String>,
}

impl GenerateTitleStep {
    pub fn new(services: Arc<StepServices>) -> Self {
        Self {
            services,
            inputs: vec![keys::RAW_CONTENT.to_string()],
            outputs: vec![keys::TITLE.to_string()],
        }
    }
}

#[async_trait]
impl Step for GenerateTitleStep {
    fn name(&self) -> &str {
        "generate_title"
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
        tracker: &ProgressTracker,
    ) -> Result<StepOutput, StepError> {
        let raw_title = ctx.get_str(keys::RAW_TITLE).unwrap_or_default();
        let raw_content = ctx
            .get_str(keys::RAW_CONTENT)
            .ok_or_else(|| StepError::Invalid("raw content is empty".to_string()))?;

        let title = if raw_title.trim().is_empty() {
            generator::generate_title(self.services.generator.as_ref(), raw_content).await?
        } else {
            raw_title.trim().to_string()
        };

        tracker.set_title(&title).await?;
        info!(title = %title, "Resolved episode title");

        let mut output = StepOutput::new();
        output.insert(keys::TITLE.to_string(), json!(title));
        Ok(output)
    }
}
