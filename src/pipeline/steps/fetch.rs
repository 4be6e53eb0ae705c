//! Source content fetching.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::json;

use crate::pipeline::context::{StepOutput, TaskContext};
use crate::pipeline::progress::ProgressTracker;
use crate::pipeline::step::{keys, Step, StepError};
use crate::services::StepServices;

use super::task_dir;

/// Downloads the source URL and extracts its text and candidate title.
pub struct FetchContentStep {
    services: Arc<StepServices>,
    inputs: Vec<String>,
    outputs: Vec<String>,
}

impl FetchContentStep {
    pub fn new(services: Arc<StepServices>) -> Self {
        Self {
            services,
            inputs: vec![keys::URL.to_string()],
            outputs: vec![
                keys::RAW_CONTENT_FILE.to_string(),
                keys::RAW_CONTENT.to_string(),
                keys::RAW_TITLE.to_string(),
            ],
        }
    }
}

#[async_trait]
impl Step for FetchContentStep {
    fn name(&self) -> &str {
        "fetch_content"
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
        let url = ctx
            .get_str(keys::URL)
            .ok_or_else(|| StepError::Invalid("context is missing url".to_string()))?
            .to_string();

        let page = self.services.fetcher.fetch(&url).await?;

        let dir = task_dir(ctx)?;
        tokio::fs::write(dir.join(keys::RAW_CONTENT_FILE), &page.text).await?;

        let mut output = StepOutput::new();
        output.insert(
            keys::RAW_CONTENT_FILE.to_string(),
            json!(keys::RAW_CONTENT_FILE),
        );
        output.insert(keys::RAW_CONTENT.to_string(), json!(page.text));
        output.insert(
            keys::RAW_TITLE.to_string(),
            json!(page.title.unwrap_or_default()),
        );
        Ok(output)
    }
}
