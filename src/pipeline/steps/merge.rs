//! Audio track assembly.

use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::json;
use tracing::{info, warn};

use crate::pipeline::context::{StepOutput, TaskContext};
use crate::pipeline::progress::ProgressTracker;
use crate::pipeline::step::{keys, Step, StepError};
use crate::services::StepServices;
use crate::storage::{ArtifactKind, BlobStore, Lang, Level};

use super::{read_audio_list, task_dir, task_id};

/// Concatenates the per-turn audio into the published track, registers it
/// on the task record and deletes the per-turn files afterwards.
pub struct AudioMergeStep {
    name: String,
    level: Level,
    lang: Lang,
    services: Arc<StepServices>,
    inputs: Vec<String>,
    outputs: Vec<String>,
}

impl AudioMergeStep {
    pub fn new(level: Level, lang: Lang, services: Arc<StepServices>) -> Self {
        Self {
            name: format!("merge_audio:{}:{}", level, lang),
            level,
            lang,
            services,
            inputs: vec![keys::audio_files(level, lang)],
            outputs: vec![keys::merged_audio(level, lang)],
        }
    }
}

#[async_trait]
impl Step for AudioMergeStep {
    fn name(&self) -> &str {
        &self.name
    }

    fn level(&self) -> Option<Level> {
        Some(self.level)
    }

    fn lang(&self) -> Option<Lang> {
        Some(self.lang)
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
        let audio_key = keys::audio_files(self.level, self.lang);
        let entries = read_audio_list(ctx, &audio_key).await?;
        let dir = task_dir(ctx)?;
        let id = task_id(ctx)?;

        let inputs: Vec<PathBuf> = entries.iter().map(|e| dir.join(&e.filename)).collect();
        let filename = BlobStore::artifact_name(self.level, self.lang, ArtifactKind::Audio, &id);
        let output_path = dir.join(&filename);

        self.services
            .audio
            .concat_with_gap(
                &inputs,
                self.services.config.turn_gap.as_secs_f64(),
                &output_path,
            )
            .await?;

        tracker
            .update_files(self.level, self.lang, ArtifactKind::Audio, filename.clone())
            .await?;
        info!(
            level = %self.level,
            lang = %self.lang,
            turns = entries.len(),
            file = %filename,
            "Merged audio track"
        );

        // The per-turn files and the list are dead weight once merged
        for input in &inputs {
            if let Err(e) = tokio::fs::remove_file(input).await {
                warn!(path = %input.display(), error = %e, "Failed to remove turn audio");
            }
        }
        let list_file = ctx.get_str(&audio_key).map(|f| dir.join(f));
        if let Some(path) = list_file {
            if let Err(e) = tokio::fs::remove_file(&path).await {
                warn!(path = %path.display(), error = %e, "Failed to remove audio list");
            }
        }
        ctx.delete(&audio_key).await?;

        let mut output = StepOutput::new();
        output.insert(keys::merged_audio(self.level, self.lang), json!(filename));
        Ok(output)
    }
}
