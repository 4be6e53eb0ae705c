//! Bilingual subtitle generation.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::json;
use tracing::info;

use crate::pipeline::context::{StepOutput, TaskContext};
use crate::pipeline::progress::ProgressTracker;
use crate::pipeline::step::{keys, Step, StepError};
use crate::services::{DialogueTurn, StepServices};
use crate::storage::{ArtifactKind, Lang, Level};

use super::{read_audio_list, read_dialogue, task_dir, task_id, AudioFileEntry};

/// Placeholder when a primary-language turn has no text at an index.
pub const MISSING_PRIMARY: &str = "【缺失中文内容】";
/// Placeholder when a secondary-language turn has no text at an index.
pub const MISSING_SECONDARY: &str = "【Missing English content】";

/// Builds the bilingual SRT track for one level and language.
///
/// Timestamps are derived by walking the per-turn audio durations in
/// order, with the configured silence gap between turns. Dialogue texts are
/// paired by index; a missing side becomes an explicit placeholder rather
/// than a crash.
pub struct SubtitleStep {
    name: String,
    level: Level,
    lang: Lang,
    services: Arc<StepServices>,
    inputs: Vec<String>,
    outputs: Vec<String>,
}

impl SubtitleStep {
    pub fn new(level: Level, lang: Lang, services: Arc<StepServices>) -> Self {
        Self {
            name: format!("subtitle:{}:{}", level, lang),
            level,
            lang,
            services,
            inputs: vec![
                keys::dialogue(level, Lang::Cn),
                keys::dialogue(level, Lang::En),
                keys::audio_files(level, lang),
            ],
            outputs: vec![keys::subtitle(level, lang)],
        }
    }

    async fn build_entries(
        &self,
        ctx: &TaskContext,
        primary: &[DialogueTurn],
        secondary: &[DialogueTurn],
        audio_files: &[AudioFileEntry],
    ) -> Result<Vec<String>, StepError> {
        let dir = task_dir(ctx)?;
        let gap = self.services.config.turn_gap.as_secs_f64();

        let mut blocks = Vec::with_capacity(audio_files.len());
        let mut current_time = 0.0_f64;

        for (i, audio) in audio_files.iter().enumerate() {
            let primary_text = primary
                .get(i)
                .map(|t| t.content.as_str())
                .unwrap_or(MISSING_PRIMARY);
            let secondary_text = secondary
                .get(i)
                .map(|t| t.content.as_str())
                .unwrap_or(MISSING_SECONDARY);

            let duration = self
                .services
                .audio
                .probe_duration(&dir.join(&audio.filename))
                .await?;

            let audio_end = current_time + duration;
            // The subtitle lingers through the silence gap that follows
            let subtitle_end = audio_end + gap;

            blocks.push(format_block(
                i,
                current_time,
                subtitle_end,
                primary_text,
                secondary_text,
            ));

            current_time = audio_end + gap;
        }

        Ok(blocks)
    }
}

#[async_trait]
impl Step for SubtitleStep {
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
        let primary = read_dialogue(ctx, &keys::dialogue(self.level, Lang::Cn)).await?;
        let secondary = read_dialogue(ctx, &keys::dialogue(self.level, Lang::En)).await?;

        let audio_key = keys::audio_files(self.level, self.lang);
        let audio_files = read_audio_list(ctx, &audio_key).await?;

        let blocks = self
            .build_entries(ctx, &primary, &secondary, &audio_files)
            .await?;
        let content = blocks.join("\n");

        let id = task_id(ctx)?;
        let filename = self
            .services
            .blob
            .write(
                &id,
                self.level,
                self.lang,
                ArtifactKind::Subtitle,
                content.as_bytes(),
            )
            .await?;
        tracker
            .update_files(self.level, self.lang, ArtifactKind::Subtitle, filename.clone())
            .await?;
        info!(
            level = %self.level,
            lang = %self.lang,
            entries = blocks.len(),
            file = %filename,
            "Generated subtitles"
        );

        let mut output = StepOutput::new();
        output.insert(keys::subtitle(self.level, self.lang), json!(filename));
        Ok(output)
    }
}

/// Formats one SRT block; blocks are joined with a blank line separator.
fn format_block(index: usize, start: f64, end: f64, primary: &str, secondary: &str) -> String {
    format!(
        "{}\n{} --> {}\n{}\n{}\n",
        index + 1,
        format_timestamp(start),
        format_timestamp(end),
        primary,
        secondary
    )
}

/// Formats seconds as an SRT timestamp `HH:MM:SS,mmm`.
fn format_timestamp(seconds: f64) -> String {
    let total_ms = (seconds * 1000.0).round() as u64;
    let hours = total_ms / 3_600_000;
    let minutes = (total_ms % 3_600_000) / 60_000;
    let secs = (total_ms % 60_000) / 1000;
    let millis = total_ms % 1000;
    format!("{:02}:{:02}:{:02},{:03}", hours, minutes, secs, millis)
}
