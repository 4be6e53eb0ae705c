//! Per-turn speech synthesis.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::{info, warn};

use crate::error::SynthesisError;
use crate::pipeline::context::{StepOutput, TaskContext};
use crate::pipeline::progress::ProgressTracker;
use crate::pipeline::step::{keys, Step, StepError};
use crate::services::{DialogueTurn, StepServices};
use crate::storage::{Lang, Level, Role};

use super::{current_step_index, read_dialogue, task_dir, write_json_file};

/// One synthesized dialogue turn in the per-level audio file list.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AudioFileEntry {
    /// Turn index within the dialogue.
    pub index: usize,
    /// Speaker of the turn.
    pub role: Role,
    /// Task-relative path of the synthesized file.
    pub filename: String,
}

/// Synthesizes every dialogue turn for one level and language.
///
/// Each turn gets up to `synthesis_retries` attempts with linear backoff;
/// a produced file must be non-empty and decodable before it counts.
pub struct AudioStep {
    name: String,
    level: Level,
    lang: Lang,
    services: Arc<StepServices>,
    inputs: Vec<String>,
    outputs: Vec<String>,
}

impl AudioStep {
    pub fn new(level: Level, lang: Lang, services: Arc<StepServices>) -> Self {
        Self {
            name: format!("audio:{}:{}", level, lang),
            level,
            lang,
            services,
            inputs: vec![keys::dialogue(level, lang)],
            outputs: vec![keys::audio_files(level, lang)],
        }
    }

    async fn synthesize_turn(
        &self,
        index: usize,
        turn: &DialogueTurn,
        path: &Path,
    ) -> Result<(), StepError> {
        let voice = self.services.voices.voice_for(turn.role, self.lang);
        let attempts = self.services.config.synthesis_retries;

        for attempt in 0..attempts {
            let result = self
                .services
                .synthesizer
                .synthesize(&turn.content, voice)
                .await;

            match result {
                Ok(audio) => {
                    tokio::fs::write(path, &audio).await?;
                    if self.services.audio.is_valid(path).await {
                        return Ok(());
                    }
                    warn!(
                        turn = index,
                        attempt = attempt + 1,
                        "Synthesized audio failed validation"
                    );
                    let _ = tokio::fs::remove_file(path).await;
                }
                Err(e) => {
                    warn!(
                        turn = index,
                        attempt = attempt + 1,
                        error = %e,
                        "Speech synthesis failed"
                    );
                }
            }

            if attempt + 1 < attempts {
                // Linear backoff: 1s, 2s, 3s, ...
                tokio::time::sleep(Duration::from_secs(u64::from(attempt) + 1)).await;
            }
        }

        Err(StepError::Synthesis(SynthesisError::Exhausted {
            turn: index,
            attempts,
        }))
    }
}

#[async_trait]
impl Step for AudioStep {
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
        let turns = read_dialogue(ctx, &keys::dialogue(self.level, self.lang)).await?;
        let dir = task_dir(ctx)?;
        let step_index = current_step_index(ctx);
        let total = turns.len();

        let mut entries = Vec::with_capacity(total);
        for (i, turn) in turns.iter().enumerate() {
            let progress = ((i as f64 / total as f64) * 100.0) as u8;
            tracker
                .update_progress(
                    step_index,
                    &self.name,
                    progress,
                    &format!("Synthesizing turn {}/{}", i + 1, total),
                )
                .await?;

            let filename = format!(
                "{}/{:04}_{}_{}.mp3",
                self.level.as_str(),
                i,
                self.lang.as_str(),
                turn.role.as_str()
            );
            self.synthesize_turn(i, turn, &dir.join(&filename)).await?;

            entries.push(AudioFileEntry {
                index: i,
                role: turn.role,
                filename,
            });
        }

        let relative = keys::audio_files(self.level, self.lang);
        write_json_file(ctx, &relative, &entries).await?;
        info!(
            level = %self.level,
            lang = %self.lang,
            turns = entries.len(),
            "Synthesized dialogue audio"
        );

        let mut output = StepOutput::new();
        output.insert(relative.clone(), json!(relative));
        Ok(output)
    }
}
