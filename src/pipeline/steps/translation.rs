//! Per-level dialogue translation.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::json;
use tracing::{info, warn};

use crate::pipeline::context::{StepOutput, TaskContext};
use crate::pipeline::progress::ProgressTracker;
use crate::pipeline::step::{keys, Step, StepError};
use crate::services::{generator, DialogueTurn, StepServices, TextGenerator};
use crate::storage::{Lang, Level};

use super::{current_step_index, read_dialogue, write_json_file};

/// Translates the primary-language dialogue into the secondary language.
///
/// Turns are translated in batches; a failing batch falls back to per-item
/// calls, and a failing item becomes an empty-content turn with its
/// original role, so ordering and indices stay aligned for the subtitle
/// step.
pub struct TranslationStep {
    name: String,
    level: Level,
    services: Arc<StepServices>,
    inputs: Vec<String>,
    outputs: Vec<String>,
}

impl TranslationStep {
    pub fn new(level: Level, services: Arc<StepServices>) -> Self {
        Self {
            name: format!("translate:{}", level),
            level,
            services,
            inputs: vec![keys::dialogue(level, Lang::Cn)],
            outputs: vec![keys::dialogue(level, Lang::En)],
        }
    }

    async fn translate_all(
        &self,
        generator: &dyn TextGenerator,
        turns: &[DialogueTurn],
        step_index: u32,
        tracker: &ProgressTracker,
    ) -> Result<Vec<DialogueTurn>, StepError> {
        let batch_size = self.services.config.translation_batch_size;
        let total = turns.len();
        let mut translated = Vec::with_capacity(total);

        for (start, batch) in turns.chunks(batch_size).enumerate().map(|(i, b)| (i * batch_size, b)) {
            let progress = ((start as f64 / total as f64) * 100.0) as u8;
            tracker
                .update_progress(
                    step_index,
                    &self.name,
                    progress,
                    &format!(
                        "Translating turns {}-{} of {}",
                        start + 1,
                        (start + batch.len()).min(total),
                        total
                    ),
                )
                .await?;

            match generator::translate_batch(generator, self.level, batch).await {
                Ok(mut batch_translated) => translated.append(&mut batch_translated),
                Err(e) => {
                    warn!(
                        level = %self.level,
                        error = %e,
                        "Batch translation failed, falling back to per-item calls"
                    );
                    for item in batch {
                        match generator::translate_batch(
                            generator,
                            self.level,
                            std::slice::from_ref(item),
                        )
                        .await
                        {
                            Ok(mut single) => translated.append(&mut single),
                            Err(e) => {
                                warn!(
                                    level = %self.level,
                                    error = %e,
                                    "Single-item translation failed, inserting placeholder"
                                );
                                translated.push(DialogueTurn::new(item.role, ""));
                            }
                        }
                    }
                }
            }
        }

        Ok(translated)
    }
}

#[async_trait]
impl Step for TranslationStep {
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
        tracker: &ProgressTracker,
    ) -> Result<StepOutput, StepError> {
        let turns = read_dialogue(ctx, &keys::dialogue(self.level, Lang::Cn)).await?;
        let step_index = current_step_index(ctx);

        let translated = self
            .translate_all(
                self.services.generator.as_ref(),
                &turns,
                step_index,
                tracker,
            )
            .await?;

        let relative = keys::dialogue(self.level, Lang::En);
        write_json_file(ctx, &relative, &translated).await?;
        info!(level = %self.level, turns = translated.len(), "Translated dialogue");

        let mut output = StepOutput::new();
        output.insert(relative.clone(), json!(relative));
        Ok(output)
    }
}
