//! Step implementations for the podcast pipeline.
//!
//! Steps come in three shapes, each built uniformly by [`build_steps`]:
//!
//! - generic: [`fetch::FetchContentStep`], [`title::GenerateTitleStep`]
//! - per difficulty level: [`content::ContentAdaptStep`],
//!   [`dialogue::DialogueStep`], [`translation::TranslationStep`]
//! - per level × language: [`audio::AudioStep`],
//!   [`subtitle::SubtitleStep`], [`merge::AudioMergeStep`]

pub mod audio;
pub mod content;
pub mod dialogue;
pub mod fetch;
pub mod merge;
pub mod subtitle;
pub mod title;
pub mod translation;

use std::path::PathBuf;
use std::sync::Arc;

use crate::services::{DialogueTurn, StepServices};
use crate::storage::{Lang, Level};

use super::context::TaskContext;
use super::step::{keys, Step, StepError};

pub use audio::{AudioFileEntry, AudioStep};
pub use content::ContentAdaptStep;
pub use dialogue::DialogueStep;
pub use fetch::FetchContentStep;
pub use merge::AudioMergeStep;
pub use subtitle::SubtitleStep;
pub use title::GenerateTitleStep;
pub use translation::TranslationStep;

/// Builds the full canonical step list:
/// 2 generic + 3 levels × {content, dialogue, translate}
/// + 3 levels × 2 langs × {audio, subtitle, merge} = 29 steps.
pub fn build_steps(services: &Arc<StepServices>) -> Vec<Box<dyn Step>> {
    let mut steps: Vec<Box<dyn Step>> = vec![
        Box::new(FetchContentStep::new(services.clone())),
        Box::new(GenerateTitleStep::new(services.clone())),
    ];

    for level in Level::ALL {
        steps.push(Box::new(ContentAdaptStep::new(level, services.clone())));
        steps.push(Box::new(DialogueStep::new(level, services.clone())));
        steps.push(Box::new(TranslationStep::new(level, services.clone())));
    }

    for level in Level::ALL {
        for lang in Lang::ALL {
            steps.push(Box::new(AudioStep::new(level, lang, services.clone())));
            steps.push(Box::new(SubtitleStep::new(level, lang, services.clone())));
            steps.push(Box::new(AudioMergeStep::new(level, lang, services.clone())));
        }
    }

    steps
}

/// Absolute task working directory from the context.
pub(crate) fn task_dir(ctx: &TaskContext) -> Result<PathBuf, StepError> {
    ctx.get_str(keys::TASK_DIR)
        .map(PathBuf::from)
        .ok_or_else(|| StepError::Invalid("context is missing task_dir".to_string()))
}

/// Task identifier from the context.
pub(crate) fn task_id(ctx: &TaskContext) -> Result<String, StepError> {
    ctx.get_str(keys::TASK_ID)
        .map(str::to_string)
        .ok_or_else(|| StepError::Invalid("context is missing task_id".to_string()))
}

/// Index of the currently executing step, for mid-step progress reports.
pub(crate) fn current_step_index(ctx: &TaskContext) -> u32 {
    ctx.get(keys::CURRENT_STEP_INDEX)
        .and_then(serde_json::Value::as_u64)
        .unwrap_or(0) as u32
}

/// Reads and parses the dialogue file referenced by a context key.
pub(crate) async fn read_dialogue(
    ctx: &TaskContext,
    key: &str,
) -> Result<Vec<DialogueTurn>, StepError> {
    let dir = task_dir(ctx)?;
    let filename = ctx
        .get_str(key)
        .ok_or_else(|| StepError::Invalid(format!("context value for '{}' is not a path", key)))?;
    let bytes = tokio::fs::read(dir.join(filename)).await?;
    let turns: Vec<DialogueTurn> = serde_json::from_slice(&bytes)
        .map_err(|e| StepError::Invalid(format!("unreadable dialogue file '{}': {}", filename, e)))?;
    if turns.is_empty() {
        return Err(StepError::Invalid(format!(
            "dialogue file '{}' is empty",
            filename
        )));
    }
    Ok(turns)
}

/// Reads and parses the per-turn audio file list referenced by a context
/// key.
pub(crate) async fn read_audio_list(
    ctx: &TaskContext,
    key: &str,
) -> Result<Vec<AudioFileEntry>, StepError> {
    let dir = task_dir(ctx)?;
    let filename = ctx
        .get_str(key)
        .ok_or_else(|| StepError::Invalid(format!("context value for '{}' is not a path", key)))?;
    let bytes = tokio::fs::read(dir.join(filename)).await?;
    let entries: Vec<AudioFileEntry> = serde_json::from_slice(&bytes)
        .map_err(|e| StepError::Invalid(format!("unreadable audio list '{}': {}", filename, e)))?;
    if entries.is_empty() {
        return Err(StepError::Invalid(format!(
            "audio file list '{}' is empty",
            filename
        )));
    }
    Ok(entries)
}

/// Writes a JSON working file at a task-relative path, creating parent
/// directories as needed.
pub(crate) async fn write_json_file<T: serde::Serialize>(
    ctx: &TaskContext,
    relative: &str,
    value: &T,
) -> Result<(), StepError> {
    let dir = task_dir(ctx)?;
    let path = dir.join(relative);
    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }
    let bytes = serde_json::to_vec_pretty(value)
        .map_err(|e| StepError::Invalid(format!("serializing '{}': {}", relative, e)))?;
    tokio::fs::write(path, bytes).await?;
    Ok(())
}
