//! LLM text generation client and domain helpers.
//!
//! [`TextGenerator`] is the narrow transport interface (one chat completion
//! per call); [`OpenAiGenerator`] implements it against any
//! OpenAI-compatible chat completions endpoint. The domain helpers on top
//! (title synthesis, per-level rewriting, dialogue generation, translation)
//! own prompt construction, response parsing and structural validation, so
//! they behave identically over a mocked transport in tests.

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::time::Duration;
use tracing::info;

use crate::error::GenerationError;
use crate::prompts::{
    build_content_prompt, build_dialogue_prompt, build_title_prompt, build_translation_prompt,
    PromptPair,
};
use crate::storage::{Level, Role};

/// One turn of generated podcast dialogue.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DialogueTurn {
    /// Speaker of this turn.
    pub role: Role,
    /// Spoken text; empty when a per-item translation fallback failed.
    pub content: String,
}

impl DialogueTurn {
    /// Creates a new dialogue turn.
    pub fn new(role: Role, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
        }
    }
}

/// Transport interface for chat completions.
#[async_trait]
pub trait TextGenerator: Send + Sync {
    /// Runs one chat completion and returns the raw assistant text.
    async fn complete(&self, prompt: &PromptPair) -> Result<String, GenerationError>;
}

#[derive(Serialize)]
struct ChatMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage<'a>>,
}

#[derive(Deserialize)]
struct ChatChoiceMessage {
    content: String,
}

#[derive(Deserialize)]
struct ChatChoice {
    message: ChatChoiceMessage,
}

#[derive(Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

/// Client for OpenAI-compatible chat completions APIs.
pub struct OpenAiGenerator {
    api_base: String,
    api_key: String,
    model: String,
    http_client: Client,
}

impl OpenAiGenerator {
    /// Creates a new client.
    ///
    /// # Arguments
    ///
    /// * `api_base` - Base URL of the API (e.g., "https://api.example.com/v1")
    /// * `api_key` - Bearer token for authentication
    /// * `model` - Model identifier sent with every request
    pub fn new(
        api_base: impl Into<String>,
        api_key: impl Into<String>,
        model: impl Into<String>,
    ) -> Self {
        Self {
            api_base: api_base.into(),
            api_key: api_key.into(),
            model: model.into(),
            http_client: Client::builder()
                .timeout(Duration::from_secs(120))
                .build()
                .expect("Failed to build HTTP client"),
        }
    }

    /// Returns the configured model identifier.
    pub fn model(&self) -> &str {
        &self.model
    }
}

#[async_trait]
impl TextGenerator for OpenAiGenerator {
    async fn complete(&self, prompt: &PromptPair) -> Result<String, GenerationError> {
        let request = ChatRequest {
            model: &self.model,
            messages: vec![
                ChatMessage {
                    role: "system",
                    content: &prompt.system,
                },
                ChatMessage {
                    role: "user",
                    content: &prompt.user,
                },
            ],
        };

        let url = format!("{}/chat/completions", self.api_base.trim_end_matches('/'));
        let response = self
            .http_client
            .post(&url)
            .bearer_auth(&self.api_key)
            .json(&request)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let message = response.text().await.unwrap_or_default();
            return Err(GenerationError::Api {
                status: status.as_u16(),
                message,
            });
        }

        let parsed: ChatResponse = response.json().await?;
        let content = parsed
            .choices
            .into_iter()
            .next()
            .map(|c| c.message.content)
            .unwrap_or_default();
        if content.trim().is_empty() {
            return Err(GenerationError::EmptyResponse);
        }
        Ok(content)
    }
}

/// Extracts the JSON payload from an LLM response.
///
/// Models wrap JSON in markdown fences or prose; this slices out the
/// outermost array/object so the caller can parse it directly.
pub fn extract_json(text: &str) -> &str {
    let trimmed = text.trim();
    if trimmed.starts_with('[') || trimmed.starts_with('{') {
        return trimmed;
    }

    let array = trimmed
        .find('[')
        .and_then(|start| trimmed.rfind(']').map(|end| (start, end)));
    let object = trimmed
        .find('{')
        .and_then(|start| trimmed.rfind('}').map(|end| (start, end)));

    // Prefer whichever container opens first
    let span = match (array, object) {
        (Some(a), Some(o)) => Some(if a.0 < o.0 { a } else { o }),
        (Some(a), None) => Some(a),
        (None, Some(o)) => Some(o),
        (None, None) => None,
    };

    match span {
        Some((start, end)) if start < end => &trimmed[start..=end],
        _ => trimmed,
    }
}

fn parse_turns(text: &str) -> Result<Vec<DialogueTurn>, GenerationError> {
    serde_json::from_str(extract_json(text))
        .map_err(|e| GenerationError::InvalidJson(e.to_string()))
}

/// Generates an episode title from article text.
pub async fn generate_title(
    generator: &dyn TextGenerator,
    content: &str,
) -> Result<String, GenerationError> {
    let prompt = build_title_prompt(content)?;
    let title = generator.complete(&prompt).await?;
    let title = title.trim().trim_matches('"').to_string();
    if title.is_empty() {
        return Err(GenerationError::EmptyResponse);
    }
    info!(title = %title, "Generated episode title");
    Ok(title)
}

/// Rewrites article text for a target difficulty level.
pub async fn adapt_content(
    generator: &dyn TextGenerator,
    level: Level,
    content: &str,
    style_params: Option<&Value>,
) -> Result<String, GenerationError> {
    let prompt = build_content_prompt(level, content, style_params)?;
    let adapted = generator.complete(&prompt).await?;
    let adapted = adapted.trim().to_string();
    if adapted.is_empty() {
        return Err(GenerationError::EmptyResponse);
    }
    Ok(adapted)
}

/// Generates a structured dialogue from adapted article text.
///
/// The result is validated: it must be a non-empty array of host/guest
/// turns with at least `min_turns` entries and no blank content.
pub async fn generate_dialogue(
    generator: &dyn TextGenerator,
    content: &str,
    min_turns: usize,
) -> Result<Vec<DialogueTurn>, GenerationError> {
    let prompt = build_dialogue_prompt(content)?;
    let raw = generator.complete(&prompt).await?;
    let turns = parse_turns(&raw)?;
    validate_dialogue(&turns, min_turns)?;
    info!(turns = turns.len(), "Generated dialogue");
    Ok(turns)
}

/// Validates the structure of a generated dialogue.
pub fn validate_dialogue(
    turns: &[DialogueTurn],
    min_turns: usize,
) -> Result<(), GenerationError> {
    if turns.is_empty() {
        return Err(GenerationError::InvalidDialogue(
            "dialogue is empty".to_string(),
        ));
    }
    if turns.len() < min_turns {
        return Err(GenerationError::InvalidDialogue(format!(
            "dialogue has {} turns, need at least {}",
            turns.len(),
            min_turns
        )));
    }
    if let Some(i) = turns.iter().position(|t| t.content.trim().is_empty()) {
        return Err(GenerationError::InvalidDialogue(format!(
            "turn {} has empty content",
            i
        )));
    }
    Ok(())
}

/// Translates a batch of dialogue turns into the secondary language.
///
/// Fails when the model returns a different number of turns than it was
/// given, since downstream subtitle alignment is index-based.
pub async fn translate_batch(
    generator: &dyn TextGenerator,
    level: Level,
    turns: &[DialogueTurn],
) -> Result<Vec<DialogueTurn>, GenerationError> {
    let dialogue_json =
        serde_json::to_string(turns).map_err(|e| GenerationError::InvalidJson(e.to_string()))?;
    let prompt = build_translation_prompt(level, &dialogue_json, turns.len())?;
    let raw = generator.complete(&prompt).await?;
    let translated = parse_turns(&raw)?;
    if translated.len() != turns.len() {
        return Err(GenerationError::InvalidJson(format!(
            "translation returned {} turns for a batch of {}",
            translated.len(),
            turns.len()
        )));
    }
    Ok(translated)
}
