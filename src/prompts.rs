//! LLM prompts for the podcast generation pipeline.
//!
//! Each pipeline stage that calls the LLM gets a builder function returning
//! a [`PromptPair`] (system + user message). User messages are rendered
//! through one-off tera templates so article content and style parameters
//! are interpolated without hand-rolled string splicing.

use serde_json::Value;
use tera::{Context as TeraContext, Tera};

use crate::storage::Level;

/// A system/user prompt pair for one LLM call.
#[derive(Debug, Clone)]
pub struct PromptPair {
    /// System prompt establishing the model's role and output contract.
    pub system: String,
    /// User prompt carrying the actual content for this call.
    pub user: String,
}

impl PromptPair {
    /// Creates a new prompt pair.
    pub fn new(system: impl Into<String>, user: impl Into<String>) -> Self {
        Self {
            system: system.into(),
            user: user.into(),
        }
    }
}

const TITLE_SYSTEM: &str = "You are an editor naming podcast episodes. Given an article, reply \
with a single concise episode title in the article's language. Reply with the title only, no \
quotes, no explanations.";

const TITLE_USER: &str = "Write a title for a podcast episode based on this article:\n\n\
{{ content }}";

const CONTENT_SYSTEM: &str = "You are a language-learning content editor. Rewrite articles for \
listeners at a given proficiency level while keeping every fact intact. Reply with the rewritten \
article only.";

const CONTENT_USER: &str = "Rewrite the following article for {{ level }}-level listeners.\n\
{% if guidance %}Level guidance: {{ guidance }}\n{% endif %}\
{% if style_params %}Style parameters: {{ style_params }}\n{% endif %}\
\nArticle:\n{{ content }}";

const DIALOGUE_SYSTEM: &str = r#"You are a podcast script writer. Turn an article into a natural
two-person conversation between a host and a guest.

Output a JSON array only, no surrounding text. Each element must be an object:
  {"role": "host" | "guest", "content": "what the speaker says"}

The host opens and closes the conversation. Alternate speakers, keep each
turn short enough to speak in one breath, and cover the whole article."#;

const DIALOGUE_USER: &str = "Write the dialogue for this article:\n\n{{ content }}";

const TRANSLATION_SYSTEM: &str = r#"You are a translator for bilingual podcast subtitles.
Translate each dialogue turn into English, preserving order, speaker roles and the number of
items.

Output a JSON array only, no surrounding text. Each element must be an object:
  {"role": "host" | "guest", "content": "translated text"}"#;

const TRANSLATION_USER: &str = "Translate these {{ count }} dialogue turns \
({{ level }} difficulty):\n\n{{ dialogue }}";

/// Per-level tone guidance injected into the content rewriting prompt.
fn level_guidance(level: Level) -> &'static str {
    match level {
        Level::Elementary => {
            "short sentences, common everyday vocabulary, explain every technical term"
        }
        Level::Intermediate => {
            "moderate sentence length, some domain vocabulary with brief explanations"
        }
        Level::Advanced => "natural native-level prose, keep domain vocabulary as-is",
    }
}

fn render(template: &str, context: &TeraContext) -> Result<String, tera::Error> {
    Tera::one_off(template, context, false)
}

/// Builds the title-generation prompt.
pub fn build_title_prompt(content: &str) -> Result<PromptPair, tera::Error> {
    let mut ctx = TeraContext::new();
    ctx.insert("content", content);
    Ok(PromptPair::new(TITLE_SYSTEM, render(TITLE_USER, &ctx)?))
}

/// Builds the per-level content rewriting prompt.
pub fn build_content_prompt(
    level: Level,
    content: &str,
    style_params: Option<&Value>,
) -> Result<PromptPair, tera::Error> {
    let mut ctx = TeraContext::new();
    ctx.insert("level", level.as_str());
    ctx.insert("guidance", level_guidance(level));
    ctx.insert("content", content);
    match style_params {
        Some(params) if !params.is_null() => ctx.insert("style_params", &params.to_string()),
        _ => ctx.insert("style_params", &false),
    }
    Ok(PromptPair::new(CONTENT_SYSTEM, render(CONTENT_USER, &ctx)?))
}

/// Builds the dialogue-generation prompt.
pub fn build_dialogue_prompt(content: &str) -> Result<PromptPair, tera::Error> {
    let mut ctx = TeraContext::new();
    ctx.insert("content", content);
    Ok(PromptPair::new(
        DIALOGUE_SYSTEM,
        render(DIALOGUE_USER, &ctx)?,
    ))
}

/// Builds the translation prompt for a batch of dialogue turns.
///
/// `dialogue_json` is the serialized JSON array of the turns to translate.
pub fn build_translation_prompt(
    level: Level,
    dialogue_json: &str,
    count: usize,
) -> Result<PromptPair, tera::Error> {
    let mut ctx = TeraContext::new();
    ctx.insert("level", level.as_str());
    ctx.insert("dialogue", dialogue_json);
    ctx.insert("count", &count);
    Ok(PromptPair::new(
        TRANSLATION_SYSTEM,
        render(TRANSLATION_USER, &ctx)?,
    ))
}
