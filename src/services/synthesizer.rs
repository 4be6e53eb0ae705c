//! Speech synthesis client and voice selection.
//!
//! [`SpeechSynthesizer`] is the narrow transport interface (text + voice in,
//! audio bytes out); [`OpenAiSpeechSynthesizer`] implements it against any
//! OpenAI-compatible `/audio/speech` endpoint. [`VoiceMap`] resolves a
//! dialogue role and language to a concrete voice name, falling back to a
//! default voice for unmapped combinations.

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::Serialize;

use crate::error::SynthesisError;
use crate::storage::{Lang, Role};

/// Maps `role_lang` keys (e.g. `host_cn`) to voice names.
#[derive(Debug, Clone)]
pub struct VoiceMap {
    voices: HashMap<String, String>,
    default_voice: String,
}

impl Default for VoiceMap {
    fn default() -> Self {
        let mut voices = HashMap::new();
        voices.insert("host_cn".to_string(), "zh-CN-XiaoxiaoNeural".to_string());
        voices.insert("guest_cn".to_string(), "zh-CN-YunxiaNeural".to_string());
        voices.insert("host_en".to_string(), "en-US-JennyNeural".to_string());
        voices.insert(
            "guest_en".to_string(),
            "en-US-ChristopherNeural".to_string(),
        );
        Self {
            voices,
            default_voice: "zh-CN-XiaoxiaoNeural".to_string(),
        }
    }
}

impl VoiceMap {
    /// Creates the default map with per-key overrides applied.
    ///
    /// An override under the key `default` replaces the fallback voice.
    pub fn with_overrides(overrides: &HashMap<String, String>) -> Self {
        let mut map = Self::default();
        for (key, voice) in overrides {
            if key == "default" {
                map.default_voice = voice.clone();
            } else {
                map.voices.insert(key.clone(), voice.clone());
            }
        }
        map
    }

    /// Resolves the voice for a role speaking a language.
    pub fn voice_for(&self, role: Role, lang: Lang) -> &str {
        let key = format!("{}_{}", role.as_str(), lang.as_str());
        self.voices
            .get(&key)
            .unwrap_or(&self.default_voice)
            .as_str()
    }

    /// Returns the fallback voice.
    pub fn default_voice(&self) -> &str {
        &self.default_voice
    }
}

/// Converts text to speech.
#[async_trait]
pub trait SpeechSynthesizer: Send + Sync {
    /// Synthesizes `text` with the given voice and returns encoded audio.
    async fn synthesize(&self, text: &str, voice: &str) -> Result<Vec<u8>, SynthesisError>;
}

#[derive(Serialize)]
struct SpeechRequest<'a> {
    model: &'a str,
    voice: &'a str,
    input: &'a str,
}

/// Client for OpenAI-compatible speech APIs.
pub struct OpenAiSpeechSynthesizer {
    api_base: String,
    api_key: String,
    model: String,
    http_client: Client,
}

impl OpenAiSpeechSynthesizer {
    /// Creates a new client.
    ///
    /// # Arguments
    ///
    /// * `api_base` - Base URL of the API (e.g., "http://localhost:5050/v1")
    /// * `api_key` - Bearer token for authentication
    /// * `model` - TTS model identifier (e.g., "tts-1")
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
}

#[async_trait]
impl SpeechSynthesizer for OpenAiSpeechSynthesizer {
    async fn synthesize(&self, text: &str, voice: &str) -> Result<Vec<u8>, SynthesisError> {
        let request = SpeechRequest {
            model: &self.model,
            voice,
            input: text,
        };

        let url = format!("{}/audio/speech", self.api_base.trim_end_matches('/'));
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
            return Err(SynthesisError::Api {
                status: status.as_u16(),
                message,
            });
        }

        let audio = response.bytes().await?.to_vec();
        if audio.is_empty() {
            return Err(SynthesisError::EmptyAudio);
        }
        Ok(audio)
    }
}
