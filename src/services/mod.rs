//! External collaborators consumed by the pipeline.
//!
//! Each service is a narrow trait with one production implementation:
//!
//! - [`fetcher`] - article download and text extraction (HTTP)
//! - [`generator`] - LLM chat completions plus the domain helpers built on
//!   them (titles, leveling, dialogue, translation)
//! - [`synthesizer`] - text-to-speech with role+language voice selection
//! - [`audio`] - duration probing and silence-gap concatenation (ffmpeg)
//!
//! Steps receive the whole set as one [`StepServices`] bundle so the
//! processor wires dependencies in exactly one place.

pub mod audio;
pub mod fetcher;
pub mod generator;
pub mod synthesizer;

use std::sync::Arc;

use crate::config::Config;
use crate::error::AudioError;
use crate::storage::BlobStore;

pub use audio::{AudioToolkit, FfmpegToolkit};
pub use fetcher::{ContentFetcher, HttpContentFetcher, Page};
pub use generator::{DialogueTurn, OpenAiGenerator, TextGenerator};
pub use synthesizer::{OpenAiSpeechSynthesizer, SpeechSynthesizer, VoiceMap};

/// Every external dependency a pipeline step may touch.
pub struct StepServices {
    /// Article fetcher.
    pub fetcher: Arc<dyn ContentFetcher>,
    /// LLM transport.
    pub generator: Arc<dyn TextGenerator>,
    /// Text-to-speech transport.
    pub synthesizer: Arc<dyn SpeechSynthesizer>,
    /// Audio probing and concatenation.
    pub audio: Arc<dyn AudioToolkit>,
    /// Task working directories and published artifacts.
    pub blob: Arc<BlobStore>,
    /// Role+language voice selection.
    pub voices: VoiceMap,
    /// Application configuration.
    pub config: Arc<Config>,
}

impl StepServices {
    /// Builds the production service set from configuration.
    ///
    /// # Errors
    ///
    /// Returns [`AudioError::ToolMissing`] when ffmpeg/ffprobe are not on
    /// PATH.
    pub fn from_config(config: Arc<Config>) -> Result<Arc<Self>, AudioError> {
        let voices = VoiceMap::with_overrides(&config.voice_overrides);
        Ok(Arc::new(Self {
            fetcher: Arc::new(HttpContentFetcher::new()),
            generator: Arc::new(OpenAiGenerator::new(
                &config.api_base_url,
                &config.api_key,
                &config.model,
            )),
            synthesizer: Arc::new(OpenAiSpeechSynthesizer::new(
                &config.tts_base_url,
                &config.tts_api_key,
                &config.tts_model,
            )),
            audio: Arc::new(FfmpegToolkit::discover()?),
            blob: Arc::new(BlobStore::new(config.data_dir.clone())),
            voices,
            config,
        }))
    }
}
