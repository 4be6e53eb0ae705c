//! Application configuration.
//!
//! All tunables live on a single [`Config`] struct that is constructed once
//! at startup and passed by reference into the components that need it.
//! There are no ambient globals: the worker pool, the pipeline and the
//! service clients all receive their configuration explicitly.
//!
//! Configuration sources, in increasing precedence:
//! 1. Built-in defaults
//! 2. An optional YAML file (`--config`)
//! 3. `PODFORGE_*` environment variables

use std::collections::HashMap;
use std::path::PathBuf;
use std::time::Duration;

use serde::Deserialize;
use thiserror::Error;

/// Errors that can occur during configuration operations.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// An environment variable has an invalid value.
    #[error("Invalid value for {key}: {message}")]
    InvalidValue { key: String, message: String },

    /// Configuration validation failed.
    #[error("Configuration validation failed: {0}")]
    ValidationFailed(String),

    /// The YAML config file could not be parsed.
    #[error("Config file error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    /// IO error while reading configuration.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// A single RSS feed to poll for new articles.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
pub struct FeedSource {
    /// Feed URL.
    pub url: String,
    /// Optional display name used in logs.
    #[serde(default)]
    pub name: Option<String>,
}

/// Configuration for the podforge application.
#[derive(Debug, Clone)]
pub struct Config {
    // Storage settings
    /// Base directory for per-task working directories.
    pub data_dir: PathBuf,
    /// SQLite connection string for the task record store.
    pub database_url: String,

    // Worker pool settings
    /// Maximum number of tasks processed concurrently.
    pub max_task_workers: usize,
    /// Optional wall-clock budget for a whole task; checked between steps.
    pub task_deadline: Option<Duration>,

    // Retry settings
    /// Immediate in-place retries for a step that fails transiently.
    pub max_step_retries: u32,
    /// Delay between step-level retries.
    pub step_retry_delay: Duration,
    /// Whole-pipeline re-attempts after a step exhausts its own retries.
    pub max_task_retries: u32,
    /// Delay before a task-level retry.
    pub task_retry_delay: Duration,
    /// Attempts per dialogue turn inside the audio step.
    pub synthesis_retries: u32,

    // Content settings
    /// Dialogue turns translated per LLM call.
    pub translation_batch_size: usize,
    /// Minimum number of turns a generated dialogue must contain.
    pub min_dialogue_turns: usize,
    /// Silence inserted between dialogue turns in audio and subtitles.
    pub turn_gap: Duration,

    // LLM settings
    /// Base URL of the OpenAI-compatible chat completions API.
    pub api_base_url: String,
    /// API key for the completions endpoint.
    pub api_key: String,
    /// Model identifier for all text generation.
    pub model: String,

    // TTS settings
    /// Base URL of the OpenAI-compatible speech API.
    pub tts_base_url: String,
    /// API key for the speech endpoint.
    pub tts_api_key: String,
    /// Model identifier for speech synthesis.
    pub tts_model: String,
    /// Overrides for the role+language to voice mapping.
    pub voice_overrides: HashMap<String, String>,

    // RSS settings
    /// Feeds polled for new articles.
    pub feeds: Vec<FeedSource>,
    /// Feeds fetched concurrently per polling batch.
    pub feed_batch_size: usize,
    /// Pause between polling batches.
    pub feed_batch_pause: Duration,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("data/tasks"),
            database_url: "sqlite://data/podforge.db".to_string(),

            max_task_workers: 3,
            task_deadline: None,

            max_step_retries: 1,
            step_retry_delay: Duration::from_secs(3),
            max_task_retries: 1,
            task_retry_delay: Duration::from_secs(5),
            synthesis_retries: 3,

            translation_batch_size: 5,
            min_dialogue_turns: 4,
            turn_gap: Duration::from_millis(500),

            api_base_url: "https://api.example.com/v1".to_string(),
            api_key: String::new(),
            model: "Qwen/Qwen2.5-7B-Instruct".to_string(),

            tts_base_url: "http://localhost:5050/v1".to_string(),
            tts_api_key: String::new(),
            tts_model: "tts-1".to_string(),
            voice_overrides: HashMap::new(),

            feeds: Vec::new(),
            feed_batch_size: 5,
            feed_batch_pause: Duration::from_secs(1),
        }
    }
}

/// On-disk mirror of [`Config`] with every field optional.
///
/// Durations are expressed in whole seconds except `turn_gap_ms`.
#[derive(Debug, Default, Deserialize)]
struct ConfigFile {
    data_dir: Option<PathBuf>,
    database_url: Option<String>,
    max_task_workers: Option<usize>,
    task_deadline_secs: Option<u64>,
    max_step_retries: Option<u32>,
    step_retry_delay_secs: Option<u64>,
    max_task_retries: Option<u32>,
    task_retry_delay_secs: Option<u64>,
    synthesis_retries: Option<u32>,
    translation_batch_size: Option<usize>,
    min_dialogue_turns: Option<usize>,
    turn_gap_ms: Option<u64>,
    api_base_url: Option<String>,
    api_key: Option<String>,
    model: Option<String>,
    tts_base_url: Option<String>,
    tts_api_key: Option<String>,
    tts_model: Option<String>,
    #[serde(default)]
    voice_overrides: HashMap<String, String>,
    #[serde(default)]
    feeds: Vec<FeedSource>,
    feed_batch_size: Option<usize>,
    feed_batch_pause_secs: Option<u64>,
}

impl Config {
    /// Creates a new configuration with defaults.
    pub fn new() -> Self {
        Self::default()
    }

    /// Loads configuration from a YAML file, layered over the defaults.
    pub fn from_yaml_file(path: impl Into<PathBuf>) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path.into())?;
        let file: ConfigFile = serde_yaml::from_str(&contents)?;
        let mut config = Self::default();
        config.apply_file(file);
        config.validate()?;
        Ok(config)
    }

    /// Overlays `PODFORGE_*` environment variables onto this configuration.
    ///
    /// Recognized variables: `PODFORGE_DATA_DIR`, `PODFORGE_DATABASE_URL`,
    /// `PODFORGE_MAX_TASK_WORKERS`, `PODFORGE_API_BASE_URL`,
    /// `PODFORGE_API_KEY`, `PODFORGE_MODEL`, `PODFORGE_TTS_BASE_URL`,
    /// `PODFORGE_TTS_API_KEY`, `PODFORGE_TTS_MODEL`.
    pub fn overlay_env(mut self) -> Result<Self, ConfigError> {
        if let Ok(v) = std::env::var("PODFORGE_DATA_DIR") {
            self.data_dir = PathBuf::from(v);
        }
        if let Ok(v) = std::env::var("PODFORGE_DATABASE_URL") {
            self.database_url = v;
        }
        if let Ok(v) = std::env::var("PODFORGE_MAX_TASK_WORKERS") {
            self.max_task_workers =
                v.parse()
                    .map_err(|_| ConfigError::InvalidValue {
                        key: "PODFORGE_MAX_TASK_WORKERS".to_string(),
                        message: format!("expected integer, got '{}'", v),
                    })?;
        }
        if let Ok(v) = std::env::var("PODFORGE_API_BASE_URL") {
            self.api_base_url = v;
        }
        if let Ok(v) = std::env::var("PODFORGE_API_KEY") {
            self.api_key = v;
        }
        if let Ok(v) = std::env::var("PODFORGE_MODEL") {
            self.model = v;
        }
        if let Ok(v) = std::env::var("PODFORGE_TTS_BASE_URL") {
            self.tts_base_url = v;
        }
        if let Ok(v) = std::env::var("PODFORGE_TTS_API_KEY") {
            self.tts_api_key = v;
        }
        if let Ok(v) = std::env::var("PODFORGE_TTS_MODEL") {
            self.tts_model = v;
        }
        Ok(self)
    }

    fn apply_file(&mut self, file: ConfigFile) {
        if let Some(v) = file.data_dir {
            self.data_dir = v;
        }
        if let Some(v) = file.database_url {
            self.database_url = v;
        }
        if let Some(v) = file.max_task_workers {
            self.max_task_workers = v;
        }
        if let Some(v) = file.task_deadline_secs {
            self.task_deadline = Some(Duration::from_secs(v));
        }
        if let Some(v) = file.max_step_retries {
            self.max_step_retries = v;
        }
        if let Some(v) = file.step_retry_delay_secs {
            self.step_retry_delay = Duration::from_secs(v);
        }
        if let Some(v) = file.max_task_retries {
            self.max_task_retries = v;
        }
        if let Some(v) = file.task_retry_delay_secs {
            self.task_retry_delay = Duration::from_secs(v);
        }
        if let Some(v) = file.synthesis_retries {
            self.synthesis_retries = v;
        }
        if let Some(v) = file.translation_batch_size {
            self.translation_batch_size = v;
        }
        if let Some(v) = file.min_dialogue_turns {
            self.min_dialogue_turns = v;
        }
        if let Some(v) = file.turn_gap_ms {
            self.turn_gap = Duration::from_millis(v);
        }
        if let Some(v) = file.api_base_url {
            self.api_base_url = v;
        }
        if let Some(v) = file.api_key {
            self.api_key = v;
        }
        if let Some(v) = file.model {
            self.model = v;
        }
        if let Some(v) = file.tts_base_url {
            self.tts_base_url = v;
        }
        if let Some(v) = file.tts_api_key {
            self.tts_api_key = v;
        }
        if let Some(v) = file.tts_model {
            self.tts_model = v;
        }
        self.voice_overrides.extend(file.voice_overrides);
        if !file.feeds.is_empty() {
            self.feeds = file.feeds;
        }
        if let Some(v) = file.feed_batch_size {
            self.feed_batch_size = v;
        }
        if let Some(v) = file.feed_batch_pause_secs {
            self.feed_batch_pause = Duration::from_secs(v);
        }
    }

    /// Validates the configuration.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_task_workers == 0 {
            return Err(ConfigError::ValidationFailed(
                "max_task_workers must be at least 1".to_string(),
            ));
        }
        if self.translation_batch_size == 0 {
            return Err(ConfigError::ValidationFailed(
                "translation_batch_size must be at least 1".to_string(),
            ));
        }
        if self.synthesis_retries == 0 {
            return Err(ConfigError::ValidationFailed(
                "synthesis_retries must be at least 1".to_string(),
            ));
        }
        if self.feed_batch_size == 0 {
            return Err(ConfigError::ValidationFailed(
                "feed_batch_size must be at least 1".to_string(),
            ));
        }
        if self.data_dir.as_os_str().is_empty() {
            return Err(ConfigError::ValidationFailed(
                "data_dir must not be empty".to_string(),
            ));
        }
        Ok(())
    }

    /// Sets the data directory.
    pub fn with_data_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.data_dir = dir.into();
        self
    }

    /// Sets the database URL.
    pub fn with_database_url(mut self, url: impl Into<String>) -> Self {
        self.database_url = url.into();
        self
    }

    /// Sets the maximum number of concurrent task workers.
    pub fn with_max_task_workers(mut self, workers: usize) -> Self {
        self.max_task_workers = workers;
        self
    }

    /// Sets the per-task wall-clock budget.
    pub fn with_task_deadline(mut self, deadline: Duration) -> Self {
        self.task_deadline = Some(deadline);
        self
    }

    /// Sets the step retry count.
    pub fn with_max_step_retries(mut self, retries: u32) -> Self {
        self.max_step_retries = retries;
        self
    }

    /// Sets the delay between step retries.
    pub fn with_step_retry_delay(mut self, delay: Duration) -> Self {
        self.step_retry_delay = delay;
        self
    }

    /// Sets the task retry count.
    pub fn with_max_task_retries(mut self, retries: u32) -> Self {
        self.max_task_retries = retries;
        self
    }

    /// Sets the delay before a task-level retry.
    pub fn with_task_retry_delay(mut self, delay: Duration) -> Self {
        self.task_retry_delay = delay;
        self
    }

    /// Sets the per-turn synthesis attempt budget.
    pub fn with_synthesis_retries(mut self, retries: u32) -> Self {
        self.synthesis_retries = retries;
        self
    }

    /// Sets the translation batch size.
    pub fn with_translation_batch_size(mut self, size: usize) -> Self {
        self.translation_batch_size = size;
        self
    }

    /// Sets the minimum dialogue turn count.
    pub fn with_min_dialogue_turns(mut self, turns: usize) -> Self {
        self.min_dialogue_turns = turns;
        self
    }
}
