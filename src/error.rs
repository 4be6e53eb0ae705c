//! Error types for podforge's external collaborators.
//!
//! Defines error types for the thin I/O layers the pipeline depends on:
//! - Article fetching and text extraction
//! - LLM text generation (titles, leveling, dialogue, translation)
//! - Speech synthesis
//! - Audio probing and concatenation
//!
//! Pipeline-internal errors (`StepError`, `TaskError`) live next to the
//! components that raise them in the `pipeline` module.

use std::path::PathBuf;

use thiserror::Error;

/// Errors that can occur while fetching and extracting article content.
#[derive(Debug, Error)]
pub enum FetchError {
    /// The HTTP request itself failed (DNS, connect, timeout).
    #[error("Request failed: {0}")]
    Request(#[from] reqwest::Error),

    /// The server answered with a non-success status.
    #[error("Unexpected status {status} fetching {url}")]
    Status { url: String, status: u16 },

    /// The page yielded no usable text after extraction.
    #[error("No usable content extracted from {0}")]
    EmptyContent(String),
}

/// Errors that can occur during LLM text generation.
#[derive(Debug, Error)]
pub enum GenerationError {
    /// The HTTP request to the completions endpoint failed.
    #[error("Request failed: {0}")]
    Request(#[from] reqwest::Error),

    /// The API returned an error payload.
    #[error("API error (status {status}): {message}")]
    Api { status: u16, message: String },

    /// The model returned no choices or an empty completion.
    #[error("Model returned an empty completion")]
    EmptyResponse,

    /// The completion could not be parsed as the expected JSON shape.
    #[error("Invalid JSON in completion: {0}")]
    InvalidJson(String),

    /// Generated dialogue failed structural validation.
    #[error("Invalid dialogue: {0}")]
    InvalidDialogue(String),

    /// Prompt template rendering failed.
    #[error("Prompt rendering failed: {0}")]
    Template(#[from] tera::Error),
}

/// Errors that can occur during speech synthesis.
#[derive(Debug, Error)]
pub enum SynthesisError {
    /// The HTTP request to the speech endpoint failed.
    #[error("Request failed: {0}")]
    Request(#[from] reqwest::Error),

    /// The API returned an error payload.
    #[error("API error (status {status}): {message}")]
    Api { status: u16, message: String },

    /// The endpoint returned zero bytes of audio.
    #[error("Synthesizer returned empty audio")]
    EmptyAudio,

    /// A dialogue turn could not be synthesized within the retry budget.
    #[error("Synthesis of turn {turn} failed after {attempts} attempts")]
    Exhausted { turn: usize, attempts: u32 },
}

/// Errors that can occur while probing or concatenating audio files.
#[derive(Debug, Error)]
pub enum AudioError {
    /// A required external tool was not found on PATH.
    #[error("Audio tool not found: {0}")]
    ToolMissing(String),

    /// Running the external tool failed.
    #[error("{tool} failed: {stderr}")]
    ToolFailed { tool: String, stderr: String },

    /// The tool produced output that could not be interpreted.
    #[error("Unparseable tool output for {path}: {message}")]
    InvalidOutput { path: PathBuf, message: String },

    /// An audio file is missing, empty or undecodable.
    #[error("Invalid audio file: {0}")]
    InvalidFile(PathBuf),

    /// IO error while reading or writing audio files.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}
