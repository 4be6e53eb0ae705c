//! Audio probing and concatenation.
//!
//! The pipeline needs exactly three audio operations: measure a file's
//! duration, check that a synthesized file actually decodes, and join
//! per-turn files into one track with a fixed silence gap between turns.
//! [`AudioToolkit`] captures that surface; the production implementation
//! delegates to `ffmpeg`/`ffprobe` discovered on PATH, keeping codec
//! details out of the pipeline entirely.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tokio::process::Command;
use tracing::debug;

use crate::error::AudioError;

/// Narrow audio interface used by the audio, subtitle and merge steps.
#[async_trait]
pub trait AudioToolkit: Send + Sync {
    /// Returns the duration of an audio file in seconds.
    async fn probe_duration(&self, path: &Path) -> Result<f64, AudioError>;

    /// True when the file exists, is non-empty and decodes to audible audio.
    async fn is_valid(&self, path: &Path) -> bool;

    /// Concatenates `inputs` in order into `output`, inserting `gap_secs`
    /// of silence between consecutive files.
    async fn concat_with_gap(
        &self,
        inputs: &[PathBuf],
        gap_secs: f64,
        output: &Path,
    ) -> Result<(), AudioError>;
}

/// `ffmpeg`/`ffprobe`-backed [`AudioToolkit`].
pub struct FfmpegToolkit {
    ffmpeg: PathBuf,
    ffprobe: PathBuf,
}

impl FfmpegToolkit {
    /// Discovers `ffmpeg` and `ffprobe` on PATH.
    pub fn discover() -> Result<Self, AudioError> {
        let ffmpeg =
            which::which("ffmpeg").map_err(|_| AudioError::ToolMissing("ffmpeg".to_string()))?;
        let ffprobe =
            which::which("ffprobe").map_err(|_| AudioError::ToolMissing("ffprobe".to_string()))?;
        Ok(Self { ffmpeg, ffprobe })
    }

    /// Creates a toolkit from explicit binary paths.
    pub fn with_binaries(ffmpeg: impl Into<PathBuf>, ffprobe: impl Into<PathBuf>) -> Self {
        Self {
            ffmpeg: ffmpeg.into(),
            ffprobe: ffprobe.into(),
        }
    }

    async fn run(&self, tool: &Path, args: &[&str]) -> Result<String, AudioError> {
        debug!(tool = %tool.display(), ?args, "Running audio tool");
        let output = Command::new(tool).args(args).output().await?;
        if !output.status.success() {
            return Err(AudioError::ToolFailed {
                tool: tool
                    .file_name()
                    .map(|n| n.to_string_lossy().into_owned())
                    .unwrap_or_else(|| tool.display().to_string()),
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }
        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }
}

#[async_trait]
impl AudioToolkit for FfmpegToolkit {
    async fn probe_duration(&self, path: &Path) -> Result<f64, AudioError> {
        let path_str = path.to_string_lossy();
        let stdout = self
            .run(
                &self.ffprobe,
                &[
                    "-v",
                    "error",
                    "-show_entries",
                    "format=duration",
                    "-of",
                    "default=noprint_wrappers=1:nokey=1",
                    path_str.as_ref(),
                ],
            )
            .await?;

        stdout
            .trim()
            .parse::<f64>()
            .map_err(|_| AudioError::InvalidOutput {
                path: path.to_path_buf(),
                message: format!("ffprobe duration '{}'", stdout.trim()),
            })
    }

    async fn is_valid(&self, path: &Path) -> bool {
        let non_empty = tokio::fs::metadata(path)
            .await
            .map(|m| m.len() > 0)
            .unwrap_or(false);
        if !non_empty {
            return false;
        }
        matches!(self.probe_duration(path).await, Ok(d) if d > 0.0)
    }

    async fn concat_with_gap(
        &self,
        inputs: &[PathBuf],
        gap_secs: f64,
        output: &Path,
    ) -> Result<(), AudioError> {
        if inputs.is_empty() {
            return Err(AudioError::InvalidFile(output.to_path_buf()));
        }

        let work_dir = output
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_else(|| PathBuf::from("."));

        // One silence clip, reused between every pair of turns
        let silence = work_dir.join(".podforge_silence.mp3");
        self.run(
            &self.ffmpeg,
            &[
                "-y",
                "-f",
                "lavfi",
                "-i",
                "anullsrc=r=24000:cl=mono",
                "-t",
                &format!("{:.3}", gap_secs),
                "-codec:a",
                "libmp3lame",
                "-q:a",
                "9",
                &silence.to_string_lossy(),
            ],
        )
        .await?;

        let mut list = String::new();
        for (i, input) in inputs.iter().enumerate() {
            if i > 0 {
                list.push_str(&format!("file '{}'\n", escape_concat(&silence)));
            }
            list.push_str(&format!("file '{}'\n", escape_concat(input)));
        }
        // Trailing gap so the final subtitle entry has room before the track ends
        list.push_str(&format!("file '{}'\n", escape_concat(&silence)));

        let list_path = work_dir.join(".podforge_concat.txt");
        tokio::fs::write(&list_path, &list).await?;

        let result = self
            .run(
                &self.ffmpeg,
                &[
                    "-y",
                    "-f",
                    "concat",
                    "-safe",
                    "0",
                    "-i",
                    &list_path.to_string_lossy(),
                    "-codec:a",
                    "libmp3lame",
                    "-q:a",
                    "4",
                    &output.to_string_lossy(),
                ],
            )
            .await;

        let _ = tokio::fs::remove_file(&list_path).await;
        let _ = tokio::fs::remove_file(&silence).await;
        result.map(|_| ())
    }
}

fn escape_concat(path: &Path) -> String {
    // ffmpeg concat lists quote with single quotes; escape embedded ones
    path.to_string_lossy().replace('\'', r"'\''")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_discover_missing_tool_errors() {
        // Point discovery at an empty PATH so it cannot find the binaries
        let old_path = std::env::var_os("PATH");
        std::env::set_var("PATH", "");
        let result = FfmpegToolkit::discover();
        match old_path {
            Some(p) => std::env::set_var("PATH", p),
            None => std::env::remove_var("PATH"),
        }
        assert!(matches!(result, Err(AudioError::ToolMissing(_))));
    }

    #[test]
    fn test_escape_concat_quotes() {
        let path = PathBuf::from("/tmp/it's here.mp3");
        assert_eq!(escape_concat(&path), r"/tmp/it'\''s here.mp3");
    }

    #[tokio::test]
    async fn test_is_valid_rejects_missing_and_empty_files() {
        let toolkit = FfmpegToolkit::with_binaries("/nonexistent/ffmpeg", "/nonexistent/ffprobe");
        assert!(!toolkit.is_valid(Path::new("/nonexistent/audio.mp3")).await);

        let dir = tempfile::tempdir().expect("tempdir");
        let empty = dir.path().join("empty.mp3");
        tokio::fs::write(&empty, b"").await.expect("write");
        assert!(!toolkit.is_valid(&empty).await);
    }

    #[tokio::test]
    async fn test_concat_rejects_empty_input_list() {
        let toolkit = FfmpegToolkit::with_binaries("/nonexistent/ffmpeg", "/nonexistent/ffprobe");
        let err = toolkit
            .concat_with_gap(&[], 0.5, Path::new("/tmp/out.mp3"))
            .await
            .expect_err("empty inputs");
        assert!(matches!(err, AudioError::InvalidFile(_)));
    }
}
