//! Blob storage for task working directories and published artifacts.
//!
//! Each task owns a directory under the configured base path:
//!
//! ```text
//! <base>/<task_id>/
//!     context.json                       pipeline context document
//!     elementary/ intermediate/ advanced/  per-level working files
//!     <level>_<lang>_<kind>_<task_id>.<ext>  published artifacts
//! ```
//!
//! Published artifact names are standardized as
//! `{level}_{lang}_{type}_{task_id}.{ext}` (mp3 for audio, srt for
//! subtitles); downstream consumers rely on this naming.

use std::path::{Path, PathBuf};

use sha2::{Digest, Sha256};
use tokio::fs;
use tokio::io::AsyncWriteExt;

use super::record::{ArtifactKind, Lang, Level};

/// File name of the persisted pipeline context inside a task directory.
pub const CONTEXT_FILE: &str = "context.json";

/// File-based store for task working files and published artifacts.
#[derive(Debug, Clone)]
pub struct BlobStore {
    base_dir: PathBuf,
}

impl BlobStore {
    /// Creates a blob store rooted at `base_dir`.
    pub fn new(base_dir: impl Into<PathBuf>) -> Self {
        Self {
            base_dir: base_dir.into(),
        }
    }

    /// Returns the base directory.
    pub fn base_dir(&self) -> &Path {
        &self.base_dir
    }

    /// Returns the working directory of a task.
    pub fn task_dir(&self, task_id: &str) -> PathBuf {
        self.base_dir.join(task_id)
    }

    /// Returns the per-level working directory of a task.
    pub fn level_dir(&self, task_id: &str, level: Level) -> PathBuf {
        self.task_dir(task_id).join(level.as_str())
    }

    /// Resolves a task-relative file name to an absolute path.
    pub fn path_for(&self, task_id: &str, filename: &str) -> PathBuf {
        self.task_dir(task_id).join(filename)
    }

    /// Standardized published-artifact file name.
    pub fn artifact_name(level: Level, lang: Lang, kind: ArtifactKind, task_id: &str) -> String {
        format!(
            "{}_{}_{}_{}.{}",
            level.as_str(),
            lang.as_str(),
            kind.as_str(),
            task_id,
            kind.extension()
        )
    }

    /// Creates the task directory and all per-level subdirectories.
    pub async fn ensure_task_dirs(&self, task_id: &str) -> std::io::Result<()> {
        for level in Level::ALL {
            fs::create_dir_all(self.level_dir(task_id, level)).await?;
        }
        Ok(())
    }

    /// Writes a published artifact and returns its file name.
    pub async fn write(
        &self,
        task_id: &str,
        level: Level,
        lang: Lang,
        kind: ArtifactKind,
        data: &[u8],
    ) -> std::io::Result<String> {
        fs::create_dir_all(self.task_dir(task_id)).await?;
        let filename = Self::artifact_name(level, lang, kind, task_id);
        let path = self.path_for(task_id, &filename);
        let mut file = fs::File::create(&path).await?;
        file.write_all(data).await?;
        file.sync_all().await?;
        Ok(filename)
    }

    /// True when a task-relative file exists.
    pub async fn exists(&self, task_id: &str, filename: &str) -> bool {
        fs::try_exists(self.path_for(task_id, filename))
            .await
            .unwrap_or(false)
    }

    /// Removes a task's entire working directory.
    pub async fn purge_task(&self, task_id: &str) -> std::io::Result<()> {
        let dir = self.task_dir(task_id);
        if fs::try_exists(&dir).await.unwrap_or(false) {
            fs::remove_dir_all(&dir).await?;
        }
        Ok(())
    }

    /// Hex-encoded SHA-256 checksum of a blob.
    pub fn checksum(data: &[u8]) -> String {
        let mut hasher = Sha256::new();
        hasher.update(data);
        format!("{:x}", hasher.finalize())
    }
}
