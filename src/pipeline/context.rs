//! Durable per-task key/value context.
//!
//! Every step reads its inputs from and writes its outputs into a
//! [`TaskContext`]: a flat map of string keys to JSON values, serialized to
//! `context.json` inside the task's working directory after every mutation.
//! A crashed or retried run reloads the document on construction and
//! resumes exactly where the previous run left off.
//!
//! One execution owns exactly one context; steps within a task run strictly
//! sequentially, so no locking is needed beyond that ownership.

use std::path::{Path, PathBuf};

use serde_json::{Map, Value};
use tracing::debug;

use crate::storage::CONTEXT_FILE;

/// The output map a step returns: context key → value.
pub type StepOutput = Map<String, Value>;

/// Durable key/value scratch space for one task execution.
#[derive(Debug)]
pub struct TaskContext {
    path: PathBuf,
    values: Map<String, Value>,
}

impl TaskContext {
    /// Opens the context for a task directory, seeding from an existing
    /// `context.json` when one is present.
    pub async fn load_or_init(task_dir: &Path) -> std::io::Result<Self> {
        tokio::fs::create_dir_all(task_dir).await?;
        let path = task_dir.join(CONTEXT_FILE);

        let values = match tokio::fs::read(&path).await {
            Ok(bytes) => serde_json::from_slice(&bytes).unwrap_or_else(|e| {
                debug!(path = %path.display(), error = %e, "Discarding unreadable context");
                Map::new()
            }),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Map::new(),
            Err(e) => return Err(e),
        };

        Ok(Self { path, values })
    }

    /// Returns the value for `key`, if present.
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.values.get(key)
    }

    /// Returns the string value for `key`, if present and a string.
    pub fn get_str(&self, key: &str) -> Option<&str> {
        self.values.get(key).and_then(Value::as_str)
    }

    /// True when `key` exists.
    pub fn has(&self, key: &str) -> bool {
        self.values.contains_key(key)
    }

    /// True when `key` exists with a non-empty value.
    pub fn has_non_empty(&self, key: &str) -> bool {
        self.values.get(key).is_some_and(|v| !is_empty_value(v))
    }

    /// Sets one key and persists.
    pub async fn set(&mut self, key: impl Into<String>, value: Value) -> std::io::Result<()> {
        self.values.insert(key.into(), value);
        self.persist().await
    }

    /// Merges a whole output map and persists once.
    pub async fn update(&mut self, output: StepOutput) -> std::io::Result<()> {
        for (key, value) in output {
            self.values.insert(key, value);
        }
        self.persist().await
    }

    /// Removes one key and persists.
    pub async fn delete(&mut self, key: &str) -> std::io::Result<()> {
        self.values.remove(key);
        self.persist().await
    }

    /// Returns the subset of `keys` that are missing from the context.
    pub fn validate_keys(&self, keys: &[String]) -> Vec<String> {
        keys.iter()
            .filter(|k| !self.values.contains_key(k.as_str()))
            .cloned()
            .collect()
    }

    /// Path of the persisted document.
    pub fn path(&self) -> &Path {
        &self.path
    }

    async fn persist(&self) -> std::io::Result<()> {
        let bytes = serde_json::to_vec_pretty(&self.values)?;
        tokio::fs::write(&self.path, bytes).await
    }
}

/// True for values that carry no usable content.
pub fn is_empty_value(value: &Value) -> bool {
    match value {
        Value::Null => true,
        Value::String(s) => s.is_empty(),
        Value::Array(a) => a.is_empty(),
        Value::Object(o) => o.is_empty(),
        _ => false,
    }
}
