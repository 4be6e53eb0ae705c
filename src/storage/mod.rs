//! Durable storage: task records and blob files.
//!
//! - [`record`] - task records, status enums and the [`record::TaskStore`]
//!   trait with an in-memory implementation
//! - [`sqlite`] - the SQLite-backed store used in production
//! - [`blob`] - task working directories and published artifact files

pub mod blob;
pub mod record;
pub mod sqlite;

pub use blob::{BlobStore, CONTEXT_FILE};
pub use record::{
    ArtifactKind, FileSet, InMemoryTaskStore, Lang, Level, RecordError, Role, TaskFiles,
    TaskProgress, TaskRecord, TaskStatus, TaskStore,
};
pub use sqlite::SqliteTaskStore;
