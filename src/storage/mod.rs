//! Storage abstraction for persisting the workflow status.
//!
//! The orchestrator writes the whole [`Status`] after every change and reads
//! it back on startup to resume an interrupted run. Backends are pluggable:
//! [`FileStore`] writes a JSON file, [`InMemoryStore`] keeps the document in
//! memory for tests.

mod file;
mod memory;

pub use file::FileStore;
pub use memory::InMemoryStore;

use async_trait::async_trait;
use thiserror::Error;

use crate::core::status::Status;

/// Errors that can occur during storage operations.
#[derive(Debug, Error)]
pub enum StorageError {
    /// Reading or writing the backing file failed.
    #[error("storage I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization/deserialization error.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Storage lock was poisoned.
    #[error("storage lock poisoned")]
    LockPoisoned,
}

/// Persistent home of a workflow status.
#[async_trait]
pub trait StatusStore: Send + Sync {
    /// Load the stored status, if there is one.
    async fn load(&self) -> Result<Option<Status>, StorageError>;

    /// Replace the stored status.
    async fn save(&self, status: &Status) -> Result<(), StorageError>;

    /// Delete the stored status. Removing nothing is not an error.
    async fn remove(&self) -> Result<(), StorageError>;

    /// Whether a status is stored.
    async fn exists(&self) -> Result<bool, StorageError>;
}
