//! In-memory storage implementation.
//!
//! Provides a thread-safe in-memory backend for testing and development.

use async_trait::async_trait;
use std::sync::RwLock;
use std::sync::atomic::{AtomicUsize, Ordering};

use super::{StatusStore, StorageError};
use crate::core::status::Status;

/// In-memory storage backend.
///
/// Keeps the serialized document so that loading goes through the same
/// JSON round trip as the file backend. Data is not persisted across
/// restarts.
#[derive(Debug, Default)]
pub struct InMemoryStore {
    document: RwLock<Option<String>>,
    saves: AtomicUsize,
}

impl InMemoryStore {
    /// Create a new empty in-memory store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a store that already holds a status, as after a crash.
    pub fn with_status(status: &Status) -> Result<Self, StorageError> {
        let store = Self::new();
        *store
            .document
            .write()
            .map_err(|_| StorageError::LockPoisoned)? = Some(serde_json::to_string(status)?);
        Ok(store)
    }

    /// Number of successful saves so far.
    pub fn save_count(&self) -> usize {
        self.saves.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl StatusStore for InMemoryStore {
    async fn load(&self) -> Result<Option<Status>, StorageError> {
        let document = self
            .document
            .read()
            .map_err(|_| StorageError::LockPoisoned)?;
        match document.as_deref() {
            Some(json) => Ok(Some(serde_json::from_str(json)?)),
            None => Ok(None),
        }
    }

    async fn save(&self, status: &Status) -> Result<(), StorageError> {
        let json = serde_json::to_string(status)?;
        *self
            .document
            .write()
            .map_err(|_| StorageError::LockPoisoned)? = Some(json);
        self.saves.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn remove(&self) -> Result<(), StorageError> {
        *self
            .document
            .write()
            .map_err(|_| StorageError::LockPoisoned)? = None;
        Ok(())
    }

    async fn exists(&self) -> Result<bool, StorageError> {
        Ok(self
            .document
            .read()
            .map_err(|_| StorageError::LockPoisoned)?
            .is_some())
    }
}
