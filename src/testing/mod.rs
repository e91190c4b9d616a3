//! Testing utilities for users of the waypoint library.
//!
//! - [`RecordingSink`]: a subscriber that keeps every snapshot it receives
//! - [`WorkflowFixture`]: a scratch directory holding a definition file and
//!   a status file, ready to open as a [`Workflow`]

use async_trait::async_trait;
use serde_json::Value;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use tempfile::TempDir;

use crate::events::{SinkError, StatusSink};
use crate::storage::FileStore;
use crate::workflow::{Workflow, WorkflowError};

/// A sink that records snapshots in arrival order.
///
/// Clones share the same record, so one clone can be handed to the workflow
/// and the other kept for assertions.
///
/// ```
/// use waypoint::testing::RecordingSink;
///
/// let sink = RecordingSink::new();
/// assert!(sink.snapshots().is_empty());
/// ```
#[derive(Debug, Clone, Default)]
pub struct RecordingSink {
    snapshots: Arc<Mutex<Vec<String>>>,
}

impl RecordingSink {
    pub fn new() -> Self {
        Self::default()
    }

    /// The raw JSON snapshots received so far.
    pub fn snapshots(&self) -> Vec<String> {
        self.snapshots
            .lock()
            .map(|s| s.clone())
            .unwrap_or_default()
    }

    /// Snapshots parsed as JSON. Unparseable entries are skipped.
    pub fn values(&self) -> Vec<Value> {
        self.snapshots()
            .iter()
            .filter_map(|s| serde_json::from_str(s).ok())
            .collect()
    }

    /// The most recent snapshot, parsed.
    pub fn last(&self) -> Option<Value> {
        self.values().pop()
    }

    pub fn len(&self) -> usize {
        self.snapshots.lock().map(|s| s.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Every `percent` value seen, in order.
    pub fn percents(&self) -> Vec<u64> {
        self.values()
            .iter()
            .filter_map(|v| v.get("percent").and_then(Value::as_u64))
            .collect()
    }
}

#[async_trait]
impl StatusSink for RecordingSink {
    async fn send(&self, snapshot: &str) -> Result<(), SinkError> {
        self.snapshots
            .lock()
            .map_err(|e| SinkError::Delivery(e.to_string()))?
            .push(snapshot.to_string());
        Ok(())
    }
}

/// A scratch directory with a workflow definition in it.
///
/// The directory and everything in it is removed when the fixture drops.
///
/// ```ignore
/// use waypoint::testing::WorkflowFixture;
///
/// let fixture = WorkflowFixture::new(r#"
/// groups:
///   - id: build
///     tasks:
///       - id: compile
///         cmd: "true"
/// "#);
/// let workflow = fixture.open().await?;
/// let outcome = workflow.start().await?;
/// ```
pub struct WorkflowFixture {
    dir: TempDir,
    definition: PathBuf,
    status: PathBuf,
}

impl WorkflowFixture {
    /// Write `yaml` as `workflow.yaml` into a fresh temp directory.
    ///
    /// # Panics
    ///
    /// Panics if the directory or the file cannot be created.
    pub fn new(yaml: &str) -> Self {
        let dir = tempfile::Builder::new()
            .prefix("waypoint-fixture.")
            .tempdir()
            .expect("failed to create fixture directory");
        let definition = dir.path().join("workflow.yaml");
        std::fs::write(&definition, yaml).expect("failed to write definition");
        let status = dir.path().join("status.json");
        Self {
            dir,
            definition,
            status,
        }
    }

    /// The fixture directory. Commands run here.
    pub fn dir(&self) -> &Path {
        self.dir.path()
    }

    pub fn definition_path(&self) -> &Path {
        &self.definition
    }

    pub fn status_path(&self) -> &Path {
        &self.status
    }

    /// A store backed by the fixture's status file.
    pub fn store(&self) -> FileStore {
        FileStore::new(&self.status)
    }

    /// Whether a status file currently exists.
    pub fn has_status(&self) -> bool {
        self.status.exists()
    }

    /// The persisted status document, if any.
    pub fn status_json(&self) -> Option<Value> {
        let bytes = std::fs::read(&self.status).ok()?;
        serde_json::from_slice(&bytes).ok()
    }

    /// Path of a file inside the fixture directory.
    pub fn path(&self, name: &str) -> PathBuf {
        self.dir.path().join(name)
    }

    /// Open the workflow, resuming from the status file when present.
    pub async fn open(&self) -> Result<Workflow<FileStore>, WorkflowError> {
        Workflow::load(&self.definition, self.store()).await
    }
}
