//! Workflow type definitions.
//!
//! This module contains the error type, lifecycle states and run outcomes of
//! the workflow orchestrator.

use serde::Serialize;
use std::fmt;
use thiserror::Error;

use crate::config::ConfigError;
use crate::core::task::TaskError;
use crate::core::types::{GroupId, TaskId};
use crate::storage::StorageError;

/// Process exit code signalling that a task ended the run on purpose and the
/// workflow must be resumed by the next invocation.
pub const EXIT_CODE_CONTINUE: i32 = 128;

/// Error recorded on the task, group and workflow when a run is aborted.
pub const ABORTED_MESSAGE: &str = "workflow aborted";

/// Errors that can occur in the workflow orchestrator.
#[derive(Debug, Error)]
pub enum WorkflowError {
    /// A run is already in progress.
    #[error("workflow is already running")]
    AlreadyRunning,

    /// The workflow has finished and must be reset before starting again.
    #[error("workflow already finished, reset it first")]
    AlreadyFinished,

    /// Reset was requested before the workflow finished.
    #[error("workflow is not finished")]
    NotFinished,

    /// Resume was requested but no status is stored.
    #[error("no previous run to resume")]
    NothingToResume,

    /// Definition or variable error.
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),

    /// Storage error.
    #[error("storage error: {0}")]
    Storage(#[from] StorageError),

    /// A task failed and the run stopped.
    #[error("task {group}/{task} failed: {source}")]
    Task {
        group: GroupId,
        task: TaskId,
        #[source]
        source: TaskError,
    },
}

/// Lifecycle state of a workflow instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkflowState {
    /// Not started by this instance yet.
    Fresh,
    /// A run is in progress.
    Running,
    /// The last run went through every group, or stopped on a task failure.
    Finished,
    /// The last run was aborted.
    Aborted,
    /// The last run stopped after a task flagged `exits`.
    Exited,
}

impl fmt::Display for WorkflowState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            WorkflowState::Fresh => "fresh",
            WorkflowState::Running => "running",
            WorkflowState::Finished => "finished",
            WorkflowState::Aborted => "aborted",
            WorkflowState::Exited => "exited",
        };
        f.write_str(s)
    }
}

/// How a run that did not fail came to an end.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    /// Every group was processed.
    Finished,
    /// The run was aborted.
    Aborted,
    /// A task flagged `exits` completed. The status is kept so that the next
    /// run resumes right after it.
    Exited { group: GroupId, task: TaskId },
}

impl Outcome {
    /// Exit code a process should use after this outcome.
    pub fn exit_code(&self) -> i32 {
        match self {
            Outcome::Finished => 0,
            Outcome::Aborted => 1,
            Outcome::Exited { .. } => EXIT_CODE_CONTINUE,
        }
    }

    pub(crate) fn state(&self) -> WorkflowState {
        match self {
            Outcome::Finished => WorkflowState::Finished,
            Outcome::Aborted => WorkflowState::Aborted,
            Outcome::Exited { .. } => WorkflowState::Exited,
        }
    }
}
