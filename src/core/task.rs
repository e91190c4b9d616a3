//! Task records and error types.
//!
//! A [`Task`] is one shell script of a group, together with the execution
//! state the orchestrator tracks for it. The process itself is driven by
//! [`TaskExecutor`](crate::execution::TaskExecutor).
//!
//! You can give tasks a weight to get a meaningful progress percentage: a
//! task known to run quickly can weigh 5 while a long one weighs 100.
//!
//! If `exits` is set, the orchestrator stops the process after the task
//! completes, and the next run picks up right after it. This is meant for
//! reboots and self upgrades.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;

use super::types::TaskId;
use crate::config::ConfigError;

/// Errors that can occur while running a task.
#[derive(Debug, Error)]
pub enum TaskError {
    /// The subprocess could not be started.
    #[error("failed to start command: {0}")]
    Spawn(#[source] std::io::Error),

    /// Waiting for the subprocess failed.
    #[error("failed to wait for command: {0}")]
    Wait(#[source] std::io::Error),

    /// The message channel to the subprocess could not be set up or drained.
    #[error("ipc channel error: {0}")]
    Ipc(#[source] std::io::Error),

    /// The subprocess exited with a non-zero code.
    #[error("exit status {code}")]
    CommandFailed { code: i32 },

    /// The subprocess was killed by a signal.
    #[error("terminated by signal {signal}")]
    Signaled { signal: i32 },

    /// The run was cancelled before the task could start.
    #[error("task cancelled")]
    Cancelled,

    /// A dedicated output pipe was requested twice.
    #[error("{0} already set")]
    PipeAlreadyTaken(&'static str),
}

fn default_weight() -> u32 {
    1
}

/// A shell task and its execution state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Task {
    pub id: TaskId,
    /// Shell script body.
    pub cmd: String,
    /// Relative weight used for progress only.
    #[serde(default = "default_weight")]
    pub weight: u32,
    /// Terminate the process once this task completes.
    #[serde(default)]
    pub exits: bool,

    #[serde(default)]
    pub started: bool,
    #[serde(default)]
    pub finished: bool,
    /// Self-reported progress, between 0.0 and 1.0.
    #[serde(default)]
    pub percent: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl Task {
    /// Create a task with default weight.
    pub fn new(id: impl Into<TaskId>, cmd: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            cmd: cmd.into(),
            weight: 1,
            exits: false,
            started: false,
            finished: false,
            percent: 0.0,
            error: None,
        }
    }

    /// Builder: set the weight. Zero is raised to 1.
    pub fn with_weight(mut self, weight: u32) -> Self {
        self.weight = weight.max(1);
        self
    }

    /// Builder: mark the task as terminating the process.
    pub fn with_exits(mut self, exits: bool) -> Self {
        self.exits = exits;
        self
    }

    /// Build a task from its declarative definition.
    ///
    /// `id` and a non-empty `cmd` are required. `weight` defaults to 1 and
    /// any non-positive value is treated as 1.
    pub fn from_map(map: &Map<String, Value>) -> Result<Self, ConfigError> {
        let id = map
            .get("id")
            .and_then(Value::as_str)
            .ok_or(ConfigError::TaskMissingId)?;

        let cmd = match map.get("cmd").and_then(Value::as_str) {
            Some(cmd) if !cmd.is_empty() => cmd,
            _ => return Err(ConfigError::TaskMissingCommand(id.to_string())),
        };

        let weight = map
            .get("weight")
            .and_then(Value::as_i64)
            .filter(|w| *w > 0)
            .map(|w| u32::try_from(w).unwrap_or(u32::MAX))
            .unwrap_or(1);

        let exits = map.get("exits").and_then(Value::as_bool).unwrap_or(false);

        Ok(Self::new(id, cmd).with_weight(weight).with_exits(exits))
    }

    /// Record self-reported progress, clamped into `[0, 1]`.
    pub fn set_progress(&mut self, percent: f64) {
        self.percent = percent.clamp(0.0, 1.0);
    }

    /// Mark the task as completed. Finished tasks always count as fully done.
    pub fn mark_finished(&mut self) {
        self.started = true;
        self.finished = true;
        self.percent = 1.0;
    }

    /// Record an error unless one is already set. Returns whether it was set.
    pub fn record_error(&mut self, message: &str) -> bool {
        if self.error.is_some() {
            return false;
        }
        self.error = Some(message.to_string());
        true
    }
}
