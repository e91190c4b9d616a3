//! Task groups.
//!
//! A group is an ordered list of tasks that run one after the other. A group
//! can be skipped as a whole: if its `skip_cmd` exits with status 0 when the
//! workflow starts, none of its tasks run.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::HashSet;
use std::path::Path;
use std::process::Stdio;
use tokio::process::Command;

use super::environment::Environment;
use super::progress::Progress;
use super::task::Task;
use super::types::GroupId;
use crate::config::ConfigError;

/// A group of tasks and its execution state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Group {
    pub id: GroupId,
    pub tasks: Vec<Task>,
    /// Shell predicate; the group is skipped when it exits with 0.
    /// Empty means never skip.
    #[serde(default)]
    pub skip_cmd: String,
    /// Cached skip decision, fixed for the duration of a run.
    #[serde(default)]
    pub skip: bool,

    #[serde(default)]
    pub started: bool,
    #[serde(default)]
    pub finished: bool,
    /// Completion between 0 and 100.
    #[serde(default)]
    pub percent: f64,
    #[serde(default)]
    pub last_message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl Group {
    pub fn new(id: impl Into<GroupId>, tasks: Vec<Task>) -> Self {
        Self {
            id: id.into(),
            tasks,
            skip_cmd: String::new(),
            skip: false,
            started: false,
            finished: false,
            percent: 0.0,
            last_message: String::new(),
            error: None,
        }
    }

    /// Builder: set the skip predicate.
    pub fn with_skip_cmd(mut self, skip_cmd: impl Into<String>) -> Self {
        self.skip_cmd = skip_cmd.into();
        self
    }

    /// Build a group from its declarative definition.
    pub fn from_map(map: &Map<String, Value>) -> Result<Self, ConfigError> {
        let id = map
            .get("id")
            .and_then(Value::as_str)
            .ok_or(ConfigError::GroupMissingId)?;

        let entries = match map.get("tasks").and_then(Value::as_array) {
            Some(entries) if !entries.is_empty() => entries,
            _ => return Err(ConfigError::GroupMissingTasks(id.to_string())),
        };

        let mut seen = HashSet::new();
        let mut tasks = Vec::with_capacity(entries.len());
        for entry in entries {
            let task = entry
                .as_object()
                .ok_or(ConfigError::TaskMissingId)
                .and_then(Task::from_map)?;

            if !seen.insert(task.id.clone()) {
                return Err(ConfigError::Duplicate(format!("{}/{}", id, task.id)));
            }
            tasks.push(task);
        }

        let skip_cmd = map
            .get("skip_cmd")
            .and_then(Value::as_str)
            .unwrap_or_default();

        Ok(Self::new(id, tasks).with_skip_cmd(skip_cmd))
    }

    /// Evaluate the skip predicate.
    ///
    /// The predicate runs through `bash` in `base_dir` with the workflow
    /// variables in its environment. Its output is discarded. Any failure to
    /// run it counts as "do not skip".
    pub async fn should_skip(&self, env: &Environment, base_dir: &Path) -> bool {
        if self.skip_cmd.is_empty() {
            return false;
        }

        let status = Command::new("bash")
            .arg("-c")
            .arg(&self.skip_cmd)
            .current_dir(base_dir)
            .envs(env.iter())
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status()
            .await;

        match status {
            Ok(status) => {
                tracing::debug!(group = %self.id, status = %status, "evaluated skip predicate");
                status.success()
            }
            Err(e) => {
                tracing::warn!(group = %self.id, error = %e, "failed to run skip predicate");
                false
            }
        }
    }

    /// Mark the group and every task in it as started and finished without
    /// running anything.
    pub fn mark_finished(&mut self) {
        self.started = true;
        self.finished = true;
        for task in &mut self.tasks {
            task.mark_finished();
        }
    }

    /// Recompute the cached `percent` and `finished` fields from the tasks.
    pub fn refresh_progress(&mut self) -> Progress {
        let (progress, finished) = Progress::of_tasks(&self.tasks);
        self.finished = finished;
        self.percent = progress.percent();
        progress
    }

    /// Find a task by id.
    pub fn task(&self, id: &str) -> Option<&Task> {
        self.tasks.iter().find(|t| t.id.as_str() == id)
    }

    /// Record an error unless one is already set.
    pub fn record_error(&mut self, message: &str) -> bool {
        if self.error.is_some() {
            return false;
        }
        self.error = Some(message.to_string());
        true
    }
}
