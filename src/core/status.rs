//! The persisted workflow status.
//!
//! [`Status`] is the single aggregate the orchestrator mutates. It is written
//! to the status file after every change and pushed to every observer, so its
//! serialized shape is the wire format for both.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use super::environment::Environment;
use super::group::Group;
use super::progress::Progress;
use super::task::Task;
use super::types::{GroupId, TaskId};

/// Everything known about a workflow run.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Status {
    /// Snapshot of the parsed definition document. Later edits to the file on
    /// disk do not affect a run in progress.
    #[serde(default)]
    pub definition: Map<String, Value>,
    /// Resolved variables, `None` until resolution ran.
    #[serde(default)]
    pub vars: Option<Environment>,
    pub groups: Vec<Group>,

    #[serde(default)]
    pub started: bool,
    #[serde(default)]
    pub finished: bool,
    /// Completion between 0 and 100, truncated.
    #[serde(default)]
    pub percent: u8,
    /// Last `output` line reported by any task.
    #[serde(default)]
    pub last_message: String,

    #[serde(default)]
    pub current_group: Option<GroupId>,
    #[serde(default)]
    pub current_task: Option<TaskId>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl Status {
    /// A fresh status for the given definition snapshot and groups.
    pub fn new(definition: Map<String, Value>, groups: Vec<Group>) -> Self {
        Self {
            definition,
            groups,
            ..Self::default()
        }
    }

    /// Recompute group and workflow progress from the task records.
    pub fn refresh_progress(&mut self) -> Progress {
        for group in &mut self.groups {
            group.refresh_progress();
        }
        let progress = Progress::of_groups(&self.groups);
        self.percent = progress.whole_percent();
        progress
    }

    /// Whether a previous run stopped while a task was current.
    pub fn is_resumable(&self) -> bool {
        self.started && !self.finished && self.current_task.is_some()
    }

    /// Find a group by id.
    pub fn group(&self, id: &str) -> Option<&Group> {
        self.groups.iter().find(|g| g.id.as_str() == id)
    }

    /// The task currently marked as running, if any.
    pub fn current(&self) -> Option<(&Group, &Task)> {
        let group = self.group(self.current_group.as_ref()?.as_str())?;
        let task = group.task(self.current_task.as_ref()?.as_str())?;
        Some((group, task))
    }

    /// Record an error on a task, its group and the workflow. Each level
    /// keeps the first error it was given.
    pub fn record_error(&mut self, group: usize, task: usize, message: &str) {
        if let Some(g) = self.groups.get_mut(group) {
            if let Some(t) = g.tasks.get_mut(task) {
                t.record_error(message);
            }
            g.record_error(message);
        }
        if self.error.is_none() {
            self.error = Some(message.to_string());
        }
    }

    /// Record an `output` line on a group and the workflow.
    pub fn record_message(&mut self, group: usize, message: &str) {
        if let Some(g) = self.groups.get_mut(group) {
            g.last_message = message.to_string();
        }
        self.last_message = message.to_string();
    }

    /// Serialize for persistence and observers.
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}
