//! Configuration error types.
//!
//! This module defines error types for loading and validating workflow
//! definitions and resolving their variables.

use std::path::PathBuf;
use thiserror::Error;

/// Errors that can occur when loading a workflow definition.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Failed to read a definition file.
    #[error("failed to read file '{path}': {source}")]
    FileRead {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Failed to parse YAML.
    #[error("YAML parse error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    /// Failed to parse YAML from a specific file.
    #[error("YAML parse error in '{path}': {source}")]
    YamlFile {
        path: PathBuf,
        #[source]
        source: serde_yaml::Error,
    },

    /// The document has no `groups` list.
    #[error("no group definitions found")]
    NoGroups,

    /// The `vars` entry is not a map of shell commands.
    #[error("invalid variables definition")]
    InvalidVars,

    /// A group has no `id`.
    #[error("group missing id")]
    GroupMissingId,

    /// A group has no `tasks`, or an empty list.
    #[error("group '{0}' missing tasks")]
    GroupMissingTasks(String),

    /// A task has no `id`.
    #[error("task missing id")]
    TaskMissingId,

    /// A task has no `cmd`, or an empty one.
    #[error("task '{0}' missing cmd")]
    TaskMissingCommand(String),

    /// Two groups, or two tasks of one group, share an id.
    #[error("duplicate id: {0}")]
    Duplicate(String),

    /// A variable command could not be evaluated.
    #[error("failed to initialize variable {name}: {reason}")]
    Variable { name: String, reason: String },
}
