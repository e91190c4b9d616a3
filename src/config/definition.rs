//! Workflow definition documents.
//!
//! A definition is a YAML document with an optional `vars` map and a list of
//! `groups`:
//!
//! ```yaml
//! vars:
//!   RELEASE: cat release.txt
//! groups:
//!   - id: prepare
//!     skip_cmd: test -f /var/lib/app/prepared
//!     tasks:
//!       - id: fetch
//!         cmd: ./fetch.sh "$RELEASE"
//!         weight: 10
//!   - id: upgrade
//!     tasks:
//!       - id: install
//!         cmd: ./install.sh
//!         weight: 50
//!       - id: reboot
//!         cmd: systemctl reboot
//!         exits: true
//! ```
//!
//! The parsed document is kept as a JSON value so it can be stored verbatim
//! in the status file and rebuilt later without touching the file on disk.

use serde_json::{Map, Value};
use std::collections::{BTreeMap, HashSet};
use std::path::Path;

use super::error::ConfigError;
use crate::core::group::Group;
use crate::core::status::Status;

/// A validated workflow definition.
#[derive(Debug, Clone, PartialEq)]
pub struct Definition {
    document: Map<String, Value>,
    vars: BTreeMap<String, String>,
    groups: Vec<Group>,
}

impl Definition {
    /// Load and validate a definition file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::FileRead {
            path: path.to_path_buf(),
            source,
        })?;
        let value: Value =
            serde_yaml::from_str(&content).map_err(|source| ConfigError::YamlFile {
                path: path.to_path_buf(),
                source,
            })?;
        Self::from_value(value)
    }

    /// Parse and validate a definition from a YAML string.
    pub fn parse(yaml: &str) -> Result<Self, ConfigError> {
        let value: Value = serde_yaml::from_str(yaml)?;
        Self::from_value(value)
    }

    /// Validate an already parsed definition document.
    pub fn from_value(value: Value) -> Result<Self, ConfigError> {
        let Value::Object(document) = value else {
            return Err(ConfigError::NoGroups);
        };

        let vars = match document.get("vars") {
            None | Some(Value::Null) => BTreeMap::new(),
            Some(Value::Object(vars)) => vars
                .iter()
                .map(|(name, cmd)| {
                    cmd.as_str()
                        .map(|cmd| (name.clone(), cmd.to_string()))
                        .ok_or(ConfigError::InvalidVars)
                })
                .collect::<Result<_, _>>()?,
            Some(_) => return Err(ConfigError::InvalidVars),
        };

        let entries = document
            .get("groups")
            .and_then(Value::as_array)
            .ok_or(ConfigError::NoGroups)?;

        let mut seen = HashSet::new();
        let mut groups = Vec::with_capacity(entries.len());
        for entry in entries {
            let group = entry
                .as_object()
                .ok_or(ConfigError::GroupMissingId)
                .and_then(Group::from_map)?;

            if !seen.insert(group.id.clone()) {
                return Err(ConfigError::Duplicate(group.id.to_string()));
            }
            groups.push(group);
        }

        Ok(Self {
            document,
            vars,
            groups,
        })
    }

    /// The parsed document as stored in the status.
    pub fn document(&self) -> &Map<String, Value> {
        &self.document
    }

    /// Variable name to shell command.
    pub fn vars(&self) -> &BTreeMap<String, String> {
        &self.vars
    }

    pub fn groups(&self) -> &[Group] {
        &self.groups
    }

    /// Total number of tasks across all groups.
    pub fn task_count(&self) -> usize {
        self.groups.iter().map(|g| g.tasks.len()).sum()
    }

    /// A fresh, never started status for this definition.
    pub fn to_status(&self) -> Status {
        Status::new(self.document.clone(), self.groups.clone())
    }
}
