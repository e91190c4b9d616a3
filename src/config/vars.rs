//! Variable resolution.
//!
//! Each variable is defined by a shell command. Its value is the trimmed
//! standard output of that command, run with `sh -c` in the directory of the
//! definition file.

use std::collections::BTreeMap;
use std::path::Path;
use std::process::Stdio;
use tokio::process::Command;

use super::error::ConfigError;
use crate::core::environment::Environment;

/// Run every variable command and collect the values.
///
/// Fails on the first command that cannot be started or exits non-zero.
pub async fn resolve(
    commands: &BTreeMap<String, String>,
    base_dir: &Path,
) -> Result<Environment, ConfigError> {
    let mut env = Environment::new();

    for (name, command) in commands {
        let output = Command::new("sh")
            .arg("-c")
            .arg(command)
            .current_dir(base_dir)
            .stdin(Stdio::null())
            .output()
            .await
            .map_err(|e| ConfigError::Variable {
                name: name.clone(),
                reason: e.to_string(),
            })?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            tracing::error!(
                var = %name,
                status = %output.status,
                stderr = %stderr.trim(),
                "error while initializing variable"
            );
            return Err(ConfigError::Variable {
                name: name.clone(),
                reason: output.status.to_string(),
            });
        }

        let value = String::from_utf8_lossy(&output.stdout).trim().to_string();
        tracing::debug!(var = %name, "resolved variable");
        env.set(name.clone(), value);
    }

    Ok(env)
}
