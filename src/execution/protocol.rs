//! Line protocol spoken between a task script and the orchestrator.
//!
//! Scripts report structured information by writing single lines to the
//! named pipe whose path is in `$WFOUT`:
//!
//! ```text
//! output:: <message>
//! progress:: <number between 0 and 1>
//! error:: <description>
//! ```
//!
//! The shell functions `output`, `progress` and `error` defined by [`PRELUDE`]
//! write these lines for the script. The orchestrator itself writes
//! [`END_LINE`] once the script has exited, which tells the reader that
//! everything before it has been drained.

use thiserror::Error;

/// Name of the environment variable holding the pipe path.
pub const WFOUT_VAR: &str = "WFOUT";

/// Stream terminator written by the orchestrator, never by scripts.
pub const END_LINE: &str = "end::\n";

const OUTPUT_PREFIX: &str = "output:: ";
const PROGRESS_PREFIX: &str = "progress:: ";
const ERROR_PREFIX: &str = "error:: ";
const END_MARKER: &str = "end::";

/// Shell functions prepended to every task script.
pub const PRELUDE: &str = r#"
function output() {
    [ -p "$WFOUT" ] && echo "output:: $*" > "$WFOUT"
}
function progress() {
    [ -p "$WFOUT" ] && echo "progress:: $*" > "$WFOUT"
}
function error() {
    [ -p "$WFOUT" ] && echo "error:: $*" > "$WFOUT"
}
"#;

/// A structured message received from a task script.
#[derive(Debug, Clone, PartialEq)]
pub enum Message {
    /// Free-form status line.
    Output(String),
    /// Relative progress of the current task, not yet clamped.
    Progress(f64),
    /// Self-reported failure description.
    Error(String),
    /// End of stream.
    End,
}

/// Lines that cannot be turned into a [`Message`].
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ProtocolError {
    /// The line does not start with a known prefix.
    #[error("unrecognized line: {0:?}")]
    Unrecognized(String),

    /// The payload of a `progress` line is not a finite number.
    #[error("unable to parse progress: {0:?}")]
    InvalidProgress(String),
}

impl Message {
    /// Classify one line by its exact prefix. A trailing newline is ignored
    /// and payloads are whitespace-trimmed.
    pub fn parse(line: &str) -> Result<Self, ProtocolError> {
        let line = line.strip_suffix('\n').unwrap_or(line);

        if line == END_MARKER {
            return Ok(Message::End);
        }
        if let Some(payload) = line.strip_prefix(OUTPUT_PREFIX) {
            return Ok(Message::Output(payload.trim().to_string()));
        }
        if let Some(payload) = line.strip_prefix(ERROR_PREFIX) {
            return Ok(Message::Error(payload.trim().to_string()));
        }
        if let Some(payload) = line.strip_prefix(PROGRESS_PREFIX) {
            let payload = payload.trim();
            return match payload.parse::<f64>() {
                Ok(value) if value.is_finite() => Ok(Message::Progress(value)),
                _ => Err(ProtocolError::InvalidProgress(payload.to_string())),
            };
        }

        Err(ProtocolError::Unrecognized(line.to_string()))
    }
}
