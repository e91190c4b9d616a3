//! Task execution.
//!
//! This module runs task scripts as subprocesses and defines the line
//! protocol scripts use to report output, progress and errors.

mod executor;
pub mod protocol;

pub use executor::{AbortHandle, TaskExecutor};
pub use protocol::{Message, ProtocolError};
