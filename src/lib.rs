//! waypoint - a resumable, sequential shell task orchestrator.
//!
//! A workflow is an ordered list of groups, each an ordered list of shell
//! tasks. Progress is weighted per task and reported live to subscribers.
//! The status is persisted after every change so an interrupted run, or one
//! that exited on purpose, picks up where it stopped.

pub mod api;
pub mod config;
pub mod core;
pub mod events;
pub mod execution;
pub mod storage;
pub mod testing;
pub mod workflow;

pub use config::{ConfigError, Definition};
pub use core::{
    Environment, Group, GroupId, Progress, Status, SubscriberId, Task, TaskError, TaskId,
};
pub use events::{Broadcaster, ChannelSink, SinkError, StatusSink};
pub use execution::{AbortHandle, Message, TaskExecutor};
pub use storage::{FileStore, InMemoryStore, StatusStore, StorageError};
pub use workflow::{EXIT_CODE_CONTINUE, Outcome, Workflow, WorkflowError, WorkflowState};
