//! Core data model: identifiers, tasks, groups, progress and the workflow
//! status.

pub mod environment;
pub mod group;
pub mod progress;
pub mod status;
pub mod task;
pub mod types;

pub use environment::Environment;
pub use group::Group;
pub use progress::Progress;
pub use status::Status;
pub use task::{Task, TaskError};
pub use types::{GroupId, SubscriberId, TaskId};
