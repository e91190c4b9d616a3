//! Workflow orchestration.
//!
//! This module provides the state machine that walks groups and tasks in
//! order, resumes interrupted runs, and reports every change to the status
//! store and to subscribers.

mod engine;
mod types;

pub use engine::Workflow;
pub use types::{ABORTED_MESSAGE, EXIT_CODE_CONTINUE, Outcome, WorkflowError, WorkflowState};
