//! API response types.

use serde::Serialize;

use crate::workflow::WorkflowState;

/// Health check response.
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub version: &'static str,
}

impl Default for HealthResponse {
    fn default() -> Self {
        Self {
            status: "ok",
            version: env!("CARGO_PKG_VERSION"),
        }
    }
}

/// Workflow state response.
#[derive(Debug, Serialize)]
pub struct StateResponse {
    pub state: WorkflowState,
    pub is_running: bool,
}

impl From<WorkflowState> for StateResponse {
    fn from(state: WorkflowState) -> Self {
        Self {
            state,
            is_running: state == WorkflowState::Running,
        }
    }
}

/// Simple message response.
#[derive(Debug, Serialize)]
pub struct MessageResponse {
    pub message: String,
}

impl MessageResponse {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}
