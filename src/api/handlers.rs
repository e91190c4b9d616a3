//! API request handlers.

use axum::{Json, extract::State, http::StatusCode};
use tokio::sync::mpsc;

use crate::core::status::Status;
use crate::storage::StatusStore;
use crate::workflow::{Outcome, Workflow, WorkflowError};

use super::errors::ApiError;
use super::responses::{HealthResponse, MessageResponse, StateResponse};

/// Shared application state for API handlers.
pub struct ApiState<S> {
    pub workflow: Workflow<S>,
    /// Receives the outcome of every run started through the API.
    pub outcomes: Option<mpsc::UnboundedSender<Outcome>>,
}

impl<S> Clone for ApiState<S> {
    fn clone(&self) -> Self {
        Self {
            workflow: self.workflow.clone(),
            outcomes: self.outcomes.clone(),
        }
    }
}

impl<S: StatusStore + 'static> ApiState<S> {
    pub fn new(workflow: Workflow<S>) -> Self {
        Self {
            workflow,
            outcomes: None,
        }
    }

    /// Forward run outcomes to a channel.
    pub fn with_outcomes(mut self, outcomes: mpsc::UnboundedSender<Outcome>) -> Self {
        self.outcomes = Some(outcomes);
        self
    }
}

/// Health check endpoint.
pub async fn health() -> Json<HealthResponse> {
    Json(HealthResponse::default())
}

/// Current workflow status.
pub async fn get_status<S: StatusStore + 'static>(State(state): State<ApiState<S>>) -> Json<Status> {
    Json(state.workflow.snapshot().await)
}

/// Workflow lifecycle state.
pub async fn get_state<S: StatusStore + 'static>(
    State(state): State<ApiState<S>>,
) -> Json<StateResponse> {
    Json(StateResponse::from(state.workflow.state()))
}

/// Start a run in the background. A finished workflow is reset first.
pub async fn start_workflow<S: StatusStore + 'static>(
    State(state): State<ApiState<S>>,
) -> Result<(StatusCode, Json<MessageResponse>), ApiError> {
    let workflow = state.workflow.clone();
    if workflow.is_running() {
        return Err(WorkflowError::AlreadyRunning.into());
    }
    if workflow.snapshot().await.finished {
        workflow.reset().await?;
    }

    let outcomes = state.outcomes.clone();
    tokio::spawn(async move {
        match workflow.start().await {
            Ok(outcome) => {
                if let Some(tx) = outcomes {
                    let _ = tx.send(outcome);
                }
            }
            Err(e) => tracing::error!(error = %e, "workflow run failed"),
        }
    });

    Ok((
        StatusCode::ACCEPTED,
        Json(MessageResponse::new("workflow started")),
    ))
}

/// Abort the current run.
pub async fn abort_workflow<S: StatusStore + 'static>(
    State(state): State<ApiState<S>>,
) -> Result<Json<MessageResponse>, ApiError> {
    if !state.workflow.is_running() {
        return Err(ApiError::Conflict("workflow is not running".to_string()));
    }
    state.workflow.abort();
    Ok(Json(MessageResponse::new("workflow aborted")))
}

/// Reset a finished workflow.
pub async fn reset_workflow<S: StatusStore + 'static>(
    State(state): State<ApiState<S>>,
) -> Result<Json<MessageResponse>, ApiError> {
    state.workflow.reset().await?;
    Ok(Json(MessageResponse::new("workflow reset")))
}
