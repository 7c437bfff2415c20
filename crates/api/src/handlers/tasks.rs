//! Handlers for one-shot task submission.

use axum::extract::rejection::JsonRejection;
use axum::extract::State;
use axum::Json;
use cellcast_core::error::CoreError;
use cellcast_core::submission::TaskSubmission;
use cellcast_core::types::JobId;
use serde::Serialize;

use crate::engine::submit_job;
use crate::error::{AppError, AppResult};
use crate::state::AppState;

#[derive(Debug, Serialize)]
pub struct TaskCreated {
    pub task_id: JobId,
    pub websocket_url: String,
}

/// POST /tasks
///
/// Validate, persist and queue a task, then return at once with the
/// WebSocket URL on which its result will be delivered.
pub async fn submit_task(
    State(state): State<AppState>,
    body: Result<Json<serde_json::Value>, JsonRejection>,
) -> AppResult<Json<TaskCreated>> {
    if !state.is_accepting() {
        return Err(AppError::ServiceUnavailable("Server is shutting down".into()));
    }

    let Json(body) = body?;
    if body.is_null() {
        return Err(AppError::BadRequest("Request body is null".into()));
    }

    let submission = TaskSubmission::from_json(body)?;
    if !state.parameters.contains(&submission.mode).await {
        return Err(CoreError::Validation(format!("Unknown mode '{}'", submission.mode)).into());
    }

    let job = submit_job(&state.backend, submission).await?;

    Ok(Json(TaskCreated {
        task_id: job.id,
        websocket_url: state.config.task_ws_url(job.id),
    }))
}
