use std::sync::Arc;

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
    Json,
};
use uuid::Uuid;

use fm_session::manager::StartOptions;

use crate::api_error::ApiError;

use super::state::ApiState;

/// POST /api/tasks/{id}/sessions -- start a session against a task,
/// applying resume-mode semantics. A spawn failure still answers 201;
/// the returned session is in `failed` state and `session:error` fired.
pub(crate) async fn start_session(
    State(state): State<Arc<ApiState>>,
    Path(task_id): Path<Uuid>,
    Json(opts): Json<StartOptions>,
) -> Result<impl IntoResponse, ApiError> {
    let session = state.manager.start(task_id, opts).await?;
    Ok((StatusCode::CREATED, Json(session)))
}

/// GET /api/tasks/{id}/sessions -- the task's session chain.
pub(crate) async fn list_task_sessions(
    State(state): State<Arc<ApiState>>,
    Path(task_id): Path<Uuid>,
) -> Result<impl IntoResponse, ApiError> {
    Ok(Json(state.manager.list_for_task(task_id).await?))
}

/// GET /api/sessions/{id}
pub(crate) async fn get_session(
    State(state): State<Arc<ApiState>>,
    Path(id): Path<Uuid>,
) -> Result<impl IntoResponse, ApiError> {
    Ok(Json(state.manager.get(id).await?))
}

/// POST /api/sessions/{id}/pause
pub(crate) async fn pause_session(
    State(state): State<Arc<ApiState>>,
    Path(id): Path<Uuid>,
) -> Result<impl IntoResponse, ApiError> {
    Ok(Json(state.manager.pause(id).await?))
}

/// POST /api/sessions/{id}/resume
pub(crate) async fn resume_session(
    State(state): State<Arc<ApiState>>,
    Path(id): Path<Uuid>,
) -> Result<impl IntoResponse, ApiError> {
    Ok(Json(state.manager.resume(id).await?))
}

/// POST /api/sessions/{id}/stop -- idempotent cancel.
pub(crate) async fn stop_session(
    State(state): State<Arc<ApiState>>,
    Path(id): Path<Uuid>,
) -> Result<impl IntoResponse, ApiError> {
    Ok(Json(state.manager.stop(id).await?))
}
