use std::sync::Arc;

use axum::{
    extract::{Path, Query, State},
    response::IntoResponse,
    Json,
};
use serde::Deserialize;
use uuid::Uuid;

use fm_gate::gate::ApprovalStatus;

use crate::api_error::ApiError;

use super::state::ApiState;

#[derive(Debug, Deserialize)]
pub(crate) struct ApprovalQuery {
    #[serde(default)]
    status: Option<String>,
}

#[derive(Debug, Deserialize, Default)]
pub(crate) struct DecideRequest {
    #[serde(default)]
    decided_by: Option<String>,
}

fn parse_status(raw: &str) -> Result<ApprovalStatus, ApiError> {
    match raw {
        "pending" => Ok(ApprovalStatus::Pending),
        "approved" => Ok(ApprovalStatus::Approved),
        "rejected" => Ok(ApprovalStatus::Rejected),
        "timeout" => Ok(ApprovalStatus::Timeout),
        other => Err(ApiError::Validation(format!("unknown status: {other}"))),
    }
}

/// GET /api/approvals?status= -- list approval requests, oldest first.
pub(crate) async fn list_approvals(
    State(state): State<Arc<ApiState>>,
    Query(query): Query<ApprovalQuery>,
) -> Result<impl IntoResponse, ApiError> {
    let status = query.status.as_deref().map(parse_status).transpose()?;
    Ok(Json(state.gate.list(status)))
}

/// GET /api/approvals/{id}
pub(crate) async fn get_approval(
    State(state): State<Arc<ApiState>>,
    Path(id): Path<Uuid>,
) -> Result<impl IntoResponse, ApiError> {
    Ok(Json(state.gate.get(id)?))
}

/// POST /api/approvals/{id}/approve -- no-op with the existing resolution
/// if the request already resolved.
pub(crate) async fn approve_request(
    State(state): State<Arc<ApiState>>,
    Path(id): Path<Uuid>,
    Json(req): Json<DecideRequest>,
) -> Result<impl IntoResponse, ApiError> {
    Ok(Json(state.gate.decide(id, true, req.decided_by).await?))
}

/// POST /api/approvals/{id}/reject
pub(crate) async fn reject_request(
    State(state): State<Arc<ApiState>>,
    Path(id): Path<Uuid>,
    Json(req): Json<DecideRequest>,
) -> Result<impl IntoResponse, ApiError> {
    Ok(Json(state.gate.decide(id, false, req.decided_by).await?))
}
