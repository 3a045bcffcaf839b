use std::sync::Arc;

use axum::{
    extract::{Path, Query, State},
    response::IntoResponse,
    Json,
};
use serde::Deserialize;
use uuid::Uuid;

use fm_gate::git::CommitApprovalStatus;

use crate::api_error::ApiError;

use super::state::ApiState;

#[derive(Debug, Deserialize)]
pub(crate) struct GitApprovalQuery {
    #[serde(default)]
    status: Option<String>,
}

#[derive(Debug, Deserialize, Default)]
pub(crate) struct RejectCommitRequest {
    #[serde(default)]
    discard_changes: bool,
}

fn parse_status(raw: &str) -> Result<CommitApprovalStatus, ApiError> {
    match raw {
        "pending" => Ok(CommitApprovalStatus::Pending),
        "approved" => Ok(CommitApprovalStatus::Approved),
        "rejected" => Ok(CommitApprovalStatus::Rejected),
        other => Err(ApiError::Validation(format!("unknown status: {other}"))),
    }
}

/// GET /api/git-approvals?status=
pub(crate) async fn list_git_approvals(
    State(state): State<Arc<ApiState>>,
    Query(query): Query<GitApprovalQuery>,
) -> Result<impl IntoResponse, ApiError> {
    let status = query.status.as_deref().map(parse_status).transpose()?;
    Ok(Json(state.git_approvals.list(status)))
}

/// POST /api/git-approvals/{id}/approve -- materialise the commit.
pub(crate) async fn approve_commit(
    State(state): State<Arc<ApiState>>,
    Path(id): Path<Uuid>,
) -> Result<impl IntoResponse, ApiError> {
    Ok(Json(state.git_approvals.approve(id).await?))
}

/// POST /api/git-approvals/{id}/reject -- optionally revert per-diff;
/// the response reports every per-diff outcome.
pub(crate) async fn reject_commit(
    State(state): State<Arc<ApiState>>,
    Path(id): Path<Uuid>,
    Json(req): Json<RejectCommitRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let (approval, revert) = state
        .git_approvals
        .reject(id, req.discard_changes)
        .await?;
    Ok(Json(serde_json::json!({
        "approval": approval,
        "revert_result": revert,
    })))
}
