//! HTTP API error types.
//!
//! Provides a unified `ApiError` enum for consistent error responses
//! across the HTTP API layer. Every response body carries the message
//! plus a machine-checkable `kind`.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use thiserror::Error;

use fm_gate::gate::GateError;
use fm_gate::git::GitApprovalError;
use fm_hooks::model::HookError;
use fm_session::manager::SessionError;

// ---------------------------------------------------------------------------
// Error types
// ---------------------------------------------------------------------------

/// Errors that can occur in the HTTP API layer.
#[derive(Debug, Error)]
pub enum ApiError {
    /// The requested resource was not found.
    #[error("not found: {0}")]
    NotFound(String),

    /// The request was malformed or invalid.
    #[error("validation error: {0}")]
    Validation(String),

    /// The request conflicts with current state.
    #[error("conflict: {0}")]
    Conflict(String),

    /// An illegal state transition was attempted.
    #[error("invalid transition: {0}")]
    InvalidTransition(String),

    /// An internal server error occurred.
    #[error("internal error: {0}")]
    Internal(String),
}

impl ApiError {
    /// Stable machine-checkable error kind.
    pub fn kind(&self) -> &'static str {
        match self {
            ApiError::NotFound(_) => "not_found",
            ApiError::Validation(_) => "validation",
            ApiError::Conflict(_) => "conflict",
            ApiError::InvalidTransition(_) => "invalid_transition",
            ApiError::Internal(_) => "internal",
        }
    }

    fn status(&self) -> StatusCode {
        match self {
            ApiError::NotFound(_) => StatusCode::NOT_FOUND,
            ApiError::Validation(_) => StatusCode::BAD_REQUEST,
            ApiError::Conflict(_) => StatusCode::CONFLICT,
            ApiError::InvalidTransition(_) => StatusCode::CONFLICT,
            ApiError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = Json(json!({
            "error": self.to_string(),
            "kind": self.kind(),
        }));
        (self.status(), body).into_response()
    }
}

// ---------------------------------------------------------------------------
// Domain error mappings
// ---------------------------------------------------------------------------

impl From<HookError> for ApiError {
    fn from(e: HookError) -> Self {
        match e {
            HookError::Validation(msg) => ApiError::Validation(msg),
            HookError::NotFound(id) => ApiError::NotFound(format!("hook {id}")),
            HookError::Store(msg) => ApiError::Internal(msg),
        }
    }
}

impl From<SessionError> for ApiError {
    fn from(e: SessionError) -> Self {
        match e {
            SessionError::TaskNotFound(id) => ApiError::NotFound(format!("task {id}")),
            SessionError::NotFound(id) => ApiError::NotFound(format!("session {id}")),
            SessionError::Conflict { task_id, existing } => ApiError::Conflict(format!(
                "task {task_id} already has an active session: {existing}"
            )),
            SessionError::InvalidTransition(t) => ApiError::InvalidTransition(t.to_string()),
            SessionError::NoResumeSource(task_id) => {
                ApiError::Validation(format!("no prior session to resume for task {task_id}"))
            }
            SessionError::NotRunning(id) => {
                ApiError::InvalidTransition(format!("session {id} is not running"))
            }
            SessionError::Store(e) => ApiError::Internal(e.to_string()),
        }
    }
}

impl From<GateError> for ApiError {
    fn from(e: GateError) -> Self {
        match e {
            GateError::NotFound(id) => ApiError::NotFound(format!("approval {id}")),
        }
    }
}

impl From<GitApprovalError> for ApiError {
    fn from(e: GitApprovalError) -> Self {
        match e {
            GitApprovalError::NotFound(id) => ApiError::NotFound(format!("commit approval {id}")),
            GitApprovalError::AlreadyResolved(id) => {
                ApiError::Conflict(format!("commit approval {id} already resolved"))
            }
            GitApprovalError::Backend(msg) => ApiError::Internal(msg),
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn error_payload_carries_kind() {
        let response = ApiError::Conflict("busy".into()).into_response();
        assert_eq!(response.status(), StatusCode::CONFLICT);

        let body = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let json: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(json["kind"], "conflict");
        assert!(json["error"].as_str().unwrap().contains("busy"));
    }

    #[test]
    fn status_mapping() {
        assert_eq!(ApiError::NotFound("x".into()).status(), StatusCode::NOT_FOUND);
        assert_eq!(ApiError::Validation("x".into()).status(), StatusCode::BAD_REQUEST);
        assert_eq!(ApiError::Conflict("x".into()).status(), StatusCode::CONFLICT);
        assert_eq!(
            ApiError::Internal("x".into()).status(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }
}
