//! HTTP + WebSocket surface for the orchestrator.
//!
//! `api_router` wires every exposed operation: hook CRUD/test/trigger,
//! session start/pause/resume/stop, approval and git-approval decisions,
//! the per-session streaming endpoint, and daemon status.

mod approvals;
mod git;
mod hooks;
mod sessions;
mod state;
mod websocket;

use std::sync::Arc;

use axum::{
    extract::State,
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use tower_http::trace::TraceLayer;

pub use state::ApiState;

/// Build the full API router over shared state.
pub fn api_router(state: Arc<ApiState>) -> Router {
    Router::new()
        .route("/api/status", get(status))
        .route("/api/hooks", get(hooks::list_hooks).post(hooks::create_hook))
        .route("/api/hooks/trigger", post(hooks::trigger_event))
        .route(
            "/api/hooks/{id}",
            get(hooks::get_hook)
                .put(hooks::update_hook)
                .delete(hooks::delete_hook),
        )
        .route("/api/hooks/{id}/test", post(hooks::test_hook))
        .route(
            "/api/tasks/{id}/sessions",
            get(sessions::list_task_sessions).post(sessions::start_session),
        )
        .route("/api/sessions/{id}", get(sessions::get_session))
        .route("/api/sessions/{id}/pause", post(sessions::pause_session))
        .route("/api/sessions/{id}/resume", post(sessions::resume_session))
        .route("/api/sessions/{id}/stop", post(sessions::stop_session))
        .route("/api/sessions/{id}/ws", get(websocket::session_ws_handler))
        .route("/api/approvals", get(approvals::list_approvals))
        .route("/api/approvals/{id}", get(approvals::get_approval))
        .route("/api/approvals/{id}/approve", post(approvals::approve_request))
        .route("/api/approvals/{id}/reject", post(approvals::reject_request))
        .route("/api/git-approvals", get(git::list_git_approvals))
        .route("/api/git-approvals/{id}/approve", post(git::approve_commit))
        .route("/api/git-approvals/{id}/reject", post(git::reject_commit))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// GET /api/status -- daemon health snapshot.
async fn status(State(state): State<Arc<ApiState>>) -> impl IntoResponse {
    let sessions = state.sessions.list().await.unwrap_or_default();
    let active = sessions.iter().filter(|s| !s.status.is_terminal()).count();
    let hooks = state.hooks.list().await.map(|h| h.len()).unwrap_or(0);
    let pending_approvals = state
        .gate
        .list(Some(fm_gate::gate::ApprovalStatus::Pending))
        .len();

    Json(serde_json::json!({
        "version": env!("CARGO_PKG_VERSION"),
        "uptime_seconds": state.started_at.elapsed().as_secs(),
        "active_sessions": active,
        "total_sessions": sessions.len(),
        "hook_count": hooks,
        "pending_approvals": pending_approvals,
    }))
}
