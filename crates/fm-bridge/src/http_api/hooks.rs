use std::sync::Arc;

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
    Json,
};
use serde::Deserialize;
use uuid::Uuid;

use fm_core::types::ProviderKind;
use fm_hooks::model::{Hook, HookConfig, HookContext, HookFilters, HookScope, LifecycleEvent};

use crate::api_error::ApiError;

use super::state::ApiState;

fn default_enabled() -> bool {
    true
}

#[derive(Debug, Deserialize)]
pub(crate) struct CreateHookRequest {
    name: String,
    event: String,
    config: HookConfig,
    #[serde(default)]
    scope: Option<HookScope>,
    #[serde(default)]
    filters: HookFilters,
    #[serde(default = "default_enabled")]
    enabled: bool,
    #[serde(default)]
    priority: i8,
}

#[derive(Debug, Deserialize)]
pub(crate) struct UpdateHookRequest {
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    event: Option<String>,
    #[serde(default)]
    config: Option<HookConfig>,
    #[serde(default)]
    scope: Option<HookScope>,
    #[serde(default)]
    filters: Option<HookFilters>,
    #[serde(default)]
    enabled: Option<bool>,
    #[serde(default)]
    priority: Option<i8>,
}

#[derive(Debug, Deserialize, Default)]
pub(crate) struct EventContextRequest {
    #[serde(default)]
    event: Option<String>,
    #[serde(default)]
    session_id: Option<Uuid>,
    #[serde(default)]
    task_id: Option<Uuid>,
    #[serde(default)]
    project_id: Option<Uuid>,
    #[serde(default)]
    provider: Option<ProviderKind>,
    #[serde(default)]
    tool_name: Option<String>,
    #[serde(default)]
    status: Option<String>,
    #[serde(default)]
    payload: serde_json::Value,
}

impl EventContextRequest {
    fn into_context(self, event: LifecycleEvent) -> HookContext {
        HookContext {
            event,
            session_id: self.session_id,
            task_id: self.task_id,
            project_id: self.project_id,
            provider: self.provider,
            tool_name: self.tool_name,
            status: self.status,
            payload: self.payload,
        }
    }
}

fn parse_event(name: &str) -> Result<LifecycleEvent, ApiError> {
    name.parse::<LifecycleEvent>().map_err(ApiError::from)
}

/// GET /api/hooks -- list all hooks in creation order.
pub(crate) async fn list_hooks(
    State(state): State<Arc<ApiState>>,
) -> Result<impl IntoResponse, ApiError> {
    let hooks = state.hooks.list().await?;
    Ok(Json(hooks))
}

/// POST /api/hooks -- create a hook; malformed config is rejected before
/// anything is persisted.
pub(crate) async fn create_hook(
    State(state): State<Arc<ApiState>>,
    Json(req): Json<CreateHookRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let event = parse_event(&req.event)?;
    let mut hook = Hook::new(req.name, event, req.config);
    if let Some(scope) = req.scope {
        hook.scope = scope;
    }
    hook.filters = req.filters;
    hook.enabled = req.enabled;
    hook.priority = req.priority;

    let created = state.hooks.create(hook).await?;
    Ok((StatusCode::CREATED, Json(created)))
}

/// GET /api/hooks/{id}
pub(crate) async fn get_hook(
    State(state): State<Arc<ApiState>>,
    Path(id): Path<Uuid>,
) -> Result<impl IntoResponse, ApiError> {
    Ok(Json(state.hooks.get(id).await?))
}

/// PUT /api/hooks/{id} -- update; same validation contract as create.
pub(crate) async fn update_hook(
    State(state): State<Arc<ApiState>>,
    Path(id): Path<Uuid>,
    Json(req): Json<UpdateHookRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let mut hook = state.hooks.get(id).await?;
    if let Some(name) = req.name {
        hook.name = name;
    }
    if let Some(event) = req.event {
        hook.event = parse_event(&event)?;
    }
    if let Some(config) = req.config {
        hook.config = config;
    }
    if let Some(scope) = req.scope {
        hook.scope = scope;
    }
    if let Some(filters) = req.filters {
        hook.filters = filters;
    }
    if let Some(enabled) = req.enabled {
        hook.enabled = enabled;
    }
    if let Some(priority) = req.priority {
        hook.priority = priority;
    }
    Ok(Json(state.hooks.update(hook).await?))
}

/// DELETE /api/hooks/{id}
pub(crate) async fn delete_hook(
    State(state): State<Arc<ApiState>>,
    Path(id): Path<Uuid>,
) -> Result<impl IntoResponse, ApiError> {
    state.hooks.delete(id).await?;
    Ok(StatusCode::NO_CONTENT)
}

/// POST /api/hooks/{id}/test -- run one hook synchronously against a
/// sample context; no effect on production ordering.
pub(crate) async fn test_hook(
    State(state): State<Arc<ApiState>>,
    Path(id): Path<Uuid>,
    Json(req): Json<EventContextRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let hook = state.hooks.get(id).await?;
    let event = match &req.event {
        Some(name) => parse_event(name)?,
        None => hook.event,
    };
    let ctx = req.into_context(event);
    let result = state.executor.test_hook(id, &ctx).await?;
    Ok(Json(result))
}

/// POST /api/hooks/trigger -- manually fire an event through the
/// dispatcher, returning one result per matched hook.
pub(crate) async fn trigger_event(
    State(state): State<Arc<ApiState>>,
    Json(req): Json<EventContextRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let event = match &req.event {
        Some(name) => parse_event(name)?,
        None => return Err(ApiError::Validation("event is required".into())),
    };
    let ctx = req.into_context(event);
    let results = state.executor.dispatch(&ctx).await;
    Ok(Json(results))
}
