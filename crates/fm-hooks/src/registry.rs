use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::model::{Hook, HookContext, HookError, HookScope, Result};

// ---------------------------------------------------------------------------
// HookStore
// ---------------------------------------------------------------------------

/// Narrow persistence interface for hook definitions. Hooks are read-only
/// during matching and execution; writes happen only through admin
/// operations on the registry.
#[async_trait]
pub trait HookStore: Send + Sync {
    async fn find_by_id(&self, id: Uuid) -> Result<Hook>;
    /// All hooks in creation order.
    async fn list(&self) -> Result<Vec<Hook>>;
    async fn save(&self, hook: Hook) -> Result<()>;
    async fn delete(&self, id: Uuid) -> Result<()>;
}

/// In-memory store; keeps hooks in creation order so priority ties break
/// deterministically.
#[derive(Default)]
pub struct MemoryHookStore {
    hooks: RwLock<Vec<Hook>>,
}

impl MemoryHookStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl HookStore for MemoryHookStore {
    async fn find_by_id(&self, id: Uuid) -> Result<Hook> {
        self.hooks
            .read()
            .await
            .iter()
            .find(|h| h.id == id)
            .cloned()
            .ok_or(HookError::NotFound(id))
    }

    async fn list(&self) -> Result<Vec<Hook>> {
        Ok(self.hooks.read().await.clone())
    }

    async fn save(&self, hook: Hook) -> Result<()> {
        let mut hooks = self.hooks.write().await;
        if let Some(existing) = hooks.iter_mut().find(|h| h.id == hook.id) {
            *existing = hook;
        } else {
            hooks.push(hook);
        }
        Ok(())
    }

    async fn delete(&self, id: Uuid) -> Result<()> {
        let mut hooks = self.hooks.write().await;
        let before = hooks.len();
        hooks.retain(|h| h.id != id);
        if hooks.len() == before {
            return Err(HookError::NotFound(id));
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// HookRegistry
// ---------------------------------------------------------------------------

/// Stores hook definitions and matches an event + context to the ordered
/// set of applicable hooks.
pub struct HookRegistry {
    store: Arc<dyn HookStore>,
}

impl HookRegistry {
    pub fn new(store: Arc<dyn HookStore>) -> Self {
        Self { store }
    }

    /// Create a hook. Malformed type-specific config is rejected with a
    /// validation error before anything is persisted.
    pub async fn create(&self, hook: Hook) -> Result<Hook> {
        hook.validate()?;
        self.store.save(hook.clone()).await?;
        tracing::debug!(hook = %hook.name, event = %hook.event, "hook created");
        Ok(hook)
    }

    /// Update an existing hook; same validation contract as `create`.
    pub async fn update(&self, mut hook: Hook) -> Result<Hook> {
        hook.validate()?;
        // Preserve original creation time so priority ties stay stable.
        let existing = self.store.find_by_id(hook.id).await?;
        hook.created_at = existing.created_at;
        hook.updated_at = chrono::Utc::now();
        self.store.save(hook.clone()).await?;
        Ok(hook)
    }

    pub async fn delete(&self, id: Uuid) -> Result<()> {
        self.store.delete(id).await
    }

    pub async fn get(&self, id: Uuid) -> Result<Hook> {
        self.store.find_by_id(id).await
    }

    pub async fn list(&self) -> Result<Vec<Hook>> {
        self.store.list().await
    }

    /// Enabled hooks matching `event` and satisfied by `ctx`, ordered by
    /// ascending priority; ties break by creation order.
    pub async fn find_matching(&self, ctx: &HookContext) -> Result<Vec<Hook>> {
        let mut matched: Vec<Hook> = self
            .store
            .list()
            .await?
            .into_iter()
            .filter(|h| h.enabled && h.event == ctx.event)
            .filter(|h| scope_matches(&h.scope, ctx))
            .filter(|h| filters_match(h, ctx))
            .collect();
        // Stable sort keeps creation order for equal priorities.
        matched.sort_by_key(|h| h.priority);
        Ok(matched)
    }
}

fn scope_matches(scope: &HookScope, ctx: &HookContext) -> bool {
    match scope {
        HookScope::Global => true,
        HookScope::Project(id) => ctx.project_id == Some(*id),
        HookScope::Task(id) => ctx.task_id == Some(*id),
    }
}

fn filters_match(hook: &Hook, ctx: &HookContext) -> bool {
    let filters = &hook.filters;
    if hook.event.is_tool_event() {
        if let Some(tool_names) = &filters.tool_names {
            match &ctx.tool_name {
                Some(name) if tool_names.contains(name) => {}
                _ => return false,
            }
        }
    }
    if hook.event.is_status_event() {
        if let Some(statuses) = &filters.statuses {
            match &ctx.status {
                Some(status) if statuses.contains(status) => {}
                _ => return false,
            }
        }
    }
    if hook.event.is_session_event() {
        if let Some(providers) = &filters.providers {
            match ctx.provider {
                Some(provider) if providers.contains(&provider) => {}
                _ => return false,
            }
        }
    }
    true
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
