use std::collections::HashMap;

use async_trait::async_trait;
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::types::{Session, Task};

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("task not found: {0}")]
    TaskNotFound(Uuid),
    #[error("session not found: {0}")]
    SessionNotFound(Uuid),
    #[error("storage error: {0}")]
    Backend(String),
}

pub type Result<T> = std::result::Result<T, StoreError>;

// ---------------------------------------------------------------------------
// Store traits
// ---------------------------------------------------------------------------

/// Narrow persistence interface for tasks. Real persistence lives outside
/// the orchestrator; the in-memory implementations below back tests and
/// standalone daemon runs.
#[async_trait]
pub trait TaskStore: Send + Sync {
    async fn find_by_id(&self, id: Uuid) -> Result<Task>;
    async fn list(&self) -> Result<Vec<Task>>;
    async fn save(&self, task: Task) -> Result<()>;
    async fn delete(&self, id: Uuid) -> Result<()>;
}

/// Narrow persistence interface for sessions.
#[async_trait]
pub trait SessionStore: Send + Sync {
    async fn find_by_id(&self, id: Uuid) -> Result<Session>;
    async fn find_by_task(&self, task_id: Uuid) -> Result<Vec<Session>>;
    /// The task's non-terminal session, if one exists. At most one is
    /// allowed at a time; the lifecycle manager enforces that.
    async fn find_active_for_task(&self, task_id: Uuid) -> Result<Option<Session>>;
    async fn list(&self) -> Result<Vec<Session>>;
    async fn save(&self, session: Session) -> Result<()>;
}

// ---------------------------------------------------------------------------
// In-memory implementations
// ---------------------------------------------------------------------------

#[derive(Default)]
pub struct MemoryTaskStore {
    tasks: RwLock<HashMap<Uuid, Task>>,
}

impl MemoryTaskStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl TaskStore for MemoryTaskStore {
    async fn find_by_id(&self, id: Uuid) -> Result<Task> {
        self.tasks
            .read()
            .await
            .get(&id)
            .cloned()
            .ok_or(StoreError::TaskNotFound(id))
    }

    async fn list(&self) -> Result<Vec<Task>> {
        let mut tasks: Vec<Task> = self.tasks.read().await.values().cloned().collect();
        tasks.sort_by_key(|t| t.created_at);
        Ok(tasks)
    }

    async fn save(&self, task: Task) -> Result<()> {
        self.tasks.write().await.insert(task.id, task);
        Ok(())
    }

    async fn delete(&self, id: Uuid) -> Result<()> {
        self.tasks
            .write()
            .await
            .remove(&id)
            .map(|_| ())
            .ok_or(StoreError::TaskNotFound(id))
    }
}

#[derive(Default)]
pub struct MemorySessionStore {
    sessions: RwLock<HashMap<Uuid, Session>>,
}

impl MemorySessionStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl SessionStore for MemorySessionStore {
    async fn find_by_id(&self, id: Uuid) -> Result<Session> {
        self.sessions
            .read()
            .await
            .get(&id)
            .cloned()
            .ok_or(StoreError::SessionNotFound(id))
    }

    async fn find_by_task(&self, task_id: Uuid) -> Result<Vec<Session>> {
        let mut sessions: Vec<Session> = self
            .sessions
            .read()
            .await
            .values()
            .filter(|s| s.task_id == task_id)
            .cloned()
            .collect();
        sessions.sort_by_key(|s| (s.attempt_number, s.created_at));
        Ok(sessions)
    }

    async fn find_active_for_task(&self, task_id: Uuid) -> Result<Option<Session>> {
        Ok(self
            .sessions
            .read()
            .await
            .values()
            .find(|s| s.task_id == task_id && !s.status.is_terminal())
            .cloned())
    }

    async fn list(&self) -> Result<Vec<Session>> {
        let mut sessions: Vec<Session> = self.sessions.read().await.values().cloned().collect();
        sessions.sort_by_key(|s| s.created_at);
        Ok(sessions)
    }

    async fn save(&self, session: Session) -> Result<()> {
        self.sessions.write().await.insert(session.id, session);
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
