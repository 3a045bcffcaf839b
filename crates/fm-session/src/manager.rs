use std::sync::Arc;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use tracing::{error, info, warn};
use uuid::Uuid;

use fm_core::config::ProvidersConfig;
use fm_core::store::{SessionStore, StoreError, TaskStore};
use fm_core::types::{ProviderKind, ResumeMode, Session, SessionStatus, Task};
use fm_hooks::executor::HookExecutor;
use fm_hooks::model::{HookContext, LifecycleEvent};

use crate::adapter::{ProcessExit, ProviderAdapter, ResumeDirective, SpawnSpec};
use crate::state_machine::{InvalidTransition, SessionStateMachine};

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    #[error("task not found: {0}")]
    TaskNotFound(Uuid),
    #[error("session not found: {0}")]
    NotFound(Uuid),
    #[error("task {task_id} already has an active session: {existing}")]
    Conflict { task_id: Uuid, existing: Uuid },
    #[error(transparent)]
    InvalidTransition(#[from] InvalidTransition),
    #[error("no prior session to resume for task {0}")]
    NoResumeSource(Uuid),
    #[error("session {0} is not running")]
    NotRunning(Uuid),
    #[error("store error: {0}")]
    Store(#[from] StoreError),
}

pub type Result<T> = std::result::Result<T, SessionError>;

// ---------------------------------------------------------------------------
// Start options & notices
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StartOptions {
    pub resume_mode: Option<ResumeMode>,
    /// Initial prompt; defaults to the task description or title.
    pub prompt: Option<String>,
    pub model: Option<String>,
    pub provider: Option<ProviderKind>,
    /// Files the agent should look at first.
    #[serde(default)]
    pub files: Vec<String>,
}

/// Provisional status push for streaming consumers. Sent before the
/// store write completes; the session record stays authoritative.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionNotice {
    pub session_id: Uuid,
    pub task_id: Uuid,
    pub status: SessionStatus,
    pub provisional: bool,
}

// ---------------------------------------------------------------------------
// SessionLifecycleManager
// ---------------------------------------------------------------------------

struct ManagerInner {
    tasks: Arc<dyn TaskStore>,
    sessions: Arc<dyn SessionStore>,
    adapter: Arc<dyn ProviderAdapter>,
    hooks: Arc<HookExecutor>,
    providers: ProvidersConfig,
    notices: Option<flume::Sender<SessionNotice>>,
}

/// Owns the session state machine and resume-mode semantics. The single
/// mutator of canonical session status; everything else only observes.
///
/// Cheap to clone; internals live behind an `Arc`.
#[derive(Clone)]
pub struct SessionLifecycleManager {
    inner: Arc<ManagerInner>,
}

impl SessionLifecycleManager {
    pub fn new(
        tasks: Arc<dyn TaskStore>,
        sessions: Arc<dyn SessionStore>,
        adapter: Arc<dyn ProviderAdapter>,
        hooks: Arc<HookExecutor>,
        providers: ProvidersConfig,
    ) -> Self {
        Self {
            inner: Arc::new(ManagerInner {
                tasks,
                sessions,
                adapter,
                hooks,
                providers,
                notices: None,
            }),
        }
    }

    /// Attach the sender carrying provisional status pushes to the bridge.
    pub fn with_notices(
        tasks: Arc<dyn TaskStore>,
        sessions: Arc<dyn SessionStore>,
        adapter: Arc<dyn ProviderAdapter>,
        hooks: Arc<HookExecutor>,
        providers: ProvidersConfig,
        notices: flume::Sender<SessionNotice>,
    ) -> Self {
        Self {
            inner: Arc::new(ManagerInner {
                tasks,
                sessions,
                adapter,
                hooks,
                providers,
                notices: Some(notices),
            }),
        }
    }

    /// Start a session against `task_id`, applying resume-mode semantics.
    ///
    /// A spawn failure is not surfaced as an error: the returned session
    /// is in `Failed` state and `session:error` has fired.
    pub async fn start(&self, task_id: Uuid, opts: StartOptions) -> Result<Session> {
        let mut task = self
            .inner
            .tasks
            .find_by_id(task_id)
            .await
            .map_err(|_| SessionError::TaskNotFound(task_id))?;

        // At most one non-terminal session per task.
        if let Some(existing) = self.inner.sessions.find_active_for_task(task_id).await? {
            return Err(SessionError::Conflict {
                task_id,
                existing: existing.id,
            });
        }

        let prior = self.inner.sessions.find_by_task(task_id).await?;
        let source = prior.last().cloned();

        let (resume, resumed_from, provider_session_id) = match opts.resume_mode {
            None | Some(ResumeMode::Renew) => (ResumeDirective::Fresh, None, None),
            Some(ResumeMode::Retry) => {
                // Latest attempt that actually has a provider conversation.
                let (source_id, psid) = prior
                    .iter()
                    .rev()
                    .find_map(|s| s.provider_session_id.clone().map(|p| (s.id, p)))
                    .ok_or(SessionError::NoResumeSource(task_id))?;
                (
                    ResumeDirective::Resume {
                        provider_session_id: psid.clone(),
                    },
                    Some(source_id),
                    Some(psid),
                )
            }
            Some(ResumeMode::Fork) => {
                let source = source.as_ref().ok_or(SessionError::NoResumeSource(task_id))?;
                (
                    ResumeDirective::Seeded {
                        context: format!("forked-from:{}", source.id),
                    },
                    Some(source.id),
                    None,
                )
            }
        };

        task.counters.attempts += 1;
        match opts.resume_mode {
            Some(ResumeMode::Renew) => task.counters.renews += 1,
            Some(ResumeMode::Retry) => task.counters.retries += 1,
            Some(ResumeMode::Fork) => task.counters.forks += 1,
            None => {}
        }
        task.updated_at = Utc::now();

        let provider = opts.provider.unwrap_or(self.inner.providers.default);
        let mut session = Session::new(task_id, provider);
        session.resume_mode = opts.resume_mode;
        session.attempt_number = task.counters.attempts;
        session.resumed_from_session_id = resumed_from;
        session.provider_session_id = provider_session_id;
        session.model = opts.model.clone();

        self.inner.tasks.save(task.clone()).await?;
        self.inner.sessions.save(session.clone()).await?;
        self.notify(&session);

        let spec = SpawnSpec {
            session_id: session.id,
            provider,
            prompt: opts
                .prompt
                .or_else(|| task.description.clone())
                .unwrap_or_else(|| task.title.clone()),
            workdir: self
                .inner
                .providers
                .workdir
                .clone()
                .unwrap_or_else(|| ".".to_string()),
            model: opts.model,
            files: opts.files,
            resume,
        };

        match self.inner.adapter.start(&spec).await {
            Ok(spawned) => {
                session.provider_session_id = Some(spawned.provider_session_id);
                apply(&mut session, SessionStatus::Running)?;
                session.started_at = Some(Utc::now());
                self.inner.sessions.save(session.clone()).await?;
                info!(session = %session.id, task = %task_id, attempt = session.attempt_number, "session running");

                self.emit(LifecycleEvent::SessionStart, &session, serde_json::json!({
                    "attempt_number": session.attempt_number,
                    "resume_mode": session.resume_mode,
                }))
                .await;
                self.notify(&session);
                self.watch(session.id);
            }
            Err(e) => {
                error!(session = %session.id, task = %task_id, error = %e, "process spawn failed");
                apply(&mut session, SessionStatus::Failed)?;
                session.ended_at = Some(Utc::now());
                self.inner.sessions.save(session.clone()).await?;

                self.emit(LifecycleEvent::SessionError, &session, serde_json::json!({
                    "error": e.to_string(),
                    "kind": "process_spawn_failure",
                }))
                .await;
                self.notify(&session);
            }
        }

        Ok(session)
    }

    /// Pause a running session. The adapter signal is best-effort; the
    /// canonical state changes regardless.
    pub async fn pause(&self, id: Uuid) -> Result<Session> {
        let mut session = self.load(id).await?;
        apply(&mut session, SessionStatus::Paused)?;
        match self.inner.adapter.pause(id).await {
            Ok(true) => {}
            Ok(false) => warn!(session = %id, "provider cannot suspend; pause is bookkeeping only"),
            Err(e) => warn!(session = %id, error = %e, "adapter pause failed"),
        }
        self.inner.sessions.save(session.clone()).await?;
        self.notify(&session);
        Ok(session)
    }

    /// Resume a paused session.
    pub async fn resume(&self, id: Uuid) -> Result<Session> {
        let mut session = self.load(id).await?;
        apply(&mut session, SessionStatus::Running)?;
        if let Err(e) = self.inner.adapter.resume(id).await {
            warn!(session = %id, error = %e, "adapter resume failed");
        }
        self.inner.sessions.save(session.clone()).await?;
        self.notify(&session);
        Ok(session)
    }

    /// Cancel from any non-terminal state. Idempotent: cancelling an
    /// already-terminal session is a no-op, tolerating races with
    /// natural completion.
    pub async fn cancel(&self, id: Uuid) -> Result<Session> {
        let mut session = self.load(id).await?;
        if session.status.is_terminal() {
            return Ok(session);
        }
        apply(&mut session, SessionStatus::Cancelled)?;
        session.ended_at = Some(Utc::now());
        if let Err(e) = self.inner.adapter.stop(id).await {
            // Best-effort; the external process may outlive the session.
            warn!(session = %id, error = %e, "adapter stop failed");
        }
        self.inner.sessions.save(session.clone()).await?;
        info!(session = %id, "session cancelled");

        self.emit(LifecycleEvent::SessionEnd, &session, serde_json::json!({
            "status": session.status,
        }))
        .await;
        self.notify(&session);
        Ok(session)
    }

    /// Alias for [`cancel`]; exposed verb on the API surface.
    pub async fn stop(&self, id: Uuid) -> Result<Session> {
        self.cancel(id).await
    }

    /// Forward user input to the live process.
    pub async fn send_input(&self, id: Uuid, text: &str) -> Result<()> {
        let session = self.load(id).await?;
        if session.status != SessionStatus::Running {
            return Err(SessionError::NotRunning(id));
        }
        self.inner
            .adapter
            .send_input(id, text)
            .await
            .map_err(|_| SessionError::NotRunning(id))
    }

    pub async fn get(&self, id: Uuid) -> Result<Session> {
        self.load(id).await
    }

    pub async fn list_for_task(&self, task_id: Uuid) -> Result<Vec<Session>> {
        Ok(self.inner.sessions.find_by_task(task_id).await?)
    }

    /// Record a tool invocation against the session's stats.
    pub async fn record_tool_use(&self, id: Uuid, tool_name: &str) -> Result<()> {
        let mut session = self.load(id).await?;
        session.record_tool_use(tool_name);
        self.inner.sessions.save(session).await?;
        Ok(())
    }

    // -- internal -----------------------------------------------------------

    async fn load(&self, id: Uuid) -> Result<Session> {
        self.inner
            .sessions
            .find_by_id(id)
            .await
            .map_err(|_| SessionError::NotFound(id))
    }

    /// Spawn the exit watcher for a running session.
    fn watch(&self, id: Uuid) {
        let manager = self.clone();
        tokio::spawn(async move {
            match manager.inner.adapter.wait(id).await {
                Ok(exit) => {
                    if let Err(e) = manager.finish(id, exit).await {
                        warn!(session = %id, error = %e, "finishing session failed");
                    }
                }
                Err(e) => warn!(session = %id, error = %e, "process watch failed"),
            }
        });
    }

    /// Apply a process exit observed by the watcher. No-op when the
    /// session already reached a terminal state (e.g. cancel won).
    pub async fn finish(&self, id: Uuid, exit: ProcessExit) -> Result<Session> {
        let mut session = self.load(id).await?;
        if session.status.is_terminal() {
            return Ok(session);
        }

        let target = if exit.success() {
            SessionStatus::Completed
        } else {
            SessionStatus::Failed
        };
        // A successful exit observed while paused still ends the session.
        let target = if crate::state_machine::can_transition(session.status, target) {
            target
        } else {
            SessionStatus::Failed
        };

        apply(&mut session, target)?;
        session.ended_at = Some(Utc::now());
        self.inner.sessions.save(session.clone()).await?;
        info!(session = %id, status = %session.status, code = ?exit.code, "session finished");

        match target {
            SessionStatus::Completed => {
                self.emit(LifecycleEvent::SessionEnd, &session, serde_json::json!({
                    "status": session.status,
                    "exit_code": exit.code,
                }))
                .await;
            }
            _ => {
                self.emit(LifecycleEvent::SessionError, &session, serde_json::json!({
                    "status": session.status,
                    "exit_code": exit.code,
                }))
                .await;
            }
        }
        self.notify(&session);
        Ok(session)
    }

    async fn emit(&self, event: LifecycleEvent, session: &Session, payload: serde_json::Value) {
        let ctx = HookContext::new(event)
            .with_session(session.id)
            .with_task(session.task_id)
            .with_provider(session.provider)
            .with_payload(payload);
        self.inner.hooks.dispatch(&ctx).await;
    }

    fn notify(&self, session: &Session) {
        if let Some(tx) = &self.inner.notices {
            let _ = tx.send(SessionNotice {
                session_id: session.id,
                task_id: session.task_id,
                status: session.status,
                provisional: true,
            });
        }
    }
}

/// Validate and apply a status change; rejected transitions leave the
/// session untouched.
fn apply(session: &mut Session, to: SessionStatus) -> std::result::Result<(), InvalidTransition> {
    let mut sm = SessionStateMachine::at(session.status);
    sm.transition_to(to)?;
    session.status = to;
    session.updated_at = Utc::now();
    Ok(())
}

// ---------------------------------------------------------------------------
// Convenience re-export for task creation events
// ---------------------------------------------------------------------------

/// Emit `task:created` for a task registered through the external CRUD
/// surface. The orchestrator does not own task persistence; this is the
/// hook-side effect only.
pub async fn emit_task_created(hooks: &HookExecutor, task: &Task) {
    let ctx = HookContext::new(LifecycleEvent::TaskCreated)
        .with_task(task.id)
        .with_project(task.project_id)
        .with_payload(serde_json::to_value(task).unwrap_or_default());
    hooks.dispatch(&ctx).await;
}

/// Emit `task:status:change` when the external CRUD surface moves a task.
pub async fn emit_task_status_change(hooks: &HookExecutor, task: &Task, previous: &str) {
    let ctx = HookContext::new(LifecycleEvent::TaskStatusChange)
        .with_task(task.id)
        .with_project(task.project_id)
        .with_status(task.status.as_str())
        .with_payload(serde_json::json!({
            "previous": previous,
            "current": task.status,
        }));
    hooks.dispatch(&ctx).await;
}
