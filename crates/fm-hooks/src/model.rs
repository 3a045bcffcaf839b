use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use fm_core::types::ProviderKind;

// ---------------------------------------------------------------------------
// LifecycleEvent
// ---------------------------------------------------------------------------

/// The lifecycle events hooks may subscribe to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum LifecycleEvent {
    #[serde(rename = "session:start")]
    SessionStart,
    #[serde(rename = "session:end")]
    SessionEnd,
    #[serde(rename = "session:error")]
    SessionError,
    #[serde(rename = "message:before")]
    MessageBefore,
    #[serde(rename = "message:after")]
    MessageAfter,
    #[serde(rename = "tool:before")]
    ToolBefore,
    #[serde(rename = "tool:after")]
    ToolAfter,
    #[serde(rename = "task:created")]
    TaskCreated,
    #[serde(rename = "task:status:change")]
    TaskStatusChange,
    #[serde(rename = "approval:pending")]
    ApprovalPending,
    #[serde(rename = "approval:resolved")]
    ApprovalResolved,
    #[serde(rename = "git:commit:created")]
    GitCommitCreated,
    #[serde(rename = "git:commit:approved")]
    GitCommitApproved,
}

impl LifecycleEvent {
    pub fn as_str(&self) -> &'static str {
        match self {
            LifecycleEvent::SessionStart => "session:start",
            LifecycleEvent::SessionEnd => "session:end",
            LifecycleEvent::SessionError => "session:error",
            LifecycleEvent::MessageBefore => "message:before",
            LifecycleEvent::MessageAfter => "message:after",
            LifecycleEvent::ToolBefore => "tool:before",
            LifecycleEvent::ToolAfter => "tool:after",
            LifecycleEvent::TaskCreated => "task:created",
            LifecycleEvent::TaskStatusChange => "task:status:change",
            LifecycleEvent::ApprovalPending => "approval:pending",
            LifecycleEvent::ApprovalResolved => "approval:resolved",
            LifecycleEvent::GitCommitCreated => "git:commit:created",
            LifecycleEvent::GitCommitApproved => "git:commit:approved",
        }
    }

    /// Events where the `tool_names` filter applies.
    pub fn is_tool_event(&self) -> bool {
        matches!(self, LifecycleEvent::ToolBefore | LifecycleEvent::ToolAfter)
    }

    /// Events where the `statuses` filter applies.
    pub fn is_status_event(&self) -> bool {
        matches!(self, LifecycleEvent::TaskStatusChange)
    }

    /// Events where the `providers` filter applies.
    pub fn is_session_event(&self) -> bool {
        matches!(
            self,
            LifecycleEvent::SessionStart | LifecycleEvent::SessionEnd | LifecycleEvent::SessionError
        )
    }
}

impl std::fmt::Display for LifecycleEvent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for LifecycleEvent {
    type Err = HookError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        let event = match s {
            "session:start" => LifecycleEvent::SessionStart,
            "session:end" => LifecycleEvent::SessionEnd,
            "session:error" => LifecycleEvent::SessionError,
            "message:before" => LifecycleEvent::MessageBefore,
            "message:after" => LifecycleEvent::MessageAfter,
            "tool:before" => LifecycleEvent::ToolBefore,
            "tool:after" => LifecycleEvent::ToolAfter,
            "task:created" => LifecycleEvent::TaskCreated,
            "task:status:change" => LifecycleEvent::TaskStatusChange,
            "approval:pending" => LifecycleEvent::ApprovalPending,
            "approval:resolved" => LifecycleEvent::ApprovalResolved,
            "git:commit:created" => LifecycleEvent::GitCommitCreated,
            "git:commit:approved" => LifecycleEvent::GitCommitApproved,
            other => return Err(HookError::Validation(format!("unknown event: {other}"))),
        };
        Ok(event)
    }
}

// ---------------------------------------------------------------------------
// HookScope
// ---------------------------------------------------------------------------

/// Where a hook applies: everywhere, one project, or one task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "scope", content = "id", rename_all = "snake_case")]
pub enum HookScope {
    Global,
    Project(Uuid),
    Task(Uuid),
}

// ---------------------------------------------------------------------------
// HookConfig
// ---------------------------------------------------------------------------

fn default_http_method() -> String {
    "POST".to_string()
}

fn default_shell_timeout() -> u64 {
    30
}

fn default_http_timeout() -> u64 {
    10
}

/// Type-specific hook configuration. The variant tag is the hook's type;
/// one execution strategy exists per variant.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum HookConfig {
    Shell {
        command: String,
        #[serde(default)]
        cwd: Option<String>,
        #[serde(default)]
        env: HashMap<String, String>,
        #[serde(default = "default_shell_timeout")]
        timeout_secs: u64,
        #[serde(default)]
        blocking: bool,
    },
    Http {
        url: String,
        #[serde(default = "default_http_method")]
        method: String,
        #[serde(default)]
        headers: HashMap<String, String>,
        #[serde(default = "default_http_timeout")]
        timeout_secs: u64,
        #[serde(default)]
        blocking: bool,
    },
    /// Publishes the event context to a pub/sub channel. Always non-blocking.
    Websocket { channel: String },
}

impl HookConfig {
    /// Whether the dispatch loop must await completion before moving on.
    pub fn is_blocking(&self) -> bool {
        match self {
            HookConfig::Shell { blocking, .. } => *blocking,
            HookConfig::Http { blocking, .. } => *blocking,
            HookConfig::Websocket { .. } => false,
        }
    }

    pub fn type_name(&self) -> &'static str {
        match self {
            HookConfig::Shell { .. } => "shell",
            HookConfig::Http { .. } => "http",
            HookConfig::Websocket { .. } => "websocket",
        }
    }
}

// ---------------------------------------------------------------------------
// HookFilters
// ---------------------------------------------------------------------------

/// Optional narrowing filters. Each filter only applies to its event
/// family: `tool_names` to tool:* events, `statuses` to
/// task:status:change, `providers` to session:* events.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct HookFilters {
    #[serde(default)]
    pub tool_names: Option<Vec<String>>,
    #[serde(default)]
    pub statuses: Option<Vec<String>>,
    #[serde(default)]
    pub providers: Option<Vec<ProviderKind>>,
}

// ---------------------------------------------------------------------------
// Hook
// ---------------------------------------------------------------------------

/// A user-configured side effect triggered by a lifecycle event.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Hook {
    pub id: Uuid,
    pub name: String,
    pub scope: HookScope,
    pub event: LifecycleEvent,
    pub config: HookConfig,
    #[serde(default)]
    pub filters: HookFilters,
    pub enabled: bool,
    /// Execution order within one event; lower runs first. Valid range
    /// is [-100, 100].
    pub priority: i8,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Hook {
    pub fn new(name: impl Into<String>, event: LifecycleEvent, config: HookConfig) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            name: name.into(),
            scope: HookScope::Global,
            event,
            config,
            filters: HookFilters::default(),
            enabled: true,
            priority: 0,
            created_at: now,
            updated_at: now,
        }
    }

    /// Validate the hook definition. Called before any persistence; a
    /// malformed hook is rejected without side effects.
    pub fn validate(&self) -> std::result::Result<(), HookError> {
        if self.name.trim().is_empty() {
            return Err(HookError::Validation("hook name must not be empty".into()));
        }
        if !(-100..=100).contains(&(self.priority as i16)) {
            return Err(HookError::Validation(format!(
                "priority {} outside [-100, 100]",
                self.priority
            )));
        }
        match &self.config {
            HookConfig::Shell {
                command,
                timeout_secs,
                ..
            } => {
                if command.trim().is_empty() {
                    return Err(HookError::Validation("shell command must not be empty".into()));
                }
                if !(1..=300).contains(timeout_secs) {
                    return Err(HookError::Validation(format!(
                        "shell timeout {timeout_secs}s outside [1, 300]"
                    )));
                }
            }
            HookConfig::Http {
                url,
                method,
                timeout_secs,
                ..
            } => {
                if !url.starts_with("http://") && !url.starts_with("https://") {
                    return Err(HookError::Validation(format!("invalid http url: {url}")));
                }
                if reqwest::Method::from_bytes(method.as_bytes()).is_err() {
                    return Err(HookError::Validation(format!("invalid http method: {method}")));
                }
                if !(1..=60).contains(timeout_secs) {
                    return Err(HookError::Validation(format!(
                        "http timeout {timeout_secs}s outside [1, 60]"
                    )));
                }
            }
            HookConfig::Websocket { channel } => {
                if channel.trim().is_empty() {
                    return Err(HookError::Validation(
                        "websocket channel must not be empty".into(),
                    ));
                }
            }
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// HookContext
// ---------------------------------------------------------------------------

/// The context an event carries into matching and execution.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HookContext {
    pub event: LifecycleEvent,
    pub session_id: Option<Uuid>,
    pub task_id: Option<Uuid>,
    pub project_id: Option<Uuid>,
    pub provider: Option<ProviderKind>,
    pub tool_name: Option<String>,
    pub status: Option<String>,
    /// Free-form event payload forwarded to the hook target.
    pub payload: serde_json::Value,
}

impl HookContext {
    pub fn new(event: LifecycleEvent) -> Self {
        Self {
            event,
            session_id: None,
            task_id: None,
            project_id: None,
            provider: None,
            tool_name: None,
            status: None,
            payload: serde_json::Value::Null,
        }
    }

    pub fn with_session(mut self, session_id: Uuid) -> Self {
        self.session_id = Some(session_id);
        self
    }

    pub fn with_task(mut self, task_id: Uuid) -> Self {
        self.task_id = Some(task_id);
        self
    }

    pub fn with_project(mut self, project_id: Uuid) -> Self {
        self.project_id = Some(project_id);
        self
    }

    pub fn with_provider(mut self, provider: ProviderKind) -> Self {
        self.provider = Some(provider);
        self
    }

    pub fn with_tool(mut self, tool_name: impl Into<String>) -> Self {
        self.tool_name = Some(tool_name.into());
        self
    }

    pub fn with_status(mut self, status: impl Into<String>) -> Self {
        self.status = Some(status.into());
        self
    }

    pub fn with_payload(mut self, payload: serde_json::Value) -> Self {
        self.payload = payload;
        self
    }
}

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

#[derive(Debug, thiserror::Error)]
pub enum HookError {
    #[error("validation error: {0}")]
    Validation(String),
    #[error("hook not found: {0}")]
    NotFound(Uuid),
    #[error("storage error: {0}")]
    Store(String),
}

pub type Result<T> = std::result::Result<T, HookError>;

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
