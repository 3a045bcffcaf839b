use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

// ---------------------------------------------------------------------------
// ProviderKind
// ---------------------------------------------------------------------------

/// Which external coding-agent CLI a session runs against.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProviderKind {
    Claude,
    Codex,
    Gemini,
    OpenCode,
}

impl ProviderKind {
    /// Stable lowercase name used in hook filters and log fields.
    pub fn as_str(&self) -> &'static str {
        match self {
            ProviderKind::Claude => "claude",
            ProviderKind::Codex => "codex",
            ProviderKind::Gemini => "gemini",
            ProviderKind::OpenCode => "opencode",
        }
    }
}

impl std::fmt::Display for ProviderKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

// ---------------------------------------------------------------------------
// TaskStatus
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Todo,
    InProgress,
    InReview,
    Done,
    Cancelled,
}

impl TaskStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskStatus::Todo => "todo",
            TaskStatus::InProgress => "in_progress",
            TaskStatus::InReview => "in_review",
            TaskStatus::Done => "done",
            TaskStatus::Cancelled => "cancelled",
        }
    }
}

impl std::fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

// ---------------------------------------------------------------------------
// Task
// ---------------------------------------------------------------------------

/// Counters tracking how many sessions have been started against a task,
/// broken down by resume mode. `attempts` increases on every start.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct AttemptCounters {
    pub attempts: u32,
    pub renews: u32,
    pub retries: u32,
    pub forks: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Task {
    pub id: Uuid,
    pub project_id: Uuid,
    pub title: String,
    pub description: Option<String>,
    pub status: TaskStatus,
    pub counters: AttemptCounters,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Task {
    pub fn new(project_id: Uuid, title: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            project_id,
            title: title.into(),
            description: None,
            status: TaskStatus::Todo,
            counters: AttemptCounters::default(),
            created_at: now,
            updated_at: now,
        }
    }
}

// ---------------------------------------------------------------------------
// SessionStatus
// ---------------------------------------------------------------------------

/// Lifecycle state of a session.
///
/// `Queued` is the state immediately after an accepted start request;
/// `Running` follows a confirmed process spawn. The four remaining states
/// are terminal except `Paused`, which may resume back to `Running`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    Queued,
    Running,
    Paused,
    Completed,
    Failed,
    Cancelled,
}

impl SessionStatus {
    /// Terminal states admit no further transitions.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            SessionStatus::Completed | SessionStatus::Failed | SessionStatus::Cancelled
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            SessionStatus::Queued => "queued",
            SessionStatus::Running => "running",
            SessionStatus::Paused => "paused",
            SessionStatus::Completed => "completed",
            SessionStatus::Failed => "failed",
            SessionStatus::Cancelled => "cancelled",
        }
    }
}

impl std::fmt::Display for SessionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

// ---------------------------------------------------------------------------
// ResumeMode
// ---------------------------------------------------------------------------

/// Strategy for starting a follow-up session relative to a prior attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResumeMode {
    /// Fresh provider conversation; prior context is cleared.
    Renew,
    /// Resume the same provider conversation, preserving history.
    Retry,
    /// New provider conversation seeded with copied prior context.
    Fork,
}

impl std::fmt::Display for ResumeMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let label = match self {
            ResumeMode::Renew => "renew",
            ResumeMode::Retry => "retry",
            ResumeMode::Fork => "fork",
        };
        write!(f, "{}", label)
    }
}

// ---------------------------------------------------------------------------
// Usage accounting
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct UsageTotals {
    pub input_tokens: u64,
    pub output_tokens: u64,
    pub cost_usd: f64,
}

/// Per-model usage breakdown within one session.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelUsage {
    pub model: String,
    pub input_tokens: u64,
    pub output_tokens: u64,
    pub cost_usd: f64,
}

/// Snapshot of the provider-side context window at last report.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct ContextWindowSnapshot {
    pub used_tokens: u64,
    pub max_tokens: u64,
}

// ---------------------------------------------------------------------------
// Session
// ---------------------------------------------------------------------------

/// One bounded run of an AI provider process against a task.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Session {
    pub id: Uuid,
    pub task_id: Uuid,
    pub agent_id: Option<Uuid>,
    /// External conversation handle assigned by the provider CLI.
    pub provider_session_id: Option<String>,
    pub status: SessionStatus,
    pub provider: ProviderKind,
    pub resume_mode: Option<ResumeMode>,
    pub attempt_number: u32,
    /// Set if and only if `resume_mode` is `Retry` or `Fork`.
    pub resumed_from_session_id: Option<Uuid>,
    pub model: Option<String>,
    pub usage: UsageTotals,
    pub model_usage: Vec<ModelUsage>,
    /// Invocation counts per tool name.
    pub tool_stats: BTreeMap<String, u64>,
    pub context_window: Option<ContextWindowSnapshot>,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub ended_at: Option<DateTime<Utc>>,
    pub updated_at: DateTime<Utc>,
}

impl Session {
    pub fn new(task_id: Uuid, provider: ProviderKind) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            task_id,
            agent_id: None,
            provider_session_id: None,
            status: SessionStatus::Queued,
            provider,
            resume_mode: None,
            attempt_number: 1,
            resumed_from_session_id: None,
            model: None,
            usage: UsageTotals::default(),
            model_usage: Vec::new(),
            tool_stats: BTreeMap::new(),
            context_window: None,
            created_at: now,
            started_at: None,
            ended_at: None,
            updated_at: now,
        }
    }

    /// Record one invocation of `tool_name` in the session's tool stats.
    pub fn record_tool_use(&mut self, tool_name: &str) {
        *self.tool_stats.entry(tool_name.to_string()).or_insert(0) += 1;
        self.updated_at = Utc::now();
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
