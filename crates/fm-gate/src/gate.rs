use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use tokio::sync::watch;
use tracing::{debug, info, warn};
use uuid::Uuid;

use fm_core::config::{ApprovalsConfig, TimeoutAction};
use fm_hooks::executor::HookExecutor;
use fm_hooks::model::{HookContext, LifecycleEvent};

use crate::classify::{ToolCategory, ToolClassifier};

// ---------------------------------------------------------------------------
// Types
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ApprovalKind {
    Tool,
    Diff,
}

/// Write-once-terminal status of an approval request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ApprovalStatus {
    Pending,
    Approved,
    Rejected,
    Timeout,
}

/// The effective outcome a resolution carries. A `Timeout` status still
/// resolves to one of these per the configured default.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Decision {
    Approved,
    Rejected,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApprovalPayload {
    pub tool_name: String,
    pub tool_input: serde_json::Value,
}

/// A request for human approval of a gated action.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApprovalRequest {
    pub id: Uuid,
    pub session_id: Uuid,
    pub kind: ApprovalKind,
    pub payload: ApprovalPayload,
    pub category: ToolCategory,
    pub status: ApprovalStatus,
    pub decision: Option<Decision>,
    pub timeout_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
    pub decided_at: Option<DateTime<Utc>>,
    pub decided_by: Option<String>,
}

/// How a request ended: terminal status plus the effective decision.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Resolution {
    pub status: ApprovalStatus,
    pub decision: Decision,
    pub decided_by: Option<String>,
}

/// Broadcast to connected clients when a request is created or resolved.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum GateNotice {
    Pending(ApprovalRequest),
    Resolved {
        request: ApprovalRequest,
        resolution: Resolution,
    },
}

/// What the caller should do with the intercepted tool invocation.
#[derive(Debug, Clone)]
pub enum ToolVerdict {
    /// Proceed; the tool bypassed the gate (disabled, auto-allowed, safe).
    Allowed,
    /// Proceed; a request was created and resolved to approve.
    Approved(Resolution),
    /// Do not run the tool; rejection outcome for the process to handle.
    Rejected(Resolution),
}

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

#[derive(Debug, thiserror::Error)]
pub enum GateError {
    #[error("approval request not found: {0}")]
    NotFound(Uuid),
}

pub type Result<T> = std::result::Result<T, GateError>;

// ---------------------------------------------------------------------------
// ApprovalGate
// ---------------------------------------------------------------------------

struct GateEntry {
    request: ApprovalRequest,
    notify: watch::Sender<Option<Resolution>>,
}

struct GateInner {
    config: ApprovalsConfig,
    classifier: ToolClassifier,
    requests: DashMap<Uuid, GateEntry>,
    hooks: Arc<HookExecutor>,
    notices: Option<flume::Sender<GateNotice>>,
}

/// Intercepts tool/diff actions needing confirmation and races a timeout
/// timer against a human decision; exactly one resolution wins.
///
/// Cheap to clone; internals live behind an `Arc`.
#[derive(Clone)]
pub struct ApprovalGate {
    inner: Arc<GateInner>,
}

impl ApprovalGate {
    pub fn new(config: ApprovalsConfig, hooks: Arc<HookExecutor>) -> Self {
        Self::build(config, hooks, None)
    }

    /// Like [`new`], with a sender used to notify connected clients of
    /// pending and resolved requests.
    pub fn with_notices(
        config: ApprovalsConfig,
        hooks: Arc<HookExecutor>,
        tx: flume::Sender<GateNotice>,
    ) -> Self {
        Self::build(config, hooks, Some(tx))
    }

    fn build(
        config: ApprovalsConfig,
        hooks: Arc<HookExecutor>,
        notices: Option<flume::Sender<GateNotice>>,
    ) -> Self {
        let classifier = ToolClassifier::from_config(&config);
        Self {
            inner: Arc::new(GateInner {
                config,
                classifier,
                requests: DashMap::new(),
                hooks,
                notices,
            }),
        }
    }

    /// Gate one tool invocation end to end: classify, maybe create a
    /// request, and await its resolution.
    pub async fn intercept(
        &self,
        session_id: Uuid,
        tool_name: &str,
        tool_input: serde_json::Value,
    ) -> ToolVerdict {
        if !self.inner.config.enabled || self.inner.classifier.is_auto_allowed(tool_name) {
            return ToolVerdict::Allowed;
        }
        let category = self.inner.classifier.classify(tool_name, &tool_input);
        if category == ToolCategory::Safe {
            return ToolVerdict::Allowed;
        }

        let request = self
            .submit(
                session_id,
                ApprovalKind::Tool,
                ApprovalPayload {
                    tool_name: tool_name.to_string(),
                    tool_input,
                },
                category,
            )
            .await;

        match self.wait(request.id).await {
            Ok(resolution) => match resolution.decision {
                Decision::Approved => ToolVerdict::Approved(resolution),
                Decision::Rejected => ToolVerdict::Rejected(resolution),
            },
            // The entry vanished underneath us; fail closed.
            Err(_) => ToolVerdict::Rejected(Resolution {
                status: ApprovalStatus::Rejected,
                decision: Decision::Rejected,
                decided_by: None,
            }),
        }
    }

    /// Create a pending request, notify hooks/clients, and arm the timer.
    pub async fn submit(
        &self,
        session_id: Uuid,
        kind: ApprovalKind,
        payload: ApprovalPayload,
        category: ToolCategory,
    ) -> ApprovalRequest {
        let now = Utc::now();
        let timeout = Duration::from_secs(self.inner.config.timeout_seconds);
        let request = ApprovalRequest {
            id: Uuid::new_v4(),
            session_id,
            kind,
            payload,
            category,
            status: ApprovalStatus::Pending,
            decision: None,
            timeout_at: now + chrono::Duration::from_std(timeout).unwrap_or_default(),
            created_at: now,
            decided_at: None,
            decided_by: None,
        };
        info!(
            request = %request.id,
            session = %session_id,
            tool = %request.payload.tool_name,
            "approval requested"
        );

        let (notify, _) = watch::channel(None);
        self.inner.requests.insert(
            request.id,
            GateEntry {
                request: request.clone(),
                notify,
            },
        );

        let ctx = HookContext::new(LifecycleEvent::ApprovalPending)
            .with_session(session_id)
            .with_tool(request.payload.tool_name.clone())
            .with_payload(serde_json::to_value(&request).unwrap_or_default());
        self.inner.hooks.dispatch(&ctx).await;
        if let Some(tx) = &self.inner.notices {
            let _ = tx.send(GateNotice::Pending(request.clone()));
        }

        let gate = self.clone();
        let id = request.id;
        tokio::spawn(async move {
            tokio::time::sleep(timeout).await;
            let decision = match gate.inner.config.default_on_timeout {
                TimeoutAction::Approve => Decision::Approved,
                TimeoutAction::Deny => Decision::Rejected,
            };
            match gate.try_resolve(id, ApprovalStatus::Timeout, decision, None) {
                Ok((resolution, true)) => {
                    debug!(request = %id, ?decision, "approval resolved by timeout");
                    gate.emit_resolved(id, resolution).await;
                }
                // A decision got there first, or the entry is gone.
                Ok((_, false)) | Err(_) => {}
            }
        });

        request
    }

    /// Record a human decision. If the request already resolved (by an
    /// earlier decision or the timer), this is a no-op returning the
    /// existing resolution unchanged.
    pub async fn decide(
        &self,
        id: Uuid,
        approve: bool,
        decided_by: Option<String>,
    ) -> Result<Resolution> {
        let (status, decision) = if approve {
            (ApprovalStatus::Approved, Decision::Approved)
        } else {
            (ApprovalStatus::Rejected, Decision::Rejected)
        };
        let (resolution, won) = self.try_resolve(id, status, decision, decided_by)?;
        if won {
            info!(request = %id, ?decision, "approval decided");
            self.emit_resolved(id, resolution.clone()).await;
        }
        Ok(resolution)
    }

    /// Await the terminal resolution of a request.
    pub async fn wait(&self, id: Uuid) -> Result<Resolution> {
        let mut rx = {
            let entry = self.inner.requests.get(&id).ok_or(GateError::NotFound(id))?;
            entry.notify.subscribe()
        };
        let resolved = rx
            .wait_for(|r| r.is_some())
            .await
            .map_err(|_| GateError::NotFound(id))?;
        Ok(resolved.clone().expect("checked is_some"))
    }

    pub fn get(&self, id: Uuid) -> Result<ApprovalRequest> {
        self.inner
            .requests
            .get(&id)
            .map(|e| e.request.clone())
            .ok_or(GateError::NotFound(id))
    }

    /// All requests, optionally filtered by status, oldest first.
    pub fn list(&self, status: Option<ApprovalStatus>) -> Vec<ApprovalRequest> {
        let mut requests: Vec<ApprovalRequest> = self
            .inner
            .requests
            .iter()
            .map(|e| e.request.clone())
            .filter(|r| status.map_or(true, |s| r.status == s))
            .collect();
        requests.sort_by_key(|r| r.created_at);
        requests
    }

    /// Compare-and-set resolution: the per-key map lock makes the first
    /// caller the single winner; everyone else observes the stored
    /// terminal state.
    fn try_resolve(
        &self,
        id: Uuid,
        status: ApprovalStatus,
        decision: Decision,
        decided_by: Option<String>,
    ) -> Result<(Resolution, bool)> {
        let mut entry = self.inner.requests.get_mut(&id).ok_or(GateError::NotFound(id))?;
        if entry.request.status != ApprovalStatus::Pending {
            let existing = Resolution {
                status: entry.request.status,
                decision: entry.request.decision.unwrap_or(Decision::Rejected),
                decided_by: entry.request.decided_by.clone(),
            };
            return Ok((existing, false));
        }

        entry.request.status = status;
        entry.request.decision = Some(decision);
        entry.request.decided_at = Some(Utc::now());
        entry.request.decided_by = decided_by.clone();
        let resolution = Resolution {
            status,
            decision,
            decided_by,
        };
        if entry.notify.send(Some(resolution.clone())).is_err() {
            // No waiters; the stored state is still authoritative.
            warn!(request = %id, "approval resolved with no waiters");
        }
        Ok((resolution, true))
    }

    async fn emit_resolved(&self, id: Uuid, resolution: Resolution) {
        let request = match self.get(id) {
            Ok(r) => r,
            Err(_) => return,
        };
        let ctx = HookContext::new(LifecycleEvent::ApprovalResolved)
            .with_session(request.session_id)
            .with_tool(request.payload.tool_name.clone())
            .with_payload(serde_json::json!({
                "request": request,
                "resolution": resolution,
            }));
        self.inner.hooks.dispatch(&ctx).await;
        if let Some(tx) = &self.inner.notices {
            let _ = tx.send(GateNotice::Resolved {
                request,
                resolution,
            });
        }
    }
}
