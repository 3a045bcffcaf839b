use std::sync::Arc;
use std::time::Instant;

use dashmap::DashMap;
use tracing::warn;
use uuid::Uuid;

use fm_core::config::Config;
use fm_core::store::{MemorySessionStore, MemoryTaskStore, SessionStore, TaskStore};
use fm_gate::gate::{ApprovalGate, GateNotice, ToolVerdict};
use fm_gate::git::{CommitBackend, GitApprovalQueue};
use fm_hooks::executor::{ChannelPublish, HookExecutor};
use fm_hooks::model::{HookContext, LifecycleEvent};
use fm_hooks::registry::{HookRegistry, MemoryHookStore};
use fm_session::adapter::ProviderAdapter;
use fm_session::manager::{SessionLifecycleManager, SessionNotice};

use crate::delta::{DeltaError, DeltaTracker};
use crate::protocol::{BridgeMessage, StreamBlock};
use crate::session_bus::SessionBus;

/// Shared application state for all HTTP/WS handlers.
pub struct ApiState {
    pub config: Config,
    pub tasks: Arc<dyn TaskStore>,
    pub sessions: Arc<dyn SessionStore>,
    pub hooks: Arc<HookRegistry>,
    pub executor: Arc<HookExecutor>,
    pub gate: ApprovalGate,
    pub git_approvals: GitApprovalQueue,
    pub manager: SessionLifecycleManager,
    pub bus: SessionBus,
    deltas: DashMap<Uuid, Arc<DeltaTracker>>,
    pub started_at: Instant,
}

impl ApiState {
    /// Wire the full orchestration stack around the given process adapter
    /// and commit backend, with in-memory stores.
    pub fn build(
        config: Config,
        adapter: Arc<dyn ProviderAdapter>,
        commit_backend: Arc<dyn CommitBackend>,
    ) -> Arc<Self> {
        let tasks: Arc<dyn TaskStore> = Arc::new(MemoryTaskStore::new());
        let sessions: Arc<dyn SessionStore> = Arc::new(MemorySessionStore::new());
        Self::build_with_stores(config, adapter, commit_backend, tasks, sessions)
    }

    /// Like [`build`], against caller-provided stores.
    pub fn build_with_stores(
        config: Config,
        adapter: Arc<dyn ProviderAdapter>,
        commit_backend: Arc<dyn CommitBackend>,
        tasks: Arc<dyn TaskStore>,
        sessions: Arc<dyn SessionStore>,
    ) -> Arc<Self> {
        let bus = SessionBus::new();

        let hooks = Arc::new(HookRegistry::new(Arc::new(MemoryHookStore::new())));
        let (channel_tx, channel_rx) = flume::unbounded::<ChannelPublish>();
        let executor = Arc::new(
            HookExecutor::new(Arc::clone(&hooks))
                .with_channel_sender(channel_tx)
                .with_result_log_size(config.hooks.result_log_size),
        );

        let (gate_tx, gate_rx) = flume::unbounded::<GateNotice>();
        let gate = ApprovalGate::with_notices(
            config.approvals.clone(),
            Arc::clone(&executor),
            gate_tx,
        );

        let git_approvals = GitApprovalQueue::new(commit_backend, Arc::clone(&executor));

        let (notice_tx, notice_rx) = flume::unbounded::<SessionNotice>();
        let manager = SessionLifecycleManager::with_notices(
            Arc::clone(&tasks),
            Arc::clone(&sessions),
            adapter,
            Arc::clone(&executor),
            config.providers.clone(),
            notice_tx,
        );

        // Forward websocket-hook publications onto the topic fabric.
        {
            let bus = bus.clone();
            tokio::spawn(async move {
                while let Ok(publish) = channel_rx.recv_async().await {
                    bus.publish_topic(&publish.channel, publish.payload);
                }
            });
        }

        // Forward approval notices to the owning session's subscribers.
        {
            let bus = bus.clone();
            tokio::spawn(async move {
                while let Ok(notice) = gate_rx.recv_async().await {
                    match notice {
                        GateNotice::Pending(request) => {
                            let session_id = request.session_id;
                            bus.publish(session_id, BridgeMessage::ApprovalRequired { request });
                        }
                        GateNotice::Resolved {
                            request,
                            resolution,
                        } => {
                            bus.publish(
                                request.session_id,
                                BridgeMessage::ApprovalResolved {
                                    request_id: request.id,
                                    resolution,
                                },
                            );
                        }
                    }
                }
            });
        }

        // Forward provisional status pushes; terminal transitions also
        // invalidate the session's streaming subscriptions.
        {
            let bus = bus.clone();
            tokio::spawn(async move {
                while let Ok(notice) = notice_rx.recv_async().await {
                    bus.publish(
                        notice.session_id,
                        BridgeMessage::Status {
                            session_id: notice.session_id,
                            status: notice.status,
                            provisional: notice.provisional,
                        },
                    );
                    if notice.status.is_terminal() {
                        bus.invalidate(notice.session_id);
                    }
                }
            });
        }

        Arc::new(Self {
            config,
            tasks,
            sessions,
            hooks,
            executor,
            gate,
            git_approvals,
            manager,
            bus,
            deltas: DashMap::new(),
            started_at: Instant::now(),
        })
    }

    /// The delta tracker buffering one session's in-flight messages.
    pub fn delta_tracker(&self, session_id: Uuid) -> Arc<DeltaTracker> {
        self.deltas
            .entry(session_id)
            .or_insert_with(|| Arc::new(DeltaTracker::new()))
            .clone()
    }

    // -- ingestion from the provider process layer --------------------------

    /// Announce the start of a streamed message (`message:before`).
    pub async fn announce_message(&self, session_id: Uuid, message_id: &str) {
        let ctx = HookContext::new(LifecycleEvent::MessageBefore)
            .with_session(session_id)
            .with_payload(serde_json::json!({"message_id": message_id}));
        self.executor.dispatch(&ctx).await;
    }

    /// Buffer one delta chunk and broadcast it to subscribers.
    pub fn push_delta(
        &self,
        session_id: Uuid,
        message_id: &str,
        text: &str,
        offset: usize,
    ) -> Result<(), DeltaError> {
        self.delta_tracker(session_id).ingest(message_id, text, offset)?;
        self.bus.publish(
            session_id,
            BridgeMessage::MessageDelta {
                session_id,
                message_id: message_id.to_string(),
                text: text.to_string(),
                offset,
            },
        );
        Ok(())
    }

    /// Finalise a streamed message: broadcast the terminal chunk once and
    /// fire `message:after`. Returns the assembled text on first call.
    pub async fn complete_message(&self, session_id: Uuid, message_id: &str) -> Option<String> {
        let text = self.delta_tracker(session_id).finalize(message_id)?;
        self.bus.publish(
            session_id,
            BridgeMessage::MessageComplete {
                session_id,
                message_id: message_id.to_string(),
            },
        );
        let ctx = HookContext::new(LifecycleEvent::MessageAfter)
            .with_session(session_id)
            .with_payload(serde_json::json!({
                "message_id": message_id,
                "length": text.len(),
            }));
        self.executor.dispatch(&ctx).await;
        Some(text)
    }

    /// Broadcast a display block to a session's subscribers.
    pub fn push_block(&self, session_id: Uuid, block: StreamBlock) {
        self.bus
            .publish(session_id, BridgeMessage::Block { session_id, block });
    }

    /// Gate one tool invocation arriving from the agent process: fires
    /// `tool:before`, runs the approval gate, and records usage.
    pub async fn handle_tool_call(
        &self,
        session_id: Uuid,
        tool_name: &str,
        input: serde_json::Value,
    ) -> ToolVerdict {
        let ctx = HookContext::new(LifecycleEvent::ToolBefore)
            .with_session(session_id)
            .with_tool(tool_name)
            .with_payload(input.clone());
        self.executor.dispatch(&ctx).await;

        let verdict = self.gate.intercept(session_id, tool_name, input).await;
        if !matches!(verdict, ToolVerdict::Rejected(_)) {
            if let Err(e) = self.manager.record_tool_use(session_id, tool_name).await {
                warn!(session = %session_id, error = %e, "recording tool use failed");
            }
        }
        verdict
    }

    /// Report a finished tool execution (`tool:after`).
    pub async fn notify_tool_result(
        &self,
        session_id: Uuid,
        tool_name: &str,
        result: serde_json::Value,
    ) {
        let ctx = HookContext::new(LifecycleEvent::ToolAfter)
            .with_session(session_id)
            .with_tool(tool_name)
            .with_payload(result);
        self.executor.dispatch(&ctx).await;
    }
}
