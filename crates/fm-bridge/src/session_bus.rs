use std::sync::Arc;

use dashmap::DashMap;
use uuid::Uuid;

use crate::protocol::BridgeMessage;

/// Per-session broadcast bus built on flume channels.
///
/// Each subscriber gets every message published to its session after the
/// subscription was created; disconnected subscribers are pruned on
/// publish. Topic channels carry websocket-hook publications to whoever
/// listens, independent of sessions. Cheap to clone.
#[derive(Clone, Default)]
pub struct SessionBus {
    inner: Arc<BusInner>,
}

#[derive(Default)]
struct BusInner {
    sessions: DashMap<Uuid, Vec<flume::Sender<BridgeMessage>>>,
    topics: DashMap<String, Vec<flume::Sender<BridgeMessage>>>,
}

impl SessionBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Subscribe to one session's stream.
    pub fn subscribe(&self, session_id: Uuid) -> flume::Receiver<BridgeMessage> {
        let (tx, rx) = flume::unbounded();
        self.inner.sessions.entry(session_id).or_default().push(tx);
        rx
    }

    /// Publish to all of a session's subscribers, pruning dead ones.
    pub fn publish(&self, session_id: Uuid, msg: BridgeMessage) {
        if let Some(mut senders) = self.inner.sessions.get_mut(&session_id) {
            senders.retain(|tx| tx.send(msg.clone()).is_ok());
        }
    }

    /// Subscribe to a named pub/sub topic.
    pub fn subscribe_topic(&self, channel: &str) -> flume::Receiver<BridgeMessage> {
        let (tx, rx) = flume::unbounded();
        self.inner
            .topics
            .entry(channel.to_string())
            .or_default()
            .push(tx);
        rx
    }

    /// Publish a websocket-hook payload to a topic's subscribers.
    pub fn publish_topic(&self, channel: &str, payload: serde_json::Value) {
        if let Some(mut senders) = self.inner.topics.get_mut(channel) {
            let msg = BridgeMessage::ChannelEvent {
                channel: channel.to_string(),
                payload,
            };
            senders.retain(|tx| tx.send(msg.clone()).is_ok());
        }
    }

    /// Drop every subscription for a session. Called when the session
    /// reaches a terminal state.
    pub fn invalidate(&self, session_id: Uuid) {
        self.inner.sessions.remove(&session_id);
    }

    pub fn subscriber_count(&self, session_id: Uuid) -> usize {
        self.inner
            .sessions
            .get(&session_id)
            .map(|s| s.len())
            .unwrap_or(0)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
