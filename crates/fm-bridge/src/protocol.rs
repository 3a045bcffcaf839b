use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use fm_core::types::SessionStatus;
use fm_gate::gate::{ApprovalRequest, Resolution};

// ---------------------------------------------------------------------------
// StreamBlock
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BlockKind {
    Text,
    Code,
    ToolUse,
    Thinking,
    Error,
}

/// One displayable unit of agent output. Ephemeral; persistence of the
/// resulting message is an external collaborator's job.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StreamBlock {
    pub kind: BlockKind,
    pub content: String,
    #[serde(default)]
    pub tool_name: Option<String>,
}

// ---------------------------------------------------------------------------
// BridgeMessage
// ---------------------------------------------------------------------------

/// The per-session duplex wire protocol. Agent-to-client messages carry
/// blocks, deltas, provisional status, and approval notifications;
/// client-to-agent messages carry user input, cancellation, and approval
/// decisions.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload")]
#[serde(rename_all = "snake_case")]
pub enum BridgeMessage {
    // Agent -> client
    Block {
        session_id: Uuid,
        block: StreamBlock,
    },
    /// Incremental chunk of a long message; clients accumulate by
    /// `message_id` and use `offset` to detect gaps.
    MessageDelta {
        session_id: Uuid,
        message_id: String,
        text: String,
        offset: usize,
    },
    /// Terminal chunk finalising a `message_id`.
    MessageComplete {
        session_id: Uuid,
        message_id: String,
    },
    /// Provisional status push; reconcile against the session record.
    Status {
        session_id: Uuid,
        status: SessionStatus,
        provisional: bool,
    },
    ApprovalRequired {
        request: ApprovalRequest,
    },
    ApprovalResolved {
        request_id: Uuid,
        resolution: Resolution,
    },
    /// Fan-out of a websocket-hook publication.
    ChannelEvent {
        channel: String,
        payload: serde_json::Value,
    },
    Error {
        code: String,
        message: String,
    },
    Ping {
        timestamp: DateTime<Utc>,
    },

    // Client -> agent
    UserInput {
        text: String,
    },
    Cancel,
    ApprovalDecision {
        request_id: Uuid,
        approve: bool,
    },
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn delta_wire_shape() {
        let msg = BridgeMessage::MessageDelta {
            session_id: Uuid::nil(),
            message_id: "m1".into(),
            text: "hello".into(),
            offset: 0,
        };
        let json = serde_json::to_value(&msg).unwrap();
        assert_eq!(json["type"], "message_delta");
        assert_eq!(json["payload"]["message_id"], "m1");
        assert_eq!(json["payload"]["offset"], 0);
    }

    #[test]
    fn client_messages_round_trip() {
        let cancel: BridgeMessage = serde_json::from_str(r#"{"type":"cancel"}"#).unwrap();
        assert!(matches!(cancel, BridgeMessage::Cancel));

        let decision: BridgeMessage = serde_json::from_value(serde_json::json!({
            "type": "approval_decision",
            "payload": {"request_id": Uuid::nil(), "approve": true}
        }))
        .unwrap();
        match decision {
            BridgeMessage::ApprovalDecision { approve, .. } => assert!(approve),
            other => panic!("unexpected message: {other:?}"),
        }
    }

    #[test]
    fn status_is_provisional() {
        let msg = BridgeMessage::Status {
            session_id: Uuid::nil(),
            status: SessionStatus::Running,
            provisional: true,
        };
        let json = serde_json::to_value(&msg).unwrap();
        assert_eq!(json["payload"]["status"], "running");
        assert_eq!(json["payload"]["provisional"], true);
    }
}
