use std::sync::Arc;

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::{
    extract::{Path, State},
    response::IntoResponse,
};
use futures_util::{SinkExt, StreamExt};
use tracing::{debug, warn};
use uuid::Uuid;

use crate::protocol::BridgeMessage;

use super::state::ApiState;

/// WebSocket GET /api/sessions/{id}/ws -- the per-session duplex channel.
///
/// Agent-to-client frames carry blocks, deltas, provisional status, and
/// approval notifications; client frames carry user input, cancellation,
/// and approval decisions. On connect the server replays the buffered
/// prefix of every still-in-flight message so a reconnecting client
/// resumes without loss.
pub(crate) async fn session_ws_handler(
    ws: WebSocketUpgrade,
    State(state): State<Arc<ApiState>>,
    Path(session_id): Path<Uuid>,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_session_ws(socket, state, session_id))
}

async fn handle_session_ws(socket: WebSocket, state: Arc<ApiState>, session_id: Uuid) {
    let (mut ws_tx, mut ws_rx) = socket.split();
    let rx = state.bus.subscribe(session_id);

    // Reconnect replay: buffered-so-far content of in-flight messages,
    // re-addressed from offset 0.
    for (message_id, text) in state.delta_tracker(session_id).replay() {
        let replayed = BridgeMessage::MessageDelta {
            session_id,
            message_id,
            text,
            offset: 0,
        };
        if send_json(&mut ws_tx, &replayed).await.is_err() {
            return;
        }
    }

    // Heartbeat interval: 30 seconds
    let mut heartbeat = tokio::time::interval(std::time::Duration::from_secs(30));
    heartbeat.tick().await; // first tick fires immediately; skip it

    loop {
        tokio::select! {
            // Forward session events to the client.
            result = rx.recv_async() => {
                match result {
                    Ok(msg) => {
                        if send_json(&mut ws_tx, &msg).await.is_err() {
                            break;
                        }
                    }
                    // Bus invalidated (terminal session) -- close politely.
                    Err(_) => break,
                }
            }

            _ = heartbeat.tick() => {
                let ping = BridgeMessage::Ping { timestamp: chrono::Utc::now() };
                if send_json(&mut ws_tx, &ping).await.is_err() {
                    break;
                }
            }

            incoming = ws_rx.next() => {
                match incoming {
                    Some(Ok(Message::Text(text))) => {
                        handle_client_frame(&state, session_id, text.as_str(), &mut ws_tx).await;
                    }
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Err(_)) => break,
                    _ => {} // Ignore pings/pongs/binary.
                }
            }
        }
    }
    debug!(session = %session_id, "websocket closed");
}

async fn send_json(
    ws_tx: &mut (impl SinkExt<Message> + Unpin),
    msg: &BridgeMessage,
) -> Result<(), ()> {
    let json = serde_json::to_string(msg).unwrap_or_default();
    ws_tx.send(Message::Text(json.into())).await.map_err(|_| ())
}

/// Apply one client frame. Failures surface to the client as an `error`
/// message instead of dropping the connection.
async fn handle_client_frame(
    state: &Arc<ApiState>,
    session_id: Uuid,
    raw: &str,
    ws_tx: &mut (impl SinkExt<Message> + Unpin),
) {
    let parsed: Result<BridgeMessage, _> = serde_json::from_str(raw);
    let outcome: Result<(), String> = match parsed {
        Ok(BridgeMessage::UserInput { text }) => state
            .manager
            .send_input(session_id, &text)
            .await
            .map_err(|e| e.to_string()),
        Ok(BridgeMessage::Cancel) => state
            .manager
            .cancel(session_id)
            .await
            .map(|_| ())
            .map_err(|e| e.to_string()),
        Ok(BridgeMessage::ApprovalDecision { request_id, approve }) => state
            .gate
            .decide(request_id, approve, None)
            .await
            .map(|_| ())
            .map_err(|e| e.to_string()),
        Ok(other) => {
            debug!(session = %session_id, "ignoring non-client frame: {other:?}");
            Ok(())
        }
        Err(e) => Err(format!("malformed frame: {e}")),
    };

    if let Err(message) = outcome {
        warn!(session = %session_id, error = %message, "client frame failed");
        let error = BridgeMessage::Error {
            code: "client_frame".into(),
            message,
        };
        let _ = send_json(ws_tx, &error).await;
    }
}
