//! Realtime Hub: bridges the Event Bus to long-lived client WebSocket
//! sessions. Each connection subscribes to one project's topic; delivery
//! is best-effort and on reconnect clients must re-fetch authoritative
//! state from the API (no replay guarantee).

use std::sync::Arc;
use std::time::Duration;

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::{Path, State};
use axum::response::IntoResponse;
use axum::routing::get;
use axum::Router;
use futures::{SinkExt, StreamExt};
use serde::Serialize;
use tokio::sync::mpsc;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::events::{Event, EventBus};

/// Bounded per-connection send queue. A client too slow to drain this is
/// disconnected rather than allowed to build unbounded backlog.
const SEND_QUEUE_CAPACITY: usize = 128;

#[derive(Clone)]
pub struct RealtimeHub {
    bus: EventBus,
}

impl RealtimeHub {
    pub fn new(bus: EventBus) -> Self {
        Self { bus }
    }

    pub fn router(self) -> Router {
        Router::new()
            .route("/ws/{project_id}", get(ws_handler))
            .with_state(Arc::new(self))
    }
}

#[derive(Debug, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum ClientFrame<'a> {
    Event { event: &'a Event },
    Error { message: String },
}

async fn ws_handler(
    ws: WebSocketUpgrade,
    State(hub): State<Arc<RealtimeHub>>,
    Path(project_id): Path<Uuid>,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(socket, hub, project_id))
}

async fn handle_socket(socket: WebSocket, hub: Arc<RealtimeHub>, project_id: Uuid) {
    let (mut sender, mut receiver) = socket.split();
    let mut events = hub.bus.subscribe(project_id).await;

    let (tx, mut rx) = mpsc::channel::<Message>(SEND_QUEUE_CAPACITY);

    let writer = tokio::spawn(async move {
        while let Some(msg) = rx.recv().await {
            if sender.send(msg).await.is_err() {
                break;
            }
        }
    });

    let forward_tx = tx.clone();
    let forwarder = tokio::spawn(async move {
        loop {
            match events.recv().await {
                Ok(event) => {
                    let frame = ClientFrame::Event { event: &event };
                    let Ok(text) = serde_json::to_string(&frame) else { continue };
                    if forward_tx.try_send(Message::Text(text.into())).is_err() {
                        warn!(project_id = %project_id, "client send queue full, closing connection");
                        break;
                    }
                }
                Err(tokio::sync::broadcast::error::RecvError::Lagged(skipped)) => {
                    debug!(project_id = %project_id, skipped, "client lagged behind broadcast channel");
                }
                Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
            }
        }
    });

    // Drain inbound frames only to detect disconnects; the hub does not
    // accept client-authored mutations over this socket.
    while let Some(Ok(msg)) = receiver.next().await {
        if matches!(msg, Message::Close(_)) {
            break;
        }
    }

    forwarder.abort();
    drop(tx);
    let _ = tokio::time::timeout(Duration::from_secs(1), writer).await;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::EventPayload;

    #[test]
    fn client_frame_serializes_event_variant() {
        let event = Event::new(EventPayload::TaskCreated { task_id: Uuid::nil() });
        let frame = ClientFrame::Event { event: &event };
        let json = serde_json::to_value(&frame).unwrap();
        assert_eq!(json["type"], "event");
    }

    #[test]
    fn client_frame_serializes_error_variant() {
        let frame = ClientFrame::Error { message: "boom".to_string() };
        let json = serde_json::to_value(&frame).unwrap();
        assert_eq!(json["type"], "error");
        assert_eq!(json["message"], "boom");
    }
}
