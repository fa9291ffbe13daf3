//! Broadcast hub — fans out status and log events to WebSocket observers.
//!
//! Built on `tokio::sync::broadcast`: producers never block, and a slow
//! subscriber that falls behind the channel capacity simply loses the
//! oldest messages rather than stalling an execution unit.

use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        State,
    },
    response::IntoResponse,
    routing::get,
    Router,
};
use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::broadcast;
use tracing::{debug, info, warn};

/// Broadcast channel capacity per hub.
const BROADCAST_CAPACITY: usize = 256;

// Message type constants.
pub const TYPE_LOG_LINE: &str = "log_line";
pub const TYPE_WORKER_STATUS: &str = "worker_status";
pub const TYPE_TASK_UPDATE: &str = "task_update";
pub const TYPE_TASK_COMPLETE: &str = "task_complete";
pub const TYPE_RATE_LIMIT: &str = "rate_limit";
pub const TYPE_SYSTEM_STATUS: &str = "system_status";
pub const TYPE_BUDGET_WARNING: &str = "budget_warning";

/// Envelope for all hub messages.
#[derive(Debug, Clone, Serialize)]
pub struct HubMessage {
    #[serde(rename = "type")]
    pub kind: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub worker_id: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub task_id: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub level: Option<String>,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<serde_json::Value>,
    pub timestamp: DateTime<Utc>,
}

impl HubMessage {
    pub fn new(kind: &'static str, message: impl Into<String>) -> Self {
        Self {
            kind,
            worker_id: None,
            task_id: None,
            level: None,
            message: message.into(),
            data: None,
            timestamp: Utc::now(),
        }
    }

    pub fn with_worker(mut self, worker_id: i64) -> Self {
        self.worker_id = Some(worker_id);
        self
    }

    pub fn with_task(mut self, task_id: i64) -> Self {
        self.task_id = Some(task_id);
        self
    }
}

/// Fan-out hub shared by all producers and WebSocket clients.
#[derive(Clone)]
pub struct Hub {
    tx: broadcast::Sender<HubMessage>,
}

impl Hub {
    pub fn new() -> Self {
        let (tx, _rx) = broadcast::channel(BROADCAST_CAPACITY);
        Self { tx }
    }

    /// Subscribe to the live event stream. Each WS client calls this.
    pub fn subscribe(&self) -> broadcast::Receiver<HubMessage> {
        self.tx.subscribe()
    }

    /// Send a message to all subscribers. Never blocks; a send with no
    /// subscribers is fine.
    pub fn broadcast(&self, mut msg: HubMessage) {
        msg.timestamp = Utc::now();
        let _ = self.tx.send(msg);
    }

    /// Emit one output line from a worker's running task.
    pub fn broadcast_to_worker(&self, worker_id: i64, task_id: i64, line: &str, level: &str) {
        let mut msg = HubMessage::new(TYPE_LOG_LINE, line)
            .with_worker(worker_id)
            .with_task(task_id);
        msg.level = Some(level.to_string());
        self.broadcast(msg);
    }

    /// Number of currently connected subscribers.
    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }
}

impl Default for Hub {
    fn default() -> Self {
        Self::new()
    }
}

/// Build the Axum router for `/ws`.
pub fn ws_routes(hub: Hub) -> Router {
    Router::new().route("/ws", get(ws_handler)).with_state(hub)
}

async fn ws_handler(ws: WebSocketUpgrade, State(hub): State<Hub>) -> impl IntoResponse {
    ws.on_upgrade(|socket| handle_socket(socket, hub))
}

async fn handle_socket(mut socket: WebSocket, hub: Hub) {
    info!("WebSocket client connected");
    let mut rx = hub.subscribe();

    loop {
        tokio::select! {
            result = rx.recv() => {
                match result {
                    Ok(msg) => {
                        if let Ok(json) = serde_json::to_string(&msg) {
                            if socket.send(Message::Text(json.into())).await.is_err() {
                                debug!("WS client disconnected during send");
                                break;
                            }
                        }
                    }
                    Err(broadcast::error::RecvError::Lagged(n)) => {
                        warn!(missed = n, "WS client lagged behind broadcast");
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }

            result = socket.recv() => {
                match result {
                    Some(Ok(Message::Ping(data))) => {
                        if socket.send(Message::Pong(data)).await.is_err() {
                            break;
                        }
                    }
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Err(e)) => {
                        warn!(error = %e, "WebSocket error");
                        break;
                    }
                    _ => {}
                }
            }
        }
    }

    info!("WebSocket connection closed");
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn broadcast_without_subscribers_does_not_block() {
        let hub = Hub::new();
        hub.broadcast(HubMessage::new(TYPE_SYSTEM_STATUS, "up"));
        assert_eq!(hub.subscriber_count(), 0);
    }

    #[tokio::test]
    async fn subscriber_receives_worker_line() {
        let hub = Hub::new();
        let mut rx = hub.subscribe();

        hub.broadcast_to_worker(3, 9, "compiling...", "info");

        let msg = rx.recv().await.unwrap();
        assert_eq!(msg.kind, TYPE_LOG_LINE);
        assert_eq!(msg.worker_id, Some(3));
        assert_eq!(msg.task_id, Some(9));
        assert_eq!(msg.level.as_deref(), Some("info"));
        assert_eq!(msg.message, "compiling...");
    }

    #[test]
    fn serialization_skips_absent_fields() {
        let msg = HubMessage::new(TYPE_SYSTEM_STATUS, "up");
        let json = serde_json::to_value(&msg).unwrap();
        assert_eq!(json["type"], "system_status");
        assert!(json.get("worker_id").is_none());
        assert!(json.get("level").is_none());
    }
}
