//! WebSocket handling for real-time job events.

use axum::extract::State;
use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::response::Response;
use futures::{SinkExt, StreamExt};
use gradebatch_core::ResourceId;
use gradebatch_core::event::BatchEvent;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use tokio::sync::broadcast::error::RecvError;
use tracing::{info, warn};

use crate::AppState;

/// WebSocket upgrade handler.
pub async fn ws_handler(ws: WebSocketUpgrade, State(state): State<AppState>) -> Response {
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}

async fn handle_socket(socket: WebSocket, state: AppState) {
    info!("WebSocket connection established");

    let (mut sender, mut receiver) = socket.split();
    let mut events = state.orchestrator.subscribe();
    let mut subscriptions: HashSet<ResourceId> = HashSet::new();

    loop {
        let outgoing = tokio::select! {
            msg = receiver.next() => match msg {
                Some(Ok(Message::Text(text))) => match serde_json::from_str::<WsCommand>(&text) {
                    Ok(WsCommand::Subscribe { job_id }) => {
                        info!(job_id = %job_id, "Client subscribed");
                        subscriptions.insert(job_id);
                        Some(WsMessage::Subscribed { job_id })
                    }
                    Ok(WsCommand::Unsubscribe { job_id }) => {
                        info!(job_id = %job_id, "Client unsubscribed");
                        subscriptions.remove(&job_id);
                        None
                    }
                    Err(e) => Some(WsMessage::Error { message: e.to_string() }),
                },
                Some(Ok(Message::Close(_))) | None => {
                    info!("WebSocket connection closed");
                    break;
                }
                Some(Err(e)) => {
                    warn!(error = %e, "WebSocket error");
                    break;
                }
                Some(Ok(_)) => None,
            },
            event = events.recv() => match event {
                Ok(event) if subscriptions.contains(&event.job_id()) => {
                    Some(WsMessage::Event { event })
                }
                Ok(_) => None,
                Err(RecvError::Lagged(skipped)) => {
                    warn!(skipped, "WebSocket client lagging, events dropped");
                    None
                }
                Err(RecvError::Closed) => break,
            },
        };

        if let Some(message) = outgoing {
            let Ok(json) = serde_json::to_string(&message) else {
                continue;
            };
            if sender.send(Message::Text(json.into())).await.is_err() {
                break;
            }
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum WsCommand {
    Subscribe { job_id: ResourceId },
    Unsubscribe { job_id: ResourceId },
}

#[derive(Debug, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum WsMessage {
    Subscribed { job_id: ResourceId },
    Error { message: String },
    Event { event: BatchEvent },
}

#[cfg(test)]
mod tests {
    use super::*;
    use gradebatch_core::job::JobState;
    use serde_json::json;

    #[test]
    fn test_parse_subscribe() {
        let id = ResourceId::new();
        let text = json!({ "type": "subscribe", "job_id": id.to_string() }).to_string();
        let cmd: WsCommand = serde_json::from_str(&text).unwrap();
        assert!(matches!(cmd, WsCommand::Subscribe { job_id } if job_id == id));
    }

    #[test]
    fn test_event_message_shape() {
        let job_id = ResourceId::new();
        let message = WsMessage::Event {
            event: BatchEvent::JobStateChanged {
                job_id,
                from: JobState::Pending,
                to: JobState::Processing,
            },
        };
        let value = serde_json::to_value(&message).unwrap();
        assert_eq!(value["type"], "event");
        assert_eq!(value["event"]["type"], "job_state_changed");
        assert_eq!(value["event"]["to"], "processing");
    }
}
