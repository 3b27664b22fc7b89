//! Event stream for browser clients

use axum::extract::ws::{Message, WebSocket};
use axum::extract::{State, WebSocketUpgrade};
use axum::response::Response;
use futures_util::{SinkExt, StreamExt};
use std::sync::Arc;
use tokio::sync::broadcast;

use crate::events::SessionEvent;
use crate::ui::server::AppState;

pub async fn ws_handler(ws: WebSocketUpgrade, State(state): State<Arc<AppState>>) -> Response {
    let events = state.controller.subscribe();
    ws.on_upgrade(move |socket| handle_socket(socket, events))
}

/// Forward session events as JSON text until either side goes away
async fn handle_socket(socket: WebSocket, mut events: broadcast::Receiver<SessionEvent>) {
    let (mut tx, mut rx) = socket.split();
    tracing::debug!("Event stream client connected");

    loop {
        tokio::select! {
            event = events.recv() => {
                match event {
                    Ok(event) => {
                        let text = match serde_json::to_string(&event) {
                            Ok(text) => text,
                            Err(e) => {
                                tracing::warn!("Failed to serialize event: {}", e);
                                continue;
                            }
                        };
                        if tx.send(Message::Text(text)).await.is_err() {
                            break;
                        }
                    }
                    Err(broadcast::error::RecvError::Lagged(n)) => {
                        tracing::warn!("Event stream client lagged, missed {} events", n);
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
            message = rx.next() => {
                match message {
                    Some(Ok(Message::Close(_))) | None | Some(Err(_)) => break,
                    Some(Ok(Message::Ping(data))) => {
                        let _ = tx.send(Message::Pong(data)).await;
                    }
                    _ => {}
                }
            }
        }
    }

    tracing::debug!("Event stream client disconnected");
}
