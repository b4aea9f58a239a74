//! WebSocket push channel.
//!
//! A client connects to `/ws`, sends `{"type":"join","userId":...}`, and
//! from then on receives `notification:new` frames for that recipient.
//! Push delivery is best-effort: missed frames are always recoverable
//! through the pull API.

use crate::AppState;
use axum::{
    extract::{
        ws::{Message as AxumMessage, WebSocket},
        Extension, WebSocketUpgrade,
    },
    response::IntoResponse,
};
use futures_util::{SinkExt, StreamExt};
use herald_notify::NotificationRecord;
use herald_relay::SESSION_BUFFER;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::mpsc;

/// Incoming WebSocket frame types.
#[derive(Debug, Deserialize)]
#[serde(tag = "type")]
pub enum IncomingFrame {
    #[serde(rename = "join")]
    Join {
        #[serde(rename = "userId")]
        user_id: String,
    },
    #[serde(rename = "leave")]
    Leave,
}

/// Outgoing WebSocket frame types.
#[derive(Debug, Serialize)]
#[serde(tag = "type")]
pub enum OutgoingFrame {
    #[serde(rename = "joined")]
    Joined {
        #[serde(rename = "userId")]
        user_id: String,
    },
    #[serde(rename = "notification:new")]
    NotificationNew { notification: NotificationRecord },
    #[serde(rename = "error")]
    Error { message: String },
}

/// Sends a JSON-serialized frame over the session's outbound channel.
fn send_frame(tx: &mpsc::Sender<String>, frame: &OutgoingFrame) {
    match serde_json::to_string(frame) {
        Ok(json) => {
            if let Err(e) = tx.try_send(json) {
                tracing::warn!("failed to send WebSocket frame to client: {}", e);
            }
        }
        Err(e) => {
            tracing::error!("failed to serialize WebSocket frame: {}", e);
        }
    }
}

/// WebSocket handler: `GET /ws`.
pub async fn ws_handler(
    Extension(state): Extension<Arc<AppState>>,
    ws: WebSocketUpgrade,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}

/// Handles one WebSocket connection for its whole lifetime.
async fn handle_socket(socket: WebSocket, state: Arc<AppState>) {
    let (mut sender, mut receiver) = socket.split();

    // Bounded per-session buffer: a client that cannot keep up loses
    // frames rather than growing memory without bound.
    let (tx, mut rx) = mpsc::channel::<String>(SESSION_BUFFER);

    let session_id = state.registry.connect(tx.clone()).await;
    tracing::debug!(session_id = %session_id, "websocket session connected");

    // Forward frames from the session channel to the socket.
    let send_task = tokio::spawn(async move {
        while let Some(msg) = rx.recv().await {
            if sender.send(AxumMessage::Text(msg.into())).await.is_err() {
                break;
            }
        }
    });

    while let Some(Ok(msg)) = receiver.next().await {
        match msg {
            AxumMessage::Text(text) => {
                match serde_json::from_str::<IncomingFrame>(&text) {
                    Ok(IncomingFrame::Join { user_id }) => {
                        if user_id.trim().is_empty() {
                            send_frame(
                                &tx,
                                &OutgoingFrame::Error {
                                    message: "join requires a userId".to_string(),
                                },
                            );
                            continue;
                        }
                        state.registry.join(session_id, user_id.clone()).await;
                        tracing::debug!(
                            session_id = %session_id,
                            user_id = %user_id,
                            "websocket session joined"
                        );
                        send_frame(&tx, &OutgoingFrame::Joined { user_id });
                    }
                    Ok(IncomingFrame::Leave) => {
                        state.registry.leave(session_id).await;
                    }
                    Err(_) => {
                        tracing::warn!(
                            session_id = %session_id,
                            "failed to parse incoming WebSocket frame"
                        );
                        send_frame(
                            &tx,
                            &OutgoingFrame::Error {
                                message: "invalid frame format".to_string(),
                            },
                        );
                    }
                }
            }
            AxumMessage::Close(_) => break,
            _ => {}
        }
    }

    state.registry.disconnect(session_id).await;
    send_task.abort();
    tracing::debug!(session_id = %session_id, "websocket session disconnected");
}
