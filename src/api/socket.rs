//! WebSocket session endpoint

use std::sync::Arc;

use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        State,
    },
    response::Response,
};
use futures::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tracing::{debug, error, info};

use crate::{state::AppState, transport::ServerEvent};

/// Largest inbound frame accepted
pub const MAX_FRAME_BYTES: usize = 64 * 1024;

/// Handle GET /ws - Upgrade to a timer session
pub async fn ws_handler(ws: WebSocketUpgrade, State(state): State<Arc<AppState>>) -> Response {
    ws.max_message_size(MAX_FRAME_BYTES)
        .on_upgrade(move |socket| handle_socket(socket, state))
}

async fn handle_socket(socket: WebSocket, state: Arc<AppState>) {
    let (mut sink, mut stream) = socket.split();
    let (tx, mut rx) = mpsc::unbounded_channel::<ServerEvent>();
    let mut session = state.open_session(tx);
    let id = session.id();
    info!(session = id, "WebSocket connected");

    // Writer: everything queued for this session, in order
    let writer = tokio::spawn(async move {
        while let Some(event) = rx.recv().await {
            let text = match serde_json::to_string(&event) {
                Ok(text) => text,
                Err(e) => {
                    error!("Failed to serialize event: {}", e);
                    continue;
                }
            };
            if sink.send(Message::Text(text)).await.is_err() {
                break;
            }
        }
    });

    while let Some(frame) = stream.next().await {
        match frame {
            Ok(Message::Text(text)) => session.handle_text(&text).await,
            Ok(Message::Close(_)) => break,
            Ok(Message::Binary(_)) => debug!(session = id, "Ignoring binary frame"),
            Ok(_) => {}
            Err(e) => {
                debug!(session = id, "WebSocket read error: {}", e);
                break;
            }
        }
    }

    drop(session);
    writer.abort();
    info!(session = id, "WebSocket disconnected");
}
