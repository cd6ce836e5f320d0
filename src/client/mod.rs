//! Terminal clients
//!
//! `watch` is a passive overlay that renders through the predictor;
//! `control` sends a single operation and prints the result.

pub mod control;
pub mod watch;

use anyhow::Context;
use futures::SinkExt;
use tokio::net::TcpStream;
use tokio_tungstenite::{connect_async, tungstenite::Message, MaybeTlsStream, WebSocketStream};
use tracing::debug;

use crate::transport::{ClientMessage, ServerEvent};

pub use control::ControlAction;

pub type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Connect to the server and join `channel`
pub async fn connect(url: &str, channel: &str) -> anyhow::Result<WsStream> {
    let (mut ws, _response) = connect_async(url)
        .await
        .with_context(|| format!("Failed to connect to {}", url))?;
    debug!("Connected to {}", url);

    send(
        &mut ws,
        &ClientMessage::Join {
            channel: channel.to_string(),
        },
    )
    .await?;
    Ok(ws)
}

pub async fn send(ws: &mut WsStream, message: &ClientMessage) -> anyhow::Result<()> {
    let text = serde_json::to_string(message)?;
    ws.send(Message::Text(text))
        .await
        .context("Failed to send message")
}

/// Decode a server frame. Non-text frames and unknown payloads yield `None`.
pub fn decode(frame: Message) -> Option<ServerEvent> {
    match frame {
        Message::Text(text) => match serde_json::from_str(&text) {
            Ok(event) => Some(event),
            Err(e) => {
                debug!("Ignoring undecodable frame: {}", e);
                None
            }
        },
        _ => None,
    }
}
