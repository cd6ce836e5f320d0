//! One-shot control surface

use std::time::Duration;

use anyhow::{anyhow, bail, Context};
use clap::Subcommand;
use futures::StreamExt;
use serde_json::{Map, Value};
use tokio::time::timeout;

use super::{connect, decode, send, WsStream};
use crate::{
    config::ControlArgs,
    timer::Snapshot,
    transport::{ClientMessage, DurationInput, ServerEvent},
};

const REPLY_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Subcommand, Debug, Clone, PartialEq)]
pub enum ControlAction {
    /// Start (or resume) the timer
    Start,
    /// Stop the timer, keeping the remaining time
    Stop,
    /// Reset to the configured duration, optionally changing it
    Reset {
        /// New duration, e.g. `5:00`, `1h30m` or `90` (seconds)
        duration: Option<String>,
    },
    /// Set duration, mode and/or remaining time; always stops
    Set {
        #[arg(long)]
        duration: Option<String>,
        /// countdown or countup
        #[arg(long)]
        mode: Option<String>,
        #[arg(long)]
        remaining: Option<String>,
    },
    /// Add (or with a leading `-`, subtract) time
    Adjust {
        #[arg(allow_hyphen_values = true)]
        delta: String,
    },
    /// Apply a JSON object of display settings
    Config {
        /// e.g. '{"font_size": 96, "end_behavior": "confetti"}'
        patch: String,
    },
}

impl ControlAction {
    pub fn into_message(self) -> anyhow::Result<ClientMessage> {
        use DurationInput::Text;

        Ok(match self {
            ControlAction::Start => ClientMessage::Start,
            ControlAction::Stop => ClientMessage::Stop,
            ControlAction::Reset { duration } => ClientMessage::Reset {
                duration: duration.map(Text),
            },
            ControlAction::Set {
                duration,
                mode,
                remaining,
            } => ClientMessage::Set {
                duration: duration.map(Text),
                mode,
                remaining: remaining.map(Text),
            },
            ControlAction::Adjust { delta } => ClientMessage::Adjust { delta: Text(delta) },
            ControlAction::Config { patch } => {
                let patch: Map<String, Value> =
                    serde_json::from_str(&patch).context("Config patch must be a JSON object")?;
                ClientMessage::UpdateConfig { patch }
            }
        })
    }
}

/// Send the action and print the state the server answers with
pub async fn run(args: ControlArgs) -> anyhow::Result<()> {
    let message = args.action.into_message()?;
    let mut ws = connect(&args.url, &args.channel).await?;

    timeout(REPLY_TIMEOUT, next_state(&mut ws))
        .await
        .map_err(|_| anyhow!("Timed out waiting to join '{}'", args.channel))??;

    send(&mut ws, &message).await?;
    let state = timeout(REPLY_TIMEOUT, next_state(&mut ws))
        .await
        .map_err(|_| anyhow!("Timed out waiting for a reply"))??;

    println!("{}", describe(&state));
    let _ = ws.close(None).await;
    Ok(())
}

/// Wait for the next event carrying a state. An `error` event fails.
async fn next_state(ws: &mut WsStream) -> anyhow::Result<Snapshot> {
    while let Some(frame) = ws.next().await {
        match decode(frame?) {
            Some(ServerEvent::Error { message }) => bail!("Server rejected request: {}", message),
            Some(event) => {
                if let Some(state) = event.snapshot() {
                    return Ok(state.clone());
                }
            }
            None => {}
        }
    }
    bail!("Connection closed by server")
}

fn describe(state: &Snapshot) -> String {
    let timer = &state.timer;
    format!(
        "{}: {} ({}, {}, {})",
        timer.channel,
        state.formatted,
        if timer.is_running { "running" } else { "stopped" },
        timer.mode,
        timer.end_behavior,
    )
}
