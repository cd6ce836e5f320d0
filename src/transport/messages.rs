//! Wire messages exchanged over a session
//!
//! Every frame is a JSON text object tagged by `type`.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::timer::{parse_duration, EndBehavior, Snapshot};

/// A duration as sent by a client: raw milliseconds or duration text
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum DurationInput {
    Millis(i64),
    Text(String),
}

impl DurationInput {
    pub fn to_millis(&self) -> Option<i64> {
        match self {
            DurationInput::Millis(ms) => Some(*ms),
            DurationInput::Text(text) => parse_duration(text),
        }
    }
}

impl From<i64> for DurationInput {
    fn from(ms: i64) -> Self {
        DurationInput::Millis(ms)
    }
}

impl From<&str> for DurationInput {
    fn from(text: &str) -> Self {
        DurationInput::Text(text.to_string())
    }
}

/// Inbound requests
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum ClientMessage {
    Join {
        channel: String,
    },
    Start,
    Stop,
    Reset {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        duration: Option<DurationInput>,
    },
    Set {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        duration: Option<DurationInput>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        mode: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        remaining: Option<DurationInput>,
    },
    Adjust {
        delta: DurationInput,
    },
    UpdateConfig {
        patch: Map<String, Value>,
    },
}

impl ClientMessage {
    /// Event kind, used as the rate limiting key
    pub fn kind(&self) -> &'static str {
        match self {
            ClientMessage::Join { .. } => "join",
            ClientMessage::Start => "start",
            ClientMessage::Stop => "stop",
            ClientMessage::Reset { .. } => "reset",
            ClientMessage::Set { .. } => "set",
            ClientMessage::Adjust { .. } => "adjust",
            ClientMessage::UpdateConfig { .. } => "update-config",
        }
    }
}

/// Outbound events
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum ServerEvent {
    /// Reply to `join`, sent to the joining session only
    InitialState { state: Snapshot },
    Sync { state: Snapshot },
    ConfigUpdated { state: Snapshot },
    Ended { channel: String, behavior: EndBehavior },
    Error { message: String },
}

impl ServerEvent {
    pub fn sync(state: Snapshot) -> Self {
        ServerEvent::Sync { state }
    }

    pub fn config_updated(state: Snapshot) -> Self {
        ServerEvent::ConfigUpdated { state }
    }

    pub fn error(message: impl Into<String>) -> Self {
        ServerEvent::Error {
            message: message.into(),
        }
    }

    /// The carried snapshot, for events that have one
    pub fn snapshot(&self) -> Option<&Snapshot> {
        match self {
            ServerEvent::InitialState { state }
            | ServerEvent::Sync { state }
            | ServerEvent::ConfigUpdated { state } => Some(state),
            ServerEvent::Ended { .. } | ServerEvent::Error { .. } => None,
        }
    }
}
