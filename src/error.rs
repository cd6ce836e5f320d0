//! Errors surfaced to sessions and HTTP callers
//!
//! The `Display` text of every variant is the exact message delivered in an
//! `error {message}` event.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use thiserror::Error;
use tracing::error;

use crate::store::StoreError;

#[derive(Error, Debug)]
pub enum Error {
    #[error("Invalid channel name")]
    InvalidChannel,

    #[error("Not joined to any channel")]
    NotJoined,

    #[error("Invalid message: {0}")]
    Malformed(String),

    #[error("Invalid {field} value")]
    InvalidValue { field: &'static str },

    #[error("Invalid mode")]
    InvalidMode,

    #[error("Rate limit exceeded")]
    RateLimited,

    #[error("Timer store unavailable")]
    Store(#[from] StoreError),
}

pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    pub fn status_code(&self) -> StatusCode {
        match self {
            Error::Store(_) => StatusCode::INTERNAL_SERVER_ERROR,
            Error::RateLimited => StatusCode::TOO_MANY_REQUESTS,
            _ => StatusCode::BAD_REQUEST,
        }
    }
}

impl IntoResponse for Error {
    fn into_response(self) -> Response {
        if let Error::Store(e) = &self {
            error!("Store failure: {}", e);
        }
        let body = Json(json!({ "error": self.to_string() }));
        (self.status_code(), body).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn messages_match_protocol_text() {
        assert_eq!(Error::InvalidValue { field: "duration" }.to_string(), "Invalid duration value");
        assert_eq!(Error::InvalidValue { field: "adjustment" }.to_string(), "Invalid adjustment value");
        assert_eq!(Error::RateLimited.to_string(), "Rate limit exceeded");
        assert_eq!(Error::Store(StoreError::LockPoisoned).to_string(), "Timer store unavailable");
    }

    #[test]
    fn store_failures_are_server_errors() {
        assert_eq!(Error::Store(StoreError::LockPoisoned).status_code(), StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(Error::InvalidChannel.status_code(), StatusCode::BAD_REQUEST);
    }
}
