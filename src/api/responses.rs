//! API response structures

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Server status with channel activity
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatusResponse {
    pub uptime: String,
    pub port: u16,
    pub host: String,
    /// Channels with at least one connected session
    pub active_channels: usize,
    /// Channels whose timer is ticking
    pub running_timers: usize,
    pub version: String,
}

/// Health check response
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub timestamp: DateTime<Utc>,
    pub version: String,
}

impl HealthResponse {
    /// Create a new health response
    pub fn ok() -> Self {
        Self {
            status: "ok".to_string(),
            timestamp: Utc::now(),
            version: VERSION.to_string(),
        }
    }
}

impl StatusResponse {
    pub fn version() -> String {
        VERSION.to_string()
    }
}
