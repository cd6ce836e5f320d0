//! HTTP endpoint handlers

use std::sync::Arc;

use axum::{
    extract::{Path, State},
    response::Json,
};
use tracing::debug;

use super::responses::{HealthResponse, StatusResponse};
use crate::{error::Result, state::AppState, timer::Snapshot, utils::sanitize_channel};

/// Handle GET /api/channel/:channel - Read-only snapshot for polling integrations
pub async fn channel_handler(
    Path(channel): Path<String>,
    State(state): State<Arc<AppState>>,
) -> Result<Json<Snapshot>> {
    let channel = sanitize_channel(&channel)?;
    debug!(channel = %channel, "Channel state requested");
    Ok(Json(state.service.snapshot(&channel)?))
}

/// Handle GET /status - Return current server status
pub async fn status_handler(State(state): State<Arc<AppState>>) -> Json<StatusResponse> {
    Json(StatusResponse {
        uptime: state.get_uptime(),
        port: state.port,
        host: state.host.clone(),
        active_channels: state.hub.channel_count(),
        running_timers: state.service.registry().ticking_channels().await.len(),
        version: StatusResponse::version(),
    })
}

/// Handle GET /health - Health check endpoint
pub async fn health_handler() -> Json<HealthResponse> {
    Json(HealthResponse::ok())
}
