//! Main application state shared by the HTTP and WebSocket handlers

use std::{num::NonZeroU32, sync::Arc, time::Instant};

use tokio::sync::mpsc;

use super::TimerService;
use crate::transport::{EventLimiter, Hub, ServerEvent, Session};

#[derive(Debug)]
pub struct AppState {
    pub service: TimerService,
    pub hub: Arc<Hub>,
    /// Server metadata
    pub start_time: Instant,
    pub port: u16,
    pub host: String,
    /// Control events per second, per event kind, per session
    pub rate_limit: NonZeroU32,
}

impl AppState {
    pub fn new(
        service: TimerService,
        hub: Arc<Hub>,
        host: String,
        port: u16,
        rate_limit: NonZeroU32,
    ) -> Self {
        Self {
            service,
            hub,
            start_time: Instant::now(),
            port,
            host,
            rate_limit,
        }
    }

    /// A new session whose replies go to `outbound`
    pub fn open_session(&self, outbound: mpsc::UnboundedSender<ServerEvent>) -> Session {
        Session::new(
            Arc::clone(&self.hub),
            self.service.clone(),
            EventLimiter::per_second(self.rate_limit),
            outbound,
        )
    }

    /// Calculate server uptime as a formatted string
    pub fn get_uptime(&self) -> String {
        let duration = self.start_time.elapsed();
        let hours = duration.as_secs() / 3600;
        let minutes = (duration.as_secs() % 3600) / 60;
        let seconds = duration.as_secs() % 60;

        if hours > 0 {
            format!("{}h {}m {}s", hours, minutes, seconds)
        } else if minutes > 0 {
            format!("{}m {}s", minutes, seconds)
        } else {
            format!("{}s", seconds)
        }
    }
}
