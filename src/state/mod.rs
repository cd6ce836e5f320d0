//! State management module
//!
//! This module contains the shared application state, the per-channel
//! runtime slots and the timer service that serializes operations on them.

pub mod app_state;
pub mod channel;
pub mod service;

// Re-export main types
pub use app_state::AppState;
pub use channel::{ChannelRegistry, ChannelRuntime};
pub use service::{TimerService, DEFAULT_SYNC_INTERVAL};
