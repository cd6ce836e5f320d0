//! Timer Sync - Authoritative shared timers for live overlays
//!
//! The server owns each channel's timer as an anchor plus a base value and
//! broadcasts snapshots to every viewer joined to the channel. Viewers
//! extrapolate locally between snapshots.

pub mod api;
pub mod client;
pub mod clock;
pub mod config;
pub mod error;
pub mod predictor;
pub mod state;
pub mod store;
pub mod tasks;
pub mod timer;
pub mod transport;
pub mod utils;

// Re-export commonly used types
pub use api::create_router;
pub use config::Config;
pub use error::{Error, Result};
pub use state::{AppState, TimerService};
pub use utils::signals::shutdown_signal;
