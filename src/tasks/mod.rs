//! Background tasks module
//!
//! This module contains the per-channel ticker and the periodic stale sweep
//! that run alongside the HTTP server.

pub mod stale_cleanup;
pub mod sync_scheduler;

// Re-export main functions
pub use stale_cleanup::{stale_cleanup_task, sweep};
pub use sync_scheduler::spawn_ticker;
