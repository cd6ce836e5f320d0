//! Utility functions module
//!
//! This module contains utility functions used throughout the application.

pub mod channel;
pub mod signals;

// Re-export main functions
pub use channel::sanitize_channel;
pub use signals::shutdown_signal;
