//! Timer synchronization engine
//!
//! This module contains the per-channel timer model, its field schema,
//! time formatting and the transition logic over persisted state.

pub mod engine;
pub mod format;
pub mod model;
pub mod schema;

// Re-export main types
pub use engine::{EndResolution, Restored, Schedule, SetRequest, TimerEngine, Transition};
pub use format::{format_time, parse_duration};
pub use model::{
    EndBehavior, ParseEnumError, Snapshot, TimeFormat, Timer, TimerMode, TimerStyle, TimerUpdate,
    DEFAULT_DURATION_MS,
};
