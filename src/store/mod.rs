//! Channel state persistence
//!
//! The engine only sees the [`ChannelStore`] trait; [`SqliteStore`] is the
//! production backend.

pub mod sqlite;

use std::time::Duration;

use thiserror::Error;

use crate::timer::{Timer, TimerUpdate};

pub use sqlite::SqliteStore;

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("store lock poisoned")]
    LockPoisoned,

    #[error("corrupt record for channel '{channel}': {reason}")]
    Corrupt { channel: String, reason: String },
}

pub type StoreResult<T> = std::result::Result<T, StoreError>;

/// Durable per-channel timer records.
///
/// Every call is atomic on its own: an `update` either lands completely or
/// not at all.
pub trait ChannelStore: Send + Sync {
    /// Fetch the record, creating it with defaults on first access
    fn get_or_create(&self, channel: &str) -> StoreResult<Timer>;

    /// Apply a partial update and return the full record
    fn update(&self, channel: &str, update: &TimerUpdate) -> StoreResult<Timer>;

    fn list_all(&self) -> StoreResult<Vec<Timer>>;

    /// Delete records that are not running and were last touched more than
    /// `max_age` ago. Returns how many were removed.
    fn delete_stale(&self, max_age: Duration) -> StoreResult<usize>;
}
