//! Channel id sanitizing

use crate::error::{Error, Result};

/// Longest accepted channel id
pub const MAX_CHANNEL_LEN: usize = 64;

/// Normalize a channel id: lowercase ASCII letters, digits, `-` and `_`.
/// Anything else is dropped; an id that ends up empty is rejected.
pub fn sanitize_channel(raw: &str) -> Result<String> {
    let channel: String = raw
        .trim()
        .chars()
        .map(|c| c.to_ascii_lowercase())
        .filter(|c| c.is_ascii_alphanumeric() || *c == '-' || *c == '_')
        .take(MAX_CHANNEL_LEN)
        .collect();

    if channel.is_empty() {
        return Err(Error::InvalidChannel);
    }
    Ok(channel)
}
