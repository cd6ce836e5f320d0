//! Per-session control event limiter (GCRA via `governor`)

use std::num::NonZeroU32;

use governor::{DefaultKeyedRateLimiter, Quota, RateLimiter};
use nonzero_ext::nonzero;

use crate::error::{Error, Result};

/// Default control events per second, per event kind
pub const DEFAULT_EVENTS_PER_SECOND: NonZeroU32 = nonzero!(10u32);

/// Limits each event kind independently within one session
pub struct EventLimiter {
    limiter: DefaultKeyedRateLimiter<&'static str>,
}

impl EventLimiter {
    pub fn per_second(events: NonZeroU32) -> Self {
        Self {
            limiter: RateLimiter::keyed(Quota::per_second(events)),
        }
    }

    pub fn check(&self, kind: &'static str) -> Result<()> {
        self.limiter.check_key(&kind).map_err(|_| Error::RateLimited)
    }
}

impl Default for EventLimiter {
    fn default() -> Self {
        Self::per_second(DEFAULT_EVENTS_PER_SECOND)
    }
}

impl std::fmt::Debug for EventLimiter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventLimiter").finish_non_exhaustive()
    }
}
