//! Session boundary
//!
//! Channel membership and fan-out ([`Hub`]), the JSON wire messages, the
//! per-session rate limiter and the request handler of one connection.

pub mod hub;
pub mod messages;
pub mod rate_limit;
pub mod session;

pub use hub::{Broadcaster, EventSender, Hub, SessionId};
pub use messages::{ClientMessage, DurationInput, ServerEvent};
pub use rate_limit::{EventLimiter, DEFAULT_EVENTS_PER_SECOND};
pub use session::Session;
