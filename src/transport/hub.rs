//! In-process channel membership and fan-out

use std::sync::{
    atomic::{AtomicU64, Ordering},
    Arc,
};

use dashmap::DashMap;
use tokio::sync::mpsc;
use tracing::{debug, info};

use super::messages::ServerEvent;

pub type SessionId = u64;

/// Outbound queue of one session
pub type EventSender = mpsc::UnboundedSender<ServerEvent>;

/// "Broadcast to channel" primitive the timer service publishes through
pub trait Broadcaster: Send + Sync {
    /// Deliver an event to every subscriber of `channel`. Returns how many
    /// sessions it reached.
    fn broadcast(&self, channel: &str, event: ServerEvent) -> usize;
}

#[derive(Debug, Clone)]
struct Subscriber {
    session: SessionId,
    sender: EventSender,
}

/// Routes events to the sessions joined to each channel.
///
/// A session belongs to at most one channel at a time.
#[derive(Debug, Default)]
pub struct Hub {
    /// channel -> subscribers
    channels: DashMap<String, Vec<Subscriber>>,
    /// session -> channel, for cleanup
    sessions: DashMap<SessionId, String>,
    next_session: AtomicU64,
}

impl Hub {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn next_session_id(&self) -> SessionId {
        self.next_session.fetch_add(1, Ordering::Relaxed) + 1
    }

    /// Join `session` to `channel`, leaving any channel it was in before
    pub fn subscribe(&self, channel: &str, session: SessionId, sender: EventSender) {
        self.unsubscribe(session);

        self.channels
            .entry(channel.to_string())
            .or_default()
            .push(Subscriber { session, sender });
        self.sessions.insert(session, channel.to_string());

        info!(channel, session, "Session joined channel");
    }

    /// Remove `session` from its channel. Returns the channel it left.
    pub fn unsubscribe(&self, session: SessionId) -> Option<String> {
        let (_, channel) = self.sessions.remove(&session)?;

        if let Some(mut subscribers) = self.channels.get_mut(&channel) {
            subscribers.retain(|sub| sub.session != session);
            if subscribers.is_empty() {
                drop(subscribers);
                self.channels.remove_if(&channel, |_, subs| subs.is_empty());
                debug!(channel = %channel, "Channel has no more subscribers, removed");
            }
        }

        info!(channel = %channel, session, "Session left channel");
        Some(channel)
    }

    pub fn subscriber_count(&self, channel: &str) -> usize {
        self.channels.get(channel).map_or(0, |subs| subs.len())
    }

    /// Channels with at least one subscriber
    pub fn channel_count(&self) -> usize {
        self.channels.len()
    }
}

impl Broadcaster for Hub {
    fn broadcast(&self, channel: &str, event: ServerEvent) -> usize {
        let Some(subscribers) = self.channels.get(channel) else {
            return 0;
        };

        let mut sent = 0;
        for subscriber in subscribers.iter() {
            // A closed queue means the session is going away and will unsubscribe itself
            if subscriber.sender.send(event.clone()).is_ok() {
                sent += 1;
            }
        }
        sent
    }
}
