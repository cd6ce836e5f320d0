//! Per-channel runtime slots
//!
//! Each channel that has been referenced gets one slot: a mutex that
//! serializes every read-modify-write on that channel, and the channel's
//! ticker if it is running. Slots of different channels never contend.

use std::sync::Arc;

use dashmap::DashMap;
use tokio::{sync::Mutex, task::JoinHandle};
use tracing::debug;

/// The periodic broadcast task of one running channel
#[derive(Debug)]
pub struct Ticker {
    handle: JoinHandle<()>,
    generation: u64,
    /// Whether this run already emitted its end event
    end_notified: bool,
}

/// State guarded by a channel's mutex
#[derive(Debug, Default)]
pub struct ChannelRuntime {
    ticker: Option<Ticker>,
    generations: u64,
}

impl ChannelRuntime {
    pub fn is_ticking(&self) -> bool {
        self.ticker.is_some()
    }

    /// Replace any existing ticker with a new one. `spawn` receives the
    /// generation the new task must present on every tick.
    pub fn install<F>(&mut self, spawn: F) -> u64
    where
        F: FnOnce(u64) -> JoinHandle<()>,
    {
        self.cancel();
        self.generations += 1;
        let generation = self.generations;
        self.ticker = Some(Ticker {
            handle: spawn(generation),
            generation,
            end_notified: false,
        });
        generation
    }

    /// Abort the ticker, if any. Returns whether one was running.
    pub fn cancel(&mut self) -> bool {
        match self.ticker.take() {
            Some(ticker) => {
                ticker.handle.abort();
                debug!(generation = ticker.generation, "Ticker cancelled");
                true
            }
            None => false,
        }
    }

    /// Drop the ticker without aborting it. Used by the ticker task itself
    /// right before it exits.
    pub fn release(&mut self, generation: u64) {
        if self.is_current(generation) {
            self.ticker = None;
        }
    }

    pub fn is_current(&self, generation: u64) -> bool {
        self.ticker
            .as_ref()
            .is_some_and(|ticker| ticker.generation == generation)
    }

    /// Record the end event for this run. Returns `false` if it had already
    /// been recorded, in which case the event must not be sent again.
    pub fn notify_end(&mut self) -> bool {
        match self.ticker.as_mut() {
            Some(ticker) if !ticker.end_notified => {
                ticker.end_notified = true;
                true
            }
            _ => false,
        }
    }

    /// Allow one more end event in the current run
    pub fn rearm(&mut self) {
        if let Some(ticker) = self.ticker.as_mut() {
            ticker.end_notified = false;
        }
    }
}

pub type ChannelSlot = Arc<Mutex<ChannelRuntime>>;

/// Lazily created slots, one per channel
#[derive(Debug, Default)]
pub struct ChannelRegistry {
    slots: DashMap<String, ChannelSlot>,
}

impl ChannelRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn slot(&self, channel: &str) -> ChannelSlot {
        if let Some(slot) = self.slots.get(channel) {
            return Arc::clone(slot.value());
        }
        Arc::clone(self.slots.entry(channel.to_string()).or_default().value())
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    /// Every slot created so far
    pub fn slots(&self) -> Vec<(String, ChannelSlot)> {
        self.slots
            .iter()
            .map(|entry| (entry.key().clone(), Arc::clone(entry.value())))
            .collect()
    }

    /// Channels with a live ticker, sorted. Slots busy with an operation are
    /// waited on.
    pub async fn ticking_channels(&self) -> Vec<String> {
        let mut ticking = Vec::new();
        for (channel, slot) in self.slots() {
            if slot.lock().await.is_ticking() {
                ticking.push(channel);
            }
        }
        ticking.sort();
        ticking
    }

    /// Remove slots that are idle: not ticking, not locked, not held elsewhere.
    /// Returns how many were removed.
    pub fn prune_idle(&self) -> usize {
        let before = self.slots.len();
        self.slots.retain(|_, slot| {
            if Arc::strong_count(slot) > 1 {
                return true;
            }
            match slot.try_lock() {
                Ok(runtime) => runtime.is_ticking(),
                Err(_) => true,
            }
        });
        before.saturating_sub(self.slots.len())
    }
}
