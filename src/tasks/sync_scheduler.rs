//! Periodic sync broadcast for one running channel

use std::time::Duration;

use tokio::{
    task::JoinHandle,
    time::{interval_at, Instant, MissedTickBehavior},
};
use tracing::debug;

use crate::state::TimerService;

/// Spawn the ticker task of `channel`.
///
/// The first tick fires one `period` after spawning; the operation that
/// started the timer has already broadcast the initial state.
pub fn spawn_ticker(
    service: TimerService,
    channel: String,
    generation: u64,
    period: Duration,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        debug!(channel = %channel, generation, "Ticker started");

        let mut interval = interval_at(Instant::now() + period, period);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            interval.tick().await;
            if !service.tick(&channel, generation).await {
                break;
            }
        }

        debug!(channel = %channel, generation, "Ticker finished");
    })
}
