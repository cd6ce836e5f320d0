//! Timer transitions over persisted channel state
//!
//! Only an anchor (`started_at`) and a base value (`remaining_ms`) are ever
//! stored for a running timer. The live value is recomputed from the clock,
//! so time spent untouched, including process downtime, always counts as
//! elapsed and nothing drifts from periodic writes.
//!
//! The engine is not safe to call concurrently for the same channel; callers
//! serialize per channel (see `state::ChannelRegistry`).

use std::sync::Arc;

use serde_json::{Map, Value};
use tracing::{debug, error, info, warn};

use super::{
    model::{EndBehavior, Snapshot, Timer, TimerMode, TimerUpdate},
    schema::{clamp_delta, validate_patch, MAX_NEGATIVE_MS},
};
use crate::{
    clock::Clock,
    store::{ChannelStore, StoreResult},
};

/// What the scheduler should do after a transition
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Schedule {
    /// The timer entered the running state
    Begin,
    /// The timer is stopped
    Halt,
    /// Ticking is unchanged
    Keep,
    /// Still running, and a new zero crossing is possible
    Rearm,
}

#[derive(Debug, Clone)]
pub struct Transition {
    pub snapshot: Snapshot,
    pub schedule: Schedule,
}

/// Result of applying a channel's end behavior
#[derive(Debug, Clone)]
pub struct EndResolution {
    pub behavior: EndBehavior,
    /// Whether the timer was force-stopped
    pub stopped: bool,
    pub snapshot: Snapshot,
}

/// Outcome of restoring one running timer at start-up
#[derive(Debug, Clone)]
pub enum Restored {
    /// Re-anchored and should tick again. `crossed_zero` is set when a
    /// `negative` countdown passed zero while the process was down.
    Resumed { snapshot: Snapshot, crossed_zero: bool },
    /// Ended while the process was down and is now stopped
    Ended { snapshot: Snapshot, behavior: EndBehavior },
    /// Marked running without an anchor; now stopped at its base value
    Repaired { snapshot: Snapshot },
}

/// Fields of a `set` request that survived validation
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SetRequest {
    pub duration_ms: Option<i64>,
    pub mode: Option<TimerMode>,
    pub remaining_ms: Option<i64>,
}

pub struct TimerEngine {
    store: Arc<dyn ChannelStore>,
    clock: Arc<dyn Clock>,
}

impl std::fmt::Debug for TimerEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TimerEngine").finish()
    }
}

impl TimerEngine {
    pub fn new(store: Arc<dyn ChannelStore>, clock: Arc<dyn Clock>) -> Self {
        Self { store, clock }
    }

    pub fn store(&self) -> &Arc<dyn ChannelStore> {
        &self.store
    }

    /// Current snapshot with the live value. Never writes beyond lazy creation.
    pub fn get_state(&self, channel: &str) -> StoreResult<Snapshot> {
        let now = self.clock.now_ms();
        Ok(self.store.get_or_create(channel)?.snapshot(now))
    }

    pub fn start(&self, channel: &str) -> StoreResult<Transition> {
        let now = self.clock.now_ms();
        let timer = self.store.get_or_create(channel)?;
        if timer.is_running {
            return Ok(Transition {
                snapshot: timer.snapshot(now),
                schedule: Schedule::Keep,
            });
        }

        let timer = self.store.update(channel, &TimerUpdate::anchored(None, now))?;
        info!(channel, remaining_ms = timer.remaining_ms, "Timer started");
        Ok(Transition {
            snapshot: timer.snapshot(now),
            schedule: Schedule::Begin,
        })
    }

    pub fn stop(&self, channel: &str) -> StoreResult<Transition> {
        let now = self.clock.now_ms();
        let timer = self.store.get_or_create(channel)?;
        if !timer.is_running {
            return Ok(Transition {
                snapshot: timer.snapshot(now),
                schedule: Schedule::Keep,
            });
        }

        let live = timer.live_remaining(now);
        let timer = self.store.update(channel, &TimerUpdate::halted(live))?;
        info!(channel, remaining_ms = live, "Timer stopped");
        Ok(Transition {
            snapshot: timer.snapshot(now),
            schedule: Schedule::Halt,
        })
    }

    /// Back to the configured start value, stopped, whatever the prior state
    pub fn reset(&self, channel: &str, duration_ms: Option<i64>) -> StoreResult<Transition> {
        let now = self.clock.now_ms();
        let timer = self.store.get_or_create(channel)?;
        let duration = duration_ms.unwrap_or(timer.duration_ms);

        let update = TimerUpdate {
            duration_ms: Some(duration),
            ..TimerUpdate::halted(timer.mode.start_value(duration))
        };
        let timer = self.store.update(channel, &update)?;
        info!(channel, duration_ms = duration, "Timer reset");
        Ok(Transition {
            snapshot: timer.snapshot(now),
            schedule: Schedule::Halt,
        })
    }

    /// Apply duration/mode/remaining and stop.
    ///
    /// A duration or mode change puts remaining back at the mode's start
    /// value; an explicit remaining in the same request wins over that.
    /// With no timing change, the live value is kept as the new base.
    pub fn set(&self, channel: &str, request: SetRequest) -> StoreResult<Transition> {
        let now = self.clock.now_ms();
        let timer = self.store.get_or_create(channel)?;

        let mode = request.mode.unwrap_or(timer.mode);
        let duration = request.duration_ms.unwrap_or(timer.duration_ms);

        let mut remaining = timer.live_remaining(now);
        if request.duration_ms.is_some() || request.mode.is_some() {
            remaining = mode.start_value(duration);
        }
        if let Some(explicit) = request.remaining_ms {
            remaining = explicit;
        }

        let update = TimerUpdate {
            mode: request.mode,
            duration_ms: request.duration_ms,
            ..TimerUpdate::halted(remaining)
        };
        let timer = self.store.update(channel, &update)?;
        info!(channel, ?request, remaining_ms = remaining, "Timer set");
        Ok(Transition {
            snapshot: timer.snapshot(now),
            schedule: Schedule::Halt,
        })
    }

    /// Shift the current value by `delta_ms`, never below zero.
    ///
    /// A running timer is re-anchored at `now` so the elapsed time is folded
    /// into the new base.
    pub fn adjust(&self, channel: &str, delta_ms: i64) -> StoreResult<Transition> {
        let now = self.clock.now_ms();
        let timer = self.store.get_or_create(channel)?;
        let delta = clamp_delta(delta_ms);
        let adjusted = timer.live_remaining(now).saturating_add(delta).max(0);

        let (update, schedule) = if timer.is_running {
            let schedule = if timer.mode == TimerMode::Countdown && adjusted > 0 {
                Schedule::Rearm
            } else {
                Schedule::Keep
            };
            (TimerUpdate::anchored(Some(adjusted), now), schedule)
        } else {
            let update = TimerUpdate {
                remaining_ms: Some(adjusted),
                ..TimerUpdate::default()
            };
            (update, Schedule::Keep)
        };

        let timer = self.store.update(channel, &update)?;
        debug!(channel, delta_ms = delta, remaining_ms = adjusted, "Timer adjusted");
        Ok(Transition {
            snapshot: timer.snapshot(now),
            schedule,
        })
    }

    /// Validate and apply a display/config patch. Never changes run state.
    ///
    /// Timing fields (mode, duration, remaining) are only honoured while the
    /// timer is stopped, following the same reset rule as [`Self::set`].
    pub fn update_config(
        &self,
        channel: &str,
        patch: &Map<String, Value>,
    ) -> StoreResult<Transition> {
        let now = self.clock.now_ms();
        let timer = self.store.get_or_create(channel)?;
        let mut update = validate_patch(patch);

        if update.touches_timing() {
            if timer.is_running {
                debug!(channel, "Ignoring timing fields in config patch for running timer");
                update = update.without_timing();
            } else if update.remaining_ms.is_none()
                && (update.mode.is_some() || update.duration_ms.is_some())
            {
                let mode = update.mode.unwrap_or(timer.mode);
                let duration = update.duration_ms.unwrap_or(timer.duration_ms);
                update.remaining_ms = Some(mode.start_value(duration));
            }
        }

        let timer = self.store.update(channel, &update)?;
        debug!(channel, "Timer config updated");
        Ok(Transition {
            snapshot: timer.snapshot(now),
            schedule: Schedule::Keep,
        })
    }

    /// Apply the end behavior of a running countdown at or below zero.
    ///
    /// `stop`, `hide` and `confetti` stop at zero. `negative` keeps running
    /// and is only stopped, keeping its negative value, once it falls past
    /// the 24 hour floor. Calling this again before anything changes is
    /// harmless: a `negative` timer above the floor is not written.
    pub fn handle_timer_end(&self, channel: &str) -> StoreResult<EndResolution> {
        let now = self.clock.now_ms();
        let timer = self.store.get_or_create(channel)?;
        let live = timer.live_remaining(now);
        self.resolve_end(&timer, live, now)
    }

    fn resolve_end(&self, timer: &Timer, live: i64, now: i64) -> StoreResult<EndResolution> {
        let behavior = timer.end_behavior;
        let stop_at = match behavior {
            EndBehavior::Stop | EndBehavior::Hide | EndBehavior::Confetti => Some(0),
            EndBehavior::Negative if live < -MAX_NEGATIVE_MS => Some(live),
            EndBehavior::Negative => None,
        };

        match stop_at {
            Some(remaining) => {
                let stopped = self
                    .store
                    .update(&timer.channel, &TimerUpdate::halted(remaining))?;
                info!(channel = %timer.channel, %behavior, remaining_ms = remaining, "Timer ended");
                Ok(EndResolution {
                    behavior,
                    stopped: true,
                    snapshot: stopped.snapshot(now),
                })
            }
            None => Ok(EndResolution {
                behavior,
                stopped: false,
                snapshot: timer.snapshot(now),
            }),
        }
    }

    /// Rebuild running timers after a restart.
    ///
    /// Downtime counts as elapsed time. Countdowns that crossed zero while
    /// down are resolved with their end behavior; everything else still
    /// running is re-anchored at `now` with its recomputed value. A failure
    /// on one channel is logged and does not stop the others.
    pub fn restore_timers(&self) -> StoreResult<Vec<Restored>> {
        let now = self.clock.now_ms();
        let mut restored = Vec::new();

        for timer in self.store.list_all()? {
            if !timer.is_running {
                continue;
            }
            match self.restore_one(&timer, now) {
                Ok(outcome) => restored.push(outcome),
                Err(e) => error!(channel = %timer.channel, "Failed to restore timer: {}", e),
            }
        }

        info!("Restored {} running timer(s)", restored.len());
        Ok(restored)
    }

    fn restore_one(&self, timer: &Timer, now: i64) -> StoreResult<Restored> {
        let channel = timer.channel.as_str();
        if timer.started_at.is_none() {
            warn!(channel, "Running timer has no anchor, stopping it");
            let repaired = self
                .store
                .update(channel, &TimerUpdate::halted(timer.remaining_ms))?;
            return Ok(Restored::Repaired {
                snapshot: repaired.snapshot(now),
            });
        }

        let live = timer.live_remaining(now);
        let crossed_zero = timer.mode == TimerMode::Countdown && live <= 0;
        if crossed_zero {
            let resolution = self.resolve_end(timer, live, now)?;
            if resolution.stopped {
                info!(channel, "Timer ended while the server was down");
                return Ok(Restored::Ended {
                    snapshot: resolution.snapshot,
                    behavior: resolution.behavior,
                });
            }
        }

        let resumed = self
            .store
            .update(channel, &TimerUpdate::anchored(Some(live), now))?;
        info!(channel, remaining_ms = live, "Restored running timer");
        Ok(Restored::Resumed {
            snapshot: resumed.snapshot(now),
            crossed_zero,
        })
    }
}
