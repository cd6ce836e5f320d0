//! Client-side prediction between server snapshots
//!
//! A viewer keeps the last snapshot it received and the local instant it
//! arrived. Each display frame extrapolates from that pair with the same
//! formula the engine uses for live remaining time. A new snapshot simply
//! replaces the old one; the display jumps to it without smoothing.

use std::{
    sync::{Arc, Mutex},
    time::Duration,
};

use tokio::{
    task::JoinHandle,
    time::{interval, Instant, MissedTickBehavior},
};
use tracing::debug;

use crate::{
    timer::{format_time, EndBehavior, Snapshot, TimerMode},
    transport::ServerEvent,
};

/// Roughly one display refresh
pub const DEFAULT_FRAME_INTERVAL: Duration = Duration::from_millis(16);

/// The value re-arms the celebration once it climbs back above this
const CELEBRATION_REARM_MS: i64 = 1_000;

/// What a viewer should draw right now
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub remaining_ms: i64,
    pub text: String,
    pub hidden: bool,
    /// Set on exactly one frame per zero crossing of a `confetti` timer
    pub celebrate: bool,
}

#[derive(Debug, Default)]
pub struct Predictor {
    latest: Option<(Snapshot, Instant)>,
    hidden: bool,
    celebrated: bool,
    pending_celebration: bool,
    last_value: Option<i64>,
}

impl Predictor {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn snapshot(&self) -> Option<&Snapshot> {
        self.latest.as_ref().map(|(snapshot, _)| snapshot)
    }

    /// Feed a server event received at `now`
    pub fn on_event(&mut self, event: &ServerEvent, now: Instant) {
        match event {
            ServerEvent::Ended { behavior, .. } => match behavior {
                EndBehavior::Hide => self.hidden = true,
                EndBehavior::Confetti if !self.celebrated => {
                    self.celebrated = true;
                    self.pending_celebration = true;
                }
                _ => {}
            },
            ServerEvent::Error { .. } => {}
            other => {
                if let Some(snapshot) = other.snapshot() {
                    self.replace(snapshot.clone(), now);
                }
            }
        }
    }

    fn replace(&mut self, snapshot: Snapshot, now: Instant) {
        let timer = &snapshot.timer;
        if timer.end_behavior != EndBehavior::Hide
            || timer.mode == TimerMode::Countup
            || timer.remaining_ms > 0
        {
            self.hidden = false;
        } else if !timer.is_running {
            self.hidden = true;
        }
        self.latest = Some((snapshot, now));
    }

    /// Extrapolated value at `now`, before display clamping
    pub fn predicted_ms(&self, now: Instant) -> Option<i64> {
        let (snapshot, received_at) = self.latest.as_ref()?;
        let timer = &snapshot.timer;
        if !timer.is_running {
            return Some(timer.remaining_ms);
        }
        let elapsed = now.saturating_duration_since(*received_at).as_millis() as i64;
        Some(timer.mode.project(timer.remaining_ms, elapsed))
    }

    /// Compute the frame to draw at `now`. `None` until a snapshot arrives.
    pub fn frame(&mut self, now: Instant) -> Option<Frame> {
        let predicted = self.predicted_ms(now)?;
        let (snapshot, _) = self.latest.as_ref()?;
        let timer = &snapshot.timer;
        let countdown = timer.mode == TimerMode::Countdown;

        let value = match timer.end_behavior {
            EndBehavior::Stop | EndBehavior::Confetti if countdown => predicted.max(0),
            _ => predicted,
        };
        let text = format_time(value, timer.format);

        let mut celebrate = std::mem::take(&mut self.pending_celebration);
        if countdown && timer.end_behavior == EndBehavior::Confetti {
            let crossed = self.last_value.is_some_and(|last| last > 0) && value <= 0;
            if crossed && !self.celebrated {
                self.celebrated = true;
                celebrate = true;
            } else if value > CELEBRATION_REARM_MS {
                self.celebrated = false;
            }
        }
        self.last_value = Some(value);

        Some(Frame {
            remaining_ms: value,
            text,
            hidden: self.hidden,
            celebrate,
        })
    }
}

/// Frame-driven loop rendering a shared [`Predictor`].
///
/// The task is aborted when this handle is cancelled or dropped. Only
/// [`RenderLoop::cancel`] waits for a frame already being drawn.
#[derive(Debug)]
pub struct RenderLoop {
    handle: JoinHandle<()>,
}

impl RenderLoop {
    pub fn spawn<F>(predictor: Arc<Mutex<Predictor>>, frame_interval: Duration, mut render: F) -> Self
    where
        F: FnMut(&Frame) + Send + 'static,
    {
        let handle = tokio::spawn(async move {
            let mut frames = interval(frame_interval);
            frames.set_missed_tick_behavior(MissedTickBehavior::Skip);

            loop {
                let now = frames.tick().await;
                let frame = match predictor.lock() {
                    Ok(mut predictor) => predictor.frame(now),
                    Err(_) => break,
                };
                if let Some(frame) = frame {
                    render(&frame);
                }
            }
            debug!("Render loop stopped");
        });

        Self { handle }
    }

    /// Stop rendering and wait for the task to exit. No frame is drawn after
    /// this returns.
    pub async fn cancel(mut self) {
        self.handle.abort();
        let _ = (&mut self.handle).await;
    }
}

impl Drop for RenderLoop {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;
    use crate::timer::{TimeFormat, Timer};

    fn snapshot(remaining_ms: i64, running: bool, mode: TimerMode, behavior: EndBehavior) -> Snapshot {
        let mut timer = Timer::new("lobby", 0);
        timer.remaining_ms = remaining_ms;
        timer.is_running = running;
        timer.started_at = running.then_some(0);
        timer.mode = mode;
        timer.end_behavior = behavior;
        timer.snapshot(0)
    }

    fn sync(state: Snapshot) -> ServerEvent {
        ServerEvent::sync(state)
    }

    fn at(base: Instant, ms: u64) -> Instant {
        base + Duration::from_millis(ms)
    }

    #[test]
    fn nothing_to_draw_before_first_snapshot() {
        let mut predictor = Predictor::new();
        assert_eq!(predictor.frame(Instant::now()), None);
    }

    #[test]
    fn extrapolates_by_mode() {
        let base = Instant::now();
        let mut predictor = Predictor::new();

        predictor.on_event(&sync(snapshot(10_000, true, TimerMode::Countdown, EndBehavior::Stop)), base);
        let frame = predictor.frame(at(base, 2_500)).unwrap();
        assert_eq!(frame.remaining_ms, 7_500);
        assert_eq!(frame.text, "07");

        predictor.on_event(&sync(snapshot(10_000, true, TimerMode::Countup, EndBehavior::Stop)), base);
        assert_eq!(predictor.frame(at(base, 2_500)).unwrap().remaining_ms, 12_500);

        predictor.on_event(&sync(snapshot(10_000, false, TimerMode::Countdown, EndBehavior::Stop)), base);
        assert_eq!(predictor.frame(at(base, 60_000)).unwrap().remaining_ms, 10_000);
    }

    #[test]
    fn resync_replaces_without_smoothing() {
        let base = Instant::now();
        let mut predictor = Predictor::new();
        predictor.on_event(&sync(snapshot(60_000, true, TimerMode::Countdown, EndBehavior::Stop)), base);
        assert_eq!(predictor.frame(at(base, 1_000)).unwrap().remaining_ms, 59_000);

        // Server was down for a while; the new snapshot is ground truth
        predictor.on_event(&sync(snapshot(20_000, true, TimerMode::Countdown, EndBehavior::Stop)), at(base, 1_000));
        assert_eq!(predictor.frame(at(base, 1_000)).unwrap().remaining_ms, 20_000);
    }

    #[test]
    fn stop_clamps_at_zero_but_negative_does_not() {
        let base = Instant::now();
        let mut predictor = Predictor::new();
        predictor.on_event(&sync(snapshot(500, true, TimerMode::Countdown, EndBehavior::Stop)), base);
        assert_eq!(predictor.frame(at(base, 2_000)).unwrap().remaining_ms, 0);

        predictor.on_event(&sync(snapshot(500, true, TimerMode::Countdown, EndBehavior::Negative)), base);
        let frame = predictor.frame(at(base, 2_000)).unwrap();
        assert_eq!(frame.remaining_ms, -1_500);
        assert_eq!(frame.text, "-01");
    }

    #[test]
    fn hide_rules() {
        let base = Instant::now();
        let mut predictor = Predictor::new();
        predictor.on_event(&sync(snapshot(1_000, true, TimerMode::Countdown, EndBehavior::Hide)), base);
        assert!(!predictor.frame(base).unwrap().hidden);

        predictor.on_event(
            &ServerEvent::Ended { channel: "lobby".into(), behavior: EndBehavior::Hide },
            base,
        );
        assert!(predictor.frame(base).unwrap().hidden);

        // Stopped at zero stays hidden
        predictor.on_event(&sync(snapshot(0, false, TimerMode::Countdown, EndBehavior::Hide)), base);
        assert!(predictor.frame(base).unwrap().hidden);

        // Reset to a positive value shows it again
        predictor.on_event(&sync(snapshot(30_000, false, TimerMode::Countdown, EndBehavior::Hide)), base);
        assert!(!predictor.frame(base).unwrap().hidden);
    }

    #[test]
    fn joining_a_stopped_hide_timer_at_zero_starts_hidden() {
        let mut predictor = Predictor::new();
        let state = snapshot(0, false, TimerMode::Countdown, EndBehavior::Hide);
        predictor.on_event(&ServerEvent::InitialState { state }, Instant::now());
        assert!(predictor.frame(Instant::now()).unwrap().hidden);
    }

    #[test]
    fn confetti_celebrates_once_per_crossing() {
        let base = Instant::now();
        let mut predictor = Predictor::new();
        predictor.on_event(&sync(snapshot(1_500, true, TimerMode::Countdown, EndBehavior::Confetti)), base);

        assert!(!predictor.frame(at(base, 1_000)).unwrap().celebrate);
        assert!(predictor.frame(at(base, 1_600)).unwrap().celebrate);
        assert!(!predictor.frame(at(base, 1_700)).unwrap().celebrate);

        // The server's end event for the same crossing does not fire again
        predictor.on_event(
            &ServerEvent::Ended { channel: "lobby".into(), behavior: EndBehavior::Confetti },
            at(base, 1_700),
        );
        assert!(!predictor.frame(at(base, 1_800)).unwrap().celebrate);

        // Re-armed once the value climbs back above a second
        predictor.on_event(&sync(snapshot(5_000, true, TimerMode::Countdown, EndBehavior::Confetti)), at(base, 2_000));
        assert!(!predictor.frame(at(base, 2_000)).unwrap().celebrate);
        assert!(predictor.frame(at(base, 7_100)).unwrap().celebrate);
    }

    #[test]
    fn end_event_celebrates_when_crossing_was_not_seen() {
        let base = Instant::now();
        let mut predictor = Predictor::new();
        predictor.on_event(&sync(snapshot(0, false, TimerMode::Countdown, EndBehavior::Confetti)), base);
        assert!(!predictor.frame(base).unwrap().celebrate);

        predictor.on_event(
            &ServerEvent::Ended { channel: "lobby".into(), behavior: EndBehavior::Confetti },
            base,
        );
        assert!(predictor.frame(base).unwrap().celebrate);
    }

    #[test]
    fn formats_with_snapshot_format() {
        let base = Instant::now();
        let mut state = snapshot(3_661_000, false, TimerMode::Countdown, EndBehavior::Stop);
        state.timer.format = TimeFormat::MinutesSeconds;
        let mut predictor = Predictor::new();
        predictor.on_event(&sync(state), base);
        assert_eq!(predictor.frame(base).unwrap().text, "61:01");
    }

    #[tokio::test(start_paused = true)]
    async fn render_loop_stops_on_cancel() {
        let predictor = Arc::new(Mutex::new(Predictor::new()));
        predictor
            .lock()
            .unwrap()
            .on_event(&sync(snapshot(10_000, true, TimerMode::Countdown, EndBehavior::Stop)), Instant::now());

        let frames = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&frames);
        let render = RenderLoop::spawn(predictor, Duration::from_millis(100), move |_frame| {
            counter.fetch_add(1, Ordering::SeqCst);
        });

        tokio::time::sleep(Duration::from_millis(450)).await;
        let drawn = frames.load(Ordering::SeqCst);
        assert!(drawn >= 4, "drew {drawn} frames");

        render.cancel().await;
        tokio::time::sleep(Duration::from_millis(1_000)).await;
        assert_eq!(frames.load(Ordering::SeqCst), drawn);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn cancel_waits_for_frame_in_progress() {
        let predictor = Arc::new(Mutex::new(Predictor::new()));
        predictor
            .lock()
            .unwrap()
            .on_event(&sync(snapshot(10_000, true, TimerMode::Countdown, EndBehavior::Stop)), Instant::now());

        let entered = Arc::new(AtomicUsize::new(0));
        let finished = Arc::new(AtomicUsize::new(0));
        let render = RenderLoop::spawn(predictor, Duration::from_millis(5), {
            let (entered, finished) = (Arc::clone(&entered), Arc::clone(&finished));
            move |_frame| {
                entered.fetch_add(1, Ordering::SeqCst);
                std::thread::sleep(Duration::from_millis(50));
                finished.fetch_add(1, Ordering::SeqCst);
            }
        });

        while entered.load(Ordering::SeqCst) == 0 {
            tokio::time::sleep(Duration::from_millis(1)).await;
        }
        render.cancel().await;

        let drawn = finished.load(Ordering::SeqCst);
        assert_eq!(entered.load(Ordering::SeqCst), drawn);
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(entered.load(Ordering::SeqCst), drawn);
    }
}
