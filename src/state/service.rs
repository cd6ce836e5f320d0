//! Serialized timer operations with broadcast and ticking side effects

use std::{sync::Arc, time::Duration};

use serde_json::{Map, Value};
use tracing::{debug, error, info};

use super::channel::{ChannelRegistry, ChannelRuntime};
use crate::{
    error::Result,
    store::StoreResult,
    tasks::spawn_ticker,
    timer::{Restored, Schedule, SetRequest, Snapshot, TimerEngine, Transition},
    transport::{Broadcaster, ServerEvent},
};

/// Default cadence of `sync` broadcasts for a running channel
pub const DEFAULT_SYNC_INTERVAL: Duration = Duration::from_millis(1000);

/// Entry point for every timer operation.
///
/// Each operation holds the channel's slot for its whole read-modify-write
/// cycle, including the resulting broadcast, so ticks and control
/// operations on one channel never interleave. Cheap to clone.
#[derive(Clone)]
pub struct TimerService {
    inner: Arc<Inner>,
}

struct Inner {
    engine: TimerEngine,
    registry: ChannelRegistry,
    broadcaster: Arc<dyn Broadcaster>,
    sync_interval: Duration,
}

impl std::fmt::Debug for TimerService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TimerService")
            .field("registry", &self.inner.registry)
            .field("sync_interval", &self.inner.sync_interval)
            .finish_non_exhaustive()
    }
}

impl TimerService {
    pub fn new(
        engine: TimerEngine,
        broadcaster: Arc<dyn Broadcaster>,
        sync_interval: Duration,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                engine,
                registry: ChannelRegistry::new(),
                broadcaster,
                sync_interval,
            }),
        }
    }

    pub fn engine(&self) -> &TimerEngine {
        &self.inner.engine
    }

    pub fn registry(&self) -> &ChannelRegistry {
        &self.inner.registry
    }

    /// Current state. Read-only, so it does not take the channel slot.
    pub fn snapshot(&self, channel: &str) -> Result<Snapshot> {
        Ok(self.inner.engine.get_state(channel)?)
    }

    pub async fn start(&self, channel: &str) -> Result<Snapshot> {
        self.run_op(channel, ServerEvent::sync, |engine| engine.start(channel))
            .await
    }

    pub async fn stop(&self, channel: &str) -> Result<Snapshot> {
        self.run_op(channel, ServerEvent::sync, |engine| engine.stop(channel))
            .await
    }

    pub async fn reset(&self, channel: &str, duration_ms: Option<i64>) -> Result<Snapshot> {
        self.run_op(channel, ServerEvent::sync, |engine| {
            engine.reset(channel, duration_ms)
        })
        .await
    }

    pub async fn set(&self, channel: &str, request: SetRequest) -> Result<Snapshot> {
        self.run_op(channel, ServerEvent::sync, |engine| engine.set(channel, request))
            .await
    }

    pub async fn adjust(&self, channel: &str, delta_ms: i64) -> Result<Snapshot> {
        self.run_op(channel, ServerEvent::sync, |engine| {
            engine.adjust(channel, delta_ms)
        })
        .await
    }

    pub async fn update_config(&self, channel: &str, patch: &Map<String, Value>) -> Result<Snapshot> {
        self.run_op(channel, ServerEvent::config_updated, |engine| {
            engine.update_config(channel, patch)
        })
        .await
    }

    /// Rebuild running timers from the store and resume their tickers.
    /// Returns how many channels tick again.
    pub async fn restore(&self) -> Result<usize> {
        let restored = self.inner.engine.restore_timers()?;
        let mut resumed = 0;

        for outcome in restored {
            let Restored::Resumed {
                snapshot,
                crossed_zero,
            } = outcome
            else {
                continue;
            };

            let slot = self.inner.registry.slot(snapshot.channel());
            let mut runtime = slot.lock().await;
            self.begin_ticking(snapshot.channel(), &mut runtime);
            if crossed_zero {
                // Resolved during restore; the crossing must not be announced again
                runtime.notify_end();
            }
            resumed += 1;
        }

        Ok(resumed)
    }

    /// Stop every ticker. Persisted anchors are untouched, so a later
    /// restore picks the timers up where wall time says they are.
    pub async fn shutdown(&self) {
        let mut stopped = 0;
        for (_, slot) in self.inner.registry.slots() {
            if slot.lock().await.cancel() {
                stopped += 1;
            }
        }
        info!("Stopped {} ticker(s)", stopped);
    }

    async fn run_op<F>(
        &self,
        channel: &str,
        event: fn(Snapshot) -> ServerEvent,
        op: F,
    ) -> Result<Snapshot>
    where
        F: FnOnce(&TimerEngine) -> StoreResult<Transition>,
    {
        let slot = self.inner.registry.slot(channel);
        let mut runtime = slot.lock().await;

        let transition = op(&self.inner.engine)?;
        self.apply_schedule(channel, &mut runtime, &transition);

        self.inner
            .broadcaster
            .broadcast(channel, event(transition.snapshot.clone()));
        Ok(transition.snapshot)
    }

    fn apply_schedule(&self, channel: &str, runtime: &mut ChannelRuntime, transition: &Transition) {
        match transition.schedule {
            Schedule::Begin => self.begin_ticking(channel, runtime),
            Schedule::Halt => {
                runtime.cancel();
            }
            Schedule::Rearm if runtime.is_ticking() => runtime.rearm(),
            Schedule::Rearm | Schedule::Keep => {
                if transition.snapshot.is_running() && !runtime.is_ticking() {
                    self.begin_ticking(channel, runtime);
                }
            }
        }
    }

    fn begin_ticking(&self, channel: &str, runtime: &mut ChannelRuntime) {
        let service = self.clone();
        let period = self.inner.sync_interval;
        let owned = channel.to_string();
        runtime.install(move |generation| spawn_ticker(service, owned, generation, period));
    }

    /// One scheduler tick. Returns `false` once the ticker should exit.
    pub(crate) async fn tick(&self, channel: &str, generation: u64) -> bool {
        let slot = self.inner.registry.slot(channel);
        let mut runtime = slot.lock().await;
        if !runtime.is_current(generation) {
            return false;
        }

        let snapshot = match self.inner.engine.get_state(channel) {
            Ok(snapshot) => snapshot,
            Err(e) => {
                error!(channel, "Tick failed to read state: {}", e);
                return true;
            }
        };
        if !snapshot.is_running() {
            debug!(channel, "Timer no longer running, releasing ticker");
            runtime.release(generation);
            return false;
        }

        let expired = snapshot.has_expired();
        self.inner
            .broadcaster
            .broadcast(channel, ServerEvent::sync(snapshot));
        if !expired {
            return true;
        }

        let resolution = match self.inner.engine.handle_timer_end(channel) {
            Ok(resolution) => resolution,
            Err(e) => {
                error!(channel, "Failed to resolve timer end: {}", e);
                return true;
            }
        };

        if runtime.notify_end() {
            self.inner.broadcaster.broadcast(
                channel,
                ServerEvent::Ended {
                    channel: channel.to_string(),
                    behavior: resolution.behavior,
                },
            );
        }

        if resolution.stopped {
            runtime.release(generation);
            self.inner
                .broadcaster
                .broadcast(channel, ServerEvent::sync(resolution.snapshot));
            return false;
        }
        true
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use serde_json::json;
    use tokio::time::{sleep, Instant};

    use super::*;
    use crate::{
        clock::Clock,
        error::Error,
        store::{ChannelStore, SqliteStore, StoreError},
        timer::{Timer, TimerUpdate},
    };

    /// Wall clock driven by tokio's (pausable) time
    struct TokioClock {
        origin: Instant,
        base_ms: i64,
    }

    impl Clock for TokioClock {
        fn now_ms(&self) -> i64 {
            self.base_ms + self.origin.elapsed().as_millis() as i64
        }
    }

    #[derive(Default)]
    struct Recorder {
        events: Mutex<Vec<ServerEvent>>,
    }

    impl Recorder {
        fn ended(&self) -> usize {
            self.events
                .lock()
                .unwrap()
                .iter()
                .filter(|event| matches!(event, ServerEvent::Ended { .. }))
                .count()
        }

        fn last(&self) -> Option<ServerEvent> {
            self.events.lock().unwrap().last().cloned()
        }
    }

    impl Broadcaster for Recorder {
        fn broadcast(&self, _channel: &str, event: ServerEvent) -> usize {
            self.events.lock().unwrap().push(event);
            1
        }
    }

    fn service() -> (TimerService, Arc<Recorder>) {
        let clock: Arc<dyn Clock> = Arc::new(TokioClock {
            origin: Instant::now(),
            base_ms: 1_700_000_000_000,
        });
        let store = Arc::new(SqliteStore::open_in_memory(clock.clone()).unwrap());
        let recorder = Arc::new(Recorder::default());
        let service = TimerService::new(
            TimerEngine::new(store, clock),
            recorder.clone(),
            DEFAULT_SYNC_INTERVAL,
        );
        (service, recorder)
    }

    async fn configure(service: &TimerService, behavior: &str, duration_ms: i64) {
        let patch = json!({ "end_behavior": behavior });
        service
            .update_config("lobby", patch.as_object().unwrap())
            .await
            .unwrap();
        service.reset("lobby", Some(duration_ms)).await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn ticks_broadcast_sync_while_running() {
        let (service, recorder) = service();
        service.start("lobby").await.unwrap();
        sleep(Duration::from_millis(3_500)).await;

        let syncs = recorder.events.lock().unwrap().len();
        // One from start, three from ticks
        assert_eq!(syncs, 4);
        match recorder.last() {
            Some(ServerEvent::Sync { state }) => assert_eq!(state.remaining_ms(), 297_000),
            other => panic!("unexpected event {other:?}"),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn stop_releases_ticker() {
        let (service, recorder) = service();
        service.start("lobby").await.unwrap();
        sleep(Duration::from_millis(1_500)).await;
        service.stop("lobby").await.unwrap();
        assert!(service.registry().ticking_channels().await.is_empty());

        let count = recorder.events.lock().unwrap().len();
        sleep(Duration::from_millis(5_000)).await;
        assert_eq!(recorder.events.lock().unwrap().len(), count);
    }

    #[tokio::test(start_paused = true)]
    async fn stop_behavior_ends_once_with_final_sync() {
        let (service, recorder) = service();
        configure(&service, "stop", 3_000).await;
        service.start("lobby").await.unwrap();
        sleep(Duration::from_millis(6_500)).await;

        assert_eq!(recorder.ended(), 1);
        match recorder.last() {
            Some(ServerEvent::Sync { state }) => {
                assert!(!state.is_running());
                assert_eq!(state.remaining_ms(), 0);
            }
            other => panic!("unexpected event {other:?}"),
        }
        assert!(service.registry().ticking_channels().await.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn negative_behavior_announces_crossing_once() {
        let (service, recorder) = service();
        configure(&service, "negative", 2_000).await;
        service.start("lobby").await.unwrap();
        sleep(Duration::from_millis(6_500)).await;

        assert_eq!(recorder.ended(), 1);
        let state = service.snapshot("lobby").unwrap();
        assert!(state.is_running());
        assert_eq!(state.remaining_ms(), -4_500);
        assert_eq!(service.registry().ticking_channels().await, vec!["lobby".to_string()]);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 8)]
    async fn concurrent_ops_on_one_channel_are_serialized() {
        let (service, _recorder) = service();
        service.reset("lobby", Some(0)).await.unwrap();

        let tasks: Vec<_> = (0..200)
            .map(|_| {
                let service = service.clone();
                tokio::spawn(async move { service.adjust("lobby", 1_000).await })
            })
            .collect();
        for task in tasks {
            task.await.unwrap().unwrap();
        }

        let state = service.snapshot("lobby").unwrap();
        assert_eq!(state.remaining_ms(), 200_000);
        assert!(!state.is_running());
    }

    #[tokio::test(start_paused = true)]
    async fn shutdown_waits_for_busy_slots() {
        let (service, recorder) = service();
        service.start("lobby").await.unwrap();

        let guard = service.registry().slot("lobby").lock_owned().await;
        let release = tokio::spawn(async move {
            sleep(Duration::from_millis(200)).await;
            drop(guard);
        });
        service.shutdown().await;
        release.await.unwrap();
        assert!(service.registry().ticking_channels().await.is_empty());

        let count = recorder.events.lock().unwrap().len();
        sleep(Duration::from_millis(5_000)).await;
        assert_eq!(recorder.events.lock().unwrap().len(), count);
    }

    #[tokio::test(start_paused = true)]
    async fn adjust_above_zero_rearms_end_event() {
        let (service, recorder) = service();
        configure(&service, "negative", 2_000).await;
        service.start("lobby").await.unwrap();
        sleep(Duration::from_millis(3_500)).await;
        assert_eq!(recorder.ended(), 1);

        service.adjust("lobby", 5_000).await.unwrap();
        sleep(Duration::from_millis(5_000)).await;
        assert_eq!(recorder.ended(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn restart_cancels_previous_schedule() {
        let (service, recorder) = service();
        service.start("lobby").await.unwrap();
        service.stop("lobby").await.unwrap();
        service.start("lobby").await.unwrap();
        sleep(Duration::from_millis(1_500)).await;

        // start, stop, start, then exactly one tick
        assert_eq!(recorder.events.lock().unwrap().len(), 4);
    }

    #[tokio::test(start_paused = true)]
    async fn config_updates_broadcast_config_event() {
        let (service, recorder) = service();
        let patch = json!({ "font_size": 96 });
        service
            .update_config("lobby", patch.as_object().unwrap())
            .await
            .unwrap();
        assert!(matches!(recorder.last(), Some(ServerEvent::ConfigUpdated { .. })));
    }

    #[tokio::test(start_paused = true)]
    async fn restore_resumes_ticking() {
        let (service, recorder) = service();
        let store = service.engine().store().clone();
        let now = 1_700_000_000_000;
        store
            .update("lobby", &TimerUpdate::anchored(Some(60_000), now - 10_000))
            .unwrap();

        assert_eq!(service.restore().await.unwrap(), 1);
        sleep(Duration::from_millis(1_500)).await;
        match recorder.last() {
            Some(ServerEvent::Sync { state }) => assert_eq!(state.remaining_ms(), 49_000),
            other => panic!("unexpected event {other:?}"),
        }

        service.shutdown().await;
        assert!(service.registry().ticking_channels().await.is_empty());
    }

    struct FailingStore;

    impl ChannelStore for FailingStore {
        fn get_or_create(&self, _channel: &str) -> StoreResult<Timer> {
            Err(StoreError::LockPoisoned)
        }

        fn update(&self, _channel: &str, _update: &TimerUpdate) -> StoreResult<Timer> {
            Err(StoreError::LockPoisoned)
        }

        fn list_all(&self) -> StoreResult<Vec<Timer>> {
            Err(StoreError::LockPoisoned)
        }

        fn delete_stale(&self, _max_age: Duration) -> StoreResult<usize> {
            Err(StoreError::LockPoisoned)
        }
    }

    #[tokio::test]
    async fn store_failure_fails_the_operation_without_side_effects() {
        let recorder = Arc::new(Recorder::default());
        let clock: Arc<dyn Clock> = Arc::new(crate::clock::SystemClock);
        let service = TimerService::new(
            TimerEngine::new(Arc::new(FailingStore), clock),
            recorder.clone(),
            DEFAULT_SYNC_INTERVAL,
        );

        assert!(matches!(service.start("lobby").await, Err(Error::Store(_))));
        assert!(recorder.last().is_none());
        assert!(service.registry().ticking_channels().await.is_empty());
    }
}
