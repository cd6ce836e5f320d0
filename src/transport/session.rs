//! Per-connection request handling
//!
//! A [`Session`] turns inbound [`ClientMessage`]s into timer operations and
//! queues replies on its own outbound sender. It knows nothing about the
//! socket; `api::socket` pumps frames in and out.

use std::sync::Arc;

use tracing::{debug, warn};

use super::{
    hub::{EventSender, Hub, SessionId},
    messages::{ClientMessage, DurationInput, ServerEvent},
    rate_limit::EventLimiter,
};
use crate::{
    error::{Error, Result},
    state::TimerService,
    timer::{schema::clamp_duration, SetRequest, TimerMode},
    utils::sanitize_channel,
};

pub struct Session {
    id: SessionId,
    hub: Arc<Hub>,
    service: TimerService,
    limiter: EventLimiter,
    outbound: EventSender,
    channel: Option<String>,
}

impl Session {
    pub fn new(
        hub: Arc<Hub>,
        service: TimerService,
        limiter: EventLimiter,
        outbound: EventSender,
    ) -> Self {
        Self {
            id: hub.next_session_id(),
            hub,
            service,
            limiter,
            outbound,
            channel: None,
        }
    }

    pub fn id(&self) -> SessionId {
        self.id
    }

    /// Channel this session is joined to
    pub fn channel(&self) -> Option<&str> {
        self.channel.as_deref()
    }

    /// Handle one text frame. Failures are answered with an `error` event.
    pub async fn handle_text(&mut self, text: &str) {
        let result = match serde_json::from_str::<ClientMessage>(text) {
            Ok(message) => self.handle(message).await,
            Err(e) => Err(Error::Malformed(e.to_string())),
        };

        if let Err(e) = result {
            match &e {
                Error::Store(inner) => warn!(session = self.id, "Operation failed: {}", inner),
                other => debug!(session = self.id, "Rejected request: {}", other),
            }
            self.send(ServerEvent::error(e.to_string()));
        }
    }

    pub async fn handle(&mut self, message: ClientMessage) -> Result<()> {
        debug!(session = self.id, kind = message.kind(), "Session message");

        if let ClientMessage::Join { channel } = &message {
            return self.join(channel);
        }

        let channel = self.channel.clone().ok_or(Error::NotJoined)?;
        self.limiter.check(message.kind())?;

        match message {
            ClientMessage::Join { .. } => unreachable!("join handled above"),
            ClientMessage::Start => self.service.start(&channel).await?,
            ClientMessage::Stop => self.service.stop(&channel).await?,
            ClientMessage::Reset { duration } => {
                let duration = duration
                    .map(|d| control_value(&d, "duration"))
                    .transpose()?;
                self.service.reset(&channel, duration).await?
            }
            ClientMessage::Set {
                duration,
                mode,
                remaining,
            } => {
                let request = SetRequest {
                    duration_ms: duration
                        .map(|d| control_value(&d, "duration"))
                        .transpose()?,
                    mode: mode
                        .map(|m| m.parse::<TimerMode>().map_err(|_| Error::InvalidMode))
                        .transpose()?,
                    remaining_ms: remaining
                        .map(|r| control_value(&r, "remaining"))
                        .transpose()?,
                };
                self.service.set(&channel, request).await?
            }
            ClientMessage::Adjust { delta } => {
                let delta = delta
                    .to_millis()
                    .ok_or(Error::InvalidValue { field: "adjustment" })?;
                self.service.adjust(&channel, delta).await?
            }
            ClientMessage::UpdateConfig { patch } => {
                self.service.update_config(&channel, &patch).await?
            }
        };

        Ok(())
    }

    fn join(&mut self, raw: &str) -> Result<()> {
        let channel = sanitize_channel(raw)?;
        let state = self.service.snapshot(&channel)?;

        self.hub.subscribe(&channel, self.id, self.outbound.clone());
        self.channel = Some(channel);
        self.send(ServerEvent::InitialState { state });
        Ok(())
    }

    fn send(&self, event: ServerEvent) {
        if self.outbound.send(event).is_err() {
            debug!(session = self.id, "Outbound queue closed");
        }
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        self.hub.unsubscribe(self.id);
    }
}

/// Parse and clamp a duration-like control value
fn control_value(input: &DurationInput, field: &'static str) -> Result<i64> {
    input
        .to_millis()
        .map(clamp_duration)
        .ok_or(Error::InvalidValue { field })
}

#[cfg(test)]
mod tests {
    use nonzero_ext::nonzero;
    use serde_json::json;
    use tokio::sync::mpsc::{self, UnboundedReceiver};

    use super::*;
    use crate::{
        clock::SystemClock,
        state::DEFAULT_SYNC_INTERVAL,
        store::SqliteStore,
        timer::{TimerEngine, DEFAULT_DURATION_MS},
    };

    struct Harness {
        hub: Arc<Hub>,
        service: TimerService,
    }

    impl Harness {
        fn new() -> Self {
            let clock = Arc::new(SystemClock);
            let store = Arc::new(SqliteStore::open_in_memory(clock.clone()).unwrap());
            let hub = Hub::new();
            let service = TimerService::new(
                TimerEngine::new(store, clock),
                hub.clone(),
                DEFAULT_SYNC_INTERVAL,
            );
            Self { hub, service }
        }

        fn session(&self) -> (Session, UnboundedReceiver<ServerEvent>) {
            let (tx, rx) = mpsc::unbounded_channel();
            let session = Session::new(
                self.hub.clone(),
                self.service.clone(),
                EventLimiter::per_second(nonzero!(10u32)),
                tx,
            );
            (session, rx)
        }
    }

    async fn send(session: &mut Session, frame: serde_json::Value) {
        session.handle_text(&frame.to_string()).await;
    }

    fn error_message(rx: &mut UnboundedReceiver<ServerEvent>) -> String {
        match rx.try_recv() {
            Ok(ServerEvent::Error { message }) => message,
            other => panic!("expected error, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn control_requires_join() {
        let harness = Harness::new();
        let (mut session, mut rx) = harness.session();
        send(&mut session, json!({"type": "start"})).await;
        assert_eq!(error_message(&mut rx), "Not joined to any channel");
    }

    #[tokio::test]
    async fn join_replies_to_joiner_only() {
        let harness = Harness::new();
        let (mut first, mut first_rx) = harness.session();
        let (mut second, mut second_rx) = harness.session();

        send(&mut first, json!({"type": "join", "channel": "Main Stage"})).await;
        assert_eq!(first.channel(), Some("mainstage"));
        match first_rx.try_recv() {
            Ok(ServerEvent::InitialState { state }) => {
                assert_eq!(state.channel(), "mainstage");
                assert_eq!(state.remaining_ms(), DEFAULT_DURATION_MS);
            }
            other => panic!("expected initial state, got {other:?}"),
        }

        send(&mut second, json!({"type": "join", "channel": "mainstage"})).await;
        assert!(matches!(second_rx.try_recv(), Ok(ServerEvent::InitialState { .. })));
        assert!(first_rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn operations_broadcast_to_channel() {
        let harness = Harness::new();
        let (mut control, mut control_rx) = harness.session();
        let (mut overlay, mut overlay_rx) = harness.session();
        send(&mut control, json!({"type": "join", "channel": "lobby"})).await;
        send(&mut overlay, json!({"type": "join", "channel": "lobby"})).await;
        control_rx.try_recv().unwrap();
        overlay_rx.try_recv().unwrap();

        send(&mut control, json!({"type": "set", "duration": "1h30m", "mode": "countdown"})).await;
        match overlay_rx.try_recv() {
            Ok(ServerEvent::Sync { state }) => assert_eq!(state.remaining_ms(), 5_400_000),
            other => panic!("expected sync, got {other:?}"),
        }

        send(&mut control, json!({"type": "update-config", "patch": {"font_size": 120}})).await;
        match overlay_rx.try_recv() {
            Ok(ServerEvent::ConfigUpdated { state }) => assert_eq!(state.timer.style.font_size, 120),
            other => panic!("expected config update, got {other:?}"),
        }
        assert_eq!(control_rx.try_recv().map(|e| e.snapshot().is_some()), Ok(true));
    }

    #[tokio::test]
    async fn invalid_values_are_rejected_without_change() {
        let harness = Harness::new();
        let (mut session, mut rx) = harness.session();
        send(&mut session, json!({"type": "join", "channel": "lobby"})).await;
        rx.try_recv().unwrap();

        send(&mut session, json!({"type": "reset", "duration": "soon"})).await;
        assert_eq!(error_message(&mut rx), "Invalid duration value");
        send(&mut session, json!({"type": "set", "remaining": "??"})).await;
        assert_eq!(error_message(&mut rx), "Invalid remaining value");
        send(&mut session, json!({"type": "set", "mode": "sideways"})).await;
        assert_eq!(error_message(&mut rx), "Invalid mode");
        send(&mut session, json!({"type": "adjust", "delta": "x"})).await;
        assert_eq!(error_message(&mut rx), "Invalid adjustment value");

        send(&mut session, json!({"type": "warp"})).await;
        assert!(error_message(&mut rx).starts_with("Invalid message"));
        session.handle_text("not json").await;
        assert!(error_message(&mut rx).starts_with("Invalid message"));

        let state = harness.service.snapshot("lobby").unwrap();
        assert_eq!(state.remaining_ms(), DEFAULT_DURATION_MS);
    }

    #[tokio::test]
    async fn control_durations_are_clamped() {
        let harness = Harness::new();
        let (mut session, _rx) = harness.session();
        send(&mut session, json!({"type": "join", "channel": "lobby"})).await;

        send(&mut session, json!({"type": "reset", "duration": "48:00:00"})).await;
        assert_eq!(harness.service.snapshot("lobby").unwrap().remaining_ms(), 86_400_000);

        send(&mut session, json!({"type": "set", "remaining": -5_000})).await;
        assert_eq!(harness.service.snapshot("lobby").unwrap().remaining_ms(), 0);
    }

    #[tokio::test]
    async fn bursts_are_rate_limited_per_kind() {
        let harness = Harness::new();
        let (mut session, mut rx) = harness.session();
        send(&mut session, json!({"type": "join", "channel": "lobby"})).await;
        rx.try_recv().unwrap();

        for _ in 0..10 {
            send(&mut session, json!({"type": "adjust", "delta": 1_000})).await;
            assert!(matches!(rx.try_recv(), Ok(ServerEvent::Sync { .. })));
        }
        send(&mut session, json!({"type": "adjust", "delta": 1_000})).await;
        assert_eq!(error_message(&mut rx), "Rate limit exceeded");

        send(&mut session, json!({"type": "stop"})).await;
        assert!(matches!(rx.try_recv(), Ok(ServerEvent::Sync { .. })));
    }

    #[tokio::test]
    async fn rejoining_moves_and_drop_leaves() {
        let harness = Harness::new();
        let (mut session, _rx) = harness.session();
        send(&mut session, json!({"type": "join", "channel": "one"})).await;
        send(&mut session, json!({"type": "join", "channel": "two"})).await;
        assert_eq!(harness.hub.subscriber_count("one"), 0);
        assert_eq!(harness.hub.subscriber_count("two"), 1);

        drop(session);
        assert_eq!(harness.hub.subscriber_count("two"), 0);
    }
}
