//! Detection engine: one serialized tick per call.
//!
//! A tick checks the feed gate, fetches state vectors for a box around the
//! reference, parses and filters them, advances the change tracker, and
//! passes arrivals through the alert gate. The whole tick runs under one
//! async mutex so foreground and background timelines never interleave.
//! Sinks run after that lock is released, under a second lock taken before
//! the release, so alerts are delivered in tick order.
//!
//! A failed or cancelled tick leaves the tracker, the alert gate, and the
//! current result exactly as the last completed tick left them. The feed
//! gate is the exception: a failed fetch still spends its polling slot.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, RwLock};
use std::time::{Duration, Instant};

use serde::Serialize;
use tokio::sync::broadcast;
use tracing::{debug, info, warn};

use skywatch_core::config::Config;
use skywatch_core::position::{epoch_now, usable_reference};
use skywatch_core::{geo, state_vector};
use skywatch_core::{
    ArrivalEvent, ChangeTracker, Coordinate, DetectionResult, PositionSource, ThrottleGuard,
    TickMode,
};

use crate::feed::{FeedError, FeedSource};
use crate::notification::AlertSink;

/// Capacity of the arrival broadcast channel.
const EVENT_CHANNEL_CAPACITY: usize = 64;

// ---------------------------------------------------------------------------
// Settings and outcomes
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize)]
pub struct EngineSettings {
    pub acquisition_radius_m: f64,
    pub alert_radius_m: f64,
    pub feed_poll_interval: Duration,
    pub alert_interval: Duration,
    pub foreground_timeout: Duration,
    pub background_timeout: Duration,
}

impl EngineSettings {
    pub fn from_config(config: &Config) -> Self {
        EngineSettings {
            acquisition_radius_m: config.radius.acquisition_m,
            alert_radius_m: config.radius.alert_m,
            feed_poll_interval: config.feed_poll_interval(),
            alert_interval: config.alert_interval(),
            foreground_timeout: Duration::from_secs(config.feed.timeout_secs),
            background_timeout: Duration::from_secs(config.feed.background_timeout_secs),
        }
    }

    fn timeout(&self, mode: TickMode) -> Duration {
        match mode {
            TickMode::Foreground => self.foreground_timeout,
            TickMode::Background => self.background_timeout,
        }
    }
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self::from_config(&Config::default())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum SkipReason {
    /// The feed-poll gate is closed.
    ThrottledFeed,
    /// No usable reference position.
    NoReference,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub enum FailReason {
    Fetch(String),
    Timeout,
    Decode(String),
    /// The engine was shut down while the tick was in flight.
    Cancelled,
}

impl From<FeedError> for FailReason {
    fn from(e: FeedError) -> Self {
        match e {
            FeedError::Timeout(_) => FailReason::Timeout,
            FeedError::Decode(msg) => FailReason::Decode(msg),
            FeedError::Http(_) | FeedError::Status(_) => FailReason::Fetch(e.to_string()),
        }
    }
}

impl std::fmt::Display for FailReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FailReason::Fetch(msg) => write!(f, "fetch failed: {msg}"),
            FailReason::Timeout => write!(f, "fetch timed out"),
            FailReason::Decode(msg) => write!(f, "decode failed: {msg}"),
            FailReason::Cancelled => write!(f, "cancelled"),
        }
    }
}

/// Result of one `tick`. Never an `Err`: the host decides what to do.
#[derive(Debug, Clone)]
pub enum TickOutcome {
    Skipped(SkipReason),
    Failed(FailReason),
    Completed {
        result: Arc<DetectionResult>,
        events: Vec<ArrivalEvent>,
    },
}

impl TickOutcome {
    #[cfg(test)]
    pub fn is_completed(&self) -> bool {
        matches!(self, TickOutcome::Completed { .. })
    }
}

/// Engine statistics
#[derive(Debug, Default, Clone, Serialize)]
pub struct EngineStats {
    pub ticks_completed: u64,
    pub ticks_failed: u64,
    pub ticks_skipped: u64,
    pub arrivals_detected: u64,
    pub alerts_delivered: u64,
    pub alerts_suppressed: u64,
    pub delivery_failures: u64,
}

// ---------------------------------------------------------------------------
// Engine
// ---------------------------------------------------------------------------

/// Serialized state: only touched while holding the tick lock.
struct TickState {
    tracker: ChangeTracker,
    throttle: ThrottleGuard,
}

/// The detection engine facade.
pub struct Engine {
    settings: EngineSettings,
    feed: Arc<dyn FeedSource>,
    sinks: Vec<Arc<dyn AlertSink>>,
    state: tokio::sync::Mutex<TickState>,
    /// Held while sinks run so deliveries keep tick order.
    delivery: tokio::sync::Mutex<()>,
    current: RwLock<Arc<DetectionResult>>,
    stats: Mutex<EngineStats>,
    events_tx: broadcast::Sender<ArrivalEvent>,
    generation: AtomicU64,
    shut_down: AtomicBool,
}

impl Engine {
    pub fn new(settings: EngineSettings, feed: Arc<dyn FeedSource>) -> Self {
        let (events_tx, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        let throttle = ThrottleGuard::new(settings.feed_poll_interval, settings.alert_interval);
        Engine {
            settings,
            feed,
            sinks: Vec::new(),
            state: tokio::sync::Mutex::new(TickState {
                tracker: ChangeTracker::new(),
                throttle,
            }),
            delivery: tokio::sync::Mutex::new(()),
            current: RwLock::new(Arc::new(DetectionResult::empty())),
            stats: Mutex::new(EngineStats::default()),
            events_tx,
            generation: AtomicU64::new(0),
            shut_down: AtomicBool::new(false),
        }
    }

    /// Add an alert sink. Sinks are called in the order added.
    pub fn with_sink(mut self, sink: Arc<dyn AlertSink>) -> Self {
        self.sinks.push(sink);
        self
    }

    pub fn settings(&self) -> &EngineSettings {
        &self.settings
    }

    /// Point-in-time snapshot of the last completed tick.
    pub fn current_result(&self) -> Arc<DetectionResult> {
        self.current
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    /// Arrivals allowed by the alert gate, in tick order.
    pub fn subscribe(&self) -> broadcast::Receiver<ArrivalEvent> {
        self.events_tx.subscribe()
    }

    pub fn stats(&self) -> EngineStats {
        self.stats.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    /// Abandon any in-flight tick and refuse further ticks.
    pub fn shutdown(&self) {
        self.shut_down.store(true, Ordering::SeqCst);
        self.generation.fetch_add(1, Ordering::SeqCst);
        info!("engine shut down");
    }

    pub fn is_shut_down(&self) -> bool {
        self.shut_down.load(Ordering::SeqCst)
    }

    /// Reset both throttle gates. Test hook.
    #[cfg(test)]
    pub async fn reset_throttle(&self) {
        self.state.lock().await.throttle.reset();
    }

    fn record(&self, f: impl FnOnce(&mut EngineStats)) {
        f(&mut self.stats.lock().unwrap_or_else(|e| e.into_inner()));
    }

    fn fail(&self, reason: FailReason) -> TickOutcome {
        self.record(|s| s.ticks_failed += 1);
        TickOutcome::Failed(reason)
    }

    fn skip(&self, reason: SkipReason) -> TickOutcome {
        self.record(|s| s.ticks_skipped += 1);
        TickOutcome::Skipped(reason)
    }

    /// Tick using the position source's current fix.
    pub async fn tick_with_source(
        &self,
        source: &dyn PositionSource,
        mode: TickMode,
        now: Instant,
    ) -> TickOutcome {
        let fix = source.current_position();
        match usable_reference(fix.as_ref(), mode, epoch_now()) {
            Some(reference) => self.tick(reference, mode, now).await,
            None => {
                debug!(%mode, "no usable reference position");
                self.skip(SkipReason::NoReference)
            }
        }
    }

    /// Run one detection cycle around `reference`.
    pub async fn tick(&self, reference: Coordinate, mode: TickMode, now: Instant) -> TickOutcome {
        let generation = self.generation.load(Ordering::SeqCst);
        if self.is_shut_down() {
            return self.fail(FailReason::Cancelled);
        }

        let mut state = self.state.lock().await;
        if self.generation.load(Ordering::SeqCst) != generation {
            return self.fail(FailReason::Cancelled);
        }

        // Background wakes are already spaced by their scheduler.
        if mode == TickMode::Foreground && !state.throttle.allow_feed(now) {
            return self.skip(SkipReason::ThrottledFeed);
        }

        let boxes = geo::query_boxes(&reference, self.settings.acquisition_radius_m);
        let timeout = self.settings.timeout(mode);
        let payload = match tokio::time::timeout(timeout, self.feed.fetch(&boxes)).await {
            Ok(Ok(p)) => p,
            Ok(Err(e)) => {
                debug!(%mode, "feed error: {e}");
                return self.fail(e.into());
            }
            Err(_) => {
                debug!(%mode, "{}", FeedError::Timeout(timeout));
                return self.fail(FailReason::Timeout);
            }
        };
        let fetched_at = epoch_now();

        if self.generation.load(Ordering::SeqCst) != generation {
            return self.fail(FailReason::Cancelled);
        }

        // Critical section: tracker, alert gate, current result.
        let tracks = state_vector::parse_all(&payload);
        let partition = geo::filter(
            &tracks,
            &reference,
            self.settings.acquisition_radius_m,
            self.settings.alert_radius_m,
        );
        let arrivals = state.tracker.advance(&partition.alert);

        let mut events = Vec::new();
        let mut suppressed = 0u64;
        for ranged in &arrivals {
            if state.throttle.allow_alert(now) {
                events.push(ArrivalEvent::from_ranged(ranged, fetched_at));
            } else {
                suppressed += 1;
                debug!(track = %ranged.id(), "arrival suppressed by alert throttle");
            }
        }

        let result = Arc::new(DetectionResult {
            tracks: partition.acquisition,
            timestamp: fetched_at,
            feed_time: payload.time,
        });
        *self.current.write().unwrap_or_else(|e| e.into_inner()) = result.clone();

        for ev in &events {
            // No subscribers is fine.
            let _ = self.events_tx.send(ev.clone());
        }

        self.record(|s| {
            s.ticks_completed += 1;
            s.arrivals_detected += arrivals.len() as u64;
            s.alerts_delivered += events.len() as u64;
            s.alerts_suppressed += suppressed;
        });

        debug!(
            %mode,
            records = tracks.len(),
            acquired = result.tracks.len(),
            in_alert = partition.alert.len(),
            arrivals = arrivals.len(),
            allowed = events.len(),
            "tick completed"
        );

        // Queue behind earlier deliveries before letting the next tick in.
        let delivery = if events.is_empty() {
            None
        } else {
            Some(self.delivery.lock().await)
        };
        drop(state);

        self.deliver(&events).await;
        drop(delivery);

        TickOutcome::Completed { result, events }
    }

    async fn deliver(&self, events: &[ArrivalEvent]) {
        for ev in events {
            for sink in &self.sinks {
                if let Err(e) = sink.notify(ev).await {
                    warn!(sink = sink.name(), track = %ev.track_id, "alert delivery failed: {e}");
                    self.record(|s| s.delivery_failures += 1);
                }
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::VecDeque;

    use async_trait::async_trait;
    use skywatch_core::state_vector::{FeedPayload, RawValue};
    use skywatch_core::{BoundingBox, PositionFix};
    use tokio::sync::Notify;

    use crate::notification::NotifyError;

    /// (id, lat, lon, on_ground)
    fn payload(tracks: &[(&str, f64, f64, bool)]) -> FeedPayload {
        FeedPayload {
            time: None,
            records: tracks
                .iter()
                .map(|(id, lat, lon, ground)| {
                    vec![
                        RawValue::Text(id.to_string()),
                        RawValue::Text(format!("CS{id}")),
                        RawValue::Null,
                        RawValue::Null,
                        RawValue::Null,
                        RawValue::Float(*lon),
                        RawValue::Float(*lat),
                        RawValue::Float(3000.0),
                        RawValue::Bool(*ground),
                    ]
                })
                .collect(),
        }
    }

    /// Pops scripted responses; empty payload once exhausted.
    struct ScriptedFeed {
        script: Mutex<VecDeque<Result<FeedPayload, FeedError>>>,
        calls: AtomicU64,
    }

    impl ScriptedFeed {
        fn new(script: Vec<Result<FeedPayload, FeedError>>) -> Arc<Self> {
            Arc::new(ScriptedFeed {
                script: Mutex::new(script.into()),
                calls: AtomicU64::new(0),
            })
        }

        fn calls(&self) -> u64 {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl FeedSource for ScriptedFeed {
        async fn fetch(&self, _boxes: &[BoundingBox]) -> Result<FeedPayload, FeedError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.script
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or_else(|| Ok(FeedPayload::default()))
        }
    }

    struct SlowFeed;

    #[async_trait]
    impl FeedSource for SlowFeed {
        async fn fetch(&self, _boxes: &[BoundingBox]) -> Result<FeedPayload, FeedError> {
            tokio::time::sleep(Duration::from_secs(60)).await;
            Ok(FeedPayload::default())
        }
    }

    /// Blocks inside fetch until released.
    struct HeldFeed {
        started: Notify,
        release: Notify,
    }

    #[async_trait]
    impl FeedSource for HeldFeed {
        async fn fetch(&self, _boxes: &[BoundingBox]) -> Result<FeedPayload, FeedError> {
            self.started.notify_one();
            self.release.notified().await;
            Ok(payload(&[("abc123", 0.0, 0.0005, false)]))
        }
    }

    #[derive(Default)]
    struct RecordingSink {
        seen: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl AlertSink for RecordingSink {
        fn name(&self) -> &str {
            "recording"
        }

        async fn notify(&self, event: &ArrivalEvent) -> Result<(), NotifyError> {
            self.seen.lock().unwrap().push(event.track_id.clone());
            Ok(())
        }
    }

    #[derive(Default)]
    struct FailingSink {
        calls: AtomicU64,
    }

    #[async_trait]
    impl AlertSink for FailingSink {
        fn name(&self) -> &str {
            "failing"
        }

        async fn notify(&self, _event: &ArrivalEvent) -> Result<(), NotifyError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Err(NotifyError::Delivery("permission denied".into()))
        }
    }

    struct StaleSource;

    impl PositionSource for StaleSource {
        fn current_position(&self) -> Option<PositionFix> {
            Some(PositionFix {
                coordinate: Coordinate::new(0.0, 0.0),
                timestamp: epoch_now() - 120.0,
                accuracy_m: None,
            })
        }
    }

    fn settings() -> EngineSettings {
        EngineSettings {
            acquisition_radius_m: 20_000.0,
            alert_radius_m: 10_000.0,
            feed_poll_interval: Duration::from_secs(30),
            alert_interval: Duration::from_secs(300),
            foreground_timeout: Duration::from_secs(10),
            background_timeout: Duration::from_secs(5),
        }
    }

    fn origin() -> Coordinate {
        Coordinate::new(0.0, 0.0)
    }

    fn secs(n: u64) -> Duration {
        Duration::from_secs(n)
    }

    fn events_of(outcome: &TickOutcome) -> Vec<ArrivalEvent> {
        match outcome {
            TickOutcome::Completed { events, .. } => events.clone(),
            other => panic!("expected Completed, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_scenario_enter_leave_reenter() {
        let feed = ScriptedFeed::new(vec![
            Ok(payload(&[("abc123", 0.0, 0.0005, false)])),
            Ok(payload(&[("abc123", 0.0, 0.09, false)])),
            Ok(payload(&[("abc123", 0.0, 0.0005, false)])),
        ]);
        let engine = Engine::new(settings(), feed);
        let t0 = Instant::now();

        let first = events_of(&engine.tick(origin(), TickMode::Foreground, t0).await);
        assert_eq!(first.len(), 1);
        assert_eq!(first[0].track_id, "abc123");
        assert!((first[0].distance_m - 55.6).abs() < 1.0, "{}", first[0].distance_m);

        // ~10 km out: still acquired, no longer in the alert window
        let second = engine.tick(origin(), TickMode::Foreground, t0 + secs(301)).await;
        assert!(events_of(&second).is_empty());
        assert_eq!(engine.current_result().tracks.len(), 1);
        assert!(engine.current_result().tracks[0].distance_m > 10_000.0);

        let third = events_of(&engine.tick(origin(), TickMode::Foreground, t0 + secs(602)).await);
        assert_eq!(third.len(), 1);
        assert_eq!(third[0].track_id, "abc123");
    }

    #[tokio::test]
    async fn test_repeated_ticks_are_idempotent() {
        let same = || Ok(payload(&[("a", 0.0, 0.01, false), ("b", 0.0, 0.05, false)]));
        let feed = ScriptedFeed::new(vec![same(), same(), same()]);
        let engine = Engine::new(settings(), feed);
        let t0 = Instant::now();

        engine.tick(origin(), TickMode::Foreground, t0).await;
        let before = engine.current_result().tracks.clone();
        for i in 1..=2 {
            let out = engine.tick(origin(), TickMode::Foreground, t0 + secs(400 * i)).await;
            assert!(events_of(&out).is_empty());
            assert_eq!(engine.current_result().tracks, before);
        }
    }

    #[tokio::test]
    async fn test_feed_throttle_skips_without_fetch() {
        let feed = ScriptedFeed::new(vec![]);
        let engine = Engine::new(settings(), feed.clone());
        let t0 = Instant::now();

        assert!(engine.tick(origin(), TickMode::Foreground, t0).await.is_completed());
        let out = engine.tick(origin(), TickMode::Foreground, t0 + secs(10)).await;
        assert!(matches!(out, TickOutcome::Skipped(SkipReason::ThrottledFeed)));
        assert_eq!(feed.calls(), 1);

        // Background ticks bypass the feed gate
        let out = engine.tick(origin(), TickMode::Background, t0 + secs(10)).await;
        assert!(out.is_completed());
        assert_eq!(feed.calls(), 2);
        assert_eq!(engine.stats().ticks_skipped, 1);
    }

    #[tokio::test]
    async fn test_failed_tick_leaves_state_untouched() {
        let feed = ScriptedFeed::new(vec![
            Ok(payload(&[("abc123", 0.0, 0.001, false)])),
            Err(FeedError::Status(503)),
            Ok(payload(&[("abc123", 0.0, 0.001, false)])),
        ]);
        let engine = Engine::new(settings(), feed);
        let t0 = Instant::now();

        assert_eq!(events_of(&engine.tick(origin(), TickMode::Foreground, t0).await).len(), 1);
        let before = engine.current_result();

        let out = engine.tick(origin(), TickMode::Foreground, t0 + secs(400)).await;
        assert!(matches!(out, TickOutcome::Failed(FailReason::Fetch(_))));
        assert!(Arc::ptr_eq(&before, &engine.current_result()));

        // The outage is not read as a departure, so no re-entry alert
        let out = engine.tick(origin(), TickMode::Foreground, t0 + secs(800)).await;
        assert!(events_of(&out).is_empty());
        assert_eq!(engine.stats().ticks_failed, 1);
    }

    #[tokio::test]
    async fn test_failed_fetch_spends_feed_slot() {
        let feed = ScriptedFeed::new(vec![Err(FeedError::Http("connection refused".into()))]);
        let engine = Engine::new(settings(), feed);
        let t0 = Instant::now();

        assert!(matches!(
            engine.tick(origin(), TickMode::Foreground, t0).await,
            TickOutcome::Failed(_)
        ));
        assert!(matches!(
            engine.tick(origin(), TickMode::Foreground, t0 + secs(5)).await,
            TickOutcome::Skipped(SkipReason::ThrottledFeed)
        ));
    }

    #[tokio::test]
    async fn test_reset_throttle_reopens_feed_gate() {
        let feed = ScriptedFeed::new(vec![]);
        let engine = Engine::new(settings(), feed.clone());
        let t0 = Instant::now();

        engine.tick(origin(), TickMode::Foreground, t0).await;
        engine.reset_throttle().await;
        let out = engine.tick(origin(), TickMode::Foreground, t0 + secs(1)).await;
        assert!(out.is_completed());
        assert_eq!(feed.calls(), 2);
    }

    #[tokio::test]
    async fn test_decode_error_reported() {
        let feed = ScriptedFeed::new(vec![Err(FeedError::Decode("bad root".into()))]);
        let engine = Engine::new(settings(), feed);
        let out = engine.tick(origin(), TickMode::Foreground, Instant::now()).await;
        assert!(matches!(out, TickOutcome::Failed(FailReason::Decode(_))));
    }

    #[tokio::test(start_paused = true)]
    async fn test_fetch_timeout_is_failure() {
        let engine = Engine::new(settings(), Arc::new(SlowFeed));
        let out = engine.tick(origin(), TickMode::Background, Instant::now()).await;
        assert!(matches!(out, TickOutcome::Failed(FailReason::Timeout)));
        assert!(engine.current_result().tracks.is_empty());
    }

    #[tokio::test]
    async fn test_alert_throttle_drops_excess_arrivals() {
        let feed = ScriptedFeed::new(vec![
            Ok(payload(&[("far", 0.0, 0.05, false), ("near", 0.0, 0.001, false)])),
            Ok(payload(&[
                ("far", 0.0, 0.05, false),
                ("near", 0.0, 0.001, false),
                ("late", 0.0, 0.02, false),
            ])),
            Ok(payload(&[
                ("far", 0.0, 0.05, false),
                ("near", 0.0, 0.001, false),
                ("late", 0.0, 0.02, false),
            ])),
        ]);
        let engine = Engine::new(settings(), feed);
        let t0 = Instant::now();

        // Two simultaneous arrivals: nearest wins the alert slot
        let first = events_of(&engine.tick(origin(), TickMode::Foreground, t0).await);
        assert_eq!(first.len(), 1);
        assert_eq!(first[0].track_id, "near");

        // Arrival inside the alert window is dropped, not queued
        let second = engine.tick(origin(), TickMode::Foreground, t0 + secs(60)).await;
        assert!(events_of(&second).is_empty());
        let third = engine.tick(origin(), TickMode::Foreground, t0 + secs(400)).await;
        assert!(events_of(&third).is_empty());

        let stats = engine.stats();
        assert_eq!(stats.arrivals_detected, 3);
        assert_eq!(stats.alerts_delivered, 1);
        assert_eq!(stats.alerts_suppressed, 2);
    }

    #[tokio::test]
    async fn test_result_carries_feed_time() {
        let mut data = payload(&[("abc123", 0.0, 0.001, false)]);
        data.time = Some(epoch_now() - 4.0);
        let engine = Engine::new(settings(), ScriptedFeed::new(vec![Ok(data)]));

        engine.tick(origin(), TickMode::Foreground, Instant::now()).await;
        let result = engine.current_result();
        let lag = result.feed_lag().unwrap();
        assert!((4.0..10.0).contains(&lag), "lag {lag}");
    }

    #[tokio::test]
    async fn test_ground_tracks_never_alert() {
        let feed = ScriptedFeed::new(vec![Ok(payload(&[("taxi", 0.0, 0.0001, true)]))]);
        let engine = Engine::new(settings(), feed);
        let out = engine.tick(origin(), TickMode::Foreground, Instant::now()).await;
        assert!(events_of(&out).is_empty());
        assert!(engine.current_result().tracks.is_empty());
    }

    #[tokio::test]
    async fn test_result_ordered_by_distance() {
        let feed = ScriptedFeed::new(vec![Ok(payload(&[
            ("c", 0.0, 0.15, false),
            ("a", 0.0, 0.01, false),
            ("b", 0.0, 0.05, false),
            ("out", 0.0, 1.0, false),
        ]))]);
        let engine = Engine::new(settings(), feed);
        engine.tick(origin(), TickMode::Foreground, Instant::now()).await;
        let ids: Vec<String> = engine
            .current_result()
            .tracks
            .iter()
            .map(|r| r.track.id.clone())
            .collect();
        assert_eq!(ids, vec!["a", "b", "c"]);
    }

    #[tokio::test]
    async fn test_sinks_called_once_and_failures_dropped() {
        let feed = ScriptedFeed::new(vec![Ok(payload(&[("abc123", 0.0, 0.001, false)]))]);
        let recording = Arc::new(RecordingSink::default());
        let failing = Arc::new(FailingSink::default());
        let engine = Engine::new(settings(), feed)
            .with_sink(failing.clone())
            .with_sink(recording.clone());

        let out = engine.tick(origin(), TickMode::Foreground, Instant::now()).await;
        assert_eq!(events_of(&out).len(), 1);
        assert_eq!(failing.calls.load(Ordering::SeqCst), 1);
        assert_eq!(*recording.seen.lock().unwrap(), vec!["abc123".to_string()]);
        assert_eq!(engine.stats().delivery_failures, 1);
    }

    /// Stalls its first delivery.
    #[derive(Default)]
    struct SlowFirstSink {
        started: Notify,
        calls: AtomicU64,
        seen: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl AlertSink for SlowFirstSink {
        fn name(&self) -> &str {
            "slow-first"
        }

        async fn notify(&self, event: &ArrivalEvent) -> Result<(), NotifyError> {
            if self.calls.fetch_add(1, Ordering::SeqCst) == 0 {
                self.started.notify_one();
                tokio::time::sleep(Duration::from_secs(10)).await;
            }
            self.seen.lock().unwrap().push(event.track_id.clone());
            Ok(())
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_deliveries_keep_tick_order() {
        let feed = ScriptedFeed::new(vec![
            Ok(payload(&[("first", 0.0, 0.001, false)])),
            Ok(payload(&[("first", 0.0, 0.001, false), ("second", 0.0, 0.002, false)])),
        ]);
        let sink = Arc::new(SlowFirstSink::default());
        let unthrottled = EngineSettings {
            feed_poll_interval: Duration::ZERO,
            alert_interval: Duration::ZERO,
            ..settings()
        };
        let engine = Arc::new(Engine::new(unthrottled, feed).with_sink(sink.clone()));
        let t0 = Instant::now();

        let earlier = {
            let engine = engine.clone();
            tokio::spawn(async move { engine.tick(origin(), TickMode::Foreground, t0).await })
        };
        sink.started.notified().await;

        // The later tick finishes its critical section while the first sink stalls
        let later = engine.tick(origin(), TickMode::Foreground, t0 + secs(1)).await;
        assert_eq!(events_of(&later).len(), 1);
        earlier.await.unwrap();

        assert_eq!(*sink.seen.lock().unwrap(), vec!["first", "second"]);
    }

    #[tokio::test]
    async fn test_subscribers_receive_events() {
        let feed = ScriptedFeed::new(vec![Ok(payload(&[("abc123", 0.0, 0.001, false)]))]);
        let engine = Engine::new(settings(), feed);
        let mut rx = engine.subscribe();

        engine.tick(origin(), TickMode::Foreground, Instant::now()).await;
        let ev = rx.recv().await.unwrap();
        assert_eq!(ev.track_id, "abc123");
    }

    #[tokio::test]
    async fn test_stale_reference_skips() {
        let feed = ScriptedFeed::new(vec![]);
        let engine = Engine::new(settings(), feed.clone());
        let out = engine
            .tick_with_source(&StaleSource, TickMode::Foreground, Instant::now())
            .await;
        assert!(matches!(out, TickOutcome::Skipped(SkipReason::NoReference)));
        assert_eq!(feed.calls(), 0);

        // Two minutes old is fine for a background wake
        let out = engine
            .tick_with_source(&StaleSource, TickMode::Background, Instant::now())
            .await;
        assert!(out.is_completed());
    }

    #[tokio::test]
    async fn test_shutdown_rejects_ticks() {
        let feed = ScriptedFeed::new(vec![]);
        let engine = Engine::new(settings(), feed.clone());
        engine.shutdown();
        let out = engine.tick(origin(), TickMode::Foreground, Instant::now()).await;
        assert!(matches!(out, TickOutcome::Failed(FailReason::Cancelled)));
        assert_eq!(feed.calls(), 0);
    }

    #[tokio::test]
    async fn test_shutdown_mid_fetch_discards_result() {
        let feed = Arc::new(HeldFeed {
            started: Notify::new(),
            release: Notify::new(),
        });
        let engine = Arc::new(Engine::new(settings(), feed.clone()));
        let mut rx = engine.subscribe();

        let task = {
            let engine = engine.clone();
            tokio::spawn(async move {
                engine
                    .tick(origin(), TickMode::Foreground, Instant::now())
                    .await
            })
        };

        feed.started.notified().await;
        engine.shutdown();
        feed.release.notify_one();

        let out = task.await.unwrap();
        assert!(matches!(out, TickOutcome::Failed(FailReason::Cancelled)));
        assert!(engine.current_result().tracks.is_empty());
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_concurrent_ticks_serialize() {
        let feed = ScriptedFeed::new(vec![
            Ok(payload(&[("abc123", 0.0, 0.001, false)])),
            Ok(payload(&[("abc123", 0.0, 0.001, false)])),
        ]);
        let engine = Arc::new(Engine::new(settings(), feed));
        let t0 = Instant::now();

        let (a, b) = tokio::join!(
            engine.tick(origin(), TickMode::Foreground, t0),
            engine.tick(origin(), TickMode::Background, t0),
        );
        let total: usize = [a, b]
            .iter()
            .filter_map(|o| match o {
                TickOutcome::Completed { events, .. } => Some(events.len()),
                _ => None,
            })
            .sum();
        // One visit, one arrival, regardless of which timeline ran first
        assert_eq!(total, 1);
        assert_eq!(engine.stats().arrivals_detected, 1);
    }
}
