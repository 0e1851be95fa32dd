//! Foreground and background timelines driving the engine.
//!
//! Both timelines call the same `Engine::tick_with_source`; the engine's tick
//! lock serializes them. The foreground cadence is short and gated by the
//! feed throttle, the background wake is long and bypasses it.

use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

use skywatch_core::{PositionSource, TickMode};

use crate::engine::{Engine, SkipReason, TickOutcome};

pub struct Scheduler {
    engine: Arc<Engine>,
    position: Arc<dyn PositionSource>,
    foreground_every: Duration,
    background_every: Duration,
}

impl Scheduler {
    pub fn new(
        engine: Arc<Engine>,
        position: Arc<dyn PositionSource>,
        foreground_every: Duration,
        background_every: Duration,
    ) -> Self {
        Scheduler {
            engine,
            position,
            foreground_every,
            background_every,
        }
    }

    /// Run both timelines until `shutdown` resolves, then shut the engine down.
    pub async fn run(self, shutdown: impl Future<Output = ()>) {
        info!(
            foreground_secs = self.foreground_every.as_secs(),
            background_secs = self.background_every.as_secs(),
            "scheduler started"
        );

        tokio::select! {
            _ = self.timeline(TickMode::Foreground, self.foreground_every) => {}
            _ = self.timeline(TickMode::Background, self.background_every) => {}
            _ = shutdown => {}
        }

        self.engine.shutdown();
    }

    async fn timeline(&self, mode: TickMode, every: Duration) {
        let mut interval = tokio::time::interval(every.max(Duration::from_secs(1)));
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

        // The foreground tick fires immediately; background waits a full period.
        if mode == TickMode::Background {
            interval.tick().await;
        }

        loop {
            interval.tick().await;
            let outcome = self
                .engine
                .tick_with_source(self.position.as_ref(), mode, Instant::now())
                .await;
            log_outcome(mode, &outcome);
        }
    }
}

pub fn log_outcome(mode: TickMode, outcome: &TickOutcome) {
    match outcome {
        TickOutcome::Completed { result, events } => {
            if events.is_empty() {
                debug!(%mode, tracks = result.tracks.len(), "tick");
            } else {
                info!(%mode, tracks = result.tracks.len(), arrivals = events.len(), "tick");
            }
        }
        TickOutcome::Skipped(SkipReason::ThrottledFeed) => {
            debug!(%mode, "tick skipped: feed throttled");
        }
        TickOutcome::Skipped(SkipReason::NoReference) => {
            warn!(%mode, "tick skipped: no usable reference position");
        }
        TickOutcome::Failed(reason) => {
            warn!(%mode, "tick failed: {reason}");
        }
    }
}
