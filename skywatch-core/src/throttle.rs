//! Minimum-interval gates for feed polling and alert delivery.
//!
//! Calling [`Gate::allow`] consumes the gate when it returns `true`; there is
//! no separate commit, so only call it when the caller will follow through.
//! Both gates run on `Instant` and never look at wall-clock time.

use std::time::{Duration, Instant};

/// Default minimum spacing between foreground feed queries.
pub const DEFAULT_FEED_INTERVAL: Duration = Duration::from_secs(30);

/// Default minimum spacing between delivered alerts.
pub const DEFAULT_ALERT_INTERVAL: Duration = Duration::from_secs(300);

/// One minimum-interval gate.
#[derive(Debug, Clone)]
pub struct Gate {
    min_interval: Duration,
    last_fired: Option<Instant>,
}

impl Gate {
    pub fn new(min_interval: Duration) -> Self {
        Gate {
            min_interval,
            last_fired: None,
        }
    }

    /// A gate that always opens.
    pub fn always() -> Self {
        Self::new(Duration::ZERO)
    }

    /// Returns `true` and records `now` if at least `min_interval` has passed
    /// since the last `true`. An instant earlier than the last firing counts
    /// as zero elapsed time.
    pub fn allow(&mut self, now: Instant) -> bool {
        let open = match self.last_fired {
            None => true,
            Some(last) => now.saturating_duration_since(last) >= self.min_interval,
        };
        if open {
            self.last_fired = Some(now);
        }
        open
    }

    /// Time until the gate opens again, zero if open.
    pub fn remaining(&self, now: Instant) -> Duration {
        match self.last_fired {
            None => Duration::ZERO,
            Some(last) => self
                .min_interval
                .saturating_sub(now.saturating_duration_since(last)),
        }
    }

    pub fn min_interval(&self) -> Duration {
        self.min_interval
    }

    pub fn last_fired(&self) -> Option<Instant> {
        self.last_fired
    }

    /// Forget the last firing. Test hook.
    pub fn reset(&mut self) {
        self.last_fired = None;
    }
}

/// The two independent gates owned by the engine.
#[derive(Debug, Clone)]
pub struct ThrottleGuard {
    pub feed: Gate,
    pub alert: Gate,
}

impl ThrottleGuard {
    pub fn new(feed_interval: Duration, alert_interval: Duration) -> Self {
        ThrottleGuard {
            feed: Gate::new(feed_interval),
            alert: Gate::new(alert_interval),
        }
    }

    pub fn allow_feed(&mut self, now: Instant) -> bool {
        let open = self.feed.allow(now);
        if !open {
            tracing::debug!(
                wait_secs = self.feed.remaining(now).as_secs_f64(),
                "feed poll throttled"
            );
        }
        open
    }

    pub fn allow_alert(&mut self, now: Instant) -> bool {
        self.alert.allow(now)
    }

    /// Reset both gates. Test hook.
    pub fn reset(&mut self) {
        self.feed.reset();
        self.alert.reset();
    }
}

impl Default for ThrottleGuard {
    fn default() -> Self {
        Self::new(DEFAULT_FEED_INTERVAL, DEFAULT_ALERT_INTERVAL)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
