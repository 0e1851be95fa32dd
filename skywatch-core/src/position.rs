//! Reference position source and freshness policy.

use std::time::{Duration, SystemTime, UNIX_EPOCH};

use serde::Serialize;

use crate::geo::Coordinate;

/// Oldest fix accepted by a foreground tick.
pub const FOREGROUND_MAX_AGE: Duration = Duration::from_secs(30);

/// Oldest fix accepted by a background tick.
pub const BACKGROUND_MAX_AGE: Duration = Duration::from_secs(30 * 60);

/// Which timeline a tick belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum TickMode {
    /// Continuous updates while the host is active.
    Foreground,
    /// Periodic low-frequency wake with a best-effort position.
    Background,
}

impl TickMode {
    pub fn max_fix_age(self) -> Duration {
        match self {
            TickMode::Foreground => FOREGROUND_MAX_AGE,
            TickMode::Background => BACKGROUND_MAX_AGE,
        }
    }
}

impl std::fmt::Display for TickMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TickMode::Foreground => write!(f, "foreground"),
            TickMode::Background => write!(f, "background"),
        }
    }
}

/// One reading from the position source.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct PositionFix {
    pub coordinate: Coordinate,
    /// Epoch seconds when the fix was taken.
    pub timestamp: f64,
    pub accuracy_m: Option<f64>,
}

impl PositionFix {
    pub fn age(&self, now: f64) -> f64 {
        (now - self.timestamp).max(0.0)
    }
}

/// Supplies the observer's current position.
pub trait PositionSource: Send + Sync {
    fn current_position(&self) -> Option<PositionFix>;
}

/// A stationary observer; every reading is fresh.
#[derive(Debug, Clone, Copy)]
pub struct FixedPosition {
    pub coordinate: Coordinate,
}

impl FixedPosition {
    pub fn new(lat: f64, lon: f64) -> Self {
        FixedPosition {
            coordinate: Coordinate::new(lat, lon),
        }
    }
}

impl PositionSource for FixedPosition {
    fn current_position(&self) -> Option<PositionFix> {
        Some(PositionFix {
            coordinate: self.coordinate,
            timestamp: epoch_now(),
            accuracy_m: Some(0.0),
        })
    }
}

/// Reference coordinate for a tick, or `None` when the fix is missing,
/// invalid, or older than the mode allows.
pub fn usable_reference(fix: Option<&PositionFix>, mode: TickMode, now: f64) -> Option<Coordinate> {
    let fix = fix?;
    if !fix.coordinate.is_valid() {
        return None;
    }
    if fix.age(now) > mode.max_fix_age().as_secs_f64() {
        return None;
    }
    Some(fix.coordinate)
}

/// Current wall-clock time as epoch seconds.
pub fn epoch_now() -> f64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs_f64())
        .unwrap_or(0.0)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    fn fix_at(timestamp: f64) -> PositionFix {
        PositionFix {
            coordinate: Coordinate::new(35.5, -82.5),
            timestamp,
            accuracy_m: Some(10.0),
        }
    }

    #[test]
    fn test_missing_fix() {
        assert!(usable_reference(None, TickMode::Foreground, 100.0).is_none());
    }

    #[test]
    fn test_foreground_staleness() {
        let fix = fix_at(1000.0);
        assert!(usable_reference(Some(&fix), TickMode::Foreground, 1030.0).is_some());
        assert!(usable_reference(Some(&fix), TickMode::Foreground, 1031.0).is_none());
    }

    #[test]
    fn test_background_staleness() {
        let fix = fix_at(1000.0);
        assert!(usable_reference(Some(&fix), TickMode::Background, 1000.0 + 1799.0).is_some());
        assert!(usable_reference(Some(&fix), TickMode::Background, 1000.0 + 1801.0).is_none());
    }

    #[test]
    fn test_invalid_coordinate_rejected() {
        let mut fix = fix_at(1000.0);
        fix.coordinate = Coordinate::new(120.0, 0.0);
        assert!(usable_reference(Some(&fix), TickMode::Background, 1000.0).is_none());
    }

    #[test]
    fn test_fixed_position_always_fresh() {
        let src = FixedPosition::new(35.5, -82.5);
        let fix = src.current_position().unwrap();
        assert!(usable_reference(Some(&fix), TickMode::Foreground, epoch_now()).is_some());
    }
}
