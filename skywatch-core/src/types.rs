//! Shared types, error enum, and per-tick output records for skywatch-core.

use serde::Serialize;
use thiserror::Error;

use crate::geo::Coordinate;

/// All errors produced by skywatch-core.
#[derive(Debug, Error)]
pub enum SkywatchError {
    #[error("malformed feed payload: {0}")]
    Decode(String),
    #[error("config error: {0}")]
    Config(String),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, SkywatchError>;

// ---------------------------------------------------------------------------
// Track
// ---------------------------------------------------------------------------

/// One observed aircraft at one instant, built fresh from a feed record.
///
/// Measurements stay in feed-native units: meters, meters/second, degrees.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Track {
    pub id: String,
    pub label: Option<String>,
    pub origin_country: Option<String>,
    pub position: Option<Coordinate>,
    pub altitude_m: Option<f64>,
    pub speed_mps: Option<f64>,
    pub heading_deg: Option<f64>,
    pub vertical_rate_mps: Option<f64>,
    pub squawk: Option<String>,
    pub last_contact: Option<f64>,
    pub on_ground: bool,
}

impl Track {
    /// A track carrying only an identifier; every measurement unknown.
    pub fn bare(id: impl Into<String>) -> Self {
        Track {
            id: id.into(),
            label: None,
            origin_country: None,
            position: None,
            altitude_m: None,
            speed_mps: None,
            heading_deg: None,
            vertical_rate_mps: None,
            squawk: None,
            last_contact: None,
            on_ground: false,
        }
    }

    /// Label if present and non-blank, otherwise the identifier.
    pub fn display_name(&self) -> &str {
        match self.label.as_deref() {
            Some(l) if !l.trim().is_empty() => l,
            _ => &self.id,
        }
    }
}

/// A track paired with its great-circle distance from the reference point.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RangedTrack {
    pub distance_m: f64,
    #[serde(flatten)]
    pub track: Track,
}

impl RangedTrack {
    pub fn id(&self) -> &str {
        &self.track.id
    }
}

// ---------------------------------------------------------------------------
// Tick output
// ---------------------------------------------------------------------------

/// The engine's output for one completed tick. Replaced wholesale each tick.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DetectionResult {
    /// Tracks inside the acquisition radius, nearest first.
    pub tracks: Vec<RangedTrack>,
    /// Epoch seconds at which the underlying feed data was fetched.
    pub timestamp: f64,
    /// Data time reported by the feed itself, if any.
    pub feed_time: Option<f64>,
}

impl DetectionResult {
    pub fn empty() -> Self {
        DetectionResult {
            tracks: Vec::new(),
            timestamp: 0.0,
            feed_time: None,
        }
    }

    /// Seconds since the data was fetched; `None` before the first tick.
    pub fn age(&self, now: f64) -> Option<f64> {
        if self.timestamp <= 0.0 {
            return None;
        }
        Some((now - self.timestamp).max(0.0))
    }

    /// How far the feed's own data time trails the fetch, in seconds.
    pub fn feed_lag(&self) -> Option<f64> {
        self.feed_time.map(|t| (self.timestamp - t).max(0.0))
    }
}

/// A track id that newly satisfies the alert-radius condition.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ArrivalEvent {
    pub track_id: String,
    pub distance_m: f64,
    pub track: Track,
    pub observed_at: f64,
}

impl ArrivalEvent {
    pub fn from_ranged(ranged: &RangedTrack, observed_at: f64) -> Self {
        ArrivalEvent {
            track_id: ranged.track.id.clone(),
            distance_m: ranged.distance_m,
            track: ranged.track.clone(),
            observed_at,
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
