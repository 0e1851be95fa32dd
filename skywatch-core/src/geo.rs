//! Great-circle distance, feed query boxes, and the two-radius track filter.
//!
//! The acquisition radius is wider than the alert radius so a track is listed
//! before it is close enough to alert. The bounding box only trims the feed
//! query; the circular cut happens in [`filter`].

use std::collections::HashSet;

use serde::{Deserialize, Serialize};

use crate::types::{RangedTrack, Track};

// ---------------------------------------------------------------------------
// Constants
// ---------------------------------------------------------------------------

/// Mean Earth radius in meters.
pub const EARTH_RADIUS_M: f64 = 6_371_008.8;

/// Meters per degree of latitude on the mean sphere.
const METERS_PER_DEG_LAT: f64 = EARTH_RADIUS_M * std::f64::consts::PI / 180.0;

// ---------------------------------------------------------------------------
// Types
// ---------------------------------------------------------------------------

/// WGS-84 latitude/longitude in decimal degrees.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Coordinate {
    pub lat: f64,
    pub lon: f64,
}

impl Coordinate {
    pub fn new(lat: f64, lon: f64) -> Self {
        Coordinate { lat, lon }
    }

    /// Finite and inside the lat/lon ranges.
    pub fn is_valid(&self) -> bool {
        self.lat.is_finite()
            && self.lon.is_finite()
            && (-90.0..=90.0).contains(&self.lat)
            && (-180.0..=180.0).contains(&self.lon)
    }

    pub fn distance_m(&self, other: &Coordinate) -> f64 {
        haversine_m(self.lat, self.lon, other.lat, other.lon)
    }
}

/// Feed query rectangle (`lamin`, `lamax`, `lomin`, `lomax`).
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct BoundingBox {
    pub lamin: f64,
    pub lamax: f64,
    pub lomin: f64,
    pub lomax: f64,
}

impl BoundingBox {
    /// Every longitude, latitudes clamped to the valid range.
    fn full_longitude(lamin: f64, lamax: f64) -> Self {
        BoundingBox {
            lamin: lamin.max(-90.0),
            lamax: lamax.min(90.0),
            lomin: -180.0,
            lomax: 180.0,
        }
    }

    pub fn contains(&self, c: &Coordinate) -> bool {
        c.lat >= self.lamin && c.lat <= self.lamax && c.lon >= self.lomin && c.lon <= self.lomax
    }
}

/// Feed query boxes enclosing a circle of `radius_m` around `center`.
///
/// Usually one box. A circle crossing the antimeridian yields two, one on
/// each side of ±180°. A circle reaching a pole spans every longitude.
pub fn query_boxes(center: &Coordinate, radius_m: f64) -> Vec<BoundingBox> {
    let dlat = radius_m / METERS_PER_DEG_LAT;
    let lamin = center.lat - dlat;
    let lamax = center.lat + dlat;

    if lamin <= -90.0 || lamax >= 90.0 {
        return vec![BoundingBox::full_longitude(lamin, lamax)];
    }

    // Widest longitude offset of a small circle at this latitude
    let sin_d = (radius_m / EARTH_RADIUS_M).sin();
    let cos_lat = center.lat.to_radians().cos();
    if sin_d >= cos_lat {
        return vec![BoundingBox::full_longitude(lamin, lamax)];
    }
    let dlon = (sin_d / cos_lat).asin().to_degrees();

    let lomin = center.lon - dlon;
    let lomax = center.lon + dlon;
    let part = |lomin: f64, lomax: f64| BoundingBox {
        lamin,
        lamax,
        lomin,
        lomax,
    };

    if lomin < -180.0 {
        vec![part(lomin + 360.0, 180.0), part(-180.0, lomax)]
    } else if lomax > 180.0 {
        vec![part(lomin, 180.0), part(-180.0, lomax - 360.0)]
    } else {
        vec![part(lomin, lomax)]
    }
}

/// Output of [`filter`]: both windows ordered nearest first, ties by id.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct GeoPartition {
    pub acquisition: Vec<RangedTrack>,
    pub alert: Vec<RangedTrack>,
}

// ---------------------------------------------------------------------------
// Haversine
// ---------------------------------------------------------------------------

/// Great-circle distance in meters.
pub fn haversine_m(lat1: f64, lon1: f64, lat2: f64, lon2: f64) -> f64 {
    let dlat = (lat2 - lat1).to_radians();
    let dlon = (lon2 - lon1).to_radians();
    let a = (dlat / 2.0).sin().powi(2)
        + lat1.to_radians().cos() * lat2.to_radians().cos() * (dlon / 2.0).sin().powi(2);
    EARTH_RADIUS_M * 2.0 * a.sqrt().atan2((1.0 - a).sqrt())
}

// ---------------------------------------------------------------------------
// Filter
// ---------------------------------------------------------------------------

/// Partition `tracks` into the acquisition and alert windows around `reference`.
///
/// Tracks without a position and tracks flagged on-ground never appear in
/// either window. Radii are inclusive. A repeated id keeps its nearest entry.
pub fn filter(
    tracks: &[Track],
    reference: &Coordinate,
    acquisition_radius_m: f64,
    alert_radius_m: f64,
) -> GeoPartition {
    let mut candidates: Vec<RangedTrack> = tracks
        .iter()
        .filter(|t| !t.on_ground)
        .filter_map(|t| {
            let pos = t.position?;
            let distance_m = reference.distance_m(&pos);
            if !distance_m.is_finite() {
                return None;
            }
            Some(RangedTrack {
                distance_m,
                track: t.clone(),
            })
        })
        .collect();

    candidates.sort_by(|a, b| {
        a.distance_m
            .total_cmp(&b.distance_m)
            .then_with(|| a.id().cmp(b.id()))
    });

    // One entry per id, the nearest. Records on a box seam can arrive twice.
    let mut seen = HashSet::new();
    candidates.retain(|r| seen.insert(r.track.id.clone()));

    let alert = candidates
        .iter()
        .filter(|r| r.distance_m <= alert_radius_m)
        .cloned()
        .collect();
    candidates.retain(|r| r.distance_m <= acquisition_radius_m);

    GeoPartition {
        acquisition: candidates,
        alert,
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
