//! Descriptive lookups for tracks: operator, rough category, squawk meaning.
//!
//! Works purely from the fields a state vector carries.

use crate::types::{ArrivalEvent, Track};

// ---------------------------------------------------------------------------
// Categories
// ---------------------------------------------------------------------------

pub const CAT_JET: &str = "jet";
pub const CAT_PROP: &str = "prop";
pub const CAT_TURBOPROP: &str = "turboprop";
pub const CAT_HELICOPTER: &str = "helicopter";
pub const CAT_CARGO: &str = "cargo";
pub const CAT_UNKNOWN: &str = "unknown";

const MPS_PER_KNOT: f64 = 0.514_444;
const METERS_PER_FOOT: f64 = 0.3048;

// ---------------------------------------------------------------------------
// Airline lookup
// ---------------------------------------------------------------------------

/// Airline ICAO prefixes → operator name.
const AIRLINE_PREFIXES: &[(&str, &str)] = &[
    ("AAL", "American Airlines"),
    ("DAL", "Delta Air Lines"),
    ("UAL", "United Airlines"),
    ("SWA", "Southwest Airlines"),
    ("JBU", "JetBlue Airways"),
    ("ASA", "Alaska Airlines"),
    ("SKW", "SkyWest Airlines"),
    ("UPS", "UPS"),
    ("FDX", "FedEx"),
    ("GTI", "Atlas Air"),
    ("ACA", "Air Canada"),
    ("WJA", "WestJet"),
    ("BAW", "British Airways"),
    ("DLH", "Lufthansa"),
    ("AFR", "Air France"),
    ("KLM", "KLM"),
    ("SWR", "Swiss"),
    ("EZY", "easyJet"),
    ("RYR", "Ryanair"),
    ("UAE", "Emirates"),
    ("QTR", "Qatar Airways"),
];

const CARGO_PREFIXES: &[&str] = &["UPS", "FDX", "GTI", "ABX", "CLX", "GEC", "CKS", "BOX"];

fn prefix(callsign: &str) -> Option<String> {
    let cs = callsign.trim();
    if cs.len() < 3 || !cs.is_char_boundary(3) {
        return None;
    }
    Some(cs[..3].to_ascii_uppercase())
}

/// Operator name from the callsign's three-letter prefix.
pub fn lookup_operator(callsign: &str) -> Option<&'static str> {
    let p = prefix(callsign)?;
    AIRLINE_PREFIXES
        .iter()
        .find(|(code, _)| *code == p)
        .map(|(_, name)| *name)
}

/// Emergency squawk meaning.
pub fn emergency_squawk(squawk: &str) -> Option<&'static str> {
    match squawk.trim() {
        "7500" => Some("Hijack"),
        "7600" => Some("Radio failure"),
        "7700" => Some("Emergency"),
        _ => None,
    }
}

/// Rough category from callsign, speed, and altitude.
pub fn classify(track: &Track) -> &'static str {
    if let Some(p) = track.label.as_deref().and_then(prefix) {
        if CARGO_PREFIXES.contains(&p.as_str()) {
            return CAT_CARGO;
        }
    }

    let speed_kts = track.speed_mps.map(|v| v / MPS_PER_KNOT);
    let alt_ft = track.altitude_m.map(|v| v / METERS_PER_FOOT);

    if let Some(speed) = speed_kts {
        if speed > 250.0 {
            return CAT_JET;
        }
        if speed < 80.0 && alt_ft.is_some_and(|a| a < 3000.0) {
            return CAT_HELICOPTER;
        }
        if (80.0..=180.0).contains(&speed) {
            if alt_ft.is_some_and(|a| a > 15000.0) {
                return CAT_TURBOPROP;
            }
            return CAT_PROP;
        }
        if speed > 180.0 {
            return CAT_TURBOPROP;
        }
    }

    match alt_ft {
        Some(a) if a > 30000.0 => CAT_JET,
        Some(a) if a < 5000.0 => CAT_PROP,
        _ => CAT_UNKNOWN,
    }
}

/// One-line human description of a track.
pub fn describe(track: &Track) -> String {
    let mut out = track.display_name().to_string();
    if let Some(op) = track.label.as_deref().and_then(lookup_operator) {
        out.push_str(&format!(" ({op})"));
    }
    let cat = classify(track);
    if cat != CAT_UNKNOWN {
        out.push_str(&format!(", {cat}"));
    }
    if let Some(alt) = track.altitude_m {
        out.push_str(&format!(" at {alt:.0} m"));
    }
    if let Some(meaning) = track.squawk.as_deref().and_then(emergency_squawk) {
        out.push_str(&format!(" [squawk {meaning}]"));
    }
    out
}

/// Notification text for an arrival.
pub fn arrival_message(event: &ArrivalEvent) -> String {
    format!(
        "{} overhead, {:.1} km away",
        describe(&event.track),
        event.distance_m / 1000.0
    )
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
