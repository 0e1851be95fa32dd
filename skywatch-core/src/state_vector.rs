//! State-vector decoding: feed envelope → raw positional records → `Track`.
//!
//! Each record is a JSON array whose element types vary by vendor encoding.
//! Elements become [`RawValue`]s and every field is coerced independently,
//! so a malformed field costs that field only, never the record.
//!
//! Positional schema (OpenSky `/states/all`):
//!
//! | idx | field          | idx | field         |
//! |-----|----------------|-----|---------------|
//! | 0   | icao24         | 8   | on_ground     |
//! | 1   | callsign       | 9   | velocity      |
//! | 2   | origin_country | 10  | true_track    |
//! | 3   | time_position  | 11  | vertical_rate |
//! | 4   | last_contact   | 12  | sensors       |
//! | 5   | longitude      | 13  | geo_altitude  |
//! | 6   | latitude       | 14  | squawk        |
//! | 7   | baro_altitude  | 15+ | (unused)      |

use serde_json::Value;

use crate::geo::Coordinate;
use crate::types::{Result, SkywatchError, Track};

const IDX_ICAO24: usize = 0;
const IDX_CALLSIGN: usize = 1;
const IDX_ORIGIN_COUNTRY: usize = 2;
const IDX_LAST_CONTACT: usize = 4;
const IDX_LONGITUDE: usize = 5;
const IDX_LATITUDE: usize = 6;
const IDX_BARO_ALTITUDE: usize = 7;
const IDX_ON_GROUND: usize = 8;
const IDX_VELOCITY: usize = 9;
const IDX_TRUE_TRACK: usize = 10;
const IDX_VERTICAL_RATE: usize = 11;
const IDX_GEO_ALTITUDE: usize = 13;
const IDX_SQUAWK: usize = 14;

/// Grid used for the position-derived fallback identifier, in degrees.
const FALLBACK_GRID_DEG: f64 = 0.1;

// ---------------------------------------------------------------------------
// Raw values
// ---------------------------------------------------------------------------

/// One element of a raw state vector.
#[derive(Debug, Clone, PartialEq)]
pub enum RawValue {
    Text(String),
    Float(f64),
    Int(i64),
    Bool(bool),
    Null,
}

impl From<&Value> for RawValue {
    fn from(v: &Value) -> Self {
        match v {
            Value::String(s) => RawValue::Text(s.clone()),
            Value::Number(n) => {
                if n.is_f64() {
                    n.as_f64().map(RawValue::Float).unwrap_or(RawValue::Null)
                } else if let Some(i) = n.as_i64() {
                    RawValue::Int(i)
                } else {
                    // u64 beyond i64::MAX
                    n.as_f64().map(RawValue::Float).unwrap_or(RawValue::Null)
                }
            }
            Value::Bool(b) => RawValue::Bool(*b),
            Value::Null | Value::Array(_) | Value::Object(_) => RawValue::Null,
        }
    }
}

impl RawValue {
    /// Non-blank text, trimmed. Numbers are rendered as text.
    pub fn as_text(&self) -> Option<String> {
        match self {
            RawValue::Text(s) => {
                let s = s.trim();
                if s.is_empty() {
                    None
                } else {
                    Some(s.to_string())
                }
            }
            RawValue::Float(f) if f.is_finite() => Some(f.to_string()),
            RawValue::Int(i) => Some(i.to_string()),
            _ => None,
        }
    }

    /// Numeric value; decode order is string, then float, then integer.
    pub fn as_f64(&self) -> Option<f64> {
        let v = match self {
            RawValue::Text(s) => s.trim().parse::<f64>().ok()?,
            RawValue::Float(f) => *f,
            RawValue::Int(i) => *i as f64,
            RawValue::Bool(_) | RawValue::Null => return None,
        };
        v.is_finite().then_some(v)
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            RawValue::Bool(b) => Some(*b),
            RawValue::Text(s) => match s.trim().to_ascii_lowercase().as_str() {
                "true" | "1" => Some(true),
                "false" | "0" => Some(false),
                _ => None,
            },
            RawValue::Int(0) => Some(false),
            RawValue::Int(1) => Some(true),
            RawValue::Float(f) if *f == 0.0 => Some(false),
            RawValue::Float(f) if *f == 1.0 => Some(true),
            _ => None,
        }
    }
}

/// One positional record; may be shorter than the schema.
pub type RawRecord = Vec<RawValue>;

fn field(record: &[RawValue], idx: usize) -> &RawValue {
    record.get(idx).unwrap_or(&RawValue::Null)
}

// ---------------------------------------------------------------------------
// Feed envelope
// ---------------------------------------------------------------------------

/// Decoded top-level feed response.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FeedPayload {
    /// Feed-reported data time, epoch seconds.
    pub time: Option<f64>,
    pub records: Vec<RawRecord>,
}

/// Decode a feed response body.
///
/// Only a malformed envelope is an error: non-JSON, a non-object root, or a
/// `states` member that is neither an array nor null. Non-array entries
/// inside `states` become empty records.
pub fn decode_payload(body: &[u8]) -> Result<FeedPayload> {
    let root: Value =
        serde_json::from_slice(body).map_err(|e| SkywatchError::Decode(e.to_string()))?;

    let obj = root
        .as_object()
        .ok_or_else(|| SkywatchError::Decode("response root is not an object".into()))?;

    let time = obj.get("time").map(RawValue::from).and_then(|v| v.as_f64());

    let records = match obj.get("states") {
        None | Some(Value::Null) => Vec::new(),
        Some(Value::Array(states)) => states
            .iter()
            .map(|s| match s {
                Value::Array(items) => items.iter().map(RawValue::from).collect(),
                _ => Vec::new(),
            })
            .collect(),
        Some(_) => return Err(SkywatchError::Decode("`states` is not an array".into())),
    };

    Ok(FeedPayload { time, records })
}

// ---------------------------------------------------------------------------
// Parser
// ---------------------------------------------------------------------------

/// Parse one record into a `Track`. Never fails.
pub fn parse(record: &[RawValue]) -> Track {
    let label = field(record, IDX_CALLSIGN).as_text();

    let position = match (
        field(record, IDX_LATITUDE).as_f64(),
        field(record, IDX_LONGITUDE).as_f64(),
    ) {
        (Some(lat), Some(lon)) => Some(Coordinate::new(lat, lon)).filter(Coordinate::is_valid),
        _ => None,
    };

    let id = field(record, IDX_ICAO24)
        .as_text()
        .map(|s| s.to_ascii_lowercase())
        .unwrap_or_else(|| fallback_id(record, label.as_deref(), position.as_ref()));

    Track {
        id,
        label,
        origin_country: field(record, IDX_ORIGIN_COUNTRY).as_text(),
        position,
        altitude_m: field(record, IDX_BARO_ALTITUDE)
            .as_f64()
            .or_else(|| field(record, IDX_GEO_ALTITUDE).as_f64()),
        speed_mps: field(record, IDX_VELOCITY).as_f64(),
        heading_deg: field(record, IDX_TRUE_TRACK).as_f64(),
        vertical_rate_mps: field(record, IDX_VERTICAL_RATE).as_f64(),
        squawk: field(record, IDX_SQUAWK).as_text(),
        last_contact: field(record, IDX_LAST_CONTACT).as_f64(),
        on_ground: field(record, IDX_ON_GROUND).as_bool().unwrap_or(false),
    }
}

/// Parse every record in a payload, preserving count and order.
pub fn parse_all(payload: &FeedPayload) -> Vec<Track> {
    payload.records.iter().map(|r| parse(r)).collect()
}

/// Deterministic identifier for a record without an icao24.
///
/// Callsign first since it is stable for a flight across ticks, then a
/// coarse position cell, then the record's own content.
fn fallback_id(record: &[RawValue], label: Option<&str>, position: Option<&Coordinate>) -> String {
    if let Some(cs) = label {
        return format!("cs-{}", cs.to_ascii_uppercase());
    }
    if let Some(pos) = position {
        let cell_lat = (pos.lat / FALLBACK_GRID_DEG).round() as i64;
        let cell_lon = (pos.lon / FALLBACK_GRID_DEG).round() as i64;
        let key = format!("{cell_lat}:{cell_lon}");
        return format!("pos-{:016x}", fnv1a(key.as_bytes()));
    }
    let key = format!("{record:?}");
    format!("anon-{:016x}", fnv1a(key.as_bytes()))
}

/// 64-bit FNV-1a.
fn fnv1a(data: &[u8]) -> u64 {
    let mut hash: u64 = 0xcbf2_9ce4_8422_2325;
    for &b in data {
        hash ^= b as u64;
        hash = hash.wrapping_mul(0x0000_0100_0000_01b3);
    }
    hash
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
