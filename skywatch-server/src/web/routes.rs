//! REST API route handlers.

use std::sync::Arc;

use axum::extract::{Query, State};
use axum::response::IntoResponse;
use axum::Json;
use serde::Deserialize;
use serde_json::{json, Value};

use skywatch_core::enrich;
use skywatch_core::position::epoch_now;

use crate::web::AppState;

#[derive(Deserialize)]
pub struct EventParams {
    limit: Option<usize>,
}

/// GET /api/result — current detection result, nearest first.
pub async fn api_result(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let result = state.engine.current_result();
    let alert_m = state.engine.settings().alert_radius_m;

    let tracks: Vec<Value> = result
        .tracks
        .iter()
        .map(|r| {
            json!({
                "id": r.track.id,
                "callsign": r.track.label,
                "description": enrich::describe(&r.track),
                "category": enrich::classify(&r.track),
                "distance_m": r.distance_m,
                "in_alert_radius": r.distance_m <= alert_m,
                "lat": r.track.position.map(|p| p.lat),
                "lon": r.track.position.map(|p| p.lon),
                "altitude_m": r.track.altitude_m,
                "speed_mps": r.track.speed_mps,
                "heading_deg": r.track.heading_deg,
                "origin_country": r.track.origin_country,
            })
        })
        .collect();

    Json(json!({
        "timestamp": result.timestamp,
        "age_sec": result.age(epoch_now()),
        "feed_time": result.feed_time,
        "feed_lag_sec": result.feed_lag(),
        "tracks": tracks,
    }))
}

/// GET /api/events — most recent delivered arrivals, newest first.
pub async fn api_events(
    State(state): State<Arc<AppState>>,
    Query(params): Query<EventParams>,
) -> impl IntoResponse {
    let limit = params.limit.unwrap_or(20).clamp(1, 100);
    let recent = state.recent.read().unwrap_or_else(|e| e.into_inner());
    let events: Vec<Value> = recent
        .iter()
        .rev()
        .take(limit)
        .map(|ev| {
            json!({
                "track_id": ev.track_id,
                "distance_m": ev.distance_m,
                "description": enrich::arrival_message(ev),
                "observed_at": ev.observed_at,
            })
        })
        .collect();
    Json(json!(events))
}

/// GET /api/status — engine counters and configured radii.
pub async fn api_status(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let settings = state.engine.settings();
    Json(json!({
        "stats": state.engine.stats(),
        "acquisition_radius_m": settings.acquisition_radius_m,
        "alert_radius_m": settings.alert_radius_m,
        "feed_poll_secs": settings.feed_poll_interval.as_secs(),
        "alert_secs": settings.alert_interval.as_secs(),
        "shut_down": state.engine.is_shut_down(),
    }))
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
