//! Web server — read-only axum API for the presentation layer.
//!
//! Serves the engine's current result and status, plus a short history of
//! delivered arrivals collected from the engine's broadcast channel.

use std::collections::VecDeque;
use std::sync::{Arc, RwLock};

use axum::Router;
use tokio::sync::broadcast::error::RecvError;
use tower_http::cors::{Any, CorsLayer};

use skywatch_core::ArrivalEvent;

use crate::engine::Engine;

pub mod routes;

/// Arrivals kept for `/api/events`.
const RECENT_EVENTS: usize = 100;

// ---------------------------------------------------------------------------
// Shared state
// ---------------------------------------------------------------------------

pub struct AppState {
    pub engine: Arc<Engine>,
    pub recent: RwLock<VecDeque<ArrivalEvent>>,
}

impl AppState {
    pub fn new(engine: Arc<Engine>) -> Self {
        AppState {
            engine,
            recent: RwLock::new(VecDeque::with_capacity(RECENT_EVENTS)),
        }
    }

    pub fn push_event(&self, event: ArrivalEvent) {
        let mut recent = self.recent.write().unwrap_or_else(|e| e.into_inner());
        if recent.len() == RECENT_EVENTS {
            recent.pop_front();
        }
        recent.push_back(event);
    }
}

/// Copy engine arrivals into `state.recent`.
///
/// `state` keeps the engine, and so the broadcast sender, alive; the task
/// runs for as long as the server does.
pub fn spawn_event_collector(state: Arc<AppState>) -> tokio::task::JoinHandle<()> {
    let mut rx = state.engine.subscribe();
    tokio::spawn(async move {
        loop {
            match rx.recv().await {
                Ok(event) => state.push_event(event),
                Err(RecvError::Lagged(n)) => {
                    tracing::warn!("event collector lagged, {n} arrivals dropped");
                }
                Err(RecvError::Closed) => break,
            }
        }
    })
}

// ---------------------------------------------------------------------------
// Router
// ---------------------------------------------------------------------------

pub fn build_router(state: Arc<AppState>) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/api/result", axum::routing::get(routes::api_result))
        .route("/api/events", axum::routing::get(routes::api_events))
        .route("/api/status", axum::routing::get(routes::api_status))
        .with_state(state)
        .layer(cors)
}

/// Start the web server.
pub async fn serve(engine: Arc<Engine>, host: &str, port: u16) -> std::io::Result<()> {
    let state = Arc::new(AppState::new(engine));
    spawn_event_collector(state.clone());

    let app = build_router(state);
    let addr = format!("{host}:{port}");
    let listener = tokio::net::TcpListener::bind(&addr).await?;

    tracing::info!("skywatch API listening on http://{addr}");
    axum::serve(listener, app).await
}
