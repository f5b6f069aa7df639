//! `/health` endpoint.

use std::time::Instant;

use axum::extract::State;
use axum::response::Json;
use serde::Serialize;

use crate::server::AppState;

/// Health check response body.
#[derive(Debug, Clone, Serialize)]
pub struct HealthResponse {
    /// Always `"ok"` when the server is running.
    pub status: String,
    /// Seconds since the server started.
    pub uptime_secs: u64,
    /// Live subscribers across all sessions.
    pub subscribers: usize,
    /// Sessions with at least one live subscriber.
    pub sessions: usize,
}

/// Build a health response from live counters.
pub fn health_check(start_time: Instant, subscribers: usize, sessions: usize) -> HealthResponse {
    HealthResponse {
        status: "ok".into(),
        uptime_secs: start_time.elapsed().as_secs(),
        subscribers,
        sessions,
    }
}

/// GET /health
pub async fn health(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(health_check(
        state.start_time,
        state.registry.subscriber_count(),
        state.registry.session_count(),
    ))
}
