//! Ingestion, history and session listing.

use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::response::Json;
use ground_core::{Sample, SessionId};
use serde::Deserialize;
use serde_json::Value;
use tokio::task;

use crate::error::ApiError;
use crate::server::AppState;

#[derive(Debug, Default, Deserialize)]
pub struct HistoryParams {
    pub identifier: Option<String>,
}

/// POST /events/
pub async fn ingest(
    State(state): State<AppState>,
    Json(body): Json<Value>,
) -> Result<StatusCode, ApiError> {
    let ingestor = state.ingestor.clone();
    task::spawn_blocking(move || ingestor.ingest(&body))
        .await
        .map_err(|e| ApiError::Internal(format!("ingest task failed: {e}")))??;
    Ok(StatusCode::NO_CONTENT)
}

/// GET /events/?identifier=
pub async fn history(
    State(state): State<AppState>,
    Query(params): Query<HistoryParams>,
) -> Result<Json<Vec<Sample>>, ApiError> {
    let session = params
        .identifier
        .filter(|s| !s.is_empty())
        .map(SessionId::from_raw);
    let limit = state.config.history_limit;
    let store = state.store.clone();

    let samples = task::spawn_blocking(move || store.history(session.as_ref(), limit))
        .await
        .map_err(|e| ApiError::Internal(format!("history task failed: {e}")))??;
    Ok(Json(samples))
}

/// GET /events/sessions
pub async fn sessions(State(state): State<AppState>) -> Result<Json<Vec<SessionId>>, ApiError> {
    let store = state.store.clone();
    let sessions = task::spawn_blocking(move || store.distinct_sessions())
        .await
        .map_err(|e| ApiError::Internal(format!("sessions task failed: {e}")))??;
    Ok(Json(sessions))
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use axum::body::Body;
    use axum::http::{header, Request, StatusCode};
    use axum::Router;
    use ground_store::{Database, SqliteSampleStore};
    use serde_json::json;
    use tokio_util::sync::CancellationToken;
    use tower::ServiceExt;

    use crate::config::ServerConfig;
    use crate::server::{build_router, AppState};

    fn app_with(config: ServerConfig) -> (Router, AppState) {
        let store = Arc::new(SqliteSampleStore::new(Database::in_memory().unwrap()));
        let state = AppState::new(config, store, CancellationToken::new());
        (build_router(state.clone()), state)
    }

    fn app() -> (Router, AppState) {
        app_with(ServerConfig::default())
    }

    async fn post(app: &Router, body: serde_json::Value) -> (StatusCode, serde_json::Value) {
        let req = Request::builder()
            .method("POST")
            .uri("/events/")
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(body.to_string()))
            .unwrap();
        let resp = app.clone().oneshot(req).await.unwrap();
        let status = resp.status();
        let bytes = axum::body::to_bytes(resp.into_body(), 100_000).await.unwrap();
        let value = if bytes.is_empty() {
            serde_json::Value::Null
        } else {
            serde_json::from_slice(&bytes).unwrap()
        };
        (status, value)
    }

    async fn get(app: &Router, uri: &str) -> serde_json::Value {
        let req = Request::builder().uri(uri).body(Body::empty()).unwrap();
        let resp = app.clone().oneshot(req).await.unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        let bytes = axum::body::to_bytes(resp.into_body(), 100_000).await.unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    fn sample(identifier: &str, t: u32) -> serde_json::Value {
        json!({
            "timestamp": format!("T+{t}"),
            "identifier": identifier,
            "velocity": 1.5,
            "air_pressure": 1013.0,
        })
    }

    #[tokio::test]
    async fn ingest_returns_no_content() {
        let (app, _) = app();
        let (status, body) = post(&app, sample("sim-1", 0)).await;
        assert_eq!(status, StatusCode::NO_CONTENT);
        assert!(body.is_null());
    }

    #[tokio::test]
    async fn missing_velocity_is_unprocessable() {
        let (app, state) = app();
        let (status, body) = post(
            &app,
            json!({"timestamp": "T+0", "identifier": "sim-1", "air_pressure": 1013.0}),
        )
        .await;
        assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
        assert!(body["detail"].as_str().unwrap().contains("velocity"));
        assert!(state.store.history(None, 10).unwrap().is_empty());
    }

    #[tokio::test]
    async fn string_velocity_is_unprocessable() {
        let (app, _) = app();
        let mut body = sample("sim-1", 0);
        body["velocity"] = json!("fast");
        let (status, _) = post(&app, body).await;
        assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
    }

    #[tokio::test]
    async fn history_is_newest_first_and_filtered() {
        let (app, _) = app();
        for t in 0..3 {
            post(&app, sample("sim-1", t)).await;
        }
        post(&app, sample("sim-2", 0)).await;

        let all = get(&app, "/events/").await;
        assert_eq!(all.as_array().unwrap().len(), 4);
        assert_eq!(all[0]["identifier"], "sim-2");

        let sim1 = get(&app, "/events/?identifier=sim-1").await;
        let stamps: Vec<&str> = sim1
            .as_array()
            .unwrap()
            .iter()
            .map(|s| s["timestamp"].as_str().unwrap())
            .collect();
        assert_eq!(stamps, vec!["T+2", "T+1", "T+0"]);
        for key in ["id", "timestamp", "identifier", "velocity", "air_pressure", "save_datetime"] {
            assert!(sim1[0].get(key).is_some(), "missing {key}");
        }
    }

    #[tokio::test]
    async fn history_is_capped() {
        let (app, _) = app_with(ServerConfig {
            history_limit: 2,
            ..ServerConfig::default()
        });
        for t in 0..5 {
            post(&app, sample("sim-1", t)).await;
        }
        let items = get(&app, "/events/?identifier=sim-1").await;
        assert_eq!(items.as_array().unwrap().len(), 2);
        assert_eq!(items[0]["timestamp"], "T+4");
    }

    #[tokio::test]
    async fn sessions_most_recent_first() {
        let (app, _) = app();
        post(&app, sample("sim-a", 0)).await;
        post(&app, sample("sim-b", 0)).await;
        post(&app, sample("sim-a", 1)).await;

        let sessions = get(&app, "/events/sessions").await;
        assert_eq!(sessions, json!(["sim-a", "sim-b"]));
    }
}
