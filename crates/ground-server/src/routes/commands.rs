//! `GET /commands/launch`: forwards to the launch pad and relays its answer.

use axum::extract::State;
use axum::response::Json;
use serde::Serialize;
use tracing::warn;

use crate::server::AppState;

#[derive(Debug, Serialize, PartialEq, Eq)]
pub struct CommandResponse {
    pub status_code: u16,
    pub message: String,
}

pub async fn launch(State(state): State<AppState>) -> Json<CommandResponse> {
    Json(forward(&state.http, &state.config.launch_pad_url, state.config.command_timeout()).await)
}

/// One GET, no retry. Transport failures are reported as a 500 in the body.
pub async fn forward(
    client: &reqwest::Client,
    url: &str,
    timeout: std::time::Duration,
) -> CommandResponse {
    let result = async {
        let resp = client.get(url).timeout(timeout).send().await?;
        let status_code = resp.status().as_u16();
        let message = resp.text().await?;
        Ok::<_, reqwest::Error>(CommandResponse {
            status_code,
            message,
        })
    }
    .await;

    result.unwrap_or_else(|e| {
        warn!(url, error = %e, "launch command failed");
        CommandResponse {
            status_code: 500,
            message: e.to_string(),
        }
    })
}
