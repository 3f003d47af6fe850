//! REST handlers of the control surface.

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;
use serde_json::json;
use tracing::warn;

use super::state::AppState;
use crate::config::RunOptions;
use crate::errors::AgentError;

#[derive(Debug, Serialize)]
pub struct ModelEntry {
    pub id: String,
    pub name: String,
}

fn fallback_models() -> Vec<ModelEntry> {
    [
        ("gemini-2.0-flash", "Gemini 2.0 Flash"),
        ("gemini-2.5-flash", "Gemini 2.5 Flash"),
        ("gemini-2.5-pro", "Gemini 2.5 Pro"),
    ]
    .into_iter()
    .map(|(id, name)| ModelEntry {
        id: id.to_string(),
        name: name.to_string(),
    })
    .collect()
}

pub async fn start(
    State(state): State<AppState>,
    Json(options): Json<RunOptions>,
) -> Response {
    match state.controller.begin(options) {
        Ok(summary) => (StatusCode::OK, Json(summary)).into_response(),
        Err(AgentError::RunActive) => (
            StatusCode::CONFLICT,
            Json(json!({ "error": "a run is already active" })),
        )
            .into_response(),
        Err(err) => (
            StatusCode::BAD_REQUEST,
            Json(json!({ "error": err.to_string() })),
        )
            .into_response(),
    }
}

pub async fn stop(State(state): State<AppState>) -> Response {
    state.controller.stop();
    (StatusCode::OK, Json(json!({ "status": "stopped" }))).into_response()
}

/// Proxy the upstream model catalogue, falling back to a static list when it
/// is unreachable.
pub async fn models(State(state): State<AppState>) -> Response {
    if let Some(key) = &state.config.api_key {
        let url = format!(
            "{}/models?key={}",
            state.config.api_base.trim_end_matches('/'),
            key
        );
        match fetch_models(&url).await {
            Ok(models) if !models.is_empty() => {
                return Json(json!({ "models": models, "source": "upstream" })).into_response();
            }
            Ok(_) => warn!("upstream model catalogue was empty"),
            Err(err) => warn!(error = %err, "upstream model catalogue unavailable"),
        }
    }
    Json(json!({ "models": fallback_models(), "source": "fallback" })).into_response()
}

async fn fetch_models(url: &str) -> Result<Vec<ModelEntry>, reqwest::Error> {
    let payload: serde_json::Value = reqwest::Client::new()
        .get(url)
        .timeout(std::time::Duration::from_secs(5))
        .send()
        .await?
        .json()
        .await?;
    let models = payload
        .get("models")
        .and_then(|m| m.as_array())
        .map(|entries| {
            entries
                .iter()
                .filter_map(|entry| {
                    let id = entry
                        .get("name")?
                        .as_str()?
                        .trim_start_matches("models/")
                        .to_string();
                    let name = entry
                        .get("displayName")
                        .and_then(|n| n.as_str())
                        .unwrap_or(&id)
                        .to_string();
                    Some(ModelEntry { id, name })
                })
                .collect()
        })
        .unwrap_or_default();
    Ok(models)
}
