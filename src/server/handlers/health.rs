use std::sync::Arc;

use axum::extract::State;
use axum::response::IntoResponse;
use axum::Json;
use serde_json::json;

use crate::state::AppState;

pub async fn health(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let ollama_reachable = match &state.ollama {
        Some(client) => Some(client.health_check().await),
        None => None,
    };
    Json(json!({
        "status": "ok",
        "ollama_reachable": ollama_reachable,
        "corrections": state.corrections.count().await,
    }))
}
