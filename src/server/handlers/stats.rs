use std::sync::Arc;

use axum::extract::State;
use axum::response::IntoResponse;
use axum::Json;
use serde_json::json;

use crate::core::errors::ApiError;
use crate::state::AppState;

pub async fn get_stats(State(state): State<Arc<AppState>>) -> Result<impl IntoResponse, ApiError> {
    let index = state.index.stats().await?;
    let feedback = state.feedback.counts().await?;
    Ok(Json(json!({
        "index": index,
        "corrections": state.corrections.count().await,
        "feedback": feedback,
        "models": {
            "llm": state.settings.ollama.llm_model,
            "embedding": state.settings.ollama.embedding_model,
        },
    })))
}
