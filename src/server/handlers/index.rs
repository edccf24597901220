use std::sync::Arc;

use axum::extract::State;
use axum::response::IntoResponse;
use axum::Json;
use serde::Deserialize;

use crate::core::errors::ApiError;
use crate::state::AppState;

#[derive(Debug, Default, Deserialize)]
pub struct IndexRequest {
    /// Drop the index and re-embed everything.
    #[serde(default)]
    pub full: bool,
}

pub async fn run_index(
    State(state): State<Arc<AppState>>,
    payload: Option<Json<IndexRequest>>,
) -> Result<impl IntoResponse, ApiError> {
    let request = payload.map(|Json(request)| request).unwrap_or_default();
    let report = state.run_indexing(request.full).await?;
    Ok(Json(report))
}
