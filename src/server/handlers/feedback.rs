use std::sync::Arc;

use axum::extract::{Query, State};
use axum::response::IntoResponse;
use axum::Json;
use serde::Deserialize;

use crate::core::errors::ApiError;
use crate::feedback::FeedbackRequest;
use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct RecentParams {
    #[serde(default = "default_limit")]
    pub limit: usize,
}

fn default_limit() -> usize {
    50
}

pub async fn submit_feedback(
    State(state): State<Arc<AppState>>,
    Json(request): Json<FeedbackRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let outcome = state.feedback.record_feedback(&request).await?;
    Ok(Json(outcome))
}

pub async fn recent_feedback(
    State(state): State<Arc<AppState>>,
    Query(params): Query<RecentParams>,
) -> Result<impl IntoResponse, ApiError> {
    let events = state.feedback.recent(params.limit.min(500)).await?;
    Ok(Json(events))
}

pub async fn list_corrections(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    Json(state.corrections.list().await)
}
