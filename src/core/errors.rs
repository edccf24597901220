use std::time::Duration;

use axum::{http::StatusCode, response::IntoResponse, Json};
use serde_json::json;
use thiserror::Error;

/// Failure kinds reported by the embedding and generation gateways.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum GatewayError {
    #[error("embedding service unavailable: {0}")]
    EmbeddingUnavailable(String),
    #[error("embedding timed out after {0:?}")]
    EmbeddingTimeout(Duration),
    #[error("generation service unavailable: {0}")]
    GenerationUnavailable(String),
    #[error("generation timed out after {0:?}")]
    GenerationTimeout(Duration),
    #[error("generation refused: {0}")]
    GenerationRefused(String),
}

impl GatewayError {
    /// Network hiccups and deadlines may succeed on a later attempt; a refusal will not.
    pub fn is_transient(&self) -> bool {
        !matches!(self, GatewayError::GenerationRefused(_))
    }

    pub fn kind(&self) -> &'static str {
        match self {
            GatewayError::EmbeddingUnavailable(_) | GatewayError::GenerationUnavailable(_) => {
                "model_unavailable"
            }
            GatewayError::EmbeddingTimeout(_) | GatewayError::GenerationTimeout(_) => {
                "model_timeout"
            }
            GatewayError::GenerationRefused(_) => "model_refused",
        }
    }
}

#[derive(Debug, Error)]
pub enum ApiError {
    #[error(transparent)]
    Gateway(#[from] GatewayError),
    #[error("persistence error: {0}")]
    Persistence(String),
    #[error("configuration error: {0}")]
    Configuration(String),
    #[error("no results: {0}")]
    NoResults(String),
    #[error("bad request: {0}")]
    BadRequest(String),
    #[error("not found: {0}")]
    NotFound(String),
    #[error("conflict: {0}")]
    Conflict(String),
}

impl ApiError {
    pub fn persistence<E: std::fmt::Display>(err: E) -> Self {
        ApiError::Persistence(err.to_string())
    }

    pub fn configuration<E: std::fmt::Display>(err: E) -> Self {
        ApiError::Configuration(err.to_string())
    }

    pub fn is_transient(&self) -> bool {
        matches!(self, ApiError::Gateway(err) if err.is_transient())
    }

    pub fn kind(&self) -> &'static str {
        match self {
            ApiError::Gateway(err) => err.kind(),
            ApiError::Persistence(_) => "persistence",
            ApiError::Configuration(_) => "configuration",
            ApiError::NoResults(_) => "no_results",
            ApiError::BadRequest(_) => "bad_request",
            ApiError::NotFound(_) => "not_found",
            ApiError::Conflict(_) => "conflict",
        }
    }
}

impl From<sqlx::Error> for ApiError {
    fn from(err: sqlx::Error) -> Self {
        ApiError::persistence(err)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> axum::response::Response {
        let status = match &self {
            ApiError::Gateway(GatewayError::EmbeddingTimeout(_))
            | ApiError::Gateway(GatewayError::GenerationTimeout(_)) => StatusCode::GATEWAY_TIMEOUT,
            ApiError::Gateway(GatewayError::GenerationRefused(_)) => {
                StatusCode::UNPROCESSABLE_ENTITY
            }
            ApiError::Gateway(_) => StatusCode::BAD_GATEWAY,
            ApiError::Persistence(_) | ApiError::Configuration(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
            ApiError::NoResults(_) | ApiError::NotFound(_) => StatusCode::NOT_FOUND,
            ApiError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ApiError::Conflict(_) => StatusCode::CONFLICT,
        };

        let body = Json(json!({ "error": self.to_string(), "kind": self.kind() }));
        (status, body).into_response()
    }
}
