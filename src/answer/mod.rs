//! Retrieval-augmented answering.

pub mod confidence;
mod engine;


use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::rag::Citation;

pub use confidence::ConfidenceModel;
pub use engine::{AnswerEngine, NO_GROUNDING_MESSAGE};

#[derive(Debug, Clone, Deserialize)]
pub struct AnswerRequest {
    pub query: String,
    /// Restricts retrieval to one source category (e.g. `CNIL`).
    #[serde(default)]
    pub category: Option<String>,
}

impl AnswerRequest {
    pub fn new(query: impl Into<String>) -> Self {
        Self {
            query: query.into(),
            category: None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AnswerStatus {
    Grounded,
    Corrected,
    InsufficientGrounding,
}

#[derive(Debug, Clone, Serialize)]
pub struct AnswerResult {
    /// Echoed back by the client in feedback for this answer.
    pub answer_id: String,
    pub query: String,
    pub answer: String,
    pub citations: Vec<Citation>,
    pub confidence: f32,
    pub used_correction: bool,
    pub status: AnswerStatus,
    pub correction_id: Option<i64>,
    pub timestamp: DateTime<Utc>,
}
