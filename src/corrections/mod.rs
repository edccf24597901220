//! Correction Memory: human-verified question/answer pairs that take
//! precedence over corpus retrieval.

mod store;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

pub use store::CorrectionMemory;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CorrectionKind {
    /// User-supplied replacement answer after negative feedback.
    Correction,
    /// A shown answer the user approved.
    Validation,
}

impl CorrectionKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            CorrectionKind::Correction => "correction",
            CorrectionKind::Validation => "validation",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "correction" => Some(CorrectionKind::Correction),
            "validation" => Some(CorrectionKind::Validation),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CorrectionRecord {
    pub id: i64,
    pub question: String,
    pub answer: String,
    pub category: Option<String>,
    pub kind: CorrectionKind,
    #[serde(skip_serializing)]
    pub embedding: Vec<f32>,
    pub usage_count: u64,
    /// Id of the newer record that replaced this one for a near-duplicate question.
    pub superseded_by: Option<i64>,
    pub created_at: DateTime<Utc>,
}

impl CorrectionRecord {
    pub fn is_active(&self) -> bool {
        self.superseded_by.is_none()
    }
}

#[derive(Debug, Clone)]
pub struct NewCorrection {
    pub question: String,
    pub answer: String,
    pub category: Option<String>,
    pub kind: CorrectionKind,
}

impl NewCorrection {
    pub fn correction(question: impl Into<String>, answer: impl Into<String>) -> Self {
        Self {
            question: question.into(),
            answer: answer.into(),
            category: None,
            kind: CorrectionKind::Correction,
        }
    }

    pub fn with_category(mut self, category: Option<String>) -> Self {
        self.category = category;
        self
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct CorrectionMatch {
    pub record: CorrectionRecord,
    pub similarity: f32,
}
