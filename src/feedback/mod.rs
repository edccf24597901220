//! Feedback Recorder: append-only log of thumbs-up/down events that feeds
//! corrections back into [`CorrectionMemory`].

use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{Row, SqlitePool};

use crate::core::config::settings::CorrectionSettings;
use crate::core::db::{format_timestamp, open_pool, parse_timestamp};
use crate::core::errors::ApiError;
use crate::corrections::{CorrectionKind, CorrectionMemory, NewCorrection};
use crate::gateway::EmbeddingGateway;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Polarity {
    Positive,
    Negative,
}

impl Polarity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Polarity::Positive => "positive",
            Polarity::Negative => "negative",
        }
    }

    fn parse(value: &str) -> Option<Self> {
        match value {
            "positive" => Some(Polarity::Positive),
            "negative" => Some(Polarity::Negative),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct FeedbackRequest {
    pub query: String,
    pub shown_answer: String,
    pub polarity: Polarity,
    #[serde(default)]
    pub answer_id: Option<String>,
    #[serde(default)]
    pub correction: Option<String>,
    /// Correction that produced the shown answer, if any.
    #[serde(default)]
    pub correction_id: Option<i64>,
    #[serde(default)]
    pub category: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct FeedbackEvent {
    pub id: i64,
    pub answer_id: Option<String>,
    pub query: String,
    pub shown_answer: String,
    pub polarity: Polarity,
    pub correction: Option<String>,
    pub correction_id: Option<i64>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize)]
pub struct FeedbackOutcome {
    pub event_id: i64,
    /// Id of the correction record written by this event.
    pub recorded_correction: Option<i64>,
    pub marked_used: Option<i64>,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct FeedbackCounts {
    pub positive: u64,
    pub negative: u64,
    pub with_correction: u64,
}

pub struct FeedbackRecorder {
    pool: SqlitePool,
    db_path: PathBuf,
    corrections: Arc<CorrectionMemory>,
    embedder: Arc<dyn EmbeddingGateway>,
    promote_positive: bool,
}

impl FeedbackRecorder {
    pub async fn open(
        db_path: &Path,
        corrections: Arc<CorrectionMemory>,
        embedder: Arc<dyn EmbeddingGateway>,
        settings: &CorrectionSettings,
    ) -> Result<Self, ApiError> {
        let pool = open_pool(db_path).await?;
        sqlx::query(
            "CREATE TABLE IF NOT EXISTS feedback_events (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                answer_id TEXT,
                query TEXT NOT NULL,
                shown_answer TEXT NOT NULL,
                polarity TEXT NOT NULL,
                correction TEXT,
                correction_id INTEGER,
                created_at TEXT NOT NULL
            )",
        )
        .execute(&pool)
        .await?;

        Ok(Self {
            pool,
            db_path: db_path.to_path_buf(),
            corrections,
            embedder,
            promote_positive: settings.promote_positive_feedback,
        })
    }

    pub fn db_path(&self) -> &Path {
        &self.db_path
    }

    /// Logs the event, then applies its side effects. Returns only once any
    /// resulting correction is committed.
    pub async fn record_feedback(
        &self,
        request: &FeedbackRequest,
    ) -> Result<FeedbackOutcome, ApiError> {
        let query = request.query.trim();
        if query.is_empty() {
            return Err(ApiError::BadRequest("Feedback query must not be empty".to_string()));
        }

        let correction = request
            .correction
            .as_deref()
            .map(str::trim)
            .filter(|text| !text.is_empty());

        let event_id = self.log_event(request, correction).await?;
        let mut outcome = FeedbackOutcome {
            event_id,
            recorded_correction: None,
            marked_used: None,
        };

        match request.polarity {
            Polarity::Positive => {
                if let Some(id) = request.correction_id {
                    self.corrections.mark_used(id).await?;
                    outcome.marked_used = Some(id);
                } else if self.promote_positive && !request.shown_answer.trim().is_empty() {
                    let embedding = self.embedder.embed(query).await?;
                    let record = self
                        .corrections
                        .record(
                            NewCorrection {
                                question: query.to_string(),
                                answer: request.shown_answer.clone(),
                                category: request.category.clone(),
                                kind: CorrectionKind::Validation,
                            },
                            embedding,
                        )
                        .await?;
                    outcome.recorded_correction = Some(record.id);
                }
            }
            Polarity::Negative => {
                if let Some(text) = correction {
                    let embedding = self.embedder.embed(query).await?;
                    let record = self
                        .corrections
                        .record(
                            NewCorrection::correction(query, text)
                                .with_category(request.category.clone()),
                            embedding,
                        )
                        .await?;
                    outcome.recorded_correction = Some(record.id);
                }
            }
        }

        tracing::info!(
            event_id,
            polarity = request.polarity.as_str(),
            recorded_correction = ?outcome.recorded_correction,
            "Feedback recorded"
        );
        Ok(outcome)
    }

    async fn log_event(
        &self,
        request: &FeedbackRequest,
        correction: Option<&str>,
    ) -> Result<i64, ApiError> {
        let result = sqlx::query(
            "INSERT INTO feedback_events (answer_id, query, shown_answer, polarity, correction, correction_id, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
        )
        .bind(&request.answer_id)
        .bind(&request.query)
        .bind(&request.shown_answer)
        .bind(request.polarity.as_str())
        .bind(correction)
        .bind(request.correction_id)
        .bind(format_timestamp(&Utc::now()))
        .execute(&self.pool)
        .await?;
        Ok(result.last_insert_rowid())
    }

    /// Newest first.
    pub async fn recent(&self, limit: usize) -> Result<Vec<FeedbackEvent>, ApiError> {
        let rows = sqlx::query(
            "SELECT id, answer_id, query, shown_answer, polarity, correction, correction_id, created_at
             FROM feedback_events ORDER BY id DESC LIMIT ?1",
        )
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await?;

        rows.iter()
            .map(|row| -> Result<FeedbackEvent, ApiError> {
                let polarity: String = row.try_get("polarity")?;
                let created_at: String = row.try_get("created_at")?;
                Ok(FeedbackEvent {
                    id: row.try_get("id")?,
                    answer_id: row.try_get("answer_id")?,
                    query: row.try_get("query")?,
                    shown_answer: row.try_get("shown_answer")?,
                    polarity: Polarity::parse(&polarity).ok_or_else(|| {
                        ApiError::Persistence(format!("unknown polarity '{}'", polarity))
                    })?,
                    correction: row.try_get("correction")?,
                    correction_id: row.try_get("correction_id")?,
                    created_at: parse_timestamp(&created_at)?,
                })
            })
            .collect()
    }

    pub async fn counts(&self) -> Result<FeedbackCounts, ApiError> {
        let row = sqlx::query(
            "SELECT
                COALESCE(SUM(CASE WHEN polarity = 'positive' THEN 1 ELSE 0 END), 0) AS positive,
                COALESCE(SUM(CASE WHEN polarity = 'negative' THEN 1 ELSE 0 END), 0) AS negative,
                COALESCE(SUM(CASE WHEN correction IS NOT NULL THEN 1 ELSE 0 END), 0) AS with_correction
             FROM feedback_events",
        )
        .fetch_one(&self.pool)
        .await?;

        let positive: i64 = row.try_get("positive")?;
        let negative: i64 = row.try_get("negative")?;
        let with_correction: i64 = row.try_get("with_correction")?;
        Ok(FeedbackCounts {
            positive: positive.max(0) as u64,
            negative: negative.max(0) as u64,
            with_correction: with_correction.max(0) as u64,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::errors::GatewayError;
    use crate::test_support::{temp_db, FailingEmbedder, KeywordEmbedder, SpyEmbedder};

    async fn recorder(
        embedder: Arc<dyn EmbeddingGateway>,
        promote: bool,
    ) -> (FeedbackRecorder, Arc<CorrectionMemory>) {
        let path = temp_db("lea-feedback-test");
        let corrections = Arc::new(CorrectionMemory::open(&path, 0.95).await.unwrap());
        let settings = CorrectionSettings {
            similarity_threshold: 0.85,
            supersede_threshold: 0.95,
            promote_positive_feedback: promote,
        };
        let recorder = FeedbackRecorder::open(&path, corrections.clone(), embedder, &settings)
            .await
            .unwrap();
        (recorder, corrections)
    }

    fn request(polarity: Polarity, correction: Option<&str>) -> FeedbackRequest {
        FeedbackRequest {
            query: "Quel est le délai de réponse ?".to_string(),
            shown_answer: "Trois mois.".to_string(),
            polarity,
            answer_id: Some("a-1".to_string()),
            correction: correction.map(str::to_string),
            correction_id: None,
            category: None,
        }
    }

    #[tokio::test]
    async fn negative_with_correction_records_it_durably() {
        let embedder = Arc::new(KeywordEmbedder::new(256));
        let (recorder, corrections) = recorder(embedder.clone(), false).await;

        let outcome = recorder
            .record_feedback(&request(Polarity::Negative, Some("Un mois.")))
            .await
            .unwrap();
        assert!(outcome.recorded_correction.is_some());
        assert_eq!(embedder.calls(), 1);

        let hit = corrections
            .find_best(&embedder.vector_for("Quel est le délai de réponse ?"), 0.85)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(hit.record.answer, "Un mois.");
    }

    #[tokio::test]
    async fn feedback_without_correction_is_logged_only() {
        let embedder = Arc::new(KeywordEmbedder::new(64));
        let (recorder, corrections) = recorder(embedder.clone(), false).await;

        recorder
            .record_feedback(&request(Polarity::Negative, Some("   ")))
            .await
            .unwrap();
        recorder
            .record_feedback(&request(Polarity::Positive, None))
            .await
            .unwrap();

        assert_eq!(embedder.calls(), 0);
        assert_eq!(corrections.count().await, 0);
        let counts = recorder.counts().await.unwrap();
        assert_eq!((counts.positive, counts.negative, counts.with_correction), (1, 1, 0));

        let recent = recorder.recent(10).await.unwrap();
        assert_eq!(recent.len(), 2);
        assert_eq!(recent[0].polarity, Polarity::Positive);
        assert_eq!(recent[0].answer_id.as_deref(), Some("a-1"));
    }

    #[tokio::test]
    async fn positive_feedback_on_correction_bumps_usage() {
        let embedder = Arc::new(KeywordEmbedder::new(64));
        let (recorder, corrections) = recorder(embedder.clone(), false).await;
        let record = corrections
            .record(NewCorrection::correction("q", "a"), vec![1.0; 64])
            .await
            .unwrap();

        let mut positive = request(Polarity::Positive, None);
        positive.correction_id = Some(record.id);
        let outcome = recorder.record_feedback(&positive).await.unwrap();
        assert_eq!(outcome.marked_used, Some(record.id));
        assert_eq!(corrections.list().await[0].usage_count, 1);
    }

    #[tokio::test]
    async fn promoted_positive_feedback_stores_validation() {
        let embedder = Arc::new(KeywordEmbedder::new(64));
        let (recorder, corrections) = recorder(embedder, true).await;

        recorder
            .record_feedback(&request(Polarity::Positive, None))
            .await
            .unwrap();
        let records = corrections.list().await;
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].kind, CorrectionKind::Validation);
        assert_eq!(records[0].answer, "Trois mois.");
    }

    #[tokio::test]
    async fn event_is_logged_even_when_embedding_fails() {
        let embedder = Arc::new(FailingEmbedder::new(
            Arc::new(KeywordEmbedder::new(64)),
            "délai",
            GatewayError::EmbeddingUnavailable("down".into()),
        ));
        let (recorder, corrections) = recorder(embedder, false).await;

        let result = recorder
            .record_feedback(&request(Polarity::Negative, Some("Un mois.")))
            .await;
        assert!(matches!(result, Err(ApiError::Gateway(_))));
        assert_eq!(corrections.count().await, 0);
        assert_eq!(recorder.counts().await.unwrap().with_correction, 1);
    }

    #[tokio::test]
    async fn correction_question_is_trimmed_like_answer_queries() {
        let embedder = Arc::new(SpyEmbedder::new(16));
        let (recorder, corrections) = recorder(embedder.clone(), false).await;

        let mut padded = request(Polarity::Negative, Some("Un mois."));
        padded.query = "  Quel est le délai de réponse ?\n".to_string();
        recorder.record_feedback(&padded).await.unwrap();

        assert_eq!(embedder.seen(), vec!["Quel est le délai de réponse ?".to_string()]);
        assert_eq!(
            corrections.list().await[0].question,
            "Quel est le délai de réponse ?"
        );
    }
}
