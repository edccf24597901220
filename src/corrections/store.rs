use std::cmp::Ordering;
use std::path::{Path, PathBuf};

use chrono::Utc;
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqlitePool};
use tokio::sync::{Mutex, RwLock};

use super::{CorrectionKind, CorrectionMatch, CorrectionRecord, NewCorrection};
use crate::core::config::AppPaths;
use crate::core::db::{format_timestamp, open_pool, parse_timestamp};
use crate::core::errors::ApiError;
use crate::vector_math::{cosine_similarity, decode_embedding, dimension_mismatch, encode_embedding};

/// SQLite-backed correction store with an in-memory working set.
///
/// The cache is filled from disk at [`CorrectionMemory::open`] and after an
/// explicit [`CorrectionMemory::refresh`]; writes update it only once their
/// transaction has committed.
pub struct CorrectionMemory {
    pool: SqlitePool,
    db_path: PathBuf,
    records: RwLock<Vec<CorrectionRecord>>,
    supersede_threshold: f32,
    write_lock: Mutex<()>,
}

impl CorrectionMemory {
    pub async fn new(paths: &AppPaths, supersede_threshold: f32) -> Result<Self, ApiError> {
        Self::open(&paths.memory_db_path, supersede_threshold).await
    }

    pub async fn open(db_path: &Path, supersede_threshold: f32) -> Result<Self, ApiError> {
        let pool = open_pool(db_path).await?;
        let memory = Self {
            pool,
            db_path: db_path.to_path_buf(),
            records: RwLock::new(Vec::new()),
            supersede_threshold,
            write_lock: Mutex::new(()),
        };
        memory.init_schema().await?;
        memory.refresh().await?;
        Ok(memory)
    }

    pub fn db_path(&self) -> &Path {
        &self.db_path
    }

    async fn init_schema(&self) -> Result<(), ApiError> {
        sqlx::query(
            "CREATE TABLE IF NOT EXISTS corrections (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                question TEXT NOT NULL,
                answer TEXT NOT NULL,
                category TEXT,
                kind TEXT NOT NULL DEFAULT 'correction',
                embedding BLOB NOT NULL,
                usage_count INTEGER NOT NULL DEFAULT 0,
                superseded_by INTEGER,
                created_at TEXT NOT NULL
            )",
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_corrections_created_at ON corrections(created_at)",
        )
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// Reloads the working set from disk.
    pub async fn refresh(&self) -> Result<usize, ApiError> {
        let rows = sqlx::query(
            "SELECT id, question, answer, category, kind, embedding, usage_count, superseded_by, created_at
             FROM corrections ORDER BY id",
        )
        .fetch_all(&self.pool)
        .await?;

        let loaded = rows
            .iter()
            .map(Self::row_to_record)
            .collect::<Result<Vec<_>, _>>()?;
        let count = loaded.len();
        *self.records.write().await = loaded;

        tracing::info!("Loaded {} correction records", count);
        Ok(count)
    }

    /// Appends a record. Active records for a near-duplicate question are
    /// marked as superseded by it in the same transaction.
    pub async fn record(
        &self,
        correction: NewCorrection,
        embedding: Vec<f32>,
    ) -> Result<CorrectionRecord, ApiError> {
        if correction.question.trim().is_empty() || correction.answer.trim().is_empty() {
            return Err(ApiError::BadRequest(
                "Correction question and answer must not be empty".to_string(),
            ));
        }
        if embedding.is_empty() {
            return Err(ApiError::BadRequest(
                "Correction embedding must not be empty".to_string(),
            ));
        }

        let _guard = self.write_lock.lock().await;

        let superseded: Vec<i64> = {
            let records = self.records.read().await;
            if let Some(existing) = records.first() {
                if existing.embedding.len() != embedding.len() {
                    return Err(dimension_mismatch(existing.embedding.len(), embedding.len()));
                }
            }
            let mut ids = Vec::new();
            for record in records.iter().filter(|r| r.is_active()) {
                if cosine_similarity(&embedding, &record.embedding)? > self.supersede_threshold {
                    ids.push(record.id);
                }
            }
            ids
        };

        let created_at = Utc::now();
        let mut tx = self.pool.begin().await?;
        let result = sqlx::query(
            "INSERT INTO corrections (question, answer, category, kind, embedding, usage_count, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, 0, ?6)",
        )
        .bind(&correction.question)
        .bind(&correction.answer)
        .bind(&correction.category)
        .bind(correction.kind.as_str())
        .bind(encode_embedding(&embedding))
        .bind(format_timestamp(&created_at))
        .execute(&mut *tx)
        .await?;
        let id = result.last_insert_rowid();

        for old_id in &superseded {
            sqlx::query("UPDATE corrections SET superseded_by = ?1 WHERE id = ?2")
                .bind(id)
                .bind(old_id)
                .execute(&mut *tx)
                .await?;
        }
        tx.commit().await?;

        let record = CorrectionRecord {
            id,
            question: correction.question,
            answer: correction.answer,
            category: correction.category,
            kind: correction.kind,
            embedding,
            usage_count: 0,
            superseded_by: None,
            created_at,
        };

        let mut records = self.records.write().await;
        for existing in records.iter_mut() {
            if superseded.contains(&existing.id) {
                existing.superseded_by = Some(id);
            }
        }
        records.push(record.clone());

        tracing::info!(
            id,
            kind = record.kind.as_str(),
            superseded = superseded.len(),
            "Correction recorded"
        );
        Ok(record)
    }

    /// Best record whose similarity strictly exceeds `threshold`. Active
    /// records rank before superseded ones, then by similarity, then newest.
    /// Only near-duplicates (above the supersede threshold) are ever
    /// superseded, so among distinct questions the most similar one wins.
    pub async fn find_best(
        &self,
        query_embedding: &[f32],
        threshold: f32,
    ) -> Result<Option<CorrectionMatch>, ApiError> {
        let records = self.records.read().await;

        let mut best: Option<CorrectionMatch> = None;
        for record in records.iter() {
            let similarity = cosine_similarity(query_embedding, &record.embedding)?;
            if similarity <= threshold {
                continue;
            }
            let candidate = CorrectionMatch {
                record: record.clone(),
                similarity,
            };
            best = match best {
                Some(current) if rank(&current, &candidate) != Ordering::Greater => Some(current),
                _ => Some(candidate),
            };
        }

        Ok(best)
    }

    pub async fn mark_used(&self, id: i64) -> Result<(), ApiError> {
        let _guard = self.write_lock.lock().await;
        let result = sqlx::query("UPDATE corrections SET usage_count = usage_count + 1 WHERE id = ?1")
            .bind(id)
            .execute(&self.pool)
            .await?;
        if result.rows_affected() == 0 {
            return Err(ApiError::NotFound(format!("correction {}", id)));
        }

        let mut records = self.records.write().await;
        if let Some(record) = records.iter_mut().find(|r| r.id == id) {
            record.usage_count += 1;
        }
        Ok(())
    }

    pub async fn count(&self) -> usize {
        self.records.read().await.len()
    }

    /// Newest first.
    pub async fn list(&self) -> Vec<CorrectionRecord> {
        let mut records = self.records.read().await.clone();
        records.sort_by(|a, b| b.created_at.cmp(&a.created_at).then(b.id.cmp(&a.id)));
        records
    }

    fn row_to_record(row: &SqliteRow) -> Result<CorrectionRecord, ApiError> {
        let kind: String = row.try_get("kind")?;
        let embedding: Vec<u8> = row.try_get("embedding")?;
        let usage_count: i64 = row.try_get("usage_count")?;
        let created_at: String = row.try_get("created_at")?;

        Ok(CorrectionRecord {
            id: row.try_get("id")?,
            question: row.try_get("question")?,
            answer: row.try_get("answer")?,
            category: row.try_get("category")?,
            kind: CorrectionKind::parse(&kind).ok_or_else(|| {
                ApiError::Persistence(format!("unknown correction kind '{}'", kind))
            })?,
            embedding: decode_embedding(&embedding)?,
            usage_count: usage_count.max(0) as u64,
            superseded_by: row.try_get("superseded_by")?,
            created_at: parse_timestamp(&created_at)?,
        })
    }
}

/// `Greater` when `candidate` should replace `current`.
fn rank(current: &CorrectionMatch, candidate: &CorrectionMatch) -> Ordering {
    candidate
        .record
        .is_active()
        .cmp(&current.record.is_active())
        .then_with(|| {
            candidate
                .similarity
                .partial_cmp(&current.similarity)
                .unwrap_or(Ordering::Equal)
        })
        .then_with(|| candidate.record.created_at.cmp(&current.record.created_at))
        .then_with(|| candidate.record.id.cmp(&current.record.id))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::temp_db;

    async fn open_memory() -> (CorrectionMemory, PathBuf) {
        let path = temp_db("lea-corrections-test");
        (CorrectionMemory::open(&path, 0.95).await.unwrap(), path)
    }

    #[tokio::test]
    async fn record_and_find_above_threshold() {
        let (memory, _) = open_memory().await;
        memory
            .record(
                NewCorrection::correction("délai de réponse ?", "1 mois"),
                vec![1.0, 0.0, 0.0],
            )
            .await
            .unwrap();

        let hit = memory.find_best(&[0.99, 0.05, 0.0], 0.85).await.unwrap().unwrap();
        assert_eq!(hit.record.answer, "1 mois");
        assert!(hit.similarity > 0.85);

        assert!(memory.find_best(&[0.5, 0.5, 0.5], 0.85).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn threshold_is_strict() {
        let (memory, _) = open_memory().await;
        memory
            .record(NewCorrection::correction("q", "a"), vec![1.0, 0.0])
            .await
            .unwrap();
        assert!(memory.find_best(&[1.0, 0.0], 1.0).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn newer_near_duplicate_supersedes_and_wins() {
        let (memory, path) = open_memory().await;
        let old = memory
            .record(NewCorrection::correction("q", "ancienne"), vec![1.0, 0.0])
            .await
            .unwrap();
        let new = memory
            .record(NewCorrection::correction("q bis", "nouvelle"), vec![1.0, 0.0])
            .await
            .unwrap();

        let hit = memory.find_best(&[1.0, 0.0], 0.85).await.unwrap().unwrap();
        assert_eq!(hit.record.id, new.id);

        let listed = memory.list().await;
        assert_eq!(listed.len(), 2);
        let stored_old = listed.iter().find(|r| r.id == old.id).unwrap();
        assert_eq!(stored_old.superseded_by, Some(new.id));

        // Survives a restart.
        let reopened = CorrectionMemory::open(&path, 0.95).await.unwrap();
        assert_eq!(reopened.count().await, 2);
        let hit = reopened.find_best(&[1.0, 0.0], 0.85).await.unwrap().unwrap();
        assert_eq!(hit.record.answer, "nouvelle");
    }

    #[tokio::test]
    async fn loosely_related_correction_does_not_hide_exact_match() {
        let (memory, _) = open_memory().await;
        let exact = memory
            .record(NewCorrection::correction("q1", "Un mois"), vec![1.0, 0.0])
            .await
            .unwrap();
        // Similarity 0.9 to the first question: a match, not a near-duplicate.
        memory
            .record(
                NewCorrection::correction("q2", "Deux mois de plus"),
                vec![0.9, 0.436],
            )
            .await
            .unwrap();

        let listed = memory.list().await;
        assert!(listed.iter().find(|r| r.id == exact.id).unwrap().is_active());

        let hit = memory.find_best(&[1.0, 0.0], 0.85).await.unwrap().unwrap();
        assert_eq!(hit.record.answer, "Un mois");
        assert!(hit.similarity > 0.99);
    }

    #[tokio::test]
    async fn near_duplicate_supersedes_even_when_less_similar_to_query() {
        let (memory, _) = open_memory().await;
        memory
            .record(NewCorrection::correction("q", "ancienne"), vec![1.0, 0.0])
            .await
            .unwrap();
        // Similarity 0.98 to the first question.
        memory
            .record(NewCorrection::correction("q bis", "nouvelle"), vec![0.98, 0.199])
            .await
            .unwrap();

        let hit = memory.find_best(&[1.0, 0.0], 0.85).await.unwrap().unwrap();
        assert_eq!(hit.record.answer, "nouvelle");
    }

    #[tokio::test]
    async fn distinct_questions_do_not_supersede() {
        let (memory, _) = open_memory().await;
        let a = memory
            .record(NewCorrection::correction("a", "A"), vec![1.0, 0.0])
            .await
            .unwrap();
        memory
            .record(NewCorrection::correction("b", "B"), vec![0.0, 1.0])
            .await
            .unwrap();
        let listed = memory.list().await;
        assert!(listed.iter().find(|r| r.id == a.id).unwrap().is_active());
    }

    #[tokio::test]
    async fn uncommitted_rows_are_invisible_after_refresh() {
        let (memory, _) = open_memory().await;
        {
            let mut tx = memory.pool.begin().await.unwrap();
            sqlx::query(
                "INSERT INTO corrections (question, answer, kind, embedding, created_at)
                 VALUES ('q', 'a', 'correction', ?1, ?2)",
            )
            .bind(encode_embedding(&[1.0, 0.0]))
            .bind(format_timestamp(&Utc::now()))
            .execute(&mut *tx)
            .await
            .unwrap();
        }
        memory.refresh().await.unwrap();
        assert!(memory.find_best(&[1.0, 0.0], 0.5).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn mark_used_increments_counter() {
        let (memory, path) = open_memory().await;
        let record = memory
            .record(NewCorrection::correction("q", "a"), vec![1.0])
            .await
            .unwrap();
        memory.mark_used(record.id).await.unwrap();
        memory.mark_used(record.id).await.unwrap();
        assert_eq!(memory.list().await[0].usage_count, 2);
        assert!(matches!(
            memory.mark_used(9_999).await,
            Err(ApiError::NotFound(_))
        ));

        let reopened = CorrectionMemory::open(&path, 0.95).await.unwrap();
        assert_eq!(reopened.list().await[0].usage_count, 2);
    }

    #[tokio::test]
    async fn dimension_mismatch_is_configuration_error() {
        let (memory, _) = open_memory().await;
        memory
            .record(NewCorrection::correction("q", "a"), vec![1.0, 0.0])
            .await
            .unwrap();
        assert!(matches!(
            memory.record(NewCorrection::correction("r", "b"), vec![1.0]).await,
            Err(ApiError::Configuration(_))
        ));
        assert!(matches!(
            memory.find_best(&[1.0, 0.0, 0.0], 0.5).await,
            Err(ApiError::Configuration(_))
        ));
    }

    #[tokio::test]
    async fn empty_answers_are_rejected() {
        let (memory, _) = open_memory().await;
        assert!(matches!(
            memory.record(NewCorrection::correction("q", "  "), vec![1.0]).await,
            Err(ApiError::BadRequest(_))
        ));
    }
}
