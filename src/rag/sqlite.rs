//! SQLite-backed Vector Index.
//!
//! Vectors live in the same row as their metadata and every write goes
//! through one statement or one transaction, so a reader never sees half
//! an entry. Similarity search is brute-force cosine over the candidate rows.

use std::cmp::Ordering;
use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use chrono::Utc;
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqliteConnection, SqlitePool};
use tokio::sync::Mutex;

use super::document::{Fragment, IndexEntry, SearchHit};
use super::store::{DocumentState, DocumentUpdate, IndexStats, VectorIndex};
use crate::core::config::AppPaths;
use crate::core::db::{format_timestamp, open_pool, parse_timestamp};
use crate::core::errors::ApiError;
use crate::vector_math::{cosine_similarity, decode_embedding, dimension_mismatch, encode_embedding};

const DIMENSION_KEY: &str = "embedding_dimension";
const MANIFEST_KEY: &str = "manifest_version";

const UPSERT_SQL: &str = "INSERT INTO fragments (
        fragment_id, document_id, category, title, url, text,
        start_offset, end_offset, chunk_index, content_hash, embedding, indexed_at
    ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)
    ON CONFLICT(fragment_id) DO UPDATE SET
        document_id = excluded.document_id,
        category = excluded.category,
        title = excluded.title,
        url = excluded.url,
        text = excluded.text,
        start_offset = excluded.start_offset,
        end_offset = excluded.end_offset,
        chunk_index = excluded.chunk_index,
        content_hash = excluded.content_hash,
        embedding = excluded.embedding,
        indexed_at = excluded.indexed_at";

const SELECT_COLUMNS: &str = "SELECT fragment_id, document_id, category, title, url, text,
        start_offset, end_offset, chunk_index, content_hash, embedding, indexed_at
    FROM fragments";

pub struct SqliteVectorIndex {
    pool: SqlitePool,
    db_path: PathBuf,
    /// Serializes writers so read-then-write transactions never race.
    write_lock: Mutex<()>,
}

impl SqliteVectorIndex {
    pub async fn new(paths: &AppPaths) -> Result<Self, ApiError> {
        Self::with_path(&paths.index_db_path).await
    }

    pub async fn with_path(db_path: &Path) -> Result<Self, ApiError> {
        let pool = open_pool(db_path).await?;
        let index = Self {
            pool,
            db_path: db_path.to_path_buf(),
            write_lock: Mutex::new(()),
        };
        index.init_schema().await?;
        Ok(index)
    }

    pub fn db_path(&self) -> &Path {
        &self.db_path
    }

    async fn init_schema(&self) -> Result<(), ApiError> {
        sqlx::query(
            "CREATE TABLE IF NOT EXISTS fragments (
                fragment_id TEXT PRIMARY KEY,
                document_id TEXT NOT NULL,
                category TEXT NOT NULL,
                title TEXT NOT NULL DEFAULT '',
                url TEXT NOT NULL DEFAULT '',
                text TEXT NOT NULL,
                start_offset INTEGER NOT NULL,
                end_offset INTEGER NOT NULL,
                chunk_index INTEGER NOT NULL,
                content_hash TEXT NOT NULL,
                embedding BLOB NOT NULL,
                indexed_at TEXT NOT NULL
            )",
        )
        .execute(&self.pool)
        .await?;

        sqlx::query("CREATE INDEX IF NOT EXISTS idx_fragments_document ON fragments(document_id)")
            .execute(&self.pool)
            .await?;
        sqlx::query("CREATE INDEX IF NOT EXISTS idx_fragments_category ON fragments(category)")
            .execute(&self.pool)
            .await?;

        sqlx::query(
            "CREATE TABLE IF NOT EXISTS indexed_documents (
                document_id TEXT PRIMARY KEY,
                content_hash TEXT NOT NULL,
                fragment_count INTEGER NOT NULL,
                indexed_at TEXT NOT NULL
            )",
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            "CREATE TABLE IF NOT EXISTS index_meta (
                key TEXT PRIMARY KEY,
                value TEXT NOT NULL,
                updated_at TEXT NOT NULL DEFAULT (STRFTIME('%Y-%m-%dT%H:%M:%fZ', 'now'))
            )",
        )
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn stored_dimension(conn: &mut SqliteConnection) -> Result<Option<usize>, ApiError> {
        let value: Option<String> =
            sqlx::query_scalar("SELECT value FROM index_meta WHERE key = ?1")
                .bind(DIMENSION_KEY)
                .fetch_optional(&mut *conn)
                .await?;
        Ok(value.and_then(|v| v.parse::<usize>().ok()))
    }

    /// The first vector written fixes the dimension; later ones must match it.
    async fn ensure_dimension(conn: &mut SqliteConnection, len: usize) -> Result<(), ApiError> {
        match Self::stored_dimension(conn).await? {
            Some(dim) if dim != len => Err(dimension_mismatch(dim, len)),
            Some(_) => Ok(()),
            None => {
                Self::set_meta(conn, DIMENSION_KEY, &len.to_string()).await?;
                Ok(())
            }
        }
    }

    async fn set_meta(conn: &mut SqliteConnection, key: &str, value: &str) -> Result<(), ApiError> {
        sqlx::query(
            "INSERT INTO index_meta (key, value, updated_at)
             VALUES (?1, ?2, STRFTIME('%Y-%m-%dT%H:%M:%fZ', 'now'))
             ON CONFLICT(key) DO UPDATE SET value = excluded.value, updated_at = excluded.updated_at",
        )
        .bind(key)
        .bind(value)
        .execute(&mut *conn)
        .await?;
        Ok(())
    }

    async fn write_entry(conn: &mut SqliteConnection, entry: &IndexEntry) -> Result<(), ApiError> {
        if entry.embedding.is_empty() {
            return Err(ApiError::BadRequest(format!(
                "Fragment {} has an empty embedding",
                entry.fragment.id
            )));
        }
        Self::ensure_dimension(conn, entry.embedding.len()).await?;

        let fragment = &entry.fragment;
        sqlx::query(UPSERT_SQL)
            .bind(&fragment.id)
            .bind(&fragment.document_id)
            .bind(&fragment.category)
            .bind(&fragment.title)
            .bind(&fragment.url)
            .bind(&fragment.text)
            .bind(fragment.start_offset as i64)
            .bind(fragment.end_offset as i64)
            .bind(fragment.chunk_index as i64)
            .bind(&fragment.content_hash)
            .bind(encode_embedding(&entry.embedding))
            .bind(format_timestamp(&entry.indexed_at))
            .execute(&mut *conn)
            .await?;
        Ok(())
    }

    async fn delete_ids(conn: &mut SqliteConnection, ids: &[String]) -> Result<usize, ApiError> {
        let mut deleted = 0;
        for id in ids {
            let result = sqlx::query("DELETE FROM fragments WHERE fragment_id = ?1")
                .bind(id)
                .execute(&mut *conn)
                .await?;
            deleted += result.rows_affected() as usize;
        }
        Ok(deleted)
    }

    fn row_to_entry(row: &SqliteRow) -> Result<IndexEntry, ApiError> {
        let embedding: Vec<u8> = row.try_get("embedding")?;
        let indexed_at: String = row.try_get("indexed_at")?;
        let start_offset: i64 = row.try_get("start_offset")?;
        let end_offset: i64 = row.try_get("end_offset")?;
        let chunk_index: i64 = row.try_get("chunk_index")?;

        Ok(IndexEntry {
            fragment: Fragment {
                id: row.try_get("fragment_id")?,
                document_id: row.try_get("document_id")?,
                category: row.try_get("category")?,
                title: row.try_get("title")?,
                url: row.try_get("url")?,
                text: row.try_get("text")?,
                start_offset: start_offset.max(0) as usize,
                end_offset: end_offset.max(0) as usize,
                chunk_index: chunk_index.max(0) as usize,
                content_hash: row.try_get("content_hash")?,
            },
            embedding: decode_embedding(&embedding)?,
            indexed_at: parse_timestamp(&indexed_at)?,
        })
    }
}

fn rank(hits: &mut [SearchHit]) {
    hits.sort_by(|a, b| {
        b.score
            .partial_cmp(&a.score)
            .unwrap_or(Ordering::Equal)
            .then_with(|| b.entry.indexed_at.cmp(&a.entry.indexed_at))
            .then_with(|| a.entry.fragment.id.cmp(&b.entry.fragment.id))
    });
}

#[async_trait]
impl VectorIndex for SqliteVectorIndex {
    async fn upsert(&self, entry: IndexEntry) -> Result<(), ApiError> {
        self.upsert_batch(vec![entry]).await
    }

    async fn upsert_batch(&self, entries: Vec<IndexEntry>) -> Result<(), ApiError> {
        if entries.is_empty() {
            return Ok(());
        }

        let _guard = self.write_lock.lock().await;
        let mut tx = self.pool.begin().await?;
        for entry in &entries {
            Self::write_entry(&mut tx, entry).await?;
        }
        tx.commit().await?;
        Ok(())
    }

    async fn query(
        &self,
        vector: &[f32],
        k: usize,
        category: Option<&str>,
    ) -> Result<Vec<SearchHit>, ApiError> {
        if k == 0 {
            return Ok(Vec::new());
        }

        let mut conn = self.pool.acquire().await?;
        match Self::stored_dimension(&mut conn).await? {
            None => return Ok(Vec::new()),
            Some(dim) if dim != vector.len() => return Err(dimension_mismatch(dim, vector.len())),
            Some(_) => {}
        }

        let filtered_sql = format!("{} WHERE category = ?1", SELECT_COLUMNS);
        let rows = match category {
            Some(category) => {
                sqlx::query(&filtered_sql)
                    .bind(category)
                    .fetch_all(&mut *conn)
                    .await?
            }
            None => sqlx::query(SELECT_COLUMNS).fetch_all(&mut *conn).await?,
        };

        let mut hits = Vec::with_capacity(rows.len());
        for row in &rows {
            let entry = Self::row_to_entry(row)?;
            let score = cosine_similarity(vector, &entry.embedding)?;
            hits.push(SearchHit { entry, score });
        }

        rank(&mut hits);
        hits.truncate(k);
        Ok(hits)
    }

    async fn delete_by_document(&self, document_id: &str) -> Result<usize, ApiError> {
        let _guard = self.write_lock.lock().await;
        let mut tx = self.pool.begin().await?;
        let result = sqlx::query("DELETE FROM fragments WHERE document_id = ?1")
            .bind(document_id)
            .execute(&mut *tx)
            .await?;
        sqlx::query("DELETE FROM indexed_documents WHERE document_id = ?1")
            .bind(document_id)
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;
        Ok(result.rows_affected() as usize)
    }

    async fn delete_fragments(&self, fragment_ids: &[String]) -> Result<usize, ApiError> {
        if fragment_ids.is_empty() {
            return Ok(0);
        }
        let _guard = self.write_lock.lock().await;
        let mut tx = self.pool.begin().await?;
        let deleted = Self::delete_ids(&mut tx, fragment_ids).await?;
        tx.commit().await?;
        Ok(deleted)
    }

    async fn fragment_hashes(&self, document_id: &str) -> Result<HashMap<String, String>, ApiError> {
        let rows = sqlx::query(
            "SELECT fragment_id, content_hash FROM fragments WHERE document_id = ?1",
        )
        .bind(document_id)
        .fetch_all(&self.pool)
        .await?;

        let mut hashes = HashMap::with_capacity(rows.len());
        for row in &rows {
            hashes.insert(row.try_get("fragment_id")?, row.try_get("content_hash")?);
        }
        Ok(hashes)
    }

    async fn document_state(&self, document_id: &str) -> Result<Option<DocumentState>, ApiError> {
        let row = sqlx::query(
            "SELECT document_id, content_hash, fragment_count, indexed_at
             FROM indexed_documents WHERE document_id = ?1",
        )
        .bind(document_id)
        .fetch_optional(&self.pool)
        .await?;

        let Some(row) = row else {
            return Ok(None);
        };
        let fragment_count: i64 = row.try_get("fragment_count")?;
        let indexed_at: String = row.try_get("indexed_at")?;
        Ok(Some(DocumentState {
            document_id: row.try_get("document_id")?,
            content_hash: row.try_get("content_hash")?,
            fragment_count: fragment_count.max(0) as usize,
            indexed_at: parse_timestamp(&indexed_at)?,
        }))
    }

    async fn apply_document(&self, update: DocumentUpdate) -> Result<(), ApiError> {
        let _guard = self.write_lock.lock().await;
        let mut tx = self.pool.begin().await?;

        for entry in &update.upserts {
            if entry.fragment.document_id != update.document_id {
                return Err(ApiError::BadRequest(format!(
                    "Fragment {} does not belong to document {}",
                    entry.fragment.id, update.document_id
                )));
            }
            Self::write_entry(&mut tx, entry).await?;
        }
        Self::delete_ids(&mut tx, &update.deletions).await?;

        sqlx::query(
            "INSERT INTO indexed_documents (document_id, content_hash, fragment_count, indexed_at)
             VALUES (?1, ?2, ?3, ?4)
             ON CONFLICT(document_id) DO UPDATE SET
                content_hash = excluded.content_hash,
                fragment_count = excluded.fragment_count,
                indexed_at = excluded.indexed_at",
        )
        .bind(&update.document_id)
        .bind(&update.content_hash)
        .bind(update.fragment_count as i64)
        .bind(format_timestamp(&Utc::now()))
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(())
    }

    async fn record_manifest_version(&self, version: &str) -> Result<(), ApiError> {
        let _guard = self.write_lock.lock().await;
        let mut conn = self.pool.acquire().await?;
        Self::set_meta(&mut conn, MANIFEST_KEY, version).await
    }

    async fn count(&self) -> Result<usize, ApiError> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM fragments")
            .fetch_one(&self.pool)
            .await?;
        Ok(count as usize)
    }

    async fn stats(&self) -> Result<IndexStats, ApiError> {
        let rows = sqlx::query(
            "SELECT category, COUNT(*) AS total FROM fragments GROUP BY category ORDER BY category",
        )
        .fetch_all(&self.pool)
        .await?;

        let mut fragments_by_category = BTreeMap::new();
        let mut total_fragments = 0;
        for row in &rows {
            let category: String = row.try_get("category")?;
            let total: i64 = row.try_get("total")?;
            total_fragments += total as usize;
            fragments_by_category.insert(category, total as usize);
        }

        let indexed_documents: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM indexed_documents")
            .fetch_one(&self.pool)
            .await?;
        let last_indexed_at: Option<String> =
            sqlx::query_scalar("SELECT MAX(indexed_at) FROM indexed_documents")
                .fetch_one(&self.pool)
                .await?;
        let manifest_version: Option<String> =
            sqlx::query_scalar("SELECT value FROM index_meta WHERE key = ?1")
                .bind(MANIFEST_KEY)
                .fetch_optional(&self.pool)
                .await?;

        Ok(IndexStats {
            total_fragments,
            indexed_documents: indexed_documents as usize,
            fragments_by_category,
            last_indexed_at: last_indexed_at.as_deref().map(parse_timestamp).transpose()?,
            embedding_dimension: self.dimension().await?,
            manifest_version,
        })
    }

    async fn reset(&self) -> Result<(), ApiError> {
        let _guard = self.write_lock.lock().await;
        let mut tx = self.pool.begin().await?;
        sqlx::query("DELETE FROM fragments").execute(&mut *tx).await?;
        sqlx::query("DELETE FROM indexed_documents")
            .execute(&mut *tx)
            .await?;
        sqlx::query("DELETE FROM index_meta").execute(&mut *tx).await?;
        tx.commit().await?;
        tracing::info!("Vector index reset");
        Ok(())
    }

    async fn dimension(&self) -> Result<Option<usize>, ApiError> {
        let mut conn = self.pool.acquire().await?;
        Self::stored_dimension(&mut conn).await
    }
}
