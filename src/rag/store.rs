//! VectorIndex trait: the persistent fragment → (vector, metadata) store.

use std::collections::{BTreeMap, HashMap};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::document::{IndexEntry, SearchHit};
use crate::core::errors::ApiError;

/// Last successful reconciliation of one document.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DocumentState {
    pub document_id: String,
    pub content_hash: String,
    pub fragment_count: usize,
    pub indexed_at: DateTime<Utc>,
}

/// Everything needed to bring one document's fragments up to date.
#[derive(Debug, Clone)]
pub struct DocumentUpdate {
    pub document_id: String,
    pub content_hash: String,
    pub upserts: Vec<IndexEntry>,
    pub deletions: Vec<String>,
    pub fragment_count: usize,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct IndexStats {
    pub total_fragments: usize,
    pub indexed_documents: usize,
    pub fragments_by_category: BTreeMap<String, usize>,
    pub last_indexed_at: Option<DateTime<Utc>>,
    pub embedding_dimension: Option<usize>,
    pub manifest_version: Option<String>,
}

/// Implementations must make every write atomic per entry: a reader sees an
/// entry with both vector and metadata, or not at all.
#[async_trait]
pub trait VectorIndex: Send + Sync {
    async fn upsert(&self, entry: IndexEntry) -> Result<(), ApiError>;

    /// All entries or none.
    async fn upsert_batch(&self, entries: Vec<IndexEntry>) -> Result<(), ApiError>;

    /// Top `k` entries by cosine similarity. The category filter is applied
    /// before ranking. Ties go to the most recently indexed entry, then to
    /// the smallest fragment id.
    async fn query(
        &self,
        vector: &[f32],
        k: usize,
        category: Option<&str>,
    ) -> Result<Vec<SearchHit>, ApiError>;

    /// Removes the document's fragments and its last-indexed hash.
    async fn delete_by_document(&self, document_id: &str) -> Result<usize, ApiError>;

    async fn delete_fragments(&self, fragment_ids: &[String]) -> Result<usize, ApiError>;

    /// fragment id → content hash for one document.
    async fn fragment_hashes(&self, document_id: &str) -> Result<HashMap<String, String>, ApiError>;

    async fn document_state(&self, document_id: &str) -> Result<Option<DocumentState>, ApiError>;

    /// Upserts, deletions and the document hash in a single transaction.
    async fn apply_document(&self, update: DocumentUpdate) -> Result<(), ApiError>;

    async fn record_manifest_version(&self, version: &str) -> Result<(), ApiError>;

    async fn count(&self) -> Result<usize, ApiError>;

    async fn stats(&self) -> Result<IndexStats, ApiError>;

    /// Drops every fragment, document hash and the dimension lock.
    async fn reset(&self) -> Result<(), ApiError>;

    /// Dimensionality fixed by the first stored vector.
    async fn dimension(&self) -> Result<Option<usize>, ApiError>;
}
