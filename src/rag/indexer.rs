//! Incremental indexer.
//!
//! Reconciles the Vector Index with a [`CorpusManifest`]: unchanged documents
//! are skipped by hash, unchanged fragments are skipped by fragment hash, and
//! fragments that disappeared from a document are deleted. Both hashes cover
//! category, title and url, and the stored document hash is keyed by the
//! chunker settings, so metadata edits and re-chunking reach the index. A
//! document's hash is written in the same transaction as its fragments, and
//! only once every changed fragment has been embedded.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use futures_util::stream::{self, StreamExt, TryStreamExt};
use serde::Serialize;

use super::chunker::Chunker;
use super::corpus::CorpusManifest;
use super::document::{sha256_hex, Document, Fragment, IndexEntry};
use super::store::{DocumentUpdate, VectorIndex};
use crate::core::config::settings::{ChunkingSettings, IndexerSettings};
use crate::core::errors::ApiError;
use crate::gateway::EmbeddingGateway;

// ---------------------------------------------------------------------------
// Reports
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum DocumentOutcome {
    Unchanged,
    Indexed {
        embedded: usize,
        skipped: usize,
        deleted: usize,
    },
    Failed {
        reason: String,
        attempts: u32,
    },
}

#[derive(Debug, Clone, Serialize)]
pub struct DocumentReport {
    pub document_id: String,
    #[serde(flatten)]
    pub outcome: DocumentOutcome,
}

#[derive(Debug, Clone, Serialize)]
pub struct IndexReport {
    pub manifest_version: String,
    pub documents: Vec<DocumentReport>,
    pub unchanged: usize,
    pub indexed: usize,
    pub failed: usize,
    pub fragments_embedded: usize,
    pub fragments_skipped: usize,
    pub fragments_deleted: usize,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
}

impl IndexReport {
    fn from_documents(
        manifest_version: &str,
        mut documents: Vec<DocumentReport>,
        started_at: DateTime<Utc>,
    ) -> Self {
        documents.sort_by(|a, b| a.document_id.cmp(&b.document_id));

        let mut report = Self {
            manifest_version: manifest_version.to_string(),
            documents: Vec::new(),
            unchanged: 0,
            indexed: 0,
            failed: 0,
            fragments_embedded: 0,
            fragments_skipped: 0,
            fragments_deleted: 0,
            started_at,
            finished_at: Utc::now(),
        };
        for doc in &documents {
            match &doc.outcome {
                DocumentOutcome::Unchanged => report.unchanged += 1,
                DocumentOutcome::Indexed {
                    embedded,
                    skipped,
                    deleted,
                } => {
                    report.indexed += 1;
                    report.fragments_embedded += embedded;
                    report.fragments_skipped += skipped;
                    report.fragments_deleted += deleted;
                }
                DocumentOutcome::Failed { .. } => report.failed += 1,
            }
        }
        report.documents = documents;
        report
    }

    pub fn outcome_of(&self, document_id: &str) -> Option<&DocumentOutcome> {
        self.documents
            .iter()
            .find(|doc| doc.document_id == document_id)
            .map(|doc| &doc.outcome)
    }
}

// ---------------------------------------------------------------------------
// Retry policy
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base: Duration,
    pub max: Duration,
}

impl RetryPolicy {
    pub fn from_settings(settings: &IndexerSettings) -> Self {
        Self {
            max_attempts: settings.max_attempts.max(1),
            base: Duration::from_millis(settings.backoff_base_ms),
            max: Duration::from_millis(settings.backoff_max_ms),
        }
    }

    /// Delay after failed attempt `attempt` (1-based): `base * 2^(attempt-1)`, capped.
    pub fn backoff(&self, attempt: u32) -> Duration {
        let factor = 1u32 << attempt.saturating_sub(1).min(16);
        self.base.saturating_mul(factor).min(self.max)
    }
}

// ---------------------------------------------------------------------------
// Indexer
// ---------------------------------------------------------------------------

pub struct Indexer {
    index: Arc<dyn VectorIndex>,
    embedder: Arc<dyn EmbeddingGateway>,
    chunker: Chunker,
    retry: RetryPolicy,
    concurrency: usize,
}

impl Indexer {
    pub fn new(
        index: Arc<dyn VectorIndex>,
        embedder: Arc<dyn EmbeddingGateway>,
        chunking: &ChunkingSettings,
        settings: &IndexerSettings,
    ) -> Self {
        Self {
            index,
            embedder,
            chunker: Chunker::new(chunking),
            retry: RetryPolicy::from_settings(settings),
            concurrency: settings.concurrency.max(1),
        }
    }

    pub fn chunker(&self) -> &Chunker {
        &self.chunker
    }

    /// One incremental pass. Configuration and persistence errors abort the
    /// pass; gateway failures only fail the affected document.
    pub async fn run(&self, manifest: &CorpusManifest) -> Result<IndexReport, ApiError> {
        let started_at = Utc::now();
        tracing::info!(
            version = %manifest.version,
            "Indexing {} documents",
            manifest.len()
        );

        // Collected before streaming so the pass future stays `Send`.
        let pending: Vec<_> = manifest
            .documents
            .iter()
            .map(|document| async move {
                self.reconcile_with_retry(document)
                    .await
                    .map(|outcome| DocumentReport {
                        document_id: document.id.clone(),
                        outcome,
                    })
            })
            .collect();
        let documents: Vec<DocumentReport> = stream::iter(pending)
            .buffer_unordered(self.concurrency)
            .try_collect()
            .await?;

        let report = IndexReport::from_documents(&manifest.version, documents, started_at);
        if report.failed == 0 {
            self.index.record_manifest_version(&manifest.version).await?;
        }

        tracing::info!(
            indexed = report.indexed,
            unchanged = report.unchanged,
            failed = report.failed,
            embedded = report.fragments_embedded,
            deleted = report.fragments_deleted,
            "Indexing pass finished"
        );
        Ok(report)
    }

    /// Full rebuild: drops the index, then indexes everything.
    pub async fn rebuild(&self, manifest: &CorpusManifest) -> Result<IndexReport, ApiError> {
        tracing::warn!("Rebuilding vector index from scratch");
        self.index.reset().await?;
        self.run(manifest).await
    }

    /// Stored per document; changes with the document hash or the chunker settings.
    fn skip_key(&self, document: &Document) -> String {
        sha256_hex(&format!("{}:{}", document.content_hash, self.chunker.signature()))
    }

    async fn reconcile_with_retry(&self, document: &Document) -> Result<DocumentOutcome, ApiError> {
        let skip_key = self.skip_key(document);
        if let Some(state) = self.index.document_state(&document.id).await? {
            if state.content_hash == skip_key {
                tracing::debug!(document = %document.id, "Unchanged, skipping");
                return Ok(DocumentOutcome::Unchanged);
            }
        }

        let fragments = self.chunker.chunk(document);
        let existing = self.index.fragment_hashes(&document.id).await?;

        // Vectors survive between attempts so a retry only re-embeds what failed.
        let mut embedded: HashMap<String, Vec<f32>> = HashMap::new();
        let mut attempt = 0;
        loop {
            attempt += 1;
            match self
                .embed_changed(&fragments, &existing, &mut embedded)
                .await
            {
                Ok(()) => break,
                Err(err) if err.is_transient() && attempt < self.retry.max_attempts => {
                    let delay = self.retry.backoff(attempt);
                    tracing::warn!(
                        document = %document.id,
                        attempt,
                        "Embedding failed ({}), retrying in {:?}",
                        err,
                        delay
                    );
                    tokio::time::sleep(delay).await;
                }
                Err(err @ ApiError::Gateway(_)) => {
                    tracing::warn!(
                        document = %document.id,
                        attempt,
                        "Skipping document for this run: {}",
                        err
                    );
                    return Ok(DocumentOutcome::Failed {
                        reason: err.to_string(),
                        attempts: attempt,
                    });
                }
                Err(err) => return Err(err),
            }
        }

        let now = Utc::now();
        let current_ids: HashSet<&str> = fragments.iter().map(|f| f.id.as_str()).collect();
        let mut deletions: Vec<String> = existing
            .keys()
            .filter(|id| !current_ids.contains(id.as_str()))
            .cloned()
            .collect();
        deletions.sort();

        let mut upserts = Vec::new();
        for fragment in &fragments {
            if let Some(embedding) = embedded.remove(&fragment.id) {
                upserts.push(IndexEntry {
                    fragment: fragment.clone(),
                    embedding,
                    indexed_at: now,
                });
            }
        }

        let outcome = DocumentOutcome::Indexed {
            embedded: upserts.len(),
            skipped: fragments.len() - upserts.len(),
            deleted: deletions.len(),
        };

        self.index
            .apply_document(DocumentUpdate {
                document_id: document.id.clone(),
                content_hash: skip_key,
                upserts,
                deletions,
                fragment_count: fragments.len(),
            })
            .await?;

        tracing::debug!(document = %document.id, ?outcome, "Document reconciled");
        Ok(outcome)
    }

    async fn embed_changed(
        &self,
        fragments: &[Fragment],
        existing: &HashMap<String, String>,
        embedded: &mut HashMap<String, Vec<f32>>,
    ) -> Result<(), ApiError> {
        for fragment in fragments {
            let unchanged = existing
                .get(&fragment.id)
                .is_some_and(|hash| *hash == fragment.content_hash);
            if unchanged || embedded.contains_key(&fragment.id) {
                continue;
            }
            let vector = self.embedder.embed(&fragment.text).await?;
            embedded.insert(fragment.id.clone(), vector);
        }
        Ok(())
    }
}
