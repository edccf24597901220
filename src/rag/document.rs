use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// Normalized source text handed over by the scraper. Immutable once built.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Document {
    pub id: String,
    /// Source category tag, e.g. `CNIL`, `NIS2`, `EUR-LEX`.
    pub category: String,
    pub title: String,
    pub url: String,
    pub text: String,
    /// Covers category, title and url as well as the text.
    pub content_hash: String,
}

impl Document {
    pub fn new(
        id: impl Into<String>,
        category: impl Into<String>,
        title: impl Into<String>,
        url: impl Into<String>,
        text: impl Into<String>,
    ) -> Self {
        let category = category.into();
        let title = title.into();
        let url = url.into();
        let text = text.into();
        let content_hash = content_digest(&category, &title, &url, &text);
        Self {
            id: id.into(),
            category,
            title,
            url,
            text,
            content_hash,
        }
    }
}

/// A contiguous slice of a document, the unit of embedding and retrieval.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Fragment {
    /// `"{document_id}#{start_offset}"`.
    pub id: String,
    pub document_id: String,
    pub category: String,
    pub title: String,
    pub url: String,
    pub text: String,
    /// Char offsets into the document text.
    pub start_offset: usize,
    pub end_offset: usize,
    pub chunk_index: usize,
    pub content_hash: String,
}

impl Fragment {
    pub fn fragment_id(document_id: &str, start_offset: usize) -> String {
        format!("{}#{}", document_id, start_offset)
    }

    /// Whether two fragments of the same document cover touching or overlapping ranges.
    pub fn adjoins(&self, other: &Fragment) -> bool {
        self.document_id == other.document_id
            && self.start_offset <= other.end_offset
            && other.start_offset <= self.end_offset
    }
}

/// A fragment with its vector. Written and read as one unit.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct IndexEntry {
    pub fragment: Fragment,
    #[serde(skip_serializing)]
    pub embedding: Vec<f32>,
    pub indexed_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize)]
pub struct SearchHit {
    pub entry: IndexEntry,
    pub score: f32,
}

pub fn sha256_hex(text: &str) -> String {
    hex::encode(Sha256::digest(text.as_bytes()))
}

/// SHA-256 over the stored metadata and text of a document or fragment.
pub fn content_digest(category: &str, title: &str, url: &str, text: &str) -> String {
    let mut hasher = Sha256::new();
    for part in [category, title, url, text] {
        hasher.update(part.as_bytes());
        hasher.update([0x1f]);
    }
    hex::encode(hasher.finalize())
}
