//! Scraper output to corpus manifest.
//!
//! The scraper writes one Markdown file per document with a `---` front
//! matter block (`title`, `source`, `domain`, `category`, `scraped_at`).

use std::collections::HashSet;
use std::fs;
use std::path::Path;
use std::sync::OnceLock;

use regex::Regex;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use super::document::Document;
use crate::core::errors::ApiError;

pub const UNKNOWN_CATEGORY: &str = "UNKNOWN";

/// Explicit, versioned snapshot of the corpus handed to the indexer.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CorpusManifest {
    pub version: String,
    pub documents: Vec<Document>,
}

impl CorpusManifest {
    pub fn new(mut documents: Vec<Document>) -> Result<Self, ApiError> {
        documents.sort_by(|a, b| a.id.cmp(&b.id));

        let mut seen = HashSet::new();
        for document in &documents {
            if !seen.insert(document.id.as_str()) {
                return Err(ApiError::BadRequest(format!(
                    "Duplicate document id in corpus: {}",
                    document.id
                )));
            }
        }

        let mut hasher = Sha256::new();
        for document in &documents {
            hasher.update(document.id.as_bytes());
            hasher.update([0u8]);
            hasher.update(document.content_hash.as_bytes());
            hasher.update([b'\n']);
        }

        Ok(Self {
            version: hex::encode(hasher.finalize()),
            documents,
        })
    }

    pub fn len(&self) -> usize {
        self.documents.len()
    }

    pub fn is_empty(&self) -> bool {
        self.documents.is_empty()
    }
}

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct FrontMatter {
    pub title: String,
    pub source: String,
    pub domain: String,
    pub category: String,
    pub scraped_at: String,
}

pub fn load_corpus_dir(dir: &Path) -> Result<CorpusManifest, ApiError> {
    if !dir.exists() {
        tracing::warn!("Corpus directory {} does not exist", dir.display());
        return CorpusManifest::new(Vec::new());
    }

    let mut paths: Vec<_> = fs::read_dir(dir)
        .map_err(|err| ApiError::BadRequest(format!("cannot read {}: {}", dir.display(), err)))?
        .filter_map(|entry| entry.ok().map(|e| e.path()))
        .filter(|path| path.extension().is_some_and(|ext| ext == "md"))
        .collect();
    paths.sort();

    let mut documents = Vec::with_capacity(paths.len());
    for path in paths {
        let Some(stem) = path.file_stem().and_then(|s| s.to_str()) else {
            continue;
        };
        let raw = match fs::read_to_string(&path) {
            Ok(raw) => raw,
            Err(err) => {
                tracing::warn!("Skipping unreadable corpus file {}: {}", path.display(), err);
                continue;
            }
        };
        documents.push(parse_document(stem, &raw));
    }

    tracing::info!("Loaded {} documents from {}", documents.len(), dir.display());
    CorpusManifest::new(documents)
}

pub fn parse_document(id: &str, raw: &str) -> Document {
    let (meta, body) = split_front_matter(raw);
    let category = if meta.category.is_empty() {
        UNKNOWN_CATEGORY.to_string()
    } else {
        meta.category.to_uppercase()
    };
    let title = if meta.title.is_empty() {
        id.to_string()
    } else {
        meta.title
    };
    Document::new(id, category, title, meta.source, clean_text(body))
}

pub fn split_front_matter(raw: &str) -> (FrontMatter, &str) {
    let mut meta = FrontMatter::default();
    let Some(found) = front_matter_re().captures(raw) else {
        return (meta, raw);
    };
    let (Some(block), Some(whole)) = (found.get(1), found.get(0)) else {
        return (meta, raw);
    };

    for line in block.as_str().lines() {
        let Some((key, value)) = line.trim().split_once(':') else {
            continue;
        };
        let key = key.trim().trim_matches(|c| c == '"' || c == '\'');
        let value = value
            .trim()
            .trim_matches(|c| c == '"' || c == '\'')
            .to_string();
        match key {
            "title" => meta.title = value,
            "source" => meta.source = value,
            "domain" => meta.domain = value,
            "category" => meta.category = value,
            "scraped_at" => meta.scraped_at = value,
            _ => {}
        }
    }

    (meta, &raw[whole.end()..])
}

/// Strips leftover markup and normalizes whitespace, keeping paragraph breaks.
pub fn clean_text(text: &str) -> String {
    let without_scripts = script_style_re().replace_all(text, "");
    let without_tags = tag_re().replace_all(&without_scripts, "");
    let tabs = without_tags.replace('\t', " ");
    let spaces = spaces_re().replace_all(&tabs, " ");
    let newlines = newlines_re().replace_all(&spaces, "\n\n");
    newlines.trim().to_string()
}

fn front_matter_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?s)\A---[ \t]*\r?\n(.*?)\r?\n---[ \t]*(?:\r?\n|\z)").unwrap())
}

fn script_style_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"(?is)<script\b.*?</script\s*>|<style\b.*?</style\s*>").unwrap()
    })
}

fn tag_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"<[^>]+>").unwrap())
}

fn spaces_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r" {2,}").unwrap())
}

fn newlines_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\n{3,}").unwrap())
}
