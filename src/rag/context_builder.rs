//! Context assembly for the generation prompt.
//!
//! Takes ranked hits from the Vector Index and produces:
//! 1. a deduplicated hit list (adjacent or overlapping fragments of one document collapse)
//! 2. a bounded-size context block, most similar first
//! 3. citations, one per document, in rank order

use std::collections::HashSet;

use serde::{Deserialize, Serialize};

use super::document::SearchHit;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Citation {
    pub title: String,
    pub url: String,
    pub category: String,
}

pub struct ContextBuilder {
    max_context_chars: usize,
}

impl ContextBuilder {
    pub fn new(max_context_chars: usize) -> Self {
        Self { max_context_chars }
    }

    /// Keeps hits in rank order, dropping any hit that touches or overlaps a
    /// better-ranked hit from the same document.
    pub fn dedupe(&self, hits: Vec<SearchHit>) -> Vec<SearchHit> {
        let mut kept: Vec<SearchHit> = Vec::with_capacity(hits.len());
        for hit in hits {
            let redundant = kept
                .iter()
                .any(|better| better.entry.fragment.adjoins(&hit.entry.fragment));
            if !redundant {
                kept.push(hit);
            }
        }
        kept
    }

    /// Numbered source block. Hits that would overflow the budget are left
    /// out; the first hit is always included, truncated if needed.
    pub fn format_context(&self, hits: &[SearchHit]) -> String {
        let mut context = String::new();
        let mut used = 0;

        for (i, hit) in hits.iter().enumerate() {
            let fragment = &hit.entry.fragment;
            let header = format!(
                "[{}] (Source: {} | {} | {}, relevance: {:.2})\n",
                i + 1,
                fragment.title,
                fragment.category,
                fragment.url,
                hit.score
            );
            let block_len = header.chars().count() + fragment.text.chars().count() + 2;

            if used + block_len > self.max_context_chars {
                if i == 0 {
                    let room = self
                        .max_context_chars
                        .saturating_sub(header.chars().count());
                    context.push_str(&header);
                    context.extend(fragment.text.chars().take(room));
                }
                break;
            }

            context.push_str(&header);
            context.push_str(&fragment.text);
            context.push_str("\n\n");
            used += block_len;
        }

        context.trim_end().to_string()
    }

    /// One citation per source document, ordered by its best-ranked fragment.
    pub fn citations(&self, hits: &[SearchHit]) -> Vec<Citation> {
        let mut seen = HashSet::new();
        hits.iter()
            .filter(|hit| seen.insert(hit.entry.fragment.document_id.clone()))
            .map(|hit| Citation {
                title: hit.entry.fragment.title.clone(),
                url: hit.entry.fragment.url.clone(),
                category: hit.entry.fragment.category.clone(),
            })
            .collect()
    }
}

/// `📚 Sources :` footer appended to generated answers.
pub fn source_signature(citations: &[Citation], max: usize) -> String {
    let mut signature = String::from("📚 Sources :");
    for citation in citations.iter().take(max) {
        signature.push_str(&format!("\n- [{}] {}", citation.category, citation.title));
        if !citation.url.is_empty() {
            signature.push_str(&format!(" ({})", citation.url));
        }
    }
    signature
}
