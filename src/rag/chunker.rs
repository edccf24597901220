//! Document splitting.
//!
//! Fragments are cut on paragraph or sentence boundaries where one exists in
//! the second half of the window, and neighbours overlap by a fixed number of
//! characters. Identity is `(document id, start offset)`, so unchanged
//! leading regions of an edited document keep their fragment ids.

use crate::core::config::settings::ChunkingSettings;

use super::document::{content_digest, sha256_hex, Document, Fragment};

#[derive(Debug, Clone)]
pub struct Chunker {
    chunk_size: usize,
    chunk_overlap: usize,
    max_document_chars: usize,
}

impl Chunker {
    pub fn new(settings: &ChunkingSettings) -> Self {
        let chunk_size = settings.chunk_size.max(2);
        Self {
            chunk_size,
            chunk_overlap: settings.chunk_overlap.min(chunk_size - 1),
            max_document_chars: settings.max_document_chars.max(1),
        }
    }

    /// Changes whenever the same text would be cut differently.
    pub fn signature(&self) -> String {
        sha256_hex(&format!(
            "chunker:{}:{}:{}",
            self.chunk_size, self.chunk_overlap, self.max_document_chars
        ))
    }

    pub fn chunk(&self, document: &Document) -> Vec<Fragment> {
        let mut chars: Vec<char> = document.text.chars().collect();
        if chars.len() > self.max_document_chars {
            tracing::warn!(
                document = %document.id,
                "Truncating document from {} to {} chars before chunking",
                chars.len(),
                self.max_document_chars
            );
            chars.truncate(self.max_document_chars);
        }

        if !chars.iter().any(|c| c.is_alphanumeric()) {
            tracing::warn!(document = %document.id, "Document has no indexable text");
            return Vec::new();
        }

        let total = chars.len();
        let mut fragments = Vec::new();
        let mut start = 0;

        loop {
            while start < total && chars[start].is_whitespace() {
                start += 1;
            }
            if start >= total {
                break;
            }

            let hard_end = (start + self.chunk_size).min(total);
            let end = if hard_end < total {
                self.find_boundary(&chars, start, hard_end)
            } else {
                total
            };

            let raw: String = chars[start..end].iter().collect();
            let text = raw.trim_end();
            if text.chars().any(|c| c.is_alphanumeric()) {
                fragments.push(Fragment {
                    id: Fragment::fragment_id(&document.id, start),
                    document_id: document.id.clone(),
                    category: document.category.clone(),
                    title: document.title.clone(),
                    url: document.url.clone(),
                    text: text.to_string(),
                    start_offset: start,
                    end_offset: end,
                    chunk_index: fragments.len(),
                    content_hash: content_digest(
                        &document.category,
                        &document.title,
                        &document.url,
                        text,
                    ),
                });
            }

            if end >= total {
                break;
            }
            start = end.saturating_sub(self.chunk_overlap).max(start + 1);
        }

        fragments
    }

    /// Cut position in `(start, hard_end]`, searched from `start + chunk_size / 2`.
    fn find_boundary(&self, chars: &[char], start: usize, hard_end: usize) -> usize {
        let floor = (start + self.chunk_size / 2).min(hard_end);
        let window = &chars[floor..hard_end];

        let paragraph = rfind_pair(window, |a, b| a == '\n' && b == '\n').map(|pos| pos + 2);
        let sentence = || {
            rfind_pair(window, |a, b| matches!(a, '.' | '!' | '?') && b.is_whitespace())
                .map(|pos| pos + 1)
        };
        let newline = || window.iter().rposition(|c| *c == '\n').map(|pos| pos + 1);
        let space = || window.iter().rposition(|c| *c == ' ').map(|pos| pos + 1);

        paragraph
            .or_else(sentence)
            .or_else(newline)
            .or_else(space)
            .map(|offset| floor + offset)
            .filter(|cut| *cut > start)
            .unwrap_or(hard_end)
    }
}

fn rfind_pair(window: &[char], matches: impl Fn(char, char) -> bool) -> Option<usize> {
    if window.len() < 2 {
        return None;
    }
    (0..window.len() - 1)
        .rev()
        .find(|&i| matches(window[i], window[i + 1]))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn chunker(size: usize, overlap: usize) -> Chunker {
        Chunker::new(&ChunkingSettings {
            chunk_size: size,
            chunk_overlap: overlap,
            max_document_chars: 100_000,
        })
    }

    fn doc(text: &str) -> Document {
        Document::new("cnil-art17", "CNIL", "Art. 17", "https://cnil.fr/a17", text)
    }

    #[test]
    fn short_document_yields_one_fragment() {
        let fragments = chunker(500, 50).chunk(&doc("Le droit à l'effacement."));
        assert_eq!(fragments.len(), 1);
        assert_eq!(fragments[0].id, "cnil-art17#0");
        assert_eq!(fragments[0].text, "Le droit à l'effacement.");
        assert_eq!(fragments[0].category, "CNIL");
    }

    #[test]
    fn noise_only_document_yields_nothing() {
        assert!(chunker(500, 50).chunk(&doc("   \n\n\t  --- * ")).is_empty());
        assert!(chunker(500, 50).chunk(&doc("")).is_empty());
    }

    #[test]
    fn chunking_is_deterministic() {
        let text = "La personne concernée a le droit d'obtenir l'effacement. ".repeat(40);
        let first = chunker(200, 30).chunk(&doc(&text));
        let second = chunker(200, 30).chunk(&doc(&text));
        assert!(first.len() > 1);
        assert_eq!(first, second);
    }

    #[test]
    fn fragments_respect_size_and_overlap() {
        let text = "Phrase numéro un du texte officiel. ".repeat(50);
        let fragments = chunker(120, 20).chunk(&doc(&text));
        let ids: std::collections::HashSet<_> = fragments.iter().map(|f| &f.id).collect();
        assert_eq!(ids.len(), fragments.len());

        for pair in fragments.windows(2) {
            assert!(pair[0].text.chars().count() <= 120);
            assert!(pair[1].start_offset < pair[0].end_offset);
            assert!(pair[1].start_offset > pair[0].start_offset);
        }
        let last = fragments.last().unwrap();
        assert_eq!(last.end_offset, text.chars().count());
    }

    #[test]
    fn prefers_sentence_boundaries() {
        let text = format!("{}. {}", "a".repeat(70), "b".repeat(80));
        let fragments = chunker(100, 10).chunk(&doc(&text));
        assert!(fragments[0].text.ends_with('.'));
        assert_eq!(fragments[0].end_offset, 71);
    }

    #[test]
    fn unchanged_prefix_keeps_identity() {
        let head = "Article premier. Les données sont traitées loyalement. ".repeat(6);
        let before = chunker(100, 10).chunk(&doc(&format!("{}Fin.", head)));
        let after = chunker(100, 10).chunk(&doc(&format!("{}Fin modifiée et allongée.", head)));
        assert_eq!(before[0].id, after[0].id);
        assert_eq!(before[0].content_hash, after[0].content_hash);
    }

    #[test]
    fn signature_follows_cut_parameters() {
        assert_eq!(chunker(200, 30).signature(), chunker(200, 30).signature());
        assert_ne!(chunker(200, 30).signature(), chunker(300, 30).signature());
        assert_ne!(chunker(200, 30).signature(), chunker(200, 40).signature());
    }

    #[test]
    fn fragment_hash_covers_metadata() {
        let text = "Le droit à l'effacement.";
        let cnil = chunker(500, 50).chunk(&doc(text));
        let anssi = chunker(500, 50).chunk(&Document::new(
            "cnil-art17",
            "ANSSI",
            "Art. 17",
            "https://cnil.fr/a17",
            text,
        ));
        assert_eq!(cnil[0].id, anssi[0].id);
        assert_ne!(cnil[0].content_hash, anssi[0].content_hash);
    }

    #[test]
    fn oversized_documents_are_truncated() {
        let chunker = Chunker::new(&ChunkingSettings {
            chunk_size: 50,
            chunk_overlap: 5,
            max_document_chars: 100,
        });
        let fragments = chunker.chunk(&doc(&"mot ".repeat(200)));
        assert!(fragments.iter().all(|f| f.end_offset <= 100));
    }
}
