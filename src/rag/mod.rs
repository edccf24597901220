//! Corpus ingestion, chunking, vector storage and incremental indexing.

pub mod chunker;
pub mod context_builder;
pub mod corpus;
pub mod document;
pub mod indexer;
pub mod sqlite;
pub mod store;

pub use chunker::Chunker;
pub use context_builder::{Citation, ContextBuilder};
pub use corpus::{load_corpus_dir, CorpusManifest};
pub use document::{Document, Fragment, IndexEntry, SearchHit};
pub use indexer::{DocumentOutcome, IndexReport, Indexer};
pub use sqlite::SqliteVectorIndex;
pub use store::{DocumentState, DocumentUpdate, IndexStats, VectorIndex};
