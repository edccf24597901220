//! Deterministic gateway fakes shared by unit and scenario tests.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use sha2::{Digest, Sha256};

use crate::core::config::{AppPaths, ConfigService, LeaSettings};
use crate::core::errors::{ApiError, GatewayError};
use crate::gateway::{EmbeddingGateway, GenerationGateway};
use crate::state::AppState;

const STOPWORDS: &[&str] = &[
    "les", "des", "une", "est", "que", "qui", "dans", "pour", "par", "sur", "mes", "ses", "aux",
    "the", "and", "toute", "tout", "elle", "doit",
];

/// Bag-of-words embedder: every token longer than two chars lands in a
/// hashed bucket. Scripted aliases stand in for paraphrases a real model
/// would map close together.
pub struct KeywordEmbedder {
    dims: usize,
    aliases: Mutex<HashMap<String, String>>,
    calls: AtomicUsize,
}

impl KeywordEmbedder {
    pub fn new(dims: usize) -> Self {
        Self {
            dims,
            aliases: Mutex::new(HashMap::new()),
            calls: AtomicUsize::new(0),
        }
    }

    /// Embed `text` exactly like `like`.
    pub fn with_alias(self, text: &str, like: &str) -> Self {
        self.aliases
            .lock()
            .unwrap()
            .insert(text.to_string(), like.to_string());
        self
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn vector_for(&self, text: &str) -> Vec<f32> {
        let source = self
            .aliases
            .lock()
            .unwrap()
            .get(text)
            .cloned()
            .unwrap_or_else(|| text.to_string());

        let mut vector = vec![0.0; self.dims];
        for token in tokens(&source) {
            let digest = Sha256::digest(token.as_bytes());
            let mut bucket = [0u8; 8];
            bucket.copy_from_slice(&digest[..8]);
            vector[(u64::from_le_bytes(bucket) % self.dims as u64) as usize] += 1.0;
        }
        vector
    }
}

fn tokens(text: &str) -> Vec<String> {
    text.split(|c: char| !c.is_alphanumeric())
        .map(|t| t.to_lowercase())
        .filter(|t| t.chars().count() >= 3 && !STOPWORDS.contains(&t.as_str()))
        .collect()
}

#[async_trait]
impl EmbeddingGateway for KeywordEmbedder {
    fn name(&self) -> &str {
        "keyword"
    }

    async fn embed(&self, text: &str) -> Result<Vec<f32>, ApiError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(self.vector_for(text))
    }
}

/// Records every input, returns a constant vector.
pub struct SpyEmbedder {
    dims: usize,
    seen: Mutex<Vec<String>>,
}

impl SpyEmbedder {
    pub fn new(dims: usize) -> Self {
        Self {
            dims,
            seen: Mutex::new(Vec::new()),
        }
    }

    pub fn seen(&self) -> Vec<String> {
        self.seen.lock().unwrap().clone()
    }
}

#[async_trait]
impl EmbeddingGateway for SpyEmbedder {
    fn name(&self) -> &str {
        "spy"
    }

    async fn embed(&self, text: &str) -> Result<Vec<f32>, ApiError> {
        self.seen.lock().unwrap().push(text.to_string());
        Ok(vec![1.0; self.dims])
    }
}

pub struct SlowEmbedder {
    delay: Duration,
}

impl SlowEmbedder {
    pub fn new(delay: Duration) -> Self {
        Self { delay }
    }
}

#[async_trait]
impl EmbeddingGateway for SlowEmbedder {
    fn name(&self) -> &str {
        "slow"
    }

    async fn embed(&self, _text: &str) -> Result<Vec<f32>, ApiError> {
        tokio::time::sleep(self.delay).await;
        Ok(vec![1.0, 0.0])
    }
}

/// Fails the first `failures` calls, then delegates.
pub struct FlakyEmbedder {
    inner: Arc<KeywordEmbedder>,
    failures_left: AtomicUsize,
    attempts: AtomicUsize,
}

impl FlakyEmbedder {
    pub fn new(inner: Arc<KeywordEmbedder>, failures: usize) -> Self {
        Self {
            inner,
            failures_left: AtomicUsize::new(failures),
            attempts: AtomicUsize::new(0),
        }
    }

    pub fn attempts(&self) -> usize {
        self.attempts.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl EmbeddingGateway for FlakyEmbedder {
    fn name(&self) -> &str {
        "flaky"
    }

    async fn embed(&self, text: &str) -> Result<Vec<f32>, ApiError> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        let failing = self
            .failures_left
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |left| left.checked_sub(1))
            .is_ok();
        if failing {
            return Err(GatewayError::EmbeddingUnavailable("connection reset".into()).into());
        }
        self.inner.embed(text).await
    }
}

/// Fails every call whose text contains `needle` with the given error.
pub struct FailingEmbedder {
    inner: Arc<KeywordEmbedder>,
    needle: String,
    error: GatewayError,
}

impl FailingEmbedder {
    pub fn new(inner: Arc<KeywordEmbedder>, needle: &str, error: GatewayError) -> Self {
        Self {
            inner,
            needle: needle.to_string(),
            error,
        }
    }
}

#[async_trait]
impl EmbeddingGateway for FailingEmbedder {
    fn name(&self) -> &str {
        "failing"
    }

    async fn embed(&self, text: &str) -> Result<Vec<f32>, ApiError> {
        if text.contains(&self.needle) {
            return Err(self.error.clone().into());
        }
        self.inner.embed(text).await
    }
}

/// Answers with the query and remembers the context it was given.
#[derive(Default)]
pub struct EchoGenerator {
    calls: AtomicUsize,
    last_context: Mutex<Option<String>>,
}

impl EchoGenerator {
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn last_context(&self) -> Option<String> {
        self.last_context.lock().unwrap().clone()
    }
}

#[async_trait]
impl GenerationGateway for EchoGenerator {
    fn name(&self) -> &str {
        "echo"
    }

    async fn generate(&self, context: &str, query: &str) -> Result<String, ApiError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        *self.last_context.lock().unwrap() = Some(context.to_string());
        Ok(format!("Réponse générée pour : {}", query))
    }
}

pub struct FailingGenerator {
    error: GatewayError,
}

impl FailingGenerator {
    pub fn new(error: GatewayError) -> Self {
        Self { error }
    }
}

#[async_trait]
impl GenerationGateway for FailingGenerator {
    fn name(&self) -> &str {
        "failing"
    }

    async fn generate(&self, _context: &str, _query: &str) -> Result<String, ApiError> {
        Err(self.error.clone().into())
    }
}

pub struct SlowGenerator {
    delay: Duration,
}

impl SlowGenerator {
    pub fn new(delay: Duration) -> Self {
        Self { delay }
    }
}

#[async_trait]
impl GenerationGateway for SlowGenerator {
    fn name(&self) -> &str {
        "slow"
    }

    async fn generate(&self, _context: &str, query: &str) -> Result<String, ApiError> {
        tokio::time::sleep(self.delay).await;
        Ok(query.to_string())
    }
}

pub fn temp_db(prefix: &str) -> std::path::PathBuf {
    std::env::temp_dir().join(format!("{}-{}.db", prefix, uuid::Uuid::new_v4()))
}

/// Application state over a throwaway data directory, backed by the
/// keyword embedder and the echo generator.
pub async fn test_state() -> (Arc<AppState>, tempfile::TempDir) {
    let dir = tempfile::tempdir().unwrap();
    let paths = Arc::new(AppPaths::with_data_dir(
        dir.path().to_path_buf(),
        dir.path().join("data"),
    ));
    let config = ConfigService::new(paths.clone());
    let mut settings = LeaSettings::default();
    settings.retrieval.min_similarity = 0.2;
    let state = AppState::build(
        paths,
        config,
        settings,
        Arc::new(KeywordEmbedder::new(512)),
        Arc::new(EchoGenerator::default()),
    )
    .await
    .unwrap();
    (Arc::new(state), dir)
}
