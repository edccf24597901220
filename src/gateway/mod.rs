//! Embedding and generation gateways.
//!
//! Both model backends are opaque to the rest of the crate: text in, vector
//! or text out. [`GuardedEmbedder`] and [`GuardedGenerator`] put a deadline
//! around every call so no caller can hang on a stuck model.

pub mod ollama;

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use crate::core::errors::{ApiError, GatewayError};
use crate::vector_math::dimension_mismatch;

pub use ollama::OllamaClient;

#[async_trait]
pub trait EmbeddingGateway: Send + Sync {
    fn name(&self) -> &str;

    /// Embed one text into a fixed-length vector.
    async fn embed(&self, text: &str) -> Result<Vec<f32>, ApiError>;
}

#[async_trait]
pub trait GenerationGateway: Send + Sync {
    fn name(&self) -> &str;

    /// Produce an answer to `query` grounded in `context`.
    async fn generate(&self, context: &str, query: &str) -> Result<String, ApiError>;
}

pub async fn embed_with_deadline<F>(call: F, deadline: Duration) -> Result<Vec<f32>, ApiError>
where
    F: Future<Output = Result<Vec<f32>, ApiError>>,
{
    match tokio::time::timeout(deadline, call).await {
        Ok(result) => result,
        Err(_) => Err(GatewayError::EmbeddingTimeout(deadline).into()),
    }
}

pub async fn generate_with_deadline<F>(call: F, deadline: Duration) -> Result<String, ApiError>
where
    F: Future<Output = Result<String, ApiError>>,
{
    match tokio::time::timeout(deadline, call).await {
        Ok(result) => result,
        Err(_) => Err(GatewayError::GenerationTimeout(deadline).into()),
    }
}

/// Embedding gateway with a deadline, input truncation and an optional
/// dimensionality contract.
pub struct GuardedEmbedder {
    inner: Arc<dyn EmbeddingGateway>,
    timeout: Duration,
    max_chars: usize,
    expected_dimension: Option<usize>,
}

impl GuardedEmbedder {
    pub fn new(inner: Arc<dyn EmbeddingGateway>, timeout: Duration, max_chars: usize) -> Self {
        Self {
            inner,
            timeout,
            max_chars: max_chars.max(1),
            expected_dimension: None,
        }
    }

    pub fn with_expected_dimension(mut self, dimension: Option<usize>) -> Self {
        self.expected_dimension = dimension;
        self
    }
}

#[async_trait]
impl EmbeddingGateway for GuardedEmbedder {
    fn name(&self) -> &str {
        self.inner.name()
    }

    async fn embed(&self, text: &str) -> Result<Vec<f32>, ApiError> {
        let input = truncate_chars(text, self.max_chars);
        let vector = embed_with_deadline(self.inner.embed(input), self.timeout).await?;

        if vector.is_empty() {
            return Err(GatewayError::EmbeddingUnavailable(format!(
                "{} returned an empty embedding",
                self.inner.name()
            ))
            .into());
        }
        if let Some(expected) = self.expected_dimension {
            if vector.len() != expected {
                return Err(dimension_mismatch(expected, vector.len()));
            }
        }
        Ok(vector)
    }
}

pub struct GuardedGenerator {
    inner: Arc<dyn GenerationGateway>,
    timeout: Duration,
}

impl GuardedGenerator {
    pub fn new(inner: Arc<dyn GenerationGateway>, timeout: Duration) -> Self {
        Self { inner, timeout }
    }
}

#[async_trait]
impl GenerationGateway for GuardedGenerator {
    fn name(&self) -> &str {
        self.inner.name()
    }

    async fn generate(&self, context: &str, query: &str) -> Result<String, ApiError> {
        generate_with_deadline(self.inner.generate(context, query), self.timeout).await
    }
}

/// Longest prefix of `text` holding at most `max_chars` characters.
pub fn truncate_chars(text: &str, max_chars: usize) -> &str {
    match text.char_indices().nth(max_chars) {
        Some((byte_idx, _)) => &text[..byte_idx],
        None => text,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{EchoGenerator, SlowEmbedder, SpyEmbedder};

    #[test]
    fn truncation_respects_char_boundaries() {
        assert_eq!(truncate_chars("données", 4), "donn");
        assert_eq!(truncate_chars("abc", 10), "abc");
        assert_eq!(truncate_chars("éé", 1), "é");
    }

    #[tokio::test]
    async fn slow_embedding_becomes_timeout() {
        let guarded = GuardedEmbedder::new(
            Arc::new(SlowEmbedder::new(Duration::from_millis(300))),
            Duration::from_millis(20),
            100,
        );
        let err = guarded.embed("question").await.unwrap_err();
        assert!(matches!(
            err,
            ApiError::Gateway(GatewayError::EmbeddingTimeout(_))
        ));
        assert!(err.is_transient());
    }

    #[tokio::test]
    async fn long_input_is_truncated_before_embedding() {
        let spy = Arc::new(SpyEmbedder::new(4));
        let guarded = GuardedEmbedder::new(spy.clone(), Duration::from_secs(1), 5);
        guarded.embed("abcdefghij").await.unwrap();
        assert_eq!(spy.seen(), vec!["abcde".to_string()]);
    }

    #[tokio::test]
    async fn unexpected_dimension_is_a_configuration_error() {
        let guarded = GuardedEmbedder::new(
            Arc::new(SpyEmbedder::new(4)),
            Duration::from_secs(1),
            100,
        )
        .with_expected_dimension(Some(8));
        let err = guarded.embed("texte").await.unwrap_err();
        assert!(matches!(err, ApiError::Configuration(_)));
    }

    #[tokio::test]
    async fn generation_passes_through_within_deadline() {
        let guarded = GuardedGenerator::new(Arc::new(EchoGenerator::default()), Duration::from_secs(1));
        let text = guarded.generate("ctx", "q").await.unwrap();
        assert!(text.contains('q'));
    }
}
