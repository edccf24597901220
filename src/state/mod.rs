use std::sync::Arc;

use tokio::sync::Mutex;

use crate::answer::AnswerEngine;
use crate::core::config::{AppPaths, ConfigService, LeaSettings};
use crate::core::errors::ApiError;
use crate::corrections::CorrectionMemory;
use crate::feedback::FeedbackRecorder;
use crate::gateway::{
    EmbeddingGateway, GenerationGateway, GuardedEmbedder, GuardedGenerator, OllamaClient,
};
use crate::rag::{load_corpus_dir, IndexReport, Indexer, SqliteVectorIndex, VectorIndex};

pub mod error;

use error::InitializationError;

/// Shared state behind every route and the `index` command.
///
/// The Vector Index and Correction Memory are the only mutable shared
/// resources; everything else is read-only after startup.
#[derive(Clone)]
pub struct AppState {
    pub paths: Arc<AppPaths>,
    pub config: ConfigService,
    pub settings: Arc<LeaSettings>,
    pub ollama: Option<OllamaClient>,
    pub index: Arc<dyn VectorIndex>,
    pub corrections: Arc<CorrectionMemory>,
    pub feedback: Arc<FeedbackRecorder>,
    pub engine: Arc<AnswerEngine>,
    pub indexer: Arc<Indexer>,
    /// Held for the duration of an indexing pass.
    pub index_lock: Arc<Mutex<()>>,
}

impl AppState {
    /// Loads configuration and opens both stores, wiring the Ollama client
    /// in as embedding and generation backend.
    pub async fn initialize(paths: Arc<AppPaths>) -> Result<Arc<Self>, InitializationError> {
        let config = ConfigService::new(paths.clone());
        let settings = config
            .load_settings()
            .map_err(|e| InitializationError::Config(e.into()))?;

        let ollama = OllamaClient::new(&settings.ollama, &settings.gateway);
        tracing::info!(
            base_url = ollama.base_url(),
            llm = %settings.ollama.llm_model,
            embedding = %settings.ollama.embedding_model,
            "Using Ollama backend"
        );

        let embedder: Arc<dyn EmbeddingGateway> = Arc::new(ollama.clone());
        let generator: Arc<dyn GenerationGateway> = Arc::new(ollama.clone());
        let mut state = Self::build(paths, config, settings, embedder, generator).await?;
        state.ollama = Some(ollama);
        Ok(Arc::new(state))
    }

    /// Wires the components around arbitrary gateways. Both gateways get the
    /// configured deadlines.
    pub async fn build(
        paths: Arc<AppPaths>,
        config: ConfigService,
        settings: LeaSettings,
        embedder: Arc<dyn EmbeddingGateway>,
        generator: Arc<dyn GenerationGateway>,
    ) -> Result<Self, InitializationError> {
        let embedder: Arc<dyn EmbeddingGateway> = Arc::new(
            GuardedEmbedder::new(
                embedder,
                settings.gateway.embed_timeout(),
                settings.gateway.max_embed_chars,
            )
            .with_expected_dimension(settings.ollama.embedding_dimension),
        );
        let generator: Arc<dyn GenerationGateway> = Arc::new(GuardedGenerator::new(
            generator,
            settings.gateway.generate_timeout(),
        ));

        let index: Arc<dyn VectorIndex> = Arc::new(
            SqliteVectorIndex::new(paths.as_ref())
                .await
                .map_err(|e| InitializationError::Index(e.into()))?,
        );

        let corrections = Arc::new(
            CorrectionMemory::new(paths.as_ref(), settings.corrections.supersede_threshold)
                .await
                .map_err(|e| InitializationError::Corrections(e.into()))?,
        );

        let feedback = Arc::new(
            FeedbackRecorder::open(
                &paths.memory_db_path,
                corrections.clone(),
                embedder.clone(),
                &settings.corrections,
            )
            .await
            .map_err(|e| InitializationError::Feedback(e.into()))?,
        );

        let indexer = Arc::new(Indexer::new(
            index.clone(),
            embedder.clone(),
            &settings.chunking,
            &settings.indexer,
        ));

        let engine = Arc::new(AnswerEngine::new(
            index.clone(),
            corrections.clone(),
            embedder,
            generator,
            &settings,
        ));

        Ok(AppState {
            paths,
            config,
            settings: Arc::new(settings),
            ollama: None,
            index,
            corrections,
            feedback,
            engine,
            indexer,
            index_lock: Arc::new(Mutex::new(())),
        })
    }

    /// One indexing pass over the raw corpus directory. Refused with
    /// `Conflict` while another pass is running.
    pub async fn run_indexing(&self, full: bool) -> Result<IndexReport, ApiError> {
        let _guard = self
            .index_lock
            .try_lock()
            .map_err(|_| ApiError::Conflict("an indexing pass is already running".to_string()))?;

        let raw_dir = self.paths.raw_dir.clone();
        let manifest = tokio::task::spawn_blocking(move || load_corpus_dir(&raw_dir))
            .await
            .map_err(ApiError::persistence)??;

        if full {
            self.indexer.rebuild(&manifest).await
        } else {
            self.indexer.run(&manifest).await
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::test_state;

    fn write_raw(state: &AppState, name: &str, body: &str) {
        std::fs::write(state.paths.raw_dir.join(name), body).unwrap();
    }

    #[tokio::test]
    async fn indexing_reads_the_raw_directory() {
        let (state, _dir) = test_state().await;
        write_raw(
            &state,
            "cnil_effacement.md",
            "---\ntitle: Droit à l'effacement\nsource: https://www.cnil.fr/effacement\ncategory: cnil\n---\n\nLe droit à l'effacement permet de demander la suppression de ses données.",
        );

        let report = state.run_indexing(false).await.unwrap();
        assert_eq!(report.indexed, 1);
        assert_eq!(state.index.count().await.unwrap(), 1);

        let again = state.run_indexing(false).await.unwrap();
        assert_eq!(again.unchanged, 1);
        assert_eq!(again.fragments_embedded, 0);

        let rebuilt = state.run_indexing(true).await.unwrap();
        assert_eq!(rebuilt.indexed, 1);
    }

    #[tokio::test]
    async fn concurrent_indexing_is_refused() {
        let (state, _dir) = test_state().await;
        let _held = state.index_lock.lock().await;
        assert!(matches!(
            state.run_indexing(false).await,
            Err(ApiError::Conflict(_))
        ));
    }
}
