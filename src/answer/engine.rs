use std::collections::HashSet;
use std::sync::Arc;

use chrono::Utc;
use uuid::Uuid;

use super::{AnswerRequest, AnswerResult, AnswerStatus, ConfidenceModel};
use crate::core::config::settings::RetrievalSettings;
use crate::core::config::LeaSettings;
use crate::core::errors::ApiError;
use crate::corrections::{CorrectionMatch, CorrectionMemory};
use crate::gateway::{EmbeddingGateway, GenerationGateway};
use crate::rag::context_builder::source_signature;
use crate::rag::{ContextBuilder, SearchHit, VectorIndex};

pub const NO_GROUNDING_MESSAGE: &str = "Je ne trouve pas cette information dans ma base de connaissances. \
Je préfère ne pas répondre plutôt que de risquer une information inexacte. \
Vous pouvez reformuler votre question ou consulter directement le site de la CNIL.";

const SIGNATURE_MARKER: &str = "📚";

/// Answers one query at a time; holds no per-query state, so a single
/// engine serves concurrent requests.
pub struct AnswerEngine {
    index: Arc<dyn VectorIndex>,
    corrections: Arc<CorrectionMemory>,
    embedder: Arc<dyn EmbeddingGateway>,
    generator: Arc<dyn GenerationGateway>,
    retrieval: RetrievalSettings,
    correction_threshold: f32,
    confidence: ConfidenceModel,
    context_builder: ContextBuilder,
    system_prompt: String,
}

impl AnswerEngine {
    pub fn new(
        index: Arc<dyn VectorIndex>,
        corrections: Arc<CorrectionMemory>,
        embedder: Arc<dyn EmbeddingGateway>,
        generator: Arc<dyn GenerationGateway>,
        settings: &LeaSettings,
    ) -> Self {
        Self {
            index,
            corrections,
            embedder,
            generator,
            retrieval: settings.retrieval.clone(),
            correction_threshold: settings.corrections.similarity_threshold,
            confidence: ConfidenceModel::from_settings(&settings.confidence),
            context_builder: ContextBuilder::new(settings.retrieval.max_context_chars),
            system_prompt: settings.generation.system_prompt.clone(),
        }
    }

    /// Gateway failures are returned as-is, without retry.
    pub async fn answer(&self, request: &AnswerRequest) -> Result<AnswerResult, ApiError> {
        let query = request.query.trim();
        if query.is_empty() {
            return Err(ApiError::BadRequest("Query must not be empty".to_string()));
        }
        let category = request
            .category
            .as_deref()
            .map(str::trim)
            .filter(|c| !c.is_empty())
            .map(str::to_uppercase);

        let query_vector = self.embedder.embed(query).await?;

        if let Some(hit) = self
            .corrections
            .find_best(&query_vector, self.correction_threshold)
            .await?
        {
            return self
                .answer_from_correction(query, &query_vector, category.as_deref(), hit)
                .await;
        }

        let hits = match self
            .retrieve(&query_vector, self.retrieval.top_k, category.as_deref())
            .await
        {
            Ok(hits) => hits,
            Err(ApiError::NoResults(reason)) => {
                tracing::info!(query, %reason, "No grounding for query");
                return Ok(self.insufficient_grounding(query));
            }
            Err(err) => return Err(err),
        };

        let sources = self.context_builder.format_context(&hits);
        let context = format!("{}\n\nSources :\n{}", self.system_prompt, sources);
        let citations = self.context_builder.citations(&hits);

        let mut answer = self.generator.generate(&context, query).await?;
        if self.retrieval.append_source_signature && !answer.contains(SIGNATURE_MARKER) {
            answer = format!(
                "{}\n\n{}",
                answer.trim_end(),
                source_signature(&citations, self.retrieval.max_citations)
            );
        }

        let confidence = self
            .confidence
            .score(hits[0].score, distinct_documents(&hits), false);

        tracing::info!(
            query,
            hits = hits.len(),
            top_score = hits[0].score,
            confidence,
            generator = self.generator.name(),
            "Answer generated"
        );

        Ok(AnswerResult {
            answer_id: Uuid::new_v4().to_string(),
            query: query.to_string(),
            answer,
            citations,
            confidence,
            used_correction: false,
            status: AnswerStatus::Grounded,
            correction_id: None,
            timestamp: Utc::now(),
        })
    }

    /// The correction text is returned verbatim; fragments only contribute
    /// citations and agreement.
    async fn answer_from_correction(
        &self,
        query: &str,
        query_vector: &[f32],
        category: Option<&str>,
        hit: CorrectionMatch,
    ) -> Result<AnswerResult, ApiError> {
        let hits = if self.retrieval.correction_citation_k == 0 {
            Vec::new()
        } else {
            match self
                .retrieve(query_vector, self.retrieval.correction_citation_k, category)
                .await
            {
                Ok(hits) => hits,
                Err(ApiError::NoResults(_)) => Vec::new(),
                Err(err) => return Err(err),
            }
        };

        let citations = self.context_builder.citations(&hits);
        let top_score = hits.first().map_or(0.0, |h| h.score).max(hit.similarity);
        let confidence = self
            .confidence
            .score(top_score, distinct_documents(&hits), true);

        tracing::info!(
            query,
            correction_id = hit.record.id,
            similarity = hit.similarity,
            confidence,
            "Answer served from correction memory"
        );

        Ok(AnswerResult {
            answer_id: Uuid::new_v4().to_string(),
            query: query.to_string(),
            answer: hit.record.answer,
            citations,
            confidence,
            used_correction: true,
            status: AnswerStatus::Corrected,
            correction_id: Some(hit.record.id),
            timestamp: Utc::now(),
        })
    }

    /// Ranked, thresholded and deduplicated hits; `NoResults` when nothing
    /// clears `min_similarity`.
    async fn retrieve(
        &self,
        query_vector: &[f32],
        k: usize,
        category: Option<&str>,
    ) -> Result<Vec<SearchHit>, ApiError> {
        let hits: Vec<SearchHit> = self
            .index
            .query(query_vector, k, category)
            .await?
            .into_iter()
            .filter(|hit| hit.score >= self.retrieval.min_similarity)
            .collect();

        if hits.is_empty() {
            return Err(ApiError::NoResults(format!(
                "no fragment above similarity {:.2}",
                self.retrieval.min_similarity
            )));
        }
        Ok(self.context_builder.dedupe(hits))
    }

    fn insufficient_grounding(&self, query: &str) -> AnswerResult {
        AnswerResult {
            answer_id: Uuid::new_v4().to_string(),
            query: query.to_string(),
            answer: NO_GROUNDING_MESSAGE.to_string(),
            citations: Vec::new(),
            confidence: self.confidence.no_results(),
            used_correction: false,
            status: AnswerStatus::InsufficientGrounding,
            correction_id: None,
            timestamp: Utc::now(),
        }
    }
}

fn distinct_documents(hits: &[SearchHit]) -> usize {
    hits.iter()
        .map(|hit| hit.entry.fragment.document_id.as_str())
        .collect::<HashSet<_>>()
        .len()
}
