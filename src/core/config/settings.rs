use std::env;
use std::time::Duration;

use serde::Serialize;
use serde_json::Value;

pub const DEFAULT_SYSTEM_PROMPT: &str = "Tu es LÉA (Liberté, Expertise, Assistance), une assistante experte en droit numérique : RGPD, directive NIS 2, norme ISO/CEI 27001 et loi Informatique et Libertés.

Tu réponds EXCLUSIVEMENT à partir des extraits officiels fournis dans le contexte.
N'invente jamais d'article, d'obligation ou de délai absent des sources.
Si l'information n'y figure pas, dis clairement : \"Je ne trouve pas cette information dans ma base de connaissances actuelle.\"

Réponds en français, avec précision et pédagogie, en citant l'article ou la section du texte source.";

#[derive(Debug, Clone, Serialize)]
pub struct OllamaSettings {
    pub base_url: String,
    pub llm_model: String,
    pub embedding_model: String,
    #[serde(skip_serializing)]
    pub api_key: Option<String>,
    pub embedding_dimension: Option<usize>,
}

#[derive(Debug, Clone, Serialize)]
pub struct GatewaySettings {
    pub embed_timeout_ms: u64,
    pub generate_timeout_ms: u64,
    pub max_embed_chars: usize,
}

impl GatewaySettings {
    pub fn embed_timeout(&self) -> Duration {
        Duration::from_millis(self.embed_timeout_ms)
    }

    pub fn generate_timeout(&self) -> Duration {
        Duration::from_millis(self.generate_timeout_ms)
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ChunkingSettings {
    pub chunk_size: usize,
    pub chunk_overlap: usize,
    pub max_document_chars: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct IndexerSettings {
    pub max_attempts: u32,
    pub backoff_base_ms: u64,
    pub backoff_max_ms: u64,
    pub concurrency: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct RetrievalSettings {
    pub top_k: usize,
    pub min_similarity: f32,
    pub max_context_chars: usize,
    pub correction_citation_k: usize,
    pub append_source_signature: bool,
    pub max_citations: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct CorrectionSettings {
    pub similarity_threshold: f32,
    /// Question similarity above which a new record supersedes an older one.
    /// Never below `similarity_threshold`.
    pub supersede_threshold: f32,
    pub promote_positive_feedback: bool,
}

/// Weights of the confidence score.
#[derive(Debug, Clone, Serialize)]
pub struct ConfidenceSettings {
    pub similarity_weight: f32,
    pub agreement_weight: f32,
    pub agreement_saturation: usize,
    pub correction_floor: f32,
    pub no_results_confidence: f32,
}

#[derive(Debug, Clone, Serialize)]
pub struct ServerSettings {
    pub host: String,
    pub port: u16,
    pub cors_allowed_origins: Vec<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct GenerationSettings {
    pub system_prompt: String,
}

/// Typed view over the merged `config.yml` + `secrets.yaml` value.
#[derive(Debug, Clone, Serialize)]
pub struct LeaSettings {
    pub ollama: OllamaSettings,
    pub gateway: GatewaySettings,
    pub chunking: ChunkingSettings,
    pub indexer: IndexerSettings,
    pub retrieval: RetrievalSettings,
    pub corrections: CorrectionSettings,
    pub confidence: ConfidenceSettings,
    pub server: ServerSettings,
    pub generation: GenerationSettings,
}

impl Default for LeaSettings {
    fn default() -> Self {
        Self::from_value(&Value::Null)
    }
}

impl LeaSettings {
    pub fn from_value(config: &Value) -> Self {
        let ollama = config.get("ollama");
        let gateway = config.get("gateway");
        let chunking = config.get("chunking");
        let indexer = config.get("indexer");
        let retrieval = config.get("retrieval");
        let corrections = config.get("corrections");
        let confidence = config.get("confidence");
        let server = config.get("server");
        let generation = config.get("generation");

        let chunk_size = read_u64(chunking, "chunk_size", 500).clamp(16, 100_000) as usize;
        let chunk_overlap =
            (read_u64(chunking, "chunk_overlap", 50) as usize).min(chunk_size.saturating_sub(1));
        let similarity_threshold =
            read_f64(corrections, "similarity_threshold", 0.85).clamp(0.0, 1.0) as f32;

        Self {
            ollama: OllamaSettings {
                base_url: read_string(ollama, "base_url", "http://localhost:11434"),
                llm_model: read_string(ollama, "llm_model", "mistral"),
                embedding_model: read_string(ollama, "embedding_model", "nomic-embed-text"),
                api_key: read_optional_string(ollama, "api_key"),
                embedding_dimension: ollama
                    .and_then(|v| v.get("embedding_dimension"))
                    .and_then(|v| v.as_u64())
                    .map(|v| v as usize),
            },
            gateway: GatewaySettings {
                embed_timeout_ms: read_u64(gateway, "embed_timeout_ms", 120_000).max(1),
                generate_timeout_ms: read_u64(gateway, "generate_timeout_ms", 300_000).max(1),
                max_embed_chars: read_u64(gateway, "max_embed_chars", 8_000).max(16) as usize,
            },
            chunking: ChunkingSettings {
                chunk_size,
                chunk_overlap,
                max_document_chars: read_u64(chunking, "max_document_chars", 100_000).max(16)
                    as usize,
            },
            indexer: IndexerSettings {
                max_attempts: read_u64(indexer, "max_attempts", 3).clamp(1, 20) as u32,
                backoff_base_ms: read_u64(indexer, "backoff_base_ms", 2_000),
                backoff_max_ms: read_u64(indexer, "backoff_max_ms", 30_000),
                concurrency: read_u64(indexer, "concurrency", 2).clamp(1, 64) as usize,
            },
            retrieval: RetrievalSettings {
                top_k: read_u64(retrieval, "top_k", 5).clamp(1, 50) as usize,
                min_similarity: read_f64(retrieval, "min_similarity", 0.3).clamp(-1.0, 1.0) as f32,
                max_context_chars: read_u64(retrieval, "max_context_chars", 6_000).max(64)
                    as usize,
                correction_citation_k: read_u64(retrieval, "correction_citation_k", 2).min(50)
                    as usize,
                append_source_signature: read_bool(retrieval, "append_source_signature", true),
                max_citations: read_u64(retrieval, "max_citations", 5).clamp(1, 50) as usize,
            },
            corrections: CorrectionSettings {
                similarity_threshold,
                supersede_threshold: (read_f64(corrections, "supersede_threshold", 0.95)
                    .clamp(0.0, 1.0) as f32)
                    .max(similarity_threshold),
                promote_positive_feedback: read_bool(
                    corrections,
                    "promote_positive_feedback",
                    false,
                ),
            },
            confidence: ConfidenceSettings {
                similarity_weight: read_unit(confidence, "similarity_weight", 0.7),
                agreement_weight: read_unit(confidence, "agreement_weight", 0.3),
                agreement_saturation: read_u64(confidence, "agreement_saturation", 3).clamp(1, 50)
                    as usize,
                correction_floor: read_unit(confidence, "correction_floor", 0.85),
                no_results_confidence: read_unit(confidence, "no_results_confidence", 0.0),
            },
            server: ServerSettings {
                host: read_string(server, "host", "127.0.0.1"),
                port: read_u64(server, "port", 8000).min(u16::MAX as u64) as u16,
                cors_allowed_origins: server
                    .and_then(|v| v.get("cors_allowed_origins"))
                    .and_then(|v| v.as_array())
                    .map(|items| {
                        items
                            .iter()
                            .filter_map(|item| item.as_str())
                            .map(|item| item.trim().to_string())
                            .filter(|item| !item.is_empty())
                            .collect()
                    })
                    .unwrap_or_default(),
            },
            generation: GenerationSettings {
                system_prompt: read_string(generation, "system_prompt", DEFAULT_SYSTEM_PROMPT),
            },
        }
    }

    /// Environment variables win over file values.
    pub fn with_env_overrides(mut self) -> Self {
        if let Some(url) = non_empty_env("OLLAMA_BASE_URL") {
            self.ollama.base_url = url;
        }
        if let Some(model) = non_empty_env("LLM_MODEL") {
            self.ollama.llm_model = model;
        }
        if let Some(model) = non_empty_env("EMBEDDING_MODEL") {
            self.ollama.embedding_model = model;
        }
        if let Some(port) = non_empty_env("PORT").and_then(|v| v.parse::<u16>().ok()) {
            self.server.port = port;
        }
        self
    }
}

fn non_empty_env(key: &str) -> Option<String> {
    env::var(key).ok().filter(|v| !v.trim().is_empty())
}

fn read_u64(section: Option<&Value>, key: &str, default: u64) -> u64 {
    section
        .and_then(|v| v.get(key))
        .and_then(|v| v.as_u64())
        .unwrap_or(default)
}

fn read_f64(section: Option<&Value>, key: &str, default: f64) -> f64 {
    section
        .and_then(|v| v.get(key))
        .and_then(|v| v.as_f64())
        .filter(|v| v.is_finite())
        .unwrap_or(default)
}

fn read_unit(section: Option<&Value>, key: &str, default: f64) -> f32 {
    read_f64(section, key, default).clamp(0.0, 1.0) as f32
}

fn read_bool(section: Option<&Value>, key: &str, default: bool) -> bool {
    section
        .and_then(|v| v.get(key))
        .and_then(|v| v.as_bool())
        .unwrap_or(default)
}

fn read_string(section: Option<&Value>, key: &str, default: &str) -> String {
    read_optional_string(section, key).unwrap_or_else(|| default.to_string())
}

fn read_optional_string(section: Option<&Value>, key: &str) -> Option<String> {
    section
        .and_then(|v| v.get(key))
        .and_then(|v| v.as_str())
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(str::to_string)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn defaults_follow_documented_values() {
        let settings = LeaSettings::default();
        assert_eq!(settings.ollama.llm_model, "mistral");
        assert_eq!(settings.ollama.embedding_model, "nomic-embed-text");
        assert_eq!(settings.chunking.chunk_size, 500);
        assert_eq!(settings.chunking.chunk_overlap, 50);
        assert_eq!(settings.gateway.max_embed_chars, 8_000);
        assert_eq!(settings.gateway.embed_timeout(), Duration::from_secs(120));
        assert_eq!(settings.indexer.max_attempts, 3);
        assert!((settings.corrections.similarity_threshold - 0.85).abs() < 1e-6);
        assert!((settings.corrections.supersede_threshold - 0.95).abs() < 1e-6);
        assert!(settings.retrieval.append_source_signature);
        assert!(!settings.corrections.promote_positive_feedback);
    }

    #[test]
    fn supersede_threshold_never_drops_below_match_threshold() {
        let settings = LeaSettings::from_value(&json!({
            "corrections": { "similarity_threshold": 0.9, "supersede_threshold": 0.5 }
        }));
        assert!((settings.corrections.supersede_threshold - 0.9).abs() < 1e-6);
    }

    #[test]
    fn values_are_read_and_clamped() {
        let settings = LeaSettings::from_value(&json!({
            "chunking": { "chunk_size": 100, "chunk_overlap": 400 },
            "retrieval": { "top_k": 500, "min_similarity": 0.5 },
            "confidence": { "correction_floor": 2.0 },
            "server": { "cors_allowed_origins": ["http://localhost:3000", " "] }
        }));
        assert_eq!(settings.chunking.chunk_size, 100);
        assert_eq!(settings.chunking.chunk_overlap, 99);
        assert_eq!(settings.retrieval.top_k, 50);
        assert!((settings.retrieval.min_similarity - 0.5).abs() < 1e-6);
        assert!((settings.confidence.correction_floor - 1.0).abs() < 1e-6);
        assert_eq!(
            settings.server.cors_allowed_origins,
            vec!["http://localhost:3000".to_string()]
        );
    }

    #[test]
    fn api_key_is_never_serialized() {
        let settings = LeaSettings::from_value(&json!({ "ollama": { "api_key": "secret" } }));
        assert_eq!(settings.ollama.api_key.as_deref(), Some("secret"));
        let value = serde_json::to_value(&settings).unwrap();
        assert!(value["ollama"].get("api_key").is_none());
    }
}
