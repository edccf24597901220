use serde_json::{Map, Value};

use crate::core::errors::ApiError;

pub fn validate_config(config: &Value) -> Result<(), ApiError> {
    let root = config
        .as_object()
        .ok_or_else(|| config_type_error("root", "object"))?;

    if let Some(ollama) = expect_optional_object(root, "ollama")? {
        validate_optional_string_field(ollama, "ollama.base_url", "base_url")?;
        validate_optional_string_field(ollama, "ollama.llm_model", "llm_model")?;
        validate_optional_string_field(ollama, "ollama.embedding_model", "embedding_model")?;
        validate_optional_string_field(ollama, "ollama.api_key", "api_key")?;
        validate_u64_field(
            ollama,
            "ollama.embedding_dimension",
            "embedding_dimension",
            1,
            65_536,
        )?;
    }

    if let Some(gateway) = expect_optional_object(root, "gateway")? {
        validate_u64_field(
            gateway,
            "gateway.embed_timeout_ms",
            "embed_timeout_ms",
            1,
            3_600_000,
        )?;
        validate_u64_field(
            gateway,
            "gateway.generate_timeout_ms",
            "generate_timeout_ms",
            1,
            3_600_000,
        )?;
        validate_u64_field(
            gateway,
            "gateway.max_embed_chars",
            "max_embed_chars",
            16,
            1_000_000,
        )?;
    }

    if let Some(chunking) = expect_optional_object(root, "chunking")? {
        validate_u64_field(chunking, "chunking.chunk_size", "chunk_size", 16, 100_000)?;
        validate_u64_field(
            chunking,
            "chunking.chunk_overlap",
            "chunk_overlap",
            0,
            99_999,
        )?;
        validate_u64_field(
            chunking,
            "chunking.max_document_chars",
            "max_document_chars",
            16,
            50_000_000,
        )?;

        let size = chunking.get("chunk_size").and_then(Value::as_u64);
        let overlap = chunking.get("chunk_overlap").and_then(Value::as_u64);
        if let (Some(size), Some(overlap)) = (size, overlap) {
            if overlap >= size {
                return Err(ApiError::Configuration(
                    "Invalid config at 'chunking.chunk_overlap': must be smaller than chunk_size"
                        .to_string(),
                ));
            }
        }
    }

    if let Some(indexer) = expect_optional_object(root, "indexer")? {
        validate_u64_field(indexer, "indexer.max_attempts", "max_attempts", 1, 20)?;
        validate_u64_field(
            indexer,
            "indexer.backoff_base_ms",
            "backoff_base_ms",
            0,
            600_000,
        )?;
        validate_u64_field(
            indexer,
            "indexer.backoff_max_ms",
            "backoff_max_ms",
            0,
            3_600_000,
        )?;
        validate_u64_field(indexer, "indexer.concurrency", "concurrency", 1, 64)?;
    }

    if let Some(retrieval) = expect_optional_object(root, "retrieval")? {
        validate_u64_field(retrieval, "retrieval.top_k", "top_k", 1, 50)?;
        validate_f64_field(
            retrieval,
            "retrieval.min_similarity",
            "min_similarity",
            -1.0,
            1.0,
        )?;
        validate_u64_field(
            retrieval,
            "retrieval.max_context_chars",
            "max_context_chars",
            64,
            1_000_000,
        )?;
        validate_u64_field(
            retrieval,
            "retrieval.correction_citation_k",
            "correction_citation_k",
            0,
            50,
        )?;
        validate_u64_field(retrieval, "retrieval.max_citations", "max_citations", 1, 50)?;
        validate_bool_field(
            retrieval,
            "retrieval.append_source_signature",
            "append_source_signature",
        )?;
    }

    if let Some(corrections) = expect_optional_object(root, "corrections")? {
        validate_f64_field(
            corrections,
            "corrections.similarity_threshold",
            "similarity_threshold",
            0.0,
            1.0,
        )?;
        validate_f64_field(
            corrections,
            "corrections.supersede_threshold",
            "supersede_threshold",
            0.0,
            1.0,
        )?;
        validate_bool_field(
            corrections,
            "corrections.promote_positive_feedback",
            "promote_positive_feedback",
        )?;
    }

    if let Some(confidence) = expect_optional_object(root, "confidence")? {
        for key in [
            "similarity_weight",
            "agreement_weight",
            "correction_floor",
            "no_results_confidence",
        ] {
            validate_f64_field(confidence, &format!("confidence.{}", key), key, 0.0, 1.0)?;
        }
        validate_u64_field(
            confidence,
            "confidence.agreement_saturation",
            "agreement_saturation",
            1,
            50,
        )?;
    }

    if let Some(server) = expect_optional_object(root, "server")? {
        validate_optional_string_field(server, "server.host", "host")?;
        validate_u64_field(server, "server.port", "port", 0, 65_535)?;
        validate_string_array_field(
            server,
            "server.cors_allowed_origins",
            "cors_allowed_origins",
        )?;
    }

    if let Some(generation) = expect_optional_object(root, "generation")? {
        validate_optional_string_field(generation, "generation.system_prompt", "system_prompt")?;
    }

    Ok(())
}

fn expect_optional_object<'a>(
    root: &'a Map<String, Value>,
    key: &str,
) -> Result<Option<&'a Map<String, Value>>, ApiError> {
    match root.get(key) {
        Some(Value::Object(map)) => Ok(Some(map)),
        Some(_) => Err(config_type_error(key, "object")),
        None => Ok(None),
    }
}

fn validate_bool_field(
    section: &Map<String, Value>,
    path: &str,
    key: &str,
) -> Result<(), ApiError> {
    let Some(value) = section.get(key) else {
        return Ok(());
    };
    if value.as_bool().is_some() {
        return Ok(());
    }
    Err(config_type_error(path, "boolean"))
}

fn validate_u64_field(
    section: &Map<String, Value>,
    path: &str,
    key: &str,
    min: u64,
    max: u64,
) -> Result<(), ApiError> {
    let Some(value) = section.get(key) else {
        return Ok(());
    };
    let Some(number) = value.as_u64() else {
        return Err(config_type_error(path, "integer"));
    };
    if number < min || number > max {
        return Err(ApiError::Configuration(format!(
            "Invalid config at '{}': must be between {} and {}",
            path, min, max
        )));
    }
    Ok(())
}

fn validate_f64_field(
    section: &Map<String, Value>,
    path: &str,
    key: &str,
    min: f64,
    max: f64,
) -> Result<(), ApiError> {
    let Some(value) = section.get(key) else {
        return Ok(());
    };
    let Some(number) = value.as_f64() else {
        return Err(config_type_error(path, "number"));
    };
    if !number.is_finite() || number < min || number > max {
        return Err(ApiError::Configuration(format!(
            "Invalid config at '{}': must be between {} and {}",
            path, min, max
        )));
    }
    Ok(())
}

fn validate_optional_string_field(
    section: &Map<String, Value>,
    path: &str,
    key: &str,
) -> Result<(), ApiError> {
    let Some(value) = section.get(key) else {
        return Ok(());
    };
    if value.as_str().is_none() {
        return Err(config_type_error(path, "string"));
    }
    Ok(())
}

fn validate_string_array_field(
    section: &Map<String, Value>,
    path: &str,
    key: &str,
) -> Result<(), ApiError> {
    let Some(value) = section.get(key) else {
        return Ok(());
    };
    let Some(items) = value.as_array() else {
        return Err(config_type_error(path, "array of strings"));
    };
    for (index, item) in items.iter().enumerate() {
        let Some(text) = item.as_str() else {
            return Err(config_type_error(&format!("{}[{}]", path, index), "string"));
        };
        if text.trim().is_empty() {
            return Err(ApiError::Configuration(format!(
                "Invalid config at '{}[{}]': value cannot be empty",
                path, index
            )));
        }
    }
    Ok(())
}

fn config_type_error(path: &str, expected: &str) -> ApiError {
    ApiError::Configuration(format!(
        "Invalid config at '{}': expected {}",
        path, expected
    ))
}
