use crate::core::errors::ApiError;

/// Cosine similarity of two equal-length vectors. A zero-norm side scores 0.
pub fn cosine_similarity(query: &[f32], candidate: &[f32]) -> Result<f32, ApiError> {
    if query.is_empty() || candidate.is_empty() {
        return Err(ApiError::BadRequest("Vectors must not be empty".to_string()));
    }
    if query.len() != candidate.len() {
        return Err(dimension_mismatch(query.len(), candidate.len()));
    }

    let dot: f32 = query.iter().zip(candidate).map(|(a, b)| a * b).sum();
    let denom = l2_norm(query) * l2_norm(candidate);
    if denom <= f32::EPSILON {
        return Ok(0.0);
    }

    Ok((dot / denom).clamp(-1.0, 1.0))
}

pub fn dimension_mismatch(expected: usize, actual: usize) -> ApiError {
    ApiError::Configuration(format!(
        "Embedding dimension mismatch: expected {}, got {}",
        expected, actual
    ))
}

pub fn encode_embedding(embedding: &[f32]) -> Vec<u8> {
    embedding.iter().flat_map(|f| f.to_le_bytes()).collect()
}

pub fn decode_embedding(bytes: &[u8]) -> Result<Vec<f32>, ApiError> {
    if bytes.len() % 4 != 0 {
        return Err(ApiError::Persistence(format!(
            "Corrupt embedding blob of {} bytes",
            bytes.len()
        )));
    }
    Ok(bytes
        .chunks_exact(4)
        .map(|chunk| f32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]))
        .collect())
}

fn l2_norm(values: &[f32]) -> f32 {
    values.iter().map(|v| v * v).sum::<f32>().sqrt()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cosine_of_parallel_and_orthogonal_vectors() {
        let a = [1.0, 0.0, 0.0];
        let b = [2.0, 0.0, 0.0];
        let c = [0.0, 3.0, 0.0];
        assert!((cosine_similarity(&a, &b).unwrap() - 1.0).abs() < 1e-6);
        assert!(cosine_similarity(&a, &c).unwrap().abs() < 1e-6);
    }

    #[test]
    fn mismatched_lengths_are_a_configuration_error() {
        let err = cosine_similarity(&[1.0, 0.0], &[1.0, 0.0, 0.0]).unwrap_err();
        assert!(matches!(err, ApiError::Configuration(_)));
    }

    #[test]
    fn zero_vector_scores_zero() {
        assert_eq!(cosine_similarity(&[0.0, 0.0], &[1.0, 1.0]).unwrap(), 0.0);
    }

    #[test]
    fn blob_decoding_rejects_truncated_bytes() {
        let blob = encode_embedding(&[0.25, -1.5]);
        assert_eq!(decode_embedding(&blob).unwrap(), vec![0.25, -1.5]);
        assert!(decode_embedding(&blob[..7]).is_err());
    }
}
