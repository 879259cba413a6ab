use ndarray::{Array1, ArrayView1};

use crate::core::errors::EngineError;

/// Cosine similarity in [-1, 1]. A zero-norm operand yields 0.0 rather than
/// NaN so degenerate embeddings never poison a ranking.
pub fn cosine_similarity(query: &[f32], candidate: &[f32]) -> Result<f32, EngineError> {
    if query.len() != candidate.len() {
        return Err(EngineError::DimensionMismatch {
            expected: query.len(),
            actual: candidate.len(),
        });
    }
    if query.is_empty() {
        return Err(EngineError::BadRequest(
            "vectors must not be empty".to_string(),
        ));
    }

    let query = ArrayView1::from(query);
    let candidate = ArrayView1::from(candidate);

    let dot = query.dot(&candidate);
    let denom = query.dot(&query).sqrt() * candidate.dot(&candidate).sqrt();
    if denom <= f32::EPSILON {
        return Ok(0.0);
    }

    Ok((dot / denom).clamp(-1.0, 1.0))
}

/// Element-wise mean of equally sized vectors, used to fold chunk embeddings
/// into one document-level embedding.
pub fn mean_pool(vectors: &[Vec<f32>]) -> Result<Vec<f32>, EngineError> {
    let first = vectors.first().ok_or_else(|| {
        EngineError::BadRequest("cannot pool an empty vector set".to_string())
    })?;
    let dim = first.len();
    if dim == 0 {
        return Err(EngineError::BadRequest(
            "vectors must not be empty".to_string(),
        ));
    }

    let mut acc = Array1::<f32>::zeros(dim);
    for vector in vectors {
        if vector.len() != dim {
            return Err(EngineError::DimensionMismatch {
                expected: dim,
                actual: vector.len(),
            });
        }
        acc += &ArrayView1::from(vector.as_slice());
    }
    acc /= vectors.len() as f32;

    Ok(acc.to_vec())
}
