//! Embedding gateway trait and vector utilities.
//!
//! Defines the [`Embedder`] capability that every embedding backend
//! implements, plus pure helpers for vector serialization and similarity.
//!
//! Concrete providers (Workers AI, OpenAI) live in the `repo-rag` app crate.

use async_trait::async_trait;

use crate::error::{RagError, Result};

/// Dimensionality of every stored embedding.
pub const EMBEDDING_DIMS: usize = 1024;

/// Turns text into fixed-dimension vectors.
///
/// Implementations return exactly one vector per input text, in input
/// order. Upstream failures are reported as [`RagError::Embedding`], which
/// callers treat as retryable.
#[async_trait]
pub trait Embedder: Send + Sync {
    /// Returns the model identifier (e.g. `"@cf/baai/bge-large-en-v1.5"`).
    fn model_name(&self) -> &str;

    /// Returns the embedding vector dimensionality.
    fn dims(&self) -> usize {
        EMBEDDING_DIMS
    }

    /// Embed a batch of texts.
    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>>;
}

/// Check an embedder response against the request it answered.
pub fn check_embeddings(vectors: &[Vec<f32>], expected_count: usize, dims: usize) -> Result<()> {
    if vectors.len() != expected_count {
        return Err(RagError::Embedding(format!(
            "expected {} vectors, got {}",
            expected_count,
            vectors.len()
        )));
    }
    if let Some(bad) = vectors.iter().find(|v| v.len() != dims) {
        return Err(RagError::Embedding(format!(
            "expected {}-dimensional vectors, got {}",
            dims,
            bad.len()
        )));
    }
    Ok(())
}

/// Encode a float vector as a BLOB (little-endian f32 bytes).
///
/// ```rust
/// use repo_rag_core::embedding::{blob_to_vec, vec_to_blob};
///
/// let stored = vec_to_blob(&[0.25, -1.0]);
/// assert_eq!(stored.len(), 8);
/// assert_eq!(blob_to_vec(&stored), vec![0.25, -1.0]);
/// ```
pub fn vec_to_blob(vector: &[f32]) -> Vec<u8> {
    vector.iter().flat_map(|x| x.to_le_bytes()).collect()
}

/// Inverse of [`vec_to_blob`]. Trailing bytes that do not form a whole
/// `f32` are ignored.
pub fn blob_to_vec(blob: &[u8]) -> Vec<f32> {
    blob.chunks_exact(4)
        .map(|bytes| {
            let mut word = [0u8; 4];
            word.copy_from_slice(bytes);
            f32::from_le_bytes(word)
        })
        .collect()
}

/// Cosine similarity, i.e. `1 - cosine_distance`, in `[-1.0, 1.0]`.
///
/// Mismatched lengths, empty input and zero-norm vectors score `0.0`.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.is_empty() || a.len() != b.len() {
        return 0.0;
    }

    let (dot, sq_a, sq_b) = a
        .iter()
        .zip(b)
        .fold((0.0f32, 0.0f32, 0.0f32), |(dot, sq_a, sq_b), (x, y)| {
            (dot + x * y, sq_a + x * x, sq_b + y * y)
        });

    let norms = (sq_a * sq_b).sqrt();
    if norms < f32::EPSILON {
        0.0
    } else {
        dot / norms
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_blob_length_matches_dims() {
        let v = vec![0.5f32; EMBEDDING_DIMS];
        assert_eq!(vec_to_blob(&v).len(), EMBEDDING_DIMS * 4);
        assert_eq!(blob_to_vec(&vec_to_blob(&v)), v);
    }

    #[test]
    fn test_cosine_matches_direction_not_magnitude() {
        let query: Vec<f32> = (0..EMBEDDING_DIMS).map(|i| (i % 7) as f32).collect();
        let scaled: Vec<f32> = query.iter().map(|x| x * 3.0).collect();
        let flipped: Vec<f32> = query.iter().map(|x| -x).collect();

        assert!((cosine_similarity(&query, &scaled) - 1.0).abs() < 1e-5);
        assert!((cosine_similarity(&query, &flipped) + 1.0).abs() < 1e-5);
    }

    #[test]
    fn test_cosine_of_disjoint_axes_is_zero() {
        let mut a = vec![0.0; EMBEDDING_DIMS];
        let mut b = vec![0.0; EMBEDDING_DIMS];
        a[0] = 1.0;
        b[1] = 1.0;
        assert_eq!(cosine_similarity(&a, &b), 0.0);
    }

    #[test]
    fn test_cosine_degenerate_inputs() {
        assert_eq!(cosine_similarity(&[], &[]), 0.0);
        assert_eq!(cosine_similarity(&[1.0, 2.0], &[1.0]), 0.0);
        assert_eq!(cosine_similarity(&[0.0, 0.0], &[1.0, 0.0]), 0.0);
    }

    #[test]
    fn test_check_embeddings_rejects_count_and_dim_mismatch() {
        let ok = vec![vec![0.0; 4], vec![1.0; 4]];
        assert!(check_embeddings(&ok, 2, 4).is_ok());

        let err = check_embeddings(&ok, 3, 4).unwrap_err();
        assert!(matches!(err, RagError::Embedding(_)));

        let short = vec![vec![0.0; 4], vec![1.0; 3]];
        assert!(matches!(
            check_embeddings(&short, 2, 4),
            Err(RagError::Embedding(_))
        ));
    }
}
