//! Similarity ranking shared by every store backend.
//!
//! Backends hand [`rank_similar`] their embedded chunks in insertion order;
//! the function scores, filters, sorts, and truncates them so that every
//! backend returns the same deterministic ordering.
//!
//! # Ranking
//!
//! 1. `similarity = cosine_similarity(embedding, query)` (i.e. `1 - cosine_distance`).
//! 2. Keep `similarity > min_similarity` (strict).
//! 3. Stable sort by similarity, descending; ties keep insertion order.
//! 4. Truncate to `limit`.

use serde::Serialize;

use crate::embedding::cosine_similarity;

/// Default similarity threshold for question answering.
pub const DEFAULT_MIN_SIMILARITY: f64 = 0.3;

/// Default number of chunks fed to generation.
pub const DEFAULT_LIMIT: usize = 5;

/// A ranked search hit.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SimilarChunk {
    pub path: String,
    pub text: String,
    pub similarity: f64,
}

/// An embedded chunk as read from a backend, before scoring.
#[derive(Debug, Clone)]
pub struct EmbeddedChunk<'a> {
    pub path: &'a str,
    pub text: &'a str,
    pub embedding: &'a [f32],
}

/// Score and rank candidates against `query`.
///
/// `candidates` must be in insertion order; it is the tie-breaker.
pub fn rank_similar<'a, I>(
    candidates: I,
    query: &[f32],
    min_similarity: f64,
    limit: usize,
) -> Vec<SimilarChunk>
where
    I: IntoIterator<Item = EmbeddedChunk<'a>>,
{
    let mut scored: Vec<SimilarChunk> = candidates
        .into_iter()
        .filter_map(|c| {
            let similarity = cosine_similarity(c.embedding, query) as f64;
            (similarity > min_similarity).then(|| SimilarChunk {
                path: c.path.to_string(),
                text: c.text.to_string(),
                similarity,
            })
        })
        .collect();

    // sort_by is stable, so equal scores keep insertion order
    scored.sort_by(|a, b| {
        b.similarity
            .partial_cmp(&a.similarity)
            .unwrap_or(std::cmp::Ordering::Equal)
    });
    scored.truncate(limit);
    scored
}
