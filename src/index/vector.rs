//! Flat cosine-similarity index over embedded chunks.

use super::IndexError;
use crate::document::Chunk;
use serde::{Deserialize, Serialize};

/// Chunk stored alongside its embedding.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IndexEntry {
    /// Indexed chunk.
    pub chunk: Chunk,
    /// Embedding of `chunk.text`.
    pub vector: Vec<f32>,
}

/// Chunk returned by a similarity search.
#[derive(Debug, Clone)]
pub struct RetrievedChunk {
    /// Matching chunk.
    pub chunk: Chunk,
    /// Cosine similarity to the query vector.
    pub score: f32,
}

/// Brute-force vector index. Immutable once built.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct VectorIndex {
    dimension: usize,
    entries: Vec<IndexEntry>,
}

impl VectorIndex {
    /// Pair chunks with their embeddings, validating counts and a uniform dimension.
    pub fn build(chunks: Vec<Chunk>, vectors: Vec<Vec<f32>>) -> Result<Self, IndexError> {
        if chunks.len() != vectors.len() {
            return Err(IndexError::Build(format!(
                "{} chunks but {} vectors",
                chunks.len(),
                vectors.len()
            )));
        }

        let dimension = vectors.first().map(Vec::len).unwrap_or_default();
        if let Some(bad) = vectors.iter().find(|vector| vector.len() != dimension) {
            return Err(IndexError::DimensionMismatch {
                expected: dimension,
                actual: bad.len(),
            });
        }

        let entries = chunks
            .into_iter()
            .zip(vectors)
            .map(|(chunk, vector)| IndexEntry { chunk, vector })
            .collect();
        Ok(Self { dimension, entries })
    }

    /// Number of indexed chunks.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the index holds no chunks.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Vector dimension shared by every entry (0 for an empty index).
    pub fn dimension(&self) -> usize {
        self.dimension
    }

    /// Return up to `k` chunks ordered by descending cosine similarity.
    pub fn search(&self, query: &[f32], k: usize) -> Result<Vec<RetrievedChunk>, IndexError> {
        if self.entries.is_empty() || k == 0 {
            return Ok(Vec::new());
        }
        if query.len() != self.dimension {
            return Err(IndexError::DimensionMismatch {
                expected: self.dimension,
                actual: query.len(),
            });
        }

        let query_norm = l2_norm(query);
        let mut scored: Vec<(usize, f32)> = self
            .entries
            .iter()
            .enumerate()
            .map(|(position, entry)| {
                (position, cosine_similarity(query, &entry.vector, query_norm))
            })
            .collect();
        // Ties keep insertion order so results are stable across runs.
        scored.sort_by(|a, b| b.1.total_cmp(&a.1).then(a.0.cmp(&b.0)));

        Ok(scored
            .into_iter()
            .take(k)
            .map(|(position, score)| RetrievedChunk {
                chunk: self.entries[position].chunk.clone(),
                score,
            })
            .collect())
    }
}

fn l2_norm(vector: &[f32]) -> f32 {
    vector.iter().map(|x| x * x).sum::<f32>().sqrt()
}

fn cosine_similarity(query: &[f32], candidate: &[f32], query_norm: f32) -> f32 {
    let candidate_norm = l2_norm(candidate);
    if query_norm == 0.0 || candidate_norm == 0.0 {
        return 0.0;
    }
    let dot: f32 = query.iter().zip(candidate).map(|(x, y)| x * y).sum();
    dot / (query_norm * candidate_norm)
}
