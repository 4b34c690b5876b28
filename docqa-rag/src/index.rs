//! In-memory vector index using cosine similarity.
//!
//! [`VectorIndex`] is built once per request from parallel chunk and vector
//! lists and is read-only afterwards, so concurrent searches need no locking.

use std::cmp::Ordering;

use tracing::debug;

use crate::document::{Chunk, SearchResult};
use crate::error::{RagError, Result};

/// Compute cosine similarity between two vectors.
///
/// Returns 0.0 if either vector has zero magnitude.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    let dot: f32 = a.iter().zip(b.iter()).map(|(x, y)| x * y).sum();
    let norm_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }
    dot / (norm_a * norm_b)
}

#[derive(Debug)]
struct Entry {
    chunk: Chunk,
    vector: Vec<f32>,
    norm: f32,
}

/// An immutable index from chunk position to (vector, chunk).
#[derive(Debug)]
pub struct VectorIndex {
    entries: Vec<Entry>,
    dimensions: usize,
}

impl VectorIndex {
    /// Build an index from parallel chunk and vector lists.
    ///
    /// # Errors
    ///
    /// Returns [`RagError::PipelineError`] if the lists differ in length, and
    /// [`RagError::DimensionMismatchError`] if the vectors do not all share one
    /// dimensionality.
    pub fn build(chunks: Vec<Chunk>, vectors: Vec<Vec<f32>>) -> Result<Self> {
        if chunks.len() != vectors.len() {
            return Err(RagError::PipelineError(format!(
                "index needs one vector per chunk: {} chunks, {} vectors",
                chunks.len(),
                vectors.len()
            )));
        }

        let dimensions = vectors.first().map_or(0, Vec::len);
        let mut entries = Vec::with_capacity(chunks.len());
        for (position, (chunk, vector)) in chunks.into_iter().zip(vectors).enumerate() {
            if vector.len() != dimensions {
                return Err(RagError::DimensionMismatchError {
                    expected: dimensions,
                    found: vector.len(),
                    position,
                });
            }
            let norm = vector.iter().map(|x| x * x).sum::<f32>().sqrt();
            entries.push(Entry { chunk, vector, norm });
        }

        debug!(chunk_count = entries.len(), dimensions, "built vector index");
        Ok(Self { entries, dimensions })
    }

    /// Number of indexed chunks.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the index holds no chunks.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Dimensionality shared by all indexed vectors.
    pub fn dimensions(&self) -> usize {
        self.dimensions
    }

    /// Indexed chunks in sequence order.
    pub fn chunks(&self) -> impl Iterator<Item = &Chunk> {
        self.entries.iter().map(|e| &e.chunk)
    }

    /// Return up to `k` chunks whose cosine similarity to `query` is at least
    /// `min_score`, by descending score. Equal scores keep sequence order.
    ///
    /// An empty result is a valid outcome.
    ///
    /// # Errors
    ///
    /// Returns [`RagError::DimensionMismatchError`] if `query` has a different
    /// dimensionality than the index.
    pub fn search(&self, query: &[f32], k: usize, min_score: f32) -> Result<Vec<SearchResult>> {
        if self.entries.is_empty() || k == 0 {
            return Ok(Vec::new());
        }
        if query.len() != self.dimensions {
            return Err(RagError::DimensionMismatchError {
                expected: self.dimensions,
                found: query.len(),
                position: usize::MAX,
            });
        }

        let query_norm = query.iter().map(|x| x * x).sum::<f32>().sqrt();
        let mut scored: Vec<(usize, f32)> = self
            .entries
            .iter()
            .enumerate()
            .map(|(i, e)| {
                let score = if e.norm == 0.0 || query_norm == 0.0 {
                    0.0
                } else {
                    let dot: f32 = e.vector.iter().zip(query).map(|(x, y)| x * y).sum();
                    dot / (e.norm * query_norm)
                };
                (i, score)
            })
            .filter(|(_, score)| *score >= min_score)
            .collect();

        scored.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(Ordering::Equal).then(a.0.cmp(&b.0)));
        scored.truncate(k);

        Ok(scored
            .into_iter()
            .map(|(i, score)| SearchResult { chunk: self.entries[i].chunk.clone(), score })
            .collect())
    }
}
