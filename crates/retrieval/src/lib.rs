//! Showdown Retrieval
//!
//! Provides four retrieval modes over one ChunkSet:
//! - Vector search (embedding similarity to the query)
//! - Entity search (mention counts of query entities)
//! - Context search (neighbours of the best match in the closest chunk block)
//! - Hybrid search (weighted blend of vector and entity scores)
//!
//! The comparator runs the selected modes side by side and measures
//! latency, uniqueness and overlap.

mod context;
mod entity;
mod hybrid;
mod vector;

pub mod comparator;

pub use comparator::{RetrievalAnalysis, RetrievalComparison, RetrievalMethodComparator};
pub use context::ContextRetriever;
pub use entity::EntityRetriever;
pub use hybrid::HybridRetriever;
pub use vector::VectorRetriever;

use showdown_common::embeddings::cosine_similarity;
use showdown_common::errors::{AppError, Result};
use showdown_common::models::{ChunkSet, EntityIndex, MethodStatus, RetrievalMethod, ScoredChunk};

/// Chunk embeddings computed once per comparison
///
/// Consecutive chunks are grouped into blocks of `block_size`, each summarized
/// by its mean vector, so a query can be routed to one block before any
/// chunk is scored.
#[derive(Debug, Clone)]
pub struct Embeddings {
    /// One vector per chunk, in chunk order
    pub chunks: Vec<Vec<f32>>,
    pub centroids: Vec<Vec<f32>>,
    pub block_size: usize,
}

impl Embeddings {
    /// Index `chunks` in blocks of about the square root of their count
    pub fn new(chunks: Vec<Vec<f32>>) -> Self {
        let block_size = ((chunks.len() as f64).sqrt().ceil() as usize).max(1);
        Self::with_block_size(chunks, block_size)
    }

    pub fn with_block_size(chunks: Vec<Vec<f32>>, block_size: usize) -> Self {
        let block_size = block_size.max(1);
        let centroids = chunks.chunks(block_size).map(mean).collect();
        Self {
            chunks,
            centroids,
            block_size,
        }
    }

    /// Chunk indices of block `block`
    pub fn block(&self, block: usize) -> std::ops::Range<usize> {
        let start = (block * self.block_size).min(self.chunks.len());
        start..(start + self.block_size).min(self.chunks.len())
    }
}

fn mean(vectors: &[Vec<f32>]) -> Vec<f32> {
    let dimension = vectors.iter().map(Vec::len).max().unwrap_or(0);
    let mut sum = vec![0.0f32; dimension];
    for vector in vectors {
        for (acc, x) in sum.iter_mut().zip(vector) {
            *acc += x;
        }
    }
    let n = vectors.len().max(1) as f32;
    sum.into_iter().map(|x| x / n).collect()
}

/// Chunk embeddings paired with one method's query embedding
#[derive(Debug, Clone, Copy)]
pub struct QueryVectors<'a> {
    pub index: &'a Embeddings,
    pub query: &'a [f32],
}

/// Everything a retriever may consult
#[derive(Clone, Copy)]
pub struct RetrievalInput<'a> {
    pub chunks: &'a ChunkSet,
    pub index: &'a EntityIndex,

    /// Canonical names of indexed entities the query mentions
    pub query_entities: &'a [String],

    /// Absent when the embedding collaborator failed
    pub embeddings: Option<QueryVectors<'a>>,
}

/// Ranked output of a single retriever
#[derive(Debug, Clone)]
pub struct Retrieved {
    pub ranked: Vec<ScoredChunk>,
    pub status: MethodStatus,
    pub note: Option<String>,
}

impl Retrieved {
    pub fn ok(ranked: Vec<ScoredChunk>) -> Self {
        Self {
            ranked,
            status: MethodStatus::Ok,
            note: None,
        }
    }
}

/// Common trait for all retrievers
pub trait Retriever: Send + Sync {
    /// Rank chunks for the query, best first, at most `top_k`
    fn retrieve(&self, input: &RetrievalInput<'_>, top_k: usize) -> Result<Retrieved>;

    fn method(&self) -> RetrievalMethod;
}

/// Sort by descending score, ties by ascending chunk id, keep `top_k`
pub(crate) fn rank(mut scored: Vec<ScoredChunk>, top_k: usize) -> Vec<ScoredChunk> {
    scored.sort_by(|a, b| b.score.total_cmp(&a.score).then(a.chunk_id.cmp(&b.chunk_id)));
    scored.truncate(top_k);
    scored
}

pub(crate) fn require_embeddings<'a>(
    input: &RetrievalInput<'a>,
    method: RetrievalMethod,
) -> Result<QueryVectors<'a>> {
    input.embeddings.ok_or_else(|| AppError::EmbeddingUnavailable {
        message: format!("{} retrieval needs embeddings", method),
    })
}

/// Cosine similarity of every chunk to the query, in chunk order
pub(crate) fn similarities(input: &RetrievalInput<'_>, vectors: QueryVectors<'_>) -> Vec<ScoredChunk> {
    input
        .chunks
        .chunks
        .iter()
        .zip(&vectors.index.chunks)
        .map(|(chunk, vector)| ScoredChunk {
            chunk_id: chunk.id,
            score: cosine_similarity(vector, vectors.query),
        })
        .collect()
}

/// Sum of query-entity mentions per chunk, in chunk order
pub(crate) fn entity_counts(input: &RetrievalInput<'_>) -> Vec<ScoredChunk> {
    input
        .chunks
        .chunks
        .iter()
        .map(|chunk| ScoredChunk {
            chunk_id: chunk.id,
            score: input
                .query_entities
                .iter()
                .map(|e| input.index.mentions(chunk.id, e))
                .sum::<u32>() as f32,
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_blocks_cover_every_chunk() {
        let vectors: Vec<Vec<f32>> = (0..10).map(|i| vec![i as f32, 1.0]).collect();
        let index = Embeddings::new(vectors);
        assert_eq!(index.block_size, 4);
        assert_eq!(index.centroids.len(), 3);
        assert_eq!(index.block(2), 8..10);
        assert_eq!(index.centroids[0], vec![1.5, 1.0]);
        assert_eq!(index.centroids[2], vec![8.5, 1.0]);
    }
}
