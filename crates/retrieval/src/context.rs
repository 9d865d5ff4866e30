//! Context-window retrieval
//!
//! Routes the query to the closest chunk block, takes the best match inside
//! it as the anchor and returns the anchor with its neighbours. Only the
//! block centroids and one block are scored, trading recall for latency.

use super::{rank, require_embeddings, RetrievalInput, Retrieved, Retriever};
use showdown_common::embeddings::cosine_similarity;
use showdown_common::errors::Result;
use showdown_common::models::{RetrievalMethod, ScoredChunk};

/// Score multiplier per chunk of distance from the anchor
const DISTANCE_DECAY: f32 = 0.8;

/// Anchor-plus-neighbours retriever
#[derive(Debug, Clone, Copy)]
pub struct ContextRetriever {
    /// Neighbours taken on each side of the anchor
    pub radius: usize,
}

impl ContextRetriever {
    pub fn new(radius: usize) -> Self {
        Self { radius }
    }
}

impl Retriever for ContextRetriever {
    fn retrieve(&self, input: &RetrievalInput<'_>, top_k: usize) -> Result<Retrieved> {
        let vectors = require_embeddings(input, self.method())?;
        let chunks = &input.chunks.chunks;

        let Some(block) = best(vectors.index.centroids.iter().enumerate(), vectors.query) else {
            return Ok(Retrieved::ok(Vec::new()));
        };
        let members = vectors.index.block(block);
        let in_block = members.clone().zip(&vectors.index.chunks[members]);
        let Some(anchor) = best(in_block.filter(|(i, _)| *i < chunks.len()), vectors.query) else {
            return Ok(Retrieved::ok(Vec::new()));
        };

        let low = anchor.saturating_sub(self.radius);
        let high = (anchor + self.radius).min(chunks.len() - 1);
        let window = (low..=high)
            .map(|i| ScoredChunk {
                chunk_id: chunks[i].id,
                score: DISTANCE_DECAY.powi(i.abs_diff(anchor) as i32),
            })
            .collect();

        Ok(Retrieved::ok(rank(window, top_k)))
    }

    fn method(&self) -> RetrievalMethod {
        RetrievalMethod::Context
    }
}

/// Index of the vector most similar to `query`; ties go to the lower index
fn best<'v>(vectors: impl Iterator<Item = (usize, &'v Vec<f32>)>, query: &[f32]) -> Option<usize> {
    let mut top: Option<(usize, f32)> = None;
    for (i, vector) in vectors {
        let score = cosine_similarity(vector, query);
        if top.map_or(true, |(_, best)| score > best) {
            top = Some((i, score));
        }
    }
    top.map(|(i, _)| i)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{Embeddings, QueryVectors};
    use showdown_common::models::{Chunk, ChunkMetrics, ChunkSet, ChunkingStrategy, EntityIndex};

    fn chunk_set(n: usize) -> ChunkSet {
        let text = "abcd".repeat(n);
        ChunkSet {
            strategy: ChunkingStrategy::FixedSize,
            chunks: (0..n).map(|i| Chunk::new(i as u32, i * 4, i * 4 + 4, &text)).collect(),
            metrics: ChunkMetrics::default(),
        }
    }

    #[test]
    fn test_anchor_comes_from_the_closest_block() {
        let set = chunk_set(4);
        let index = Embeddings::with_block_size(
            vec![vec![1.0, 0.0], vec![-1.0, 0.0], vec![0.6, 0.8], vec![0.6, 0.8]],
            2,
        );
        let query = [1.0, 0.0];
        let input = RetrievalInput {
            chunks: &set,
            index: &EntityIndex::default(),
            query_entities: &[],
            embeddings: Some(QueryVectors { index: &index, query: &query }),
        };

        // Chunk 0 matches best overall, but its block averages out to nothing
        let out = ContextRetriever::new(1).retrieve(&input, 5).unwrap();
        let ids: Vec<u32> = out.ranked.iter().map(|s| s.chunk_id.0).collect();
        assert_eq!(ids, vec![2, 1, 3]);
        assert_eq!(out.ranked[0].score, 1.0);
    }

    #[test]
    fn test_window_clamped_at_document_start() {
        let set = chunk_set(3);
        let index = Embeddings::new(vec![vec![1.0, 0.0], vec![0.0, 1.0], vec![0.0, 1.0]]);
        let query = [1.0, 0.0];
        let input = RetrievalInput {
            chunks: &set,
            index: &EntityIndex::default(),
            query_entities: &[],
            embeddings: Some(QueryVectors { index: &index, query: &query }),
        };

        let out = ContextRetriever::new(2).retrieve(&input, 5).unwrap();
        let ids: Vec<u32> = out.ranked.iter().map(|s| s.chunk_id.0).collect();
        assert_eq!(ids, vec![0, 1, 2]);
    }
}
