//! Hybrid retrieval combining vector and entity signals
//!
//! Both signals are scaled to [0, 1] by their maximum before weighting.
//! Without embeddings the retriever degrades to the entity signal alone.

use super::{entity_counts, rank, similarities, RetrievalInput, Retrieved, Retriever};
use showdown_common::errors::Result;
use showdown_common::models::{MethodStatus, RetrievalMethod, ScoredChunk};

/// Weighted vector + entity retriever
#[derive(Debug, Clone, Copy)]
pub struct HybridRetriever {
    pub vector_weight: f32,
    pub entity_weight: f32,
}

impl Default for HybridRetriever {
    fn default() -> Self {
        Self {
            vector_weight: 0.6,
            entity_weight: 0.4,
        }
    }
}

impl HybridRetriever {
    pub fn with_weights(vector_weight: f32, entity_weight: f32) -> Self {
        Self {
            vector_weight,
            entity_weight,
        }
    }
}

impl Retriever for HybridRetriever {
    fn retrieve(&self, input: &RetrievalInput<'_>, top_k: usize) -> Result<Retrieved> {
        let entity = scaled(entity_counts(input));

        // One score per chunk, so the blend is deduplicated by construction
        let (blended, status, note): (Vec<ScoredChunk>, _, _) = match input.embeddings {
            Some(embeddings) => {
                let vector = scaled(similarities(input, embeddings));
                let blended = vector
                    .iter()
                    .zip(&entity)
                    .map(|(v, e)| ScoredChunk {
                        chunk_id: v.chunk_id,
                        score: self.vector_weight * v.score + self.entity_weight * e.score,
                    })
                    .collect();
                (blended, MethodStatus::Ok, None)
            }
            None => (
                entity,
                MethodStatus::Degraded,
                Some("embeddings unavailable; entity signal only".to_string()),
            ),
        };

        let positive = blended.into_iter().filter(|s| s.score > 0.0).collect();
        Ok(Retrieved {
            ranked: rank(positive, top_k),
            status,
            note,
        })
    }

    fn method(&self) -> RetrievalMethod {
        RetrievalMethod::Hybrid
    }
}

/// Clamp negatives to zero and divide by the maximum
fn scaled(scores: Vec<ScoredChunk>) -> Vec<ScoredChunk> {
    let max = scores.iter().map(|s| s.score).fold(0.0f32, f32::max);
    scores
        .into_iter()
        .map(|s| ScoredChunk {
            chunk_id: s.chunk_id,
            score: if max > 0.0 { s.score.max(0.0) / max } else { 0.0 },
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_scaled_to_unit_range() {
        let scores = scaled(vec![
            ScoredChunk { chunk_id: showdown_common::models::ChunkId(0), score: 2.0 },
            ScoredChunk { chunk_id: showdown_common::models::ChunkId(1), score: -1.0 },
            ScoredChunk { chunk_id: showdown_common::models::ChunkId(2), score: 1.0 },
        ]);
        let values: Vec<f32> = scores.iter().map(|s| s.score).collect();
        assert_eq!(values, vec![1.0, 0.0, 0.5]);
    }

    #[test]
    fn test_scaled_all_zero() {
        let scores = scaled(vec![ScoredChunk { chunk_id: showdown_common::models::ChunkId(0), score: 0.0 }]);
        assert_eq!(scores[0].score, 0.0);
    }
}
