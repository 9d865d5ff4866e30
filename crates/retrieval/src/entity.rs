//! Entity retrieval
//!
//! Ranks chunks by how often they mention the entities named in the query.
//! Chunks without a mention are never returned.

use super::{entity_counts, rank, RetrievalInput, Retrieved, Retriever};
use showdown_common::errors::Result;
use showdown_common::models::RetrievalMethod;

#[derive(Debug, Clone, Copy, Default)]
pub struct EntityRetriever;

impl Retriever for EntityRetriever {
    fn retrieve(&self, input: &RetrievalInput<'_>, top_k: usize) -> Result<Retrieved> {
        if input.query_entities.is_empty() {
            return Ok(Retrieved {
                note: Some("query names no indexed entity".to_string()),
                ..Retrieved::ok(Vec::new())
            });
        }

        // Ties fall back to ascending chunk id, which is document order
        let matching = entity_counts(input).into_iter().filter(|s| s.score > 0.0).collect();
        Ok(Retrieved::ok(rank(matching, top_k)))
    }

    fn method(&self) -> RetrievalMethod {
        RetrievalMethod::Entity
    }
}
