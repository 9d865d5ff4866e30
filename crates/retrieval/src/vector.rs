//! Vector similarity retrieval
//!
//! Ranks every chunk by cosine similarity between its embedding and the
//! query embedding.

use super::{rank, require_embeddings, similarities, RetrievalInput, Retrieved, Retriever};
use showdown_common::errors::Result;
use showdown_common::models::RetrievalMethod;

/// Full-scan vector retriever
#[derive(Debug, Clone, Copy, Default)]
pub struct VectorRetriever;

impl Retriever for VectorRetriever {
    fn retrieve(&self, input: &RetrievalInput<'_>, top_k: usize) -> Result<Retrieved> {
        let embeddings = require_embeddings(input, self.method())?;
        Ok(Retrieved::ok(rank(similarities(input, embeddings), top_k)))
    }

    fn method(&self) -> RetrievalMethod {
        RetrievalMethod::Vector
    }
}
