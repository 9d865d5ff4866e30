//! Retrieval results

use super::ChunkId;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Retrieval method
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(rename_all = "snake_case")]
pub enum RetrievalMethod {
    /// Embedding similarity to the query
    Vector,
    /// Mention counts of query entities
    Entity,
    /// Neighbours of the best vector match
    Context,
    /// Weighted blend of vector and entity scores
    Hybrid,
}

impl RetrievalMethod {
    pub fn all() -> Vec<RetrievalMethod> {
        vec![
            RetrievalMethod::Vector,
            RetrievalMethod::Entity,
            RetrievalMethod::Context,
            RetrievalMethod::Hybrid,
        ]
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            RetrievalMethod::Vector => "vector",
            RetrievalMethod::Entity => "entity",
            RetrievalMethod::Context => "context",
            RetrievalMethod::Hybrid => "hybrid",
        }
    }

    /// Whether the method needs chunk and query embeddings
    pub fn needs_embeddings(&self) -> bool {
        !matches!(self, RetrievalMethod::Entity)
    }
}

impl fmt::Display for RetrievalMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Outcome of a retrieval method
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum MethodStatus {
    Ok,
    /// Ran with a reduced signal set (e.g. hybrid without embeddings)
    Degraded,
    /// Could not run; excluded from comparison
    Unavailable,
}

/// A chunk and its relevance score
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct ScoredChunk {
    pub chunk_id: ChunkId,
    pub score: f32,
}

/// Ranked output of one retrieval method
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetrievalResult {
    pub method: RetrievalMethod,
    pub ranked: Vec<ScoredChunk>,
    pub latency_ms: f64,

    /// Chunks no other method returned
    pub unique_count: usize,

    pub status: MethodStatus,

    /// Set when the run deadline expired before the method finished
    pub incomplete: bool,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub note: Option<String>,
}

impl RetrievalResult {
    pub fn new(method: RetrievalMethod, ranked: Vec<ScoredChunk>) -> Self {
        Self {
            method,
            ranked,
            latency_ms: 0.0,
            unique_count: 0,
            status: MethodStatus::Ok,
            incomplete: false,
            note: None,
        }
    }

    pub fn unavailable(method: RetrievalMethod, note: impl Into<String>) -> Self {
        Self {
            status: MethodStatus::Unavailable,
            note: Some(note.into()),
            ..Self::new(method, Vec::new())
        }
    }

    pub fn incomplete(method: RetrievalMethod) -> Self {
        Self {
            incomplete: true,
            ..Self::unavailable(method, "run deadline expired")
        }
    }

    pub fn chunk_ids(&self) -> impl Iterator<Item = ChunkId> + '_ {
        self.ranked.iter().map(|s| s.chunk_id)
    }
}
