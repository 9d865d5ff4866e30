//! Chunks and chunk sets

use serde::{Deserialize, Serialize};
use std::fmt;

/// Chunk identifier, assigned in document order starting at 0
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[serde(transparent)]
pub struct ChunkId(pub u32);

impl fmt::Display for ChunkId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// A contiguous text segment
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Chunk {
    pub id: ChunkId,

    /// Start byte offset (inclusive)
    pub start: usize,

    /// End byte offset (exclusive)
    pub end: usize,

    pub text: String,
}

impl Chunk {
    pub fn new(id: u32, start: usize, end: usize, source: &str) -> Self {
        Self {
            id: ChunkId(id),
            start,
            end,
            text: source[start..end].to_string(),
        }
    }

    /// Size in bytes
    pub fn size(&self) -> usize {
        self.end - self.start
    }
}

/// Chunking strategy
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(rename_all = "snake_case")]
pub enum ChunkingStrategy {
    /// Equal-length windows that ignore boundaries
    FixedSize,
    /// Edges only at confident boundary candidates
    BoundaryAware,
    /// Greedy merge of windows while embeddings stay similar
    Semantic,
}

impl ChunkingStrategy {
    pub fn all() -> Vec<ChunkingStrategy> {
        vec![
            ChunkingStrategy::FixedSize,
            ChunkingStrategy::BoundaryAware,
            ChunkingStrategy::Semantic,
        ]
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ChunkingStrategy::FixedSize => "fixed_size",
            ChunkingStrategy::BoundaryAware => "boundary_aware",
            ChunkingStrategy::Semantic => "semantic",
        }
    }

    /// Lossless strategies partition the document with no gaps or overlaps
    pub fn is_lossless(&self) -> bool {
        !matches!(self, ChunkingStrategy::Semantic)
    }
}

impl fmt::Display for ChunkingStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Derived quality metrics for a ChunkSet
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct ChunkMetrics {
    pub chunk_count: usize,
    pub avg_chunk_size: f64,

    /// Confidence-weighted share of qualifying boundaries that land on an edge
    pub boundary_score: f64,

    /// Share of interior edges that land on a sentence end
    pub sentence_score: f64,

    pub min_chunk_size: usize,
    pub max_chunk_size: usize,
    pub size_std_dev: f64,

    /// Covered bytes divided by document length
    pub coverage: f64,

    /// Total bytes shared by adjacent chunks
    pub overlap_bytes: usize,
}

/// The ordered chunks one strategy produced for one document
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChunkSet {
    pub strategy: ChunkingStrategy,
    pub chunks: Vec<Chunk>,
    pub metrics: ChunkMetrics,
}

impl ChunkSet {
    /// An empty set, used when a strategy produced nothing
    pub fn empty(strategy: ChunkingStrategy) -> Self {
        Self {
            strategy,
            chunks: Vec::new(),
            metrics: ChunkMetrics::default(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.chunks.is_empty()
    }

    pub fn get(&self, id: ChunkId) -> Option<&Chunk> {
        self.chunks.get(id.0 as usize).filter(|c| c.id == id)
    }

    /// Weighted score used to rank strategies
    pub fn rank_score(&self, boundary_weight: f64, sentence_weight: f64) -> f64 {
        self.metrics.boundary_score * boundary_weight + self.metrics.sentence_score * sentence_weight
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_chunk_slices_source() {
        let chunk = Chunk::new(0, 6, 11, "Hello world");
        assert_eq!(chunk.text, "world");
        assert_eq!(chunk.size(), 5);
    }

    #[test]
    fn test_lossless_strategies() {
        assert!(ChunkingStrategy::FixedSize.is_lossless());
        assert!(ChunkingStrategy::BoundaryAware.is_lossless());
        assert!(!ChunkingStrategy::Semantic.is_lossless());
    }

    #[test]
    fn test_lookup_by_id() {
        let set = ChunkSet {
            strategy: ChunkingStrategy::FixedSize,
            chunks: vec![Chunk::new(0, 0, 3, "abcdef"), Chunk::new(1, 3, 6, "abcdef")],
            metrics: ChunkMetrics::default(),
        };
        assert_eq!(set.get(ChunkId(1)).map(|c| c.text.as_str()), Some("def"));
        assert!(set.get(ChunkId(2)).is_none());
    }
}
