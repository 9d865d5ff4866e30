//! Showdown Segmentation
//!
//! Turns a raw document into comparable chunkings:
//! - Boundary detection from format, entity and topic signals
//! - Fixed-size, boundary-aware and semantic chunking strategies
//! - Chunk quality metrics and strategy ranking
//! - Entity and time-period tracking across chunks

pub mod boundary;
pub mod chunker;
pub mod entities;

pub use boundary::BoundaryDetector;
pub use chunker::{rank_strategies, ChunkingEngine, ChunkingRank};
pub use entities::EntityTemporalTracker;
