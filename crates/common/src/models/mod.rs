//! Data model for a comparison run
//!
//! Every value here is created fresh per run and never mutated after it is
//! handed to the aggregation step.

mod boundary;
mod chunk;
mod document;
mod entity;
mod retrieval;
mod synthesis;

pub use boundary::{BoundaryCandidate, BoundaryType};
pub use chunk::{Chunk, ChunkId, ChunkMetrics, ChunkSet, ChunkingStrategy};
pub use document::Document;
pub use entity::{ChunkEntities, EntityIndex, EntityMention, EntityRecord, TemporalRecord};
pub use retrieval::{MethodStatus, RetrievalMethod, RetrievalResult, ScoredChunk};
pub use synthesis::{SynthesisOutput, SynthesisStatus, SynthesisStrategy};
