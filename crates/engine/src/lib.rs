//! Showdown Engine
//!
//! Runs one document and one query through every comparison stage:
//! 1. Detects semantic boundaries
//! 2. Chunks with every configured strategy
//! 3. Builds an entity index per ChunkSet
//! 4. Compares retrieval methods per ChunkSet
//! 5. Evaluates synthesis strategies per ChunkSet
//! 6. Reduces everything into one comparison report

pub mod context;
pub mod pipeline;
pub mod report;

pub use context::RunContext;
pub use pipeline::Pipeline;
pub use report::{ComparisonReport, StageStatus};
