//! Showdown Common Library
//!
//! Shared code for every Showdown crate including:
//! - Data model for a comparison run
//! - Error types and handling
//! - Configuration management
//! - Embedding and LLM collaborator abstractions
//! - Tokenizer and sentence splitting
//! - Retry, deadline and call-gate primitives
//! - Metrics and observability

pub mod config;
pub mod embeddings;
pub mod errors;
pub mod llm;
pub mod metrics;
pub mod models;
pub mod resilience;
pub mod text;

// Re-export commonly used types
pub use config::AppConfig;
pub use embeddings::Embedder;
pub use errors::{AppError, Result};
pub use llm::{AgentRole, CompletionProvider};
pub use text::Tokenizer;

/// Application version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
