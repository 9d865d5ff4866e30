//! Configuration management for Showdown
//!
//! Supports loading configuration from:
//! - Environment variables (prefixed with SHOWDOWN__)
//! - Configuration files (config/default, config/{env}, config/local)
//! - Default values
//!
//! Every value has a documented default and valid range. `validate` fails
//! fast with a `Configuration` error before any work is scheduled.

use crate::errors::{AppError, Result};
use crate::models::{ChunkingStrategy, RetrievalMethod, SynthesisStrategy};
use config::{Config, ConfigError, Environment, File};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use validator::{Validate, ValidationErrors, ValidationErrorsKind};

/// Main application configuration
#[derive(Debug, Clone, Default, Deserialize, Serialize, Validate)]
pub struct AppConfig {
    /// Boundary detection
    #[serde(default)]
    #[validate(nested)]
    pub boundary: BoundaryConfig,

    /// Chunking strategies
    #[serde(default)]
    #[validate(nested)]
    pub chunking: ChunkingConfig,

    /// Retrieval methods
    #[serde(default)]
    #[validate(nested)]
    pub retrieval: RetrievalConfig,

    /// Synthesis strategies
    #[serde(default)]
    #[validate(nested)]
    pub synthesis: SynthesisConfig,

    /// Retry policy for external calls
    #[serde(default)]
    #[validate(nested)]
    pub resilience: ResilienceConfig,

    /// Per-run limits
    #[serde(default)]
    #[validate(nested)]
    pub run: RunConfig,

    /// Embedding service configuration
    #[serde(default)]
    #[validate(nested)]
    pub embedding: EmbeddingConfig,

    /// LLM service configuration
    #[serde(default)]
    #[validate(nested)]
    pub llm: LlmConfig,

    /// Observability configuration
    #[serde(default)]
    pub observability: ObservabilityConfig,
}

#[derive(Debug, Clone, Deserialize, Serialize, Validate)]
pub struct BoundaryConfig {
    /// Minimum confidence for a candidate to become a chunk edge
    #[serde(default = "default_confidence_threshold")]
    #[validate(range(min = 0.0, max = 1.0))]
    pub confidence_threshold: f32,

    /// Sentences per comparison window
    #[serde(default = "default_window_sentences")]
    #[validate(range(min = 1, max = 50))]
    pub window_sentences: usize,

    /// Candidates closer than this many bytes are merged
    #[serde(default = "default_merge_window")]
    #[validate(range(max = 2000))]
    pub merge_window: usize,

    /// Entity overlap below this ratio signals an entity change
    #[serde(default = "default_entity_overlap_threshold")]
    #[validate(range(min = 0.0, max = 1.0))]
    pub entity_overlap_threshold: f32,

    /// Window similarity below this value signals a topic shift
    #[serde(default = "default_topic_similarity_threshold")]
    #[validate(range(min = 0.0, max = 1.0))]
    pub topic_similarity_threshold: f32,

    /// Absolute minimum document length (trimmed characters)
    #[serde(default = "default_min_document_chars")]
    #[validate(range(min = 1, max = 1_000_000))]
    pub min_document_chars: usize,

    /// Documents shorter than this yield no candidates
    #[serde(default = "default_near_empty_chars")]
    #[validate(range(max = 100_000))]
    pub near_empty_chars: usize,

    /// Ask the LLM for additional boundaries
    #[serde(default)]
    pub llm_refinement: bool,
}

#[derive(Debug, Clone, Deserialize, Serialize, Validate)]
pub struct ChunkingConfig {
    #[serde(default = "default_chunking_strategies")]
    #[validate(length(min = 1))]
    pub strategies: Vec<ChunkingStrategy>,

    /// Target chunk size in bytes
    #[serde(default = "default_target_size")]
    #[validate(range(min = 16, max = 100_000))]
    pub target_size: usize,

    /// Segments below this size are merged into a neighbour
    #[serde(default = "default_min_size")]
    #[validate(range(max = 100_000))]
    pub min_size: usize,

    /// Segments above this size are subdivided at sentence ends
    #[serde(default = "default_max_size")]
    #[validate(range(min = 16, max = 1_000_000))]
    pub max_size: usize,

    /// Adjacent windows at or above this similarity are merged
    #[serde(default = "default_semantic_threshold")]
    #[validate(range(min = 0.0, max = 1.0))]
    pub semantic_threshold: f32,

    /// Sentences per minimal semantic window
    #[serde(default = "default_semantic_window_sentences")]
    #[validate(range(min = 1, max = 50))]
    pub semantic_window_sentences: usize,

    /// Hard cap on bytes shared by adjacent semantic chunks
    #[serde(default = "default_max_overlap")]
    #[validate(range(max = 10_000))]
    pub max_overlap: usize,

    /// Overlap added at semantic merge seams
    #[serde(default = "default_seam_overlap")]
    #[validate(range(max = 10_000))]
    pub seam_overlap: usize,

    /// Distance in bytes within which a boundary counts as on an edge
    #[serde(default = "default_edge_tolerance")]
    #[validate(range(max = 1000))]
    pub edge_tolerance: usize,

    #[serde(default = "default_boundary_weight")]
    #[validate(range(min = 0.0, max = 1.0))]
    pub boundary_weight: f64,

    #[serde(default = "default_sentence_weight")]
    #[validate(range(min = 0.0, max = 1.0))]
    pub sentence_weight: f64,
}

#[derive(Debug, Clone, Deserialize, Serialize, Validate)]
pub struct RetrievalConfig {
    #[serde(default = "default_retrieval_methods")]
    #[validate(length(min = 1))]
    pub methods: Vec<RetrievalMethod>,

    /// Results kept per method
    #[serde(default = "default_top_k")]
    #[validate(range(min = 1, max = 100))]
    pub top_k: usize,

    /// Hybrid weight for vector similarity
    #[serde(default = "default_vector_weight")]
    #[validate(range(min = 0.0, max = 1.0))]
    pub vector_weight: f32,

    /// Hybrid weight for entity overlap
    #[serde(default = "default_entity_weight")]
    #[validate(range(min = 0.0, max = 1.0))]
    pub entity_weight: f32,

    /// Neighbours on each side of the anchor for context retrieval
    #[serde(default = "default_context_radius")]
    #[validate(range(max = 10))]
    pub context_radius: usize,
}

#[derive(Debug, Clone, Deserialize, Serialize, Validate)]
pub struct SynthesisConfig {
    #[serde(default = "default_synthesis_strategies")]
    #[validate(length(min = 1))]
    pub strategies: Vec<SynthesisStrategy>,

    /// Chunks taken from each retrieval method
    #[serde(default = "default_top_k")]
    #[validate(range(min = 1, max = 100))]
    pub top_k: usize,

    /// Context budget in characters per LLM request
    #[serde(default = "default_input_budget_chars")]
    #[validate(range(min = 256, max = 1_000_000))]
    pub input_budget_chars: usize,

    /// Critic-triggered revision cap
    #[serde(default = "default_max_revisions")]
    #[validate(range(max = 1))]
    pub max_revisions: u32,

    /// Ask the judge role for a ranking rationale
    #[serde(default = "default_use_judge")]
    pub use_judge: bool,

    #[serde(default = "default_completeness_weight")]
    #[validate(range(min = 0.0, max = 1.0))]
    pub completeness_weight: f64,

    #[serde(default = "default_clarity_weight")]
    #[validate(range(min = 0.0, max = 1.0))]
    pub clarity_weight: f64,
}

#[derive(Debug, Clone, Deserialize, Serialize, Validate)]
pub struct ResilienceConfig {
    /// Attempts per external call, including the first
    #[serde(default = "default_max_attempts")]
    #[validate(range(min = 1, max = 10))]
    pub max_attempts: u32,

    #[serde(default = "default_initial_backoff_ms")]
    #[validate(range(min = 1, max = 60_000))]
    pub initial_backoff_ms: u64,

    #[serde(default = "default_max_backoff_ms")]
    #[validate(range(min = 1, max = 300_000))]
    pub max_backoff_ms: u64,

    #[serde(default = "default_multiplier")]
    #[validate(range(min = 1.0, max = 10.0))]
    pub multiplier: f64,
}

#[derive(Debug, Clone, Deserialize, Serialize, Validate)]
pub struct RunConfig {
    /// Overall run timeout in seconds
    #[serde(default = "default_timeout_secs")]
    #[validate(range(min = 1, max = 3600))]
    pub timeout_secs: u64,

    /// Worker pool size for concurrent work units
    #[serde(default = "default_max_concurrency")]
    #[validate(range(min = 1, max = 256))]
    pub max_concurrency: usize,

    /// External calls per second across the run
    #[serde(default = "default_requests_per_second")]
    #[validate(range(min = 1, max = 10_000))]
    pub requests_per_second: u32,

    /// Burst capacity
    #[serde(default = "default_burst")]
    #[validate(range(min = 1, max = 10_000))]
    pub burst: u32,
}

#[derive(Debug, Clone, Deserialize, Serialize, Validate)]
pub struct EmbeddingConfig {
    /// Embedding provider: openai, hash
    #[serde(default = "default_embedding_provider")]
    pub provider: String,

    /// API key for embedding service
    pub api_key: Option<String>,

    /// API base URL (for custom endpoints)
    pub api_base: Option<String>,

    /// Model to use
    #[serde(default = "default_embedding_model")]
    pub model: String,

    /// Dimension of the offline hash embedder
    #[serde(default = "default_embedding_dimension")]
    #[validate(range(min = 8, max = 8192))]
    pub dimension: usize,

    /// Request timeout in seconds
    #[serde(default = "default_embedding_timeout")]
    #[validate(range(min = 1, max = 600))]
    pub timeout_secs: u64,
}

#[derive(Debug, Clone, Deserialize, Serialize, Validate)]
pub struct LlmConfig {
    /// LLM provider: openai, extractive
    #[serde(default = "default_llm_provider")]
    pub provider: String,

    pub api_key: Option<String>,

    /// Chat completions endpoint
    #[serde(default = "default_llm_endpoint")]
    pub endpoint: String,

    #[serde(default = "default_llm_model")]
    pub model: String,

    #[serde(default = "default_llm_timeout")]
    #[validate(range(min = 1, max = 600))]
    pub timeout_secs: u64,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ObservabilityConfig {
    /// Log level (debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// Enable JSON logging
    #[serde(default = "default_json_logging")]
    pub json_logging: bool,

    /// Metrics port (0 to disable)
    #[serde(default)]
    pub metrics_port: u16,
}

// Default value functions
fn default_confidence_threshold() -> f32 { 0.7 }
fn default_window_sentences() -> usize { 3 }
fn default_merge_window() -> usize { 40 }
fn default_entity_overlap_threshold() -> f32 { 0.3 }
fn default_topic_similarity_threshold() -> f32 { 0.35 }
fn default_min_document_chars() -> usize { 1 }
fn default_near_empty_chars() -> usize { 32 }
fn default_chunking_strategies() -> Vec<ChunkingStrategy> { ChunkingStrategy::all() }
fn default_target_size() -> usize { 512 }
fn default_min_size() -> usize { 200 }
fn default_max_size() -> usize { 1500 }
fn default_semantic_threshold() -> f32 { 0.5 }
fn default_semantic_window_sentences() -> usize { 2 }
fn default_max_overlap() -> usize { 64 }
fn default_seam_overlap() -> usize { 40 }
fn default_edge_tolerance() -> usize { 4 }
fn default_boundary_weight() -> f64 { 0.7 }
fn default_sentence_weight() -> f64 { 0.3 }
fn default_retrieval_methods() -> Vec<RetrievalMethod> { RetrievalMethod::all() }
fn default_top_k() -> usize { 5 }
fn default_vector_weight() -> f32 { 0.6 }
fn default_entity_weight() -> f32 { 0.4 }
fn default_context_radius() -> usize { 1 }
fn default_synthesis_strategies() -> Vec<SynthesisStrategy> { SynthesisStrategy::all() }
fn default_input_budget_chars() -> usize { 12_000 }
fn default_max_revisions() -> u32 { 1 }
fn default_use_judge() -> bool { true }
fn default_completeness_weight() -> f64 { 0.6 }
fn default_clarity_weight() -> f64 { 0.4 }
fn default_max_attempts() -> u32 { 3 }
fn default_initial_backoff_ms() -> u64 { 200 }
fn default_max_backoff_ms() -> u64 { 4_000 }
fn default_multiplier() -> f64 { 2.0 }
fn default_timeout_secs() -> u64 { 120 }
fn default_max_concurrency() -> usize { 8 }
fn default_requests_per_second() -> u32 { 10 }
fn default_burst() -> u32 { 20 }
fn default_embedding_provider() -> String { "openai".to_string() }
fn default_embedding_model() -> String { "text-embedding-3-small".to_string() }
fn default_embedding_dimension() -> usize { 256 }
fn default_embedding_timeout() -> u64 { 30 }
fn default_llm_provider() -> String { "openai".to_string() }
fn default_llm_endpoint() -> String { "https://api.openai.com/v1/chat/completions".to_string() }
fn default_llm_model() -> String { "gpt-4o-mini".to_string() }
fn default_llm_timeout() -> u64 { 60 }
fn default_log_level() -> String { "info".to_string() }
fn default_json_logging() -> bool { true }

impl AppConfig {
    /// Load configuration from environment and files
    pub fn load() -> std::result::Result<Self, ConfigError> {
        let env = std::env::var("SHOWDOWN_ENV").unwrap_or_else(|_| "development".to_string());

        let config = Config::builder()
            // Load base config file
            .add_source(File::with_name("config/default").required(false))
            // Load environment-specific config
            .add_source(File::with_name(&format!("config/{}", env)).required(false))
            // Load local overrides
            .add_source(File::with_name("config/local").required(false))
            // Load from environment variables with SHOWDOWN__ prefix
            // e.g., SHOWDOWN__CHUNKING__TARGET_SIZE=800
            .add_source(Self::environment())
            .build()?;

        config.try_deserialize()
    }

    /// Load from a specific config file, still honouring the environment
    pub fn from_file(path: &str) -> std::result::Result<Self, ConfigError> {
        let config = Config::builder()
            .add_source(File::with_name(path))
            .add_source(Self::environment())
            .build()?;

        config.try_deserialize()
    }

    fn environment() -> Environment {
        Environment::with_prefix("SHOWDOWN")
            .prefix_separator("__")
            .separator("__")
            .try_parsing(true)
            .list_separator(",")
            .with_list_parse_key("chunking.strategies")
            .with_list_parse_key("retrieval.methods")
            .with_list_parse_key("synthesis.strategies")
    }

    /// Check every range and cross-field constraint
    pub fn validate(&self) -> Result<()> {
        if let Err(errors) = Validate::validate(self) {
            let (field, message) = first_violation(&errors, "")
                .unwrap_or_else(|| ("config".to_string(), errors.to_string()));
            return Err(AppError::Configuration { field, message });
        }

        let chunking = &self.chunking;
        if chunking.min_size > chunking.target_size {
            return Err(AppError::configuration(
                "chunking.min_size",
                format!("must not exceed target_size ({})", chunking.target_size),
            ));
        }
        if chunking.target_size > chunking.max_size {
            return Err(AppError::configuration(
                "chunking.target_size",
                format!("must not exceed max_size ({})", chunking.max_size),
            ));
        }
        if chunking.seam_overlap > chunking.max_overlap {
            return Err(AppError::configuration(
                "chunking.seam_overlap",
                format!("must not exceed max_overlap ({})", chunking.max_overlap),
            ));
        }
        if chunking.boundary_weight + chunking.sentence_weight <= 0.0 {
            return Err(AppError::configuration(
                "chunking.boundary_weight",
                "boundary and sentence weights must not both be zero",
            ));
        }
        if self.retrieval.vector_weight + self.retrieval.entity_weight <= 0.0 {
            return Err(AppError::configuration(
                "retrieval.vector_weight",
                "vector and entity weights must not both be zero",
            ));
        }
        if self.resilience.initial_backoff_ms > self.resilience.max_backoff_ms {
            return Err(AppError::configuration(
                "resilience.initial_backoff_ms",
                "must not exceed max_backoff_ms",
            ));
        }
        if self.boundary.near_empty_chars < self.boundary.min_document_chars {
            return Err(AppError::configuration(
                "boundary.near_empty_chars",
                "must not be below min_document_chars",
            ));
        }
        Ok(())
    }

    /// Get the run timeout as Duration
    pub fn run_timeout(&self) -> Duration {
        Duration::from_secs(self.run.timeout_secs)
    }
}

/// Dotted path and message of the first violation, in field-name order
fn first_violation(errors: &ValidationErrors, prefix: &str) -> Option<(String, String)> {
    let mut entries: Vec<_> = errors.errors().iter().collect();
    entries.sort_by(|a, b| a.0.cmp(b.0));

    for (field, kind) in entries {
        let path = if prefix.is_empty() {
            field.to_string()
        } else {
            format!("{}.{}", prefix, field)
        };
        match kind {
            ValidationErrorsKind::Field(errs) => {
                if let Some(err) = errs.first() {
                    let message = match (err.params.get("min"), err.params.get("max")) {
                        (Some(min), Some(max)) => format!("{} (expected {}..={})", err.code, min, max),
                        (None, Some(max)) => format!("{} (expected <= {})", err.code, max),
                        (Some(min), None) => format!("{} (expected >= {})", err.code, min),
                        (None, None) => err.code.to_string(),
                    };
                    return Some((path, message));
                }
            }
            ValidationErrorsKind::Struct(inner) => {
                if let Some(found) = first_violation(inner, &path) {
                    return Some(found);
                }
            }
            ValidationErrorsKind::List(items) => {
                for inner in items.values() {
                    if let Some(found) = first_violation(inner, &path) {
                        return Some(found);
                    }
                }
            }
        }
    }
    None
}

impl Default for BoundaryConfig {
    fn default() -> Self {
        Self {
            confidence_threshold: default_confidence_threshold(),
            window_sentences: default_window_sentences(),
            merge_window: default_merge_window(),
            entity_overlap_threshold: default_entity_overlap_threshold(),
            topic_similarity_threshold: default_topic_similarity_threshold(),
            min_document_chars: default_min_document_chars(),
            near_empty_chars: default_near_empty_chars(),
            llm_refinement: false,
        }
    }
}

impl Default for ChunkingConfig {
    fn default() -> Self {
        Self {
            strategies: default_chunking_strategies(),
            target_size: default_target_size(),
            min_size: default_min_size(),
            max_size: default_max_size(),
            semantic_threshold: default_semantic_threshold(),
            semantic_window_sentences: default_semantic_window_sentences(),
            max_overlap: default_max_overlap(),
            seam_overlap: default_seam_overlap(),
            edge_tolerance: default_edge_tolerance(),
            boundary_weight: default_boundary_weight(),
            sentence_weight: default_sentence_weight(),
        }
    }
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            methods: default_retrieval_methods(),
            top_k: default_top_k(),
            vector_weight: default_vector_weight(),
            entity_weight: default_entity_weight(),
            context_radius: default_context_radius(),
        }
    }
}

impl Default for SynthesisConfig {
    fn default() -> Self {
        Self {
            strategies: default_synthesis_strategies(),
            top_k: default_top_k(),
            input_budget_chars: default_input_budget_chars(),
            max_revisions: default_max_revisions(),
            use_judge: default_use_judge(),
            completeness_weight: default_completeness_weight(),
            clarity_weight: default_clarity_weight(),
        }
    }
}

impl Default for ResilienceConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            initial_backoff_ms: default_initial_backoff_ms(),
            max_backoff_ms: default_max_backoff_ms(),
            multiplier: default_multiplier(),
        }
    }
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            timeout_secs: default_timeout_secs(),
            max_concurrency: default_max_concurrency(),
            requests_per_second: default_requests_per_second(),
            burst: default_burst(),
        }
    }
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            provider: default_embedding_provider(),
            api_key: None,
            api_base: None,
            model: default_embedding_model(),
            dimension: default_embedding_dimension(),
            timeout_secs: default_embedding_timeout(),
        }
    }
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            provider: default_llm_provider(),
            api_key: None,
            endpoint: default_llm_endpoint(),
            model: default_llm_model(),
            timeout_secs: default_llm_timeout(),
        }
    }
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            json_logging: default_json_logging(),
            metrics_port: 0,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        let config = AppConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.chunking.target_size, 512);
        assert_eq!(config.resilience.max_attempts, 3);
        assert_eq!(config.chunking.strategies.len(), 3);
    }

    #[test]
    fn test_threshold_out_of_range() {
        let mut config = AppConfig::default();
        config.boundary.confidence_threshold = 1.5;
        match config.validate() {
            Err(AppError::Configuration { field, .. }) => {
                assert_eq!(field, "boundary.confidence_threshold");
            }
            other => panic!("expected configuration error, got {:?}", other),
        }
    }

    #[test]
    fn test_zero_timeout_rejected() {
        let mut config = AppConfig::default();
        config.run.timeout_secs = 0;
        let err = config.validate().unwrap_err();
        assert!(err.is_fatal());
        assert!(err.to_string().contains("run.timeout_secs"));
    }

    #[test]
    fn test_retry_cap_range() {
        let mut config = AppConfig::default();
        config.resilience.max_attempts = 0;
        assert!(config.validate().is_err());
        config.resilience.max_attempts = 11;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_seam_overlap_must_fit_max_overlap() {
        let mut config = AppConfig::default();
        config.chunking.seam_overlap = 100;
        config.chunking.max_overlap = 64;
        match config.validate() {
            Err(AppError::Configuration { field, .. }) => assert_eq!(field, "chunking.seam_overlap"),
            other => panic!("expected configuration error, got {:?}", other),
        }
    }

    #[test]
    fn test_empty_strategy_list_rejected() {
        let mut config = AppConfig::default();
        config.synthesis.strategies.clear();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_deserialize_partial_sections() {
        let json = r#"{ "chunking": { "target_size": 800, "strategies": ["fixed_size"] } }"#;
        let config: AppConfig = serde_json::from_str(json).unwrap();
        assert_eq!(config.chunking.target_size, 800);
        assert_eq!(config.chunking.strategies, vec![ChunkingStrategy::FixedSize]);
        assert_eq!(config.chunking.min_size, 200);
        assert_eq!(config.retrieval.top_k, 5);
    }
}
