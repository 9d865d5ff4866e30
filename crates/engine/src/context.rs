//! Per-run context
//!
//! Configuration and collaborator handles for one comparison run, built
//! once and passed by reference to every stage. Nothing here is global.

use showdown_common::config::AppConfig;
use showdown_common::embeddings::{create_embedder, Embedder};
use showdown_common::errors::Result;
use showdown_common::llm::{create_completer, CompletionProvider};
use showdown_common::resilience::{CallGate, Resilience, RetryPolicy};
use showdown_common::text::{HeuristicTokenizer, Tokenizer};
use showdown_segmentation::EntityTemporalTracker;
use std::sync::Arc;
use tracing::info;

/// Configuration plus collaborator handles for one run
#[derive(Clone)]
pub struct RunContext {
    pub config: Arc<AppConfig>,
    pub tokenizer: Arc<dyn Tokenizer>,
    pub embedder: Arc<dyn Embedder>,
    pub llm: Arc<dyn CompletionProvider>,
    pub tracker: Arc<EntityTemporalTracker>,
    pub resilience: Arc<Resilience>,
}

impl RunContext {
    /// Validate `config` and build collaborators from it
    pub fn from_config(config: AppConfig) -> Result<Self> {
        config.validate()?;
        let embedder = create_embedder(&config.embedding)?;
        let llm = create_completer(&config.llm)?;
        info!(
            embedding_model = %embedder.model_name(),
            dimension = embedder.dimension(),
            llm_model = %llm.model_name(),
            "Collaborators initialized"
        );
        Self::with_collaborators(config, embedder, llm)
    }

    /// Validate `config` and use the given collaborators
    pub fn with_collaborators(
        config: AppConfig,
        embedder: Arc<dyn Embedder>,
        llm: Arc<dyn CompletionProvider>,
    ) -> Result<Self> {
        config.validate()?;
        let gate = CallGate::from_config(&config.run)?;
        let policy = RetryPolicy::from(&config.resilience);

        Ok(Self {
            tokenizer: Arc::new(HeuristicTokenizer),
            embedder,
            llm,
            tracker: Arc::new(EntityTemporalTracker::new()?),
            resilience: Arc::new(Resilience::new(gate, policy)),
            config: Arc::new(config),
        })
    }
}
