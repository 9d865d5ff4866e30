//! Showdown Synthesis
//!
//! Provides:
//! - Three answer strategies over the same retrieved context
//! - Completeness and clarity scoring against extracted key statements
//! - The evaluator that runs, scores and ranks the strategies

mod entity_focused;
mod multi_agent;
mod single_prompt;

pub mod evaluator;
pub mod scoring;

pub use entity_focused::EntityFocused;
pub use evaluator::{StrategyRank, SynthesisEvaluation, SynthesisStrategyEvaluator};
pub use multi_agent::MultiAgent;
pub use single_prompt::SinglePrompt;

use async_trait::async_trait;
use showdown_common::errors::Result;
use showdown_common::llm::{AgentRole, CompletionProvider};
use showdown_common::models::{Chunk, EntityIndex, SynthesisStrategy};
use showdown_common::resilience::Resilience;
use showdown_common::text::floor_char_boundary;

/// Retrieved context handed to every strategy
pub struct SynthesisInput<'a> {
    pub query: &'a str,

    /// Pooled retrieval results, best first
    pub chunks: &'a [Chunk],

    pub index: &'a EntityIndex,

    /// Context characters allowed per request
    pub budget: usize,
}

/// A strategy's answer before scoring
#[derive(Debug, Clone, Default)]
pub struct Draft {
    pub text: String,
    pub truncated: bool,
    pub revisions: u32,

    /// Set when part of the strategy failed but an answer was still produced
    pub degraded: Option<String>,
}

/// Common trait for all synthesis strategies
#[async_trait]
pub trait Synthesizer: Send + Sync {
    async fn synthesize(
        &self,
        input: &SynthesisInput<'_>,
        llm: &dyn CompletionProvider,
        resilience: &Resilience,
    ) -> Result<Draft>;

    fn strategy(&self) -> SynthesisStrategy;
}

/// Join chunk texts, cutting at `budget` characters
///
/// Returns the context and whether it was truncated.
pub(crate) fn render_context<'a>(chunks: impl IntoIterator<Item = &'a Chunk>, budget: usize) -> (String, bool) {
    let mut context = String::new();
    for chunk in chunks {
        if !context.is_empty() {
            context.push_str("\n\n");
        }
        context.push_str(chunk.text.trim());
    }
    if context.len() > budget {
        let cut = floor_char_boundary(&context, budget);
        context.truncate(cut);
        (context, true)
    } else {
        (context, false)
    }
}

/// One LLM call under the role's settings, through the gate and retry policy
pub(crate) async fn ask(
    llm: &dyn CompletionProvider,
    resilience: &Resilience,
    role: AgentRole,
    prompt: &str,
) -> Result<String> {
    let config = role.config();
    resilience
        .call("llm", || llm.complete(prompt, &config))
        .await
}


#[cfg(test)]
mod tests {
    use super::*;
    use showdown_common::models::Chunk;

    #[test]
    fn test_render_context_respects_budget() {
        let text = "Früh Acme. Globex später.";
        let chunks = vec![Chunk::new(0, 0, text.len(), text)];
        let (full, cut) = render_context(&chunks, 1000);
        assert_eq!(full, text);
        assert!(!cut);

        let (short, cut) = render_context(&chunks, 3);
        assert!(cut);
        assert_eq!(short, "Fr");
    }
}
