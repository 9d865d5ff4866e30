//! Single-prompt synthesis
//!
//! All retrieved context goes into one Synthesizer request. Context beyond
//! the input budget is cut and the answer is flagged as truncated.

use crate::{ask, render_context, Draft, SynthesisInput, Synthesizer};
use async_trait::async_trait;
use showdown_common::errors::Result;
use showdown_common::llm::{AgentRole, CompletionProvider, Prompt};
use showdown_common::models::SynthesisStrategy;
use showdown_common::resilience::Resilience;
use tracing::debug;

#[derive(Debug, Clone, Copy, Default)]
pub struct SinglePrompt;

#[async_trait]
impl Synthesizer for SinglePrompt {
    async fn synthesize(
        &self,
        input: &SynthesisInput<'_>,
        llm: &dyn CompletionProvider,
        resilience: &Resilience,
    ) -> Result<Draft> {
        let (context, truncated) = render_context(input.chunks, input.budget);
        if truncated {
            debug!(budget = input.budget, "Context truncated for single prompt");
        }

        let prompt = Prompt::new()
            .section("question", input.query)
            .section("context", context)
            .render();
        let text = ask(llm, resilience, AgentRole::Synthesizer, &prompt).await?;

        Ok(Draft {
            text,
            truncated,
            ..Draft::default()
        })
    }

    fn strategy(&self) -> SynthesisStrategy {
        SynthesisStrategy::SinglePrompt
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{chunks, resilience, RoleFailingCompleter, EARNINGS};
    use showdown_common::llm::ExtractiveCompleter;
    use showdown_common::models::EntityIndex;

    #[tokio::test]
    async fn test_answers_from_full_context() {
        let context = chunks(&EARNINGS);
        let index = EntityIndex::default();
        let input = SynthesisInput {
            query: "What revenue did Globex report?",
            chunks: &context,
            index: &index,
            budget: 12_000,
        };
        let draft = SinglePrompt
            .synthesize(&input, &ExtractiveCompleter, &resilience())
            .await
            .unwrap();
        assert!(!draft.truncated);
        assert!(draft.text.starts_with("## Answer"));
        assert!(draft.text.contains("Globex Inc reported revenue of 2 billion dollars"));
    }

    #[tokio::test]
    async fn test_oversized_context_is_truncated_not_failed() {
        let context = chunks(&EARNINGS);
        let index = EntityIndex::default();
        let input = SynthesisInput {
            query: "What revenue did Acme report?",
            chunks: &context,
            index: &index,
            budget: 120,
        };
        let draft = SinglePrompt
            .synthesize(&input, &ExtractiveCompleter, &resilience())
            .await
            .unwrap();
        assert!(draft.truncated);
        assert!(!draft.text.contains("Globex"));
    }

    #[tokio::test]
    async fn test_exhausted_retries_surface_error() {
        let context = chunks(&EARNINGS);
        let index = EntityIndex::default();
        let input = SynthesisInput {
            query: "Acme?",
            chunks: &context,
            index: &index,
            budget: 12_000,
        };
        let llm = RoleFailingCompleter::new(vec![AgentRole::Synthesizer]);
        let result = SinglePrompt.synthesize(&input, &llm, &resilience()).await;
        assert!(result.is_err());
        assert_eq!(llm.failures(), 3);
    }
}
