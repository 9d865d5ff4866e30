//! Multi-agent synthesis
//!
//! Three stages, each an independent LLM call:
//! - Researcher extracts key facts from the context
//! - Synthesizer drafts an answer from the facts
//! - Critic reviews the draft; a critique triggers a bounded revision
//!
//! Once a draft exists it is never thrown away: a failed critic or revision
//! call returns the latest draft marked degraded.

use crate::{ask, render_context, Draft, SynthesisInput, Synthesizer};
use async_trait::async_trait;
use serde::Deserialize;
use showdown_common::errors::Result;
use showdown_common::llm::{AgentRole, CompletionProvider, Prompt};
use showdown_common::models::SynthesisStrategy;
use showdown_common::resilience::Resilience;
use tracing::{debug, info, warn};

#[derive(Debug, Deserialize)]
struct Research {
    #[serde(default)]
    key_facts: Vec<String>,
}

/// Researcher, synthesizer and critic pipeline
#[derive(Debug, Clone, Copy)]
pub struct MultiAgent {
    /// Critic-triggered revisions allowed
    pub max_revisions: u32,
}

impl Default for MultiAgent {
    fn default() -> Self {
        Self { max_revisions: 1 }
    }
}

impl MultiAgent {
    pub fn new(max_revisions: u32) -> Self {
        Self { max_revisions }
    }
}

/// Facts from a researcher reply: JSON `key_facts`, else one per line
fn parse_facts(reply: &str) -> Vec<String> {
    let trimmed = reply.trim();
    let json = match (trimmed.find('{'), trimmed.rfind('}')) {
        (Some(start), Some(end)) if start < end => Some(&trimmed[start..=end]),
        _ => None,
    };
    if let Some(research) = json.and_then(|j| serde_json::from_str::<Research>(j).ok()) {
        return research
            .key_facts
            .into_iter()
            .map(|f| f.trim().to_string())
            .filter(|f| !f.is_empty())
            .collect();
    }
    trimmed
        .lines()
        .map(|l| l.trim().trim_start_matches(['-', '*']).trim().to_string())
        .filter(|l| !l.is_empty())
        .collect()
}

fn approves(critique: &str) -> bool {
    let lower = critique.trim().to_lowercase();
    lower.starts_with("satisfactory") || lower.starts_with("approved") || lower.starts_with("lgtm")
}

fn bullets(facts: &[String]) -> String {
    facts.iter().map(|f| format!("- {}\n", f)).collect()
}

#[async_trait]
impl Synthesizer for MultiAgent {
    async fn synthesize(
        &self,
        input: &SynthesisInput<'_>,
        llm: &dyn CompletionProvider,
        resilience: &Resilience,
    ) -> Result<Draft> {
        let (context, truncated) = render_context(input.chunks, input.budget);

        let research_prompt = Prompt::new()
            .section("question", input.query)
            .section("context", context.as_str())
            .render();
        let facts = parse_facts(&ask(llm, resilience, AgentRole::Researcher, &research_prompt).await?);
        debug!(facts = facts.len(), "Research stage complete");

        let draft_prompt = |critique: Option<&str>| {
            let mut prompt = Prompt::new()
                .section("question", input.query)
                .section("context", context.as_str())
                .section("facts", bullets(&facts));
            if let Some(critique) = critique {
                prompt = prompt.section("critique", critique);
            }
            prompt.render()
        };

        let mut text = ask(llm, resilience, AgentRole::Synthesizer, &draft_prompt(None)).await?;
        let mut revisions = 0;
        let mut degraded = None;
        while revisions < self.max_revisions {
            let review_prompt = Prompt::new()
                .section("question", input.query)
                .section("facts", bullets(&facts))
                .section("draft", text.as_str())
                .render();
            let critique = match ask(llm, resilience, AgentRole::Critic, &review_prompt).await {
                Ok(critique) => critique,
                Err(e) => {
                    warn!(error = %e, "Critic unavailable, keeping the current draft");
                    degraded = Some(format!("critic unavailable: {}", e));
                    break;
                }
            };
            if approves(&critique) {
                break;
            }

            info!(revision = revisions + 1, "Critic requested a revision");
            match ask(llm, resilience, AgentRole::Synthesizer, &draft_prompt(Some(critique.as_str()))).await {
                Ok(revised) => {
                    text = revised;
                    revisions += 1;
                }
                Err(e) => {
                    warn!(error = %e, "Revision failed, keeping the current draft");
                    degraded = Some(format!("revision failed: {}", e));
                    break;
                }
            }
        }

        Ok(Draft {
            text,
            truncated,
            revisions,
            degraded,
        })
    }

    fn strategy(&self) -> SynthesisStrategy {
        SynthesisStrategy::MultiAgent
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{chunks, resilience, RoleFailingCompleter, EARNINGS};
    use showdown_common::errors::AppError;
    use showdown_common::llm::{prompt_section, ExtractiveCompleter, RoleConfig};
    use showdown_common::models::EntityIndex;
    use std::sync::atomic::{AtomicU32, Ordering};

    /// Drafts miss the facts and the critic always objects
    struct StubbornCompleter {
        drafts: AtomicU32,
    }

    #[async_trait]
    impl CompletionProvider for StubbornCompleter {
        async fn complete(&self, prompt: &str, role: &RoleConfig) -> Result<String> {
            match role.role {
                AgentRole::Synthesizer => {
                    let n = self.drafts.fetch_add(1, Ordering::SeqCst);
                    if prompt_section(prompt, "critique").is_some() {
                        Ok(format!("revised draft {}", n))
                    } else {
                        Ok("first draft".to_string())
                    }
                }
                AgentRole::Critic => Ok("missing: everything".to_string()),
                _ => ExtractiveCompleter.complete(prompt, role).await,
            }
        }

        fn model_name(&self) -> &str {
            "stubborn"
        }
    }

    fn input<'a>(context: &'a [showdown_common::models::Chunk], index: &'a EntityIndex) -> SynthesisInput<'a> {
        SynthesisInput {
            query: "What revenue did Acme report?",
            chunks: context,
            index,
            budget: 12_000,
        }
    }

    #[test]
    fn test_parse_facts_json_and_lines() {
        let json = "Here you go: {\"key_facts\": [\"Acme grew.\", \" \", \"Globex shrank.\"]}";
        assert_eq!(parse_facts(json), vec!["Acme grew.", "Globex shrank."]);
        assert_eq!(parse_facts("- Acme grew.\n\n* Globex shrank."), vec!["Acme grew.", "Globex shrank."]);
    }

    #[tokio::test]
    async fn test_satisfied_critic_needs_no_revision() {
        let context = chunks(&EARNINGS);
        let index = EntityIndex::default();
        let draft = MultiAgent::default()
            .synthesize(&input(&context, &index), &ExtractiveCompleter, &resilience())
            .await
            .unwrap();
        assert_eq!(draft.revisions, 0);
        assert!(draft.text.contains("Acme Corp reported revenue of 4 billion dollars"));
    }

    #[tokio::test]
    async fn test_revision_loop_is_capped() {
        let context = chunks(&EARNINGS);
        let index = EntityIndex::default();
        let llm = StubbornCompleter {
            drafts: AtomicU32::new(0),
        };
        let draft = MultiAgent::new(1)
            .synthesize(&input(&context, &index), &llm, &resilience())
            .await
            .unwrap();
        assert_eq!(draft.revisions, 1);
        assert_eq!(draft.text, "revised draft 1");
        assert_eq!(llm.drafts.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_zero_revisions_skips_critic() {
        let context = chunks(&EARNINGS);
        let index = EntityIndex::default();
        let llm = RoleFailingCompleter::new(vec![AgentRole::Critic]);
        let draft = MultiAgent::new(0)
            .synthesize(&input(&context, &index), &llm, &resilience())
            .await
            .unwrap();
        assert_eq!(draft.revisions, 0);
        assert_eq!(llm.failures(), 0);
    }

    #[tokio::test]
    async fn test_critic_failure_keeps_draft() {
        let context = chunks(&EARNINGS);
        let index = EntityIndex::default();
        let llm = RoleFailingCompleter::new(vec![AgentRole::Critic]);
        let draft = MultiAgent::new(1)
            .synthesize(&input(&context, &index), &llm, &resilience())
            .await
            .unwrap();

        assert_eq!(draft.revisions, 0);
        assert!(draft.text.contains("Acme Corp reported revenue of 4 billion dollars"));
        assert!(draft.degraded.as_deref().map_or(false, |d| d.starts_with("critic unavailable")));
        assert_eq!(llm.failures(), 3);
    }

    #[tokio::test]
    async fn test_researcher_failure_fails_strategy() {
        let context = chunks(&EARNINGS);
        let index = EntityIndex::default();
        let llm = RoleFailingCompleter::new(vec![AgentRole::Researcher]);
        let result = MultiAgent::default()
            .synthesize(&input(&context, &index), &llm, &resilience())
            .await;
        assert!(matches!(result, Err(AppError::ExternalService { .. })));
        assert_eq!(llm.failures(), 3);
    }
}
