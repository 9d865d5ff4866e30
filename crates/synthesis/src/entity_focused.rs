//! Entity-focused synthesis
//!
//! Partitions the context by each chunk's dominant entity, asks one
//! sub-question per entity concurrently, and merges the sub-answers into
//! one response with a section per entity. When the index names no entity
//! for any chunk, the Entity role proposes names to group by.

use crate::{ask, render_context, Draft, SynthesisInput, Synthesizer};
use async_trait::async_trait;
use futures::future::join_all;
use showdown_common::errors::{AppError, Result};
use showdown_common::llm::{AgentRole, CompletionProvider, Prompt};
use showdown_common::models::{Chunk, SynthesisStrategy};
use showdown_common::resilience::Resilience;
use tracing::{debug, warn};

/// Section title for chunks without a dominant entity
const GENERAL_SECTION: &str = "Other context";

/// Names taken from the Entity role
const MAX_FALLBACK_ENTITIES: usize = 5;

#[derive(Debug, Clone, Copy, Default)]
pub struct EntityFocused;

/// Chunks sharing one section
struct Group<'a> {
    title: String,
    chunks: Vec<&'a Chunk>,
}

impl EntityFocused {
    /// Group by dominant entity in first-appearance order; chunks with no
    /// entity go to a trailing general group
    fn group_by_index<'a>(input: &SynthesisInput<'a>) -> Vec<Group<'a>> {
        let mut groups: Vec<Group<'a>> = Vec::new();
        let mut general: Vec<&'a Chunk> = Vec::new();
        for chunk in input.chunks {
            let Some(canonical) = input.index.dominant_entity(chunk.id) else {
                general.push(chunk);
                continue;
            };
            let title = input.index.display_name(canonical).to_string();
            match groups.iter_mut().find(|g| g.title == title) {
                Some(group) => group.chunks.push(chunk),
                None => groups.push(Group {
                    title,
                    chunks: vec![chunk],
                }),
            }
        }
        if !general.is_empty() {
            groups.push(Group {
                title: GENERAL_SECTION.to_string(),
                chunks: general,
            });
        }
        groups
    }

    /// Group by the first proposed name each chunk mentions
    fn group_by_names<'a>(chunks: &'a [Chunk], names: &[String]) -> Vec<Group<'a>> {
        let mut groups: Vec<Group<'a>> = names
            .iter()
            .map(|name| Group {
                title: name.clone(),
                chunks: Vec::new(),
            })
            .collect();
        let mut general = Vec::new();
        for chunk in chunks {
            let lower = chunk.text.to_lowercase();
            match groups.iter_mut().find(|g| lower.contains(&g.title.to_lowercase())) {
                Some(group) => group.chunks.push(chunk),
                None => general.push(chunk),
            }
        }
        groups.retain(|g| !g.chunks.is_empty());
        if !general.is_empty() {
            groups.push(Group {
                title: GENERAL_SECTION.to_string(),
                chunks: general,
            });
        }
        groups
    }

    async fn propose_entities(
        input: &SynthesisInput<'_>,
        llm: &dyn CompletionProvider,
        resilience: &Resilience,
    ) -> Result<Vec<String>> {
        let (context, _) = render_context(input.chunks, input.budget);
        let prompt = Prompt::new().section("context", context).render();
        let reply = ask(llm, resilience, AgentRole::Entity, &prompt).await?;
        Ok(reply
            .lines()
            .map(|l| l.trim().trim_start_matches(['-', '*']).trim().to_string())
            .filter(|l| !l.is_empty())
            .take(MAX_FALLBACK_ENTITIES)
            .collect())
    }
}

#[async_trait]
impl Synthesizer for EntityFocused {
    async fn synthesize(
        &self,
        input: &SynthesisInput<'_>,
        llm: &dyn CompletionProvider,
        resilience: &Resilience,
    ) -> Result<Draft> {
        let mut degraded = None;
        let mut groups = Self::group_by_index(input);
        let indexed = groups.iter().any(|g| g.title != GENERAL_SECTION);
        if !indexed && !input.chunks.is_empty() {
            match Self::propose_entities(input, llm, resilience).await {
                Ok(names) => groups = Self::group_by_names(input.chunks, &names),
                Err(e) => {
                    warn!(error = %e, "Entity proposal failed, answering without grouping");
                    degraded = Some("entity grouping unavailable".to_string());
                }
            }
        }
        if groups.is_empty() {
            groups.push(Group {
                title: GENERAL_SECTION.to_string(),
                chunks: Vec::new(),
            });
        }
        debug!(groups = groups.len(), "Entity groups formed");

        let requests = groups.iter().map(|group| async move {
            let (context, truncated) = render_context(group.chunks.iter().copied(), input.budget);
            let prompt = Prompt::new()
                .section("question", input.query)
                .section("entity", group.title.as_str())
                .section("context", context)
                .render();
            let answer = ask(llm, resilience, AgentRole::Synthesizer, &prompt).await;
            (answer, truncated)
        });
        let answers = join_all(requests).await;

        let mut text = String::new();
        let mut truncated = false;
        let mut failed = 0;
        let mut last_error: Option<AppError> = None;
        for (group, (answer, cut)) in groups.iter().zip(answers) {
            match answer {
                Ok(body) => {
                    truncated |= cut;
                    text.push_str(&format!("## {}\n\n{}\n\n", group.title, body.trim()));
                }
                Err(e) => {
                    warn!(entity = %group.title, error = %e, "Entity sub-request failed");
                    failed += 1;
                    last_error = Some(e);
                }
            }
        }

        if failed == groups.len() {
            return Err(last_error.unwrap_or_else(|| AppError::Internal {
                message: "no entity sub-request completed".to_string(),
            }));
        }
        if failed > 0 {
            degraded = Some(format!("{} of {} entity sub-requests failed", failed, groups.len()));
        }

        Ok(Draft {
            text: format!("{}\n", text.trim_end()),
            truncated,
            revisions: 0,
            degraded,
        })
    }

    fn strategy(&self) -> SynthesisStrategy {
        SynthesisStrategy::EntityFocused
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{chunks, resilience, RoleFailingCompleter, EARNINGS};
    use showdown_common::llm::{prompt_section, ExtractiveCompleter, RoleConfig};
    use showdown_common::models::{ChunkId, EntityIndex, EntityRecord};
    use std::collections::{BTreeMap, BTreeSet};

    fn record(canonical: &str, display: &str, chunks: &[u32]) -> EntityRecord {
        EntityRecord {
            canonical: canonical.to_string(),
            display: display.to_string(),
            aliases: BTreeSet::from([display.to_string()]),
            chunk_ids: chunks.iter().map(|&c| ChunkId(c)).collect(),
            mentions: chunks.len() as u32,
        }
    }

    fn index() -> EntityIndex {
        let mut by_chunk = BTreeMap::new();
        by_chunk.insert(ChunkId(0), BTreeMap::from([("acme".to_string(), 2)]));
        by_chunk.insert(ChunkId(1), BTreeMap::from([("globex".to_string(), 2)]));
        by_chunk.insert(ChunkId(2), BTreeMap::from([("acme".to_string(), 1)]));
        by_chunk.insert(ChunkId(3), BTreeMap::from([("globex".to_string(), 1)]));
        EntityIndex {
            entities: vec![record("acme", "Acme Corp", &[0, 2]), record("globex", "Globex Inc", &[1, 3])],
            periods: vec![],
            by_chunk,
        }
    }

    /// Fails sub-requests about one entity
    struct EntityFailingCompleter(&'static str);

    #[async_trait]
    impl CompletionProvider for EntityFailingCompleter {
        async fn complete(&self, prompt: &str, role: &RoleConfig) -> Result<String> {
            if prompt_section(prompt, "entity") == Some(self.0) {
                return Err(AppError::external("llm", "429 rate limited"));
            }
            ExtractiveCompleter.complete(prompt, role).await
        }

        fn model_name(&self) -> &str {
            "entity-failing"
        }
    }

    #[tokio::test]
    async fn test_sections_per_dominant_entity() {
        let context = chunks(&EARNINGS);
        let index = index();
        let input = SynthesisInput {
            query: "What revenue did each company report?",
            chunks: &context,
            index: &index,
            budget: 12_000,
        };
        let draft = EntityFocused
            .synthesize(&input, &ExtractiveCompleter, &resilience())
            .await
            .unwrap();

        let acme = draft.text.find("## Acme Corp").unwrap();
        let globex = draft.text.find("## Globex Inc").unwrap();
        assert!(acme < globex);
        assert!(draft.text[acme..globex].contains("Acme Corp reported revenue"));
        assert!(!draft.text[acme..globex].contains("Globex"));
        assert!(draft.degraded.is_none());
    }

    #[tokio::test]
    async fn test_entity_role_groups_when_index_is_empty() {
        let context = chunks(&EARNINGS);
        let index = EntityIndex::default();
        let input = SynthesisInput {
            query: "What revenue did each company report?",
            chunks: &context,
            index: &index,
            budget: 12_000,
        };
        let draft = EntityFocused
            .synthesize(&input, &ExtractiveCompleter, &resilience())
            .await
            .unwrap();
        assert!(draft.text.contains("## Acme Corp"));
        assert!(draft.text.contains("## Globex Inc"));
        assert!(!draft.text.contains(GENERAL_SECTION));
    }

    #[tokio::test]
    async fn test_partial_failure_degrades() {
        let context = chunks(&EARNINGS);
        let index = index();
        let input = SynthesisInput {
            query: "What revenue did each company report?",
            chunks: &context,
            index: &index,
            budget: 12_000,
        };
        let draft = EntityFocused
            .synthesize(&input, &EntityFailingCompleter("Globex Inc"), &resilience())
            .await
            .unwrap();
        assert!(draft.text.contains("## Acme Corp"));
        assert!(!draft.text.contains("## Globex Inc"));
        assert_eq!(draft.degraded.as_deref(), Some("1 of 2 entity sub-requests failed"));
    }

    #[tokio::test]
    async fn test_total_failure_is_error() {
        let context = chunks(&EARNINGS);
        let index = index();
        let input = SynthesisInput {
            query: "Revenue?",
            chunks: &context,
            index: &index,
            budget: 12_000,
        };
        let llm = RoleFailingCompleter::new(vec![AgentRole::Synthesizer]);
        assert!(EntityFocused.synthesize(&input, &llm, &resilience()).await.is_err());
        assert_eq!(llm.failures(), 6);
    }
}
