//! Synthesis strategy evaluation
//!
//! Provides:
//! - Concurrent execution of the selected strategies under the run deadline
//! - Completeness and clarity scoring of every answer
//! - Ranking with a Judge-role or score-based rationale

use crate::scoring::{factual_completeness, key_statements, structural_clarity};
use crate::{ask, EntityFocused, MultiAgent, SinglePrompt, SynthesisInput, Synthesizer};
use futures::future::join_all;
use serde::Serialize;
use showdown_common::config::SynthesisConfig;
use showdown_common::llm::{AgentRole, CompletionProvider, Prompt};
use showdown_common::metrics;
use showdown_common::models::{Chunk, EntityIndex, SynthesisOutput, SynthesisStatus, SynthesisStrategy};
use showdown_common::resilience::{Deadline, Resilience};
use showdown_common::text::floor_char_boundary;
use std::time::Instant;
use tracing::{info, instrument, warn};

/// Answer excerpt shown to the judge
const JUDGE_EXCERPT_CHARS: usize = 1500;

/// Position of one rankable strategy
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct StrategyRank {
    /// 1-based
    pub rank: usize,
    pub strategy: SynthesisStrategy,
    pub score: f64,
}

/// All strategy outputs for one context, with ranking
#[derive(Debug, Clone, Serialize)]
pub struct SynthesisEvaluation {
    /// One output per selected strategy, in selection order
    pub outputs: Vec<SynthesisOutput>,

    /// Rankable strategies only, best first
    pub ranking: Vec<StrategyRank>,

    /// Reference statements completeness was measured against
    pub key_statements: Vec<String>,

    pub rationale: String,
}

impl SynthesisEvaluation {
    pub fn output(&self, strategy: SynthesisStrategy) -> Option<&SynthesisOutput> {
        self.outputs.iter().find(|o| o.strategy == strategy)
    }
}

/// Runs, scores and ranks the configured synthesis strategies
pub struct SynthesisStrategyEvaluator {
    config: SynthesisConfig,
}

impl SynthesisStrategyEvaluator {
    pub fn new(config: SynthesisConfig) -> Self {
        Self { config }
    }

    fn synthesizer(&self, strategy: SynthesisStrategy) -> Box<dyn Synthesizer> {
        match strategy {
            SynthesisStrategy::SinglePrompt => Box::new(SinglePrompt),
            SynthesisStrategy::EntityFocused => Box::new(EntityFocused),
            SynthesisStrategy::MultiAgent => Box::new(MultiAgent::new(self.config.max_revisions)),
        }
    }

    /// Evaluate every configured strategy on the same context
    ///
    /// Never fails: a strategy whose calls exhaust their retries is reported
    /// unavailable, one overtaken by the deadline incomplete, and neither
    /// takes part in ranking.
    #[instrument(skip_all, fields(strategies = self.config.strategies.len(), chunk_count = chunks.len()))]
    pub async fn evaluate(
        &self,
        query: &str,
        chunks: &[Chunk],
        index: &EntityIndex,
        llm: &dyn CompletionProvider,
        resilience: &Resilience,
        deadline: &Deadline,
    ) -> SynthesisEvaluation {
        let statements = key_statements(query, chunks);
        let input = SynthesisInput {
            query,
            chunks,
            index,
            budget: self.config.input_budget_chars,
        };

        let runs = self.config.strategies.iter().map(|&strategy| {
            let (input, statements) = (&input, &statements);
            async move {
                self.run_strategy(strategy, input, statements, llm, resilience, deadline)
                    .await
            }
        });
        let outputs: Vec<SynthesisOutput> = join_all(runs).await;

        let ranking = self.rank(&outputs);
        let rationale = self
            .rationale(query, &outputs, &ranking, llm, resilience, deadline)
            .await;
        info!(
            ranked = ranking.len(),
            best = ?ranking.first().map(|r| r.strategy),
            "Synthesis evaluated"
        );

        SynthesisEvaluation {
            outputs,
            ranking,
            key_statements: statements,
            rationale,
        }
    }

    async fn run_strategy(
        &self,
        strategy: SynthesisStrategy,
        input: &SynthesisInput<'_>,
        statements: &[String],
        llm: &dyn CompletionProvider,
        resilience: &Resilience,
        deadline: &Deadline,
    ) -> SynthesisOutput {
        if deadline.is_expired() {
            metrics::record_stage_failure("synthesis", strategy.as_str(), "timeout");
            return SynthesisOutput::incomplete(strategy);
        }

        let synthesizer = self.synthesizer(strategy);
        let started = Instant::now();
        let outcome = deadline
            .run("synthesis", synthesizer.synthesize(input, llm, resilience))
            .await;
        let latency_ms = started.elapsed().as_secs_f64() * 1000.0;

        match outcome {
            Err(_) => {
                warn!(strategy = %strategy, "Synthesis overtaken by the run deadline");
                metrics::record_stage_failure("synthesis", strategy.as_str(), "timeout");
                SynthesisOutput::incomplete(strategy)
            }
            Ok(Err(e)) => {
                warn!(strategy = %strategy, error = %e, "Synthesis strategy unavailable");
                metrics::record_stage_failure("synthesis", strategy.as_str(), "unavailable");
                SynthesisOutput {
                    latency_ms,
                    ..SynthesisOutput::unavailable(strategy, e.to_string())
                }
            }
            Ok(Ok(draft)) => {
                let status = if draft.degraded.is_some() {
                    SynthesisStatus::Degraded
                } else {
                    SynthesisStatus::Ok
                };
                SynthesisOutput {
                    strategy,
                    response_length: draft.text.chars().count(),
                    factual_completeness: factual_completeness(&draft.text, statements),
                    structural_clarity: structural_clarity(&draft.text, input.index, input.chunks),
                    status,
                    incomplete: false,
                    truncated: draft.truncated,
                    revisions: draft.revisions,
                    latency_ms,
                    error: draft.degraded,
                    text: draft.text,
                }
            }
        }
    }

    /// Rankable outputs by descending score; ties keep strategy order
    fn rank(&self, outputs: &[SynthesisOutput]) -> Vec<StrategyRank> {
        let mut scored: Vec<(f64, SynthesisStrategy)> = outputs
            .iter()
            .filter(|o| o.is_rankable())
            .map(|o| {
                (
                    o.score(self.config.completeness_weight, self.config.clarity_weight),
                    o.strategy,
                )
            })
            .collect();
        scored.sort_by(|a, b| b.0.total_cmp(&a.0).then(a.1.cmp(&b.1)));
        scored
            .into_iter()
            .enumerate()
            .map(|(i, (score, strategy))| StrategyRank {
                rank: i + 1,
                strategy,
                score,
            })
            .collect()
    }

    async fn rationale(
        &self,
        query: &str,
        outputs: &[SynthesisOutput],
        ranking: &[StrategyRank],
        llm: &dyn CompletionProvider,
        resilience: &Resilience,
        deadline: &Deadline,
    ) -> String {
        if ranking.is_empty() {
            return "No synthesis strategy produced a rankable answer.".to_string();
        }
        if !self.config.use_judge || deadline.is_expired() {
            return score_rationale(outputs, ranking);
        }

        let candidates: String = ranking
            .iter()
            .filter_map(|r| outputs.iter().find(|o| o.strategy == r.strategy))
            .map(|o| {
                format!(
                    "{}: score={:.3} completeness={:.3} clarity={:.3} status={:?}\n",
                    o.strategy,
                    o.score(self.config.completeness_weight, self.config.clarity_weight),
                    o.factual_completeness,
                    o.structural_clarity,
                    o.status
                )
            })
            .collect();
        let answers: String = ranking
            .iter()
            .filter_map(|r| outputs.iter().find(|o| o.strategy == r.strategy))
            .map(|o| {
                let cut = floor_char_boundary(&o.text, JUDGE_EXCERPT_CHARS);
                format!("[{}]\n{}\n\n", o.strategy, &o.text[..cut])
            })
            .collect();
        let prompt = Prompt::new()
            .section("question", query)
            .section("candidates", candidates)
            .section("answers", answers)
            .render();

        match deadline
            .run("synthesis", ask(llm, resilience, AgentRole::Judge, &prompt))
            .await
        {
            Ok(Ok(reply)) if !reply.trim().is_empty() => reply.trim().to_string(),
            Ok(Ok(_)) => score_rationale(outputs, ranking),
            Ok(Err(e)) | Err(e) => {
                warn!(error = %e, "Judge unavailable, using score rationale");
                score_rationale(outputs, ranking)
            }
        }
    }
}

/// Rationale derived from the scores alone
fn score_rationale(outputs: &[SynthesisOutput], ranking: &[StrategyRank]) -> String {
    let Some(best) = ranking.first() else {
        return "No synthesis strategy produced a rankable answer.".to_string();
    };
    let mut rationale = match outputs.iter().find(|o| o.strategy == best.strategy) {
        Some(o) => format!(
            "{} ranked first with score {:.2} (completeness {:.2}, clarity {:.2})",
            best.strategy, best.score, o.factual_completeness, o.structural_clarity
        ),
        None => format!("{} ranked first with score {:.2}", best.strategy, best.score),
    };
    if let Some(second) = ranking.get(1) {
        rationale.push_str(&format!(", ahead of {} at {:.2}", second.strategy, second.score));
    }
    let excluded: Vec<&str> = outputs
        .iter()
        .filter(|o| !o.is_rankable())
        .map(|o| o.strategy.as_str())
        .collect();
    if !excluded.is_empty() {
        rationale.push_str(&format!("; excluded: {}", excluded.join(", ")));
    }
    rationale.push('.');
    rationale
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{chunks, resilience, RoleFailingCompleter, EARNINGS};
    use showdown_common::llm::ExtractiveCompleter;
    use showdown_common::models::ChunkId;
    use std::collections::BTreeMap;
    use std::time::Duration;

    fn index() -> EntityIndex {
        let mut by_chunk = BTreeMap::new();
        by_chunk.insert(ChunkId(0), BTreeMap::from([("acme".to_string(), 2)]));
        by_chunk.insert(ChunkId(1), BTreeMap::from([("globex".to_string(), 2)]));
        by_chunk.insert(ChunkId(2), BTreeMap::from([("acme".to_string(), 1)]));
        by_chunk.insert(ChunkId(3), BTreeMap::from([("globex".to_string(), 1)]));
        EntityIndex {
            entities: vec![],
            periods: vec![],
            by_chunk,
        }
    }

    fn evaluator(use_judge: bool) -> SynthesisStrategyEvaluator {
        SynthesisStrategyEvaluator::new(SynthesisConfig {
            use_judge,
            ..SynthesisConfig::default()
        })
    }

    const QUERY: &str = "What revenue did Acme and Globex report?";

    #[tokio::test]
    async fn test_all_strategies_scored_and_ranked() {
        let context = chunks(&EARNINGS);
        let out = evaluator(true)
            .evaluate(QUERY, &context, &index(), &ExtractiveCompleter, &resilience(), &Deadline::none())
            .await;

        assert_eq!(out.outputs.len(), 3);
        assert_eq!(out.ranking.len(), 3);
        for window in out.ranking.windows(2) {
            assert!(window[0].score >= window[1].score);
        }
        for output in &out.outputs {
            assert_eq!(output.status, SynthesisStatus::Ok);
            assert!(output.factual_completeness > 0.0);
            assert!((0.0..=1.0).contains(&output.structural_clarity));
            assert_eq!(output.response_length, output.text.chars().count());
        }
        let entity = out.output(SynthesisStrategy::EntityFocused).unwrap();
        let single = out.output(SynthesisStrategy::SinglePrompt).unwrap();
        assert!(entity.structural_clarity > single.structural_clarity);
        assert!(out.rationale.contains("gave the most complete"));
    }

    #[tokio::test]
    async fn test_failed_strategy_is_unavailable_and_unranked() {
        let context = chunks(&EARNINGS);
        let llm = RoleFailingCompleter::new(vec![AgentRole::Researcher]);
        let out = evaluator(false)
            .evaluate(QUERY, &context, &index(), &llm, &resilience(), &Deadline::none())
            .await;

        let multi = out.output(SynthesisStrategy::MultiAgent).unwrap();
        assert_eq!(multi.status, SynthesisStatus::Unavailable);
        assert!(multi.error.is_some());
        assert_eq!(llm.failures(), 3);

        let ranked: Vec<SynthesisStrategy> = out.ranking.iter().map(|r| r.strategy).collect();
        assert_eq!(ranked.len(), 2);
        assert!(!ranked.contains(&SynthesisStrategy::MultiAgent));
        assert!(out.rationale.contains("excluded: multi_agent"));
    }

    #[tokio::test]
    async fn test_critic_failure_degrades_but_stays_ranked() {
        let context = chunks(&EARNINGS);
        let llm = RoleFailingCompleter::new(vec![AgentRole::Critic]);
        let out = evaluator(false)
            .evaluate(QUERY, &context, &index(), &llm, &resilience(), &Deadline::none())
            .await;

        let multi = out.output(SynthesisStrategy::MultiAgent).unwrap();
        assert_eq!(multi.status, SynthesisStatus::Degraded);
        assert!(!multi.text.is_empty());
        assert!(multi.factual_completeness > 0.0);
        assert!(multi.error.as_deref().map_or(false, |e| e.contains("critic")));
        assert!(out.ranking.iter().any(|r| r.strategy == SynthesisStrategy::MultiAgent));
    }

    #[tokio::test]
    async fn test_judge_failure_falls_back_to_scores() {
        let context = chunks(&EARNINGS);
        let llm = RoleFailingCompleter::new(vec![AgentRole::Judge]);
        let out = evaluator(true)
            .evaluate(QUERY, &context, &index(), &llm, &resilience(), &Deadline::none())
            .await;
        assert_eq!(out.ranking.len(), 3);
        assert!(out.rationale.contains("ranked first with score"));
    }

    #[tokio::test]
    async fn test_expired_deadline_marks_incomplete() {
        let context = chunks(&EARNINGS);
        let out = evaluator(true)
            .evaluate(
                QUERY,
                &context,
                &index(),
                &ExtractiveCompleter,
                &resilience(),
                &Deadline::after(Duration::ZERO),
            )
            .await;
        assert!(out.outputs.iter().all(|o| o.incomplete && !o.is_rankable()));
        assert!(out.ranking.is_empty());
    }

    #[test]
    fn test_ties_keep_strategy_order() {
        let make = |strategy| SynthesisOutput {
            factual_completeness: 0.5,
            structural_clarity: 0.5,
            status: SynthesisStatus::Ok,
            error: None,
            ..SynthesisOutput::unavailable(strategy, "")
        };
        let outputs = vec![make(SynthesisStrategy::MultiAgent), make(SynthesisStrategy::SinglePrompt)];
        let ranking = evaluator(false).rank(&outputs);
        assert_eq!(ranking[0].strategy, SynthesisStrategy::SinglePrompt);
        assert_eq!(ranking[1].rank, 2);
    }
}
