//! Staged comparison pipeline
//!
//! Provides:
//! - Boundary detection with optional LLM refinement
//! - Concurrent chunking, one task per strategy
//! - Per-ChunkSet entity extraction on bounded blocking workers
//! - Per-ChunkSet retrieval comparison and synthesis evaluation
//! - Append-only reduction into the comparison report
//!
//! Every stage runs under the run deadline. Work overtaken by it is flagged
//! incomplete and the report is still returned.

use crate::context::RunContext;
use crate::report::{
    ChunkSetAnalysis, ChunkSetReport, ComparisonReport, DocumentMetrics, StageRecord, StageStatus,
};
use chrono::Utc;
use futures::future::join_all;
use showdown_common::errors::{AppError, Result};
use showdown_common::metrics;
use showdown_common::models::{
    BoundaryCandidate, Chunk, ChunkEntities, ChunkSet, Document, EntityIndex, MethodStatus, SynthesisStatus,
};
use showdown_common::resilience::Deadline;
use showdown_retrieval::RetrievalMethodComparator;
use showdown_segmentation::{rank_strategies, BoundaryDetector, ChunkingEngine};
use showdown_synthesis::SynthesisStrategyEvaluator;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::Semaphore;
use tracing::{error, info, instrument, warn};
use uuid::Uuid;

/// Runs one document and one query through every stage
pub struct Pipeline {
    ctx: RunContext,
    detector: BoundaryDetector,
    chunker: ChunkingEngine,
    comparator: RetrievalMethodComparator,
    evaluator: SynthesisStrategyEvaluator,
}

fn stage_record(stage: &str, status: StageStatus, started: Instant, note: Option<String>) -> StageRecord {
    let elapsed = started.elapsed().as_secs_f64();
    metrics::record_stage(stage, elapsed);
    StageRecord {
        stage: stage.to_string(),
        status,
        latency_ms: elapsed * 1000.0,
        note,
    }
}

/// Worst status wins: incomplete, then unavailable, then degraded
fn combine(statuses: impl IntoIterator<Item = StageStatus>) -> StageStatus {
    let mut combined = StageStatus::Ok;
    for status in statuses {
        combined = match (combined, status) {
            (StageStatus::Incomplete, _) | (_, StageStatus::Incomplete) => StageStatus::Incomplete,
            (StageStatus::Unavailable, _) | (_, StageStatus::Unavailable) => StageStatus::Unavailable,
            (StageStatus::Degraded, _) | (_, StageStatus::Degraded) => StageStatus::Degraded,
            _ => StageStatus::Ok,
        };
    }
    combined
}

impl Pipeline {
    pub fn new(ctx: RunContext) -> Result<Self> {
        let config = ctx.config.clone();
        Ok(Self {
            detector: BoundaryDetector::new(config.boundary.clone(), ctx.tokenizer.clone(), ctx.tracker.clone())?,
            chunker: ChunkingEngine::new(
                config.chunking.clone(),
                config.boundary.confidence_threshold,
                ctx.tokenizer.clone(),
            ),
            comparator: RetrievalMethodComparator::new(config.retrieval.clone(), ctx.tracker.clone()),
            evaluator: SynthesisStrategyEvaluator::new(config.synthesis.clone()),
            ctx,
        })
    }

    /// Run under the configured timeout
    pub async fn run(&self, text: &str, query: &str) -> Result<ComparisonReport> {
        self.run_until(text, query, Deadline::after(self.ctx.config.run_timeout()))
            .await
    }

    /// Run under an explicit deadline
    ///
    /// Fails only on fatal errors: invalid configuration, unusable input, or
    /// an inconsistent chunk partition.
    #[instrument(skip_all, fields(run_id = tracing::field::Empty, doc_len = text.len()))]
    pub async fn run_until(&self, text: &str, query: &str, deadline: Deadline) -> Result<ComparisonReport> {
        let run_id = Uuid::new_v4();
        tracing::Span::current().record("run_id", tracing::field::display(run_id));
        let started_at = Utc::now();
        let clock = Instant::now();
        let config = &self.ctx.config;
        let mut stages = Vec::new();

        let result = async {
            config.validate()?;
            let doc = Document::new(text, self.ctx.tokenizer.as_ref());

            let started = Instant::now();
            let boundaries = self.detector.detect(&doc)?;
            stages.push(stage_record("boundaries", StageStatus::Ok, started, None));

            let started = Instant::now();
            let (boundaries, status, note) = self.refine(&doc, boundaries, &deadline).await;
            stages.push(stage_record("boundary_refinement", status, started, note));

            let started = Instant::now();
            let (sets, chunking) = self.chunk_all(&doc, &boundaries, &deadline).await?;
            let chunking_status = combine(chunking.iter().map(|c| c.status));
            stages.push(stage_record("chunking", chunking_status, started, None));
            let chunking_ranking = rank_strategies(
                &sets,
                config.chunking.boundary_weight,
                config.chunking.sentence_weight,
            );

            let started = Instant::now();
            let analyses: Vec<ChunkSetAnalysis> =
                join_all(sets.iter().map(|set| self.analyze(set, query, &deadline))).await;
            let analysis_status = if sets.is_empty() {
                StageStatus::Skipped
            } else {
                combine(analyses.iter().map(analysis_status))
            };
            stages.push(stage_record("analysis", analysis_status, started, None));

            Ok::<_, AppError>((doc, boundaries, chunking, chunking_ranking, analyses))
        }
        .await;

        let (doc, boundaries, chunking, chunking_ranking, analyses) = match result {
            Ok(parts) => parts,
            Err(e) => {
                error!(error = %e, code = ?e.code(), "Comparison run failed");
                metrics::record_run(clock.elapsed().as_secs_f64(), false);
                return Err(e);
            }
        };

        let complete = stages.iter().all(|s| s.status != StageStatus::Incomplete);
        let latency = clock.elapsed().as_secs_f64();
        metrics::record_run(latency, complete);
        info!(
            complete = complete,
            latency_ms = latency * 1000.0,
            chunk_sets = analyses.len(),
            best_chunking = ?chunking_ranking.first().map(|r| r.strategy),
            "Comparison run finished"
        );

        Ok(ComparisonReport {
            run_id,
            started_at,
            finished_at: Utc::now(),
            latency_ms: latency * 1000.0,
            complete,
            query: query.to_string(),
            document: DocumentMetrics::compute(&doc, self.ctx.tokenizer.as_ref()),
            boundaries,
            chunking,
            chunking_ranking,
            analyses,
            stages,
            config: config.as_ref().clone(),
        })
    }

    async fn refine(
        &self,
        doc: &Document,
        boundaries: Vec<BoundaryCandidate>,
        deadline: &Deadline,
    ) -> (Vec<BoundaryCandidate>, StageStatus, Option<String>) {
        if !self.ctx.config.boundary.llm_refinement {
            return (boundaries, StageStatus::Skipped, None);
        }
        if deadline.is_expired() {
            return (boundaries, StageStatus::Incomplete, None);
        }

        let refinement = self.detector.refine(
            doc,
            boundaries.clone(),
            self.ctx.llm.as_ref(),
            self.ctx.resilience.as_ref(),
        );
        match deadline.run("boundary_refinement", refinement).await {
            Ok(Ok(refined)) => (refined, StageStatus::Ok, None),
            Ok(Err(e)) => {
                warn!(error = %e, "Boundary refinement failed, keeping heuristic candidates");
                metrics::record_stage_failure("boundaries", "llm_refinement", "unavailable");
                (boundaries, StageStatus::Degraded, Some(e.to_string()))
            }
            Err(_) => {
                warn!("Boundary refinement overtaken by the run deadline");
                (boundaries, StageStatus::Incomplete, None)
            }
        }
    }

    async fn chunk_all(
        &self,
        doc: &Document,
        boundaries: &[BoundaryCandidate],
        deadline: &Deadline,
    ) -> Result<(Vec<ChunkSet>, Vec<ChunkSetReport>)> {
        let config = &self.ctx.config.chunking;
        let runs = config.strategies.iter().map(|&strategy| async move {
            if deadline.is_expired() {
                return (strategy, Err(AppError::Timeout { stage: "chunking".to_string() }));
            }
            let chunked = self.chunker.chunk(
                strategy,
                doc,
                boundaries,
                self.ctx.embedder.as_ref(),
                self.ctx.resilience.as_ref(),
            );
            (strategy, deadline.run("chunking", chunked).await)
        });

        let mut sets = Vec::new();
        let mut reports = Vec::new();
        for (strategy, outcome) in join_all(runs).await {
            match outcome {
                Ok(Ok(set)) => {
                    reports.push(ChunkSetReport::from_set(&set, config.boundary_weight, config.sentence_weight));
                    sets.push(set);
                }
                Ok(Err(e)) if e.is_fatal() => {
                    error!(strategy = %strategy, error = %e, "Chunking produced an inconsistent partition");
                    return Err(e);
                }
                Ok(Err(e)) => {
                    warn!(strategy = %strategy, error = %e, "Chunking strategy unavailable");
                    metrics::record_stage_failure("chunking", strategy.as_str(), "unavailable");
                    reports.push(ChunkSetReport::missing(strategy, StageStatus::Unavailable, e.to_string()));
                }
                Err(_) => {
                    warn!(strategy = %strategy, "Chunking overtaken by the run deadline");
                    metrics::record_stage_failure("chunking", strategy.as_str(), "timeout");
                    reports.push(ChunkSetReport::missing(strategy, StageStatus::Incomplete, "run deadline expired"));
                }
            }
        }
        Ok((sets, reports))
    }

    /// Entity index for one ChunkSet
    ///
    /// Each chunk is extracted on a blocking worker; at most
    /// `run.max_concurrency` run at once. A failed worker leaves an empty
    /// record for its chunk and is counted. Returns a timeout error when the
    /// deadline overtakes extraction.
    async fn extract_entities(&self, set: &ChunkSet, deadline: &Deadline) -> Result<(EntityIndex, usize)> {
        if deadline.is_expired() {
            return Err(AppError::Timeout { stage: "entities".to_string() });
        }

        let semaphore = Arc::new(Semaphore::new(self.ctx.config.run.max_concurrency.max(1)));
        let workers = set.chunks.iter().map(|chunk| {
            let semaphore = semaphore.clone();
            let tracker = self.ctx.tracker.clone();
            let (id, text) = (chunk.id, chunk.text.clone());
            async move {
                let outcome = match semaphore.acquire_owned().await {
                    Ok(permit) => tokio::task::spawn_blocking(move || {
                        let _permit = permit;
                        tracker.extract(id, &text)
                    })
                    .await
                    .map_err(|e| e.to_string()),
                    Err(e) => Err(e.to_string()),
                };
                (id, outcome)
            }
        });

        let results = deadline.run("entities", join_all(workers)).await?;

        let mut failed = 0;
        let extractions: Vec<ChunkEntities> = results
            .into_iter()
            .map(|(id, outcome)| {
                outcome.unwrap_or_else(|message| {
                    warn!(chunk = %id, error = %message, "Entity extraction failed, recording empty");
                    metrics::record_stage_failure("entities", set.strategy.as_str(), "worker_failed");
                    failed += 1;
                    ChunkEntities {
                        chunk_id: id,
                        ..ChunkEntities::default()
                    }
                })
            })
            .collect();
        Ok((self.ctx.tracker.merge(extractions), failed))
    }

    #[instrument(skip_all, fields(strategy = %set.strategy, chunk_count = set.chunks.len()))]
    async fn analyze(&self, set: &ChunkSet, query: &str, deadline: &Deadline) -> ChunkSetAnalysis {
        let config = &self.ctx.config;

        let started = Instant::now();
        let (index, failed_extractions, entities_incomplete) = match self.extract_entities(set, deadline).await {
            Ok((index, failed)) => (index, failed, false),
            Err(e) => {
                warn!(strategy = %set.strategy, error = %e, "Entity extraction overtaken by the run deadline");
                metrics::record_stage_failure("entities", set.strategy.as_str(), "timeout");
                (EntityIndex::default(), 0, true)
            }
        };
        metrics::record_stage("entities", started.elapsed().as_secs_f64());

        let started = Instant::now();
        let retrieval = self
            .comparator
            .compare(
                set,
                &index,
                query,
                self.ctx.embedder.as_ref(),
                self.ctx.resilience.as_ref(),
                deadline,
            )
            .await;
        metrics::record_stage("retrieval", started.elapsed().as_secs_f64());

        let pooled: Vec<Chunk> = retrieval
            .pooled_chunks(config.synthesis.top_k)
            .into_iter()
            .filter_map(|id| set.get(id).cloned())
            .collect();

        let started = Instant::now();
        let synthesis = self
            .evaluator
            .evaluate(
                query,
                &pooled,
                &index,
                self.ctx.llm.as_ref(),
                self.ctx.resilience.as_ref(),
                deadline,
            )
            .await;
        metrics::record_stage("synthesis", started.elapsed().as_secs_f64());

        ChunkSetAnalysis {
            strategy: set.strategy,
            entities: ChunkSetAnalysis::entity_summary(&index),
            periods: index.periods.clone(),
            failed_extractions,
            entities_incomplete,
            retrieval,
            synthesis,
        }
    }
}

fn analysis_status(analysis: &ChunkSetAnalysis) -> StageStatus {
    let retrieval = analysis.retrieval.results.iter().map(|r| {
        if r.incomplete {
            StageStatus::Incomplete
        } else {
            match r.status {
                MethodStatus::Ok => StageStatus::Ok,
                MethodStatus::Degraded => StageStatus::Degraded,
                MethodStatus::Unavailable => StageStatus::Unavailable,
            }
        }
    });
    let synthesis = analysis.synthesis.outputs.iter().map(|o| {
        if o.incomplete {
            StageStatus::Incomplete
        } else {
            match o.status {
                SynthesisStatus::Ok => StageStatus::Ok,
                SynthesisStatus::Degraded => StageStatus::Degraded,
                SynthesisStatus::Unavailable => StageStatus::Unavailable,
            }
        }
    });
    let extraction = if analysis.entities_incomplete {
        Some(StageStatus::Incomplete)
    } else {
        (analysis.failed_extractions > 0).then_some(StageStatus::Degraded)
    };
    combine(retrieval.chain(synthesis).chain(extraction))
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use showdown_common::config::AppConfig;
    use showdown_common::embeddings::{Embedder, HashEmbedder};
    use showdown_common::llm::{AgentRole, CompletionProvider, ExtractiveCompleter, RoleConfig};
    use showdown_common::models::{ChunkingStrategy, RetrievalMethod, SynthesisStrategy};
    use std::time::Duration;

    const TURN: &str = "we reviewed the numbers from last week and agreed that the rollout went better than expected. the support queue is shorter now, and most of the remaining tickets are about billing. next we need to finish the migration plan and share it with the wider team before friday.";

    fn transcript() -> String {
        ["Alice", "Bob", "Carol", "Dave", "Erin", "Frank"]
            .iter()
            .map(|speaker| format!("{}: {}", speaker, TURN))
            .collect::<Vec<_>>()
            .join("\n")
    }

    fn earnings() -> String {
        [
            "# Acme Corp\n\nAcme Corp reported revenue of 4 billion dollars in Q3 2023. Acme margins improved to 21 percent. Acme also raised its dividend after strong revenue growth, and Acme shareholders welcomed the news.\n\n",
            "# Globex Inc\n\nGlobex Inc opened two factories in Ohio during 2023. Globex expects output to double by 2025. Globex reported revenue of 2 billion dollars, below forecasts, and Globex cut its outlook.\n\n",
        ]
        .concat()
        .repeat(3)
    }

    struct DownEmbedder;

    #[async_trait]
    impl Embedder for DownEmbedder {
        async fn embed(&self, _text: &str) -> Result<Vec<f32>> {
            Err(AppError::EmbeddingUnavailable { message: "connection refused".into() })
        }

        async fn embed_batch(&self, _texts: &[String]) -> Result<Vec<Vec<f32>>> {
            Err(AppError::EmbeddingUnavailable { message: "connection refused".into() })
        }

        fn model_name(&self) -> &str {
            "down"
        }

        fn dimension(&self) -> usize {
            8
        }
    }

    /// Researcher calls always fail; everything else is extractive
    struct NoResearchCompleter;

    #[async_trait]
    impl CompletionProvider for NoResearchCompleter {
        async fn complete(&self, prompt: &str, role: &RoleConfig) -> Result<String> {
            if role.role == AgentRole::Researcher {
                return Err(AppError::external("llm", "503 service unavailable"));
            }
            ExtractiveCompleter.complete(prompt, role).await
        }

        fn model_name(&self) -> &str {
            "no-research"
        }
    }

    fn config() -> AppConfig {
        let mut config = AppConfig::default();
        config.resilience.initial_backoff_ms = 1;
        config.resilience.max_backoff_ms = 4;
        config.run.requests_per_second = 1000;
        config.run.burst = 1000;
        config
    }

    fn pipeline_with(embedder: Arc<dyn Embedder>, llm: Arc<dyn CompletionProvider>) -> Pipeline {
        let ctx = RunContext::with_collaborators(config(), embedder, llm).unwrap();
        Pipeline::new(ctx).unwrap()
    }

    fn pipeline() -> Pipeline {
        pipeline_with(Arc::new(HashEmbedder::new(128)), Arc::new(ExtractiveCompleter))
    }

    #[tokio::test]
    async fn test_empty_document_is_input_error() {
        let result = pipeline().run("", "anything").await;
        assert!(matches!(result, Err(AppError::Input { .. })));

        let result = pipeline().run(" \n\t ", "anything").await;
        assert!(matches!(result, Err(AppError::Input { .. })));
    }

    #[tokio::test]
    async fn test_transcript_report() {
        let text = transcript();
        let report = pipeline().run(&text, "What did the team agree about billing?").await.unwrap();

        assert!(report.complete);
        assert_eq!(report.chunking.len(), 3);
        assert_eq!(report.analyses.len(), 3);
        assert_eq!(report.document.bytes, text.len());

        let aware = report.chunk_set(ChunkingStrategy::BoundaryAware).unwrap();
        let fixed = report.chunk_set(ChunkingStrategy::FixedSize).unwrap();
        assert!(aware.metrics.boundary_score > fixed.metrics.boundary_score);
        assert_eq!(aware.metrics.chunk_count, 3);
        assert!(aware.metrics.chunk_count < fixed.metrics.chunk_count);

        let position = |s| report.chunking_ranking.iter().position(|r| r.strategy == s).unwrap();
        assert!(position(ChunkingStrategy::BoundaryAware) < position(ChunkingStrategy::FixedSize));

        for analysis in &report.analyses {
            assert_eq!(analysis.retrieval.results.len(), 4);
            assert_eq!(analysis.synthesis.outputs.len(), 3);
            assert!(!analysis.synthesis.ranking.is_empty());
        }
        for pair in report.boundaries.windows(2) {
            assert!(pair[0].position < pair[1].position);
        }
    }

    #[tokio::test]
    async fn test_entity_retrieval_and_sections() {
        let text = earnings();
        let report = pipeline().run(&text, "What revenue did Globex report?").await.unwrap();
        let analysis = report.analysis(ChunkingStrategy::BoundaryAware).unwrap();

        assert!(analysis.entities.iter().any(|e| e.canonical == "globex"));
        assert_eq!(analysis.retrieval.query_entities, vec!["globex"]);
        let entity = analysis.retrieval.result(RetrievalMethod::Entity).unwrap();
        assert!(!entity.ranked.is_empty());
        let chunks = &report.chunk_set(ChunkingStrategy::BoundaryAware).unwrap().spans;
        for id in entity.chunk_ids() {
            let span = chunks.iter().find(|s| s.id == id).unwrap();
            assert!(text[span.start..span.end].contains("Globex"));
        }
    }

    #[tokio::test]
    async fn test_ranking_is_deterministic() {
        let text = earnings();
        let query = "How did Acme revenue change?";
        let first = pipeline().run(&text, query).await.unwrap();
        let second = pipeline().run(&text, query).await.unwrap();

        assert_eq!(first.chunking_ranking, second.chunking_ranking);
        assert_eq!(first.boundaries, second.boundaries);
        for (a, b) in first.analyses.iter().zip(&second.analyses) {
            for (ra, rb) in a.retrieval.results.iter().zip(&b.retrieval.results) {
                assert_eq!(ra.chunk_ids().collect::<Vec<_>>(), rb.chunk_ids().collect::<Vec<_>>());
            }
            assert_eq!(a.synthesis.ranking, b.synthesis.ranking);
        }
        assert_ne!(first.run_id, second.run_id);
    }

    #[tokio::test]
    async fn test_expired_deadline_returns_incomplete_report() {
        let report = pipeline()
            .run_until(&transcript(), "billing", Deadline::after(Duration::ZERO))
            .await
            .unwrap();
        assert!(!report.complete);
        assert!(report
            .chunking
            .iter()
            .all(|c| c.status == StageStatus::Incomplete));
        assert!(report.analyses.is_empty());
        assert_eq!(report.stage("chunking").map(|s| s.status), Some(StageStatus::Incomplete));
    }

    #[tokio::test]
    async fn test_deadline_during_entity_extraction_is_incomplete() {
        let p = pipeline();
        let text = transcript();
        let set = ChunkSet {
            strategy: ChunkingStrategy::FixedSize,
            chunks: p.chunker.fixed_size(&text),
            metrics: Default::default(),
        };

        let expired = Deadline::after(Duration::ZERO);
        let err = p.extract_entities(&set, &expired).await.unwrap_err();
        assert!(matches!(err, AppError::Timeout { .. }));

        let analysis = p.analyze(&set, "billing", &expired).await;
        assert!(analysis.entities_incomplete);
        assert_eq!(analysis.failed_extractions, 0);
        assert_eq!(analysis_status(&analysis), StageStatus::Incomplete);

        let (index, failed) = p.extract_entities(&set, &Deadline::none()).await.unwrap();
        assert_eq!(failed, 0);
        assert!(index.entities.iter().any(|e| e.canonical == "carol"));
    }

    #[tokio::test]
    async fn test_embedding_outage_degrades_without_failing() {
        let report = pipeline_with(Arc::new(DownEmbedder), Arc::new(ExtractiveCompleter))
            .run(&earnings(), "What revenue did Acme report?")
            .await
            .unwrap();

        let semantic = report.chunk_set(ChunkingStrategy::Semantic).unwrap();
        assert_eq!(semantic.status, StageStatus::Unavailable);
        assert!(report.analysis(ChunkingStrategy::Semantic).is_none());
        assert!(report.chunking_ranking.iter().all(|r| r.strategy != ChunkingStrategy::Semantic));

        let analysis = report.analysis(ChunkingStrategy::BoundaryAware).unwrap();
        let vector = analysis.retrieval.result(RetrievalMethod::Vector).unwrap();
        assert_eq!(vector.status, MethodStatus::Unavailable);
        let entity = analysis.retrieval.result(RetrievalMethod::Entity).unwrap();
        assert_eq!(entity.status, MethodStatus::Ok);
        assert!(report.complete);
    }

    #[tokio::test]
    async fn test_llm_failure_excludes_one_strategy() {
        let report = pipeline_with(Arc::new(HashEmbedder::new(128)), Arc::new(NoResearchCompleter))
            .run(&earnings(), "What revenue did Acme report?")
            .await
            .unwrap();

        for analysis in &report.analyses {
            let multi = analysis.synthesis.output(SynthesisStrategy::MultiAgent).unwrap();
            assert_eq!(multi.status, SynthesisStatus::Unavailable);
            let ranked: Vec<_> = analysis.synthesis.ranking.iter().map(|r| r.strategy).collect();
            assert_eq!(ranked.len(), 2);
            assert!(!ranked.contains(&SynthesisStrategy::MultiAgent));
        }
        assert_eq!(report.stage("analysis").map(|s| s.status), Some(StageStatus::Unavailable));
    }

    #[test]
    fn test_combine_prefers_worst_status() {
        assert_eq!(combine([]), StageStatus::Ok);
        assert_eq!(combine([StageStatus::Ok, StageStatus::Degraded]), StageStatus::Degraded);
        assert_eq!(
            combine([StageStatus::Unavailable, StageStatus::Incomplete, StageStatus::Ok]),
            StageStatus::Incomplete
        );
    }
}
