//! Retrieval method comparison
//!
//! Provides:
//! - One shared chunk embedding pass per ChunkSet
//! - Concurrent execution of the selected methods, each timed from query
//!   embedding to ranked output
//! - Uniqueness, pairwise overlap and score-diversity analysis

use crate::{
    ContextRetriever, EntityRetriever, Embeddings, HybridRetriever, QueryVectors, RetrievalInput,
    Retriever, VectorRetriever,
};
use futures::future::join_all;
use serde::Serialize;
use showdown_common::config::RetrievalConfig;
use showdown_common::embeddings::Embedder;
use showdown_common::errors::{AppError, Result};
use showdown_common::metrics;
use showdown_common::models::{
    ChunkId, ChunkSet, ChunkingStrategy, EntityIndex, MethodStatus, RetrievalMethod, RetrievalResult,
};
use showdown_common::resilience::{Deadline, Resilience};
use showdown_segmentation::EntityTemporalTracker;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Arc;
use std::time::Instant;
use tracing::{info, instrument, warn};

/// Overlap between two methods' result sets
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct PairOverlap {
    pub first: RetrievalMethod,
    pub second: RetrievalMethod,
    pub shared: usize,

    /// Shared chunks as a percentage of the smaller set
    pub percent: f64,
}

/// Per-method uniqueness and score spread
#[derive(Debug, Clone, Serialize)]
pub struct MethodProfile {
    pub method: RetrievalMethod,
    pub unique_percent: f64,
    pub score_mean: f64,
    pub score_std_dev: f64,
    pub score_min: f64,
    pub score_max: f64,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct RetrievalSummary {
    pub fastest: Option<RetrievalMethod>,
    pub most_unique: Option<RetrievalMethod>,
    pub highest_overlap: Option<PairOverlap>,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct RetrievalAnalysis {
    pub pairwise: Vec<PairOverlap>,
    pub profiles: Vec<MethodProfile>,
    pub summary: RetrievalSummary,
}

/// All method results for one ChunkSet
#[derive(Debug, Clone, Serialize)]
pub struct RetrievalComparison {
    pub strategy: ChunkingStrategy,
    pub query_entities: Vec<String>,
    pub results: Vec<RetrievalResult>,
    pub analysis: RetrievalAnalysis,
}

impl RetrievalComparison {
    /// Union of every method's first `per_method` results, deduplicated,
    /// ordered by best rank then chunk id
    pub fn pooled_chunks(&self, per_method: usize) -> Vec<ChunkId> {
        let mut best: BTreeMap<ChunkId, usize> = BTreeMap::new();
        for result in &self.results {
            for (rank, id) in result.chunk_ids().take(per_method).enumerate() {
                let entry = best.entry(id).or_insert(rank);
                *entry = (*entry).min(rank);
            }
        }
        let mut pooled: Vec<(usize, ChunkId)> = best.into_iter().map(|(id, rank)| (rank, id)).collect();
        pooled.sort();
        pooled.into_iter().map(|(_, id)| id).collect()
    }

    pub fn result(&self, method: RetrievalMethod) -> Option<&RetrievalResult> {
        self.results.iter().find(|r| r.method == method)
    }
}

enum EmbeddingState {
    NotNeeded,
    Ready(Embeddings),
    Failed(String),
    Expired,
}

impl EmbeddingState {
    fn ready(&self) -> Option<&Embeddings> {
        match self {
            EmbeddingState::Ready(e) => Some(e),
            _ => None,
        }
    }
}

/// Runs the configured retrieval methods side by side
pub struct RetrievalMethodComparator {
    config: RetrievalConfig,
    tracker: Arc<EntityTemporalTracker>,
}

impl RetrievalMethodComparator {
    pub fn new(config: RetrievalConfig, tracker: Arc<EntityTemporalTracker>) -> Self {
        Self { config, tracker }
    }

    fn retriever(&self, method: RetrievalMethod) -> Box<dyn Retriever> {
        match method {
            RetrievalMethod::Vector => Box::new(VectorRetriever),
            RetrievalMethod::Entity => Box::new(EntityRetriever),
            RetrievalMethod::Context => Box::new(ContextRetriever::new(self.config.context_radius)),
            RetrievalMethod::Hybrid => Box::new(HybridRetriever::with_weights(
                self.config.vector_weight,
                self.config.entity_weight,
            )),
        }
    }

    /// Compare every configured method on one ChunkSet
    ///
    /// Never fails: a method that cannot run is reported unavailable, and
    /// one overtaken by the deadline is reported incomplete.
    #[instrument(skip_all, fields(strategy = %chunks.strategy, chunk_count = chunks.chunks.len()))]
    pub async fn compare(
        &self,
        chunks: &ChunkSet,
        index: &EntityIndex,
        query: &str,
        embedder: &dyn Embedder,
        resilience: &Resilience,
        deadline: &Deadline,
    ) -> RetrievalComparison {
        let methods = &self.config.methods;

        if chunks.is_empty() {
            let results: Vec<RetrievalResult> = methods
                .iter()
                .map(|&method| RetrievalResult {
                    note: Some("empty chunk set".to_string()),
                    ..RetrievalResult::new(method, Vec::new())
                })
                .collect();
            return RetrievalComparison {
                strategy: chunks.strategy,
                query_entities: Vec::new(),
                analysis: analyze(&results),
                results,
            };
        }

        let query_entities = self.tracker.query_entities(index, query);
        let state = if methods.iter().any(|m| m.needs_embeddings()) {
            self.embed_chunks(chunks, embedder, resilience, deadline).await
        } else {
            EmbeddingState::NotNeeded
        };

        let input = RetrievalInput {
            chunks,
            index,
            query_entities: &query_entities,
            embeddings: None,
        };
        let runs = methods.iter().map(|&method| {
            let (input, state) = (&input, &state);
            async move {
                self.run_method(method, input, state, query, embedder, resilience, deadline)
                    .await
            }
        });
        let mut results: Vec<RetrievalResult> = join_all(runs).await;

        assign_uniqueness(&mut results);
        let analysis = analyze(&results);
        info!(
            methods = results.len(),
            fastest = ?analysis.summary.fastest,
            most_unique = ?analysis.summary.most_unique,
            "Retrieval compared"
        );

        RetrievalComparison {
            strategy: chunks.strategy,
            query_entities,
            results,
            analysis,
        }
    }

    /// Embed every chunk once; each method embeds the query itself
    async fn embed_chunks(
        &self,
        chunks: &ChunkSet,
        embedder: &dyn Embedder,
        resilience: &Resilience,
        deadline: &Deadline,
    ) -> EmbeddingState {
        let texts: Vec<String> = chunks.chunks.iter().map(|c| c.text.clone()).collect();

        let call = resilience.call("embedding", || embedder.embed_batch(&texts));
        match deadline.run("retrieval", call).await {
            Err(AppError::Timeout { .. }) => EmbeddingState::Expired,
            Err(e) | Ok(Err(e)) => {
                warn!(error = %e, "Embeddings unavailable for retrieval");
                EmbeddingState::Failed(e.to_string())
            }
            Ok(Ok(vectors)) if vectors.len() != texts.len() => EmbeddingState::Failed(format!(
                "{} vectors returned for {} texts",
                vectors.len(),
                texts.len()
            )),
            Ok(Ok(vectors)) => EmbeddingState::Ready(Embeddings::new(vectors)),
        }
    }

    async fn embed_query(
        &self,
        query: &str,
        embedder: &dyn Embedder,
        resilience: &Resilience,
        deadline: &Deadline,
    ) -> Result<Vec<f32>> {
        let call = resilience.call("embedding", || embedder.embed(query));
        deadline.run("retrieval", call).await?
    }

    /// Run one method; its latency covers query embedding and ranking
    #[allow(clippy::too_many_arguments)]
    async fn run_method(
        &self,
        method: RetrievalMethod,
        input: &RetrievalInput<'_>,
        state: &EmbeddingState,
        query: &str,
        embedder: &dyn Embedder,
        resilience: &Resilience,
        deadline: &Deadline,
    ) -> RetrievalResult {
        let blocked_by_embeddings = method.needs_embeddings() && method != RetrievalMethod::Hybrid;
        if deadline.is_expired() || (blocked_by_embeddings && matches!(state, EmbeddingState::Expired)) {
            metrics::record_stage_failure("retrieval", method.as_str(), "timeout");
            return RetrievalResult::incomplete(method);
        }
        if let (true, EmbeddingState::Failed(reason)) = (blocked_by_embeddings, state) {
            metrics::record_stage_failure("retrieval", method.as_str(), "embedding_unavailable");
            return RetrievalResult::unavailable(method, format!("embeddings unavailable: {}", reason));
        }

        let started = Instant::now();
        let query_vector = match state.ready().filter(|_| method.needs_embeddings()) {
            Some(_) => match self.embed_query(query, embedder, resilience, deadline).await {
                Ok(vector) => Some(vector),
                Err(AppError::Timeout { .. }) => {
                    metrics::record_stage_failure("retrieval", method.as_str(), "timeout");
                    return RetrievalResult::incomplete(method);
                }
                Err(e) if blocked_by_embeddings => {
                    warn!(method = %method, error = %e, "Query embedding unavailable");
                    metrics::record_stage_failure("retrieval", method.as_str(), "embedding_unavailable");
                    return RetrievalResult {
                        latency_ms: started.elapsed().as_secs_f64() * 1000.0,
                        ..RetrievalResult::unavailable(method, format!("embeddings unavailable: {}", e))
                    };
                }
                Err(e) => {
                    warn!(method = %method, error = %e, "Query embedding unavailable");
                    None
                }
            },
            None => None,
        };

        let input = RetrievalInput {
            embeddings: state
                .ready()
                .zip(query_vector.as_deref())
                .map(|(index, query)| QueryVectors { index, query }),
            ..*input
        };
        let outcome = self.retriever(method).retrieve(&input, self.config.top_k);
        let elapsed = started.elapsed().as_secs_f64();
        metrics::record_retrieval(method.as_str(), elapsed);

        match outcome {
            Ok(retrieved) => RetrievalResult {
                latency_ms: elapsed * 1000.0,
                status: retrieved.status,
                note: retrieved.note,
                ..RetrievalResult::new(method, retrieved.ranked)
            },
            Err(e) => {
                warn!(method = %method, error = %e, "Retrieval method failed");
                metrics::record_stage_failure("retrieval", method.as_str(), "error");
                RetrievalResult {
                    latency_ms: elapsed * 1000.0,
                    ..RetrievalResult::unavailable(method, e.to_string())
                }
            }
        }
    }
}

fn is_comparable(result: &RetrievalResult) -> bool {
    result.status != MethodStatus::Unavailable && !result.incomplete
}

/// Count chunks returned by exactly one comparable method
fn assign_uniqueness(results: &mut [RetrievalResult]) {
    let mut seen: HashMap<ChunkId, usize> = HashMap::new();
    for result in results.iter().filter(|r| is_comparable(r)) {
        for id in result.chunk_ids() {
            *seen.entry(id).or_insert(0) += 1;
        }
    }
    for result in results.iter_mut() {
        result.unique_count = result
            .chunk_ids()
            .filter(|id| seen.get(id) == Some(&1))
            .count();
    }
}

/// Pairwise overlap, per-method profile and summary
pub fn analyze(results: &[RetrievalResult]) -> RetrievalAnalysis {
    let comparable: Vec<&RetrievalResult> = results.iter().filter(|r| is_comparable(r)).collect();

    let mut pairwise = Vec::new();
    for (i, a) in comparable.iter().enumerate() {
        for b in &comparable[i + 1..] {
            let ids_a: HashSet<ChunkId> = a.chunk_ids().collect();
            let ids_b: HashSet<ChunkId> = b.chunk_ids().collect();
            let shared = ids_a.intersection(&ids_b).count();
            let smaller = ids_a.len().min(ids_b.len());
            pairwise.push(PairOverlap {
                first: a.method,
                second: b.method,
                shared,
                percent: if smaller == 0 { 0.0 } else { shared as f64 * 100.0 / smaller as f64 },
            });
        }
    }

    let profiles: Vec<MethodProfile> = comparable.iter().map(|r| profile(r)).collect();

    let fastest = comparable
        .iter()
        .fold(None::<&RetrievalResult>, |best, r| match best {
            Some(b) if b.latency_ms <= r.latency_ms => Some(b),
            _ => Some(r),
        })
        .map(|r| r.method);
    let most_unique = comparable
        .iter()
        .fold(None::<&RetrievalResult>, |best, r| match best {
            Some(b) if b.unique_count >= r.unique_count => Some(b),
            _ => Some(r),
        })
        .map(|r| r.method);
    let highest_overlap = pairwise
        .iter()
        .fold(None::<&PairOverlap>, |best, p| match best {
            Some(b) if b.shared >= p.shared => Some(b),
            _ => Some(p),
        })
        .cloned();

    RetrievalAnalysis {
        pairwise,
        profiles,
        summary: RetrievalSummary {
            fastest,
            most_unique,
            highest_overlap,
        },
    }
}

fn profile(result: &RetrievalResult) -> MethodProfile {
    let scores: Vec<f64> = result.ranked.iter().map(|s| s.score as f64).collect();
    let n = scores.len() as f64;
    let (mean, std_dev, min, max) = if scores.is_empty() {
        (0.0, 0.0, 0.0, 0.0)
    } else {
        let mean = scores.iter().sum::<f64>() / n;
        let variance = scores.iter().map(|s| (s - mean).powi(2)).sum::<f64>() / n;
        let min = scores.iter().copied().fold(f64::INFINITY, f64::min);
        let max = scores.iter().copied().fold(f64::NEG_INFINITY, f64::max);
        (mean, variance.sqrt(), min, max)
    };

    MethodProfile {
        method: result.method,
        unique_percent: if result.ranked.is_empty() {
            0.0
        } else {
            result.unique_count as f64 * 100.0 / n
        },
        score_mean: mean,
        score_std_dev: std_dev,
        score_min: min,
        score_max: max,
    }
}
