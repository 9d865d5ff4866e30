//! Comparison report
//!
//! Provides:
//! - Document metrics (counts, page and token estimates, top words, fingerprint)
//! - Per-strategy chunking tables and ranking
//! - Per-ChunkSet entity summary, retrieval comparison and synthesis evaluation
//! - Run metadata and per-stage status flags

use chrono::{DateTime, Utc};
use serde::Serialize;
use sha2::{Digest, Sha256};
use showdown_common::config::AppConfig;
use showdown_common::models::{
    BoundaryCandidate, ChunkId, ChunkMetrics, ChunkSet, ChunkingStrategy, Document, EntityIndex, TemporalRecord,
};
use showdown_common::text::{content_words, words, Tokenizer};
use showdown_retrieval::RetrievalComparison;
use showdown_segmentation::ChunkingRank;
use showdown_synthesis::SynthesisEvaluation;
use std::collections::HashMap;
use uuid::Uuid;

/// Words per estimated page
const WORDS_PER_PAGE: f64 = 500.0;

const TOP_WORDS: usize = 10;

/// Outcome of a stage or of one strategy within it
#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum StageStatus {
    Ok,
    Degraded,
    Unavailable,
    Incomplete,
    Skipped,
}

#[derive(Debug, Clone, Serialize)]
pub struct StageRecord {
    pub stage: String,
    pub status: StageStatus,
    pub latency_ms: f64,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub note: Option<String>,
}

/// Whole-document statistics
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct DocumentMetrics {
    pub chars: usize,
    pub bytes: usize,
    pub words: usize,
    pub sentences: usize,
    pub paragraphs: usize,
    pub estimated_pages: f64,
    pub estimated_tokens: usize,

    /// Most common non-stopword words with counts, most frequent first
    pub top_words: Vec<(String, usize)>,

    /// SHA-256 of the text, hex encoded
    pub fingerprint: String,
}

impl DocumentMetrics {
    pub fn compute(doc: &Document, tokenizer: &dyn Tokenizer) -> Self {
        let text = doc.text.as_str();
        let word_count = words(text).count();
        let sentences = tokenizer
            .sentence_spans(text)
            .into_iter()
            .filter(|r| !text[r.clone()].trim().is_empty())
            .count();
        let paragraphs = text
            .split("\n\n")
            .filter(|p| !p.trim().is_empty())
            .count();

        let mut counts: HashMap<String, usize> = HashMap::new();
        for word in content_words(text) {
            *counts.entry(word).or_insert(0) += 1;
        }
        let mut top_words: Vec<(String, usize)> = counts.into_iter().collect();
        top_words.sort_by(|a, b| b.1.cmp(&a.1).then(a.0.cmp(&b.0)));
        top_words.truncate(TOP_WORDS);

        Self {
            chars: doc.char_len,
            bytes: doc.len(),
            words: word_count,
            sentences,
            paragraphs,
            estimated_pages: word_count as f64 / WORDS_PER_PAGE,
            estimated_tokens: doc.estimated_tokens,
            top_words,
            fingerprint: hex::encode(Sha256::digest(text.as_bytes())),
        }
    }
}

/// Chunk edges without text
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct ChunkSpan {
    pub id: ChunkId,
    pub start: usize,
    pub end: usize,
}

/// One row of the chunking table
#[derive(Debug, Clone, Serialize)]
pub struct ChunkSetReport {
    pub strategy: ChunkingStrategy,
    pub status: StageStatus,
    pub metrics: ChunkMetrics,
    pub rank_score: f64,
    pub spans: Vec<ChunkSpan>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub note: Option<String>,
}

impl ChunkSetReport {
    pub fn from_set(set: &ChunkSet, boundary_weight: f64, sentence_weight: f64) -> Self {
        Self {
            strategy: set.strategy,
            status: StageStatus::Ok,
            metrics: set.metrics.clone(),
            rank_score: set.rank_score(boundary_weight, sentence_weight),
            spans: set
                .chunks
                .iter()
                .map(|c| ChunkSpan {
                    id: c.id,
                    start: c.start,
                    end: c.end,
                })
                .collect(),
            note: None,
        }
    }

    pub fn missing(strategy: ChunkingStrategy, status: StageStatus, note: impl Into<String>) -> Self {
        Self {
            strategy,
            status,
            metrics: ChunkMetrics::default(),
            rank_score: 0.0,
            spans: Vec::new(),
            note: Some(note.into()),
        }
    }
}

/// Entity summary row
#[derive(Debug, Clone, Serialize)]
pub struct EntitySummary {
    pub canonical: String,
    pub display: String,
    pub aliases: Vec<String>,
    pub chunk_count: usize,
    pub mentions: u32,
}

/// Downstream results for one ChunkSet
#[derive(Debug, Clone, Serialize)]
pub struct ChunkSetAnalysis {
    pub strategy: ChunkingStrategy,
    pub entities: Vec<EntitySummary>,
    pub periods: Vec<TemporalRecord>,

    /// Chunks whose entity extraction failed and were recorded empty
    pub failed_extractions: usize,

    /// Entity extraction was overtaken by the run deadline
    pub entities_incomplete: bool,

    pub retrieval: RetrievalComparison,
    pub synthesis: SynthesisEvaluation,
}

impl ChunkSetAnalysis {
    pub fn entity_summary(index: &EntityIndex) -> Vec<EntitySummary> {
        index
            .entities
            .iter()
            .map(|e| EntitySummary {
                canonical: e.canonical.clone(),
                display: e.display.clone(),
                aliases: e.aliases.iter().cloned().collect(),
                chunk_count: e.chunk_ids.len(),
                mentions: e.mentions,
            })
            .collect()
    }
}

/// The run's output artifact
#[derive(Debug, Clone, Serialize)]
pub struct ComparisonReport {
    pub run_id: Uuid,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub latency_ms: f64,

    /// False when any stage, strategy or method is incomplete
    pub complete: bool,

    pub query: String,
    pub document: DocumentMetrics,
    pub boundaries: Vec<BoundaryCandidate>,
    pub chunking: Vec<ChunkSetReport>,
    pub chunking_ranking: Vec<ChunkingRank>,
    pub analyses: Vec<ChunkSetAnalysis>,
    pub stages: Vec<StageRecord>,
    pub config: AppConfig,
}

impl ComparisonReport {
    pub fn chunk_set(&self, strategy: ChunkingStrategy) -> Option<&ChunkSetReport> {
        self.chunking.iter().find(|c| c.strategy == strategy)
    }

    pub fn analysis(&self, strategy: ChunkingStrategy) -> Option<&ChunkSetAnalysis> {
        self.analyses.iter().find(|a| a.strategy == strategy)
    }

    pub fn stage(&self, stage: &str) -> Option<&StageRecord> {
        self.stages.iter().find(|s| s.stage == stage)
    }

    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string_pretty(self)
    }
}
