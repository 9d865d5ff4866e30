//! Chunking strategies
//!
//! Provides:
//! - Fixed-size windows that ignore structure
//! - Boundary-aware segmentation at confident candidates
//! - Embedding-driven semantic merging with bounded seam overlap
//! - Partition validation, quality metrics and strategy ranking

use serde::Serialize;
use showdown_common::config::ChunkingConfig;
use showdown_common::embeddings::{cosine_similarity, Embedder};
use showdown_common::errors::{AppError, Result};
use showdown_common::metrics;
use showdown_common::models::{
    BoundaryCandidate, Chunk, ChunkMetrics, ChunkSet, ChunkingStrategy, Document,
};
use showdown_common::resilience::Resilience;
use showdown_common::text::{ceil_char_boundary, floor_char_boundary, Tokenizer};
use std::cmp::Ordering;
use std::ops::Range;
use std::sync::Arc;
use tracing::{debug, instrument};

/// Produces and scores ChunkSets for each strategy
pub struct ChunkingEngine {
    config: ChunkingConfig,
    /// Candidates at or above this confidence are qualifying boundaries
    confidence_threshold: f32,
    tokenizer: Arc<dyn Tokenizer>,
}

/// A strategy's position in the chunking ranking
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct ChunkingRank {
    pub strategy: ChunkingStrategy,
    pub score: f64,
}

impl ChunkingEngine {
    pub fn new(config: ChunkingConfig, confidence_threshold: f32, tokenizer: Arc<dyn Tokenizer>) -> Self {
        Self {
            config,
            confidence_threshold,
            tokenizer,
        }
    }

    /// Chunk `doc` with one strategy and attach its metrics
    #[instrument(skip_all, fields(strategy = %strategy, doc_len = doc.len()))]
    pub async fn chunk(
        &self,
        strategy: ChunkingStrategy,
        doc: &Document,
        candidates: &[BoundaryCandidate],
        embedder: &dyn Embedder,
        resilience: &Resilience,
    ) -> Result<ChunkSet> {
        if doc.is_empty() {
            return Err(AppError::input("cannot chunk an empty document"));
        }

        let text = doc.text.as_str();
        let chunks = if text.len() <= self.config.target_size {
            vec![Chunk::new(0, 0, text.len(), text)]
        } else {
            match strategy {
                ChunkingStrategy::FixedSize => self.fixed_size(text),
                ChunkingStrategy::BoundaryAware => self.boundary_aware(text, candidates),
                ChunkingStrategy::Semantic => self.semantic(text, embedder, resilience).await?,
            }
        };

        let metrics = self.metrics(strategy, doc, &chunks, candidates)?;
        metrics::record_chunking(strategy.as_str(), chunks.len());
        debug!(
            chunk_count = metrics.chunk_count,
            boundary_score = metrics.boundary_score,
            sentence_score = metrics.sentence_score,
            "Strategy chunked"
        );

        Ok(ChunkSet {
            strategy,
            chunks,
            metrics,
        })
    }

    /// Equal windows of `target_size` bytes, snapped to char boundaries
    pub fn fixed_size(&self, text: &str) -> Vec<Chunk> {
        let target = self.config.target_size.max(1);
        let mut cuts = Vec::new();
        let mut next = target;
        while next < text.len() {
            let cut = ceil_char_boundary(text, next);
            if cut >= text.len() {
                break;
            }
            cuts.push(cut);
            next = cut + target;
        }
        to_chunks(text, &cuts)
    }

    /// Edges only at qualifying candidates, then size repair
    ///
    /// Segments below `min_size` lose their weaker edge. Segments still
    /// below `target_size` are then packed with a neighbour while the merge
    /// stays within `max_size`. Segments above `max_size` are split at
    /// sentence ends packed up to `target_size`.
    pub fn boundary_aware(&self, text: &str, candidates: &[BoundaryCandidate]) -> Vec<Chunk> {
        let len = text.len();
        let mut edges: Vec<(usize, f32)> = candidates
            .iter()
            .filter(|c| c.confidence >= self.confidence_threshold && c.position > 0 && c.position < len)
            .map(|c| (c.position, c.confidence))
            .collect();
        edges.sort_by_key(|(pos, _)| *pos);
        edges.dedup_by_key(|(pos, _)| *pos);

        while let Some(drop) = edge_to_drop(&edges, len, self.config.min_size, None) {
            edges.remove(drop);
        }
        while let Some(drop) = edge_to_drop(&edges, len, self.config.target_size, Some(self.config.max_size)) {
            edges.remove(drop);
        }

        let sentence_ends = self.tokenizer.sentence_ends(text);
        let mut cuts = Vec::new();
        let mut start = 0;
        for end in edges.iter().map(|(pos, _)| *pos).chain(std::iter::once(len)) {
            cuts.extend(self.subdivide(text, start..end, &sentence_ends));
            if end < len {
                cuts.push(end);
            }
            start = end;
        }
        to_chunks(text, &cuts)
    }

    /// Cut points inside an oversized segment
    fn subdivide(&self, text: &str, segment: Range<usize>, sentence_ends: &[usize]) -> Vec<usize> {
        let mut cuts = Vec::new();
        let mut current = segment.start;
        while segment.end - current > self.config.max_size {
            let limit = current + self.config.target_size;
            let inside = sentence_ends
                .iter()
                .copied()
                .filter(|&e| e > current && e < segment.end);
            let packed = inside.clone().take_while(|&e| e <= limit).last();
            let cut = packed
                .or_else(|| inside.clone().next())
                .unwrap_or_else(|| ceil_char_boundary(text, limit));
            if cut <= current || cut >= segment.end {
                break;
            }
            cuts.push(cut);
            current = cut;
        }
        cuts
    }

    /// Greedy merge of sentence windows while neighbours stay similar
    ///
    /// Every chunk after the first starts up to `seam_overlap` bytes before
    /// its seam, never more than `max_overlap`.
    pub async fn semantic(
        &self,
        text: &str,
        embedder: &dyn Embedder,
        resilience: &Resilience,
    ) -> Result<Vec<Chunk>> {
        let spans = self.tokenizer.sentence_spans(text);
        let windows: Vec<Range<usize>> = spans
            .chunks(self.config.semantic_window_sentences.max(1))
            .filter_map(|group| Some(group.first()?.start..group.last()?.end))
            .collect();
        if windows.len() <= 1 {
            return Ok(to_chunks(text, &[]));
        }

        let texts: Vec<String> = windows.iter().map(|r| text[r.clone()].to_string()).collect();
        let vectors = resilience
            .call("embedding", || embedder.embed_batch(&texts))
            .await?;
        if vectors.len() != windows.len() {
            return Err(AppError::EmbeddingUnavailable {
                message: format!("{} vectors returned for {} windows", vectors.len(), windows.len()),
            });
        }

        let mut seams = Vec::new();
        let mut chunk_start = windows[0].start;
        for i in 1..windows.len() {
            let similarity = cosine_similarity(&vectors[i - 1], &vectors[i]);
            let current = windows[i].start - chunk_start;
            let grown = windows[i].end - chunk_start;
            let merge = current < self.config.min_size
                || (similarity >= self.config.semantic_threshold && grown <= self.config.max_size);
            if !merge {
                seams.push(windows[i].start);
                chunk_start = windows[i].start;
            }
        }

        let overlap = self.config.seam_overlap.min(self.config.max_overlap);
        let mut chunks = Vec::with_capacity(seams.len() + 1);
        let mut nominal_start = 0;
        let mut start = 0;
        for (id, end) in seams.iter().copied().chain(std::iter::once(text.len())).enumerate() {
            chunks.push(Chunk::new(id as u32, start, end, text));
            let extended = floor_char_boundary(text, end.saturating_sub(overlap));
            start = if extended > nominal_start { extended } else { end };
            nominal_start = end;
        }
        Ok(chunks)
    }

    /// Validate the partition and compute quality metrics
    pub fn metrics(
        &self,
        strategy: ChunkingStrategy,
        doc: &Document,
        chunks: &[Chunk],
        candidates: &[BoundaryCandidate],
    ) -> Result<ChunkMetrics> {
        let name = strategy.as_str();
        let text = doc.text.as_str();
        let len = text.len();

        let (first, last) = match (chunks.first(), chunks.last()) {
            (Some(first), Some(last)) => (first, last),
            _ => return Err(AppError::aggregation(name, "no chunks for a non-empty document")),
        };
        if first.start != 0 || last.end != len {
            return Err(AppError::aggregation(name, "chunks do not cover the document ends"));
        }

        for (i, chunk) in chunks.iter().enumerate() {
            if chunk.id.0 as usize != i {
                return Err(AppError::aggregation(name, format!("chunk {} is out of sequence", chunk.id)));
            }
            if chunk.start >= chunk.end
                || chunk.end > len
                || !text.is_char_boundary(chunk.start)
                || !text.is_char_boundary(chunk.end)
            {
                return Err(AppError::aggregation(
                    name,
                    format!("chunk {} has invalid range {}..{}", chunk.id, chunk.start, chunk.end),
                ));
            }
        }

        let mut overlap_bytes = 0;
        for pair in chunks.windows(2) {
            let (a, b) = (&pair[0], &pair[1]);
            if b.start > a.end {
                return Err(AppError::aggregation(name, format!("gap between {} and {}", a.id, b.id)));
            }
            if b.start <= a.start || b.end <= a.end {
                return Err(AppError::aggregation(name, format!("{} is out of order", b.id)));
            }
            let overlap = a.end - b.start;
            if overlap > 0 && strategy.is_lossless() {
                return Err(AppError::aggregation(name, format!("{} overlaps {}", b.id, a.id)));
            }
            if overlap > self.config.max_overlap {
                return Err(AppError::aggregation(
                    name,
                    format!("{} overlaps {} by {} bytes", b.id, a.id, overlap),
                ));
            }
            overlap_bytes += overlap;
        }

        let sizes: Vec<usize> = chunks.iter().map(Chunk::size).collect();
        let count = sizes.len() as f64;
        let total: usize = sizes.iter().sum();
        let avg = total as f64 / count;
        let variance = sizes.iter().map(|&s| (s as f64 - avg).powi(2)).sum::<f64>() / count;

        // Seams: the end of every chunk but the last
        let edges: Vec<usize> = chunks[..chunks.len() - 1].iter().map(|c| c.end).collect();

        Ok(ChunkMetrics {
            chunk_count: chunks.len(),
            avg_chunk_size: avg,
            boundary_score: self.boundary_score(len, &edges, candidates),
            sentence_score: self.sentence_score(text, &edges),
            min_chunk_size: sizes.iter().copied().min().unwrap_or(0),
            max_chunk_size: sizes.iter().copied().max().unwrap_or(0),
            size_std_dev: variance.sqrt(),
            coverage: (total - overlap_bytes) as f64 / len as f64,
            overlap_bytes,
        })
    }

    /// Confidence-weighted recall of candidates at chunk edges
    ///
    /// Only qualifying candidates count when there are any; otherwise every
    /// candidate does. A document with no candidates, or one that fits in a
    /// single chunk, scores 1.0.
    fn boundary_score(&self, len: usize, edges: &[usize], candidates: &[BoundaryCandidate]) -> f64 {
        if len <= self.config.target_size || candidates.is_empty() {
            return 1.0;
        }
        let qualifying: Vec<&BoundaryCandidate> = candidates
            .iter()
            .filter(|c| c.confidence >= self.confidence_threshold)
            .collect();
        let counted = if qualifying.is_empty() {
            candidates.iter().collect()
        } else {
            qualifying
        };

        let (hit, total) = counted.iter().fold((0.0, 0.0), |(hit, total), c| {
            let weight = c.confidence as f64;
            let on_edge = near_any(edges, c.position, self.config.edge_tolerance);
            (if on_edge { hit + weight } else { hit }, total + weight)
        });
        if total == 0.0 {
            1.0
        } else {
            hit / total
        }
    }

    /// Share of seams that land on a sentence end
    fn sentence_score(&self, text: &str, edges: &[usize]) -> f64 {
        if edges.is_empty() {
            return 1.0;
        }
        let ends = self.tokenizer.sentence_ends(text);
        let aligned = edges
            .iter()
            .filter(|&&e| near_any(&ends, e, self.config.edge_tolerance))
            .count();
        aligned as f64 / edges.len() as f64
    }
}

/// Rank ChunkSets by weighted boundary and sentence scores
///
/// Ties go to the lower size standard deviation, then to strategy order.
pub fn rank_strategies(sets: &[ChunkSet], boundary_weight: f64, sentence_weight: f64) -> Vec<ChunkingRank> {
    let mut ranked: Vec<(&ChunkSet, f64)> = sets
        .iter()
        .filter(|s| !s.is_empty())
        .map(|s| (s, s.rank_score(boundary_weight, sentence_weight)))
        .collect();
    ranked.sort_by(|(a, sa), (b, sb)| {
        sb.total_cmp(sa)
            .then(a.metrics.size_std_dev.total_cmp(&b.metrics.size_std_dev))
            .then(a.strategy.cmp(&b.strategy))
    });
    ranked
        .into_iter()
        .map(|(set, score)| ChunkingRank {
            strategy: set.strategy,
            score,
        })
        .collect()
}

/// Index of the edge to drop so the first segment shorter than `below`
/// merges into a neighbour
///
/// The weaker edge goes first, then the one giving the smaller merge, then
/// the left one. With a `cap`, merges larger than it are not considered and
/// segments with no allowed merge are skipped.
fn edge_to_drop(edges: &[(usize, f32)], len: usize, below: usize, cap: Option<usize>) -> Option<usize> {
    let bounds: Vec<usize> = std::iter::once(0)
        .chain(edges.iter().map(|(pos, _)| *pos))
        .chain(std::iter::once(len))
        .collect();
    let fits = |merged: usize| cap.map_or(true, |cap| merged <= cap);

    for i in 0..bounds.len() - 1 {
        if bounds[i + 1] - bounds[i] >= below {
            continue;
        }
        let left = (i > 0)
            .then(|| (i - 1, bounds[i + 1] - bounds[i - 1]))
            .filter(|&(_, merged)| fits(merged));
        let right = (i < edges.len())
            .then(|| (i, bounds[i + 2] - bounds[i]))
            .filter(|&(_, merged)| fits(merged));

        let drop = match (left, right) {
            (Some((l, lm)), Some((r, rm))) => match edges[l].1.total_cmp(&edges[r].1) {
                Ordering::Less => l,
                Ordering::Greater => r,
                Ordering::Equal if lm <= rm => l,
                Ordering::Equal => r,
            },
            (Some((l, _)), None) => l,
            (None, Some((r, _))) => r,
            (None, None) => continue,
        };
        return Some(drop);
    }
    None
}

/// Whether any sorted `points` lies within `tolerance` of `target`
fn near_any(points: &[usize], target: usize, tolerance: usize) -> bool {
    let idx = points.partition_point(|&p| p < target.saturating_sub(tolerance));
    points.get(idx).map_or(false, |&p| p <= target + tolerance)
}

/// Lossless chunks between sorted interior cut points
fn to_chunks(text: &str, cuts: &[usize]) -> Vec<Chunk> {
    let mut chunks = Vec::with_capacity(cuts.len() + 1);
    let mut start = 0;
    for end in cuts.iter().copied().chain(std::iter::once(text.len())) {
        if end > start {
            chunks.push(Chunk::new(chunks.len() as u32, start, end, text));
            start = end;
        }
    }
    chunks
}
