//! Boundary detection
//!
//! Provides:
//! - Format-change signals from line structure
//! - Entity-change and topic-shift signals over sliding sentence windows
//! - Merging of nearby candidates into a strictly ordered list
//! - Optional LLM refinement of the heuristic candidates

use crate::entities::{find_word, EntityTemporalTracker};
use regex_lite::Regex;
use serde::Deserialize;
use showdown_common::config::BoundaryConfig;
use showdown_common::errors::{AppError, Result};
use showdown_common::llm::{AgentRole, CompletionProvider, Prompt};
use showdown_common::models::{BoundaryCandidate, BoundaryType, Document};
use showdown_common::resilience::Resilience;
use showdown_common::text::{ceil_char_boundary, floor_char_boundary, term_frequencies, tf_cosine, Tokenizer};
use std::collections::BTreeSet;
use std::ops::Range;
use std::sync::Arc;
use tracing::{debug, info, instrument};

const MARKDOWN_HEADER: f32 = 0.95;
const RULE_OR_FENCE: f32 = 0.9;
const SPEAKER_TURN: f32 = 0.85;
const CAPS_HEADING: f32 = 0.8;
const PARAGRAPH_BREAK: f32 = 0.75;
const NUMBERED_SECTION: f32 = 0.7;
const LAYOUT_SHIFT: f32 = 0.45;
const LIST_START: f32 = 0.4;

const ENTITY_FLOOR: f32 = 0.35;
const ENTITY_SPAN: f32 = 0.5;
const TOPIC_CEILING: f32 = 0.8;
const TOPIC_MIN_TERMS: f64 = 4.0;

const REFINED_CONFIDENCE: f32 = 0.85;
const REFINEMENT_INPUT_CHARS: usize = 16_000;
const CONTEXT_CHARS: usize = 60;

/// Finds likely structural, entity and topical discontinuities
pub struct BoundaryDetector {
    config: BoundaryConfig,
    tokenizer: Arc<dyn Tokenizer>,
    tracker: Arc<EntityTemporalTracker>,
    header: Regex,
    rule: Regex,
    fence: Regex,
    speaker: Regex,
    numbered: Regex,
    list_item: Regex,
}

#[derive(Debug, Deserialize)]
struct RefinementResponse {
    #[serde(default)]
    boundaries: Vec<usize>,
}

impl BoundaryDetector {
    pub fn new(
        config: BoundaryConfig,
        tokenizer: Arc<dyn Tokenizer>,
        tracker: Arc<EntityTemporalTracker>,
    ) -> Result<Self> {
        Ok(Self {
            config,
            tokenizer,
            tracker,
            header: compile(r"^#{1,6}[ \t]+\S")?,
            rule: compile(r"^[ \t]*(?:-{3,}|\*{3,}|_{3,}|={3,})[ \t]*$")?,
            fence: compile(r"^[ \t]*(?:```|~~~)")?,
            speaker: compile(r"^[ \t]*[A-Z][A-Za-z0-9 .'\-]{0,40}:(?:[ \t]|$)")?,
            numbered: compile(
                r"^[ \t]*(?:\d+(?:\.\d+)*[.)]?[ \t]+[A-Z]|(?:Section|Chapter|Part|Article)[ \t]+[0-9IVXLC]+\b)",
            )?,
            list_item: compile(r"^[ \t]*(?:[-*+•]|\d+[.)])[ \t]+")?,
        })
    }

    /// Ordered boundary candidates for `doc`
    ///
    /// Empty (or whitespace-only) input is rejected. Near-empty input yields
    /// no candidates.
    #[instrument(skip(self, doc), fields(doc_len = doc.len()))]
    pub fn detect(&self, doc: &Document) -> Result<Vec<BoundaryCandidate>> {
        let visible = doc.text.trim().chars().count();
        if visible == 0 || visible < self.config.min_document_chars {
            return Err(AppError::input(format!(
                "document has {} visible characters, at least {} required",
                visible,
                self.config.min_document_chars.max(1)
            )));
        }
        if visible < self.config.near_empty_chars {
            debug!(visible, "Near-empty document, no boundaries");
            return Ok(Vec::new());
        }

        let text = doc.text.as_str();
        let spans: Vec<Range<usize>> = self
            .tokenizer
            .sentence_spans(text)
            .into_iter()
            .filter(|r| !text[r.clone()].trim().is_empty())
            .collect();

        let mut candidates = self.format_candidates(text);
        candidates.extend(self.entity_candidates(text, &spans));
        candidates.extend(self.topic_candidates(text, &spans));
        let raw = candidates.len();

        let merged = self.merge(candidates, text.len());
        debug!(raw, merged = merged.len(), "Boundary candidates merged");
        Ok(merged)
    }

    fn format_candidates(&self, text: &str) -> Vec<BoundaryCandidate> {
        let mut out = Vec::new();
        let mut offset = 0;
        let mut prev_len: Option<usize> = None;
        let mut prev_blank = false;
        let mut prev_list = false;

        for line in text.split_inclusive('\n') {
            let start = offset;
            offset += line.len();
            let content = line.trim_end();
            let trimmed = content.trim_start();
            if trimmed.is_empty() {
                prev_blank = true;
                continue;
            }

            let len = trimmed.chars().count();
            let is_list = self.list_item.is_match(content);
            let signal = if self.header.is_match(content) {
                Some(("markdown_header", MARKDOWN_HEADER))
            } else if self.rule.is_match(content) {
                Some(("horizontal_rule", RULE_OR_FENCE))
            } else if self.fence.is_match(content) {
                Some(("code_fence", RULE_OR_FENCE))
            } else if self.speaker.is_match(content) {
                Some(("speaker_turn", SPEAKER_TURN))
            } else if is_caps_heading(trimmed) {
                Some(("caps_heading", CAPS_HEADING))
            } else if prev_blank && prev_len.is_some() {
                Some(("paragraph_break", PARAGRAPH_BREAK))
            } else if self.numbered.is_match(content) {
                Some(("numbered_section", NUMBERED_SECTION))
            } else if prev_len.map_or(false, |p| is_layout_shift(p, len)) {
                Some(("layout_shift", LAYOUT_SHIFT))
            } else if is_list && !prev_list {
                Some(("list_start", LIST_START))
            } else {
                None
            };

            if let Some((name, confidence)) = signal {
                if start > 0 {
                    out.push(candidate(text, start, BoundaryType::FormatChange, confidence, name));
                }
            }

            prev_blank = false;
            prev_list = is_list;
            prev_len = Some(len);
        }
        out
    }

    /// Sliding windows of sentences; the candidate sits at the first sentence
    /// of the right-hand window, which must introduce a new entity
    fn entity_candidates(&self, text: &str, spans: &[Range<usize>]) -> Vec<BoundaryCandidate> {
        let threshold = self.config.entity_overlap_threshold;
        if threshold <= 0.0 {
            return Vec::new();
        }

        let mut out = Vec::new();
        for k in 1..spans.len() {
            let (left, right) = self.windows(text, spans, k);
            let a = self.tracker.entity_keys(left);
            let b = self.tracker.entity_keys(right);
            if a.is_empty() || b.is_empty() {
                continue;
            }

            let shared = a.intersection(&b).count() as f32;
            let overlap = shared / a.len().min(b.len()) as f32;
            if overlap >= threshold {
                continue;
            }

            let first = text[spans[k].clone()].to_lowercase();
            let introduces = b.difference(&a).any(|key| find_word(&first, key).is_some());
            if !introduces {
                continue;
            }

            let confidence = ENTITY_FLOOR + ENTITY_SPAN * (1.0 - overlap / threshold);
            out.push(candidate(
                text,
                spans[k].start,
                BoundaryType::EntityChange,
                confidence,
                "entity_change",
            ));
        }
        out
    }

    fn topic_candidates(&self, text: &str, spans: &[Range<usize>]) -> Vec<BoundaryCandidate> {
        let threshold = self.config.topic_similarity_threshold as f64;
        let mut out = Vec::new();

        for k in 1..spans.len() {
            let (left, right) = self.windows(text, spans, k);
            let a = term_frequencies(left);
            let b = term_frequencies(right);
            if a.values().sum::<f64>() < TOPIC_MIN_TERMS || b.values().sum::<f64>() < TOPIC_MIN_TERMS {
                continue;
            }

            let similarity = tf_cosine(&a, &b);
            if similarity < threshold {
                let confidence = TOPIC_CEILING * (1.0 - similarity as f32);
                out.push(candidate(
                    text,
                    spans[k].start,
                    BoundaryType::TopicShift,
                    confidence,
                    "topic_shift",
                ));
            }
        }
        out
    }

    fn windows<'t>(&self, text: &'t str, spans: &[Range<usize>], k: usize) -> (&'t str, &'t str) {
        let w = self.config.window_sentences.max(1);
        let left_start = spans[k.saturating_sub(w)].start;
        let right_end = spans[(k + w).min(spans.len()) - 1].end;
        (&text[left_start..spans[k].start], &text[spans[k].start..right_end])
    }

    /// Collapse candidates closer than `merge_window`, keeping the most
    /// confident, and drop anything outside (0, len)
    fn merge(&self, mut candidates: Vec<BoundaryCandidate>, len: usize) -> Vec<BoundaryCandidate> {
        candidates.retain(|c| c.position > 0 && c.position < len);
        candidates.sort_by(|a, b| {
            a.position
                .cmp(&b.position)
                .then(b.confidence.total_cmp(&a.confidence))
        });

        let mut merged: Vec<BoundaryCandidate> = Vec::with_capacity(candidates.len());
        for c in candidates {
            match merged.last_mut() {
                Some(last) if c.position - last.position <= self.config.merge_window => {
                    if c.confidence > last.confidence {
                        *last = c;
                    }
                }
                _ => merged.push(c),
            }
        }
        merged
    }

    /// Ask the LLM for extra boundaries and fold them into `candidates`
    ///
    /// Offsets are snapped forward to the next line start.
    #[instrument(skip_all, fields(existing = candidates.len()))]
    pub async fn refine(
        &self,
        doc: &Document,
        candidates: Vec<BoundaryCandidate>,
        llm: &dyn CompletionProvider,
        resilience: &Resilience,
    ) -> Result<Vec<BoundaryCandidate>> {
        let text = doc.text.as_str();
        let visible = &text[..floor_char_boundary(text, REFINEMENT_INPUT_CHARS)];
        let prompt = Prompt::new()
            .section(
                "task",
                "List byte offsets where a new section, speaker or topic begins.",
            )
            .section("context", visible)
            .render();
        let role = AgentRole::Boundary.config();

        let raw = resilience
            .call("llm", || llm.complete(&prompt, &role))
            .await?;
        let response: RefinementResponse = serde_json::from_str(raw.trim())
            .map_err(|e| AppError::external("llm", format!("unparseable boundary response: {}", e)))?;

        let mut refined = candidates;
        let mut added = 0;
        for offset in response.boundaries {
            if let Some(position) = snap_to_line_start(visible, offset) {
                refined.push(candidate(
                    text,
                    position,
                    BoundaryType::FormatChange,
                    REFINED_CONFIDENCE,
                    "llm_refinement",
                ));
                added += 1;
            }
        }

        let merged = self.merge(refined, text.len());
        info!(added, total = merged.len(), "Boundaries refined");
        Ok(merged)
    }
}

fn candidate(
    text: &str,
    position: usize,
    kind: BoundaryType,
    confidence: f32,
    signal: &str,
) -> BoundaryCandidate {
    BoundaryCandidate {
        position,
        kind,
        confidence: confidence.clamp(0.0, 1.0),
        signal: signal.to_string(),
        context: snippet(text, position),
    }
}

fn snippet(text: &str, position: usize) -> String {
    text[position..]
        .chars()
        .take(CONTEXT_CHARS)
        .map(|c| if c == '\n' { ' ' } else { c })
        .collect::<String>()
        .trim()
        .to_string()
}

fn is_caps_heading(line: &str) -> bool {
    let letters: Vec<char> = line.chars().filter(|c| c.is_alphabetic()).collect();
    letters.len() >= 3
        && line.chars().count() <= 80
        && letters.iter().all(|c| c.is_uppercase())
        && !line.ends_with(['.', ','])
}

fn is_layout_shift(prev: usize, current: usize) -> bool {
    let (short, long) = if prev < current { (prev, current) } else { (current, prev) };
    short > 0 && long >= 40 && long >= short * 3
}

fn snap_to_line_start(text: &str, offset: usize) -> Option<usize> {
    let offset = ceil_char_boundary(text, offset);
    if offset == 0 || offset >= text.len() {
        return None;
    }
    if text[..offset].ends_with('\n') {
        return Some(offset);
    }
    let next = text[offset..].find('\n')? + offset + 1;
    (next < text.len()).then_some(next)
}

fn compile(pattern: &str) -> Result<Regex> {
    Regex::new(pattern).map_err(|e| AppError::Internal {
        message: format!("invalid pattern {}: {}", pattern, e),
    })
}

/// Positions of candidates at or above `threshold`
pub fn qualifying_positions(candidates: &[BoundaryCandidate], threshold: f32) -> BTreeSet<usize> {
    candidates
        .iter()
        .filter(|c| c.confidence >= threshold)
        .map(|c| c.position)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};
    use showdown_common::llm::ExtractiveCompleter;
    use showdown_common::resilience::{CallGate, RetryPolicy};
    use showdown_common::text::HeuristicTokenizer;

    fn detector() -> BoundaryDetector {
        BoundaryDetector::new(
            BoundaryConfig::default(),
            Arc::new(HeuristicTokenizer),
            Arc::new(EntityTemporalTracker::new().unwrap()),
        )
        .unwrap()
    }

    fn doc(text: &str) -> Document {
        Document::new(text, &HeuristicTokenizer)
    }

    #[test]
    fn test_empty_document_is_input_error() {
        let err = detector().detect(&doc("")).unwrap_err();
        assert!(matches!(err, AppError::Input { .. }));
        let err = detector().detect(&doc("  \n\t ")).unwrap_err();
        assert!(matches!(err, AppError::Input { .. }));
    }

    #[test]
    fn test_near_empty_document_has_no_boundaries() {
        assert!(detector().detect(&doc("Short note.")).unwrap().is_empty());
    }

    #[test]
    fn test_markdown_header_is_strongest_signal() {
        let text = "# Quarterly Review\nThe team met to discuss the results of the quarter in detail.\n\n## Revenue\nRevenue grew steadily across all regions this year.\n";
        let found = detector().detect(&doc(text)).unwrap();
        let header = text.find("## Revenue").unwrap();

        let at_header = found.iter().find(|c| c.position == header).unwrap();
        assert_eq!(at_header.signal, "markdown_header");
        assert_eq!(at_header.kind, BoundaryType::FormatChange);
        assert!((at_header.confidence - MARKDOWN_HEADER).abs() < f32::EPSILON);
        assert!(at_header.context.starts_with("## Revenue"));
        assert!(found.iter().all(|c| c.position > 0));
    }

    #[test]
    fn test_speaker_turns_are_format_changes() {
        let turns = [
            "Alice: We closed the quarter ahead of plan and the pipeline looks healthy.",
            "Bob: Support volume dropped after the release, which freed the team for onboarding work.",
            "Carol: Hiring is on track, with two offers out and one accepted this week.",
        ];
        let text = turns.join("\n");
        let found = detector().detect(&doc(&text)).unwrap();

        for turn in &turns[1..] {
            let pos = text.find(turn).unwrap();
            let c = found.iter().find(|c| c.position == pos).unwrap();
            assert_eq!(c.kind, BoundaryType::FormatChange);
            assert_eq!(c.signal, "speaker_turn");
        }
    }

    #[test]
    fn test_entity_change_between_windows() {
        let text = "Acme Corp reported gains. Acme Corp hired staff. Acme Corp opened offices. Globex Inc cut jobs. Globex Inc closed plants. Globex Inc sold assets.";
        let found = detector().detect(&doc(text)).unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].position, text.find("Globex Inc cut").unwrap());
        assert_eq!(found[0].kind, BoundaryType::EntityChange);
        assert!((found[0].confidence - 0.85).abs() < 1e-6);
    }

    #[test]
    fn test_strong_topic_shift_qualifies_in_plain_prose() {
        let orchard = "the orchard harvest started early because the apple trees ripened quickly in the warm orchard valley. apple pickers filled wooden crates while the orchard manager counted apple crates near the barn. ripe apple varieties sold quickly at the orchard stand, and cider presses turned apple surplus into cider.";
        let compiler = "the compiler rewrote the parser so syntax errors point at the exact token in the source file. compiler engineers measured parser speed on large source files and removed slow token lookahead. the new parser builds a syntax tree directly, which lets the compiler report errors with source spans.";
        let text = format!("{} {}", orchard, compiler);
        let found = detector().detect(&doc(&text)).unwrap();

        let shift = orchard.len() + 1;
        assert_eq!(qualifying_positions(&found, 0.7), BTreeSet::from([shift]));
        let c = found.iter().find(|c| c.position == shift).unwrap();
        assert_eq!(c.kind, BoundaryType::TopicShift);
        assert!((c.confidence - TOPIC_CEILING).abs() < 1e-6);
        assert!(found.iter().all(|c| c.kind == BoundaryType::TopicShift));
    }

    #[test]
    fn test_merge_keeps_most_confident() {
        let d = detector();
        let text = "x".repeat(200);
        let merged = d.merge(
            vec![
                candidate(&text, 100, BoundaryType::TopicShift, 0.5, "topic_shift"),
                candidate(&text, 120, BoundaryType::FormatChange, 0.9, "horizontal_rule"),
                candidate(&text, 130, BoundaryType::EntityChange, 0.6, "entity_change"),
                candidate(&text, 0, BoundaryType::FormatChange, 0.9, "paragraph_break"),
                candidate(&text, 190, BoundaryType::TopicShift, 0.3, "topic_shift"),
            ],
            text.len(),
        );
        let positions: Vec<usize> = merged.iter().map(|c| c.position).collect();
        assert_eq!(positions, vec![120, 190]);
        assert_eq!(merged[0].signal, "horizontal_rule");
    }

    #[test]
    fn test_positions_strictly_increasing_on_random_documents() {
        let mut rng = StdRng::seed_from_u64(7);
        let pieces = [
            "# Heading\n",
            "Alice: Revenue at Acme Corp grew again. ",
            "Globex Inc cut its forecast for FY2024. ",
            "\n\n",
            "- a list item\n",
            "SUMMARY\n",
            "The café served crème brûlée to visitors. ",
            "---\n",
            "Short.\n",
            "An unrelated sentence about weather patterns and rainfall totals. ",
        ];
        let d = detector();
        for _ in 0..50 {
            let n = rng.gen_range(1..40);
            let text: String = (0..n).map(|_| pieces[rng.gen_range(0..pieces.len())]).collect();
            let document = doc(&text);
            let Ok(found) = d.detect(&document) else {
                continue;
            };
            for pair in found.windows(2) {
                assert!(pair[0].position < pair[1].position);
            }
            for c in &found {
                assert!(c.position > 0 && c.position < text.len());
                assert!(text.is_char_boundary(c.position));
                assert!((0.0..=1.0).contains(&c.confidence));
            }
        }
    }

    #[test]
    fn test_snap_to_line_start() {
        let text = "first line\nsecond line\nthird";
        assert_eq!(snap_to_line_start(text, 11), Some(11));
        assert_eq!(snap_to_line_start(text, 14), Some(23));
        assert_eq!(snap_to_line_start(text, 25), None);
        assert_eq!(snap_to_line_start(text, 0), None);
    }

    #[tokio::test]
    async fn test_llm_refinement_adds_candidates() {
        let text = "Intro paragraph text here that goes on for quite a while.\n\nMarket Outlook\nThe outlook remains positive for the year ahead.\n";
        let d = detector();
        let document = doc(text);
        let heuristic = d.detect(&document).unwrap();
        let resilience = Resilience::new(CallGate::new(2, 1000, 1000).unwrap(), RetryPolicy::default());

        let refined = d
            .refine(&document, heuristic, &ExtractiveCompleter, &resilience)
            .await
            .unwrap();
        let pos = text.find("Market Outlook").unwrap();
        let c = refined.iter().find(|c| c.position == pos).unwrap();
        assert!(c.confidence >= REFINED_CONFIDENCE);
    }

    #[test]
    fn test_qualifying_positions() {
        let text = "y".repeat(50);
        let list = vec![
            candidate(&text, 10, BoundaryType::FormatChange, 0.9, "horizontal_rule"),
            candidate(&text, 30, BoundaryType::TopicShift, 0.4, "topic_shift"),
        ];
        assert_eq!(qualifying_positions(&list, 0.7), BTreeSet::from([10]));
    }
}
