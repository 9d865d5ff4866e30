//! Answer scoring
//!
//! Provides:
//! - Key-statement extraction from the retrieved context
//! - Factual completeness (share of key statements the answer covers)
//! - Structural clarity (headers, entity sections, lists, paragraphs, sentence length)

use showdown_common::models::{Chunk, EntityIndex};
use showdown_common::text::{content_words, words, HeuristicTokenizer, Tokenizer};
use std::collections::{BTreeSet, HashSet};

/// Key statements taken from the context
pub const MAX_KEY_STATEMENTS: usize = 8;

/// Leading sentences used when nothing in the context matches the query
const FALLBACK_STATEMENTS: usize = 3;

const HEADER_WEIGHT: f64 = 0.3;
const ENTITY_SECTION_WEIGHT: f64 = 0.3;
const LIST_WEIGHT: f64 = 0.2;
const PARAGRAPH_WEIGHT: f64 = 0.1;
const SENTENCE_LENGTH_WEIGHT: f64 = 0.1;

/// Readable mean sentence length, in words
const SENTENCE_WORDS: std::ops::RangeInclusive<f64> = 5.0..=30.0;

/// Query-relevant sentences of the context, in document order
///
/// Sentences are ranked by how many query content words they share. When
/// none share any, the leading sentences stand in.
pub fn key_statements(query: &str, chunks: &[Chunk]) -> Vec<String> {
    let query_terms: HashSet<String> = content_words(query).into_iter().collect();
    let mut sentences: Vec<String> = Vec::new();
    let mut seen = HashSet::new();
    for chunk in chunks {
        for span in HeuristicTokenizer.sentence_spans(&chunk.text) {
            let sentence = chunk.text[span]
                .trim()
                .trim_start_matches(['#', '-', '*', ' '])
                .to_string();
            if sentence.chars().count() > 12 && seen.insert(sentence.to_lowercase()) {
                sentences.push(sentence);
            }
        }
    }

    let mut scored: Vec<(usize, usize)> = sentences
        .iter()
        .enumerate()
        .map(|(i, s)| {
            let overlap = content_words(s).iter().filter(|w| query_terms.contains(*w)).count();
            (overlap, i)
        })
        .filter(|(overlap, _)| *overlap > 0)
        .collect();
    scored.sort_by(|a, b| b.0.cmp(&a.0).then(a.1.cmp(&b.1)));

    let mut picked: Vec<usize> = if scored.is_empty() {
        (0..sentences.len().min(FALLBACK_STATEMENTS)).collect()
    } else {
        scored.into_iter().take(MAX_KEY_STATEMENTS).map(|(_, i)| i).collect()
    };
    picked.sort_unstable();
    picked.into_iter().map(|i| sentences[i].clone()).collect()
}

/// Whether the answer covers a statement
///
/// Covered when the statement appears verbatim or at least half of its
/// distinct content words occur in the answer.
fn covers(answer_lower: &str, answer_terms: &HashSet<String>, statement: &str) -> bool {
    if answer_lower.contains(&statement.to_lowercase()) {
        return true;
    }
    let terms: BTreeSet<String> = content_words(statement).into_iter().collect();
    if terms.is_empty() {
        return false;
    }
    let present = terms.iter().filter(|t| answer_terms.contains(*t)).count();
    present * 2 >= terms.len()
}

/// Share of key statements the answer covers; 0.0 without statements
pub fn factual_completeness(answer: &str, statements: &[String]) -> f64 {
    if statements.is_empty() {
        return 0.0;
    }
    let lower = answer.to_lowercase();
    let terms: HashSet<String> = content_words(answer).into_iter().collect();
    let covered = statements.iter().filter(|s| covers(&lower, &terms, s)).count();
    covered as f64 / statements.len() as f64
}

fn header_text(line: &str) -> Option<&str> {
    let trimmed = line.trim_start();
    let hashes = trimmed.chars().take_while(|&c| c == '#').count();
    if !(1..=6).contains(&hashes) {
        return None;
    }
    let rest = &trimmed[hashes..];
    rest.starts_with(' ').then(|| rest.trim()).filter(|t| !t.is_empty())
}

fn is_list_item(line: &str) -> bool {
    let trimmed = line.trim_start();
    if trimmed.starts_with("- ") || trimmed.starts_with("* ") || trimmed.starts_with("+ ") {
        return true;
    }
    let digits = trimmed.chars().take_while(|c| c.is_ascii_digit()).count();
    digits > 0 && (trimmed[digits..].starts_with(". ") || trimmed[digits..].starts_with(") "))
}

/// Heuristic structure score in [0, 1]
///
/// Headers, entity-named sections, lists, multiple paragraphs and readable
/// sentence length each contribute a fixed weight. Entity sections count
/// against the distinct dominant entities of the context, capped at two.
pub fn structural_clarity(answer: &str, index: &EntityIndex, chunks: &[Chunk]) -> f64 {
    let lines: Vec<&str> = answer.lines().collect();
    let headers: Vec<String> = lines
        .iter()
        .filter_map(|l| header_text(l))
        .map(|h| h.to_lowercase())
        .collect();

    let mut score = 0.0;
    if !headers.is_empty() {
        score += HEADER_WEIGHT;
    }

    let context_entities: BTreeSet<&str> = chunks
        .iter()
        .filter_map(|c| index.dominant_entity(c.id))
        .collect();
    if !context_entities.is_empty() {
        let named = context_entities
            .iter()
            .filter(|canonical| {
                let display = index.display_name(canonical).to_lowercase();
                headers.iter().any(|h| h.contains(*canonical) || h.contains(&display))
            })
            .count();
        let expected = context_entities.len().min(2);
        score += ENTITY_SECTION_WEIGHT * (named.min(expected) as f64 / expected as f64);
    }

    if lines.iter().any(|l| is_list_item(l)) {
        score += LIST_WEIGHT;
    }

    let paragraphs = answer
        .split("\n\n")
        .filter(|block| !block.trim().is_empty())
        .count();
    if paragraphs >= 2 {
        score += PARAGRAPH_WEIGHT;
    }

    let prose: String = lines
        .iter()
        .filter(|l| header_text(l).is_none())
        .map(|l| format!("{}\n", l))
        .collect();
    let spans = HeuristicTokenizer.sentence_spans(&prose);
    let counts: Vec<usize> = spans
        .into_iter()
        .map(|r| words(&prose[r]).count())
        .filter(|&n| n > 0)
        .collect();
    if !counts.is_empty() {
        let mean = counts.iter().sum::<usize>() as f64 / counts.len() as f64;
        if SENTENCE_WORDS.contains(&mean) {
            score += SENTENCE_LENGTH_WEIGHT;
        }
    }

    score.min(1.0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{chunks, EARNINGS};
    use showdown_common::models::ChunkId;
    use std::collections::BTreeMap;

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

    #[test]
    fn test_key_statements_prefer_query_terms() {
        let statements = key_statements("What revenue did Globex report?", &chunks(&EARNINGS));
        assert_eq!(statements.len(), 5);
        assert_eq!(statements[0], "Acme Corp reported revenue of 4 billion dollars in Q3 2023.");
        assert!(statements.contains(&"Globex Inc reported revenue of 2 billion dollars, below forecasts.".to_string()));
    }

    #[test]
    fn test_key_statements_fall_back_to_leading_sentences() {
        let statements = key_statements("zebra migration", &chunks(&EARNINGS));
        assert_eq!(statements.len(), FALLBACK_STATEMENTS);
        assert!(statements[0].starts_with("Acme Corp reported"));
    }

    #[test]
    fn test_completeness_counts_covered_statements() {
        let statements = vec![
            "Acme Corp reported revenue of 4 billion dollars.".to_string(),
            "Globex Inc opened two factories in Ohio.".to_string(),
        ];
        let answer = "Acme reported revenue of about 4 billion dollars this quarter.";
        assert_eq!(factual_completeness(answer, &statements), 0.5);
        assert_eq!(factual_completeness("", &statements), 0.0);
        assert_eq!(factual_completeness("anything", &[]), 0.0);
    }

    #[test]
    fn test_clarity_rewards_entity_sections() {
        let context = chunks(&EARNINGS);
        let sectioned = "## Acme\n\n- Acme reported revenue of 4 billion dollars in the quarter.\n\n## Globex\n\n- Globex opened two new factories in Ohio this year.\n";
        let flat = "acme reported revenue and globex opened factories";
        let structured = structural_clarity(sectioned, &index(), &context);
        let plain = structural_clarity(flat, &index(), &context);
        assert!((structured - 1.0).abs() < 1e-9);
        assert!(plain < 0.2);
    }

    #[test]
    fn test_header_and_list_detection() {
        assert_eq!(header_text("## Outlook"), Some("Outlook"));
        assert_eq!(header_text("#hashtag"), None);
        assert_eq!(header_text("####### too deep"), None);
        assert!(is_list_item("- item"));
        assert!(is_list_item("12. item"));
        assert!(!is_list_item("2023 was good"));
    }
}
