//! Tokenizer and sentence splitting
//!
//! Provides:
//! - Sentence spans that partition a text
//! - Token-count estimates
//! - Word and content-word helpers shared by scoring code

use std::collections::HashMap;
use std::ops::Range;

/// Sentence-splitting and token-estimation collaborator
pub trait Tokenizer: Send + Sync {
    /// Byte ranges of sentences; the ranges partition `text`
    fn sentence_spans(&self, text: &str) -> Vec<Range<usize>>;

    /// Estimated model token count
    fn estimate_tokens(&self, text: &str) -> usize;

    /// Byte offsets where a sentence ends (exclusive ends of every span)
    fn sentence_ends(&self, text: &str) -> Vec<usize> {
        self.sentence_spans(text).into_iter().map(|r| r.end).collect()
    }
}

/// Punctuation and newline driven splitter
///
/// A sentence ends after `.`, `!` or `?` followed by whitespace, or after a
/// newline. Trailing whitespace up to and including the last newline of the
/// run belongs to the sentence, so sentence ends line up with line starts.
#[derive(Debug, Clone, Copy, Default)]
pub struct HeuristicTokenizer;

impl Tokenizer for HeuristicTokenizer {
    fn sentence_spans(&self, text: &str) -> Vec<Range<usize>> {
        let mut spans = Vec::new();
        let mut start = 0;
        let mut chars = text.char_indices().peekable();

        while let Some((i, c)) = chars.next() {
            let terminal = match c {
                '\n' => true,
                '.' | '!' | '?' => matches!(chars.peek(), Some(&(_, next)) if next.is_whitespace()),
                _ => false,
            };
            if !terminal {
                continue;
            }

            let mut end = i + c.len_utf8();
            let mut seen_newline = c == '\n';
            while let Some(&(j, w)) = chars.peek() {
                if !w.is_whitespace() {
                    break;
                }
                if w == '\n' {
                    seen_newline = true;
                    end = j + 1;
                } else if !seen_newline {
                    end = j + w.len_utf8();
                }
                chars.next();
            }

            if end > start {
                spans.push(start..end);
                start = end;
            }
        }

        if start < text.len() {
            spans.push(start..text.len());
        }
        spans
    }

    fn estimate_tokens(&self, text: &str) -> usize {
        (text.chars().count() + 3) / 4
    }
}

/// Common English stopwords excluded from lexical comparisons
pub const STOPWORDS: &[&str] = &[
    "a", "about", "above", "after", "again", "all", "also", "am", "an", "and", "any", "are", "as",
    "at", "be", "because", "been", "before", "being", "below", "between", "both", "but", "by",
    "can", "could", "did", "do", "does", "doing", "down", "during", "each", "few", "for", "from",
    "further", "had", "has", "have", "having", "he", "her", "here", "hers", "him", "his", "how",
    "i", "if", "in", "into", "is", "it", "its", "itself", "just", "me", "more", "most", "my", "no",
    "nor", "not", "now", "of", "off", "on", "once", "only", "or", "other", "our", "ours", "out",
    "over", "own", "same", "she", "should", "so", "some", "such", "than", "that", "the", "their",
    "them", "then", "there", "these", "they", "this", "those", "through", "to", "too", "under",
    "until", "up", "very", "was", "we", "were", "what", "when", "where", "which", "while", "who",
    "whom", "why", "will", "with", "would", "you", "your", "yours",
];

pub fn is_stopword(word: &str) -> bool {
    STOPWORDS.binary_search(&word).is_ok()
}

/// Alphanumeric word tokens in original case
pub fn words(text: &str) -> impl Iterator<Item = &str> {
    text.split(|c: char| !(c.is_alphanumeric() || c == '\''))
        .map(|w| w.trim_matches('\''))
        .filter(|w| !w.is_empty())
}

/// Lowercased words longer than two characters that are not stopwords
pub fn content_words(text: &str) -> Vec<String> {
    words(text)
        .map(|w| w.to_lowercase())
        .filter(|w| w.chars().count() > 2 && !is_stopword(w))
        .collect()
}

/// Term frequencies over content words
pub fn term_frequencies(text: &str) -> HashMap<String, f64> {
    let mut tf = HashMap::new();
    for word in content_words(text) {
        *tf.entry(word).or_insert(0.0) += 1.0;
    }
    tf
}

/// Cosine similarity of two sparse term-frequency vectors
pub fn tf_cosine(a: &HashMap<String, f64>, b: &HashMap<String, f64>) -> f64 {
    if a.is_empty() || b.is_empty() {
        return 0.0;
    }
    let dot: f64 = a
        .iter()
        .filter_map(|(term, x)| b.get(term).map(|y| x * y))
        .sum();
    let norm_a: f64 = a.values().map(|x| x * x).sum::<f64>().sqrt();
    let norm_b: f64 = b.values().map(|x| x * x).sum::<f64>().sqrt();
    if norm_a == 0.0 || norm_b == 0.0 {
        0.0
    } else {
        dot / (norm_a * norm_b)
    }
}

/// Largest char boundary at or below `index`
pub fn floor_char_boundary(text: &str, index: usize) -> usize {
    if index >= text.len() {
        return text.len();
    }
    let mut i = index;
    while !text.is_char_boundary(i) {
        i -= 1;
    }
    i
}

/// Smallest char boundary at or above `index`
pub fn ceil_char_boundary(text: &str, index: usize) -> usize {
    if index >= text.len() {
        return text.len();
    }
    let mut i = index;
    while !text.is_char_boundary(i) {
        i += 1;
    }
    i
}
