//! Entity and temporal tracking
//!
//! Provides:
//! - Per-chunk extraction of named entities and time references
//! - Normalization and alias merging into a document-wide index
//! - Resolution of query text to indexed entities

use regex_lite::Regex;
use showdown_common::errors::{AppError, Result};
use showdown_common::models::{
    ChunkEntities, ChunkId, EntityIndex, EntityMention, EntityRecord, TemporalRecord,
};
use showdown_common::text::{is_stopword, words, HeuristicTokenizer, Tokenizer};
use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};
use std::ops::Range;

/// Minimum normalized edit similarity for two keys to be aliases
const ALIAS_SIMILARITY: f64 = 0.85;

/// Trailing tokens dropped from organization names
const COMPANY_SUFFIXES: &[&str] = &[
    "co", "company", "corp", "corporation", "group", "holdings", "inc", "incorporated", "llc",
    "ltd", "plc",
];

/// Capitalized words that are never entities on their own
const NON_ENTITY_WORDS: &[&str] = &[
    "april", "august", "december", "february", "friday", "january", "july", "june", "march",
    "may", "monday", "november", "october", "saturday", "september", "sunday", "thursday",
    "tuesday", "wednesday", "additionally", "however", "meanwhile", "moreover", "okay",
    "overall", "thanks", "yes",
];

/// Extracts and canonicalizes entities and time periods
#[derive(Debug, Clone)]
pub struct EntityTemporalTracker {
    name: Regex,
    quarter: Regex,
    quarter_words: Regex,
    fiscal_year: Regex,
    month_year: Regex,
    year: Regex,
}

impl EntityTemporalTracker {
    pub fn new() -> Result<Self> {
        Ok(Self {
            name: compile(r"[A-Z][A-Za-z0-9&'\-]*(?:[ \t]+(?:(?:of|&|de)[ \t]+)?[A-Z][A-Za-z0-9&'\-]*)*")?,
            quarter: compile(r"\b(Q[1-4])[ \t]*(?:FY[ \t]*)?'?(\d{4}|\d{2})\b")?,
            quarter_words: compile(
                r"(?i)\b(first|second|third|fourth)[ \t]+quarter[ \t]+(?:of[ \t]+)?(?:fiscal[ \t]+)?(\d{4})\b",
            )?,
            fiscal_year: compile(r"\bFY[ \t]*'?(\d{4}|\d{2})\b")?,
            month_year: compile(
                r"\b(January|February|March|April|May|June|July|August|September|October|November|December)[ \t]+(?:\d{1,2},[ \t]+)?(\d{4})\b",
            )?,
            year: compile(r"\b(19\d{2}|20\d{2})\b")?,
        })
    }

    /// Entities and periods mentioned in one chunk
    pub fn extract(&self, chunk_id: ChunkId, text: &str) -> ChunkEntities {
        ChunkEntities {
            chunk_id,
            entities: self.entity_mentions(text),
            periods: self.periods(text),
        }
    }

    /// Normalized entity keys mentioned in `text`
    pub fn entity_keys(&self, text: &str) -> BTreeSet<String> {
        self.entity_mentions(text).into_iter().map(|m| m.key).collect()
    }

    fn entity_mentions(&self, text: &str) -> Vec<EntityMention> {
        let sentence_starts: HashSet<usize> = HeuristicTokenizer
            .sentence_spans(text)
            .into_iter()
            .map(|span| {
                let body = &text[span.clone()];
                span.start + (body.len() - body.trim_start().len())
            })
            .collect();
        let matches: Vec<_> = self.name.find_iter(text).collect();

        // Words capitalized away from a sentence start are names, not
        // sentence-initial common words
        let capitalized_mid: HashSet<String> = matches
            .iter()
            .filter(|m| !sentence_starts.contains(&m.start()))
            .flat_map(|m| words(m.as_str()))
            .map(|w| w.to_lowercase())
            .collect();

        let mut mentions: Vec<EntityMention> = Vec::new();
        for m in matches {
            let speaker = text[m.end()..].starts_with(':');
            let mut tokens: Vec<&str> = m.as_str().split_whitespace().collect();

            let leading = tokens
                .iter()
                .take_while(|t| is_filler(t))
                .count();
            tokens.drain(..leading);
            while tokens.last().map_or(false, |t| is_filler(t) || is_connector(t)) {
                tokens.pop();
            }
            if tokens.is_empty() {
                continue;
            }

            if tokens.len() == 1 && !speaker {
                let word = tokens[0];
                let at_sentence_start = leading == 0 && sentence_starts.contains(&m.start());
                if word.chars().count() < 2
                    || (at_sentence_start && !capitalized_mid.contains(&word.to_lowercase()))
                {
                    continue;
                }
            }

            let surface = tokens.join(" ");
            let key = normalize(&surface);
            if key.is_empty() {
                continue;
            }
            match mentions.iter_mut().find(|e| e.surface == surface) {
                Some(existing) => existing.count += 1,
                None => mentions.push(EntityMention {
                    surface,
                    key,
                    count: 1,
                }),
            }
        }
        mentions
    }

    fn periods(&self, text: &str) -> Vec<String> {
        let mut taken: Vec<Range<usize>> = Vec::new();
        let mut found: Vec<(usize, String)> = Vec::new();

        let mut claim = |range: Range<usize>, label: String, found: &mut Vec<(usize, String)>| {
            if taken.iter().any(|r| r.start < range.end && range.start < r.end) {
                return;
            }
            found.push((range.start, label));
            taken.push(range);
        };

        for caps in self.quarter.captures_iter(text) {
            if let (Some(all), Some(q), Some(y)) = (caps.get(0), caps.get(1), caps.get(2)) {
                claim(all.range(), format!("{} {}", q.as_str(), full_year(y.as_str())), &mut found);
            }
        }
        for caps in self.quarter_words.captures_iter(text) {
            if let (Some(all), Some(ordinal), Some(y)) = (caps.get(0), caps.get(1), caps.get(2)) {
                let q = match ordinal.as_str().to_lowercase().as_str() {
                    "first" => 1,
                    "second" => 2,
                    "third" => 3,
                    _ => 4,
                };
                claim(all.range(), format!("Q{} {}", q, y.as_str()), &mut found);
            }
        }
        for caps in self.fiscal_year.captures_iter(text) {
            if let (Some(all), Some(y)) = (caps.get(0), caps.get(1)) {
                claim(all.range(), format!("FY{}", full_year(y.as_str())), &mut found);
            }
        }
        for caps in self.month_year.captures_iter(text) {
            if let (Some(all), Some(month), Some(y)) = (caps.get(0), caps.get(1), caps.get(2)) {
                claim(all.range(), format!("{} {}", month.as_str(), y.as_str()), &mut found);
            }
        }
        for m in self.year.find_iter(text) {
            claim(m.range(), m.as_str().to_string(), &mut found);
        }

        found.sort_by_key(|(pos, _)| *pos);
        let mut seen = HashSet::new();
        found
            .into_iter()
            .map(|(_, label)| label)
            .filter(|label| seen.insert(label.clone()))
            .collect()
    }

    /// Merge per-chunk extractions into a document-wide index
    ///
    /// Extractions are folded in chunk order, so the result does not depend
    /// on the order in which chunks finished extracting.
    pub fn merge(&self, mut extractions: Vec<ChunkEntities>) -> EntityIndex {
        extractions.sort_by_key(|e| e.chunk_id);

        let mut clusters: Vec<Cluster> = Vec::new();
        let mut cluster_of: HashMap<String, usize> = HashMap::new();
        let mut placements: Vec<(ChunkId, usize, u32)> = Vec::new();
        let mut periods: Vec<(String, BTreeSet<ChunkId>)> = Vec::new();

        for extraction in &extractions {
            for mention in &extraction.entities {
                let idx = match cluster_of.get(&mention.key) {
                    Some(&idx) => idx,
                    None => {
                        let idx = clusters
                            .iter()
                            .position(|c| c.keys.iter().any(|k| is_alias(k, &mention.key)))
                            .unwrap_or_else(|| {
                                clusters.push(Cluster::default());
                                clusters.len() - 1
                            });
                        cluster_of.insert(mention.key.clone(), idx);
                        idx
                    }
                };
                clusters[idx].add(mention, extraction.chunk_id);
                placements.push((extraction.chunk_id, idx, mention.count));
            }

            for period in &extraction.periods {
                match periods.iter_mut().find(|(label, _)| label == period) {
                    Some((_, chunks)) => {
                        chunks.insert(extraction.chunk_id);
                    }
                    None => periods.push((period.clone(), BTreeSet::from([extraction.chunk_id]))),
                }
            }
        }

        let entities: Vec<EntityRecord> = clusters.iter().map(Cluster::record).collect();

        let mut by_chunk: BTreeMap<ChunkId, BTreeMap<String, u32>> = BTreeMap::new();
        for (chunk_id, idx, count) in placements {
            *by_chunk
                .entry(chunk_id)
                .or_default()
                .entry(entities[idx].canonical.clone())
                .or_insert(0) += count;
        }

        EntityIndex {
            entities,
            periods: periods
                .into_iter()
                .map(|(period, chunks)| TemporalRecord {
                    period,
                    chunk_ids: chunks.into_iter().collect(),
                })
                .collect(),
            by_chunk,
        }
    }

    /// Indexed entity a surface form refers to
    pub fn resolve<'a>(&self, index: &'a EntityIndex, surface: &str) -> Option<&'a EntityRecord> {
        let key = normalize(surface);
        if key.is_empty() {
            return None;
        }
        index
            .entities
            .iter()
            .find(|e| e.canonical == key || e.aliases.iter().any(|a| normalize(a) == key))
            .or_else(|| index.entities.iter().find(|e| is_alias(&e.canonical, &key)))
    }

    /// Canonical names of indexed entities a query mentions, in query order
    pub fn query_entities(&self, index: &EntityIndex, query: &str) -> Vec<String> {
        let lowered = query.to_lowercase();
        let mut hits: Vec<(usize, String)> = Vec::new();

        for record in &index.entities {
            let forms = std::iter::once(record.canonical.clone())
                .chain(record.aliases.iter().map(|a| a.to_lowercase()));
            if let Some(pos) = forms.filter_map(|f| find_word(&lowered, &f)).min() {
                hits.push((pos, record.canonical.clone()));
            }
        }

        for m in self.name.find_iter(query) {
            if let Some(record) = self.resolve(index, m.as_str()) {
                if !hits.iter().any(|(_, c)| c == &record.canonical) {
                    hits.push((m.start(), record.canonical.clone()));
                }
            }
        }

        hits.sort();
        hits.into_iter().map(|(_, canonical)| canonical).collect()
    }
}

#[derive(Debug, Default)]
struct Cluster {
    /// Normalized keys in first-seen order
    keys: Vec<String>,
    key_counts: HashMap<String, u32>,
    /// Surface forms in first-seen order with counts
    surfaces: Vec<(String, u32)>,
    chunk_ids: BTreeSet<ChunkId>,
    mentions: u32,
}

impl Cluster {
    fn add(&mut self, mention: &EntityMention, chunk_id: ChunkId) {
        if !self.keys.contains(&mention.key) {
            self.keys.push(mention.key.clone());
        }
        *self.key_counts.entry(mention.key.clone()).or_insert(0) += mention.count;
        match self.surfaces.iter_mut().find(|(s, _)| s == &mention.surface) {
            Some((_, count)) => *count += mention.count,
            None => self.surfaces.push((mention.surface.clone(), mention.count)),
        }
        self.chunk_ids.insert(chunk_id);
        self.mentions += mention.count;
    }

    fn record(&self) -> EntityRecord {
        let canonical = most_frequent(self.keys.iter().map(|k| (k, self.key_counts[k])));
        let display = most_frequent(self.surfaces.iter().map(|(s, c)| (s, *c)));
        EntityRecord {
            canonical,
            display,
            aliases: self.surfaces.iter().map(|(s, _)| s.clone()).collect(),
            chunk_ids: self.chunk_ids.iter().copied().collect(),
            mentions: self.mentions,
        }
    }
}

/// Highest count wins; ties go to the earliest item
fn most_frequent<'a>(items: impl Iterator<Item = (&'a String, u32)>) -> String {
    let mut best: Option<(&String, u32)> = None;
    for (item, count) in items {
        if best.map_or(true, |(_, c)| count > c) {
            best = Some((item, count));
        }
    }
    best.map(|(item, _)| item.clone()).unwrap_or_default()
}

/// Canonical key: lowercase, collapsed whitespace, no leading article,
/// possessive or trailing company suffix
pub fn normalize(surface: &str) -> String {
    let lowered = surface.to_lowercase();
    let mut tokens: Vec<&str> = lowered
        .split_whitespace()
        .map(|t| t.trim_matches(|c: char| !c.is_alphanumeric() && c != '&'))
        .map(|t| t.strip_suffix("'s").unwrap_or(t))
        .filter(|t| !t.is_empty())
        .collect();

    while tokens.len() > 1 && tokens[0] == "the" {
        tokens.remove(0);
    }
    while tokens.len() > 1 && tokens.last().map_or(false, |t| COMPANY_SUFFIXES.contains(t)) {
        tokens.pop();
    }
    tokens.join(" ")
}

/// Whether two normalized keys name the same entity
fn is_alias(a: &str, b: &str) -> bool {
    if a == b {
        return true;
    }
    let ta: Vec<&str> = a.split(' ').collect();
    let tb: Vec<&str> = b.split(' ').collect();
    let (short, long) = if ta.len() <= tb.len() { (&ta, &tb) } else { (&tb, &ta) };
    if short.len() < long.len() && short[0].chars().count() >= 3 && long.starts_with(short) {
        return true;
    }

    let (la, lb) = (a.chars().count(), b.chars().count());
    la >= 5 && lb >= 5 && edit_similarity(a, b) >= ALIAS_SIMILARITY
}

/// 1 - levenshtein / longer length
fn edit_similarity(a: &str, b: &str) -> f64 {
    let a: Vec<char> = a.chars().collect();
    let b: Vec<char> = b.chars().collect();
    let longest = a.len().max(b.len());
    if longest == 0 {
        return 1.0;
    }

    let mut prev: Vec<usize> = (0..=b.len()).collect();
    let mut curr = vec![0; b.len() + 1];
    for i in 1..=a.len() {
        curr[0] = i;
        for j in 1..=b.len() {
            let cost = usize::from(a[i - 1] != b[j - 1]);
            curr[j] = (prev[j] + 1).min(curr[j - 1] + 1).min(prev[j - 1] + cost);
        }
        std::mem::swap(&mut prev, &mut curr);
    }
    1.0 - prev[b.len()] as f64 / longest as f64
}

/// Byte position of `needle` in `haystack` as a whole word
pub(crate) fn find_word(haystack: &str, needle: &str) -> Option<usize> {
    if needle.is_empty() {
        return None;
    }
    haystack.match_indices(needle).map(|(i, _)| i).find(|&i| {
        let before = haystack[..i].chars().next_back();
        let after = haystack[i + needle.len()..].chars().next();
        before.map_or(true, |c| !c.is_alphanumeric()) && after.map_or(true, |c| !c.is_alphanumeric())
    })
}

fn is_filler(token: &str) -> bool {
    let lower = token.to_lowercase();
    is_stopword(&lower) || NON_ENTITY_WORDS.contains(&lower.as_str()) || is_period_token(&lower)
}

fn is_connector(token: &str) -> bool {
    matches!(token, "of" | "&" | "de")
}

fn is_period_token(lower: &str) -> bool {
    let quarter = lower.len() == 2 && lower.starts_with('q') && matches!(&lower[1..], "1" | "2" | "3" | "4");
    let fiscal = lower.starts_with("fy") && lower[2..].chars().all(|c| c.is_ascii_digit() || c == '\'');
    quarter || fiscal || lower.chars().all(|c| c.is_ascii_digit())
}

fn full_year(year: &str) -> String {
    if year.len() == 2 {
        format!("20{}", year)
    } else {
        year.to_string()
    }
}

fn compile(pattern: &str) -> Result<Regex> {
    Regex::new(pattern).map_err(|e| AppError::Internal {
        message: format!("invalid pattern {}: {}", pattern, e),
    })
}
