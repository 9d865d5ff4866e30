//! Offline extractive completion provider
//!
//! Answers every role from the prompt's own sections without any network
//! call. Output is a pure function of the prompt, which makes it the default
//! when no API key is configured and the collaborator used by tests.

use super::{prompt_section, AgentRole, CompletionProvider, RoleConfig};
use crate::errors::Result;
use crate::text::{content_words, is_stopword, words, HeuristicTokenizer, Tokenizer};
use async_trait::async_trait;
use serde_json::json;
use std::collections::HashSet;

const MAX_FACTS: usize = 6;

/// Deterministic, role-aware stand-in for an LLM
#[derive(Debug, Clone, Copy, Default)]
pub struct ExtractiveCompleter;

impl ExtractiveCompleter {
    pub fn new() -> Self {
        Self
    }

    fn research(&self, prompt: &str) -> String {
        let question = prompt_section(prompt, "question").unwrap_or_default();
        let context = prompt_section(prompt, "context").unwrap_or_default();
        let facts = relevant_sentences(question, context, MAX_FACTS);
        json!({ "key_facts": facts }).to_string()
    }

    fn synthesize(&self, prompt: &str) -> String {
        let question = prompt_section(prompt, "question").unwrap_or_default();
        let mut points: Vec<String> = match prompt_section(prompt, "facts") {
            Some(facts) => bullet_lines(facts),
            None => {
                let context = prompt_section(prompt, "context").unwrap_or_default();
                relevant_sentences(question, context, MAX_FACTS)
            }
        };
        if let Some(critique) = prompt_section(prompt, "critique") {
            for missing in bullet_lines(critique) {
                if !points.contains(&missing) {
                    points.push(missing);
                }
            }
        }

        let bullets: String = points.iter().map(|p| format!("- {}\n", p)).collect();
        if prompt_section(prompt, "entity").is_some() {
            return bullets;
        }
        if points.is_empty() {
            return "The provided context does not contain enough information to answer.".to_string();
        }
        format!("## Answer\n\n{}\n{}", bullets, summary_line(question, points.len()))
    }

    fn critique(&self, prompt: &str) -> String {
        let facts = bullet_lines(prompt_section(prompt, "facts").unwrap_or_default());
        let draft: HashSet<String> = content_words(prompt_section(prompt, "draft").unwrap_or_default())
            .into_iter()
            .collect();

        let missing: Vec<&String> = facts
            .iter()
            .filter(|fact| {
                let terms = content_words(fact);
                let present = terms.iter().filter(|t| draft.contains(*t)).count();
                !terms.is_empty() && present * 2 < terms.len()
            })
            .collect();

        if missing.is_empty() {
            "satisfactory".to_string()
        } else {
            let list: String = missing.iter().map(|m| format!("- {}\n", m)).collect();
            format!("needs revision, missing facts:\n{}", list)
        }
    }

    fn entities(&self, prompt: &str) -> String {
        let context = prompt_section(prompt, "context").unwrap_or_default();
        let mut seen = HashSet::new();
        let mut names = Vec::new();
        let mut current: Vec<&str> = Vec::new();

        for word in words(context) {
            let capitalized = word.chars().next().map_or(false, |c| c.is_uppercase())
                && word.chars().count() > 1
                && !is_stopword(&word.to_lowercase());
            if capitalized {
                current.push(word);
            } else {
                flush_name(&mut current, &mut names, &mut seen);
            }
        }
        flush_name(&mut current, &mut names, &mut seen);

        names.truncate(10);
        names.join("\n")
    }

    fn boundaries(&self, prompt: &str) -> String {
        let context = prompt_section(prompt, "context").unwrap_or_default();
        let mut offsets = Vec::new();
        let mut offset = 0;
        let mut previous_blank = true;
        for line in context.split_inclusive('\n') {
            let trimmed = line.trim();
            let title_like = !trimmed.is_empty()
                && trimmed.chars().count() < 60
                && trimmed.chars().next().map_or(false, |c| c.is_uppercase())
                && !trimmed.ends_with(['.', '!', '?', ',']);
            if offset > 0 && title_like && (previous_blank || trimmed.ends_with(':')) {
                offsets.push(offset);
            }
            previous_blank = trimmed.is_empty();
            offset += line.len();
        }
        json!({ "boundaries": offsets }).to_string()
    }

    fn judge(&self, prompt: &str) -> String {
        let candidates = prompt_section(prompt, "candidates").unwrap_or_default();
        let mut best: Option<(&str, f64)> = None;
        for line in candidates.lines() {
            let Some((name, rest)) = line.split_once(':') else {
                continue;
            };
            let score = rest
                .split_whitespace()
                .find_map(|kv| kv.strip_prefix("score="))
                .and_then(|v| v.parse::<f64>().ok());
            if let Some(score) = score {
                if best.map_or(true, |(_, s)| score > s) {
                    best = Some((name.trim(), score));
                }
            }
        }
        match best {
            Some((name, score)) => format!(
                "{} gave the most complete and clearly structured answer (score {:.2}).",
                name, score
            ),
            None => "No strategy produced a usable answer.".to_string(),
        }
    }
}

#[async_trait]
impl CompletionProvider for ExtractiveCompleter {
    async fn complete(&self, prompt: &str, role: &RoleConfig) -> Result<String> {
        let output = match role.role {
            AgentRole::Boundary => self.boundaries(prompt),
            AgentRole::Entity => self.entities(prompt),
            AgentRole::Researcher => self.research(prompt),
            AgentRole::Synthesizer => self.synthesize(prompt),
            AgentRole::Critic => self.critique(prompt),
            AgentRole::Judge => self.judge(prompt),
        };
        Ok(output)
    }

    fn model_name(&self) -> &str {
        "extractive"
    }
}

/// Sentences sharing content words with the question, best first
///
/// Falls back to the leading sentences when nothing overlaps.
fn relevant_sentences(question: &str, context: &str, limit: usize) -> Vec<String> {
    let query: HashSet<String> = content_words(question).into_iter().collect();
    let sentences: Vec<&str> = HeuristicTokenizer
        .sentence_spans(context)
        .into_iter()
        .map(|r| context[r].trim())
        .filter(|s| s.chars().count() > 12 && !s.starts_with("<<"))
        .collect();

    let mut scored: Vec<(usize, usize, &str)> = sentences
        .iter()
        .enumerate()
        .map(|(i, s)| {
            let overlap = content_words(s).iter().filter(|w| query.contains(*w)).count();
            (overlap, i, *s)
        })
        .filter(|(overlap, _, _)| *overlap > 0)
        .collect();
    scored.sort_by(|a, b| b.0.cmp(&a.0).then(a.1.cmp(&b.1)));

    let mut picked: Vec<(usize, &str)> = if scored.is_empty() {
        sentences.iter().take(limit.min(3)).copied().enumerate().collect()
    } else {
        scored.into_iter().take(limit).map(|(_, i, s)| (i, s)).collect()
    };
    picked.sort_by_key(|(i, _)| *i);

    let mut seen = HashSet::new();
    picked
        .into_iter()
        .map(|(_, s)| s.trim_start_matches(['-', '*', '#', ' ']).to_string())
        .filter(|s| seen.insert(s.clone()))
        .collect()
}

fn flush_name(current: &mut Vec<&str>, names: &mut Vec<String>, seen: &mut HashSet<String>) {
    if current.is_empty() {
        return;
    }
    let name = current.join(" ");
    if seen.insert(name.to_lowercase()) {
        names.push(name);
    }
    current.clear();
}

fn bullet_lines(text: &str) -> Vec<String> {
    text.lines()
        .map(|l| l.trim().trim_start_matches(['-', '*']).trim())
        .filter(|l| !l.is_empty() && !l.ends_with(':'))
        .map(|l| l.to_string())
        .collect()
}

fn summary_line(question: &str, points: usize) -> String {
    let topic = question.trim().trim_end_matches('?');
    if topic.is_empty() {
        format!("In summary, the context supports {} key points.\n", points)
    } else {
        format!(
            "In summary, the context supports {} key points on: {}.\n",
            points, topic
        )
    }
}
