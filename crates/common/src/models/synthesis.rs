//! Synthesis outputs

use serde::{Deserialize, Serialize};
use std::fmt;

/// Synthesis strategy
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(rename_all = "snake_case")]
pub enum SynthesisStrategy {
    /// All context in one request
    SinglePrompt,
    /// Per-entity sub-requests merged into sections
    EntityFocused,
    /// Researcher, synthesizer and critic stages
    MultiAgent,
}

impl SynthesisStrategy {
    pub fn all() -> Vec<SynthesisStrategy> {
        vec![
            SynthesisStrategy::SinglePrompt,
            SynthesisStrategy::EntityFocused,
            SynthesisStrategy::MultiAgent,
        ]
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            SynthesisStrategy::SinglePrompt => "single_prompt",
            SynthesisStrategy::EntityFocused => "entity_focused",
            SynthesisStrategy::MultiAgent => "multi_agent",
        }
    }
}

impl fmt::Display for SynthesisStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum SynthesisStatus {
    Ok,
    /// Produced an answer but some sub-requests failed
    Degraded,
    /// Excluded from ranking
    Unavailable,
}

/// Answer produced by one synthesis strategy, with its scores
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SynthesisOutput {
    pub strategy: SynthesisStrategy,
    pub text: String,

    /// Answer length in characters
    pub response_length: usize,

    pub factual_completeness: f64,
    pub structural_clarity: f64,
    pub status: SynthesisStatus,

    /// Set when the run deadline expired before the strategy finished
    pub incomplete: bool,

    /// Context was cut to fit the input budget
    pub truncated: bool,

    /// Critic-triggered revisions performed
    pub revisions: u32,

    pub latency_ms: f64,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl SynthesisOutput {
    pub fn unavailable(strategy: SynthesisStrategy, error: impl Into<String>) -> Self {
        Self {
            strategy,
            text: String::new(),
            response_length: 0,
            factual_completeness: 0.0,
            structural_clarity: 0.0,
            status: SynthesisStatus::Unavailable,
            incomplete: false,
            truncated: false,
            revisions: 0,
            latency_ms: 0.0,
            error: Some(error.into()),
        }
    }

    pub fn incomplete(strategy: SynthesisStrategy) -> Self {
        Self {
            incomplete: true,
            ..Self::unavailable(strategy, "run deadline expired")
        }
    }

    /// Whether this output may take part in ranking
    pub fn is_rankable(&self) -> bool {
        self.status != SynthesisStatus::Unavailable && !self.incomplete
    }

    /// Weighted overall score
    pub fn score(&self, completeness_weight: f64, clarity_weight: f64) -> f64 {
        self.factual_completeness * completeness_weight + self.structural_clarity * clarity_weight
    }
}
