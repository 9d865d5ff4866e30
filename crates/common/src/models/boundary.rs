//! Boundary candidates

use serde::{Deserialize, Serialize};

/// Signal class that produced a boundary candidate
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum BoundaryType {
    /// Structural marker: header, speaker turn, rule, layout shift
    FormatChange,
    /// Dominant named entities change between windows
    EntityChange,
    /// Lexical similarity drops between windows
    TopicShift,
}

impl BoundaryType {
    pub fn as_str(&self) -> &'static str {
        match self {
            BoundaryType::FormatChange => "format_change",
            BoundaryType::EntityChange => "entity_change",
            BoundaryType::TopicShift => "topic_shift",
        }
    }
}

/// A point where structure, entity focus or topic likely changes
///
/// Confidence is a relative ranking signal within one document.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct BoundaryCandidate {
    /// Byte offset of the first byte of the new unit
    pub position: usize,

    pub kind: BoundaryType,

    /// Confidence in [0, 1]
    pub confidence: f32,

    /// Name of the signal that fired (e.g. "markdown_header")
    pub signal: String,

    /// Short snippet starting at the position
    pub context: String,
}
