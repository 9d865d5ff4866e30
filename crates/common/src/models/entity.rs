//! Entity and temporal records

use super::ChunkId;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

/// A canonicalized named entity with its aliases and mention locations
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct EntityRecord {
    /// Normalized key (lowercase, collapsed whitespace, suffix stripped)
    pub canonical: String,

    /// Display name: the most frequent surface form
    pub display: String,

    /// Every surface form seen for this entity
    pub aliases: BTreeSet<String>,

    /// Chunks mentioning the entity, ascending
    pub chunk_ids: Vec<ChunkId>,

    /// Total mention count across the document
    pub mentions: u32,
}

/// A time reference and the chunks that mention it
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TemporalRecord {
    /// Normalized period label (e.g. "Q3 2023", "FY2024", "2021")
    pub period: String,
    pub chunk_ids: Vec<ChunkId>,
}

/// One surface form found in one chunk
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct EntityMention {
    pub surface: String,
    pub key: String,
    pub count: u32,
}

/// Extraction output for a single chunk
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct ChunkEntities {
    pub chunk_id: ChunkId,
    pub entities: Vec<EntityMention>,
    pub periods: Vec<String>,
}

/// Document-wide entity index
///
/// `by_chunk` maps a chunk to canonical name and mention count. It is the
/// mapping entity retrieval and entity-focused synthesis consume.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EntityIndex {
    pub entities: Vec<EntityRecord>,
    pub periods: Vec<TemporalRecord>,
    pub by_chunk: BTreeMap<ChunkId, BTreeMap<String, u32>>,
}

impl EntityIndex {
    pub fn record(&self, canonical: &str) -> Option<&EntityRecord> {
        self.entities.iter().find(|e| e.canonical == canonical)
    }

    /// Mentions of `canonical` inside `chunk`
    pub fn mentions(&self, chunk: ChunkId, canonical: &str) -> u32 {
        self.by_chunk
            .get(&chunk)
            .and_then(|m| m.get(canonical))
            .copied()
            .unwrap_or(0)
    }

    /// Entity with the most mentions in `chunk`; ties go to the name that
    /// sorts first
    pub fn dominant_entity(&self, chunk: ChunkId) -> Option<&str> {
        let counts = self.by_chunk.get(&chunk)?;
        let mut best: Option<(&String, u32)> = None;
        for (name, &count) in counts {
            match best {
                Some((_, c)) if c >= count => {}
                _ => best = Some((name, count)),
            }
        }
        best.map(|(name, _)| name.as_str())
    }

    pub fn display_name<'a>(&'a self, canonical: &'a str) -> &'a str {
        self.record(canonical).map(|r| r.display.as_str()).unwrap_or(canonical)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn index() -> EntityIndex {
        let mut by_chunk = BTreeMap::new();
        by_chunk.insert(
            ChunkId(0),
            BTreeMap::from([("acme".to_string(), 2), ("globex".to_string(), 2)]),
        );
        by_chunk.insert(ChunkId(1), BTreeMap::from([("globex".to_string(), 1)]));
        EntityIndex {
            entities: vec![],
            periods: vec![],
            by_chunk,
        }
    }

    #[test]
    fn test_mentions_lookup() {
        let idx = index();
        assert_eq!(idx.mentions(ChunkId(0), "acme"), 2);
        assert_eq!(idx.mentions(ChunkId(1), "acme"), 0);
        assert_eq!(idx.mentions(ChunkId(9), "acme"), 0);
    }

    #[test]
    fn test_dominant_entity_tie_breaks_by_name() {
        let idx = index();
        assert_eq!(idx.dominant_entity(ChunkId(0)), Some("acme"));
        assert_eq!(idx.dominant_entity(ChunkId(1)), Some("globex"));
        assert_eq!(idx.dominant_entity(ChunkId(2)), None);
    }
}
