//! Source document

use crate::text::Tokenizer;
use serde::{Deserialize, Serialize};

/// Raw document under comparison
///
/// Offsets everywhere in the model are byte offsets into `text` and always
/// fall on UTF-8 character boundaries.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Document {
    /// Raw text
    pub text: String,

    /// Length in characters
    pub char_len: usize,

    /// Estimated token count (derived, not authoritative)
    pub estimated_tokens: usize,
}

impl Document {
    /// Build a document, deriving its length and token estimate
    pub fn new(text: impl Into<String>, tokenizer: &dyn Tokenizer) -> Self {
        let text = text.into();
        let char_len = text.chars().count();
        let estimated_tokens = tokenizer.estimate_tokens(&text);
        Self {
            text,
            char_len,
            estimated_tokens,
        }
    }

    /// Length in bytes
    pub fn len(&self) -> usize {
        self.text.len()
    }

    pub fn is_empty(&self) -> bool {
        self.text.is_empty()
    }

    /// Slice by byte range
    pub fn slice(&self, start: usize, end: usize) -> &str {
        &self.text[start..end]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::text::HeuristicTokenizer;

    #[test]
    fn test_document_lengths() {
        let doc = Document::new("Héllo world.", &HeuristicTokenizer);
        assert_eq!(doc.char_len, 12);
        assert_eq!(doc.len(), 13);
        assert_eq!(doc.estimated_tokens, 3);
    }
}
