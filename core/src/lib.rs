pub mod chunker;
pub mod config;
pub mod data;
pub mod embedding;
pub mod error;
pub mod hybrid;
pub mod index;
pub mod llm;
pub mod persist;
pub mod rerank;
pub mod semantic;
pub mod tokenizer;

use serde::{Deserialize, Serialize};

pub use config::SearchConfig;
pub use error::{Result, SearchError};
pub use hybrid::HybridSearch;
pub use index::InvertedIndex;
pub use semantic::{ChunkedSemanticIndex, SemanticIndex};
pub use tokenizer::Tokenizer;

pub type DocId = u32;

/// A searchable item. Immutable once loaded.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Document {
    pub id: DocId,
    pub title: String,
    pub description: String,
}

impl Document {
    pub fn new(id: DocId, title: impl Into<String>, description: impl Into<String>) -> Self {
        Self { id, title: title.into(), description: description.into() }
    }
}

/// Prefix of `text` holding at most `max_chars` characters.
pub fn snippet(text: &str, max_chars: usize) -> String {
    text.chars().take(max_chars).collect()
}
