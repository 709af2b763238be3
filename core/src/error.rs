//! Error types for the retrieval library.

use std::path::PathBuf;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum SearchError {
    /// A single-term statistic received text that did not tokenize to exactly one term.
    #[error("expected exactly one token in {term:?}, found {count}")]
    InvalidInput { term: String, count: usize },
    /// Embedding requested for empty or whitespace-only text.
    #[error("cannot embed empty text")]
    EmptyInput,
    /// No saved index at the expected location.
    #[error("no cached index at {0}")]
    CacheMiss(PathBuf),
    /// Cache written by an incompatible format version.
    #[error("cache format version {found}, expected {expected}")]
    SchemaMismatch { expected: u32, found: u32 },
    #[error("embedding dimension {found}, expected {expected}")]
    DimensionMismatch { expected: usize, found: usize },
    /// Embedding or language-model collaborator failure.
    #[error("provider error: {0}")]
    Provider(String),
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error(transparent)]
    Encode(#[from] bincode::Error),
    #[error(transparent)]
    Json(#[from] serde_json::Error),
    #[error(transparent)]
    Time(#[from] time::error::Format),
}

impl From<reqwest::Error> for SearchError {
    fn from(err: reqwest::Error) -> Self {
        SearchError::Provider(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, SearchError>;
