use crate::index::{BM25_B, BM25_K1};
use crate::semantic::DEFAULT_SNIPPET_LEN;
use crate::Result;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Bm25Params {
    pub k1: f64,
    pub b: f64,
}

impl Default for Bm25Params {
    fn default() -> Self { Self { k1: BM25_K1, b: BM25_B } }
}

/// Sentence window size and how many sentences consecutive windows share.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ChunkParams {
    pub max_chunk_size: usize,
    pub overlap: usize,
}

impl Default for ChunkParams {
    fn default() -> Self { Self { max_chunk_size: 4, overlap: 1 } }
}

/// Tunables for index construction and fusion. Every field has a default, so a
/// config file only needs the keys it overrides.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SearchConfig {
    pub cache_dir: PathBuf,
    pub bm25: Bm25Params,
    pub chunking: ChunkParams,
    pub snippet_len: usize,
    /// Each side of a fused search fetches `limit * overfetch` candidates.
    pub overfetch: usize,
    pub rrf_k: f64,
    pub alpha: f64,
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            cache_dir: PathBuf::from("cache"),
            bm25: Bm25Params::default(),
            chunking: ChunkParams::default(),
            snippet_len: DEFAULT_SNIPPET_LEN,
            overfetch: 500,
            rrf_k: 60.0,
            alpha: 0.5,
        }
    }
}

impl SearchConfig {
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        Ok(serde_json::from_str(&text)?)
    }
}
