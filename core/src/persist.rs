//! On-disk cache layout for the BM25 index and the embedding stores.
//!
//! Binary artifacts are bincode; metadata files are pretty JSON so a stale or
//! foreign cache can be inspected by hand.

use crate::{DocId, Document, Result, SearchError};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap};
use std::fs::{create_dir_all, File};
use std::io::{ErrorKind, Read, Write};
use std::path::{Path, PathBuf};
use time::format_description::well_known::Rfc3339;

/// Bumped whenever any artifact layout changes.
pub const FORMAT_VERSION: u32 = 1;

pub type Postings = HashMap<String, BTreeSet<DocId>>;
pub type TermFrequencies = HashMap<DocId, HashMap<String, u32>>;
pub type DocLengths = HashMap<DocId, u32>;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IndexMeta {
    pub version: u32,
    pub num_docs: usize,
    pub created_at: String,
}

impl IndexMeta {
    pub fn new(num_docs: usize) -> Result<Self> {
        Ok(Self { version: FORMAT_VERSION, num_docs, created_at: now_rfc3339()? })
    }
}

/// Where a chunk came from. `document_position` is one-based over the build-time sequence.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChunkMeta {
    pub document_position: usize,
    pub chunk_index: usize,
    pub chunk_count: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChunkMetadata {
    pub version: u32,
    pub dimension: usize,
    pub num_docs: usize,
    pub total_chunks: usize,
    pub chunks: Vec<ChunkMeta>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmbeddingMeta {
    pub version: u32,
    pub dimension: usize,
    pub num_docs: usize,
    pub created_at: String,
}

pub struct CachePaths {
    pub root: PathBuf,
}

impl CachePaths {
    pub fn new<P: AsRef<Path>>(root: P) -> Self {
        Self { root: root.as_ref().to_path_buf() }
    }
    pub fn postings(&self) -> PathBuf { self.root.join("postings.bin") }
    pub fn docs(&self) -> PathBuf { self.root.join("docs.bin") }
    pub fn term_frequencies(&self) -> PathBuf { self.root.join("term_frequencies.bin") }
    pub fn doc_lengths(&self) -> PathBuf { self.root.join("doc_lengths.bin") }
    pub fn index_meta(&self) -> PathBuf { self.root.join("index_meta.json") }
    pub fn chunk_embeddings(&self) -> PathBuf { self.root.join("chunk_embeddings.bin") }
    pub fn chunk_metadata(&self) -> PathBuf { self.root.join("chunk_metadata.json") }
    pub fn embeddings(&self) -> PathBuf { self.root.join("embeddings.bin") }
    pub fn embeddings_meta(&self) -> PathBuf { self.root.join("embeddings_meta.json") }

    /// True when every BM25 artifact is present.
    pub fn has_index(&self) -> bool {
        [self.postings(), self.docs(), self.term_frequencies(), self.doc_lengths(), self.index_meta()]
            .iter()
            .all(|p| p.exists())
    }
}

pub fn save_postings(paths: &CachePaths, postings: &Postings) -> Result<()> {
    write_bincode(&paths.root, &paths.postings(), postings)
}

pub fn load_postings(paths: &CachePaths) -> Result<Postings> { read_bincode(&paths.postings()) }

pub fn save_docs(paths: &CachePaths, docs: &[Document]) -> Result<()> {
    write_bincode(&paths.root, &paths.docs(), docs)
}

pub fn load_docs(paths: &CachePaths) -> Result<Vec<Document>> { read_bincode(&paths.docs()) }

pub fn save_term_frequencies(paths: &CachePaths, tf: &TermFrequencies) -> Result<()> {
    write_bincode(&paths.root, &paths.term_frequencies(), tf)
}

pub fn load_term_frequencies(paths: &CachePaths) -> Result<TermFrequencies> {
    read_bincode(&paths.term_frequencies())
}

pub fn save_doc_lengths(paths: &CachePaths, lengths: &DocLengths) -> Result<()> {
    write_bincode(&paths.root, &paths.doc_lengths(), lengths)
}

pub fn load_doc_lengths(paths: &CachePaths) -> Result<DocLengths> { read_bincode(&paths.doc_lengths()) }

pub fn save_index_meta(paths: &CachePaths, meta: &IndexMeta) -> Result<()> {
    write_json(&paths.root, &paths.index_meta(), meta)
}

pub fn load_index_meta(paths: &CachePaths) -> Result<IndexMeta> {
    let meta: IndexMeta = read_json(&paths.index_meta())?;
    check_version(meta.version)?;
    Ok(meta)
}

pub fn save_chunk_store(paths: &CachePaths, vectors: &[Vec<f32>], meta: &ChunkMetadata) -> Result<()> {
    write_bincode(&paths.root, &paths.chunk_embeddings(), vectors)?;
    write_json(&paths.root, &paths.chunk_metadata(), meta)
}

pub fn load_chunk_store(paths: &CachePaths) -> Result<(Vec<Vec<f32>>, ChunkMetadata)> {
    let meta: ChunkMetadata = read_json(&paths.chunk_metadata())?;
    check_version(meta.version)?;
    let vectors = read_bincode(&paths.chunk_embeddings())?;
    Ok((vectors, meta))
}

pub fn save_embeddings(paths: &CachePaths, vectors: &[Vec<f32>], meta: &EmbeddingMeta) -> Result<()> {
    write_bincode(&paths.root, &paths.embeddings(), vectors)?;
    write_json(&paths.root, &paths.embeddings_meta(), meta)
}

pub fn load_embeddings(paths: &CachePaths) -> Result<(Vec<Vec<f32>>, EmbeddingMeta)> {
    let meta: EmbeddingMeta = read_json(&paths.embeddings_meta())?;
    check_version(meta.version)?;
    let vectors = read_bincode(&paths.embeddings())?;
    Ok((vectors, meta))
}

pub(crate) fn now_rfc3339() -> Result<String> {
    Ok(time::OffsetDateTime::now_utc().format(&Rfc3339)?)
}

fn check_version(found: u32) -> Result<()> {
    if found != FORMAT_VERSION {
        return Err(SearchError::SchemaMismatch { expected: FORMAT_VERSION, found });
    }
    Ok(())
}

fn open(path: &Path) -> Result<File> {
    File::open(path).map_err(|e| match e.kind() {
        ErrorKind::NotFound => SearchError::CacheMiss(path.to_path_buf()),
        _ => SearchError::Io(e),
    })
}

fn write_bincode<T: Serialize + ?Sized>(root: &Path, path: &Path, value: &T) -> Result<()> {
    create_dir_all(root)?;
    let mut f = File::create(path)?;
    let bytes = bincode::serialize(value)?;
    f.write_all(&bytes)?;
    Ok(())
}

fn read_bincode<T: DeserializeOwned>(path: &Path) -> Result<T> {
    let mut f = open(path)?;
    let mut buf = Vec::new();
    f.read_to_end(&mut buf)?;
    Ok(bincode::deserialize(&buf)?)
}

fn write_json<T: Serialize>(root: &Path, path: &Path, value: &T) -> Result<()> {
    create_dir_all(root)?;
    let mut f = File::create(path)?;
    let json = serde_json::to_string_pretty(value)?;
    f.write_all(json.as_bytes())?;
    Ok(())
}

fn read_json<T: DeserializeOwned>(path: &Path) -> Result<T> {
    let mut f = open(path)?;
    let mut buf = String::new();
    f.read_to_string(&mut buf)?;
    Ok(serde_json::from_str(&buf)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn missing_artifact_is_cache_miss() {
        let dir = tempdir().unwrap();
        let paths = CachePaths::new(dir.path());
        assert!(!paths.has_index());
        match load_postings(&paths) {
            Err(SearchError::CacheMiss(p)) => assert_eq!(p, paths.postings()),
            other => panic!("expected cache miss, got {other:?}"),
        }
    }

    #[test]
    fn foreign_version_is_rejected() {
        let dir = tempdir().unwrap();
        let paths = CachePaths::new(dir.path());
        let meta = IndexMeta { version: FORMAT_VERSION + 1, num_docs: 3, created_at: String::new() };
        save_index_meta(&paths, &meta).unwrap();
        assert!(matches!(
            load_index_meta(&paths),
            Err(SearchError::SchemaMismatch { found, .. }) if found == FORMAT_VERSION + 1
        ));
    }

    #[test]
    fn chunk_store_roundtrip() {
        let dir = tempdir().unwrap();
        let paths = CachePaths::new(dir.path().join("nested"));
        let vectors = vec![vec![0.5, 0.5], vec![1.0, 0.0]];
        let chunks = vec![
            ChunkMeta { document_position: 1, chunk_index: 0, chunk_count: 2 },
            ChunkMeta { document_position: 1, chunk_index: 1, chunk_count: 2 },
        ];
        let meta = ChunkMetadata { version: FORMAT_VERSION, dimension: 2, num_docs: 1, total_chunks: 2, chunks };
        save_chunk_store(&paths, &vectors, &meta).unwrap();
        let (loaded, loaded_meta) = load_chunk_store(&paths).unwrap();
        assert_eq!(loaded, vectors);
        assert_eq!(loaded_meta.chunks, meta.chunks);
        assert_eq!(loaded_meta.total_chunks, 2);
    }
}
