//! Vector search over document embeddings.
//!
//! [`SemanticIndex`] keeps one vector per document; [`ChunkedSemanticIndex`] keeps one
//! vector per sentence window and max-pools chunk similarity per document. Both obtain
//! vectors from the same injected [`EmbeddingProvider`].
//!
//! Chunks are keyed by their document's one-based position in the build-time sequence.
//! Positions are resolved back through that sequence, never read as ids, so collections
//! with sparse or unordered ids are handled.

use crate::chunker::chunk;
use crate::config::ChunkParams;
use crate::embedding::EmbeddingProvider;
use crate::persist::{
    load_chunk_store, load_embeddings, now_rfc3339, save_chunk_store, save_embeddings, CachePaths, ChunkMeta,
    ChunkMetadata, EmbeddingMeta, FORMAT_VERSION,
};
use crate::{snippet, DocId, Document, Result, SearchError};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;

pub const DEFAULT_SNIPPET_LEN: usize = 100;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SemanticResult {
    pub doc_id: DocId,
    pub title: String,
    pub snippet: String,
    pub score: f64,
}

/// `dot(a, b) / (|a| * |b|)`, or 0.0 when either norm is zero.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f64 {
    let mut dot = 0.0f64;
    let mut na = 0.0f64;
    let mut nb = 0.0f64;
    for (x, y) in a.iter().zip(b) {
        let (x, y) = (*x as f64, *y as f64);
        dot += x * y;
        na += x * x;
        nb += y * y;
    }
    if na == 0.0 || nb == 0.0 {
        return 0.0;
    }
    dot / (na.sqrt() * nb.sqrt())
}

fn to_result(doc: &Document, score: f64, snippet_len: usize) -> SemanticResult {
    SemanticResult { doc_id: doc.id, title: doc.title.clone(), snippet: snippet(&doc.description, snippet_len), score }
}

fn sort_desc(scored: &mut [(usize, f64)]) {
    scored.sort_by(|a, b| b.1.total_cmp(&a.1));
}

fn well_formed(vectors: &[Vec<f32>], dimension: usize) -> bool {
    vectors.iter().all(|v| v.len() == dimension)
}

/// One embedding per document over `"{title}: {description}"`.
pub struct SemanticIndex {
    provider: Arc<dyn EmbeddingProvider>,
    snippet_len: usize,
    documents: Vec<Document>,
    embeddings: Vec<Vec<f32>>,
}

impl SemanticIndex {
    pub fn new(provider: Arc<dyn EmbeddingProvider>) -> Self {
        Self { provider, snippet_len: DEFAULT_SNIPPET_LEN, documents: Vec::new(), embeddings: Vec::new() }
    }

    pub fn with_snippet_len(mut self, snippet_len: usize) -> Self {
        self.snippet_len = snippet_len;
        self
    }

    pub fn len(&self) -> usize { self.embeddings.len() }

    pub fn is_empty(&self) -> bool { self.embeddings.is_empty() }

    pub fn build(&mut self, documents: &[Document]) -> Result<()> {
        let texts: Vec<String> = documents.iter().map(|d| format!("{}: {}", d.title, d.description)).collect();
        let refs: Vec<&str> = texts.iter().map(String::as_str).collect();
        self.embeddings = self.provider.embed(&refs)?;
        self.documents = documents.to_vec();
        tracing::info!(num_docs = documents.len(), model = self.provider.model_name(), "built document embeddings");
        Ok(())
    }

    pub fn save(&self, paths: &CachePaths) -> Result<()> {
        let meta = EmbeddingMeta {
            version: FORMAT_VERSION,
            dimension: self.provider.dimension(),
            num_docs: self.documents.len(),
            created_at: now_rfc3339()?,
        };
        save_embeddings(paths, &self.embeddings, &meta)
    }

    /// Reuse the cached vectors when they still describe `documents`, otherwise rebuild and save.
    pub fn load_or_build(&mut self, documents: &[Document], paths: &CachePaths) -> Result<()> {
        if paths.embeddings().exists() && paths.embeddings_meta().exists() {
            match load_embeddings(paths) {
                Ok((vectors, meta))
                    if vectors.len() == documents.len()
                        && meta.num_docs == documents.len()
                        && meta.dimension == self.provider.dimension()
                        && well_formed(&vectors, meta.dimension) =>
                {
                    self.embeddings = vectors;
                    self.documents = documents.to_vec();
                    tracing::info!(num_docs = documents.len(), "loaded document embeddings");
                    return Ok(());
                }
                Ok((vectors, meta)) => {
                    tracing::warn!(cached = vectors.len(), num_docs = meta.num_docs, expected = documents.len(), "document embeddings stale, rebuilding");
                }
                Err(SearchError::SchemaMismatch { found, .. }) => {
                    tracing::warn!(found, "document embeddings use an old format, rebuilding");
                }
                Err(e) => return Err(e),
            }
        }
        self.build(documents)?;
        self.save(paths)
    }

    pub fn search(&self, query: &str, limit: usize) -> Result<Vec<SemanticResult>> {
        let q = self.provider.embed_one(query)?;
        let mut scored: Vec<(usize, f64)> =
            self.embeddings.iter().enumerate().map(|(pos, v)| (pos, cosine_similarity(&q, v))).collect();
        sort_desc(&mut scored);
        Ok(scored
            .into_iter()
            .take(limit)
            .map(|(pos, score)| to_result(&self.documents[pos], score, self.snippet_len))
            .collect())
    }
}

/// Sentence-window embeddings, max-pooled per document at query time.
pub struct ChunkedSemanticIndex {
    provider: Arc<dyn EmbeddingProvider>,
    params: ChunkParams,
    snippet_len: usize,
    documents: Vec<Document>,
    embeddings: Vec<Vec<f32>>,
    chunks: Vec<ChunkMeta>,
}

impl ChunkedSemanticIndex {
    pub fn new(provider: Arc<dyn EmbeddingProvider>, params: ChunkParams) -> Self {
        Self {
            provider,
            params,
            snippet_len: DEFAULT_SNIPPET_LEN,
            documents: Vec::new(),
            embeddings: Vec::new(),
            chunks: Vec::new(),
        }
    }

    pub fn with_snippet_len(mut self, snippet_len: usize) -> Self {
        self.snippet_len = snippet_len;
        self
    }

    pub fn chunks(&self) -> &[ChunkMeta] { &self.chunks }

    pub fn num_chunks(&self) -> usize { self.embeddings.len() }

    /// Chunk every non-blank description and embed all chunks in one batch.
    pub fn build(&mut self, documents: &[Document]) -> Result<()> {
        let mut texts: Vec<String> = Vec::new();
        let mut chunks: Vec<ChunkMeta> = Vec::new();
        for (i, doc) in documents.iter().enumerate() {
            if doc.description.trim().is_empty() {
                continue;
            }
            let pieces = chunk(&doc.description, self.params.max_chunk_size, self.params.overlap);
            let chunk_count = pieces.len();
            for (chunk_index, piece) in pieces.into_iter().enumerate() {
                chunks.push(ChunkMeta { document_position: i + 1, chunk_index, chunk_count });
                texts.push(piece);
            }
        }
        let refs: Vec<&str> = texts.iter().map(String::as_str).collect();
        self.embeddings = self.provider.embed(&refs)?;
        self.chunks = chunks;
        self.documents = documents.to_vec();
        tracing::info!(
            num_docs = documents.len(),
            num_chunks = self.chunks.len(),
            model = self.provider.model_name(),
            "built chunk embeddings"
        );
        Ok(())
    }

    pub fn save(&self, paths: &CachePaths) -> Result<()> {
        let meta = ChunkMetadata {
            version: FORMAT_VERSION,
            dimension: self.provider.dimension(),
            num_docs: self.documents.len(),
            total_chunks: self.chunks.len(),
            chunks: self.chunks.clone(),
        };
        save_chunk_store(paths, &self.embeddings, &meta)
    }

    /// Reuse the cache when `len(vectors) == total_chunks` and it was built for a
    /// collection of this size with this vector width; otherwise rebuild and save.
    pub fn load_or_build(&mut self, documents: &[Document], paths: &CachePaths) -> Result<()> {
        if paths.chunk_embeddings().exists() && paths.chunk_metadata().exists() {
            match load_chunk_store(paths) {
                Ok((vectors, meta))
                    if vectors.len() == meta.total_chunks
                        && meta.chunks.len() == meta.total_chunks
                        && meta.num_docs == documents.len()
                        && meta.dimension == self.provider.dimension()
                        && well_formed(&vectors, meta.dimension) =>
                {
                    self.embeddings = vectors;
                    self.chunks = meta.chunks;
                    self.documents = documents.to_vec();
                    tracing::info!(num_chunks = self.chunks.len(), "loaded chunk embeddings");
                    return Ok(());
                }
                Ok((vectors, meta)) => {
                    tracing::warn!(
                        cached = vectors.len(),
                        total_chunks = meta.total_chunks,
                        num_docs = meta.num_docs,
                        expected_docs = documents.len(),
                        "chunk embeddings stale, rebuilding"
                    );
                }
                Err(SearchError::SchemaMismatch { found, .. }) => {
                    tracing::warn!(found, "chunk embeddings use an old format, rebuilding");
                }
                Err(e) => return Err(e),
            }
        }
        self.build(documents)?;
        self.save(paths)
    }

    pub fn search(&self, query: &str, limit: usize) -> Result<Vec<SemanticResult>> {
        let q = self.provider.embed_one(query)?;

        // max-pool by document, keeping first-seen order for ties
        let mut pooled: Vec<(usize, f64)> = Vec::new();
        let mut slot: HashMap<usize, usize> = HashMap::new();
        for (vector, meta) in self.embeddings.iter().zip(&self.chunks) {
            let score = cosine_similarity(&q, vector);
            match slot.get(&meta.document_position) {
                Some(&i) => {
                    if score > pooled[i].1 {
                        pooled[i].1 = score;
                    }
                }
                None => {
                    slot.insert(meta.document_position, pooled.len());
                    pooled.push((meta.document_position, score));
                }
            }
        }
        sort_desc(&mut pooled);
        tracing::debug!(candidates = pooled.len(), "chunk search pooled");

        Ok(pooled
            .into_iter()
            .filter_map(|(position, score)| {
                position
                    .checked_sub(1)
                    .and_then(|i| self.documents.get(i))
                    .map(|doc| to_result(doc, score, self.snippet_len))
            })
            .take(limit)
            .collect())
    }
}

fn positions_in_range(chunks: &[ChunkMeta], num_docs: usize) -> bool {
    chunks.iter().all(|c| (1..=num_docs).contains(&c.document_position))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::embedding::HashingEmbedder;
    use tempfile::tempdir;

    fn provider() -> Arc<dyn EmbeddingProvider> { Arc::new(HashingEmbedder::new(128)) }

    fn corpus() -> Vec<Document> {
        vec![
            Document::new(10, "Toy Story", "A cowboy doll is a boy's toy. The toys come alive at night."),
            Document::new(20, "Shrek", "An ogre lives in a swamp. A donkey follows him. They rescue a princess."),
            Document::new(30, "Blank", "   "),
        ]
    }

    #[test]
    fn cosine_edge_cases() {
        assert_eq!(cosine_similarity(&[0.0, 0.0], &[1.0, 2.0]), 0.0);
        assert!((cosine_similarity(&[1.0, 0.0], &[2.0, 0.0]) - 1.0).abs() < 1e-12);
        assert!(cosine_similarity(&[1.0, 0.0], &[-1.0, 0.0]) < -0.999);
        assert!(cosine_similarity(&[1.0, 0.0], &[0.0, 1.0]).abs() < 1e-12);
    }

    #[test]
    fn chunked_build_skips_blank_and_tags_positions() {
        let mut idx = ChunkedSemanticIndex::new(provider(), ChunkParams::default());
        idx.build(&corpus()).unwrap();
        assert_eq!(idx.num_chunks(), 2);
        assert_eq!(idx.chunks()[0], ChunkMeta { document_position: 1, chunk_index: 0, chunk_count: 1 });
        assert_eq!(idx.chunks()[1].document_position, 2);
    }

    #[test]
    fn chunked_search_resolves_positions_to_ids() {
        let mut idx = ChunkedSemanticIndex::new(provider(), ChunkParams::default()).with_snippet_len(12);
        idx.build(&corpus()).unwrap();
        let results = idx.search("ogre swamp donkey", 5).unwrap();
        assert_eq!(results.len(), 2);
        assert_eq!(results[0].doc_id, 20);
        assert_eq!(results[0].title, "Shrek");
        assert_eq!(results[0].snippet, "An ogre live");
        assert!(results[0].score > results[1].score);
    }

    #[test]
    fn chunked_max_pools_per_document() {
        let long = "Pirates sail the sea. Pirates find gold. Pirates bury it. A storm hits. Everyone sleeps. The end comes.";
        let docs = vec![Document::new(1, "Long", long)];
        let mut idx = ChunkedSemanticIndex::new(provider(), ChunkParams { max_chunk_size: 2, overlap: 0 });
        idx.build(&docs).unwrap();
        assert_eq!(idx.num_chunks(), 3);
        let results = idx.search("pirates gold", 10).unwrap();
        assert_eq!(results.len(), 1);
        let best_chunk = cosine_similarity(
            &HashingEmbedder::new(128).embed_one("pirates gold").unwrap(),
            &HashingEmbedder::new(128).embed_one("Pirates sail the sea. Pirates find gold.").unwrap(),
        );
        assert!((results[0].score - best_chunk).abs() < 1e-9);
    }

    #[test]
    fn chunked_cache_reused_then_rebuilt_when_stale() {
        let dir = tempdir().unwrap();
        let paths = CachePaths::new(dir.path());
        let docs = corpus();

        let mut idx = ChunkedSemanticIndex::new(provider(), ChunkParams::default());
        idx.load_or_build(&docs, &paths).unwrap();
        assert!(paths.chunk_metadata().exists());

        let mut reloaded = ChunkedSemanticIndex::new(provider(), ChunkParams::default());
        reloaded.load_or_build(&docs, &paths).unwrap();
        assert_eq!(reloaded.num_chunks(), 2);

        let mut grown = docs.clone();
        grown.push(Document::new(40, "Cars", "A race car learns humility."));
        let mut rebuilt = ChunkedSemanticIndex::new(provider(), ChunkParams::default());
        rebuilt.load_or_build(&grown, &paths).unwrap();
        assert_eq!(rebuilt.num_chunks(), 3);
        let (vectors, meta) = load_chunk_store(&paths).unwrap();
        assert_eq!(vectors.len(), 3);
        assert_eq!(meta.total_chunks, 3);
    }

    #[test]
    fn mismatched_vector_count_triggers_rebuild() {
        let dir = tempdir().unwrap();
        let paths = CachePaths::new(dir.path());
        let docs = corpus();
        let mut idx = ChunkedSemanticIndex::new(provider(), ChunkParams::default());
        idx.load_or_build(&docs, &paths).unwrap();

        let (mut vectors, meta) = load_chunk_store(&paths).unwrap();
        vectors.pop();
        save_chunk_store(&paths, &vectors, &meta).unwrap();

        let mut healed = ChunkedSemanticIndex::new(provider(), ChunkParams::default());
        healed.load_or_build(&docs, &paths).unwrap();
        assert_eq!(healed.num_chunks(), 2);
        assert_eq!(load_chunk_store(&paths).unwrap().0.len(), 2);
    }

    #[test]
    fn flat_index_search_and_cache() {
        let dir = tempdir().unwrap();
        let paths = CachePaths::new(dir.path());
        let docs = corpus();
        let mut idx = SemanticIndex::new(provider());
        idx.load_or_build(&docs, &paths).unwrap();
        assert_eq!(idx.len(), 3);
        let results = idx.search("cowboy doll toys", 1).unwrap();
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].doc_id, 10);

        let mut reloaded = SemanticIndex::new(provider());
        reloaded.load_or_build(&docs, &paths).unwrap();
        assert_eq!(reloaded.len(), 3);
    }

    #[test]
    fn blank_query_propagates_empty_input() {
        let mut idx = ChunkedSemanticIndex::new(provider(), ChunkParams::default());
        idx.build(&corpus()).unwrap();
        assert!(matches!(idx.search("  ", 3), Err(SearchError::EmptyInput)));
    }

    #[test]
    fn out_of_range_positions_trigger_rebuild() {
        let dir = tempdir().unwrap();
        let paths = CachePaths::new(dir.path());
        let docs = corpus();
        let mut idx = ChunkedSemanticIndex::new(provider(), ChunkParams::default());
        idx.load_or_build(&docs, &paths).unwrap();

        let (vectors, mut meta) = load_chunk_store(&paths).unwrap();
        meta.chunks[0].document_position = 0;
        meta.chunks[1].document_position = docs.len() + 1;
        save_chunk_store(&paths, &vectors, &meta).unwrap();

        let mut healed = ChunkedSemanticIndex::new(provider(), ChunkParams::default());
        healed.load_or_build(&docs, &paths).unwrap();
        assert_eq!(healed.chunks()[0].document_position, 1);
        let results = healed.search("ogre swamp donkey", 5).unwrap();
        assert_eq!(results[0].doc_id, 20);
        assert_eq!(load_chunk_store(&paths).unwrap().1.chunks[0].document_position, 1);
    }

    #[test]
    fn search_skips_position_zero() {
        let mut idx = ChunkedSemanticIndex::new(provider(), ChunkParams::default());
        idx.build(&corpus()).unwrap();
        idx.chunks[0].document_position = 0;
        let results = idx.search("cowboy doll", 5).unwrap();
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].doc_id, 20);
    }
}
