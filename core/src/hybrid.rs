//! Fusion of the lexical and semantic rankings.
//!
//! Two strategies: min-max normalized weighted blending, and reciprocal rank fusion.
//! Both over-fetch each side so the id sets overlap before truncation.

use crate::embedding::EmbeddingProvider;
use crate::index::Bm25Result;
use crate::persist::CachePaths;
use crate::semantic::SemanticResult;
use crate::{ChunkedSemanticIndex, DocId, Document, InvertedIndex, Result, SearchConfig, SearchError, Tokenizer};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WeightedResult {
    pub doc_id: DocId,
    pub title: String,
    pub description: String,
    /// Normalized lexical score, 0 when absent from the lexical ranking.
    pub bm25_score: f64,
    /// Normalized semantic score, 0 when absent from the semantic ranking.
    pub sem_score: f64,
    pub hybrid_score: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RrfResult {
    pub doc_id: DocId,
    pub title: String,
    pub description: String,
    pub bm25_rank: Option<usize>,
    pub sem_rank: Option<usize>,
    /// Raw BM25 score from the lexical ranking.
    pub bm25_score: Option<f64>,
    /// Raw cosine similarity from the semantic ranking.
    pub sem_score: Option<f64>,
    pub rrf_score: f64,
}

/// Min-max rescale into `[0, 1]`. All-equal input maps to all `1.0`.
pub fn normalize_scores(scores: &[f64]) -> Vec<f64> {
    let Some(min) = scores.iter().copied().reduce(f64::min) else {
        return Vec::new();
    };
    let max = scores.iter().copied().fold(f64::NEG_INFINITY, f64::max);
    if min == max {
        return vec![1.0; scores.len()];
    }
    let range = max - min;
    scores.iter().map(|s| (s - min) / range).collect()
}

pub fn hybrid_score(bm25: f64, sem: f64, alpha: f64) -> f64 { alpha * bm25 + (1.0 - alpha) * sem }

/// `1 / (k + rank)` with `rank` one-based.
pub fn rrf_score(rank: usize, k: f64) -> f64 { 1.0 / (k + rank as f64) }

fn sort_desc_by<T>(items: &mut [T], key: impl Fn(&T) -> f64) {
    items.sort_by(|a, b| key(b).total_cmp(&key(a)));
}

pub fn weighted_fusion(bm25: &[Bm25Result], sem: &[SemanticResult], alpha: f64) -> Vec<WeightedResult> {
    let bm25_norm = normalize_scores(&bm25.iter().map(|r| r.score).collect::<Vec<_>>());
    let sem_norm = normalize_scores(&sem.iter().map(|r| r.score).collect::<Vec<_>>());

    let mut merged: Vec<WeightedResult> = Vec::with_capacity(bm25.len() + sem.len());
    let mut slot: HashMap<DocId, usize> = HashMap::new();
    for (r, norm) in bm25.iter().zip(bm25_norm) {
        slot.insert(r.doc_id, merged.len());
        merged.push(WeightedResult {
            doc_id: r.doc_id,
            title: r.title.clone(),
            description: r.description.clone(),
            bm25_score: norm,
            sem_score: 0.0,
            hybrid_score: 0.0,
        });
    }
    for (r, norm) in sem.iter().zip(sem_norm) {
        match slot.get(&r.doc_id) {
            Some(&i) => merged[i].sem_score = norm,
            None => {
                slot.insert(r.doc_id, merged.len());
                merged.push(WeightedResult {
                    doc_id: r.doc_id,
                    title: r.title.clone(),
                    description: r.snippet.clone(),
                    bm25_score: 0.0,
                    sem_score: norm,
                    hybrid_score: 0.0,
                });
            }
        }
    }
    for m in merged.iter_mut() {
        m.hybrid_score = hybrid_score(m.bm25_score, m.sem_score, alpha);
    }
    sort_desc_by(&mut merged, |m| m.hybrid_score);
    merged
}

pub fn rrf_fusion(bm25: &[Bm25Result], sem: &[SemanticResult], k: f64) -> Vec<RrfResult> {
    let mut merged: Vec<RrfResult> = Vec::with_capacity(bm25.len() + sem.len());
    let mut slot: HashMap<DocId, usize> = HashMap::new();
    for (rank, r) in (1..).zip(bm25) {
        slot.insert(r.doc_id, merged.len());
        merged.push(RrfResult {
            doc_id: r.doc_id,
            title: r.title.clone(),
            description: r.description.clone(),
            bm25_rank: Some(rank),
            sem_rank: None,
            bm25_score: Some(r.score),
            sem_score: None,
            rrf_score: 0.0,
        });
    }
    for (rank, r) in (1..).zip(sem) {
        let i = match slot.get(&r.doc_id) {
            Some(&i) => i,
            None => {
                slot.insert(r.doc_id, merged.len());
                merged.push(RrfResult {
                    doc_id: r.doc_id,
                    title: r.title.clone(),
                    description: r.snippet.clone(),
                    bm25_rank: None,
                    sem_rank: None,
                    bm25_score: None,
                    sem_score: None,
                    rrf_score: 0.0,
                });
                merged.len() - 1
            }
        };
        merged[i].sem_rank = Some(rank);
        merged[i].sem_score = Some(r.score);
    }
    for m in merged.iter_mut() {
        m.rrf_score = m.bm25_rank.map_or(0.0, |r| rrf_score(r, k)) + m.sem_rank.map_or(0.0, |r| rrf_score(r, k));
    }
    sort_desc_by(&mut merged, |m| m.rrf_score);
    merged
}

/// Both indices built (or reloaded) once and queried read-only afterwards.
pub struct HybridSearch {
    config: SearchConfig,
    documents: Vec<Document>,
    index: InvertedIndex,
    semantic: ChunkedSemanticIndex,
}

impl HybridSearch {
    /// Reuses caches under `config.cache_dir` when they match `documents`; rebuilds and
    /// re-saves them otherwise.
    pub fn new(
        documents: Vec<Document>,
        tokenizer: Tokenizer,
        provider: Arc<dyn EmbeddingProvider>,
        config: SearchConfig,
    ) -> Result<Self> {
        let paths = CachePaths::new(&config.cache_dir);
        let index = load_or_build_index(&documents, tokenizer, &paths)?;
        let mut semantic = ChunkedSemanticIndex::new(provider, config.chunking).with_snippet_len(config.snippet_len);
        semantic.load_or_build(&documents, &paths)?;
        Ok(Self { config, documents, index, semantic })
    }

    pub fn config(&self) -> &SearchConfig { &self.config }

    pub fn documents(&self) -> &[Document] { &self.documents }

    pub fn document(&self, doc_id: DocId) -> Option<&Document> { self.index.document(doc_id) }

    pub fn index(&self) -> &InvertedIndex { &self.index }

    pub fn semantic(&self) -> &ChunkedSemanticIndex { &self.semantic }

    pub fn bm25_search(&self, query: &str, limit: usize) -> Vec<Bm25Result> {
        self.index.search(query, limit, self.config.bm25.k1, self.config.bm25.b)
    }

    pub fn semantic_search(&self, query: &str, limit: usize) -> Result<Vec<SemanticResult>> {
        self.semantic.search(query, limit)
    }

    pub fn weighted_search(&self, query: &str, alpha: f64, limit: usize) -> Result<Vec<WeightedResult>> {
        let (bm25, sem) = self.candidates(query, limit)?;
        let mut fused = weighted_fusion(&bm25, &sem, alpha);
        fused.truncate(limit);
        for r in fused.iter_mut().filter(|r| r.bm25_score == 0.0) {
            self.fill_description(r.doc_id, &mut r.description);
        }
        Ok(fused)
    }

    pub fn rrf_search(&self, query: &str, k: f64, limit: usize) -> Result<Vec<RrfResult>> {
        let (bm25, sem) = self.candidates(query, limit)?;
        let mut fused = rrf_fusion(&bm25, &sem, k);
        fused.truncate(limit);
        for r in fused.iter_mut().filter(|r| r.bm25_rank.is_none()) {
            self.fill_description(r.doc_id, &mut r.description);
        }
        Ok(fused)
    }

    /// Semantic-only hits carry a snippet out of fusion; swap in the full text.
    fn fill_description(&self, doc_id: DocId, description: &mut String) {
        if let Some(doc) = self.document(doc_id) {
            description.clone_from(&doc.description);
        }
    }

    fn candidates(&self, query: &str, limit: usize) -> Result<(Vec<Bm25Result>, Vec<SemanticResult>)> {
        let fetch = limit.saturating_mul(self.config.overfetch.max(1));
        let bm25 = self.bm25_search(query, fetch);
        let sem = self.semantic_search(query, fetch)?;
        tracing::debug!(fetch, bm25 = bm25.len(), semantic = sem.len(), "fusion candidates");
        Ok((bm25, sem))
    }
}

fn load_or_build_index(documents: &[Document], tokenizer: Tokenizer, paths: &CachePaths) -> Result<InvertedIndex> {
    if paths.has_index() {
        match InvertedIndex::load(paths, tokenizer.clone()) {
            Ok(index) if index.num_docs() == documents.len() => return Ok(index),
            Ok(index) => {
                tracing::warn!(cached = index.num_docs(), expected = documents.len(), "bm25 cache stale, rebuilding");
            }
            Err(SearchError::SchemaMismatch { found, .. }) => {
                tracing::warn!(found, "bm25 cache uses an old format, rebuilding");
            }
            Err(e) => return Err(e),
        }
    }
    let mut index = InvertedIndex::new(tokenizer);
    index.build(documents);
    index.save(paths)?;
    Ok(index)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn bm(doc_id: DocId, score: f64) -> Bm25Result {
        Bm25Result { doc_id, title: format!("t{doc_id}"), description: format!("d{doc_id}"), score }
    }

    fn sm(doc_id: DocId, score: f64) -> SemanticResult {
        SemanticResult { doc_id, title: format!("t{doc_id}"), snippet: format!("s{doc_id}"), score }
    }

    #[test]
    fn normalize_bounds() {
        assert!(normalize_scores(&[]).is_empty());
        assert_eq!(normalize_scores(&[3.0]), vec![1.0]);
        assert_eq!(normalize_scores(&[2.0, 2.0, 2.0]), vec![1.0, 1.0, 1.0]);
        let n = normalize_scores(&[5.0, 1.0, 3.0, -1.0]);
        assert_eq!(n[0], 1.0);
        assert_eq!(n[3], 0.0);
        assert!((n[1] - 2.0 / 6.0).abs() < 1e-12);
        assert!(n.iter().all(|x| (0.0..=1.0).contains(x)));
    }

    #[test]
    fn rrf_exact_values() {
        let fused = rrf_fusion(&[bm(1, 9.0), bm(2, 5.0), bm(3, 1.0)], &[sm(1, 0.9), sm(4, 0.5)], 60.0);
        let by_id: HashMap<DocId, &RrfResult> = fused.iter().map(|r| (r.doc_id, r)).collect();
        assert!((by_id[&1].rrf_score - 2.0 / 61.0).abs() < 1e-12);
        assert!((by_id[&3].rrf_score - 1.0 / 63.0).abs() < 1e-12);
        assert!((by_id[&1].rrf_score - 0.03279).abs() < 1e-5);
        assert!((by_id[&3].rrf_score - 0.01587).abs() < 1e-5);
        assert_eq!(by_id[&3].sem_rank, None);
        assert_eq!(by_id[&4].bm25_rank, None);
        assert_eq!(by_id[&4].sem_rank, Some(2));
        assert_eq!(by_id[&4].sem_score, Some(0.5));
        assert_eq!(fused[0].doc_id, 1);
        assert_eq!(fused.len(), 4);
    }

    #[test]
    fn rrf_tie_keeps_lexical_first() {
        let fused = rrf_fusion(&[bm(7, 1.0)], &[sm(8, 1.0)], 60.0);
        assert_eq!(fused.iter().map(|r| r.doc_id).collect::<Vec<_>>(), vec![7, 8]);
        assert_eq!(fused[1].description, "s8");
    }

    #[test]
    fn weighted_missing_side_is_zero() {
        let fused = weighted_fusion(&[bm(1, 10.0), bm(2, 0.0)], &[sm(3, 0.8), sm(1, 0.2)], 0.5);
        let by_id: HashMap<DocId, &WeightedResult> = fused.iter().map(|r| (r.doc_id, r)).collect();
        assert_eq!(by_id[&1].bm25_score, 1.0);
        assert_eq!(by_id[&1].sem_score, 0.0);
        assert_eq!(by_id[&2].sem_score, 0.0);
        assert_eq!(by_id[&3].bm25_score, 0.0);
        assert_eq!(by_id[&3].sem_score, 1.0);
        assert_eq!(by_id[&1].hybrid_score, 0.5);
    }

    #[test]
    fn alpha_extremes_recover_single_rankings() {
        let lexical = [bm(1, 9.0), bm(2, 7.0), bm(3, 4.0), bm(4, 1.0)];
        let semantic = [sm(4, 0.9), sm(3, 0.6), sm(2, 0.4), sm(1, 0.1)];
        let ids = |v: Vec<WeightedResult>| v.into_iter().map(|r| r.doc_id).collect::<Vec<_>>();
        assert_eq!(ids(weighted_fusion(&lexical, &semantic, 1.0)), vec![1, 2, 3, 4]);
        assert_eq!(ids(weighted_fusion(&lexical, &semantic, 0.0)), vec![4, 3, 2, 1]);
    }
}
