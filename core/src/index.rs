//! BM25 inverted index over `title + description`.

use crate::persist::{
    load_doc_lengths, load_docs, load_index_meta, load_postings, load_term_frequencies, save_doc_lengths,
    save_docs, save_index_meta, save_postings, save_term_frequencies, CachePaths, DocLengths, IndexMeta,
    Postings, TermFrequencies,
};
use crate::{DocId, Document, Result, SearchError, Tokenizer};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

pub const BM25_K1: f64 = 1.5;
pub const BM25_B: f64 = 0.75;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Bm25Result {
    pub doc_id: DocId,
    pub title: String,
    pub description: String,
    pub score: f64,
}

#[derive(Debug, Clone, Default)]
pub struct InvertedIndex {
    tokenizer: Tokenizer,
    pub postings: Postings,
    /// Document map in collection order; search ties resolve in this order.
    pub docs: Vec<Document>,
    pub term_frequencies: TermFrequencies,
    pub doc_lengths: DocLengths,
    positions: HashMap<DocId, usize>,
    avg_doc_len: f64,
}

impl InvertedIndex {
    pub fn new(tokenizer: Tokenizer) -> Self {
        Self { tokenizer, ..Self::default() }
    }

    pub fn tokenizer(&self) -> &Tokenizer { &self.tokenizer }

    pub fn num_docs(&self) -> usize { self.docs.len() }

    pub fn build(&mut self, documents: &[Document]) {
        self.postings.clear();
        self.term_frequencies.clear();
        self.doc_lengths.clear();
        self.docs = documents.to_vec();

        for doc in documents {
            let tokens = self.tokenizer.tokenize(&format!("{} {}", doc.title, doc.description));
            let counts = self.term_frequencies.entry(doc.id).or_default();
            for token in &tokens {
                *counts.entry(token.clone()).or_insert(0) += 1;
            }
            for term in counts.keys() {
                self.postings.entry(term.clone()).or_default().insert(doc.id);
            }
            self.doc_lengths.insert(doc.id, tokens.len() as u32);
        }
        self.refresh_derived();
        tracing::info!(num_docs = self.docs.len(), num_terms = self.postings.len(), "built bm25 index");
    }

    /// Persist all four structures plus the format header.
    pub fn save(&self, paths: &CachePaths) -> Result<()> {
        save_postings(paths, &self.postings)?;
        save_docs(paths, &self.docs)?;
        save_term_frequencies(paths, &self.term_frequencies)?;
        save_doc_lengths(paths, &self.doc_lengths)?;
        save_index_meta(paths, &IndexMeta::new(self.docs.len())?)?;
        tracing::info!(root = %paths.root.display(), "saved bm25 index");
        Ok(())
    }

    /// Load a saved index. Does not compare the cache against any collection.
    pub fn load(paths: &CachePaths, tokenizer: Tokenizer) -> Result<Self> {
        let meta = load_index_meta(paths)?;
        let mut index = Self {
            tokenizer,
            postings: load_postings(paths)?,
            docs: load_docs(paths)?,
            term_frequencies: load_term_frequencies(paths)?,
            doc_lengths: load_doc_lengths(paths)?,
            positions: HashMap::new(),
            avg_doc_len: 0.0,
        };
        index.refresh_derived();
        tracing::info!(num_docs = meta.num_docs, created_at = %meta.created_at, "loaded bm25 index");
        Ok(index)
    }

    pub fn document(&self, doc_id: DocId) -> Option<&Document> {
        self.positions.get(&doc_id).map(|&pos| &self.docs[pos])
    }

    /// Sorted ids of documents containing the single token in `term`.
    pub fn get_documents(&self, term: &str) -> Result<Vec<DocId>> {
        let token = self.single_token(term)?;
        Ok(self.postings.get(&token).map(|ids| ids.iter().copied().collect()).unwrap_or_default())
    }

    pub fn term_frequency(&self, doc_id: DocId, term: &str) -> Result<u32> {
        let token = self.single_token(term)?;
        Ok(self.raw_tf(doc_id, &token))
    }

    /// Classic IDF: `ln((N + 1) / (df + 1))`.
    pub fn idf(&self, term: &str) -> Result<f64> {
        let token = self.single_token(term)?;
        let n = self.docs.len() as f64;
        let df = self.df(&token) as f64;
        Ok(((n + 1.0) / (df + 1.0)).ln())
    }

    /// Okapi IDF. Non-positive for terms present in a majority of documents.
    pub fn bm25_idf(&self, term: &str) -> Result<f64> {
        let token = self.single_token(term)?;
        Ok(self.token_bm25_idf(&token))
    }

    pub fn bm25_term_frequency(&self, doc_id: DocId, term: &str, k1: f64, b: f64) -> Result<f64> {
        let token = self.single_token(term)?;
        Ok(self.token_bm25_tf(doc_id, &token, k1, b))
    }

    pub fn bm25_score(&self, doc_id: DocId, term: &str, k1: f64, b: f64) -> Result<f64> {
        let token = self.single_token(term)?;
        Ok(self.token_bm25_tf(doc_id, &token, k1, b) * self.token_bm25_idf(&token))
    }

    /// Scores every document in the corpus, including ones sharing no query term.
    pub fn search(&self, query: &str, limit: usize, k1: f64, b: f64) -> Vec<Bm25Result> {
        let tokens = self.tokenizer.tokenize(query);
        let idfs: Vec<f64> = tokens.iter().map(|t| self.token_bm25_idf(t)).collect();

        let mut scored: Vec<(usize, f64)> = self
            .docs
            .iter()
            .enumerate()
            .map(|(pos, doc)| {
                let score = tokens
                    .iter()
                    .zip(&idfs)
                    .map(|(token, idf)| self.token_bm25_tf(doc.id, token, k1, b) * idf)
                    .sum();
                (pos, score)
            })
            .collect();
        // stable: equal scores keep collection order
        scored.sort_by(|a, b| b.1.total_cmp(&a.1));

        scored
            .into_iter()
            .take(limit)
            .map(|(pos, score)| {
                let doc = &self.docs[pos];
                Bm25Result { doc_id: doc.id, title: doc.title.clone(), description: doc.description.clone(), score }
            })
            .collect()
    }

    fn single_token(&self, term: &str) -> Result<String> {
        let mut tokens = self.tokenizer.tokenize(term);
        if tokens.len() != 1 {
            return Err(SearchError::InvalidInput { term: term.to_string(), count: tokens.len() });
        }
        Ok(tokens.remove(0))
    }

    fn df(&self, token: &str) -> usize { self.postings.get(token).map_or(0, |ids| ids.len()) }

    fn raw_tf(&self, doc_id: DocId, token: &str) -> u32 {
        self.term_frequencies.get(&doc_id).and_then(|tf| tf.get(token)).copied().unwrap_or(0)
    }

    fn token_bm25_idf(&self, token: &str) -> f64 {
        let n = self.docs.len() as f64;
        let df = self.df(token) as f64;
        ((n - df + 0.5) / (df + 0.5) + 1.0).ln()
    }

    fn token_bm25_tf(&self, doc_id: DocId, token: &str, k1: f64, b: f64) -> f64 {
        let tf = self.raw_tf(doc_id, token) as f64;
        let doc_len = self.doc_lengths.get(&doc_id).copied().unwrap_or(0) as f64;
        bm25_saturation(tf, doc_len, self.avg_doc_len, k1, b)
    }

    fn refresh_derived(&mut self) {
        self.positions = self.docs.iter().enumerate().map(|(pos, d)| (d.id, pos)).collect();
        let total: u64 = self.doc_lengths.values().map(|&l| l as u64).sum();
        self.avg_doc_len = if self.doc_lengths.is_empty() { 0.0 } else { total as f64 / self.doc_lengths.len() as f64 };
    }
}

/// `(tf * (k1 + 1)) / (tf + k1 * (1 - b + b * len / avg_len))`
pub fn bm25_saturation(tf: f64, doc_len: f64, avg_doc_len: f64, k1: f64, b: f64) -> f64 {
    if tf == 0.0 {
        return 0.0;
    }
    let ratio = if avg_doc_len > 0.0 { doc_len / avg_doc_len } else { 0.0 };
    (tf * (k1 + 1.0)) / (tf + k1 * (1.0 - b + b * ratio))
}
