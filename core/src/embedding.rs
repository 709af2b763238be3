//! Embedding providers.
//!
//! Both semantic index variants take an `Arc<dyn EmbeddingProvider>` so the
//! model can be swapped (or faked in tests) without touching index code.

use crate::{Result, SearchError};
use serde::{Deserialize, Serialize};

/// Turns text into fixed-width vectors.
pub trait EmbeddingProvider: Send + Sync {
    /// Width of every vector this provider returns.
    fn dimension(&self) -> usize;

    /// Model identifier, recorded for diagnostics.
    fn model_name(&self) -> &str;

    /// Embed a batch. Fails with [`SearchError::EmptyInput`] if any text is blank.
    fn embed(&self, texts: &[&str]) -> Result<Vec<Vec<f32>>>;

    fn embed_one(&self, text: &str) -> Result<Vec<f32>> {
        self.embed(&[text])?.pop().ok_or_else(|| SearchError::Provider("provider returned no vectors".into()))
    }
}

fn reject_blank(texts: &[&str]) -> Result<()> {
    if texts.iter().any(|t| t.trim().is_empty()) {
        return Err(SearchError::EmptyInput);
    }
    Ok(())
}

/// Offline, deterministic bag-of-words embedder.
///
/// Each lowercased alphanumeric word is hashed with CRC32 into one of `dimension`
/// buckets with a hash-derived sign; the result is L2 normalized. Texts sharing words
/// land close together, which is enough for local runs and tests.
#[derive(Debug, Clone)]
pub struct HashingEmbedder {
    dimension: usize,
}

impl HashingEmbedder {
    pub const DEFAULT_DIMENSION: usize = 384;

    pub fn new(dimension: usize) -> Self { Self { dimension: dimension.max(1) } }
}

impl Default for HashingEmbedder {
    fn default() -> Self { Self::new(Self::DEFAULT_DIMENSION) }
}

impl EmbeddingProvider for HashingEmbedder {
    fn dimension(&self) -> usize { self.dimension }

    fn model_name(&self) -> &str { "hashing" }

    fn embed(&self, texts: &[&str]) -> Result<Vec<Vec<f32>>> {
        reject_blank(texts)?;
        Ok(texts.iter().map(|t| self.embed_text(t)).collect())
    }
}

impl HashingEmbedder {
    fn embed_text(&self, text: &str) -> Vec<f32> {
        let mut v = vec![0.0f32; self.dimension];
        let lowered = text.to_lowercase();
        for word in lowered.split(|c: char| !c.is_alphanumeric()).filter(|w| !w.is_empty()) {
            let h = crc32fast::hash(word.as_bytes());
            let bucket = (h as usize) % self.dimension;
            let sign = if h & 0x8000_0000 == 0 { 1.0 } else { -1.0 };
            v[bucket] += sign;
        }
        let norm = v.iter().map(|x| x * x).sum::<f32>().sqrt();
        if norm > 0.0 {
            v.iter_mut().for_each(|x| *x /= norm);
        }
        v
    }
}

#[derive(Serialize)]
struct EmbeddingRequest<'a> {
    model: &'a str,
    input: &'a [&'a str],
}

#[derive(Deserialize)]
struct EmbeddingResponse {
    data: Vec<EmbeddingData>,
}

#[derive(Deserialize)]
struct EmbeddingData {
    index: Option<usize>,
    embedding: Vec<f32>,
}

/// Provider calls block until the server answers; no request timeout.
pub(crate) fn blocking_client() -> Result<reqwest::blocking::Client> {
    Ok(reqwest::blocking::Client::builder().timeout(None).build()?)
}

/// Client for an OpenAI-compatible `/v1/embeddings` endpoint, e.g. a local
/// text-embeddings server hosting `all-MiniLM-L6-v2`.
pub struct HttpEmbedder {
    client: reqwest::blocking::Client,
    endpoint: String,
    model: String,
    api_key: Option<String>,
    dimension: usize,
}

impl HttpEmbedder {
    pub fn new(base_url: &str, model: impl Into<String>, dimension: usize, api_key: Option<String>) -> Result<Self> {
        let client = blocking_client()?;
        let endpoint = format!("{}/v1/embeddings", base_url.trim_end_matches('/'));
        Ok(Self { client, endpoint, model: model.into(), api_key, dimension })
    }
}

impl EmbeddingProvider for HttpEmbedder {
    fn dimension(&self) -> usize { self.dimension }

    fn model_name(&self) -> &str { &self.model }

    fn embed(&self, texts: &[&str]) -> Result<Vec<Vec<f32>>> {
        reject_blank(texts)?;
        if texts.is_empty() {
            return Ok(Vec::new());
        }
        let mut req = self.client.post(&self.endpoint).json(&EmbeddingRequest { model: &self.model, input: texts });
        if let Some(key) = &self.api_key {
            req = req.bearer_auth(key);
        }
        let resp = req.send()?.error_for_status()?;
        let mut body: EmbeddingResponse = resp.json()?;
        body.data.sort_by_key(|d| d.index.unwrap_or(0));
        if body.data.len() != texts.len() {
            return Err(SearchError::Provider(format!(
                "requested {} embeddings, received {}",
                texts.len(),
                body.data.len()
            )));
        }
        let vectors: Vec<Vec<f32>> = body.data.into_iter().map(|d| d.embedding).collect();
        if let Some(bad) = vectors.iter().find(|v| v.len() != self.dimension) {
            return Err(SearchError::DimensionMismatch { expected: self.dimension, found: bad.len() });
        }
        tracing::debug!(count = vectors.len(), model = %self.model, "embedded batch");
        Ok(vectors)
    }
}
