use anyhow::Result;
use axum::{extract::{Path, Query, State}, http::StatusCode, routing::get, Json, Router};
use marquee_core::data::{load_documents, load_stopwords};
use marquee_core::embedding::{EmbeddingProvider, HashingEmbedder, HttpEmbedder};
use marquee_core::{Document, HybridSearch, SearchConfig, SearchError, Tokenizer};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::Arc;
use tower_http::cors::{AllowOrigin, Any, CorsLayer};
use tower_http::trace::TraceLayer;

const MAX_LIMIT: usize = 100;

#[derive(Deserialize)]
pub struct SearchParams {
    pub q: String,
    #[serde(default = "default_limit")]
    pub limit: usize,
}

#[derive(Deserialize)]
pub struct WeightedParams {
    pub q: String,
    pub alpha: Option<f64>,
    #[serde(default = "default_limit")]
    pub limit: usize,
}

#[derive(Deserialize)]
pub struct RrfParams {
    pub q: String,
    pub k: Option<f64>,
    #[serde(default = "default_limit")]
    pub limit: usize,
}

fn default_limit() -> usize { 5 }

#[derive(Serialize)]
pub struct SearchResponse<T> {
    pub query: String,
    pub took_s: f64,
    pub total_hits: usize,
    pub results: Vec<T>,
}

/// Where the engine's inputs come from.
#[derive(Debug, Clone)]
pub struct EngineOptions {
    pub documents: PathBuf,
    pub stopwords: Option<PathBuf>,
    pub config: SearchConfig,
    /// OpenAI-compatible embeddings server; the offline hashing embedder is used when unset.
    pub embedding_url: Option<String>,
    pub embedding_model: String,
    pub dimension: usize,
}

#[derive(Clone)]
pub struct AppState {
    pub engine: Arc<HybridSearch>,
}

type ApiError = (StatusCode, String);

/// Loads the collection and builds or reloads both indices. Blocking; call it off the async runtime.
pub fn build_engine(opts: &EngineOptions) -> Result<HybridSearch> {
    let docs = load_documents(&opts.documents)?;
    let tokenizer = match &opts.stopwords {
        Some(path) => Tokenizer::new(load_stopwords(path)?),
        None => Tokenizer::default(),
    };
    let provider: Arc<dyn EmbeddingProvider> = match &opts.embedding_url {
        Some(url) => Arc::new(HttpEmbedder::new(url, opts.embedding_model.clone(), opts.dimension, None)?),
        None => Arc::new(HashingEmbedder::new(opts.dimension)),
    };
    Ok(HybridSearch::new(docs, tokenizer, provider, opts.config.clone())?)
}

pub fn build_app(engine: Arc<HybridSearch>) -> Router {
    // CORS: read CORS_ALLOW_ORIGIN (comma-separated) or allow Any by default
    let cors = match std::env::var("CORS_ALLOW_ORIGIN") {
        Ok(val) => {
            let origins: Vec<_> = val
                .split(',')
                .filter_map(|s| s.trim().parse().ok())
                .collect();
            if origins.is_empty() {
                CorsLayer::new().allow_origin(Any).allow_methods(Any).allow_headers(Any)
            } else {
                CorsLayer::new().allow_origin(AllowOrigin::list(origins)).allow_methods(Any).allow_headers(Any)
            }
        }
        Err(_) => CorsLayer::new().allow_origin(Any).allow_methods(Any).allow_headers(Any),
    };

    Router::new()
        .route("/health", get(|| async { "ok" }))
        .route("/search", get(search_handler))
        .route("/search/semantic", get(semantic_handler))
        .route("/search/weighted", get(weighted_handler))
        .route("/search/rrf", get(rrf_handler))
        .route("/doc/:doc_id", get(doc_handler))
        .with_state(AppState { engine })
        .layer(cors)
        .layer(TraceLayer::new_for_http())
}

fn clamp(limit: usize) -> usize { limit.clamp(1, MAX_LIMIT) }

fn api_error(err: SearchError) -> ApiError {
    match err {
        SearchError::EmptyInput | SearchError::InvalidInput { .. } => (StatusCode::BAD_REQUEST, err.to_string()),
        other => {
            tracing::error!(error = %other, "search failed");
            (StatusCode::INTERNAL_SERVER_ERROR, other.to_string())
        }
    }
}

/// The core is synchronous and may block on the embedding provider.
async fn run_blocking<T, F>(state: AppState, query: String, f: F) -> Result<Json<SearchResponse<T>>, ApiError>
where
    T: Send + 'static,
    F: FnOnce(&HybridSearch, &str) -> Result<Vec<T>, SearchError> + Send + 'static,
{
    let start = std::time::Instant::now();
    let engine = state.engine.clone();
    let q = query.clone();
    let results = tokio::task::spawn_blocking(move || f(&engine, &q))
        .await
        .map_err(|e| (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()))?
        .map_err(api_error)?;
    let elapsed = start.elapsed();
    tracing::debug!(query = %query, hits = results.len(), took_s = elapsed.as_secs_f64(), "search served");
    Ok(Json(SearchResponse { query, took_s: elapsed.as_secs_f64(), total_hits: results.len(), results }))
}

pub async fn search_handler(
    State(state): State<AppState>,
    Query(params): Query<SearchParams>,
) -> Result<Json<SearchResponse<marquee_core::index::Bm25Result>>, ApiError> {
    let limit = clamp(params.limit);
    run_blocking(state, params.q, move |hs, q| Ok(hs.bm25_search(q, limit))).await
}

pub async fn semantic_handler(
    State(state): State<AppState>,
    Query(params): Query<SearchParams>,
) -> Result<Json<SearchResponse<marquee_core::semantic::SemanticResult>>, ApiError> {
    let limit = clamp(params.limit);
    run_blocking(state, params.q, move |hs, q| hs.semantic_search(q, limit)).await
}

pub async fn weighted_handler(
    State(state): State<AppState>,
    Query(params): Query<WeightedParams>,
) -> Result<Json<SearchResponse<marquee_core::hybrid::WeightedResult>>, ApiError> {
    let limit = clamp(params.limit);
    let alpha = params.alpha.unwrap_or(state.engine.config().alpha);
    if !(0.0..=1.0).contains(&alpha) {
        return Err((StatusCode::BAD_REQUEST, format!("alpha must be within [0, 1], got {alpha}")));
    }
    run_blocking(state, params.q, move |hs, q| hs.weighted_search(q, alpha, limit)).await
}

pub async fn rrf_handler(
    State(state): State<AppState>,
    Query(params): Query<RrfParams>,
) -> Result<Json<SearchResponse<marquee_core::hybrid::RrfResult>>, ApiError> {
    let limit = clamp(params.limit);
    let k = params.k.unwrap_or(state.engine.config().rrf_k);
    run_blocking(state, params.q, move |hs, q| hs.rrf_search(q, k, limit)).await
}

pub async fn doc_handler(State(state): State<AppState>, Path(doc_id): Path<u32>) -> Result<Json<Document>, ApiError> {
    state
        .engine
        .document(doc_id)
        .cloned()
        .map(Json)
        .ok_or((StatusCode::NOT_FOUND, format!("document {doc_id} not found")))
}
