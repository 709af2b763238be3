use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use marquee_core::chunker::{chunk, chunk_words};
use marquee_core::data::{load_documents, load_stopwords};
use marquee_core::embedding::{EmbeddingProvider, HashingEmbedder, HttpEmbedder};
use marquee_core::hybrid::normalize_scores;
use marquee_core::llm::{enhance_query, GeminiClient, LanguageModel, QueryEnhancement};
use marquee_core::persist::CachePaths;
use marquee_core::rerank::{rerank, RerankMethod};
use marquee_core::{snippet, ChunkedSemanticIndex, HybridSearch, InvertedIndex, SearchConfig, SemanticIndex, Tokenizer};
use tracing_subscriber::{fmt, EnvFilter};

use std::path::PathBuf;
use std::sync::Arc;

#[derive(Parser)]
#[command(name = "marquee")]
#[command(about = "Keyword, semantic and hybrid search over a movie collection", long_about = None)]
struct Cli {
    /// Document collection: {"movies": [...]} or a bare JSON array
    #[arg(long, global = true, default_value = "data/movies.json")]
    documents: PathBuf,
    /// Stopword list, one word per line (built-in English list when omitted)
    #[arg(long, global = true)]
    stopwords: Option<PathBuf>,
    /// JSON file overriding search defaults
    #[arg(long, global = true)]
    config: Option<PathBuf>,
    /// Cache directory (overrides the config file)
    #[arg(long, global = true)]
    cache: Option<PathBuf>,
    #[arg(long, global = true, value_enum, default_value_t = EmbedderKind::Hashing)]
    embedder: EmbedderKind,
    /// Base URL of an OpenAI-compatible embeddings server
    #[arg(long, global = true, env = "MARQUEE_EMBEDDING_URL", default_value = "http://localhost:8081")]
    embedding_url: String,
    #[arg(long, global = true, default_value = "all-MiniLM-L6-v2")]
    embedding_model: String,
    #[arg(long, global = true, default_value_t = HashingEmbedder::DEFAULT_DIMENSION)]
    dimension: usize,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum EmbedderKind {
    /// Offline feature-hashing embedder
    Hashing,
    /// Remote embeddings endpoint
    Http,
}

#[derive(Subcommand)]
enum Commands {
    /// Build and cache the BM25 index and chunk embeddings
    Build,
    /// Raw count of a single term in a document
    Tf { doc_id: u32, term: String },
    /// Classic inverse document frequency of a single term
    Idf { term: String },
    /// Okapi BM25 inverse document frequency of a single term
    Bm25idf { term: String },
    /// Saturated BM25 term frequency
    Bm25tf {
        doc_id: u32,
        term: String,
        #[arg(long)]
        k1: Option<f64>,
        #[arg(long)]
        b: Option<f64>,
    },
    /// Keyword search with BM25
    Bm25search {
        query: String,
        #[arg(long, default_value_t = 5)]
        limit: usize,
    },
    /// Print the embedding of a text
    EmbedText { text: String },
    /// Fixed-size word chunks
    Chunk {
        text: String,
        #[arg(long, default_value_t = 200)]
        chunk_size: usize,
        #[arg(long, default_value_t = 0)]
        overlap: usize,
    },
    /// Sentence window chunks
    SemanticChunk {
        text: String,
        #[arg(long, default_value_t = 4)]
        max_chunk_size: usize,
        #[arg(long, default_value_t = 1)]
        overlap: usize,
    },
    /// Semantic search with one embedding per document
    SemanticSearch {
        query: String,
        #[arg(long, default_value_t = 5)]
        limit: usize,
    },
    /// Semantic search over sentence chunks
    SearchChunked {
        query: String,
        #[arg(long, default_value_t = 5)]
        limit: usize,
    },
    /// Min-max normalize a list of scores
    Normalize {
        #[arg(required = true, allow_negative_numbers = true)]
        scores: Vec<f64>,
    },
    /// Hybrid search blending normalized BM25 and semantic scores
    WeightedSearch {
        query: String,
        #[arg(long)]
        alpha: Option<f64>,
        #[arg(long, default_value_t = 5)]
        limit: usize,
    },
    /// Hybrid search with reciprocal rank fusion
    RrfSearch {
        query: String,
        #[arg(short, long)]
        k: Option<f64>,
        #[arg(long, default_value_t = 5)]
        limit: usize,
        /// spell | rewrite | expand
        #[arg(long)]
        enhance: Option<QueryEnhancement>,
        /// individual | batch
        #[arg(long)]
        rerank_method: Option<RerankMethod>,
        #[arg(long, env = "GOOGLE_API_KEY", hide_env_values = true)]
        api_key: Option<String>,
    },
}

fn main() -> Result<()> {
    fmt().with_env_filter(EnvFilter::from_default_env()).init();
    let cli = Cli::parse();
    let config = search_config(&cli)?;

    match &cli.command {
        Commands::Build => {
            let docs = load_documents(&cli.documents)?;
            let paths = CachePaths::new(&config.cache_dir);
            let mut index = InvertedIndex::new(tokenizer(&cli)?);
            index.build(&docs);
            index.save(&paths)?;
            let mut chunked = ChunkedSemanticIndex::new(provider(&cli)?, config.chunking);
            chunked.build(&docs)?;
            chunked.save(&paths)?;
            tracing::info!(cache_dir = %config.cache_dir.display(), num_docs = docs.len(), "index build complete");
            println!("Indexed {} documents, {} chunks", docs.len(), chunked.num_chunks());
        }
        Commands::Tf { doc_id, term } => {
            let index = load_index(&cli, &config)?;
            println!("Term frequency of '{term}' in document {doc_id}: {}", index.term_frequency(*doc_id, term)?);
        }
        Commands::Idf { term } => {
            let index = load_index(&cli, &config)?;
            println!("Inverse document frequency of '{term}': {:.2}", index.idf(term)?);
        }
        Commands::Bm25idf { term } => {
            let index = load_index(&cli, &config)?;
            println!("BM25 IDF score of '{term}': {:.2}", index.bm25_idf(term)?);
        }
        Commands::Bm25tf { doc_id, term, k1, b } => {
            let index = load_index(&cli, &config)?;
            let k1 = k1.unwrap_or(config.bm25.k1);
            let b = b.unwrap_or(config.bm25.b);
            println!("BM25 TF score of '{term}' in document {doc_id}: {:.2}", index.bm25_term_frequency(*doc_id, term, k1, b)?);
        }
        Commands::Bm25search { query, limit } => {
            let index = load_index(&cli, &config)?;
            for (i, r) in index.search(query, *limit, config.bm25.k1, config.bm25.b).iter().enumerate() {
                println!("{}. ({}) {} - Score: {:.2}", i + 1, r.doc_id, r.title, r.score);
            }
        }
        Commands::EmbedText { text } => {
            let embedder = provider(&cli)?;
            let v = embedder.embed_one(text)?;
            println!("Text: {text}");
            println!("First 3 dimensions: {:?}", &v[..v.len().min(3)]);
            println!("Dimensions: {}", v.len());
        }
        Commands::Chunk { text, chunk_size, overlap } => {
            let chunks = chunk_words(text, *chunk_size, *overlap);
            println!("Chunking {} characters", text.chars().count());
            for (i, c) in chunks.iter().enumerate() {
                println!("{}. {c}", i + 1);
            }
        }
        Commands::SemanticChunk { text, max_chunk_size, overlap } => {
            let chunks = chunk(text, *max_chunk_size, *overlap);
            println!("Semantically chunking {} characters", text.chars().count());
            for (i, c) in chunks.iter().enumerate() {
                println!("{}. {c}", i + 1);
            }
        }
        Commands::SemanticSearch { query, limit } => {
            let docs = load_documents(&cli.documents)?;
            let mut index = SemanticIndex::new(provider(&cli)?).with_snippet_len(config.snippet_len);
            index.load_or_build(&docs, &CachePaths::new(&config.cache_dir))?;
            for (i, r) in index.search(query, *limit)?.iter().enumerate() {
                println!("{}. {} (score: {:.4})\n   {}", i + 1, r.title, r.score, r.snippet);
            }
        }
        Commands::SearchChunked { query, limit } => {
            let docs = load_documents(&cli.documents)?;
            let mut index = ChunkedSemanticIndex::new(provider(&cli)?, config.chunking).with_snippet_len(config.snippet_len);
            index.load_or_build(&docs, &CachePaths::new(&config.cache_dir))?;
            for (i, r) in index.search(query, *limit)?.iter().enumerate() {
                println!("{}. {} (score: {:.4})\n   {}", i + 1, r.title, r.score, r.snippet);
            }
        }
        Commands::Normalize { scores } => {
            for s in normalize_scores(scores) {
                println!("{s:.4}");
            }
        }
        Commands::WeightedSearch { query, alpha, limit } => {
            let alpha = alpha.unwrap_or(config.alpha);
            let hs = hybrid(&cli, config)?;
            for (i, r) in hs.weighted_search(query, alpha, *limit)?.iter().enumerate() {
                println!("{}. {}", i + 1, r.title);
                println!("   Hybrid Score: {:.3}", r.hybrid_score);
                println!("   BM25: {:.3}, Semantic: {:.3}", r.bm25_score, r.sem_score);
                println!("   {}", snippet(&r.description, 100));
            }
        }
        Commands::RrfSearch { query, k, limit, enhance, rerank_method, api_key } => {
            let k = k.unwrap_or(config.rrf_k);
            let llm = match (enhance, rerank_method) {
                (None, None) => None,
                _ => Some(language_model(api_key.as_deref())?),
            };
            let query = match (enhance, &llm) {
                (Some(mode), Some(llm)) => {
                    let enhanced = enhance_query(llm.as_ref(), *mode, query)?;
                    println!("Enhanced query ({mode}): '{query}' -> '{enhanced}'");
                    enhanced
                }
                _ => query.clone(),
            };
            let hs = hybrid(&cli, config)?;
            match (rerank_method, &llm) {
                (Some(method), Some(llm)) => {
                    let fused = hs.rrf_search(&query, k, limit.saturating_mul(5))?;
                    let mut reranked = rerank(llm.as_ref(), *method, &query, fused)?;
                    reranked.truncate(*limit);
                    println!("Reranking top {} results using {method} method...", reranked.len());
                    for (i, r) in reranked.iter().enumerate() {
                        println!("{}. {}", i + 1, r.result.title);
                        println!("   Rerank Score: {:.3}", r.rerank_score);
                        println!("   RRF Score: {:.3}", r.result.rrf_score);
                        println!("   BM25 Rank: {}, Semantic Rank: {}", rank(r.result.bm25_rank), rank(r.result.sem_rank));
                        println!("   {}", snippet(&r.result.description, 100));
                    }
                }
                _ => {
                    for (i, r) in hs.rrf_search(&query, k, *limit)?.iter().enumerate() {
                        println!("{}. {}", i + 1, r.title);
                        println!("   RRF Score: {:.3}", r.rrf_score);
                        println!("   BM25 Rank: {}, Semantic Rank: {}", rank(r.bm25_rank), rank(r.sem_rank));
                        println!("   {}", snippet(&r.description, 100));
                    }
                }
            }
        }
    }
    Ok(())
}

fn rank(r: Option<usize>) -> String { r.map_or_else(|| "-".to_string(), |r| r.to_string()) }

fn search_config(cli: &Cli) -> Result<SearchConfig> {
    let mut config = match &cli.config {
        Some(path) => SearchConfig::from_file(path).with_context(|| format!("reading config {}", path.display()))?,
        None => SearchConfig::default(),
    };
    if let Some(cache) = &cli.cache {
        config.cache_dir = cache.clone();
    }
    Ok(config)
}

fn tokenizer(cli: &Cli) -> Result<Tokenizer> {
    Ok(match &cli.stopwords {
        Some(path) => Tokenizer::new(load_stopwords(path)?),
        None => Tokenizer::default(),
    })
}

fn provider(cli: &Cli) -> Result<Arc<dyn EmbeddingProvider>> {
    Ok(match cli.embedder {
        EmbedderKind::Hashing => Arc::new(HashingEmbedder::new(cli.dimension)),
        EmbedderKind::Http => Arc::new(HttpEmbedder::new(&cli.embedding_url, cli.embedding_model.clone(), cli.dimension, None)?),
    })
}

fn language_model(api_key: Option<&str>) -> Result<Arc<dyn LanguageModel>> {
    let key = api_key.context("GOOGLE_API_KEY must be set for query enhancement or reranking")?;
    Ok(Arc::new(GeminiClient::new(key)?))
}

fn load_index(cli: &Cli, config: &SearchConfig) -> Result<InvertedIndex> {
    InvertedIndex::load(&CachePaths::new(&config.cache_dir), tokenizer(cli)?)
        .context("no usable index cache; run `marquee build` first")
}

fn hybrid(cli: &Cli, config: SearchConfig) -> Result<HybridSearch> {
    let docs = load_documents(&cli.documents)?;
    tracing::info!(num_docs = docs.len(), embedder = ?cli.embedder, "preparing hybrid search");
    Ok(HybridSearch::new(docs, tokenizer(cli)?, provider(cli)?, config)?)
}
