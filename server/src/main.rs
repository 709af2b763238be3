use anyhow::Result;
use clap::Parser;
use marquee_core::embedding::HashingEmbedder;
use marquee_core::SearchConfig;
use marquee_server::{build_app, build_engine, EngineOptions};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing_subscriber::{fmt, EnvFilter};

#[derive(Parser)]
struct Args {
    /// Document collection JSON
    #[arg(long, default_value = "data/movies.json")]
    documents: PathBuf,
    /// Stopword list, one word per line
    #[arg(long)]
    stopwords: Option<PathBuf>,
    /// JSON file overriding search defaults
    #[arg(long)]
    config: Option<PathBuf>,
    /// Cache directory (overrides the config file)
    #[arg(long)]
    cache: Option<PathBuf>,
    /// OpenAI-compatible embeddings server; offline hashing embedder when unset
    #[arg(long, env = "MARQUEE_EMBEDDING_URL")]
    embedding_url: Option<String>,
    #[arg(long, default_value = "all-MiniLM-L6-v2")]
    embedding_model: String,
    #[arg(long, default_value_t = HashingEmbedder::DEFAULT_DIMENSION)]
    dimension: usize,
    /// Host to bind
    #[arg(long, default_value = "0.0.0.0")]
    host: String,
    /// Port to bind
    #[arg(long, default_value_t = 8080)]
    port: u16,
}

#[tokio::main]
async fn main() -> Result<()> {
    fmt().with_env_filter(EnvFilter::from_default_env()).init();
    let args = Args::parse();

    let mut config = match &args.config {
        Some(path) => SearchConfig::from_file(path)?,
        None => SearchConfig::default(),
    };
    if let Some(cache) = args.cache.clone() {
        config.cache_dir = cache;
    }
    let opts = EngineOptions {
        documents: args.documents.clone(),
        stopwords: args.stopwords.clone(),
        config,
        embedding_url: args.embedding_url.clone(),
        embedding_model: args.embedding_model.clone(),
        dimension: args.dimension,
    };
    let engine = tokio::task::spawn_blocking(move || build_engine(&opts)).await??;
    tracing::info!(num_docs = engine.documents().len(), "engine ready");
    let app = build_app(Arc::new(engine));

    let addr: SocketAddr = format!("{}:{}", args.host, args.port).parse()?;
    let listener = TcpListener::bind(addr).await?;
    tracing::info!(%addr, "server listening");
    axum::serve(listener, app).await?;
    Ok(())
}
