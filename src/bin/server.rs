//! Recall HTTP server
//!
//! Run with: recall-server

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use recall::embedding::OpenAiEmbedder;
use recall::llm::OpenAiChat;
use recall::server::router;
use recall::{Engine, EngineConfig};

#[derive(Parser, Debug)]
#[command(name = "recall-server")]
#[command(about = "Long-term memory retrieval engine for conversational agents")]
struct Args {
    /// OpenAI API key (embeddings + auxiliary LLM)
    #[arg(long, env = "OPENAI_API_KEY")]
    openai_key: Option<String>,

    /// OpenAI-compatible API base URL
    #[arg(
        long,
        env = "OPENAI_BASE_URL",
        default_value = "https://api.openai.com/v1"
    )]
    openai_base_url: String,

    /// Listen port
    #[arg(long, env = "RAG_PORT", default_value = "3847")]
    port: u16,

    /// Snapshot root directory
    #[arg(long, env = "RAG_CACHE_DIR", default_value = "./data/cache/rag")]
    cache_dir: String,

    /// Enable the relational backend when set
    #[arg(long, env = "DATABASE_URL")]
    database_url: Option<String>,

    /// Embedding model name
    #[arg(
        long,
        env = "RAG_EMBEDDING_MODEL",
        default_value = "text-embedding-3-large"
    )]
    embedding_model: String,

    /// Chat model for extraction, rewrite, decomposition, and reranking
    #[arg(long, env = "RAG_LLM_MODEL", default_value = "gpt-4o-mini")]
    llm_model: String,

    /// Target chunk size in characters
    #[arg(long, env = "RAG_CHUNK_SIZE", default_value = "1600")]
    chunk_size: usize,

    /// Overlap between adjacent chunks in characters
    #[arg(long, env = "RAG_CHUNK_OVERLAP", default_value = "320")]
    chunk_overlap: usize,

    /// Overfetch size when the reranker is enabled
    #[arg(long, env = "RAG_RERANK_OVERFETCH", default_value = "10")]
    rerank_overfetch: usize,

    /// Enable LLM reranking
    #[arg(long, env = "RAG_RERANKER", action = clap::ArgAction::Set, default_value_t = true)]
    reranker: bool,

    /// Enable LLM query rewriting
    #[arg(long, env = "RAG_QUERY_REWRITE", action = clap::ArgAction::Set, default_value_t = false)]
    query_rewrite: bool,

    /// Enable entity-graph context
    #[arg(long, env = "RAG_GRAPH", action = clap::ArgAction::Set, default_value_t = true)]
    graph: bool,

    /// Enable counting-query decomposition
    #[arg(long, env = "RAG_DECOMPOSE", action = clap::ArgAction::Set, default_value_t = true)]
    decompose: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "recall=info,tower_http=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let args = Args::parse();

    let api_key = args
        .openai_key
        .context("OPENAI_API_KEY is required")?;

    let cache_dir = PathBuf::from(shellexpand::tilde(&args.cache_dir).into_owned());

    let config = EngineConfig {
        cache_dir,
        database_url: args.database_url,
        chunk_size: args.chunk_size,
        chunk_overlap: args.chunk_overlap,
        reranker: args.reranker,
        query_rewrite: args.query_rewrite,
        graph: args.graph,
        decompose: args.decompose,
        rerank_overfetch: args.rerank_overfetch,
        ..EngineConfig::default()
    };

    let embedder = Arc::new(OpenAiEmbedder::new(
        api_key.clone(),
        args.openai_base_url.clone(),
        args.embedding_model.clone(),
    ));
    let chat = Arc::new(OpenAiChat::new(
        api_key,
        args.openai_base_url,
        args.llm_model,
    ));

    let engine = Arc::new(Engine::new(config, embedder, chat)?);

    let app = router(engine.clone());
    let addr = SocketAddr::from(([0, 0, 0, 0], args.port));

    tracing::info!(
        %addr,
        version = recall::VERSION,
        embedding_model = %args.embedding_model,
        relational = engine.is_relational(),
        "recall-server listening"
    );

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind {}", addr))?;

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    Ok(())
}

async fn shutdown_signal() {
    let _ = tokio::signal::ctrl_c().await;
    tracing::info!("shutting down");
}
