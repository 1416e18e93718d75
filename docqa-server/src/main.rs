use std::{path::PathBuf, sync::Arc};

use anyhow::Context;
use clap::Parser;
use docqa_rag::{
    ChatOrchestrator, Corpus, IndexHandle, RagConfig, nomic::NomicEmbeddingProvider,
    openrouter::OpenRouterModel,
};
use docqa_server::server::{ServerConfig, run_server};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

/// Question answering over the regulation corpus, served over HTTP.
#[derive(Debug, Parser)]
#[command(name = "docqa-server", version, about)]
struct Args {
    #[arg(long, env = "DOCQA_HOST", default_value = "127.0.0.1")]
    host: String,

    #[arg(long, env = "DOCQA_PORT", default_value_t = 8000)]
    port: u16,

    /// Corpus snapshot written by the ingestion job.
    #[arg(long, env = "DOCQA_INDEX_PATH", default_value = "index/corpus.json")]
    index_path: PathBuf,

    #[arg(long, env = "CHAT_MODEL", default_value = docqa_rag::openrouter::DEFAULT_MODEL)]
    chat_model: String,

    #[arg(long, env = "EMBEDDING_MODEL", default_value = docqa_rag::nomic::DEFAULT_MODEL)]
    embedding_model: String,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let args = Args::parse();

    let embedder = NomicEmbeddingProvider::from_env()
        .context("embedding provider configuration")?
        .with_model(&args.embedding_model);
    let model = OpenRouterModel::from_env()
        .context("generative model configuration")?
        .with_model(&args.chat_model);

    let index = Arc::new(IndexHandle::empty());
    match Corpus::load_snapshot(&args.index_path).await {
        Ok(corpus) => {
            index.swap(corpus).await;
        }
        Err(e) => {
            warn!(
                path = %args.index_path.display(),
                error = %e,
                "no corpus loaded, queries will report not ready"
            );
        }
    }

    let orchestrator = ChatOrchestrator::builder()
        .config(RagConfig::default())
        .embedding_provider(Arc::new(embedder))
        .model(Arc::new(model))
        .index(index)
        .build()?;
    info!(chat_model = %args.chat_model, embedding_model = %args.embedding_model, "pipeline ready");

    run_server(ServerConfig { host: args.host, port: args.port }, Arc::new(orchestrator)).await
}
