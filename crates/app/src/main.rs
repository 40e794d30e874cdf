use chrono::Utc;
use clap::{Parser, Subcommand};
use pdf_qa_core::{Ingestor, ModelConfig, PipelineConfig, QdrantStore, RagPipeline, RagServices};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[derive(Parser)]
#[command(name = "pdf-qa", version)]
struct Cli {
    #[command(subcommand)]
    command: Command,

    /// Ollama base URL
    #[arg(long, env = "OLLAMA_BASE_URL", default_value = "http://localhost:11434")]
    ollama_url: String,

    /// Ollama model used for answers
    #[arg(long, env = "OLLAMA_LLM_MODEL", default_value = "")]
    llm_model: String,

    /// Ollama model used for embeddings
    #[arg(long, env = "OLLAMA_EMBEDDING_MODEL", default_value = "")]
    embedding_model: String,

    /// Width of the embedding model's vectors (768 for nomic-embed-text)
    #[arg(long, env = "EMBEDDING_DIMENSIONS")]
    embedding_dimensions: usize,

    /// Qdrant base URL
    #[arg(long, env = "QDRANT_URL", default_value = "http://localhost:6333")]
    qdrant_url: String,
}

#[derive(Subcommand)]
enum Command {
    /// Replace an owner's collection with the PDFs found under a folder.
    Ingest {
        #[arg(long)]
        owner: String,
        /// Folder that contains PDFs recursively.
        #[arg(long)]
        folder: PathBuf,
    },
    /// Answer a question from an owner's ingested documents.
    Ask {
        #[arg(long)]
        owner: String,
        #[arg(long)]
        question: String,
        /// Ask the model to skip its reasoning phase.
        #[arg(long, default_value_t = false)]
        no_thinking: bool,
    },
    /// Remove one document's chunks from an owner's collection.
    DeleteDocument {
        #[arg(long)]
        owner: String,
        #[arg(long)]
        document_id: String,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    tracing_subscriber::registry()
        .with(EnvFilter::from_default_env())
        .with(fmt::layer())
        .init();

    let cli = Cli::parse();

    let models = ModelConfig::new(&cli.ollama_url, &cli.llm_model, &cli.embedding_model)?;
    let store = Arc::new(QdrantStore::new(&cli.qdrant_url));
    let services = RagServices::ollama(&models, cli.embedding_dimensions, store);
    let config = PipelineConfig::default();

    info!(
        version = env!("CARGO_PKG_VERSION"),
        started_at = %Utc::now().to_rfc3339(),
        llm_model = %models.llm_model,
        embedding_model = %models.embedding_model,
        "pdf-qa boot"
    );

    match cli.command {
        Command::Ingest { owner, folder } => {
            let ingestor = Ingestor::new(services, config);
            println!("{}", ingestor.ingest(&owner, &folder).await);
        }
        Command::Ask {
            owner,
            question,
            no_thinking,
        } => {
            let pipeline = RagPipeline::new(&services, &config);
            let response = pipeline.answer(&owner, &question, !no_thinking).await?;
            println!("{}", serde_json::to_string_pretty(&response)?);
        }
        Command::DeleteDocument { owner, document_id } => {
            let ingestor = Ingestor::new(services, config);
            let removed = ingestor.delete_document(&owner, &document_id).await?;
            println!("{removed} chunks removed for document {document_id}");
        }
    }

    Ok(())
}
