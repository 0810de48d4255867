use aviary_qa_core::{
    ChunkingConfig, GroqClient, IngestionOutcome, QaService, ServiceConfig, SharedChatModel,
};
use chrono::Utc;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[derive(Parser)]
#[command(name = "aviary-qa", version)]
struct Cli {
    #[command(subcommand)]
    command: Command,

    /// Folder with the source documents (.pdf, .txt, .json)
    #[arg(long, env = "DOCS_SOURCE_DIR", default_value = "documentos")]
    source_dir: PathBuf,

    /// Folder for the persisted passage records
    #[arg(long, env = "CHUNKS_DIR", default_value = "documentos_chunks")]
    chunks_dir: PathBuf,

    /// Maximum passage size in characters
    #[arg(long, env = "CHUNK_SIZE", default_value = "1000")]
    chunk_size: usize,

    /// Overlap budget between consecutive passages, in characters
    #[arg(long, env = "CHUNK_OVERLAP", default_value = "200")]
    chunk_overlap: usize,

    /// Groq API key; without it questions get configuration guidance
    #[arg(long, env = "GROQ_API_KEY", hide_env_values = true)]
    api_key: Option<String>,

    /// Groq model identifier
    #[arg(long, env = "GROQ_MODEL", default_value = "llama-3.3-70b-versatile")]
    model: String,

    /// Base URL of the OpenAI-compatible API
    #[arg(long, env = "GROQ_BASE_URL", default_value = "https://api.groq.com/openai/v1")]
    base_url: String,

    /// Number of cached answers kept in memory (0 disables the cache)
    #[arg(long, env = "ANSWER_CACHE_CAPACITY", default_value = "512")]
    cache_capacity: usize,

    /// Pause between documents during ingestion, in milliseconds
    #[arg(long, default_value = "100")]
    file_pause_ms: u64,
}

#[derive(Subcommand)]
enum Command {
    /// Extract, chunk and index every document in the source folder.
    Ingest,
    /// Rank passages by keyword overlap with a query.
    Search {
        /// Search query
        #[arg(long)]
        query: String,
        /// Number of matches to return.
        #[arg(long, default_value = "8")]
        limit: usize,
    },
    /// Answer a question grounded in the indexed documents.
    Ask {
        /// Question to answer
        #[arg(long)]
        question: String,
        /// Let the model blend general knowledge with the documents.
        #[arg(long, default_value_t = false)]
        permissive: bool,
        /// Print the passages used as context.
        #[arg(long, default_value_t = false)]
        show_sources: bool,
    },
    /// Show corpus size, ingestion state and the last ingestion time.
    Status,
}

impl Cli {
    fn service_config(&self) -> ServiceConfig {
        ServiceConfig {
            source_dir: self.source_dir.clone(),
            output_dir: self.chunks_dir.clone(),
            chunking: ChunkingConfig {
                max_chars: self.chunk_size,
                overlap_chars: self.chunk_overlap,
            },
            model: self.model.clone(),
            api_key: self.api_key.clone(),
            api_base_url: self.base_url.clone(),
            answer_cache_capacity: self.cache_capacity,
            file_pause: Duration::from_millis(self.file_pause_ms),
            ..ServiceConfig::default()
        }
    }
}

fn chat_model(config: &ServiceConfig) -> anyhow::Result<Option<SharedChatModel>> {
    let Some(api_key) = config.api_key() else {
        warn!("GROQ_API_KEY is not set; answers will only carry configuration guidance");
        return Ok(None);
    };

    let client = GroqClient::new(&config.api_base_url, api_key)?;
    info!(endpoint = %client.endpoint(), model = %config.model, "generative model configured");
    let model: SharedChatModel = Arc::new(client);
    Ok(Some(model))
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let app_version = env!("CARGO_PKG_VERSION");

    let dotenv = dotenvy::dotenv();

    tracing_subscriber::registry()
        .with(EnvFilter::from_default_env())
        .with(fmt::layer())
        .init();

    if let Ok(path) = dotenv {
        info!(path = %path.display(), "loaded .env");
    }

    let cli = Cli::parse();
    let config = cli.service_config();

    info!(
        version = app_version,
        started_at = %Utc::now().to_rfc3339(),
        source_dir = %config.source_dir.display(),
        chunks_dir = %config.output_dir.display(),
        api_key_present = config.api_key().is_some(),
        "aviary-qa boot"
    );

    let model = chat_model(&config)?;
    let service = QaService::open(config, model).await?;

    match cli.command {
        Command::Ingest => match service.try_run_ingestion().await? {
            IngestionOutcome::Busy => println!("an ingestion pass is already running"),
            IngestionOutcome::NoSourceFiles => println!(
                "no .pdf, .txt or .json files found in {}",
                service.config().source_dir.display()
            ),
            IngestionOutcome::Completed(report) => {
                for skipped in &report.skipped {
                    println!("skipped {}: {}", skipped.path.display(), skipped.reason);
                }
                println!(
                    "{}/{} documents processed, {} passages indexed",
                    report.succeeded, report.discovered, report.total_passages
                );
            }
        },
        Command::Search { query, limit } => {
            let matches = service.search(&query, limit).await;
            if matches.is_empty() {
                println!("no matches for \"{query}\"");
            }

            for found in matches {
                println!(
                    "[{} #{}] score={} terms={}",
                    found.document,
                    found.passage_index,
                    found.score,
                    found.matched_terms.join(",")
                );
                println!("{}\n", found.text);
            }
        }
        Command::Ask {
            question,
            permissive,
            show_sources,
        } => {
            let strict = service.config().strict_by_default && !permissive;
            let outcome = service.ask(&question, strict).await;
            println!("{}", outcome.answer);

            if show_sources {
                println!();
                for found in &outcome.matches {
                    println!(
                        "source: {} #{} score={}",
                        found.document, found.passage_index, found.score
                    );
                }
            }
        }
        Command::Status => {
            let status = service.status().await;
            println!("documents: {}", status.documents);
            println!("passages: {}", status.total_passages);
            println!("ingesting: {}", status.busy);
            match status.last_ingestion {
                Some(at) => println!("last ingestion: {}", at.to_rfc3339()),
                None => println!("last ingestion: never"),
            }
        }
    }

    Ok(())
}
