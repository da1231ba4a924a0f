use chrono::Utc;
use clap::{Parser, Subcommand};
use docgraph_core::{
    Document, DocumentPipeline, EmbeddingProvider, EntityExtractor, FileType, GraphStore,
    HashedNgramEmbedder, LlmEntityExtractor, Neo4jGraphStore, OllamaEmbedder, PipelineConfig,
    ProcessOptions,
};
use docgraph_core::{DispatchConfig, PipelineError, ProcessOutcome};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};
use walkdir::WalkDir;

#[derive(Parser)]
#[command(name = "docgraph", version)]
struct Cli {
    #[command(subcommand)]
    command: Command,

    /// Directory for cached chunk/extraction artifacts
    #[arg(long, env = "DOCGRAPH_CACHE_DIR", default_value = ".docgraph-cache")]
    cache_dir: PathBuf,

    /// Target chunk size in characters
    #[arg(long, env = "DOCGRAPH_CHUNK_SIZE", default_value = "1200")]
    chunk_size: usize,

    /// Overlap repeated between neighboring chunks, in characters
    #[arg(long, env = "DOCGRAPH_CHUNK_OVERLAP", default_value = "120")]
    chunk_overlap: usize,

    /// Maximum chunks allowed per document
    #[arg(long, env = "DOCGRAPH_MAX_CHUNKS", default_value = "500")]
    max_chunks: usize,

    /// Maximum estimated tokens allowed per document
    #[arg(long, env = "DOCGRAPH_MAX_TOKENS", default_value = "200000")]
    max_tokens: usize,

    /// Concurrent extraction calls
    #[arg(long, env = "DOCGRAPH_EXTRACT_CONCURRENCY", default_value = "4")]
    extract_concurrency: usize,

    /// Concurrent embedding calls
    #[arg(long, env = "DOCGRAPH_EMBED_CONCURRENCY", default_value = "8")]
    embed_concurrency: usize,

    /// Dispatcher concurrency ceiling
    #[arg(long, env = "DOCGRAPH_MAX_CONCURRENT", default_value = "4")]
    max_concurrent: usize,

    /// Retries per call after the first attempt
    #[arg(long, env = "DOCGRAPH_MAX_RETRIES", default_value = "3")]
    max_retries: usize,

    /// Base backoff between retries, in milliseconds
    #[arg(long, env = "DOCGRAPH_BASE_BACKOFF_MS", default_value = "500")]
    base_backoff_ms: u64,

    /// Per-attempt timeout, in seconds
    #[arg(long, env = "DOCGRAPH_CALL_TIMEOUT_SECS", default_value = "60")]
    call_timeout_secs: u64,

    /// Calls allowed per rolling minute; 0 disables the throttle
    #[arg(long, env = "DOCGRAPH_REQUESTS_PER_MINUTE", default_value = "60")]
    requests_per_minute: usize,

    /// LLM endpoint used for entity extraction
    #[arg(long, env = "DOCGRAPH_LLM_URL", default_value = "http://localhost:11434")]
    llm_url: String,

    /// Model name for entity extraction
    #[arg(long, env = "DOCGRAPH_LLM_MODEL", default_value = "llama3")]
    llm_model: String,

    /// Embedding endpoint
    #[arg(long, env = "DOCGRAPH_EMBED_URL", default_value = "http://localhost:11434")]
    embed_url: String,

    /// Model name for embeddings
    #[arg(long, env = "DOCGRAPH_EMBED_MODEL", default_value = "nomic-embed-text")]
    embed_model: String,

    /// Use the deterministic local embedder instead of the HTTP endpoint
    #[arg(long, env = "DOCGRAPH_OFFLINE_EMBEDDINGS", default_value_t = false)]
    offline_embeddings: bool,

    /// Neo4j HTTP endpoint
    #[arg(long, env = "DOCGRAPH_NEO4J_URL", default_value = "http://localhost:7474")]
    neo4j_url: String,

    /// Neo4j database name
    #[arg(long, env = "DOCGRAPH_NEO4J_DB", default_value = "neo4j")]
    neo4j_db: String,

    /// Neo4j username
    #[arg(long, env = "DOCGRAPH_NEO4J_USER", default_value = "neo4j")]
    neo4j_user: String,

    /// Neo4j password
    #[arg(long, env = "DOCGRAPH_NEO4J_PASSWORD", default_value = "password")]
    neo4j_password: String,
}

#[derive(Subcommand)]
enum Command {
    /// Process a document (or every supported document under a folder) into
    /// graph nodes and edges.
    Process {
        /// File or folder to ingest
        #[arg(long)]
        path: PathBuf,

        /// Discard cached chunks and extractions before processing
        #[arg(long, default_value_t = false)]
        force: bool,

        /// Skip parsing and use this text as the document body
        #[arg(long)]
        raw_text: Option<String>,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(EnvFilter::from_default_env())
        .with(fmt::layer())
        .init();

    let cli = Cli::parse();
    info!(
        version = env!("CARGO_PKG_VERSION"),
        started_at = %Utc::now().to_rfc3339(),
        "docgraph boot"
    );

    let config = PipelineConfig {
        cache_dir: cli.cache_dir.clone(),
        chunk_size: cli.chunk_size,
        chunk_overlap: cli.chunk_overlap,
        max_chunks_per_document: cli.max_chunks,
        max_tokens_per_document: cli.max_tokens,
        extraction_concurrency: cli.extract_concurrency,
        embedding_concurrency: cli.embed_concurrency,
        token_estimator: None,
        dispatch: DispatchConfig {
            max_concurrent: cli.max_concurrent,
            max_retries: cli.max_retries,
            base_backoff: Duration::from_millis(cli.base_backoff_ms),
            call_timeout: Duration::from_secs(cli.call_timeout_secs),
            requests_per_minute: cli.requests_per_minute,
        },
    };

    let extractor = LlmEntityExtractor::new(&cli.llm_url, &cli.llm_model);
    let store = Neo4jGraphStore::new(
        &cli.neo4j_url,
        &cli.neo4j_db,
        &cli.neo4j_user,
        &cli.neo4j_password,
    );

    match cli.command {
        Command::Process {
            path,
            force,
            raw_text,
        } => {
            if cli.offline_embeddings {
                let embedder = HashedNgramEmbedder::default();
                run_process(extractor, embedder, store, config, &path, force, raw_text).await
            } else {
                let embedder = OllamaEmbedder::new(&cli.embed_url, &cli.embed_model);
                run_process(extractor, embedder, store, config, &path, force, raw_text).await
            }
        }
    }
}

async fn run_process<X, E, S>(
    extractor: X,
    embedder: E,
    store: S,
    config: PipelineConfig,
    path: &Path,
    force: bool,
    raw_text: Option<String>,
) -> anyhow::Result<()>
where
    X: EntityExtractor,
    E: EmbeddingProvider,
    S: GraphStore,
{
    let mut pipeline = DocumentPipeline::new(extractor, embedder, store, config)
        .map_err(|error| anyhow::anyhow!(error.to_string()))?;
    pipeline.on_status(|event| {
        info!(
            document_id = %event.document_id,
            phase = %event.phase,
            progress = event.progress,
            message = event.message.as_deref().unwrap_or(""),
            "pipeline status"
        );
    });

    let files = discover_supported_files(path);
    if files.is_empty() {
        anyhow::bail!("no supported documents found at {}", path.display());
    }
    if files.len() > 1 && raw_text.is_some() {
        anyhow::bail!("--raw-text only applies to a single file");
    }

    let mut failures = 0usize;
    for (file, file_type) in files {
        let bytes = tokio::fs::read(&file).await?;
        let filename = file
            .file_name()
            .and_then(|name| name.to_str())
            .unwrap_or("upload")
            .to_string();
        let document = Document::new(filename, file_type, bytes.len() as u64);
        let document_id = document.id.clone();

        let options = ProcessOptions {
            raw_text: raw_text.clone(),
            force_rebuild: force,
        };

        match pipeline.process(document, &bytes, options).await {
            Ok(outcome) => print_outcome(&file, &outcome),
            Err(error) => {
                failures += 1;
                report_failure(&file, &document_id, &error);
            }
        }
    }

    if failures > 0 {
        anyhow::bail!("{failures} document(s) failed");
    }
    Ok(())
}

fn discover_supported_files(path: &Path) -> Vec<(PathBuf, FileType)> {
    if path.is_file() {
        return file_type_of(path)
            .map(|file_type| vec![(path.to_path_buf(), file_type)])
            .unwrap_or_default();
    }

    let mut files = Vec::new();
    for entry in WalkDir::new(path).into_iter().filter_map(|item| item.ok()) {
        if !entry.file_type().is_file() {
            continue;
        }
        match file_type_of(entry.path()) {
            Some(file_type) => files.push((entry.path().to_path_buf(), file_type)),
            None => warn!(path = %entry.path().display(), "skipping unsupported file"),
        }
    }
    files.sort_unstable_by(|left, right| left.0.cmp(&right.0));
    files
}

fn file_type_of(path: &Path) -> Option<FileType> {
    path.extension()
        .and_then(|extension| extension.to_str())
        .and_then(FileType::from_extension)
}

fn print_outcome(path: &Path, outcome: &ProcessOutcome) {
    println!(
        "{}: {} chunks, {} nodes, {} edges, ~{} tokens",
        path.display(),
        outcome.chunks.len(),
        outcome.graph.nodes.len(),
        outcome.graph.edges.len(),
        outcome.estimated_tokens
    );
}

fn report_failure(path: &Path, document_id: &str, error: &PipelineError) {
    warn!(
        path = %path.display(),
        document_id,
        error = %error,
        "document processing failed"
    );
    println!("{}: failed ({error})", path.display());
}
