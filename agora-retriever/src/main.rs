use agora_embed::{EmbedConfig, EmbeddingProvider, HashedNgramProvider, RemoteEmbeddingProvider};
use agora_retriever::config::RetrieverConfig;
use agora_retriever::index::{EmbeddedVectorIndex, IndexFilter, RemoteVectorIndex, VectorIndex};
use agora_retriever::service::{DocumentUpload, RetrievalService};
use agora_retriever::store::{DocumentIndex, DocumentType};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::process;
use std::sync::Arc;

/// CLI for the agora document retrieval pipeline.
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Base directory holding the document and vector databases
    #[arg(short, long, default_value = ".")]
    base_dir: PathBuf,

    /// Optional TOML config file for chunking/query tuning
    #[arg(short, long)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Ingest a document file into the index
    Ingest {
        /// Path to the document
        path: PathBuf,
        /// Document category
        #[arg(short = 't', long)]
        doc_type: String,
        /// Collection tag
        #[arg(short = 'c', long, default_value = "default")]
        collection: String,
        /// Format hint (MIME type or extension); defaults to the file extension
        #[arg(short, long)]
        format: Option<String>,
    },
    /// Show a document's processing status
    Status {
        /// Document ID
        id: String,
    },
    /// Run a similarity query
    Query {
        /// The question text
        question: String,
        /// Restrict to one document category
        #[arg(short = 't', long)]
        doc_type: Option<String>,
        /// Restrict to one collection
        #[arg(short = 'c', long)]
        collection: Option<String>,
        /// Number of results
        #[arg(short, long)]
        k: Option<usize>,
        /// Emit JSON instead of a summary
        #[arg(long)]
        json: bool,
    },
    /// Delete a document and all derived chunks and vectors
    Delete {
        /// Document ID
        id: String,
    },
    /// Show index statistics
    Stats,
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_max_level(tracing::Level::INFO)
        .with_writer(std::io::stderr)
        .init();

    if let Err(e) = run().await {
        eprintln!("Error: {e}");
        process::exit(1);
    }
}

async fn run() -> anyhow::Result<()> {
    let args = Args::parse();

    let config = match &args.config {
        Some(path) => RetrieverConfig::load(path).await?,
        None => RetrieverConfig::default(),
    };

    let embedder = build_embedder()?;
    let dimension = embedder.embedding_dimension();

    let store = DocumentIndex::open(&args.base_dir).await?;
    let index: Arc<dyn VectorIndex> = match std::env::var("AGORA_INDEX_URL") {
        Ok(url) => {
            let api_key = std::env::var("AGORA_INDEX_API_KEY").ok();
            Arc::new(RemoteVectorIndex::new(
                url,
                api_key.as_deref(),
                "agora-chunks",
                dimension,
            )?)
        }
        Err(_) => Arc::new(EmbeddedVectorIndex::open(&args.base_dir, dimension).await?),
    };

    let service = RetrievalService::new(store, index, embedder, config)?;
    service.startup_check().await?;

    match args.command {
        Commands::Ingest {
            path,
            doc_type,
            collection,
            format,
        } => {
            let doc_type: DocumentType = doc_type.parse()?;
            let format_hint = format
                .or_else(|| {
                    path.extension()
                        .and_then(|ext| ext.to_str())
                        .map(str::to_string)
                })
                .unwrap_or_else(|| "text/plain".to_string());
            let filename = path
                .file_name()
                .map(|name| name.to_string_lossy().to_string())
                .unwrap_or_else(|| path.display().to_string());
            let bytes = tokio::fs::read(&path).await?;

            let report = service
                .ingest(DocumentUpload {
                    filename,
                    format_hint,
                    doc_type,
                    collection,
                    bytes,
                })
                .await?;

            if report.reused {
                println!(
                    "Identical content already indexed as document {}",
                    report.document_id
                );
            } else {
                println!(
                    "Indexed document {} ({} chunks)",
                    report.document_id, report.chunk_count
                );
            }
            Ok(())
        }
        Commands::Status { id } => {
            let document = service.document_status(&id).await?;
            println!("Document: {}", document.id);
            println!("  File: {}", document.filename);
            println!("  Type: {}", document.doc_type);
            println!("  Collection: {}", document.collection);
            println!("  Status: {}", document.status);
            println!("  Content hash: {}", hex::encode(document.content_hash));
            println!("  Chunks: {}", document.chunk_count);
            if let Some(detail) = &document.error_detail {
                println!("  Error: {detail}");
            }
            Ok(())
        }
        Commands::Query {
            question,
            doc_type,
            collection,
            k,
            json,
        } => {
            let filter = IndexFilter {
                doc_type: doc_type.map(|t| t.parse()).transpose()?,
                collection,
            };
            let results = service.query(&question, &filter, k).await?;

            if json {
                println!("{}", serde_json::to_string_pretty(&results)?);
            } else if results.is_empty() {
                println!("No relevant documents found");
            } else {
                println!("Found {} relevant chunks:", results.len());
                for item in results {
                    let page = item
                        .page
                        .map(|p| format!(" p.{p}"))
                        .unwrap_or_default();
                    println!(
                        "  {:.3} | {} ({}{}) | {}",
                        item.score,
                        item.filename,
                        item.doc_type,
                        page,
                        preview(&item.text, 80)
                    );
                }
            }
            Ok(())
        }
        Commands::Delete { id } => {
            if service.delete_document(&id).await? {
                println!("Deleted document {id}");
            } else {
                println!("Document {id} not found");
            }
            Ok(())
        }
        Commands::Stats => {
            let stats = service.stats().await?;
            println!("Index statistics:");
            println!("  Documents: {}", stats.documents);
            println!("  Indexed: {}", stats.indexed_documents);
            println!("  Failed: {}", stats.failed_documents);
            println!("  Chunks: {}", stats.chunks);
            Ok(())
        }
    }
}

/// Build the embedding provider from the environment: a remote endpoint when
/// one is configured, the deterministic local embedder otherwise.
fn build_embedder() -> anyhow::Result<Arc<dyn EmbeddingProvider>> {
    match std::env::var("AGORA_EMBED_ENDPOINT") {
        Ok(endpoint) => {
            let model = std::env::var("AGORA_EMBED_MODEL")
                .unwrap_or_else(|_| "text-embedding-3-small".to_string());
            let dimension: usize = std::env::var("AGORA_EMBED_DIMENSION")
                .unwrap_or_else(|_| "1536".to_string())
                .parse()?;
            let mut config = EmbedConfig::new(endpoint, model, dimension);
            if let Ok(api_key) = std::env::var("AGORA_EMBED_API_KEY") {
                config = config.with_api_key(api_key);
            }
            Ok(Arc::new(RemoteEmbeddingProvider::new(config)?))
        }
        Err(_) => Ok(Arc::new(HashedNgramProvider::default())),
    }
}

fn preview(text: &str, limit: usize) -> String {
    let collapsed = text.split_whitespace().collect::<Vec<_>>().join(" ");
    if collapsed.len() <= limit {
        collapsed
    } else {
        let mut end = limit;
        while !collapsed.is_char_boundary(end) {
            end -= 1;
        }
        format!("{}…", &collapsed[..end])
    }
}
