//! # Access RAG CLI (`arag`)
//!
//! ## Usage
//!
//! ```bash
//! arag --config ./config/arag.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `arag init` | Create the vector extension, tier tables and `metadata_table` |
//! | `arag index --manifest docs.json --since 2024-09-01` | Index documents created since a date |
//! | `arag store <file> --access-level 2` | Chunk, embed and store one local text file |
//! | `arag retrieve "<query>" --access-level 2` | Print context visible at a level |
//! | `arag ask "<question>" --table loans --access-level 3` | Ask a question over a table |
//! | `arag check-sql "<sql>"` | Run the signature gate on a statement |
//! | `arag serve` | Start the HTTP server |

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use access_rag::catalog::ManifestCatalog;
use access_rag::completion::create_completion_model;
use access_rag::config::{self, Config};
use access_rag::db;
use access_rag::embedding::create_provider;
use access_rag::extract;
use access_rag::indexing::{parse_start_date, DocumentIndexer};
use access_rag::migrate;
use access_rag::models::DocumentType;
use access_rag::node_storage::NodeStorage;
use access_rag::object_store::create_object_store;
use access_rag::processor::text_to_nodes;
use access_rag::retriever::Retriever;
use access_rag::server::{self, AppState};
use access_rag::sql::{PgTabular, SqlSecurity, TabularQueryEngine};
use access_rag::store::{PgVectorStore, VectorStore};

/// Access-level-aware retrieval and indexing engine.
///
/// All commands accept a `--config` flag pointing to a TOML configuration
/// file. See `config/arag.example.toml` for a full example.
#[derive(Parser)]
#[command(
    name = "arag",
    about = "Access-level-aware retrieval and indexing for RAG chatbots",
    version
)]
struct Cli {
    /// Path to configuration file (TOML).
    #[arg(long, global = true, default_value = "./config/arag.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create the database schema. Safe to run repeatedly.
    Init,

    /// Index every catalog document created after a date.
    Index {
        /// JSON manifest listing documents.
        #[arg(long)]
        manifest: PathBuf,

        /// Only documents created after this date (YYYY-MM-DD).
        #[arg(long)]
        since: String,
    },

    /// Chunk, embed and store a local PDF or TXT file.
    Store {
        file: PathBuf,

        #[arg(long)]
        access_level: i64,

        /// Document type; inferred from the extension when omitted.
        #[arg(long = "type")]
        doc_type: Option<String>,
    },

    /// Print the context chunks a user at the given level would receive.
    Retrieve {
        query: String,

        #[arg(long)]
        access_level: i64,

        /// Number of chunks (defaults to `[retrieval].top_k`).
        #[arg(long)]
        top_k: Option<usize>,
    },

    /// Ask a natural-language question over a tabular document.
    Ask {
        question: String,

        #[arg(long)]
        table: String,

        #[arg(long)]
        access_level: i64,
    },

    /// Check whether a SQL statement passes the signature gate.
    CheckSql {
        sql: String,

        #[arg(long)]
        signature: Option<String>,
    },

    /// Start the HTTP server on `[server].bind`.
    Serve,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // check-sql only needs the secret, which may come from the environment alone.
    let cfg = match &cli.command {
        Commands::CheckSql { .. } if !cli.config.exists() => {
            config::parse_config("", |key| std::env::var(key).ok())?
        }
        _ => config::load_config(&cli.config)?,
    };
    init_tracing(&cfg);

    match cli.command {
        Commands::Init => {
            migrate::run_migrations(&cfg).await?;
            println!("Database initialized successfully.");
        }
        Commands::Index { manifest, since } => {
            run_index(&cfg, &manifest, &since).await?;
        }
        Commands::Store {
            file,
            access_level,
            doc_type,
        } => {
            run_store(&cfg, &file, access_level, doc_type.as_deref()).await?;
        }
        Commands::Retrieve {
            query,
            access_level,
            top_k,
        } => {
            let store = vector_store(&cfg).await?;
            let retriever = Retriever::new(create_provider(&cfg.embedding)?, store.clone());
            let top_k = top_k.unwrap_or(cfg.retrieval.top_k);
            let context = retriever.query(&query, access_level, top_k).await?;
            store.close().await?;

            if context.is_empty() {
                println!("No context found.");
            }
            for (i, chunk) in context.iter().enumerate() {
                println!("{}. {}\n", i + 1, chunk);
            }
        }
        Commands::Ask {
            question,
            table,
            access_level,
        } => {
            let engine = tabular_engine(&cfg).await?;
            let answer = engine.run_query(&question, access_level, &table).await?;
            println!("{}", answer);
        }
        Commands::CheckSql { sql, signature } => {
            let verdict = SqlSecurity::from_config(&cfg.security).check(&sql, signature.as_deref());
            println!(
                "{}: {}",
                if verdict.is_valid { "valid" } else { "rejected" },
                verdict.reason
            );
            if !verdict.is_valid {
                std::process::exit(1);
            }
        }
        Commands::Serve => {
            let store = vector_store(&cfg).await?;
            let retriever = Arc::new(Retriever::new(create_provider(&cfg.embedding)?, store));
            let tabular = Arc::new(tabular_engine(&cfg).await?);
            server::run_server(&cfg, AppState::new(&cfg, retriever, tabular)).await?;
        }
    }

    Ok(())
}

/// `RUST_LOG` wins over `[logging].level`. Logs go to stderr so command
/// output stays pipeable.
fn init_tracing(cfg: &Config) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&cfg.logging.level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

async fn vector_store(cfg: &Config) -> Result<Arc<dyn VectorStore>> {
    Ok(Arc::new(PgVectorStore::connect(cfg).await?))
}

async fn tabular_engine(cfg: &Config) -> Result<TabularQueryEngine> {
    let pool = db::connect(cfg).await?;
    Ok(TabularQueryEngine::new(
        Arc::new(PgTabular::new(pool)),
        create_completion_model(&cfg.completion)?,
        SqlSecurity::from_config(&cfg.security),
        cfg.access.total_levels,
    ))
}

async fn run_index(cfg: &Config, manifest: &Path, since: &str) -> Result<()> {
    let start = parse_start_date(since)?;
    let store = vector_store(cfg).await?;
    let pool = db::connect(cfg).await?;

    let indexer = DocumentIndexer::new(
        cfg,
        Arc::new(ManifestCatalog::new(manifest)),
        create_object_store(&cfg.storage)?,
        Arc::new(PgTabular::new(pool)),
        NodeStorage::new(
            create_provider(&cfg.embedding)?,
            store.clone(),
            cfg.embedding.batch_size,
        ),
        create_completion_model(&cfg.completion)?,
    );
    let report = indexer.process_documents(start).await?;
    store.close().await?;

    println!(
        "Indexed {} documents: {} tables, {} nodes.",
        report.documents, report.tables, report.nodes
    );
    Ok(())
}

async fn run_store(cfg: &Config, file: &Path, access_level: i64, doc_type: Option<&str>) -> Result<()> {
    let doc_type: DocumentType = match doc_type {
        Some(t) => t.parse()?,
        None => file
            .extension()
            .and_then(|e| e.to_str())
            .ok_or_else(|| anyhow::anyhow!("Cannot infer type of {}; pass --type", file.display()))?
            .parse()?,
    };
    let location = file.display().to_string();
    let bytes = std::fs::read(file).with_context(|| format!("Failed to read {}", location))?;

    let text = match doc_type {
        DocumentType::Pdf => extract::extract_pdf(&bytes, &location)?,
        DocumentType::Txt => extract::decode_txt(&bytes),
        DocumentType::Csv | DocumentType::Xlsx => {
            bail!("{} is tabular; add it to a manifest and run `arag index`", location)
        }
    };
    let nodes = text_to_nodes(&text, &cfg.chunking);

    let store = vector_store(cfg).await?;
    let storage = NodeStorage::new(
        create_provider(&cfg.embedding)?,
        store.clone(),
        cfg.embedding.batch_size,
    );
    let stored = storage
        .store_document_nodes(&location, &nodes, access_level)
        .await?;
    store.close().await?;

    println!("Stored {} chunks from {} at level {}.", stored, location, access_level);
    Ok(())
}
