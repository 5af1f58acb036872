//! # Local Docs CLI (`ldocs`)
//!
//! Indexes local documents and serves them to MCP clients.
//!
//! ## Usage
//!
//! ```bash
//! ldocs --config ./config/ldocs.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `ldocs init` | Create the SQLite database and run schema migrations |
//! | `ldocs index <dir>` | Index every `.md` / `.txt` file under a directory |
//! | `ldocs search "<query>"` | Search indexed documents |
//! | `ldocs stats` | Show index statistics |
//! | `ldocs serve http` | Serve MCP over HTTP (`/mcp`) |
//! | `ldocs serve stdio` | Serve MCP over stdin/stdout |
//!
//! Logs go to stderr; set `RUST_LOG` to change the level.

use anyhow::bail;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

use local_docs_mcp::config;
use local_docs_mcp::store::Store;
use local_docs_mcp::tools::ToolContext;
use local_docs_mcp::{mcp, server, stats};

/// Semantic search over local documents, served over MCP.
///
/// All commands accept a `--config` flag pointing to a TOML configuration
/// file. See `config/ldocs.example.toml` for a full example.
#[derive(Parser)]
#[command(
    name = "ldocs",
    about = "Index local documents and serve semantic search over MCP",
    version
)]
struct Cli {
    /// Path to configuration file (TOML).
    #[arg(long, global = true, default_value = "./config/ldocs.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Initialize the database schema.
    ///
    /// Idempotent. Fails if the database was created with a different
    /// embedding width.
    Init,

    /// Index a directory.
    ///
    /// Crawls the directory, chunks every .md and .txt file, embeds the
    /// chunks and stores them. Re-indexing replaces earlier results.
    Index {
        /// Directory to index.
        dir: PathBuf,
    },

    /// Search indexed documents.
    Search {
        /// The search query.
        query: String,

        /// Only search documents whose path starts with this prefix.
        #[arg(long)]
        path: Option<String>,

        /// Maximum number of results (defaults to `[retrieval] limit`).
        #[arg(long)]
        limit: Option<usize>,

        /// Print results as JSON, as the `search` tool returns them.
        #[arg(long)]
        json: bool,
    },

    /// Show index statistics.
    Stats,

    /// Start an MCP server.
    Serve {
        #[command(subcommand)]
        transport: ServeTransport,
    },
}

#[derive(Subcommand)]
enum ServeTransport {
    /// Serve MCP over HTTP at `[server] bind`.
    Http,
    /// Serve MCP over stdin/stdout.
    Stdio,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let cfg = config::load_config(&cli.config)?;

    match cli.command {
        Commands::Init => {
            let store = Store::open(&cfg).await?;
            store.close().await;
            println!("Database initialized successfully.");
        }
        Commands::Index { dir } => {
            let ctx = ToolContext::open(cfg).await?;
            let report = ctx.index(&dir).await?;
            ctx.store.close().await;

            println!("index {}", report.root);
            println!("  files seen: {}", report.files_seen);
            println!("  documents indexed: {}", report.documents_indexed);
            println!("  skipped: {}", report.skipped);
            println!("  chunks written: {}", report.chunks_written);
            if report.pruned > 0 {
                println!("  pruned: {}", report.pruned);
            }
            if let Some(failure) = report.first_failure() {
                println!("  failed: {}", report.failures.len());
                bail!(
                    "Error indexing {}: {}: {}",
                    dir.display(),
                    failure.path,
                    failure.cause
                );
            }
            println!("ok");
        }
        Commands::Search {
            query,
            path,
            limit,
            json,
        } => {
            let ctx = ToolContext::open(cfg).await?;
            let results = ctx.search(&query, path.as_deref(), limit).await?;
            ctx.store.close().await;

            if json {
                println!("{}", serde_json::to_string_pretty(&results)?);
            } else if results.is_empty() {
                println!("No results.");
            } else {
                for (i, r) in results.iter().enumerate() {
                    println!("{}. {}", i + 1, r.doc_id);
                    println!("   offset: {}", r.before.chars().count());
                    println!("   {}", r.matched.replace('\n', " "));
                    println!();
                }
            }
        }
        Commands::Stats => {
            stats::run_stats(&cfg).await?;
        }
        Commands::Serve { transport } => {
            let ctx = ToolContext::open(cfg).await?;
            match transport {
                ServeTransport::Http => server::run_server(ctx).await?,
                ServeTransport::Stdio => mcp::run_stdio(ctx).await?,
            }
        }
    }

    Ok(())
}
