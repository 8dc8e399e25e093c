//! The `engram` binary: configuration layering, logging setup, and the
//! `init` / `serve` / `index` / `search` subcommands.

use anyhow::Context;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use engram::config::{self, Config};
use engram::db::Datastore;
use engram::embedding::{create_code_provider, create_provider, Embedder};
use engram::indexer::CodeIndexer;
use engram::search::EventFilters;
use engram::store::MemoryStore;
use engram::tools::{ModuleManager, SharedDeps};
use engram::{db, migrate, server, stdio};

#[derive(Parser)]
#[command(
    name = "engram",
    about = "Engram — a long-lived memory service for AI agents",
    version
)]
struct Cli {
    /// Path to the configuration file
    #[arg(long, global = true, default_value = "./engram.toml")]
    config: PathBuf,

    /// Override the database path
    #[arg(long, global = true)]
    db_path: Option<PathBuf>,

    /// Override the embedding provider (local, ollama, openai)
    #[arg(long, global = true)]
    embedding_provider: Option<String>,

    /// Override the knowledge-base directory
    #[arg(long, global = true)]
    kb_root: Option<PathBuf>,

    /// Append logs to this file
    #[arg(long, global = true)]
    log_file: Option<PathBuf>,

    /// Suppress stderr logging (keeps the stdio transport clean)
    #[arg(long, global = true)]
    quiet_stdio: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create or upgrade the datastore schema
    Init,

    /// Run the tool service (stdio, plus HTTP when configured)
    Serve {
        /// Bind address for the plain HTTP JSON surface
        #[arg(long)]
        http_addr: Option<String>,

        /// Skip re-activating project file watchers
        #[arg(long)]
        no_watch: bool,
    },

    /// Index a source-code project
    Index {
        /// Project root directory
        path: PathBuf,

        /// Display name; defaults to the directory name
        #[arg(long)]
        name: Option<String>,
    },

    /// Hybrid search over events (debugging aid)
    Search {
        /// Query text
        query: String,

        /// User scope
        #[arg(long, default_value = "default")]
        user: String,

        /// Subject filter (namespace:identifier)
        #[arg(long)]
        subject: Option<String>,

        /// Maximum results
        #[arg(long)]
        k: Option<usize>,
    },
}

fn init_logging(config: &Config) -> anyhow::Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false);

    match (&config.log.file, config.log.quiet_stdio) {
        (Some(path), _) => {
            let file = std::fs::OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)
                .with_context(|| format!("cannot open log file {}", path.display()))?;
            subscriber.with_writer(Arc::new(file)).with_ansi(false).init();
        }
        (None, true) => {
            subscriber.with_writer(std::io::sink).init();
        }
        (None, false) => {
            subscriber.with_writer(std::io::stderr).init();
        }
    }
    Ok(())
}

/// Apply command-line overrides on top of file and environment values.
fn apply_flags(config: &mut Config, cli: &Cli) {
    if let Some(path) = &cli.db_path {
        config.db.path = path.clone();
    }
    if let Some(provider) = &cli.embedding_provider {
        config.embedding.provider = Some(provider.clone());
    }
    if let Some(root) = &cli.kb_root {
        config.kb.root = Some(root.clone());
    }
    if let Some(file) = &cli.log_file {
        config.log.file = Some(file.clone());
    }
    if cli.quiet_stdio {
        config.log.quiet_stdio = true;
    }
}

/// Build the full service stack from a validated configuration.
async fn build_stack(config: &Config) -> anyhow::Result<(MemoryStore, CodeIndexer)> {
    let pool = db::connect(config).await?;
    let ds = Datastore::new(pool);
    migrate::run_migrations(&ds).await?;

    let provider = create_provider(&config.embedding)?;
    let code_provider = create_code_provider(&config.embedding)?;
    let embedder = Embedder::new(
        provider,
        config.chunking.chunk_size,
        config.chunking.chunk_overlap,
    );
    let code_embedder = Embedder::new(
        code_provider,
        config.chunking.chunk_size,
        config.chunking.chunk_overlap,
    );

    let store = MemoryStore::new(ds, embedder, code_embedder, config.kb.root.clone());
    let indexer = CodeIndexer::new(store.clone(), &config.code);
    Ok((store, indexer))
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let mut config = match config::load_config(&cli.config) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("configuration error: {e}");
            std::process::exit(2);
        }
    };
    apply_flags(&mut config, &cli);
    if let Err(e) = config::validate(&config) {
        eprintln!("configuration error: {e}");
        std::process::exit(2);
    }
    init_logging(&config)?;

    match cli.command {
        Commands::Init => {
            let pool = db::connect(&config).await?;
            let ds = Datastore::new(pool);
            migrate::run_migrations(&ds).await?;
            println!("Database initialized at {}", config.db.path.display());
        }

        Commands::Serve { http_addr, no_watch } => {
            if let Some(addr) = http_addr {
                config.server.http_addr = Some(addr);
            }
            if no_watch {
                config.code.watch_enabled = false;
            }
            run_serve(config).await?;
        }

        Commands::Index { path, name } => {
            let (_store, indexer) = build_stack(&config).await?;
            let job = indexer.start_indexing(&path, name.as_deref()).await?;
            println!("queued job {} for project {}", job.id, job.project_id);
            // Foreground mode: wait for the job to finish.
            loop {
                tokio::time::sleep(std::time::Duration::from_millis(250)).await;
                let Some(current) = indexer.store().job_get(&job.id).await? else {
                    break;
                };
                if current.status.is_terminal() {
                    println!(
                        "job {}: {} ({}/{} files)",
                        current.id,
                        current.status.as_str(),
                        current.files_indexed,
                        current.files_total
                    );
                    if let Some(error) = current.error {
                        println!("errors:\n{}", error);
                    }
                    break;
                }
            }
            indexer.shutdown().await;
        }

        Commands::Search {
            query,
            user,
            subject,
            k,
        } => {
            let (store, indexer) = build_stack(&config).await?;
            let filters = EventFilters {
                subject,
                time: None,
            };
            let cancel = CancellationToken::new();
            let results = store
                .search_events(&user, Some(&query), &filters, k, &cancel)
                .await?;
            if results.is_empty() {
                println!("No results.");
            }
            for (i, hit) in results.iter().enumerate() {
                println!(
                    "{}. [{:.2}] {} — {}",
                    i + 1,
                    hit.score,
                    hit.record.subject,
                    hit.record.content.replace('\n', " ")
                );
                println!("    at: {}   id: {}", hit.record.created_at, hit.id);
            }
            indexer.shutdown().await;
        }
    }

    Ok(())
}

async fn run_serve(config: Config) -> anyhow::Result<()> {
    let (store, indexer) = build_stack(&config).await?;

    if config.code.watch_enabled {
        match indexer.activate_watched_projects().await {
            Ok(count) if count > 0 => info!(projects = count, "re-activated project watchers"),
            Ok(_) => {}
            Err(e) => error!(error = %e, "failed to re-activate watchers"),
        }
    }

    let deps = SharedDeps {
        store,
        indexer: indexer.clone(),
    };
    let manager = Arc::new(ModuleManager::provision(deps, &config.modules.disabled)?);

    let shutdown = CancellationToken::new();
    let signal_token = shutdown.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("shutdown signal received");
            signal_token.cancel();
        }
    });

    let http_task = config.server.http_addr.clone().map(|addr| {
        let manager = Arc::clone(&manager);
        let token = shutdown.clone();
        tokio::spawn(async move { server::run_server(manager, &addr, token).await })
    });

    stdio::run_stdio(Arc::clone(&manager), shutdown.clone()).await?;
    // Detached stdin closes immediately; an HTTP-only deployment keeps
    // serving until the shutdown signal.
    if http_task.is_some() && !shutdown.is_cancelled() {
        info!("stdio closed, HTTP surface continues");
        shutdown.cancelled().await;
    }
    shutdown.cancel();

    if let Some(task) = http_task {
        match task.await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => error!(error = %e, "HTTP surface failed"),
            Err(e) => error!(error = %e, "HTTP task aborted"),
        }
    }

    manager.shutdown().await;
    Ok(())
}
