//! agentdex indexer - ERC-8004 agent discovery
//!
//! This binary provides:
//! - Identity registry watching on every configured chain
//! - Registry backfill
//! - Seed crawling and placeholder reconciliation
//! - Database status and initialization

use agentdex_indexer::config::{Config, LoggingConfig};
use agentdex_indexer::coordinator::Coordinator;
use agentdex_indexer::storage::{RecordStore, Storage};
use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

const DEFAULT_DATABASE_URL: &str = "sqlite://agentdex.db";

#[derive(Parser)]
#[command(name = "agentdex-indexer")]
#[command(version, about = "Agent discovery indexer for ERC-8004 identity registries", long_about = None)]
struct Cli {
    /// Path to configuration file
    #[arg(short, long, default_value = "indexer.toml")]
    config: String,

    /// Enable debug logging
    #[arg(short, long)]
    debug: bool,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the indexer service (watchers, backfill, seed crawl, reconcile)
    Run,

    /// Run a one-shot registry backfill and exit
    Backfill {
        /// Only backfill this chain
        #[arg(long)]
        chain: Option<String>,
    },

    /// Crawl seeds and reconcile placeholders once, then exit
    Reconcile,

    /// Show database statistics
    Status,

    /// Initialize the database
    InitDb {
        /// Database URL
        #[arg(long, default_value = DEFAULT_DATABASE_URL)]
        database_url: String,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let command = cli.command.unwrap_or(Commands::Run);

    // Commands that need the config file set up logging from it
    match command {
        Commands::Run => {
            let config = load_config(&cli.config, cli.debug)?;
            run_indexer(config).await?
        }
        Commands::Backfill { chain } => {
            let config = load_config(&cli.config, cli.debug)?;
            run_backfill(config, chain.as_deref()).await?
        }
        Commands::Reconcile => {
            let config = load_config(&cli.config, cli.debug)?;
            run_reconcile(config).await?
        }
        Commands::Status => {
            init_logging(&LoggingConfig::default(), cli.debug)?;
            show_status(&cli.config).await?
        }
        Commands::InitDb { database_url } => {
            init_logging(&LoggingConfig::default(), cli.debug)?;
            init_database(&database_url).await?
        }
    }

    Ok(())
}

fn load_config(path: &str, debug: bool) -> Result<Config> {
    let config = Config::from_file(path).context("Failed to load configuration")?;
    init_logging(&config.logging, debug)?;

    info!("agentdex indexer starting...");
    info!("Version: {}", env!("CARGO_PKG_VERSION"));
    info!("Configuration loaded from {}", path);

    Ok(config)
}

/// Initialize tracing subscriber for logging
fn init_logging(logging: &LoggingConfig, debug: bool) -> Result<()> {
    use tracing_subscriber::{fmt, prelude::*, EnvFilter};

    let env_filter = if debug {
        EnvFilter::new("agentdex_indexer=debug,agentdex_core=debug,sqlx=warn")
    } else {
        EnvFilter::try_from_default_env()
            .or_else(|_| EnvFilter::try_new(format!("agentdex_indexer={}", logging.level)))
            .context("Invalid log level")?
    };

    let registry = tracing_subscriber::registry().with(env_filter);

    if logging.format == "json" {
        registry
            .with(fmt::layer().json().with_target(true).with_line_number(true))
            .init();
    } else {
        registry
            .with(fmt::layer().with_target(true).with_line_number(true))
            .init();
    }

    Ok(())
}

async fn open_storage(config: &Config) -> Result<Storage> {
    let storage = Storage::new(
        &config.database.url,
        Some(config.database.max_connections),
        Some(config.database.min_connections),
    )
    .await
    .context("Failed to connect to database")?;

    storage
        .run_migrations()
        .await
        .context("Failed to run migrations")?;

    info!("Database initialized: {}", config.database.url);

    Ok(storage)
}

/// Cancel `token` on Ctrl+C.
fn cancel_on_ctrl_c(token: CancellationToken) {
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => {
                info!("Received shutdown signal, gracefully shutting down...");
            }
            Err(e) => {
                error!("Failed to listen for Ctrl+C: {}", e);
            }
        }
        token.cancel();
    });
}

/// Main indexer service
async fn run_indexer(config: Config) -> Result<()> {
    let storage = open_storage(&config).await?;
    let store: Arc<dyn RecordStore> = Arc::new(storage.clone());

    info!("  Chains configured: {}", config.chains.len());
    info!("  Seeds: {}", config.indexer.seed_list().len());
    info!("  Tick interval: {}s", config.indexer.tick_interval_secs);

    let coordinator = Coordinator::connect(&config, store).await?;

    let cancel = CancellationToken::new();
    cancel_on_ctrl_c(cancel.clone());

    info!("Indexer is running. Press Ctrl+C to stop.");

    let result = coordinator.run(cancel).await;

    storage.close().await;

    result
}

/// One-shot backfill
async fn run_backfill(config: Config, chain: Option<&str>) -> Result<()> {
    let storage = open_storage(&config).await?;
    let store: Arc<dyn RecordStore> = Arc::new(storage.clone());

    let coordinator = Coordinator::connect(&config, store).await?;

    let cancel = CancellationToken::new();
    cancel_on_ctrl_c(cancel.clone());

    let result = coordinator.backfill(chain, &cancel).await;
    storage.close().await;

    for (chain, report) in result? {
        println!(
            "{}: {} agents, {} stored, {} skipped, {} failed",
            chain, report.total, report.stored, report.skipped, report.failed
        );
    }

    Ok(())
}

/// One seed crawl + reconcile cycle
async fn run_reconcile(config: Config) -> Result<()> {
    let storage = open_storage(&config).await?;
    let store: Arc<dyn RecordStore> = Arc::new(storage.clone());

    let coordinator = Coordinator::connect(&config, store).await?;

    let cancel = CancellationToken::new();
    cancel_on_ctrl_c(cancel.clone());

    let report = coordinator.run_cycle(&cancel).await;
    storage.close().await;

    println!("Seeds stored: {}", report.seeds_stored);
    for (chain, reconciled) in report.reconciled {
        println!(
            "{}: {} placeholders checked, {} upgraded",
            chain, reconciled.checked, reconciled.upgraded
        );
    }

    Ok(())
}

/// Show database statistics
async fn show_status(config_path: &str) -> Result<()> {
    info!("Checking indexer status");

    // Fall back to the default database only if the config file doesn't exist
    let (database_url, max_conn, min_conn) = match Config::from_file(config_path) {
        Ok(config) => {
            info!("Using database from config: {}", config.database.url);
            (
                config.database.url,
                Some(config.database.max_connections),
                Some(config.database.min_connections),
            )
        }
        Err(e) => {
            let is_not_found = e.chain().any(|cause| {
                cause
                    .downcast_ref::<std::io::Error>()
                    .is_some_and(|io_err| io_err.kind() == std::io::ErrorKind::NotFound)
            });

            if is_not_found {
                info!(
                    "Config file not found, using default database: {}",
                    DEFAULT_DATABASE_URL
                );
                (DEFAULT_DATABASE_URL.to_string(), None, None)
            } else {
                return Err(e).context("Failed to load config file");
            }
        }
    };

    let storage = Storage::new(&database_url, max_conn, min_conn)
        .await
        .context("Failed to connect to database")?;

    // Handles a fresh database
    storage
        .run_migrations()
        .await
        .context("Failed to run migrations")?;

    let stats = storage.stats().await?;
    let recent = storage.list_agents(None, 10).await?;

    println!("\n=== agentdex Indexer Status ===\n");
    println!("Database Statistics:");
    println!("  Agents: {}", stats.agent_count);
    println!("  Placeholders: {}", stats.placeholder_count);
    println!("  Chains: {}", stats.chain_count);
    println!(
        "  Last Updated: {}",
        stats
            .last_updated_at
            .and_then(|ts| chrono::DateTime::from_timestamp(ts, 0))
            .map(|dt| dt.to_rfc3339())
            .unwrap_or_else(|| "never".to_string())
    );

    if recent.is_empty() {
        println!("\nNo agents indexed yet.");
    } else {
        println!("\nRecently Updated:");
        for record in recent {
            println!(
                "  [{}] {} {}{}",
                record.chain,
                record.key(),
                record.locator,
                if record.is_placeholder() { " (placeholder)" } else { "" }
            );
        }
    }

    println!();

    storage.close().await;

    Ok(())
}

/// Initialize the database
async fn init_database(database_url: &str) -> Result<()> {
    info!("Initializing database: {}", database_url);

    let storage = Storage::new(database_url, None, None)
        .await
        .context("Failed to connect to database")?;

    storage
        .run_migrations()
        .await
        .context("Failed to run migrations")?;

    storage
        .health_check()
        .await
        .context("Database health check failed")?;

    let stats = storage.stats().await?;
    info!("Database initialized successfully!");
    info!("  Agents: {}", stats.agent_count);
    info!("  Placeholders: {}", stats.placeholder_count);
    info!("  Chains: {}", stats.chain_count);

    storage.close().await;

    Ok(())
}
