//! Dopel Indexer - program log ingestion and explorer API
//!
//! This binary provides:
//! - Log subscription for one Solana program
//! - Virtual block assembly and persistence
//! - The read-only explorer HTTP API

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use dopel_indexer::config::{Config, LoggingConfig};
use dopel_indexer::service::Indexer;
use dopel_indexer::storage::{open_store, SqliteStore, Store};
use tracing::info;

#[derive(Parser)]
#[command(name = "dopel-indexer")]
#[command(version, about = "Program log indexer for the Dopel explorer", long_about = None)]
struct Cli {
    /// Path to configuration file (default: indexer.toml, if present)
    #[arg(short, long)]
    config: Option<String>,

    /// Enable debug logging
    #[arg(short, long)]
    debug: bool,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the indexer service (subscriber + API server)
    Run,

    /// Show storage mode and row counts
    Status,

    /// Initialize the database
    InitDb {
        /// Database URL
        #[arg(long, env = "DATABASE_URL", default_value = "sqlite://dopel.db")]
        database_url: String,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Logging settings come from the config, so it is read before anything logs.
    match cli.command.unwrap_or(Commands::Run) {
        Commands::Run => {
            let config =
                Config::load(cli.config.as_deref()).context("Failed to load configuration")?;
            start_logging(&config.logging, cli.debug)?;
            run_indexer(config).await?;
        }
        Commands::Status => {
            let config =
                Config::read(cli.config.as_deref()).context("Failed to load configuration")?;
            start_logging(&config.logging, cli.debug)?;
            show_status(&config).await?;
        }
        Commands::InitDb { database_url } => {
            start_logging(&LoggingConfig::default(), cli.debug)?;
            init_database(&database_url).await?;
        }
    }

    Ok(())
}

fn start_logging(logging: &LoggingConfig, debug: bool) -> Result<()> {
    init_logging(logging, debug)?;

    info!("Dopel Indexer starting...");
    info!("Version: {}", env!("CARGO_PKG_VERSION"));

    Ok(())
}

/// Initialize tracing subscriber for logging
fn init_logging(logging: &LoggingConfig, debug: bool) -> Result<()> {
    use tracing_subscriber::{fmt, prelude::*, EnvFilter};

    let env_filter = if debug {
        EnvFilter::new("dopel_indexer=debug,tower_http=debug,sqlx=debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| {
            EnvFilter::new(format!(
                "dopel_indexer={level},tower_http={level}",
                level = logging.level
            ))
        })
    };

    let registry = tracing_subscriber::registry().with(env_filter);
    if logging.format == "json" {
        registry
            .with(fmt::layer().json().with_target(true).with_line_number(true))
            .try_init()
            .context("Failed to initialize logging")?;
    } else {
        registry
            .with(fmt::layer().with_target(true).with_line_number(true))
            .try_init()
            .context("Failed to initialize logging")?;
    }

    Ok(())
}

/// Main indexer service - subscriber, health prober and API server
async fn run_indexer(config: Config) -> Result<()> {
    info!("Configuration loaded successfully");

    let indexer = Indexer::open(config).await?;
    indexer.run().await
}

/// Print storage mode and row counts
async fn show_status(config: &Config) -> Result<()> {
    info!("Checking indexer status");

    let store = open_store(&config.database, &config.memory).await;
    let stats = store.stats().await.context("Failed to read store statistics")?;

    println!("\n=== Dopel Indexer Status ===\n");
    println!("Storage:");
    println!("  Mode: {}", store.kind().as_str());
    if let Some(url) = &config.database.url {
        println!("  Database: {}", url);
    }

    println!("\nStored Data:");
    println!("  Blocks: {}", stats.block_count);
    println!(
        "  Latest Block: {}",
        stats
            .max_block_number
            .map(|n| n.to_string())
            .unwrap_or_else(|| "none".to_string())
    );
    println!("  Transactions: {}", stats.transaction_count);
    println!("  Validator Rewards: {}", stats.reward_count);
    println!();

    Ok(())
}

/// Create the database file and apply migrations
async fn init_database(database_url: &str) -> Result<()> {
    info!("Initializing database: {}", database_url);

    let store = SqliteStore::new(database_url)
        .await
        .context("Failed to connect to database")?;

    store
        .run_migrations()
        .await
        .context("Failed to run migrations")?;

    store.ping().await.context("Database health check failed")?;

    let stats = store.stats().await?;
    info!("Database initialized successfully!");
    info!("  Blocks: {}", stats.block_count);
    info!("  Transactions: {}", stats.transaction_count);
    info!("  Validator rewards: {}", stats.reward_count);

    store.close().await;

    Ok(())
}
