//! mailsieve CLI
//!
//! Runs the filtering service and administers rules, detector
//! configuration, cleanup, and signal monitoring against the local
//! store.

mod commands;

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use tracing_subscriber::{fmt, EnvFilter};

use mailsieve_state::{resolve_database_path, SqliteStore, StoreConfig};

/// mailsieve, the email-filtering control plane.
#[derive(Parser, Debug)]
#[command(name = "mailsieve", version, about)]
struct Cli {
    /// Database file. Falls back to DB_PATH / DATABASE_PATH, then the
    /// built-in candidate list.
    #[arg(long, env = "DB_PATH", global = true)]
    db: Option<PathBuf>,

    /// Output format.
    #[arg(long, default_value = "text", global = true)]
    format: OutputFormat,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Clone, clap::ValueEnum)]
pub enum OutputFormat {
    Text,
    Json,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run the service until interrupted.
    Run(commands::run::RunArgs),
    /// Manage filter rules.
    Rules(commands::rules::RulesArgs),
    /// Show or update the dynamic-detector configuration.
    Config(commands::config::ConfigArgs),
    /// Invoke retention and cleanup operations.
    Cleanup(commands::cleanup::CleanupArgs),
    /// Inspect signal states and alerts.
    Monitor(commands::monitor::MonitorArgs),
    /// Run campaign-graph analyses for a merchant.
    Analyze(commands::analyze::AnalyzeArgs),
    /// Manage merchants and their analysis statuses.
    Merchants(commands::merchants::MerchantsArgs),
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let cli = Cli::parse();

    let path = match cli.db {
        Some(path) => path,
        // Unresolvable path is a startup failure; the process exits
        // non-zero through the error return.
        None => resolve_database_path()?,
    };
    let store = SqliteStore::open(&StoreConfig::at(path)).await?;

    match cli.command {
        Command::Run(args) => commands::run::execute(store, args).await,
        Command::Rules(args) => commands::rules::execute(store, args, &cli.format).await,
        Command::Config(args) => commands::config::execute(store, args, &cli.format).await,
        Command::Cleanup(args) => commands::cleanup::execute(store, args, &cli.format).await,
        Command::Monitor(args) => commands::monitor::execute(store, args, &cli.format).await,
        Command::Analyze(args) => commands::analyze::execute(store, args, &cli.format).await,
        Command::Merchants(args) => commands::merchants::execute(store, args, &cli.format).await,
    }
}
