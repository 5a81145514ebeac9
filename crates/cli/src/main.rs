//! Surge watcher CLI
//!
//! Runs single watch cycles for external schedulers and inspects the
//! watcher's persisted state.

mod commands;
mod config;
mod output;

use anyhow::Result;
use clap::{Parser, Subcommand};
use commands::{detect, run, state};
use std::path::PathBuf;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// Firewall-event surge watcher CLI
#[derive(Parser)]
#[command(name = "surgectl")]
#[command(author, version, about = "CLI for the firewall-event surge watcher", long_about = None)]
pub struct Cli {
    /// TOML configuration file, layered under SURGE_* variables
    #[arg(long, global = true, env = "SURGE_CONFIG")]
    pub config: Option<PathBuf>,

    /// State file (defaults to the watcher's data directory)
    #[arg(long, global = true, env = "SURGE_STATE_PATH")]
    pub state: Option<PathBuf>,

    /// Output format
    #[arg(long, short, global = true, default_value = "table")]
    pub format: output::OutputFormat,

    /// Enable verbose output
    #[arg(long, short, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Run exactly one watch cycle
    Run,

    /// Inspect or change the alert watermark
    #[command(subcommand)]
    Watermark(WatermarkCommands),

    /// Inspect archived series points
    #[command(subcommand)]
    Archive(ArchiveCommands),

    /// Detect increases in a series file without touching any state
    Detect {
        /// JSON array of {"timestamp", "count"} samples
        #[arg(long)]
        file: PathBuf,

        /// Only report increases after this timestamp
        #[arg(long)]
        watermark: Option<String>,

        /// Print the alert payload that would be sent
        #[arg(long)]
        payload: bool,
    },
}

#[derive(Subcommand)]
pub enum WatermarkCommands {
    /// Show the current watermark
    Show,

    /// Advance the watermark to a timestamp
    Set {
        /// RFC 3339 timestamp, e.g. 2024-01-01T00:05:00Z
        timestamp: String,
    },

    /// Remove the watermark so the next cycle alerts on every increase
    Clear {
        /// Confirm the clear; without it nothing is changed
        #[arg(long)]
        yes: bool,
    },
}

#[derive(Subcommand)]
pub enum ArchiveCommands {
    /// List retained points, oldest first
    List,

    /// Show the archived count for one timestamp
    Get {
        /// RFC 3339 timestamp of the point
        timestamp: String,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let default_level = if cli.verbose { "debug" } else { "warn" };
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level)))
        .with(fmt::layer().compact().with_writer(std::io::stderr))
        .init();

    match cli.command {
        Commands::Run => {
            run::run_once(cli.config.as_deref(), cli.format).await?;
        }
        Commands::Watermark(cmd) => {
            let store = config::open_store(cli.state)?;
            match cmd {
                WatermarkCommands::Show => state::show_watermark(store, cli.format).await?,
                WatermarkCommands::Set { timestamp } => {
                    state::set_watermark(store, &timestamp, cli.format).await?
                }
                WatermarkCommands::Clear { yes } => state::clear_watermark(store, yes).await?,
            }
        }
        Commands::Archive(cmd) => {
            let store = config::open_store(cli.state)?;
            match cmd {
                ArchiveCommands::List => state::list_archive(store, cli.format).await?,
                ArchiveCommands::Get { timestamp } => {
                    state::get_archived(store, &timestamp, cli.format).await?
                }
            }
        }
        Commands::Detect {
            file,
            watermark,
            payload,
        } => {
            detect::detect_file(&file, watermark.as_deref(), payload, cli.format)?;
        }
    }

    Ok(())
}
