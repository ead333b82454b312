//! Kino Analytics CLI - Tracker Replay Tool
//!
//! Features:
//! - Replay recorded player events through the session tracker
//! - Inspect the generated media hits
//! - Deliver a replayed session to a collection server

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

mod commands;
mod output;

/// Kino Analytics CLI - Media tracker toolkit
#[derive(Parser)]
#[command(name = "kino-analytics")]
#[command(author = "Purple Squirrel Media")]
#[command(version)]
#[command(about = "Replay player events through the media analytics tracker", long_about = None)]
struct Cli {
    /// Enable verbose output
    #[arg(short, long)]
    verbose: bool,

    /// Output format (text, json)
    #[arg(short, long, default_value = "text")]
    format: String,

    /// Path to a JSON configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Replay events and print the generated hits
    Replay {
        /// JSON-lines file of tracker events
        events: PathBuf,
    },

    /// Replay events and deliver the hits to a collection server
    Send {
        /// JSON-lines file of tracker events
        events: PathBuf,

        /// Collection server, overrides the configuration file
        #[arg(short, long)]
        server: Option<String>,
    },

    /// Validate a configuration file
    Check,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Initialize tracing; RUST_LOG takes precedence
    let level = if cli.verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    kino_analytics::init();
    let config = commands::load_config(cli.config.as_deref())?;

    match cli.command {
        Commands::Replay { events } => {
            commands::replay(&events, &config, &cli.format)?;
        }
        Commands::Send { events, server } => {
            commands::send(&events, config, server, &cli.format).await?;
        }
        Commands::Check => {
            commands::check(&config, &cli.format)?;
        }
    }

    Ok(())
}
