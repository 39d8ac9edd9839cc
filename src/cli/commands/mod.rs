//! CLI commands implementation.
//!
//! This module contains the CLI parser and dispatches to command-specific modules.

mod fetch;
mod init;
mod serve;

use std::path::PathBuf;

use clap::{Parser, Subcommand};

use crate::config::load_settings;
use crate::models::CharacterFilter;

#[derive(Parser)]
#[command(name = "charsync")]
#[command(about = "Rate-limited character proxy that mirrors upstream records locally")]
#[command(version)]
pub struct Cli {
    /// Config file path (overrides auto-discovery)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Database URL or SQLite path (overrides config and DATABASE_URL)
    #[arg(long, global = true)]
    database_url: Option<String>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

/// Check if verbose mode is enabled (for early logging setup).
pub fn is_verbose() -> bool {
    std::env::args().any(|arg| arg == "-v" || arg == "--verbose")
}

#[derive(Subcommand)]
enum Commands {
    /// Create the database schema
    Init,

    /// Start the HTTP server
    Serve {
        /// Address to bind: port, host, or host:port (default from config)
        #[arg(short, long)]
        bind: Option<String>,
    },

    /// Fetch one page from upstream and store new characters (no rate limiting)
    Fetch {
        #[arg(long)]
        species: Option<String>,
        #[arg(long)]
        status: Option<String>,
        #[arg(long)]
        origin: Option<String>,
        /// Print the fetched page as JSON
        #[arg(long)]
        json: bool,
    },
}

/// Parse arguments and run the selected command.
pub async fn run() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let mut settings = load_settings(cli.config.as_deref()).await?;
    if let Some(url) = cli.database_url {
        settings.database_url = url;
    }

    match cli.command {
        Commands::Init => init::cmd_init(&settings).await,
        Commands::Serve { bind } => serve::cmd_serve(&settings, bind.as_deref()).await,
        Commands::Fetch {
            species,
            status,
            origin,
            json,
        } => {
            let filter = CharacterFilter {
                species,
                status,
                origin,
            };
            fetch::cmd_fetch(&settings, &filter, json).await
        }
    }
}
