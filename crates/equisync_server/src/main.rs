//! equisync server
//!
//! Hosts the live equipment tree backed by the legacy equipment database.
//!
//! # Commands
//!
//! - `run` - Create the address space and serve until Ctrl-C
//! - `snapshot` - Run one refresh and print every entity as JSON
//! - `check-config` - Load and validate a configuration file

mod commands;

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

/// Equipment live synchronization server.
#[derive(Parser)]
#[command(name = "equisync")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Enable verbose output
    #[arg(global = true, short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create the address space and keep it in sync until interrupted
    Run {
        /// Path to the TOML configuration file
        #[arg(short, long)]
        config: PathBuf,
    },

    /// Load the equipment once and print all entities
    Snapshot {
        /// Path to the TOML configuration file
        #[arg(short, long)]
        config: PathBuf,

        /// Pretty-print the JSON output
        #[arg(short, long)]
        pretty: bool,
    },

    /// Validate a configuration file
    CheckConfig {
        /// Path to the TOML configuration file
        #[arg(short, long)]
        config: PathBuf,
    },
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    // Initialize logging
    let filter = if cli.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    };
    tracing_subscriber::fmt().with_env_filter(filter).init();

    match cli.command {
        Commands::Run { config } => commands::run::run(&config)?,
        Commands::Snapshot { config, pretty } => commands::snapshot::run(&config, pretty)?,
        Commands::CheckConfig { config } => commands::check_config::run(&config)?,
    }

    Ok(())
}
