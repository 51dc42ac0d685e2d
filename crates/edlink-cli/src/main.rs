//! `edlink`: command-line client for an editor/automation server.
//!
//! # Usage
//!
//! ```bash
//! edlink ping
//! edlink --server http://10.0.0.5:50051 exec reload scene
//! edlink logs
//! edlink interfaces get --output interfaces.json
//! edlink interfaces apply interfaces.json
//! edlink watch
//! ```

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};

mod commands;
mod config;
mod logging;

use config::CliConfig;

#[derive(Parser)]
#[command(name = "edlink", version)]
#[command(about = "Talk to a running editor/automation server", long_about = None)]
struct Cli {
    /// Config file (default: ./edlink.toml when present)
    #[arg(long, global = true, env = "EDLINK_CONFIG")]
    config: Option<PathBuf>,

    /// Server URL, e.g. http://127.0.0.1:50051 (overrides config)
    #[arg(long, global = true)]
    server: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Connect, report heartbeat latency, disconnect
    Ping,

    /// Execute one command on the server
    Exec {
        /// Command text; multiple words are joined with spaces
        #[arg(required = true, trailing_var_arg = true, allow_hyphen_values = true)]
        command: Vec<String>,
    },

    /// Stream server log records until Ctrl+C or connection loss
    Logs,

    /// Read or replace the server's interface set
    #[command(subcommand)]
    Interfaces(InterfaceCommands),

    /// Stream logs and heartbeat latency together
    Watch,
}

#[derive(Subcommand)]
enum InterfaceCommands {
    /// Fetch the interface set as JSON
    Get {
        /// Write to this file instead of stdout
        #[arg(long, short)]
        output: Option<PathBuf>,
    },

    /// Replace the interface set from a JSON file
    Apply {
        /// JSON file produced by `interfaces get` (or written by hand)
        file: PathBuf,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let config = CliConfig::load(cli.config.as_deref(), cli.server.as_deref())
        .context("Failed to load configuration")?;
    config
        .validate()
        .map_err(anyhow::Error::msg)
        .context("Invalid configuration")?;

    let tracing_config = logging::TracingConfig::from_settings(&config.log_level, config.log_format)
        .map_err(anyhow::Error::msg)?;
    logging::init(&tracing_config).map_err(anyhow::Error::msg)?;

    match cli.command {
        Commands::Ping => commands::ping(&config).await,
        Commands::Exec { command } => commands::exec(&config, &command).await,
        Commands::Logs => commands::logs(&config, false).await,
        Commands::Interfaces(InterfaceCommands::Get { output }) => {
            commands::interfaces_get(&config, output.as_deref()).await
        }
        Commands::Interfaces(InterfaceCommands::Apply { file }) => {
            commands::interfaces_apply(&config, &file).await
        }
        Commands::Watch => commands::logs(&config, true).await,
    }
}
