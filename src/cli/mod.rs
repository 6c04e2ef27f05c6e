//! Command-line interface for operating an agentstore database.

pub mod commands;
pub mod output;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};

use crate::domain::models::Config;
use crate::infrastructure::config::ConfigLoader;
use crate::infrastructure::logging::{scrub_message, LogConfig, LoggerImpl};
use commands::admin::AdminArgs;
use commands::migrate::MigrateArgs;

#[derive(Parser, Debug)]
#[command(name = "agentstore", version, about = "Multi-tenant agent storage on PostgreSQL")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Output in JSON format
    #[arg(short, long, global = true)]
    pub json: bool,

    /// Configuration file (defaults to agentstore.yaml and agentstore.local.yaml)
    #[arg(short, long, global = true, env = "AGENTSTORE_CONFIG")]
    pub config: Option<PathBuf>,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Schema migrations
    Migrate(MigrateArgs),
    /// Cross-tenant administration (requires database.admin_url)
    Admin(AdminArgs),
}

pub fn load_config(path: Option<&Path>) -> Result<Config> {
    match path {
        Some(path) => ConfigLoader::load_from_file(path),
        None => ConfigLoader::load(),
    }
}

/// Load configuration, start logging and dispatch the command.
pub async fn run(cli: Cli) -> Result<()> {
    let config = load_config(cli.config.as_deref()).context("Failed to load configuration")?;
    let log_config = LogConfig::try_from(&config.logging)?;
    let _logger = LoggerImpl::init(&log_config).context("Failed to initialize logging")?;

    match cli.command {
        Commands::Migrate(args) => commands::migrate::execute(args, &config, cli.json).await,
        Commands::Admin(args) => commands::admin::execute(args, &config, cli.json).await,
    }
}

/// Print the error in the requested format and exit with status 1.
pub fn handle_error(err: anyhow::Error, json_mode: bool) -> ! {
    let message = scrub_message(&format!("{err:#}"));
    if json_mode {
        println!("{}", serde_json::json!({ "error": message }));
    } else {
        eprintln!("Error: {message}");
    }
    std::process::exit(1)
}
