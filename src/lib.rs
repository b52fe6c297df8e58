//! rguestlog library root.
//! Exposes the engine, the transport layer, the CLI parser and the async
//! `run()` entry point used by main.rs.

pub mod cli;
pub mod config;
pub mod core;
pub mod db;
pub mod errors;
pub mod logging;
pub mod models;
pub mod server;
pub mod ui;
pub mod utils;

use clap::Parser;
use cli::parser::{Cli, Commands};
use config::Config;
use errors::AppResult;
use std::path::{Path, PathBuf};

/// Central command dispatcher
pub async fn dispatch(cli: &Cli, cfg: &Config) -> AppResult<()> {
    match &cli.command {
        Commands::Init { .. } => cli::commands::init::handle(cli),
        Commands::Serve { .. } => cli::commands::serve::handle(&cli.command, cfg).await,
        Commands::Cleanup { .. } => cli::commands::cleanup::handle(&cli.command, cfg).await,
        Commands::Staff { .. } => cli::commands::staff::handle(&cli.command, cfg),
    }
}

/// Entry point used by main.rs
pub async fn run() -> AppResult<()> {
    let cli = Cli::parse();

    let path = cli
        .config
        .as_ref()
        .map(PathBuf::from)
        .unwrap_or_else(Config::config_file);

    // `init` creates the file; every other command needs it.
    let mut cfg = match &cli.command {
        Commands::Init { .. } if !path.exists() => Config::in_dir(path.parent().unwrap_or(Path::new("."))),
        _ => Config::load(&path)?,
    };

    if let Some(custom_db) = &cli.db {
        cfg.database = custom_db.clone();
    }
    if let Some(level) = &cli.log_level {
        cfg.log.level = level.clone();
    }

    logging::init(&cfg.log.level, cfg.log.file.as_deref().map(Path::new))?;

    dispatch(&cli, &cfg).await
}
