// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! # Profit Guardian CLI
//!
//! The `guardian` binary runs the budget-pacing and profitability-guard
//! control loop for one managed ads account.
//!
//! ## Commands
//!
//! - `guardian serve` - Run the tick scheduler and the HTTP status/control API
//! - `guardian tick` - Run exactly one tick and print the outcome
//! - `guardian config show|validate|generate` - Configuration management
//!
//! The guardian starts disarmed unless the manifest sets `start_enabled` or
//! `serve --enable` is passed; arming/disarming at runtime goes through the
//! HTTP API.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;

mod commands;

use commands::{config::ConfigCommand, serve};

/// Profit Guardian - autonomous spend protection for managed ad entities
#[derive(Parser)]
#[command(name = "guardian")]
#[command(version, about, long_about = None)]
#[command(propagate_version = true)]
struct Cli {
    /// Path to the guardian manifest
    #[arg(
        short,
        long,
        global = true,
        env = "GUARDIAN_CONFIG_PATH",
        value_name = "FILE",
        default_value = "./guardian.yaml"
    )]
    config: PathBuf,

    /// HTTP API host (overrides the manifest)
    #[arg(long, global = true, env = "GUARDIAN_HOST")]
    host: Option<String>,

    /// HTTP API port (overrides the manifest)
    #[arg(long, global = true, env = "GUARDIAN_PORT")]
    port: Option<u16>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, global = true, env = "GUARDIAN_LOG_LEVEL", default_value = "info")]
    log_level: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the guardian: tick scheduler plus HTTP status/control API
    Serve {
        /// Arm the guardian immediately, regardless of the manifest
        #[arg(long)]
        enable: bool,
    },

    /// Run exactly one guardian tick and print its outcome
    Tick,

    /// Configuration management
    #[command(name = "config")]
    Config {
        #[command(subcommand)]
        command: ConfigCommand,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    // Pick up GUARDIAN_PLATFORM_TOKEN and friends from a local .env.
    dotenvy::dotenv().ok();

    let cli = Cli::parse();
    init_logging(&cli.log_level)?;

    match cli.command {
        Commands::Serve { enable } => {
            serve::serve(&cli.config, cli.host, cli.port, enable).await
        }
        Commands::Tick => serve::tick_once(&cli.config).await,
        Commands::Config { command } => commands::config::handle_command(command, &cli.config),
    }
}

/// Initialize tracing subscriber for logging
fn init_logging(level: &str) -> Result<()> {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .or_else(|_| tracing_subscriber::EnvFilter::try_new(level))
        .context("Failed to create log filter")?;

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false)
        .compact()
        .init();

    Ok(())
}
