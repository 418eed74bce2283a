// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! # Caretaker Tenancy CLI
//!
//! The `caretaker` binary runs the tenant-isolation daemon and manages its
//! configuration.
//!
//! ## Commands
//!
//! - `caretaker serve` - Run the HTTP ingress and WebSocket channel
//! - `caretaker config show|validate|generate` - Configuration management
//! - `caretaker token issue` - Mint a development token (HS256 only)

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use colored::Colorize;
use std::path::PathBuf;

use caretaker_cli::commands::{self, ConfigCommand, TokenCommand};
use caretaker_cli::daemon;

/// Caretaker - tenant isolation for the facility-maintenance backend
#[derive(Parser)]
#[command(name = "caretaker")]
#[command(version, about, long_about = None)]
#[command(propagate_version = true)]
struct Cli {
    /// Path to configuration file (overrides discovery)
    #[arg(
        short,
        long,
        global = true,
        env = "CARETAKER_CONFIG_PATH",
        value_name = "FILE"
    )]
    config: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, global = true, env = "CARETAKER_LOG_LEVEL", default_value = "info")]
    log_level: String,

    /// Log format (text, json)
    #[arg(long, global = true, env = "CARETAKER_LOG_FORMAT", default_value = "text")]
    log_format: String,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the tenancy daemon
    #[command(name = "serve")]
    Serve {
        /// Bind address (overrides spec.network.bind_address)
        #[arg(long, env = "CARETAKER_HOST")]
        host: Option<String>,

        /// HTTP port (overrides spec.network.port)
        #[arg(long, env = "CARETAKER_PORT")]
        port: Option<u16>,
    },

    /// Configuration management
    #[command(name = "config")]
    Config {
        #[command(subcommand)]
        command: ConfigCommand,
    },

    /// Development token helpers
    #[command(name = "token")]
    Token {
        #[command(subcommand)]
        command: TokenCommand,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    init_logging(&cli.log_level, &cli.log_format)?;

    match cli.command {
        Some(Commands::Serve { host, port }) => daemon::start_daemon(cli.config, host, port).await,
        Some(Commands::Config { command }) => commands::config::handle_command(command, cli.config).await,
        Some(Commands::Token { command }) => commands::token::handle_command(command, cli.config).await,
        None => {
            eprintln!("{}", "No command specified. Use --help for usage.".yellow());
            std::process::exit(1);
        }
    }
}

/// Initialize tracing subscriber for logging
fn init_logging(level: &str, format: &str) -> Result<()> {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .or_else(|_| tracing_subscriber::EnvFilter::try_new(level))
        .context("Failed to create log filter")?;

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false);

    if format.eq_ignore_ascii_case("json") {
        builder.json().init();
    } else {
        builder.with_target(true).compact().init();
    }

    Ok(())
}
