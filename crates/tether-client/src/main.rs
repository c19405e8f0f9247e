//! Tether CLI
//!
//! Thin binary around the client library: argument parsing, logging
//! setup, configuration load, and command dispatch. The interactive
//! machinery lives in the library modules.

use std::fs::OpenOptions;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use tether_client::commands;
use tether_client::output::print_warning;
use tether_core::config::{self, ClientConfig};

#[derive(Parser)]
#[command(name = "tether")]
#[command(author, version, about = "Attach a local terminal to a remote session")]
#[command(propagate_version = true)]
struct Cli {
    /// Path to configuration file
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Enable verbose output
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Suppress all output except errors
    #[arg(short, long, global = true)]
    quiet: bool,

    /// Write diagnostic logs to this file instead of the terminal
    #[arg(long, global = true, env = "TETHER_DEBUG_LOG")]
    debug_log: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Connect the local terminal to a remote session
    Connect {
        /// Session name or id
        session: String,

        /// API token for session lookup
        #[arg(long, env = "TETHER_TOKEN", hide_env_values = true)]
        token: String,

        /// Replicate remote file changes into the local workspace
        #[arg(long)]
        sync_back: bool,

        /// Local directory sync-back writes into (defaults to the
        /// current directory)
        #[arg(long)]
        workspace: Option<PathBuf>,

        /// Do not reconnect automatically after a dropped connection
        #[arg(long)]
        no_reconnect: bool,
    },

    /// Restore a terminal left in a bad state by a killed session
    ResetTerminal,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    init_logging(&cli)?;

    let config_path = cli
        .config
        .clone()
        .unwrap_or_else(config::default_config_path);
    let mut client_config = if config_path.exists() {
        config::load_config::<ClientConfig>(&config_path).unwrap_or_else(|e| {
            print_warning(&format!("Ignoring config at {:?}: {}", config_path, e));
            ClientConfig::default()
        })
    } else {
        ClientConfig::default()
    };

    match cli.command {
        Commands::Connect {
            session,
            token,
            sync_back,
            workspace,
            no_reconnect,
        } => {
            if sync_back {
                client_config.sync_back = true;
            }
            if let Some(dir) = workspace {
                client_config.workspace_dir = Some(dir);
            }
            if no_reconnect {
                client_config.reconnect.auto = false;
            }

            let code = commands::connect_command(&client_config, &session, &token).await?;
            if code != 0 {
                std::process::exit(code);
            }
            Ok(())
        }

        Commands::ResetTerminal => {
            commands::reset_command();
            Ok(())
        }
    }
}

/// Route tracing output away from the interactive display.
///
/// With a debug-log file, everything goes there (no ANSI). Otherwise
/// stderr gets a quiet default scaled by -v/-q, overridable via
/// RUST_LOG.
fn init_logging(cli: &Cli) -> Result<()> {
    let log_level = match (cli.quiet, cli.verbose) {
        (true, _) => "error",
        (false, 0) => "warn",
        (false, 1) => "info",
        (false, 2) => "debug",
        (false, _) => "trace",
    };
    let filter = tracing_subscriber::EnvFilter::new(
        std::env::var("RUST_LOG").unwrap_or_else(|_| log_level.into()),
    );

    match &cli.debug_log {
        Some(path) => {
            let file = OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)
                .with_context(|| format!("cannot open debug log at {:?}", path))?;
            tracing_subscriber::registry()
                .with(filter)
                .with(
                    tracing_subscriber::fmt::layer()
                        .with_writer(Arc::new(file))
                        .with_ansi(false),
                )
                .init();
        }
        None => {
            tracing_subscriber::registry()
                .with(filter)
                .with(
                    tracing_subscriber::fmt::layer()
                        .with_writer(std::io::stderr)
                        .with_target(false),
                )
                .init();
        }
    }

    Ok(())
}
