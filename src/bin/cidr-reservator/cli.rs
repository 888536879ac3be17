//! CLI argument parsing and command dispatch.
//!
//! Uses clap derive macros for declarative argument definition with
//! support for environment variables and global options.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use anyhow::Result;
use cidr_reservator::RedbReservationStore;
use cidr_reservator::ReservatorConfig;
use cidr_reservator::load_config;
use clap::Args;
use clap::Parser;
use tokio_util::sync::CancellationToken;
use tracing::debug;
use tracing::warn;

use crate::commands::CommandContext;
use crate::commands::ReservationCommand;

/// Command-line interface for CIDR reservations.
#[derive(Parser)]
#[command(name = "cidr-reservator")]
#[command(version)]
#[command(about = "Allocate non-overlapping named subnets from a shared base range")]
#[command(long_about = "Allocate, release and inspect named CIDR reservations. \
    Concurrent invocations against the same store never receive overlapping blocks.")]
#[command(propagate_version = true)]
#[command(arg_required_else_help = true)]
pub struct Cli {
    #[command(flatten)]
    pub global: GlobalOptions,

    #[command(subcommand)]
    pub command: ReservationCommand,
}

/// Global options available to all commands.
#[derive(Args, Clone)]
pub struct GlobalOptions {
    /// TOML configuration file.
    ///
    /// Can also be set via CIDR_RESERVATOR_CONFIG environment variable.
    #[arg(long, env = "CIDR_RESERVATOR_CONFIG", global = true)]
    pub config: Option<PathBuf>,

    /// Path of the reservation database file.
    #[arg(long = "store", global = true)]
    pub store_path: Option<PathBuf>,

    /// Read-modify-write attempts per operation.
    #[arg(long, global = true)]
    pub max_attempts: Option<u32>,

    /// Backoff unit in milliseconds between attempts.
    #[arg(long, global = true)]
    pub backoff_unit_ms: Option<u64>,

    /// Output JSON instead of human-readable format.
    #[arg(long = "json", global = true)]
    pub is_json: bool,

    /// Enable verbose logging.
    #[arg(short = 'v', long = "verbose", global = true)]
    pub is_verbose: bool,

    /// Suppress all logging output (warnings, debug messages).
    ///
    /// Useful for scripting and when parsing JSON output.
    #[arg(short = 'q', long = "quiet", global = true)]
    pub is_quiet: bool,
}

impl GlobalOptions {
    /// Command-line layer of the configuration.
    fn overrides(&self) -> ReservatorConfig {
        let defaults = ReservatorConfig::default();
        ReservatorConfig {
            store_path: self.store_path.clone().unwrap_or(defaults.store_path),
            max_attempts: self.max_attempts.unwrap_or(defaults.max_attempts),
            backoff_unit_ms: self.backoff_unit_ms.unwrap_or(defaults.backoff_unit_ms),
        }
    }
}

impl Cli {
    /// Run the CLI command.
    pub async fn run(self) -> Result<()> {
        // Handle commands that don't touch the store first
        if let ReservationCommand::Key(args) = self.command {
            return args.run(self.global.is_json);
        }

        let config =
            load_config(self.global.config.as_deref(), self.global.overrides()).context("failed to load configuration")?;
        debug!(store = %config.store_path.display(), max_attempts = config.max_attempts, "loaded configuration");

        let store = RedbReservationStore::new(&config.store_path)
            .with_context(|| format!("failed to open reservation store {}", config.store_path.display()))?;

        let cancel = CancellationToken::new();
        spawn_interrupt_handler(cancel.clone());

        let context = CommandContext {
            store: Arc::new(store),
            retry: config.retry_config(),
            cancel,
        };

        self.command.run(&context, self.global.is_json).await
    }
}

/// Cancel in-flight operations on Ctrl-C.
fn spawn_interrupt_handler(cancel: CancellationToken) {
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => {
                warn!("interrupt received, cancelling");
                cancel.cancel();
            }
            Err(e) => warn!(error = %e, "failed to listen for interrupt"),
        }
    });
}
