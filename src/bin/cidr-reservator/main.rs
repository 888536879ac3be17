//! cidr-reservator - allocate named subnets from a shared base range.
//!
//! # Usage
//!
//! ```bash
//! # Reserve a /22 for the build cluster
//! cidr-reservator --store ./pool.redb allocate build --base-range 10.116.0.0/14 --prefix-length 22
//!
//! # Inspect and release
//! cidr-reservator --store ./pool.redb list --base-range 10.116.0.0/14
//! cidr-reservator --store ./pool.redb release build --base-range 10.116.0.0/14
//!
//! # JSON output for scripting
//! cidr-reservator --json show build --base-range 10.116.0.0/14 | jq -r '.block'
//! ```
//!
//! Ctrl-C abandons the operation in flight unless its write has already been
//! issued; that write is allowed to finish and its result is printed.

mod cli;
mod commands;
mod output;

use anyhow::Result;
use clap::Parser;
use tracing_subscriber::EnvFilter;

use cli::Cli;

/// Initialize tracing subscriber with environment-based filtering.
///
/// - `quiet`: Suppress all logging output (for scripting)
/// - `verbose`: Enable debug-level logging
fn init_tracing(quiet: bool, verbose: bool) {
    let filter = if quiet {
        EnvFilter::new("off")
    } else if verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"))
    };

    tracing_subscriber::fmt().with_env_filter(filter).with_target(false).compact().init();
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    init_tracing(cli.global.is_quiet, cli.global.is_verbose);

    cli.run().await
}
