//! # Seedkeeper - command line entry point
//!
//! Loads configuration, installs tracing, then runs one command. A lifecycle
//! event that fails is reported to its caller and also ends the process with
//! a non-zero exit code.

#![forbid(unsafe_code)]
#![deny(clippy::unwrap_used)]
#![forbid(clippy::panic)]
#![deny(clippy::expect_used)]

use anyhow::Result;
use clap::Parser;
use tracing::info;
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

use seedkeeper::cli::Cli;
use seedkeeper::commands::execute_command;

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();

    let cli = Cli::parse();
    info!(version = env!("CARGO_PKG_VERSION"), "Seedkeeper starting");

    execute_command(cli).await
}

/// Initialize tracing subscriber with environment filter.
///
/// Logs go to stderr so stdout stays free for command output.
fn init_tracing() {
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();
}
