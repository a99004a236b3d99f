//! CLI command definitions using clap.

use std::path::PathBuf;

use clap::{Parser, Subcommand, ValueEnum};

/// Seedkeeper - owned seed records for key-value tables
#[derive(Parser, Debug)]
#[command(name = "seedkeeper")]
#[command(version)]
#[command(about = "Keeps declared seed records in a key-value table")]
#[command(
    long_about = "Seedkeeper handles Create/Update/Delete lifecycle events by replacing the records it owns in a table with the declared set, leaving every other record alone."
)]
pub struct Cli {
    /// Config file (TOML, or JSON with a .json extension)
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// Directory holding one JSON file per table
    #[arg(long, global = true)]
    pub store_dir: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Handle one lifecycle event envelope
    Dispatch {
        /// Event file path, or - for stdin
        #[arg(short, long)]
        event: String,

        /// Where the outcome report goes
        #[arg(long, value_enum, default_value_t = ReporterKind::Stdout)]
        reporter: ReporterKind,
    },

    /// Replace the owned records of a table with a declared set
    Reconcile {
        /// Table name
        #[arg(short, long)]
        table: String,

        /// Name of the key attribute
        #[arg(long)]
        hash_key: String,

        /// File holding a JSON array of records
        #[arg(short, long)]
        items: PathBuf,
    },

    /// Print the records of a table
    Scan {
        /// Table name
        #[arg(short, long)]
        table: String,

        /// Name of the key attribute
        #[arg(long)]
        hash_key: String,

        /// Only records carrying the ownership marker
        #[arg(long, default_value_t = false)]
        owned: bool,
    },
}

/// Outcome report destination.
#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ReporterKind {
    /// One JSON line on stdout
    #[default]
    Stdout,
    /// PUT to the event's ResponseURL
    Http,
}
