//! CLI command definitions using clap.

#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]
#![deny(clippy::panic)]

use std::path::PathBuf;

use clap::{Parser, Subcommand};

/// Steward - finalizer-governed reconciliation
#[derive(Parser, Debug)]
#[command(name = "steward")]
#[command(version)]
#[command(about = "Reconcile connection declarations into a backing table")]
#[command(
    long_about = "Steward drives a backing table toward the connections it is told about, \
                  claiming each declaration with a finalizer so that cleanup always runs \
                  before removal."
)]
pub struct Cli {
    /// Configuration file (TOML)
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Reconcile declarations until interrupted
    Run {
        /// JSON file with an array of connection specs to declare at startup
        #[arg(short, long)]
        declarations: Option<PathBuf>,
    },

    /// Walk through create, conflict and delete, then exit
    Demo {
        /// Seconds to wait for each step to settle
        #[arg(long, default_value_t = 30)]
        timeout_secs: u64,
    },

    /// Validate the configuration and print it
    CheckConfig,
}
