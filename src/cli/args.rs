//! CLI argument definitions using clap
//!
//! Commands:
//! - aerocluster check-config --config <path>
//! - aerocluster status --config <path> [--timeout-ms <ms>]

use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// aerocluster - node-side coordinator for synchronous multi-master replication
#[derive(Parser, Debug)]
#[command(name = "aerocluster")]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// Emit logs as JSON lines
    #[arg(long, global = true)]
    pub log_json: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Validate a replication configuration file
    CheckConfig {
        /// Path to configuration file
        #[arg(long, default_value = "./aerocluster.json")]
        config: PathBuf,
    },

    /// Boot the node, wait for readiness and print its status
    Status {
        /// Path to configuration file
        #[arg(long, default_value = "./aerocluster.json")]
        config: PathBuf,

        /// How long to wait for the node to become ready
        #[arg(long, default_value_t = 10_000)]
        timeout_ms: u64,
    },
}

impl Cli {
    /// Parse command line arguments
    pub fn parse_args() -> Self {
        Cli::parse()
    }
}
