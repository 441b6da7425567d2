//! CLI module for aerocluster
//!
//! Provides command-line interface for:
//! - check-config: Validate a replication configuration
//! - status: Boot the node and print its replication status

mod args;
mod commands;
mod errors;

pub use args::{Cli, Command};
pub use commands::{boot_and_capture, check_config, run, run_command, status};
pub use errors::{CliError, CliErrorCode, CliResult};
