//! CLI command implementations
//!
//! `status` boots a full node against the configured provider, so it runs
//! the same startup sequence a database process would.

use std::io::{self, Write};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use tracing::info;

use crate::provider::ProviderRegistry;
use crate::replication::{NodeCollaborators, NodeReplication, ReplicationConfig, StatusSnapshot};

use super::args::{Cli, Command};
use super::errors::{CliError, CliResult};

/// Parse arguments, install logging and run the command.
pub fn run() -> CliResult<()> {
    let cli = Cli::parse_args();
    crate::observability::init_logging(cli.log_json);
    run_command(cli.command)
}

/// Run the appropriate command based on CLI args
pub fn run_command(cmd: Command) -> CliResult<()> {
    match cmd {
        Command::CheckConfig { config } => check_config(&config),
        Command::Status { config, timeout_ms } => status(&config, timeout_ms),
    }
}

/// Load and validate a configuration file
pub fn check_config(config_path: &Path) -> CliResult<()> {
    let config = load_config(config_path)?;
    info!(
        path = %config_path.display(),
        provider = %config.provider,
        cluster = %config.cluster_name,
        "configuration valid"
    );
    write_line(&format!("{}: ok", config_path.display()))
}

/// Boot the node, wait for readiness, print its status and stop
pub fn status(config_path: &Path, timeout_ms: u64) -> CliResult<()> {
    let config = load_config(config_path)?;
    let snapshot = boot_and_capture(config, Arc::new(ProviderRegistry::new()), timeout_ms)?;
    let json = snapshot.to_json_pretty()?;
    write_line(&json)
}

/// Start a node, capture its status once ready and shut it down again.
pub fn boot_and_capture(
    config: ReplicationConfig,
    registry: Arc<ProviderRegistry>,
    timeout_ms: u64,
) -> CliResult<StatusSnapshot> {
    let node = NodeReplication::new(config, registry, NodeCollaborators::default())?;
    let mode = match node.start() {
        Ok(mode) => mode,
        Err(e) => {
            node.shutdown();
            return Err(e.into());
        }
    };
    info!(mode = ?mode, "node started");

    let ready = node.gate().ready_wait_timeout(Duration::from_millis(timeout_ms));
    let snapshot = node.status();
    node.shutdown();

    if !ready {
        return Err(CliError::not_ready(timeout_ms));
    }
    Ok(snapshot)
}

fn load_config(path: &Path) -> CliResult<ReplicationConfig> {
    let config = ReplicationConfig::from_file(path)?;
    config.validate()?;
    Ok(config)
}

fn write_line(text: &str) -> CliResult<()> {
    let stdout = io::stdout();
    let mut out = stdout.lock();
    writeln!(out, "{}", text)?;
    out.flush()?;
    Ok(())
}
