//! Replication Configuration
//!
//! Loaded once at startup from a JSON file. Every field has a default so a
//! minimal file (or none at all) yields a node with replication disabled.

use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use super::errors::{ReplicationError, ReplicationResult};

/// Provider spec that disables replication.
pub const PROVIDER_NONE: &str = "none";

/// Incoming address sentinel that triggers local address detection.
pub const NODE_INCOMING_AUTO: &str = "AUTO";

/// Highest application protocol version this node understands.
pub const MAX_PROTOCOL_VERSION: i32 = 1;

/// Replication configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReplicationConfig {
    /// Provider to load, "none" disables replication
    #[serde(default = "default_provider")]
    pub provider: String,

    /// Logical cluster name, must match on all members
    #[serde(default = "default_cluster_name")]
    pub cluster_name: String,

    /// Group address to connect to; empty means "wait for configuration"
    #[serde(default)]
    pub cluster_address: String,

    /// Human readable node name
    #[serde(default = "default_node_name")]
    pub node_name: String,

    /// Address clients reach this node at, "AUTO" to detect
    #[serde(default = "default_node_incoming_address")]
    pub node_incoming_address: String,

    /// Opaque option string handed to the provider
    #[serde(default)]
    pub provider_options: String,

    /// Preferred state transfer donor
    #[serde(default)]
    pub sst_donor: String,

    /// Data directory passed to the provider
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,

    /// Number of applier threads
    #[serde(default = "default_slave_threads")]
    pub slave_threads: usize,

    /// Highest protocol version offered to the provider
    #[serde(default = "default_max_protocol_version")]
    pub max_protocol_version: i32,

    /// Certify rows of tables without a primary key at table level
    #[serde(default = "default_true")]
    pub certify_non_pk: bool,

    /// Default causal reads setting for new sessions
    #[serde(default)]
    pub causal_reads: bool,

    /// Keep auto-increment ranges disjoint across members
    #[serde(default = "default_true")]
    pub auto_increment_control: bool,

    /// Forward provider debug messages to the log
    #[serde(default)]
    pub debug: bool,

    /// Largest replicated statement buffer in bytes
    #[serde(default = "default_max_ws_size")]
    pub max_ws_size: usize,

    /// Storage engines are initialised only after the first state transfer
    #[serde(default)]
    pub sst_init_engines_first: bool,

    /// How often a blocked ready wait logs that it is still waiting
    #[serde(default = "default_ready_wait_log_interval_ms")]
    pub ready_wait_log_interval_ms: u64,
}

fn default_provider() -> String {
    PROVIDER_NONE.to_string()
}

fn default_cluster_name() -> String {
    "aerocluster".to_string()
}

fn default_node_name() -> String {
    "node".to_string()
}

fn default_node_incoming_address() -> String {
    NODE_INCOMING_AUTO.to_string()
}

fn default_data_dir() -> PathBuf {
    PathBuf::from("./data")
}

fn default_slave_threads() -> usize {
    1
}

fn default_max_protocol_version() -> i32 {
    MAX_PROTOCOL_VERSION
}

fn default_true() -> bool {
    true
}

fn default_max_ws_size() -> usize {
    1_073_741_824
} // 1GB

fn default_ready_wait_log_interval_ms() -> u64 {
    5_000
}

impl Default for ReplicationConfig {
    fn default() -> Self {
        Self {
            provider: default_provider(),
            cluster_name: default_cluster_name(),
            cluster_address: String::new(),
            node_name: default_node_name(),
            node_incoming_address: default_node_incoming_address(),
            provider_options: String::new(),
            sst_donor: String::new(),
            data_dir: default_data_dir(),
            slave_threads: default_slave_threads(),
            max_protocol_version: default_max_protocol_version(),
            certify_non_pk: true,
            causal_reads: false,
            auto_increment_control: true,
            debug: false,
            max_ws_size: default_max_ws_size(),
            sst_init_engines_first: false,
            ready_wait_log_interval_ms: default_ready_wait_log_interval_ms(),
        }
    }
}

impl ReplicationConfig {
    /// Configuration with replication disabled.
    pub fn disabled() -> Self {
        Self::default()
    }

    /// Configuration for the given provider and cluster address.
    pub fn with_provider(provider: impl Into<String>, cluster_address: impl Into<String>) -> Self {
        Self {
            provider: provider.into(),
            cluster_address: cluster_address.into(),
            ..Self::default()
        }
    }

    /// Parse a configuration from JSON text and validate it.
    pub fn from_json_str(json: &str) -> ReplicationResult<Self> {
        let config: Self = serde_json::from_str(json).map_err(|e| {
            ReplicationError::configuration_error(format!("invalid configuration: {}", e))
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Load and validate a configuration file.
    pub fn from_file(path: &Path) -> ReplicationResult<Self> {
        let json = fs::read_to_string(path).map_err(|e| {
            ReplicationError::configuration_error(format!(
                "cannot read configuration {}: {}",
                path.display(),
                e
            ))
        })?;
        Self::from_json_str(&json)
    }

    /// Validate the configuration.
    pub fn validate(&self) -> ReplicationResult<()> {
        if self.slave_threads == 0 {
            return Err(ReplicationError::configuration_error(
                "slave_threads must be at least 1",
            ));
        }
        if self.max_protocol_version < 0 || self.max_protocol_version > MAX_PROTOCOL_VERSION {
            return Err(ReplicationError::configuration_error(format!(
                "max_protocol_version {} is not supported (highest supported: {})",
                self.max_protocol_version, MAX_PROTOCOL_VERSION
            )));
        }
        if self.cluster_name.trim().is_empty() {
            return Err(ReplicationError::configuration_error(
                "cluster_name must not be empty",
            ));
        }
        if self.max_ws_size == 0 {
            return Err(ReplicationError::configuration_error(
                "max_ws_size must be positive",
            ));
        }
        Ok(())
    }

    /// Whether the provider spec is the disabled sentinel.
    pub fn is_provider_disabled(&self) -> bool {
        is_disabled_spec(&self.provider)
    }

    /// Whether a cluster address is configured.
    pub fn has_cluster_address(&self) -> bool {
        !self.cluster_address.trim().is_empty()
    }

    /// Whether the incoming address should be detected.
    pub fn wants_incoming_auto(&self) -> bool {
        let address = self.node_incoming_address.trim();
        address.is_empty() || address == NODE_INCOMING_AUTO
    }
}

/// Whether a provider spec names the disabled sentinel.
pub fn is_disabled_spec(spec: &str) -> bool {
    let spec = spec.trim();
    spec.is_empty() || spec.eq_ignore_ascii_case(PROVIDER_NONE)
}
