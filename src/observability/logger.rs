//! Log plumbing
//!
//! The binary installs a `tracing` subscriber (plain or JSON lines). The
//! provider reports its own messages through the `log` callback; those are
//! re-emitted under the `aerocluster::provider` target at the matching level.

use std::fmt;

use tracing::{debug, error, info, warn};
use tracing_subscriber::EnvFilter;

/// Log severity reported by the provider
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum ProviderLogLevel {
    /// Debug-level detail, only forwarded in debug mode
    Debug = 0,
    /// Normal operations
    Info = 1,
    /// Recoverable issues
    Warn = 2,
    /// Operation failures
    Error = 3,
    /// Unrecoverable for the provider
    Fatal = 4,
}

impl ProviderLogLevel {
    /// Returns the string representation
    pub fn as_str(&self) -> &'static str {
        match self {
            ProviderLogLevel::Debug => "DEBUG",
            ProviderLogLevel::Info => "INFO",
            ProviderLogLevel::Warn => "WARN",
            ProviderLogLevel::Error => "ERROR",
            ProviderLogLevel::Fatal => "FATAL",
        }
    }
}

impl fmt::Display for ProviderLogLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Forwards provider log callbacks into `tracing`.
#[derive(Debug, Clone, Copy, Default)]
pub struct ProviderLogBridge {
    debug: bool,
}

impl ProviderLogBridge {
    /// Create a bridge; debug messages pass through only when `debug` is set.
    pub fn new(debug: bool) -> Self {
        Self { debug }
    }

    /// Whether a message at `level` would be emitted.
    pub fn enabled(&self, level: ProviderLogLevel) -> bool {
        level != ProviderLogLevel::Debug || self.debug
    }

    /// Emit one provider message.
    pub fn log(&self, level: ProviderLogLevel, message: &str) {
        if !self.enabled(level) {
            return;
        }
        match level {
            ProviderLogLevel::Debug => debug!(target: "aerocluster::provider", "{}", message),
            ProviderLogLevel::Info => info!(target: "aerocluster::provider", "{}", message),
            ProviderLogLevel::Warn => warn!(target: "aerocluster::provider", "{}", message),
            ProviderLogLevel::Error | ProviderLogLevel::Fatal => {
                error!(target: "aerocluster::provider", level = level.as_str(), "{}", message)
            }
        }
    }
}

/// Install the global subscriber.
///
/// The filter comes from `RUST_LOG`, defaulting to `info`. Calling this more
/// than once is harmless; later calls are ignored.
pub fn init_logging(json: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr);
    let _ = if json {
        builder.json().try_init()
    } else {
        builder.try_init()
    };
}
