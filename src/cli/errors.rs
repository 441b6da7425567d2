//! Errors reported by the aerocluster binary
//!
//! Each code has its own exit status so scripts can tell a bad config from
//! a node that never became ready.

use std::fmt;
use std::io;

use crate::replication::{ReplicationError, ReplicationErrorKind};

/// What went wrong, as seen by an operator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CliErrorCode {
    /// Config file unreadable or invalid
    ConfigError,
    /// Result could not be written out
    OutputFailed,
    /// Provider init or connect failed
    BootFailed,
    /// Node did not reach Synced before the timeout
    NotReady,
}

impl CliErrorCode {
    /// Stable name printed with the message.
    pub fn code(&self) -> &'static str {
        match self {
            Self::ConfigError => "AERO_CLI_CONFIG_ERROR",
            Self::OutputFailed => "AERO_CLI_OUTPUT_FAILED",
            Self::BootFailed => "AERO_CLI_BOOT_FAILED",
            Self::NotReady => "AERO_CLI_NOT_READY",
        }
    }

    /// Process exit status.
    pub fn exit_code(&self) -> i32 {
        match self {
            Self::OutputFailed => 1,
            Self::ConfigError => 2,
            Self::BootFailed => 3,
            Self::NotReady => 4,
        }
    }
}

#[derive(Debug)]
pub struct CliError {
    code: CliErrorCode,
    message: String,
}

impl CliError {
    pub fn new(code: CliErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }

    pub fn config_error(msg: impl Into<String>) -> Self {
        Self::new(CliErrorCode::ConfigError, msg)
    }

    pub fn output_failed(msg: impl Into<String>) -> Self {
        Self::new(CliErrorCode::OutputFailed, msg)
    }

    pub fn boot_failed(msg: impl Into<String>) -> Self {
        Self::new(CliErrorCode::BootFailed, msg)
    }

    pub fn not_ready(timeout_ms: u64) -> Self {
        Self::new(
            CliErrorCode::NotReady,
            format!("node not synced after {} ms", timeout_ms),
        )
    }

    pub fn code(&self) -> &CliErrorCode {
        &self.code
    }

    pub fn code_str(&self) -> &'static str {
        self.code.code()
    }

    pub fn exit_code(&self) -> i32 {
        self.code.exit_code()
    }

    pub fn message(&self) -> &str {
        &self.message
    }
}

impl fmt::Display for CliError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.code.code(), self.message)
    }
}

impl std::error::Error for CliError {}

impl From<io::Error> for CliError {
    fn from(e: io::Error) -> Self {
        Self::output_failed(e.to_string())
    }
}

impl From<ReplicationError> for CliError {
    fn from(e: ReplicationError) -> Self {
        match e.kind {
            ReplicationErrorKind::ConfigurationError => Self::config_error(e.message),
            _ => Self::boot_failed(e.to_string()),
        }
    }
}

pub type CliResult<T> = Result<T, CliError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_configuration_errors_keep_their_class() {
        let err: CliError = ReplicationError::configuration_error("slave_threads must be > 0").into();
        assert_eq!(err.code(), &CliErrorCode::ConfigError);
        assert_eq!(err.message(), "slave_threads must be > 0");
        assert_eq!(err.exit_code(), 2);
    }

    #[test]
    fn test_other_replication_errors_fail_boot() {
        let err: CliError = ReplicationError::connect_failed("refused").into();
        assert_eq!(err.code_str(), "AERO_CLI_BOOT_FAILED");
        assert!(err.to_string().contains("refused"));
        assert_eq!(err.exit_code(), 3);
    }

    #[test]
    fn test_output_and_readiness_codes() {
        let err: CliError = io::Error::new(io::ErrorKind::BrokenPipe, "pipe closed").into();
        assert_eq!(err.code(), &CliErrorCode::OutputFailed);
        assert_eq!(err.exit_code(), 1);

        let err = CliError::not_ready(250);
        assert_eq!(err.to_string(), "AERO_CLI_NOT_READY: node not synced after 250 ms");
        assert_eq!(err.exit_code(), 4);
    }
}
