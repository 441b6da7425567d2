//! Replication Error Types
//!
//! Errors fall into four groups:
//! - Configuration errors, fatal at startup
//! - Transient provider errors, surfaced to the statement as retryable
//! - State inconsistencies, fatal: cluster-wide consistency cannot be
//!   repaired from a single node
//! - Local preparation failures, no side effects

use std::fmt;

/// Replication error type
#[derive(Debug, Clone)]
pub struct ReplicationError {
    /// Error kind
    pub kind: ReplicationErrorKind,
    /// Error message
    pub message: String,
}

/// Replication error kinds
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReplicationErrorKind {
    /// Malformed or unsupported configuration
    ConfigurationError,

    /// Provider could not be loaded, not even the disabled fallback
    ProviderLoad,

    /// Provider rejected initialization
    ProviderInit,

    /// Connecting to the cluster failed
    ConnectFailed,

    /// Cluster negotiated a protocol version this node cannot speak
    UnsupportedProtocol,

    /// Local anchor disagrees with the cluster (undetected state gap)
    StateInconsistency,

    /// View older than the last processed one
    StaleView,

    /// State snapshot transfer failed
    TransferFailed,

    /// Total order isolation could not be started
    ReplicationCheckFailed,

    /// Key or write-set buffer preparation failed
    WriteSetPreparation,

    /// Operation is not supported in the current context
    NotSupported,

    /// Causal read barrier failed
    ReadFailed,

    /// Operation called in a state that does not allow it
    InvalidState,

    /// Illegal member status transition attempted
    IllegalTransition,

    /// Session was closed by the replication layer
    ConnectionClosed,

    /// Transaction was aborted in favour of a certified operation
    BruteForceAborted,
}

/// Client-visible error class a statement failure is reported as.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UserErrorClass {
    /// Deadlock-class error; the client is expected to retry
    LockDeadlock,
    /// Feature is not supported in this context
    NotSupportedYet,
    /// Reading failed
    ErrorOnRead,
    /// Node or session configuration prevents the operation
    ConfigurationError,
    /// Connection was closed by the server
    ConnectionClosed,
    /// Anything else
    Internal,
}

impl UserErrorClass {
    /// Stable identifier for client protocols and logs.
    pub fn code(&self) -> &'static str {
        match self {
            Self::LockDeadlock => "LOCK_DEADLOCK",
            Self::NotSupportedYet => "NOT_SUPPORTED_YET",
            Self::ErrorOnRead => "ERROR_ON_READ",
            Self::ConfigurationError => "CONFIGURATION_ERROR",
            Self::ConnectionClosed => "CONNECTION_CLOSED",
            Self::Internal => "INTERNAL",
        }
    }
}

impl ReplicationError {
    /// Create a new replication error.
    pub fn new(kind: ReplicationErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    /// Create a configuration error.
    pub fn configuration_error(message: impl Into<String>) -> Self {
        Self::new(ReplicationErrorKind::ConfigurationError, message)
    }

    /// Create a provider load error.
    pub fn provider_load(message: impl Into<String>) -> Self {
        Self::new(ReplicationErrorKind::ProviderLoad, message)
    }

    /// Create a provider init error.
    pub fn provider_init(message: impl Into<String>) -> Self {
        Self::new(ReplicationErrorKind::ProviderInit, message)
    }

    /// Create a connect failure.
    pub fn connect_failed(message: impl Into<String>) -> Self {
        Self::new(ReplicationErrorKind::ConnectFailed, message)
    }

    /// Create an unsupported protocol error.
    pub fn unsupported_protocol(message: impl Into<String>) -> Self {
        Self::new(ReplicationErrorKind::UnsupportedProtocol, message)
    }

    /// Create a state inconsistency error.
    pub fn state_inconsistency(message: impl Into<String>) -> Self {
        Self::new(ReplicationErrorKind::StateInconsistency, message)
    }

    /// Create a stale view error.
    pub fn stale_view(message: impl Into<String>) -> Self {
        Self::new(ReplicationErrorKind::StaleView, message)
    }

    /// Create a transfer failure.
    pub fn transfer_failed(message: impl Into<String>) -> Self {
        Self::new(ReplicationErrorKind::TransferFailed, message)
    }

    /// Create a replication check failure.
    pub fn replication_check_failed(message: impl Into<String>) -> Self {
        Self::new(ReplicationErrorKind::ReplicationCheckFailed, message)
    }

    /// Create a write-set preparation error.
    pub fn write_set_preparation(message: impl Into<String>) -> Self {
        Self::new(ReplicationErrorKind::WriteSetPreparation, message)
    }

    /// Create a not supported error.
    pub fn not_supported(message: impl Into<String>) -> Self {
        Self::new(ReplicationErrorKind::NotSupported, message)
    }

    /// Create a read failure.
    pub fn read_failed(message: impl Into<String>) -> Self {
        Self::new(ReplicationErrorKind::ReadFailed, message)
    }

    /// Create an invalid state error.
    pub fn invalid_state(message: impl Into<String>) -> Self {
        Self::new(ReplicationErrorKind::InvalidState, message)
    }

    /// Create an illegal transition error.
    pub fn illegal_transition(message: impl Into<String>) -> Self {
        Self::new(ReplicationErrorKind::IllegalTransition, message)
    }

    /// Create a connection closed error.
    pub fn connection_closed(message: impl Into<String>) -> Self {
        Self::new(ReplicationErrorKind::ConnectionClosed, message)
    }

    /// Create a brute-force abort error.
    pub fn brute_force_aborted(message: impl Into<String>) -> Self {
        Self::new(ReplicationErrorKind::BruteForceAborted, message)
    }

    /// Check if this error is fatal (the process must stop).
    pub fn is_fatal(&self) -> bool {
        matches!(
            self.kind,
            ReplicationErrorKind::ProviderLoad
                | ReplicationErrorKind::UnsupportedProtocol
                | ReplicationErrorKind::StateInconsistency
        )
    }

    /// Check if the client may simply retry the statement.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self.kind,
            ReplicationErrorKind::ConnectFailed
                | ReplicationErrorKind::ReplicationCheckFailed
                | ReplicationErrorKind::ReadFailed
                | ReplicationErrorKind::BruteForceAborted
        )
    }

    /// Error class reported to the client.
    pub fn user_error_class(&self) -> UserErrorClass {
        match self.kind {
            ReplicationErrorKind::ReplicationCheckFailed
            | ReplicationErrorKind::WriteSetPreparation
            | ReplicationErrorKind::BruteForceAborted => UserErrorClass::LockDeadlock,
            ReplicationErrorKind::NotSupported => UserErrorClass::NotSupportedYet,
            ReplicationErrorKind::ReadFailed => UserErrorClass::ErrorOnRead,
            ReplicationErrorKind::ConfigurationError
            | ReplicationErrorKind::UnsupportedProtocol => UserErrorClass::ConfigurationError,
            ReplicationErrorKind::ConnectionClosed => UserErrorClass::ConnectionClosed,
            _ => UserErrorClass::Internal,
        }
    }
}

impl fmt::Display for ReplicationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ReplicationError({:?}): {}", self.kind, self.message)
    }
}

impl std::error::Error for ReplicationError {}

/// Result type for replication operations
pub type ReplicationResult<T> = Result<T, ReplicationError>;
