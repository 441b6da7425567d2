//! Replication Provider Boundary
//!
//! The provider is the external group-communication and certification
//! engine. The node talks to it through `ReplicationProvider`; the provider
//! talks back through typed `ProviderEvent`s delivered to an `EventSink`.
//!
//! Two variants satisfy the contract:
//! - `DisabledProvider`: the "none" sentinel, node runs standalone
//! - `LoadedProvider`: a provider resolved by name from the registry
//!
//! `ProviderHandle` owns whichever one is active and drives its lifecycle
//! (init, connect, disconnect, deinit).

mod disabled;
mod handle;
mod loaded;
mod loopback;
mod registry;

use std::fmt;
use std::ops::BitOr;
use std::path::PathBuf;
use std::sync::Arc;

use serde::Serialize;
use thiserror::Error;

use crate::observability::ProviderLogLevel;
use crate::replication::{Anchor, CertificationKey, ClusterView, Seqno, SessionId};

pub use disabled::DisabledProvider;
pub use handle::{ProviderHandle, ProviderMode};
pub use loaded::LoadedProvider;
pub use loopback::{LoopbackProvider, LOOPBACK_SCHEME};
pub use registry::{ProviderFactory, ProviderRegistry};

/// Status codes a provider call can fail with.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum ProviderStatus {
    #[error("minor provider warning")]
    Warning,
    #[error("transaction is not known to the provider")]
    TrxMissing,
    #[error("transaction aborted, server can continue")]
    TrxFail,
    #[error("transaction was brute-force aborted")]
    BfAbort,
    #[error("error in client connection, must abort")]
    ConnFail,
    #[error("error in node state, must reinitialise")]
    NodeFail,
    #[error("fatal provider error, server must abort")]
    Fatal,
    #[error("feature not implemented by the provider")]
    NotImplemented,
    #[error("cluster address not supported by the provider")]
    AddressNotSupported,
}

/// Result of a provider call
pub type ProviderResult<T> = Result<T, ProviderStatus>;

/// A provider could not be resolved or constructed.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("failed to load provider '{spec}': {reason}")]
pub struct ProviderLoadError {
    pub spec: String,
    pub reason: String,
}

impl ProviderLoadError {
    pub fn new(spec: impl Into<String>, reason: impl Into<String>) -> Self {
        Self {
            spec: spec.into(),
            reason: reason.into(),
        }
    }
}

/// Optional provider features.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct Capabilities(u64);

impl Capabilities {
    pub const MULTI_MASTER: Self = Self(1 << 0);
    pub const CERTIFICATION: Self = Self(1 << 1);
    pub const PARALLEL_APPLYING: Self = Self(1 << 2);
    pub const TRX_REPLAY: Self = Self(1 << 3);
    pub const ISOLATION: Self = Self(1 << 4);
    pub const PAUSE: Self = Self(1 << 5);
    pub const CAUSAL_READS: Self = Self(1 << 6);
    pub const CAUSAL_TRX: Self = Self(1 << 7);
    pub const WRITE_SET_INCREMENTS: Self = Self(1 << 8);
    pub const SESSION_LOCKS: Self = Self(1 << 9);
    pub const DISTRIBUTED_LOCKS: Self = Self(1 << 10);
    pub const CONSISTENCY_CHECK: Self = Self(1 << 11);
    pub const UNORDERED: Self = Self(1 << 12);
    pub const ANNOTATION: Self = Self(1 << 13);
    pub const PREORDERED: Self = Self(1 << 14);

    pub const fn empty() -> Self {
        Self(0)
    }

    pub const fn from_bits(bits: u64) -> Self {
        Self(bits)
    }

    pub const fn bits(&self) -> u64 {
        self.0
    }

    /// Whether every bit of `other` is set.
    pub const fn contains(&self, other: Self) -> bool {
        self.0 & other.0 == other.0
    }

    pub const fn is_empty(&self) -> bool {
        self.0 == 0
    }
}

impl BitOr for Capabilities {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self {
        Self(self.0 | rhs.0)
    }
}

/// Longest identity string kept, in bytes.
pub const MAX_IDENTITY_LEN: usize = 255;

/// Provider name, version and vendor as shown to operators.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ProviderIdentity {
    pub name: String,
    pub version: String,
    pub vendor: String,
}

impl ProviderIdentity {
    /// Build an identity, truncating each field to `MAX_IDENTITY_LEN` bytes.
    pub fn bounded(name: &str, version: &str, vendor: &str) -> Self {
        Self {
            name: truncate_identity(name),
            version: truncate_identity(version),
            vendor: truncate_identity(vendor),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.name.is_empty() && self.version.is_empty() && self.vendor.is_empty()
    }
}

fn truncate_identity(value: &str) -> String {
    if value.len() <= MAX_IDENTITY_LEN {
        return value.to_string();
    }
    let mut end = MAX_IDENTITY_LEN;
    while !value.is_char_boundary(end) {
        end -= 1;
    }
    value[..end].to_string()
}

/// Event delivered by the provider on one of its threads.
#[derive(Debug, Clone, Copy)]
pub enum ProviderEvent<'a> {
    /// Provider log message
    Log {
        level: ProviderLogLevel,
        message: &'a str,
    },
    /// Membership changed
    ViewChanged(&'a ClusterView),
    /// Node caught up with the group
    Synced,
    /// A certified write set must be applied by an applier session
    ApplyRequested {
        applier: SessionId,
        seqno: Seqno,
        data: &'a [u8],
    },
    /// This node was chosen to donate a state snapshot
    DonateRequested {
        request: &'a [u8],
        state: Anchor,
        bypass: bool,
    },
}

/// What the node answers to an event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EventReply {
    /// Handled
    Ack,
    /// View handled; a state transfer is requested with this payload
    SstRequest(Vec<u8>),
    /// Handling failed
    Failed(ProviderStatus),
}

/// Receiver of provider events.
///
/// Events from one provider instance are delivered one at a time; a view is
/// fully processed before the next event arrives.
pub trait EventSink: Send + Sync {
    fn deliver(&self, event: ProviderEvent<'_>) -> EventReply;
}

/// Arguments handed to `ReplicationProvider::init`.
#[derive(Clone)]
pub struct ProviderInitArgs {
    pub data_dir: PathBuf,
    pub node_name: String,
    /// Address clients reach this node at; `None` when unknown
    pub node_incoming: Option<String>,
    /// Opaque provider options
    pub options: String,
    pub max_protocol_version: i32,
    /// Position the node resumes from
    pub state: Anchor,
    pub events: Arc<dyn EventSink>,
}

impl fmt::Debug for ProviderInitArgs {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProviderInitArgs")
            .field("data_dir", &self.data_dir)
            .field("node_name", &self.node_name)
            .field("node_incoming", &self.node_incoming)
            .field("options", &self.options)
            .field("max_protocol_version", &self.max_protocol_version)
            .field("state", &self.state)
            .finish_non_exhaustive()
    }
}

/// Contract every replication provider satisfies.
pub trait ReplicationProvider: Send + Sync {
    fn name(&self) -> &str;

    fn version(&self) -> &str;

    fn vendor(&self) -> &str;

    /// Register the event sink and initial state. Called once, before
    /// `connect`.
    fn init(&self, args: ProviderInitArgs) -> ProviderResult<()>;

    fn capabilities(&self) -> Capabilities;

    /// Join the group at `address`, asking `donor` for state if needed.
    fn connect(&self, cluster_name: &str, address: &str, donor: &str) -> ProviderResult<()>;

    /// Leave the group. A Disconnected view follows.
    fn disconnect(&self) -> ProviderResult<()>;

    /// Applier loop body: deliver events on the calling thread until the
    /// provider disconnects.
    fn recv(&self, applier: SessionId) -> ProviderResult<()>;

    /// Block until everything committed in the group before the call has
    /// been applied locally. Returns that position.
    fn causal_read(&self) -> ProviderResult<Seqno>;

    /// Order `buffer` globally and start total order isolation for the
    /// session. Returns the assigned seqno.
    fn to_execute_start(
        &self,
        session: SessionId,
        keys: &[CertificationKey],
        buffer: &[u8],
    ) -> ProviderResult<Seqno>;

    /// End total order isolation for the session.
    fn to_execute_end(&self, session: SessionId) -> ProviderResult<()>;

    /// Current runtime options, if the provider exposes them.
    fn options_get(&self) -> Option<String>;
}

impl<P: ReplicationProvider + ?Sized> ReplicationProvider for Arc<P> {
    fn name(&self) -> &str {
        (**self).name()
    }

    fn version(&self) -> &str {
        (**self).version()
    }

    fn vendor(&self) -> &str {
        (**self).vendor()
    }

    fn init(&self, args: ProviderInitArgs) -> ProviderResult<()> {
        (**self).init(args)
    }

    fn capabilities(&self) -> Capabilities {
        (**self).capabilities()
    }

    fn connect(&self, cluster_name: &str, address: &str, donor: &str) -> ProviderResult<()> {
        (**self).connect(cluster_name, address, donor)
    }

    fn disconnect(&self) -> ProviderResult<()> {
        (**self).disconnect()
    }

    fn recv(&self, applier: SessionId) -> ProviderResult<()> {
        (**self).recv(applier)
    }

    fn causal_read(&self) -> ProviderResult<Seqno> {
        (**self).causal_read()
    }

    fn to_execute_start(
        &self,
        session: SessionId,
        keys: &[CertificationKey],
        buffer: &[u8],
    ) -> ProviderResult<Seqno> {
        (**self).to_execute_start(session, keys, buffer)
    }

    fn to_execute_end(&self, session: SessionId) -> ProviderResult<()> {
        (**self).to_execute_end(session)
    }

    fn options_get(&self) -> Option<String> {
        (**self).options_get()
    }
}
