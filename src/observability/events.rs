//! Observable replication lifecycle events
//!
//! Every event has a stable dotted name used as the `event` field of the
//! structured log line.

use std::fmt;

/// Observable events in the replication layer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Event {
    // Provider lifecycle
    /// Provider loaded and initialised
    ProviderLoaded,
    /// Provider could not be loaded
    ProviderLoadFailed,
    /// Replication disabled after a failed load
    ProviderFallback,
    /// Provider unloaded
    ProviderUnloaded,

    // Connection
    /// Connecting to the cluster
    ReplicationStart,
    /// Leaving the cluster
    ReplicationStop,
    /// Cluster connection failed
    ConnectFailed,

    // Membership
    /// New view delivered
    ViewReceived,
    /// View is not a primary component
    NonPrimaryView,
    /// Negotiated protocol version changed
    ProtocolChange,
    /// Node state lags the group
    StateGap,
    /// Snapshot transfer requested from a donor
    SstRequested,
    /// Snapshot transfer could not be prepared
    SstPrepareFailed,
    /// Snapshot transfer finished
    SstCompleted,
    /// Anchor recorded on first join
    FirstJoin,
    /// Anchor does not match the cluster (FATAL)
    AnchorMismatch,
    /// Node synchronised with the group
    Synced,

    // Statements
    /// Total order isolation could not begin
    TotalOrderBeginFailed,
    /// Total order isolation end reported failure
    TotalOrderEndFailed,
    /// Local transaction aborted for a certified operation
    BruteForceAbort,
    /// Causal read barrier failed
    CausalReadFailed,

    /// Invariant violation, process stops (FATAL)
    FatalShutdown,
}

impl Event {
    /// Stable event name
    pub fn as_str(&self) -> &'static str {
        match self {
            Event::ProviderLoaded => "replication.provider.loaded",
            Event::ProviderLoadFailed => "replication.provider.load_failed",
            Event::ProviderFallback => "replication.provider.fallback",
            Event::ProviderUnloaded => "replication.provider.unloaded",
            Event::ReplicationStart => "replication.start",
            Event::ReplicationStop => "replication.stop",
            Event::ConnectFailed => "replication.connect_failed",
            Event::ViewReceived => "replication.view.received",
            Event::NonPrimaryView => "replication.view.non_primary",
            Event::ProtocolChange => "replication.view.protocol_change",
            Event::StateGap => "replication.view.state_gap",
            Event::SstRequested => "replication.sst.requested",
            Event::SstPrepareFailed => "replication.sst.prepare_failed",
            Event::SstCompleted => "replication.sst.completed",
            Event::FirstJoin => "replication.view.first_join",
            Event::AnchorMismatch => "replication.view.anchor_mismatch",
            Event::Synced => "replication.synced",
            Event::TotalOrderBeginFailed => "replication.toi.begin_failed",
            Event::TotalOrderEndFailed => "replication.toi.end_failed",
            Event::BruteForceAbort => "replication.bf_abort",
            Event::CausalReadFailed => "replication.causal_read_failed",
            Event::FatalShutdown => "replication.fatal_shutdown",
        }
    }

    /// Returns true if this event precedes process termination
    pub fn is_fatal(&self) -> bool {
        matches!(self, Event::AnchorMismatch | Event::FatalShutdown)
    }
}

impl fmt::Display for Event {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
