//! Replication Subsystem
//!
//! Node-side coordination with a certification-based, synchronous
//! multi-master replication provider:
//! - Cluster membership and the join lifecycle (views, state transfer)
//! - Readiness gating of client work
//! - Total order isolation for statements every node must run in step
//! - Brute-force lock conflict resolution for globally ordered work
//! - Causal read barriers
//!
//! The provider owns certification and ordering. Everything here reacts to
//! its events and enforces the local consequences.
//!
//! # Invariants
//!
//! - Configuration ids never go backwards
//! - The node is unready while a state gap or protocol change is pending
//! - The anchor moves only on a first join or a completed state transfer
//! - Member status moves only along the lifecycle edges of `MemberStatus`
//! - A node whose anchor belongs to another cluster stops

mod causal;
mod codec;
mod config;
mod conflict;
mod dispatch;
mod errors;
mod gate;
mod keys;
mod membership;
mod node;
mod rollback;
mod session;
mod sst;
mod state;
mod status;
mod toi;
mod view;

pub use causal::CausalReadGate;
pub use codec::ReplicatedStatement;
pub use config::{
    is_disabled_spec, ReplicationConfig, MAX_PROTOCOL_VERSION, NODE_INCOMING_AUTO, PROVIDER_NONE,
};
pub use conflict::{decide, ConflictDecision, ConflictResolver, LockParty};
pub use dispatch::{AbortOnFatal, EventDispatcher, FatalHandler, LoggingApplier, WriteSetApplier};
pub use errors::{ReplicationError, ReplicationErrorKind, ReplicationResult, UserErrorClass};
pub use gate::ReplicationGate;
pub use keys::{CertificationKey, CertificationKeyBuilder, KeyPart, KeySource};
pub use membership::{MembershipController, ViewOutcome};
pub use node::{EngineInitializer, NoEngines, NodeCollaborators, NodeReplication};
pub use rollback::{NoopAborter, RollbackHelper, TransactionAborter};
pub use session::{
    ExecMode, QueryState, Session, SessionId, SessionKind, SessionRegistry, StatementClass,
    TransactionReplicationContext,
};
pub use sst::{NoTransport, SnapshotTransport, StateTransferCoordinator, TransferPhase, ENOSYS};
pub use state::{AutoIncrement, ClusterStatus, MemberStatusChange, ReplicationState};
pub use status::StatusSnapshot;
pub use toi::{Statement, TotalOrderIsolation};
pub use view::{Anchor, ClusterView, MemberStatus, Seqno, ViewStatus};
