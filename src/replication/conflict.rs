//! Lock conflict resolution
//!
//! Called by the lock manager when a lock cannot be granted at once. Work
//! that is already globally ordered (total order statements and applied
//! write sets) may not wait behind purely local work, because every other
//! node will apply it regardless.
//!
//! Decision, for a certified requester:
//! 1. Holder is committing: grant, it is about to release
//! 2. Holder is a FLUSH-class statement ordered no later than the
//!    requester (or not ordered at all): grant
//! 3. Holder is itself certified: no exception, the provider orders them
//! 4. Otherwise: abort the holder and grant

use std::sync::Arc;

use tracing::{debug, info};

use super::rollback::RollbackHelper;
use super::session::{ExecMode, QueryState, Session, StatementClass, TransactionReplicationContext};
use super::state::ReplicationState;
use super::view::Seqno;
use crate::observability::Event;

/// The fields of a session the decision looks at.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LockParty {
    pub exec_mode: ExecMode,
    pub query_state: QueryState,
    pub trx_seqno: Seqno,
    pub statement_class: StatementClass,
}

impl From<&TransactionReplicationContext> for LockParty {
    fn from(ctx: &TransactionReplicationContext) -> Self {
        Self {
            exec_mode: ctx.exec_mode,
            query_state: ctx.query_state,
            trx_seqno: ctx.trx_seqno,
            statement_class: ctx.statement_class,
        }
    }
}

/// Outcome of a lock conflict.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConflictDecision {
    /// Requester waits as usual
    NoException,
    /// Holder is committing
    GrantOverCommitting,
    /// Holder is a FLUSH ordered no later than the requester
    GrantOverFlush,
    /// Holder is aborted and the lock granted
    AbortHolder,
}

impl ConflictDecision {
    /// Whether the requester gets the lock.
    pub fn grants(&self) -> bool {
        !matches!(self, Self::NoException)
    }
}

/// Pure decision function.
pub fn decide(requester: &LockParty, holder: &LockParty) -> ConflictDecision {
    if !requester.exec_mode.is_certified() {
        return ConflictDecision::NoException;
    }
    if holder.query_state == QueryState::Committing {
        return ConflictDecision::GrantOverCommitting;
    }
    if holder.statement_class == StatementClass::Flush
        && (holder.trx_seqno <= requester.trx_seqno || holder.trx_seqno == Seqno::UNASSIGNED)
    {
        return ConflictDecision::GrantOverFlush;
    }
    if holder.exec_mode.is_certified() {
        return ConflictDecision::NoException;
    }
    ConflictDecision::AbortHolder
}

/// Brute-force lock grant exceptions.
pub struct ConflictResolver {
    state: Arc<ReplicationState>,
    rollback: Arc<RollbackHelper>,
}

impl ConflictResolver {
    pub fn new(state: Arc<ReplicationState>, rollback: Arc<RollbackHelper>) -> Self {
        Self { state, rollback }
    }

    /// Whether `requester` may take a lock `holder` has. Never blocks.
    ///
    /// When the holder is chosen as victim it is marked aborting and queued
    /// for rollback; it later fails with a deadlock-class error.
    pub fn lock_grant_exception(&self, requester: &Session, holder: &Arc<Session>) -> bool {
        if !self.state.is_replication_enabled() {
            return false;
        }

        let req = LockParty::from(&requester.context());
        let mut holder_ctx = holder.lock();
        let held = LockParty::from(&*holder_ctx);
        let decision = decide(&req, &held);

        match decision {
            ConflictDecision::GrantOverCommitting | ConflictDecision::GrantOverFlush => {
                debug!(
                    requester = %requester.id(),
                    requester_seqno = %req.trx_seqno,
                    holder = %holder.id(),
                    holder_seqno = %held.trx_seqno,
                    decision = ?decision,
                    "lock granted over holder"
                );
            }
            ConflictDecision::NoException => {
                if req.exec_mode.is_certified() {
                    info!(
                        requester = %requester.id(),
                        requester_mode = ?req.exec_mode,
                        requester_seqno = %req.trx_seqno,
                        holder = %holder.id(),
                        holder_mode = ?held.exec_mode,
                        holder_seqno = %held.trx_seqno,
                        "lock conflict between ordered operations"
                    );
                }
            }
            ConflictDecision::AbortHolder => {
                holder_ctx.query_state = QueryState::Aborting;
                holder_ctx.bf_aborted = true;
                drop(holder_ctx);

                info!(
                    event = %Event::BruteForceAbort,
                    requester = %requester.id(),
                    requester_seqno = %req.trx_seqno,
                    victim = %holder.id(),
                    "aborting local transaction for ordered operation"
                );
                self.state.metrics().increment_bf_aborts();
                self.rollback.schedule(Arc::clone(holder));
            }
        }
        decision.grants()
    }
}
