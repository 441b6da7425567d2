//! Sessions and their replication context
//!
//! Every client connection and every applier thread owns a `Session`. The
//! replication context inside it is guarded by the session's own mutex: the
//! lock manager reads a holder's context while the holder runs, and the
//! rollback helper marks it aborted from another thread.

use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, Weak};

use serde::{Deserialize, Serialize};
use tracing::info;

use super::errors::{ReplicationError, ReplicationResult};
use super::view::Seqno;

/// Session identifier, unique for the process lifetime.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct SessionId(pub u64);

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// How the session's current statement is being executed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExecMode {
    /// Executing locally, replicated at commit
    Local,
    /// Applying a write set received from the group
    ReplicatingReceive,
    /// Executing under total order isolation
    TotalOrder,
}

impl ExecMode {
    /// Whether the work is already globally ordered.
    pub fn is_certified(&self) -> bool {
        matches!(self, Self::ReplicatingReceive | Self::TotalOrder)
    }
}

/// Progress of the session's current statement.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueryState {
    /// No statement running
    Idle,
    /// Statement running
    Executing,
    /// Past certification, committing
    Committing,
    /// Brute-force abort requested, rollback pending
    Aborting,
    /// Rolled back by the rollback helper
    Aborted,
}

/// Statement class relevant to lock conflict decisions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatementClass {
    /// Any ordinary statement
    Ordinary,
    /// Administrative FLUSH-class statement
    Flush,
}

/// Who drives the session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionKind {
    /// Client connection
    Client,
    /// Applier thread
    Applier,
}

/// Per-session replication state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransactionReplicationContext {
    pub exec_mode: ExecMode,
    pub trx_seqno: Seqno,
    pub query_state: QueryState,
    pub statement_class: StatementClass,
    /// Inside an explicit multi-statement transaction
    pub in_multi_statement_trx: bool,
    /// Session-level replication switch
    pub replication_on: bool,
    /// Session wants causal reads
    pub causal_reads: bool,
    /// Closed by the replication layer
    pub killed: bool,
    /// Chosen as a brute-force abort victim
    pub bf_aborted: bool,
}

impl TransactionReplicationContext {
    /// Context of a fresh client session.
    pub fn client(replication_on: bool, causal_reads: bool) -> Self {
        Self {
            exec_mode: ExecMode::Local,
            trx_seqno: Seqno::UNASSIGNED,
            query_state: QueryState::Idle,
            statement_class: StatementClass::Ordinary,
            in_multi_statement_trx: false,
            replication_on,
            causal_reads,
            killed: false,
            bf_aborted: false,
        }
    }

    /// Context of an applier thread.
    pub fn applier() -> Self {
        Self {
            exec_mode: ExecMode::ReplicatingReceive,
            ..Self::client(true, false)
        }
    }
}

/// Ends total order isolation for a session that goes away without
/// calling `end`.
pub(crate) trait TotalOrderRelease: Send + Sync + fmt::Debug {
    fn release(&self, session: SessionId, seqno: Seqno);
}

/// A client connection or applier thread.
///
/// Dropping a session that is still in TotalOrder ends its isolation.
#[derive(Debug)]
pub struct Session {
    id: SessionId,
    kind: SessionKind,
    context: Mutex<TransactionReplicationContext>,
    total_order: Mutex<Option<Arc<dyn TotalOrderRelease>>>,
}

impl Session {
    /// Create a session outside any registry.
    pub fn new(id: SessionId, kind: SessionKind, context: TransactionReplicationContext) -> Self {
        Self {
            id,
            kind,
            context: Mutex::new(context),
            total_order: Mutex::new(None),
        }
    }

    pub(crate) fn set_total_order_release(&self, release: Arc<dyn TotalOrderRelease>) {
        *self.total_order.lock().unwrap_or_else(|e| e.into_inner()) = Some(release);
    }

    pub(crate) fn clear_total_order_release(&self) {
        self.total_order.lock().unwrap_or_else(|e| e.into_inner()).take();
    }

    pub fn id(&self) -> SessionId {
        self.id
    }

    pub fn kind(&self) -> SessionKind {
        self.kind
    }

    /// Lock the replication context.
    pub fn lock(&self) -> MutexGuard<'_, TransactionReplicationContext> {
        self.context.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Copy of the replication context.
    pub fn context(&self) -> TransactionReplicationContext {
        self.lock().clone()
    }

    /// Run `f` with the context locked.
    pub fn with_context<R>(&self, f: impl FnOnce(&mut TransactionReplicationContext) -> R) -> R {
        let mut guard = self.lock();
        f(&mut guard)
    }

    pub fn exec_mode(&self) -> ExecMode {
        self.lock().exec_mode
    }

    pub fn set_query_state(&self, state: QueryState) {
        self.lock().query_state = state;
    }

    pub fn set_statement_class(&self, class: StatementClass) {
        self.lock().statement_class = class;
    }

    pub fn set_in_multi_statement_trx(&self, active: bool) {
        self.lock().in_multi_statement_trx = active;
    }

    pub fn set_causal_reads(&self, enabled: bool) {
        self.lock().causal_reads = enabled;
    }

    pub fn set_trx_seqno(&self, seqno: Seqno) {
        self.lock().trx_seqno = seqno;
    }

    pub fn is_killed(&self) -> bool {
        self.lock().killed
    }

    /// Refuse further work on a session closed by the replication layer.
    pub fn ensure_open(&self) -> ReplicationResult<()> {
        if self.is_killed() {
            return Err(ReplicationError::connection_closed(format!(
                "session {} was closed by the replication layer; reconnect",
                self.id
            )));
        }
        Ok(())
    }

    /// Consume a pending brute-force abort, yielding the deadlock-class
    /// error the statement must fail with.
    pub fn take_abort_error(&self) -> Option<ReplicationError> {
        let mut ctx = self.lock();
        if !ctx.bf_aborted {
            return None;
        }
        ctx.bf_aborted = false;
        ctx.query_state = QueryState::Idle;
        Some(ReplicationError::brute_force_aborted(format!(
            "session {} was aborted by a conflicting replicated operation; retry the transaction",
            self.id
        )))
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        let ctx = self.context.get_mut().unwrap_or_else(|e| e.into_inner());
        if ctx.exec_mode != ExecMode::TotalOrder {
            return;
        }
        ctx.exec_mode = ExecMode::Local;
        let seqno = ctx.trx_seqno;
        let release = self
            .total_order
            .get_mut()
            .unwrap_or_else(|e| e.into_inner())
            .take();
        if let Some(release) = release {
            release.release(self.id, seqno);
        }
    }
}

/// Registry of live sessions.
#[derive(Debug, Default)]
pub struct SessionRegistry {
    next_id: AtomicU64,
    sessions: Mutex<HashMap<SessionId, Weak<Session>>>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn register(&self, kind: SessionKind, context: TransactionReplicationContext) -> Arc<Session> {
        let id = SessionId(self.next_id.fetch_add(1, Ordering::Relaxed) + 1);
        let session = Arc::new(Session::new(id, kind, context));
        self.sessions
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(id, Arc::downgrade(&session));
        session
    }

    /// Open a client session.
    pub fn open_client(&self, replication_on: bool, causal_reads: bool) -> Arc<Session> {
        self.register(
            SessionKind::Client,
            TransactionReplicationContext::client(replication_on, causal_reads),
        )
    }

    /// Open an applier session.
    pub fn open_applier(&self) -> Arc<Session> {
        self.register(SessionKind::Applier, TransactionReplicationContext::applier())
    }

    /// Remove a session. A session still in total order mode is refused:
    /// its isolation must be ended first.
    pub fn unregister(&self, session: &Session) -> ReplicationResult<()> {
        if session.exec_mode() == ExecMode::TotalOrder {
            return Err(ReplicationError::invalid_state(format!(
                "session {} closed while in total order isolation",
                session.id()
            )));
        }
        self.sessions
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .remove(&session.id());
        Ok(())
    }

    /// Look up a live session.
    pub fn get(&self, id: SessionId) -> Option<Arc<Session>> {
        self.sessions
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .get(&id)
            .and_then(Weak::upgrade)
    }

    /// Live sessions, pruning dropped ones.
    pub fn live(&self) -> Vec<Arc<Session>> {
        let mut sessions = self.sessions.lock().unwrap_or_else(|e| e.into_inner());
        sessions.retain(|_, weak| weak.strong_count() > 0);
        sessions.values().filter_map(Weak::upgrade).collect()
    }

    /// Number of live sessions.
    pub fn len(&self) -> usize {
        self.live().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Close every client session; appliers are left running.
    ///
    /// Returns the number of sessions closed.
    pub fn close_client_sessions(&self) -> usize {
        let mut closed = 0;
        for session in self.live() {
            if session.kind() != SessionKind::Client {
                continue;
            }
            let mut ctx = session.lock();
            if !ctx.killed {
                ctx.killed = true;
                closed += 1;
            }
        }
        if closed > 0 {
            info!(closed, "closed client connections");
        }
        closed
    }
}
