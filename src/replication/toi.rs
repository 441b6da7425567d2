//! Total Order Isolation
//!
//! Statements that cannot be certified row by row (DDL and friends) run
//! under total order isolation: every node executes them at the same point
//! in the global sequence.
//!
//! Per session: Local → begin → TotalOrder → end → Local.
//!
//! A successful `begin` must always be followed by `end`. A session dropped
//! while in TotalOrder ends its isolation on drop. The process-wide in-flight counter equals
//! the number of sessions currently in TotalOrder.

use std::fmt;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use tracing::{debug, warn};

use super::codec::ReplicatedStatement;
use super::config::ReplicationConfig;
use super::errors::{ReplicationError, ReplicationResult};
use super::keys::CertificationKeyBuilder;
use super::session::{ExecMode, Session, SessionId, SessionRegistry, TotalOrderRelease};
use super::state::ReplicationState;
use super::view::Seqno;
use crate::observability::Event;
use crate::provider::ProviderHandle;

/// A statement about to run under total order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Statement<'a> {
    pub database: Option<&'a str>,
    pub table: Option<&'a str>,
    pub query: &'a str,
}

impl<'a> Statement<'a> {
    pub fn new(database: Option<&'a str>, table: Option<&'a str>, query: &'a str) -> Self {
        Self {
            database,
            table,
            query,
        }
    }
}

/// Shared with sessions in TotalOrder so teardown can end their isolation.
struct TotalOrderCore {
    state: Arc<ReplicationState>,
    provider: Arc<ProviderHandle>,
    in_flight: AtomicUsize,
}

impl fmt::Debug for TotalOrderCore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TotalOrderCore")
            .field("in_flight", &self.in_flight.load(Ordering::SeqCst))
            .finish_non_exhaustive()
    }
}

impl TotalOrderCore {
    /// Drop the counter and tell the provider. Provider failures are logged.
    fn leave(&self, session: SessionId, seqno: Seqno) {
        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        self.state.metrics().increment_toi_ends();

        let result = self
            .provider
            .provider()
            .map_err(|e| e.to_string())
            .and_then(|provider| {
                provider
                    .to_execute_end(session)
                    .map_err(|status| status.to_string())
            });
        match result {
            Ok(()) => debug!(session = %session, seqno = %seqno, "total order left"),
            Err(reason) => warn!(
                event = %Event::TotalOrderEndFailed,
                session = %session,
                seqno = %seqno,
                reason = %reason,
                "total order isolation end failed"
            ),
        }
    }
}

impl TotalOrderRelease for TotalOrderCore {
    fn release(&self, session: SessionId, seqno: Seqno) {
        warn!(session = %session, seqno = %seqno, "session dropped in total order isolation, ending it");
        self.leave(session, seqno);
    }
}

/// Total order isolation for client sessions.
pub struct TotalOrderIsolation {
    core: Arc<TotalOrderCore>,
    certify_non_pk: bool,
    max_ws_size: usize,
}

impl TotalOrderIsolation {
    pub fn new(
        state: Arc<ReplicationState>,
        provider: Arc<ProviderHandle>,
        config: &ReplicationConfig,
    ) -> Self {
        Self {
            core: Arc::new(TotalOrderCore {
                state,
                provider,
                in_flight: AtomicUsize::new(0),
            }),
            certify_non_pk: config.certify_non_pk,
            max_ws_size: config.max_ws_size,
        }
    }

    /// Sessions currently in TotalOrder.
    pub fn in_flight(&self) -> usize {
        self.core.in_flight.load(Ordering::SeqCst)
    }

    /// Enter total order for `statement`.
    ///
    /// Returns the assigned seqno, or `None` when the session does not
    /// replicate (replication off, or not in Local mode). A session closed by
    /// the replication layer is refused. Any other failure leaves the session
    /// in Local and yields a retryable error; the statement must not run.
    pub fn begin(&self, session: &Session, statement: &Statement<'_>) -> ReplicationResult<Option<Seqno>> {
        session.ensure_open()?;
        if !self.core.state.is_replication_enabled() {
            return Ok(None);
        }
        {
            let ctx = session.lock();
            if !ctx.replication_on || ctx.exec_mode != ExecMode::Local {
                return Ok(None);
            }
        }
        debug!(session = %session.id(), query = statement.query, "total order begin");

        let seqno = match self.order(session, statement) {
            Ok(seqno) => seqno,
            Err(reason) => {
                self.core.state.metrics().increment_toi_begin_failures();
                warn!(
                    event = %Event::TotalOrderBeginFailed,
                    session = %session.id(),
                    query = statement.query,
                    reason = %reason,
                    "total order isolation failed, check connection state and retry"
                );
                return Err(ReplicationError::replication_check_failed(
                    "replication failed; check the node's cluster connection and retry the statement",
                ));
            }
        };

        session.set_total_order_release(self.core.clone());
        session.with_context(|ctx| {
            ctx.exec_mode = ExecMode::TotalOrder;
            ctx.trx_seqno = seqno;
            self.core.in_flight.fetch_add(1, Ordering::SeqCst);
        });
        self.core.state.metrics().increment_toi_begins();
        debug!(session = %session.id(), seqno = %seqno, "total order entered");
        Ok(Some(seqno))
    }

    fn order(&self, session: &Session, statement: &Statement<'_>) -> Result<Seqno, String> {
        let key = CertificationKeyBuilder::new(self.core.state.protocol_version())
            .with_certify_non_pk(self.certify_non_pk)
            .isolation(statement.database, statement.table)
            .map_err(|e| e.to_string())?;
        let buffer = ReplicatedStatement::new(
            session.id(),
            statement.database,
            statement.table,
            statement.query,
        )
        .encode(self.max_ws_size)
        .map_err(|e| e.to_string())?;
        let provider = self.core.provider.provider().map_err(|e| e.to_string())?;
        provider
            .to_execute_start(session.id(), &[key], &buffer)
            .map_err(|status| status.to_string())
    }

    /// Leave total order.
    ///
    /// The session returns to Local and the counter drops whatever the
    /// provider answers; a provider failure is only logged.
    pub fn end(&self, session: &Session) -> ReplicationResult<()> {
        let seqno = session.with_context(|ctx| {
            if ctx.exec_mode != ExecMode::TotalOrder {
                return None;
            }
            ctx.exec_mode = ExecMode::Local;
            Some(ctx.trx_seqno)
        });
        let seqno = seqno.ok_or_else(|| {
            ReplicationError::invalid_state(format!(
                "session {} is not in total order isolation",
                session.id()
            ))
        })?;
        session.clear_total_order_release();
        self.core.leave(session.id(), seqno);
        Ok(())
    }

    /// Close a session, ending its total order first if it is still in one.
    pub fn close_session(&self, sessions: &SessionRegistry, session: &Session) -> ReplicationResult<()> {
        if session.exec_mode() == ExecMode::TotalOrder {
            self.end(session)?;
        }
        sessions.unregister(session)
    }
}
