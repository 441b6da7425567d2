//! Provider event dispatch
//!
//! Routes each `ProviderEvent` to the component owning it and turns the
//! result into the reply the provider expects. Fatal errors raised while
//! handling an event go to the `FatalHandler`; the provider thread never
//! unwinds.

use std::sync::Arc;

use tracing::{error, info, warn};

use super::codec::ReplicatedStatement;
use super::errors::{ReplicationError, ReplicationResult};
use super::gate::ReplicationGate;
use super::membership::MembershipController;
use super::session::SessionId;
use super::sst::StateTransferCoordinator;
use super::state::ReplicationState;
use super::view::Seqno;
use crate::observability::{Event, ProviderLogBridge};
use crate::provider::{EventReply, EventSink, ProviderEvent, ProviderStatus};

/// Host hook executing replicated statements on an applier session.
pub trait WriteSetApplier: Send + Sync {
    fn apply(
        &self,
        applier: SessionId,
        seqno: Seqno,
        statement: ReplicatedStatement,
    ) -> ReplicationResult<()>;
}

/// Applier that only records what it would run.
#[derive(Debug, Default, Clone, Copy)]
pub struct LoggingApplier;

impl WriteSetApplier for LoggingApplier {
    fn apply(
        &self,
        applier: SessionId,
        seqno: Seqno,
        statement: ReplicatedStatement,
    ) -> ReplicationResult<()> {
        info!(
            applier = %applier,
            seqno = %seqno,
            origin = %statement.session_id,
            query = %statement.query,
            "replicated statement"
        );
        Ok(())
    }
}

/// Receives errors the node cannot survive.
pub trait FatalHandler: Send + Sync {
    fn on_fatal(&self, error: &ReplicationError);
}

/// Logs and aborts the process.
#[derive(Debug, Default, Clone, Copy)]
pub struct AbortOnFatal;

impl FatalHandler for AbortOnFatal {
    fn on_fatal(&self, error: &ReplicationError) {
        error!(event = %Event::FatalShutdown, error = %error, "cannot continue, aborting");
        std::process::abort();
    }
}

/// The node's `EventSink`.
pub struct EventDispatcher {
    state: Arc<ReplicationState>,
    membership: Arc<MembershipController>,
    gate: ReplicationGate,
    sst: Arc<StateTransferCoordinator>,
    applier: Arc<dyn WriteSetApplier>,
    fatal: Arc<dyn FatalHandler>,
    log: ProviderLogBridge,
}

impl EventDispatcher {
    pub fn new(
        state: Arc<ReplicationState>,
        membership: Arc<MembershipController>,
        gate: ReplicationGate,
        sst: Arc<StateTransferCoordinator>,
        applier: Arc<dyn WriteSetApplier>,
        fatal: Arc<dyn FatalHandler>,
        log: ProviderLogBridge,
    ) -> Self {
        Self {
            state,
            membership,
            gate,
            sst,
            applier,
            fatal,
            log,
        }
    }

    fn apply(&self, applier: SessionId, seqno: Seqno, data: &[u8]) -> EventReply {
        let result = ReplicatedStatement::decode(data)
            .and_then(|statement| self.applier.apply(applier, seqno, statement));
        match result {
            Ok(()) => {
                self.state.metrics().increment_write_sets_applied();
                EventReply::Ack
            }
            Err(e) => {
                error!(applier = %applier, seqno = %seqno, error = %e, "failed to apply write set");
                EventReply::Failed(ProviderStatus::TrxFail)
            }
        }
    }
}

impl EventSink for EventDispatcher {
    fn deliver(&self, event: ProviderEvent<'_>) -> EventReply {
        match event {
            ProviderEvent::Log { level, message } => {
                self.log.log(level, message);
                EventReply::Ack
            }
            ProviderEvent::ViewChanged(view) => match self.membership.handle_view(view) {
                Ok(outcome) => match outcome.sst_request {
                    Some(request) => EventReply::SstRequest(request),
                    None => EventReply::Ack,
                },
                Err(e) if e.is_fatal() => {
                    self.fatal.on_fatal(&e);
                    EventReply::Failed(ProviderStatus::Fatal)
                }
                Err(e) => {
                    warn!(error = %e, "view refused");
                    EventReply::Failed(ProviderStatus::Warning)
                }
            },
            ProviderEvent::Synced => {
                self.gate.synced();
                EventReply::Ack
            }
            ProviderEvent::ApplyRequested {
                applier,
                seqno,
                data,
            } => self.apply(applier, seqno, data),
            ProviderEvent::DonateRequested {
                request,
                state,
                bypass,
            } => match self.sst.donate(request, state, bypass) {
                Ok(()) => EventReply::Ack,
                Err(_) => EventReply::Failed(ProviderStatus::NodeFail),
            },
        }
    }
}
