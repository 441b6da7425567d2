//! Causal reads
//!
//! A session asking for causal reads must see everything committed anywhere
//! in the group before its read started. Before the read runs, the provider
//! blocks until the local apply position reaches the group's last commit.

use std::sync::Arc;

use tracing::warn;

use super::errors::{ReplicationError, ReplicationResult};
use super::session::Session;
use super::state::ReplicationState;
use super::view::Seqno;
use crate::observability::Event;
use crate::provider::{ProviderHandle, ProviderStatus};

/// Barrier run before reads of sessions with causal reads on.
pub struct CausalReadGate {
    state: Arc<ReplicationState>,
    provider: Arc<ProviderHandle>,
}

impl CausalReadGate {
    pub fn new(state: Arc<ReplicationState>, provider: Arc<ProviderHandle>) -> Self {
        Self { state, provider }
    }

    /// Wait until the session may read.
    ///
    /// Returns the position reached, or `None` when replication is off or the
    /// session does not ask for causal reads. Inside a multi-statement transaction the barrier is
    /// refused without being issued, as is any read on a closed session.
    pub fn wait(&self, session: &Session) -> ReplicationResult<Option<Seqno>> {
        session.ensure_open()?;
        let ctx = session.context();
        if !self.state.is_replication_enabled() || !ctx.causal_reads || !ctx.replication_on {
            return Ok(None);
        }
        if ctx.in_multi_statement_trx {
            return Err(ReplicationError::not_supported(
                "causal reads inside transactions",
            ));
        }

        self.state.metrics().increment_causal_waits();
        let provider = self.provider.provider()?;
        match provider.causal_read() {
            Ok(seqno) => Ok(Some(seqno)),
            Err(status) => {
                self.state.metrics().increment_causal_wait_failures();
                warn!(event = %Event::CausalReadFailed, session = %session.id(), status = %status, "causal wait failed");
                Err(match status {
                    ProviderStatus::NotImplemented => ReplicationError::configuration_error(
                        "consistent reads are not supported by the provider; unset causal_reads",
                    ),
                    _ => ReplicationError::read_failed(format!("causal wait failed: {}", status)),
                })
            }
        }
    }
}
