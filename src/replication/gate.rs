//! Readiness gate
//!
//! Client work is admitted only once the node is ready. Readiness becomes
//! true on the first synced signal after a join, or immediately when
//! replication is disabled.

use std::sync::Arc;
use std::time::Duration;

use tracing::info;

use super::state::ReplicationState;
use super::view::MemberStatus;
use crate::observability::Event;

/// Blocks callers until the node may serve queries.
#[derive(Debug, Clone)]
pub struct ReplicationGate {
    state: Arc<ReplicationState>,
    log_interval: Duration,
}

impl ReplicationGate {
    pub fn new(state: Arc<ReplicationState>, log_interval: Duration) -> Self {
        Self {
            state,
            log_interval,
        }
    }

    pub fn is_ready(&self) -> bool {
        self.state.is_ready()
    }

    /// Block until ready, logging while waiting.
    pub fn ready_wait(&self) {
        self.state.wait_ready(self.log_interval, || {
            info!("waiting to reach ready state");
        });
        info!("ready state reached");
    }

    /// Block until ready or until `timeout` elapses. Returns readiness.
    pub fn ready_wait_timeout(&self, timeout: Duration) -> bool {
        self.state.wait_ready_timeout(timeout)
    }

    /// The provider reports the node caught up with the group.
    ///
    /// Readiness is set once; repeated signals only re-assert Synced.
    pub fn synced(&self) {
        let previous = self.state.member_status();
        let became_ready = self.state.mark_synced();
        if became_ready || previous != MemberStatus::Synced {
            info!(event = %Event::Synced, "synchronized with group, ready for connections");
        }
    }
}
