//! Membership controller
//!
//! Consumes cluster views and decides the node's member status. Views are
//! processed one at a time. Each branch settles the final status and falls
//! through to a single commit.
//!
//! | view                           | ready    | member status          |
//! |--------------------------------|----------|------------------------|
//! | non-primary                    | false    | Undefined              |
//! | primary, state gap, prepare ok | false    | Undefined, then Joiner |
//! | primary, state gap, prepare ko | false    | Undefined              |
//! | primary, first join            | as was   | Joined                 |
//! | primary, known history         | as was   | unchanged              |
//!
//! Every status change goes through the checked transition path, so a view
//! that would need a forbidden edge is refused.
//!
//! The anchor is only written on a first join (or by a completed state
//! transfer). Non-primary views never touch it.

use std::sync::{Arc, Mutex};

use tracing::{error, info, warn};

use super::config::{ReplicationConfig, MAX_PROTOCOL_VERSION};
use super::errors::{ReplicationError, ReplicationResult};
use super::session::SessionRegistry;
use super::sst::StateTransferCoordinator;
use super::state::{AutoIncrement, ReplicationState};
use super::view::{Anchor, ClusterView, MemberStatus};
use crate::observability::Event;

/// Result of processing one view.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ViewOutcome {
    /// Status committed for the view
    pub member_status: MemberStatus,
    /// Transfer request to hand back to the provider
    pub sst_request: Option<Vec<u8>>,
}

/// View-driven state machine.
pub struct MembershipController {
    state: Arc<ReplicationState>,
    sst: Arc<StateTransferCoordinator>,
    sessions: Arc<SessionRegistry>,
    auto_increment_control: bool,
    init_engines_first: bool,
    views: Mutex<()>,
}

impl MembershipController {
    pub fn new(
        state: Arc<ReplicationState>,
        sst: Arc<StateTransferCoordinator>,
        sessions: Arc<SessionRegistry>,
        config: &ReplicationConfig,
    ) -> Self {
        Self {
            state,
            sst,
            sessions,
            auto_increment_control: config.auto_increment_control,
            init_engines_first: config.sst_init_engines_first,
            views: Mutex::new(()),
        }
    }

    /// Process a view.
    ///
    /// Errors from `is_fatal()` kinds require the process to stop. A stale
    /// view is refused without effect.
    pub fn handle_view(&self, view: &ClusterView) -> ReplicationResult<ViewOutcome> {
        let _serial = self.views.lock().unwrap_or_else(|e| e.into_inner());

        self.state.refresh_cluster(view)?;
        self.state.metrics().increment_views(view.is_primary());
        info!(
            event = %Event::ViewReceived,
            group = %view.group_uuid,
            conf_id = view.conf_id,
            status = %view.status,
            members = view.member_count,
            index = view.local_index,
            first_seqno = %view.first_seqno,
            protocol = view.protocol_version,
            "new cluster view"
        );

        let outcome = if view.is_primary() {
            self.primary_view(view)?
        } else {
            self.non_primary_view()
        };

        self.state.transition_member_status(outcome.member_status)?;
        Ok(outcome)
    }

    fn non_primary_view(&self) -> ViewOutcome {
        self.state.set_ready(false);
        info!(event = %Event::NonPrimaryView, "not in a primary component");
        ViewOutcome {
            member_status: MemberStatus::Undefined,
            sst_request: None,
        }
    }

    fn primary_view(&self, view: &ClusterView) -> ReplicationResult<ViewOutcome> {
        self.adopt_protocol_version(view.protocol_version)?;

        let outcome = if view.state_gap {
            self.state_gap()
        } else {
            ViewOutcome {
                member_status: self.no_gap(view)?,
                sst_request: None,
            }
        };

        if self.auto_increment_control {
            let params = AutoIncrement {
                offset: view.local_index.max(0) as u64 + 1,
                increment: view.member_count.max(1) as u64,
            };
            self.state.set_auto_increment(params);
        }
        Ok(outcome)
    }

    fn adopt_protocol_version(&self, version: i32) -> ReplicationResult<()> {
        if !(0..=MAX_PROTOCOL_VERSION).contains(&version) {
            error!(
                event = %Event::FatalShutdown,
                protocol = version,
                "unsupported application protocol version"
            );
            return Err(ReplicationError::unsupported_protocol(format!(
                "unsupported application protocol version: {}",
                version
            )));
        }

        let current = self.state.protocol_version();
        if version != current {
            let was_ready = self.state.set_ready(false);
            info!(
                event = %Event::ProtocolChange,
                from = current,
                to = version,
                "closing client connections for protocol change"
            );
            self.sessions.close_client_sessions();
            self.state.set_protocol_version(version);
            self.state.set_ready(was_ready);
        }
        Ok(())
    }

    fn state_gap(&self) -> ViewOutcome {
        warn!(event = %Event::StateGap, "gap in state sequence, need state transfer");
        self.state.metrics().increment_state_gaps();

        // Stay unready until the snapshot arrives. Joiner is only reachable
        // from Undefined.
        self.state.set_ready(false);
        self.sessions.close_client_sessions();
        let _ = self.state.transition_member_status(MemberStatus::Undefined);

        match self.sst.prepare() {
            Ok(_) => ViewOutcome {
                member_status: MemberStatus::Joiner,
                sst_request: self.sst.take_pending_request(),
            },
            Err(code) => {
                error!(errno = code, "state transfer preparation failed, operator intervention required");
                self.sst.abandon();
                ViewOutcome {
                    member_status: MemberStatus::Undefined,
                    sst_request: None,
                }
            }
        }
    }

    fn no_gap(&self, view: &ClusterView) -> ReplicationResult<MemberStatus> {
        let anchor = self.state.anchor();

        if !anchor.is_set() {
            let start = view.first_seqno.prev();
            info!(event = %Event::FirstJoin, group = %view.group_uuid, seqno = %start, "first join");
            if self.init_engines_first {
                self.sst.engine_init_grab();
                self.sst.complete(view.group_uuid, start, true)?;
                self.sst.engine_init_wait();
            } else {
                self.state.set_anchor(Anchor::new(view.group_uuid, start));
            }
            return Ok(MemberStatus::Joined);
        }

        if anchor.uuid != view.group_uuid {
            error!(
                event = %Event::AnchorMismatch,
                group = %view.group_uuid,
                group_seqno = %view.first_seqno,
                local = %anchor,
                "undetected state gap, cannot continue"
            );
            return Err(ReplicationError::state_inconsistency(format!(
                "local state {} does not belong to cluster {}",
                anchor, view.group_uuid
            )));
        }

        Ok(self.state.member_status())
    }
}
