//! State Snapshot Transfer coordination
//!
//! A joiner whose state lags the group needs a full copy from a donor. The
//! copy itself is moved by an external `SnapshotTransport`; this module only
//! sequences it:
//!
//! 1. `grab()` before connecting, so an early synced signal cannot race the
//!    startup thread
//! 2. `prepare()` from the view handler, producing the request payload
//! 3. `complete()` once the transfer finishes, publishing the new anchor
//! 4. `wait()` on the startup thread, returning when `complete()` is seen
//!
//! The storage-engine handshake (`engine_init_grab`, `engine_init_wait`,
//! `engines_initialized`) lets a first join hold the view handler until
//! the startup thread has initialised the engines.

use std::sync::{Arc, Condvar, Mutex, MutexGuard};

use tracing::{error, info, warn};
use uuid::Uuid;

use super::errors::{ReplicationError, ReplicationResult};
use super::state::ReplicationState;
use super::view::{Anchor, MemberStatus, Seqno};
use crate::observability::Event;

/// errno reported when no transfer mechanism is installed
pub const ENOSYS: i32 = 38;

/// The mechanism that physically moves a snapshot between nodes.
///
/// Errors are positive errno values.
pub trait SnapshotTransport: Send + Sync {
    /// Produce the request a donor needs to serve this joiner.
    fn prepare_request(&self) -> Result<Vec<u8>, i32>;

    /// Serve a joiner's request from local state.
    fn donate(&self, request: &[u8], state: Anchor, bypass: bool) -> Result<(), i32>;
}

/// Transport for nodes that cannot take part in transfers.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoTransport;

impl SnapshotTransport for NoTransport {
    fn prepare_request(&self) -> Result<Vec<u8>, i32> {
        Err(ENOSYS)
    }

    fn donate(&self, _request: &[u8], _state: Anchor, _bypass: bool) -> Result<(), i32> {
        Err(ENOSYS)
    }
}

/// Where the current transfer attempt stands.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransferPhase {
    /// No attempt open
    Idle,
    /// Startup thread announced it will wait
    Grabbed,
    /// Request produced, transfer in flight
    Prepared,
    /// Attempt finished
    Completed { success: bool },
}

#[derive(Debug)]
struct Transfer {
    phase: TransferPhase,
    attempt: u64,
    pending_request: Option<Vec<u8>>,
    engines_grabbed: bool,
}

/// Sequences joins that need a state transfer.
pub struct StateTransferCoordinator {
    state: Arc<ReplicationState>,
    transport: Arc<dyn SnapshotTransport>,
    transfer: Mutex<Transfer>,
    changed: Condvar,
}

impl StateTransferCoordinator {
    pub fn new(state: Arc<ReplicationState>, transport: Arc<dyn SnapshotTransport>) -> Self {
        Self {
            state,
            transport,
            transfer: Mutex::new(Transfer {
                phase: TransferPhase::Idle,
                attempt: 0,
                pending_request: None,
                engines_grabbed: false,
            }),
            changed: Condvar::new(),
        }
    }

    fn transfer(&self) -> MutexGuard<'_, Transfer> {
        self.transfer.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn phase(&self) -> TransferPhase {
        self.transfer().phase
    }

    /// Number of attempts opened so far.
    pub fn attempts(&self) -> u64 {
        self.transfer().attempt
    }

    /// Announce that the startup thread will `wait()` for a transfer.
    pub fn grab(&self) {
        let mut transfer = self.transfer();
        transfer.attempt += 1;
        transfer.phase = TransferPhase::Grabbed;
        transfer.pending_request = None;
    }

    /// Ask the transport for a request payload.
    ///
    /// Returns the payload length, or a negative errno.
    pub fn prepare(&self) -> Result<usize, i32> {
        info!(event = %Event::SstRequested, "preparing state transfer request");
        let request = match self.transport.prepare_request() {
            Ok(request) => request,
            Err(errno) => {
                let code = -errno.abs();
                error!(event = %Event::SstPrepareFailed, errno = code, "state transfer preparation failed");
                return Err(code);
            }
        };

        let mut transfer = self.transfer();
        if !matches!(transfer.phase, TransferPhase::Grabbed) {
            transfer.attempt += 1;
        }
        transfer.phase = TransferPhase::Prepared;
        let len = request.len();
        transfer.pending_request = Some(request);
        Ok(len)
    }

    /// Hand the prepared request to the caller, once.
    pub fn take_pending_request(&self) -> Option<Vec<u8>> {
        self.transfer().pending_request.take()
    }

    /// Block until the current attempt completes. Returns the published
    /// anchor on success.
    ///
    /// Waiting without a prior `grab()` (or `prepare()`) is a caller bug.
    pub fn wait(&self) -> ReplicationResult<Anchor> {
        let mut transfer = self.transfer();
        if transfer.phase == TransferPhase::Idle {
            return Err(ReplicationError::invalid_state(
                "waiting for a state transfer that was never grabbed",
            ));
        }
        loop {
            if let TransferPhase::Completed { success } = transfer.phase {
                drop(transfer);
                return if success {
                    Ok(self.state.anchor())
                } else {
                    Err(ReplicationError::transfer_failed("state transfer failed"))
                };
            }
            transfer = self
                .changed
                .wait(transfer)
                .unwrap_or_else(|e| e.into_inner());
        }
    }

    /// Finish the current attempt.
    ///
    /// On success the anchor becomes `(uuid, seqno)` and a Joiner becomes
    /// Joined. Completing the same attempt twice is refused.
    pub fn complete(&self, uuid: Uuid, seqno: Seqno, success: bool) -> ReplicationResult<()> {
        let mut transfer = self.transfer();
        if let TransferPhase::Completed { .. } = transfer.phase {
            return Err(ReplicationError::invalid_state(format!(
                "state transfer attempt {} already completed",
                transfer.attempt
            )));
        }
        if transfer.phase == TransferPhase::Idle {
            transfer.attempt += 1;
        }

        if success {
            let anchor = Anchor::new(uuid, seqno);
            self.state.set_anchor(anchor);
            if self.state.member_status() == MemberStatus::Joiner {
                if let Err(e) = self.state.transition_member_status(MemberStatus::Joined) {
                    warn!(error = %e, "joiner status moved during state transfer");
                }
            }
            info!(event = %Event::SstCompleted, anchor = %anchor, "state transfer complete");
        } else {
            error!(event = %Event::SstCompleted, uuid = %uuid, seqno = %seqno, "state transfer failed");
        }

        transfer.phase = TransferPhase::Completed { success };
        transfer.pending_request = None;
        self.changed.notify_all();
        Ok(())
    }

    /// Give up on the open attempt; a pending `wait()` fails.
    pub fn abandon(&self) {
        let mut transfer = self.transfer();
        if matches!(transfer.phase, TransferPhase::Grabbed | TransferPhase::Prepared) {
            transfer.phase = TransferPhase::Completed { success: false };
            transfer.pending_request = None;
            self.changed.notify_all();
        }
    }

    /// Announce that the view handler will wait for engine initialisation.
    pub fn engine_init_grab(&self) {
        self.transfer().engines_grabbed = true;
    }

    /// Block until `engines_initialized()`; returns at once if not grabbed.
    pub fn engine_init_wait(&self) {
        let mut transfer = self.transfer();
        while transfer.engines_grabbed {
            transfer = self
                .changed
                .wait(transfer)
                .unwrap_or_else(|e| e.into_inner());
        }
    }

    /// Storage engines are up; release `engine_init_wait()`.
    pub fn engines_initialized(&self) {
        let mut transfer = self.transfer();
        transfer.engines_grabbed = false;
        self.changed.notify_all();
    }

    /// Serve a state transfer to a joiner.
    pub fn donate(&self, request: &[u8], state: Anchor, bypass: bool) -> Result<(), i32> {
        info!(state = %state, bypass, bytes = request.len(), "donating state");
        self.transport.donate(request, state, bypass).map_err(|errno| {
            warn!(errno, "state donation failed");
            -errno.abs()
        })
    }
}
