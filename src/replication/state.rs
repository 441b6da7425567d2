//! Process-wide replication state
//!
//! One `ReplicationState` exists per node and is shared by `Arc` among all
//! components. Readiness and member status sit behind one mutex with a
//! condition variable so waiters observe both consistently. Cluster identity
//! is written only by the membership controller and read by everyone.

use std::sync::atomic::{AtomicBool, AtomicI32, Ordering};
use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::{Condvar, Mutex, MutexGuard, RwLock};
use std::time::{Duration, Instant};

use serde::Serialize;
use tracing::{debug, info};
use uuid::Uuid;

use super::errors::{ReplicationError, ReplicationResult};
use super::view::{Anchor, ClusterView, MemberStatus, ViewStatus};
use crate::observability::{MetricsSnapshot, ReplicationMetrics};
use crate::provider::{Capabilities, ProviderIdentity};

/// Cluster identity as last reported by a view.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ClusterStatus {
    pub state_uuid: Uuid,
    pub conf_id: i64,
    pub status: ViewStatus,
    pub size: usize,
    pub local_index: i64,
}

impl Default for ClusterStatus {
    fn default() -> Self {
        Self {
            state_uuid: Uuid::nil(),
            conf_id: -1,
            status: ViewStatus::Disconnected,
            size: 0,
            local_index: -1,
        }
    }
}

/// Auto-increment parameters keeping member ranges disjoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct AutoIncrement {
    pub offset: u64,
    pub increment: u64,
}

impl Default for AutoIncrement {
    fn default() -> Self {
        Self {
            offset: 1,
            increment: 1,
        }
    }
}

/// One published member status change.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MemberStatusChange {
    pub from: MemberStatus,
    pub to: MemberStatus,
}

#[derive(Debug)]
struct Readiness {
    ready: bool,
    member_status: MemberStatus,
}

/// Shared node and cluster state.
#[derive(Debug)]
pub struct ReplicationState {
    readiness: Mutex<Readiness>,
    ready_changed: Condvar,
    status_watchers: Mutex<Vec<Sender<MemberStatusChange>>>,
    anchor: RwLock<Anchor>,
    cluster: RwLock<ClusterStatus>,
    identity: RwLock<ProviderIdentity>,
    provider_options: RwLock<Option<String>>,
    auto_increment: RwLock<AutoIncrement>,
    capabilities: RwLock<Capabilities>,
    protocol_version: AtomicI32,
    connected: AtomicBool,
    replication_enabled: AtomicBool,
    metrics: ReplicationMetrics,
}

impl Default for ReplicationState {
    fn default() -> Self {
        Self::new()
    }
}

impl ReplicationState {
    /// Fresh state: not ready, not connected, anchor unset.
    pub fn new() -> Self {
        Self {
            readiness: Mutex::new(Readiness {
                ready: false,
                member_status: MemberStatus::Undefined,
            }),
            ready_changed: Condvar::new(),
            status_watchers: Mutex::new(Vec::new()),
            anchor: RwLock::new(Anchor::undefined()),
            cluster: RwLock::new(ClusterStatus::default()),
            identity: RwLock::new(ProviderIdentity::default()),
            provider_options: RwLock::new(None),
            auto_increment: RwLock::new(AutoIncrement::default()),
            capabilities: RwLock::new(Capabilities::empty()),
            protocol_version: AtomicI32::new(1),
            connected: AtomicBool::new(false),
            replication_enabled: AtomicBool::new(false),
            metrics: ReplicationMetrics::new(),
        }
    }

    /// Fresh state resuming from a previously persisted anchor.
    pub fn with_anchor(anchor: Anchor) -> Self {
        let state = Self::new();
        state.set_anchor(anchor);
        state
    }

    fn readiness(&self) -> MutexGuard<'_, Readiness> {
        self.readiness.lock().unwrap_or_else(|e| e.into_inner())
    }

    // =========================================================================
    // READINESS AND MEMBER STATUS
    // =========================================================================

    pub fn is_ready(&self) -> bool {
        self.readiness().ready
    }

    /// Set readiness, waking waiters when it becomes true. Returns the
    /// previous value.
    pub fn set_ready(&self, ready: bool) -> bool {
        let mut guard = self.readiness();
        let previous = guard.ready;
        guard.ready = ready;
        if ready && !previous {
            self.ready_changed.notify_all();
        }
        previous
    }

    /// Block until ready, calling `on_wait` each time `interval` elapses
    /// without progress.
    pub fn wait_ready(&self, interval: Duration, mut on_wait: impl FnMut()) {
        let mut guard = self.readiness();
        while !guard.ready {
            on_wait();
            let (next, _) = self
                .ready_changed
                .wait_timeout(guard, interval)
                .unwrap_or_else(|e| e.into_inner());
            guard = next;
        }
    }

    /// Block until ready or until `timeout` elapses. Returns readiness.
    pub fn wait_ready_timeout(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let mut guard = self.readiness();
        while !guard.ready {
            let now = Instant::now();
            if now >= deadline {
                return false;
            }
            let (next, _) = self
                .ready_changed
                .wait_timeout(guard, deadline - now)
                .unwrap_or_else(|e| e.into_inner());
            guard = next;
        }
        true
    }

    pub fn member_status(&self) -> MemberStatus {
        self.readiness().member_status
    }

    /// Move to `next` along an allowed edge. Returns the previous status.
    pub fn transition_member_status(&self, next: MemberStatus) -> ReplicationResult<MemberStatus> {
        let mut guard = self.readiness();
        let previous = guard.member_status;
        if !previous.can_transition_to(next) {
            return Err(ReplicationError::illegal_transition(format!(
                "member status cannot move from {} to {}",
                previous.as_str(),
                next.as_str()
            )));
        }
        self.publish_member_status(&mut guard, next);
        Ok(previous)
    }

    /// Receive every member status change published from now on.
    pub fn watch_member_status(&self) -> Receiver<MemberStatusChange> {
        let (tx, rx) = mpsc::channel();
        self.status_watchers
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(tx);
        rx
    }

    fn publish_member_status(&self, guard: &mut Readiness, next: MemberStatus) {
        let previous = guard.member_status;
        guard.member_status = next;
        if previous == next {
            return;
        }
        debug!(from = previous.as_str(), to = next.as_str(), "member status changed");
        let change = MemberStatusChange {
            from: previous,
            to: next,
        };
        self.status_watchers
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .retain(|tx| tx.send(change).is_ok());
    }

    /// Synced signal: ready exactly once, waiters woken, status Synced.
    /// Returns true when this call made the node ready.
    pub fn mark_synced(&self) -> bool {
        let mut guard = self.readiness();
        let became_ready = !guard.ready;
        if became_ready {
            guard.ready = true;
            self.ready_changed.notify_all();
        }
        self.publish_member_status(&mut guard, MemberStatus::Synced);
        became_ready
    }

    // =========================================================================
    // ANCHOR AND CLUSTER IDENTITY
    // =========================================================================

    pub fn anchor(&self) -> Anchor {
        *self.anchor.read().unwrap_or_else(|e| e.into_inner())
    }

    pub fn set_anchor(&self, anchor: Anchor) {
        *self.anchor.write().unwrap_or_else(|e| e.into_inner()) = anchor;
    }

    pub fn cluster(&self) -> ClusterStatus {
        self.cluster.read().unwrap_or_else(|e| e.into_inner()).clone()
    }

    /// Publish the identity carried by a view.
    ///
    /// Configuration ids never go backwards: a view with a defined conf id
    /// lower than the last one is refused and nothing is published. An
    /// undefined conf id leaves the last known one in place.
    pub fn refresh_cluster(&self, view: &ClusterView) -> ReplicationResult<()> {
        let mut cluster = self.cluster.write().unwrap_or_else(|e| e.into_inner());
        if view.conf_id >= 0 && view.conf_id < cluster.conf_id {
            return Err(ReplicationError::stale_view(format!(
                "view conf# {} is older than processed conf# {}",
                view.conf_id, cluster.conf_id
            )));
        }
        if cluster.state_uuid != view.group_uuid {
            cluster.state_uuid = view.group_uuid;
        }
        if view.conf_id >= 0 {
            cluster.conf_id = view.conf_id;
        }
        cluster.status = view.status;
        cluster.size = view.member_count;
        cluster.local_index = view.local_index;
        Ok(())
    }

    pub fn protocol_version(&self) -> i32 {
        self.protocol_version.load(Ordering::SeqCst)
    }

    pub fn set_protocol_version(&self, version: i32) {
        self.protocol_version.store(version, Ordering::SeqCst);
    }

    // =========================================================================
    // PROVIDER FACTS
    // =========================================================================

    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    pub fn set_connected(&self, connected: bool) {
        self.connected.store(connected, Ordering::SeqCst);
    }

    /// Whether a real provider is loaded (the global replication switch).
    pub fn is_replication_enabled(&self) -> bool {
        self.replication_enabled.load(Ordering::SeqCst)
    }

    pub fn set_replication_enabled(&self, enabled: bool) {
        self.replication_enabled.store(enabled, Ordering::SeqCst);
    }

    pub fn capabilities(&self) -> Capabilities {
        *self.capabilities.read().unwrap_or_else(|e| e.into_inner())
    }

    pub fn set_capabilities(&self, capabilities: Capabilities) {
        *self.capabilities.write().unwrap_or_else(|e| e.into_inner()) = capabilities;
    }

    /// Whether the provider accepts write sets in increments.
    pub fn incremental_data_collection(&self) -> bool {
        self.capabilities()
            .contains(Capabilities::WRITE_SET_INCREMENTS)
    }

    pub fn provider_identity(&self) -> ProviderIdentity {
        self.identity.read().unwrap_or_else(|e| e.into_inner()).clone()
    }

    pub fn set_provider_identity(&self, identity: ProviderIdentity) {
        *self.identity.write().unwrap_or_else(|e| e.into_inner()) = identity;
    }

    pub fn provider_options(&self) -> Option<String> {
        self.provider_options
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    pub fn set_provider_options(&self, options: Option<String>) {
        *self
            .provider_options
            .write()
            .unwrap_or_else(|e| e.into_inner()) = options;
    }

    pub fn auto_increment(&self) -> AutoIncrement {
        *self.auto_increment.read().unwrap_or_else(|e| e.into_inner())
    }

    pub fn set_auto_increment(&self, params: AutoIncrement) {
        *self.auto_increment.write().unwrap_or_else(|e| e.into_inner()) = params;
    }

    pub fn metrics(&self) -> &ReplicationMetrics {
        &self.metrics
    }

    pub fn metrics_snapshot(&self) -> MetricsSnapshot {
        self.metrics.snapshot()
    }

    /// Return to the post-construction state, keeping the anchor (it is the
    /// node's durable position) and the counters.
    pub fn teardown(&self) {
        {
            let mut guard = self.readiness();
            guard.ready = false;
            self.publish_member_status(&mut guard, MemberStatus::Undefined);
        }
        self.set_connected(false);
        self.set_replication_enabled(false);
        self.set_capabilities(Capabilities::empty());
        self.set_provider_options(None);
        self.set_provider_identity(ProviderIdentity::default());
        *self.cluster.write().unwrap_or_else(|e| e.into_inner()) = ClusterStatus::default();
        info!("replication state torn down");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::replication::Seqno;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn test_new_state_not_ready() {
        let state = ReplicationState::new();
        assert!(!state.is_ready());
        assert_eq!(state.member_status(), MemberStatus::Undefined);
        assert!(!state.anchor().is_set());
        assert_eq!(state.cluster().conf_id, -1);
    }

    #[test]
    fn test_set_ready_returns_previous() {
        let state = ReplicationState::new();
        assert!(!state.set_ready(true));
        assert!(state.set_ready(false));
        assert!(!state.is_ready());
    }

    #[test]
    fn test_wait_ready_wakes_on_set() {
        let state = Arc::new(ReplicationState::new());
        let waiter = {
            let state = Arc::clone(&state);
            thread::spawn(move || state.wait_ready(Duration::from_millis(10), || {}))
        };
        thread::sleep(Duration::from_millis(20));
        state.set_ready(true);
        waiter.join().unwrap();
    }

    #[test]
    fn test_wait_ready_timeout_expires() {
        let state = ReplicationState::new();
        assert!(!state.wait_ready_timeout(Duration::from_millis(20)));
        state.set_ready(true);
        assert!(state.wait_ready_timeout(Duration::from_millis(20)));
    }

    #[test]
    fn test_transition_rejects_illegal_edge() {
        let state = ReplicationState::new();
        state.transition_member_status(MemberStatus::Joined).unwrap();
        assert!(state.transition_member_status(MemberStatus::Joiner).is_err());
        assert_eq!(state.member_status(), MemberStatus::Joined);
    }

    #[test]
    fn test_mark_synced_once() {
        let state = ReplicationState::new();
        assert!(state.mark_synced());
        assert!(!state.mark_synced());
        assert!(state.is_ready());
        assert_eq!(state.member_status(), MemberStatus::Synced);
    }

    #[test]
    fn test_watchers_see_each_change() {
        let state = ReplicationState::new();
        let changes = state.watch_member_status();
        state.transition_member_status(MemberStatus::Joined).unwrap();
        state.transition_member_status(MemberStatus::Joined).unwrap();
        state.mark_synced();
        assert!(state.transition_member_status(MemberStatus::Joiner).is_err());

        let seen: Vec<_> = changes.try_iter().collect();
        assert_eq!(
            seen,
            vec![
                MemberStatusChange {
                    from: MemberStatus::Undefined,
                    to: MemberStatus::Joined,
                },
                MemberStatusChange {
                    from: MemberStatus::Joined,
                    to: MemberStatus::Synced,
                },
            ]
        );
    }

    #[test]
    fn test_refresh_cluster_rejects_older_conf() {
        let state = ReplicationState::new();
        let uuid = Uuid::new_v4();
        state
            .refresh_cluster(&ClusterView::primary(uuid, 5, 3, 0, Seqno::new(10)))
            .unwrap();
        let err = state
            .refresh_cluster(&ClusterView::primary(uuid, 4, 3, 0, Seqno::new(10)))
            .unwrap_err();
        assert!(!err.is_fatal());
        assert_eq!(state.cluster().conf_id, 5);
    }

    #[test]
    fn test_refresh_cluster_keeps_conf_on_undefined() {
        let state = ReplicationState::new();
        let uuid = Uuid::new_v4();
        state
            .refresh_cluster(&ClusterView::primary(uuid, 5, 3, 0, Seqno::new(10)))
            .unwrap();
        state
            .refresh_cluster(&ClusterView::non_primary(uuid, -1, 1, 0))
            .unwrap();
        let cluster = state.cluster();
        assert_eq!(cluster.conf_id, 5);
        assert_eq!(cluster.status, ViewStatus::NonPrimary);
        assert_eq!(cluster.size, 1);
    }

    #[test]
    fn test_incremental_data_collection_from_capabilities() {
        let state = ReplicationState::new();
        assert!(!state.incremental_data_collection());
        state.set_capabilities(Capabilities::WRITE_SET_INCREMENTS);
        assert!(state.incremental_data_collection());
    }

    #[test]
    fn test_teardown_keeps_anchor() {
        let anchor = Anchor::new(Uuid::new_v4(), Seqno::new(9));
        let state = ReplicationState::with_anchor(anchor);
        state.set_ready(true);
        state.set_connected(true);
        state.teardown();
        assert!(!state.is_ready());
        assert!(!state.is_connected());
        assert_eq!(state.anchor(), anchor);
    }
}
