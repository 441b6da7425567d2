//! Membership and View Tests
//!
//! Views delivered through the node's event sink:
//! - Non-primary views never move the anchor
//! - A state gap makes the node a joiner and hands back a transfer request
//! - Configuration ids never go backwards
//! - An anchor from another cluster stops the node
//! - The join lifecycle only follows allowed transitions

mod common;

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use aerocluster::provider::{EventReply, ProviderEvent, ProviderMode, ProviderStatus};
use aerocluster::replication::{
    Anchor, AutoIncrement, ClusterView, EngineInitializer, MemberStatus, NodeCollaborators,
    NodeReplication, NoTransport, ReplicationErrorKind, ReplicationResult, ReplicationState, Seqno,
    TransferPhase, ViewStatus,
};
use common::{scripted_config, FixedTransport, Harness, RecordingFatal, ScriptedProvider};
use uuid::Uuid;

fn joined_harness(uuid: Uuid) -> Harness {
    let harness = Harness::start(scripted_config());
    let reply = harness
        .provider
        .deliver_view(&ClusterView::primary(uuid, 1, 3, 1, Seqno::new(101)));
    assert_eq!(reply, EventReply::Ack);
    harness
}

// =============================================================================
// Primary and non-primary views
// =============================================================================

#[test]
fn test_first_primary_view_sets_anchor() {
    let uuid = Uuid::new_v4();
    let harness = joined_harness(uuid);
    let state = harness.node.state();

    assert_eq!(state.anchor(), Anchor::new(uuid, Seqno::new(100)));
    assert_eq!(state.member_status(), MemberStatus::Joined);

    let cluster = state.cluster();
    assert_eq!(cluster.state_uuid, uuid);
    assert_eq!(cluster.conf_id, 1);
    assert_eq!(cluster.status, ViewStatus::Primary);
    assert_eq!(cluster.size, 3);
    assert_eq!(cluster.local_index, 1);
    assert_eq!(state.auto_increment(), AutoIncrement { offset: 2, increment: 3 });
}

#[test]
fn test_non_primary_view_keeps_anchor() {
    let uuid = Uuid::new_v4();
    let harness = joined_harness(uuid);
    harness.provider.deliver(ProviderEvent::Synced);
    assert!(harness.node.gate().is_ready());
    let before = harness.node.state().anchor();

    let reply = harness
        .provider
        .deliver_view(&ClusterView::non_primary(uuid, 2, 1, 0));

    assert_eq!(reply, EventReply::Ack);
    let state = harness.node.state();
    assert_eq!(state.anchor(), before);
    assert!(!state.is_ready());
    assert_eq!(state.member_status(), MemberStatus::Undefined);
    assert_eq!(state.cluster().status, ViewStatus::NonPrimary);
}

#[test]
fn test_known_history_keeps_member_status() {
    let uuid = Uuid::new_v4();
    let harness = joined_harness(uuid);
    harness.provider.deliver(ProviderEvent::Synced);

    harness
        .provider
        .deliver_view(&ClusterView::primary(uuid, 2, 4, 3, Seqno::new(150)));

    let state = harness.node.state();
    assert_eq!(state.member_status(), MemberStatus::Synced);
    assert!(state.is_ready());
    assert_eq!(state.anchor(), Anchor::new(uuid, Seqno::new(100)));
    assert_eq!(state.auto_increment(), AutoIncrement { offset: 4, increment: 4 });
}

// =============================================================================
// State gap
// =============================================================================

#[test]
fn test_state_gap_requests_transfer() {
    let harness = Harness::start_with(
        scripted_config(),
        Arc::new(FixedTransport { request_len: 120 }),
        Anchor::undefined(),
    );
    let client = harness.node.sessions().open_client(true, false);
    let uuid = Uuid::new_v4();

    let reply = harness
        .provider
        .deliver_view(&ClusterView::primary(uuid, 3, 3, 2, Seqno::new(500)).with_state_gap());

    match reply {
        EventReply::SstRequest(request) => assert_eq!(request.len(), 120),
        other => panic!("expected a transfer request, got {:?}", other),
    }
    let state = harness.node.state();
    assert_eq!(state.member_status(), MemberStatus::Joiner);
    assert!(!state.is_ready());
    assert!(client.is_killed());
    assert!(!state.anchor().is_set());
    assert_eq!(harness.node.sst().phase(), TransferPhase::Prepared);
}

#[test]
fn test_completed_transfer_joins() {
    let harness = Harness::start_with(
        scripted_config(),
        Arc::new(FixedTransport { request_len: 16 }),
        Anchor::undefined(),
    );
    let uuid = Uuid::new_v4();
    harness
        .provider
        .deliver_view(&ClusterView::primary(uuid, 3, 3, 2, Seqno::new(500)).with_state_gap());

    harness.node.sst().complete(uuid, Seqno::new(499), true).unwrap();

    let state = harness.node.state();
    assert_eq!(state.anchor(), Anchor::new(uuid, Seqno::new(499)));
    assert_eq!(state.member_status(), MemberStatus::Joined);

    harness.provider.deliver(ProviderEvent::Synced);
    assert!(state.is_ready());
    assert_eq!(state.member_status(), MemberStatus::Synced);
}

#[test]
fn test_state_gap_without_transport_needs_operator() {
    let harness = Harness::start(scripted_config());
    let reply = harness.provider.deliver_view(
        &ClusterView::primary(Uuid::new_v4(), 1, 2, 1, Seqno::new(9)).with_state_gap(),
    );

    assert_eq!(reply, EventReply::Ack);
    assert_eq!(harness.node.state().member_status(), MemberStatus::Undefined);
    assert!(!harness.node.gate().is_ready());
    assert!(harness.fatal.errors().is_empty());
}

// =============================================================================
// Configuration ids and fatal views
// =============================================================================

#[test]
fn test_stale_view_is_refused() {
    let uuid = Uuid::new_v4();
    let harness = Harness::start(scripted_config());
    harness
        .provider
        .deliver_view(&ClusterView::primary(uuid, 5, 2, 0, Seqno::new(1)));

    let reply = harness
        .provider
        .deliver_view(&ClusterView::non_primary(uuid, 4, 1, 0));

    assert_eq!(reply, EventReply::Failed(ProviderStatus::Warning));
    let state = harness.node.state();
    assert_eq!(state.cluster().conf_id, 5);
    assert_eq!(state.cluster().status, ViewStatus::Primary);
    assert_eq!(state.member_status(), MemberStatus::Joined);
    assert!(harness.fatal.errors().is_empty());
}

#[test]
fn test_conf_ids_never_decrease() {
    let uuid = Uuid::new_v4();
    let harness = Harness::start(scripted_config());
    let mut highest = -1;
    for conf_id in [1, 3, 2, 3, 7, 6, 8] {
        harness
            .provider
            .deliver_view(&ClusterView::primary(uuid, conf_id, 2, 0, Seqno::new(1)));
        let seen = harness.node.state().cluster().conf_id;
        assert!(seen >= highest, "conf id went from {} to {}", highest, seen);
        highest = seen;
    }
    assert_eq!(highest, 8);
}

#[test]
fn test_foreign_anchor_is_fatal() {
    let local = Anchor::new(Uuid::new_v4(), Seqno::new(77));
    let harness = Harness::start_with(scripted_config(), Arc::new(NoTransport), local);

    let reply = harness
        .provider
        .deliver_view(&ClusterView::primary(Uuid::new_v4(), 1, 2, 1, Seqno::new(78)));

    assert_eq!(reply, EventReply::Failed(ProviderStatus::Fatal));
    let errors = harness.fatal.errors();
    assert_eq!(errors.len(), 1);
    assert_eq!(errors[0].kind, ReplicationErrorKind::StateInconsistency);
    assert_eq!(harness.node.state().anchor(), local);
}

#[test]
fn test_unsupported_protocol_is_fatal() {
    let harness = Harness::start(scripted_config());
    let reply = harness.provider.deliver_view(
        &ClusterView::primary(Uuid::new_v4(), 1, 2, 0, Seqno::new(1)).with_protocol_version(2),
    );

    assert_eq!(reply, EventReply::Failed(ProviderStatus::Fatal));
    let errors = harness.fatal.errors();
    assert_eq!(errors.len(), 1);
    assert_eq!(errors[0].kind, ReplicationErrorKind::UnsupportedProtocol);
}

#[test]
fn test_protocol_downgrade_closes_clients() {
    let uuid = Uuid::new_v4();
    let harness = joined_harness(uuid);
    harness.provider.deliver(ProviderEvent::Synced);
    let client = harness.node.sessions().open_client(true, false);

    harness.provider.deliver_view(
        &ClusterView::primary(uuid, 2, 3, 1, Seqno::new(120)).with_protocol_version(0),
    );

    assert!(client.is_killed());
    assert_eq!(harness.node.state().protocol_version(), 0);
    assert!(harness.node.gate().is_ready());
}

// =============================================================================
// Engines initialised before the transfer
// =============================================================================

#[derive(Default)]
struct CountingEngines {
    calls: AtomicUsize,
}

impl EngineInitializer for CountingEngines {
    fn initialize(&self) -> ReplicationResult<()> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

#[test]
fn test_engines_first_join_initialises_engines_once() {
    let mut config = scripted_config();
    config.sst_init_engines_first = true;
    config.slave_threads = 2;
    let provider = ScriptedProvider::new();
    let engines = Arc::new(CountingEngines::default());
    let collaborators = NodeCollaborators {
        engines: engines.clone(),
        fatal: Arc::new(RecordingFatal::default()),
        ..NodeCollaborators::default()
    };
    let node = Arc::new(NodeReplication::new(config, provider.registry(), collaborators).unwrap());

    // Startup blocks until the first view completes the transfer
    let startup = {
        let node = Arc::clone(&node);
        thread::spawn(move || node.start())
    };
    while provider.script().events.is_none() || node.applier_count() == 0 {
        thread::sleep(Duration::from_millis(1));
    }
    assert_eq!(engines.calls.load(Ordering::SeqCst), 0);

    let uuid = Uuid::new_v4();
    let reply = provider.deliver_view(&ClusterView::primary(uuid, 1, 1, 0, Seqno::new(1)));

    assert_eq!(reply, EventReply::Ack);
    assert_eq!(startup.join().unwrap().unwrap(), ProviderMode::Loaded);
    assert_eq!(engines.calls.load(Ordering::SeqCst), 1);
    assert_eq!(node.applier_count(), 2);
    assert_eq!(node.state().anchor(), Anchor::new(uuid, Seqno::UNASSIGNED));
    assert_eq!(node.state().member_status(), MemberStatus::Joined);
    node.stop();
}

// =============================================================================
// Lifecycle transitions
// =============================================================================

#[test]
fn test_member_status_transitions() {
    let state = ReplicationState::new();
    assert_eq!(state.member_status(), MemberStatus::Undefined);

    assert!(state.transition_member_status(MemberStatus::Joiner).is_ok());
    assert!(state.transition_member_status(MemberStatus::Joined).is_ok());
    assert!(state.transition_member_status(MemberStatus::Synced).is_ok());

    let err = state
        .transition_member_status(MemberStatus::Joiner)
        .unwrap_err();
    assert_eq!(err.kind, ReplicationErrorKind::IllegalTransition);
    assert_eq!(state.member_status(), MemberStatus::Synced);

    assert!(state.transition_member_status(MemberStatus::Undefined).is_ok());
}

fn expect_transfer_request(reply: EventReply) {
    match reply {
        EventReply::SstRequest(request) => assert_eq!(request.len(), 120),
        other => panic!("expected a transfer request, got {:?}", other),
    }
}

#[test]
fn test_view_sequence_follows_allowed_edges() {
    let harness = Harness::start_with(
        scripted_config(),
        Arc::new(FixedTransport { request_len: 120 }),
        Anchor::undefined(),
    );
    let state = harness.node.state();
    let changes = state.watch_member_status();
    let uuid = Uuid::new_v4();

    // First join, then a gap while Joined
    harness
        .provider
        .deliver_view(&ClusterView::primary(uuid, 1, 3, 1, Seqno::new(101)));
    expect_transfer_request(
        harness
            .provider
            .deliver_view(&ClusterView::primary(uuid, 2, 3, 1, Seqno::new(300)).with_state_gap()),
    );
    assert_eq!(state.member_status(), MemberStatus::Joiner);
    harness.node.sst().complete(uuid, Seqno::new(299), true).unwrap();
    harness.provider.deliver(ProviderEvent::Synced);

    // A gap while Synced
    expect_transfer_request(
        harness
            .provider
            .deliver_view(&ClusterView::primary(uuid, 3, 3, 1, Seqno::new(400)).with_state_gap()),
    );
    assert_eq!(state.member_status(), MemberStatus::Joiner);
    harness.node.sst().complete(uuid, Seqno::new(399), true).unwrap();

    // Lose the primary component, then rejoin with known history
    harness
        .provider
        .deliver_view(&ClusterView::non_primary(uuid, 4, 1, 0));
    harness
        .provider
        .deliver_view(&ClusterView::primary(uuid, 5, 3, 1, Seqno::new(401)));
    harness.provider.deliver(ProviderEvent::Synced);
    assert!(harness.fatal.errors().is_empty());

    let observed: Vec<_> = changes.try_iter().map(|c| (c.from, c.to)).collect();
    for (from, to) in &observed {
        assert!(from.can_transition_to(*to), "edge {:?} -> {:?}", from, to);
    }

    use MemberStatus::*;
    assert_eq!(
        observed,
        vec![
            (Undefined, Joined),
            (Joined, Undefined),
            (Undefined, Joiner),
            (Joiner, Joined),
            (Joined, Synced),
            (Synced, Undefined),
            (Undefined, Joiner),
            (Joiner, Joined),
            (Joined, Undefined),
            (Undefined, Synced),
        ]
    );
}

#[test]
fn test_ready_wait_blocks_until_synced() {
    let harness = Arc::new(Harness::start(scripted_config()));
    harness
        .provider
        .deliver_view(&ClusterView::primary(Uuid::new_v4(), 1, 1, 0, Seqno::new(1)));

    let waiter = {
        let harness = Arc::clone(&harness);
        thread::spawn(move || harness.node.gate().ready_wait())
    };
    thread::sleep(Duration::from_millis(20));
    assert!(!waiter.is_finished());

    harness.provider.deliver(ProviderEvent::Synced);
    waiter.join().unwrap();
    assert!(harness.node.gate().is_ready());
}
