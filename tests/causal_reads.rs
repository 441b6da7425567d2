//! Causal Read Tests
//!
//! - Sessions without causal reads never issue the barrier
//! - Inside a transaction the barrier is refused before reaching the provider
//! - Provider failures map to the client-visible error classes

mod common;

use std::sync::Arc;

use aerocluster::provider::{ProviderRegistry, ProviderStatus};
use aerocluster::replication::{
    NodeCollaborators, NodeReplication, ReplicationConfig, ReplicationErrorKind, Seqno,
    Statement, UserErrorClass,
};
use common::{scripted_config, Harness};

#[test]
fn test_barrier_returns_provider_position() {
    let harness = Harness::start(scripted_config());
    let session = harness.node.sessions().open_client(true, true);

    let reached = harness.node.causal().wait(&session).unwrap();

    assert_eq!(reached, Some(Seqno::new(7)));
    assert_eq!(harness.provider.script().causal_read_calls, 1);
    assert_eq!(harness.node.state().metrics_snapshot().causal_waits, 1);
}

#[test]
fn test_no_barrier_without_causal_reads() {
    let harness = Harness::start(scripted_config());
    let plain = harness.node.sessions().open_client(true, false);
    let not_replicated = harness.node.sessions().open_client(false, true);

    assert_eq!(harness.node.causal().wait(&plain).unwrap(), None);
    assert_eq!(harness.node.causal().wait(&not_replicated).unwrap(), None);
    assert_eq!(harness.provider.script().causal_read_calls, 0);
}

#[test]
fn test_barrier_refused_inside_transaction() {
    let harness = Harness::start(scripted_config());
    let session = harness.node.sessions().open_client(true, true);
    session.set_in_multi_statement_trx(true);

    let err = harness.node.causal().wait(&session).unwrap_err();

    assert_eq!(err.kind, ReplicationErrorKind::NotSupported);
    assert_eq!(err.user_error_class(), UserErrorClass::NotSupportedYet);
    assert_eq!(harness.provider.script().causal_read_calls, 0);
}

#[test]
fn test_unsupported_barrier_is_a_configuration_error() {
    let harness = Harness::start(scripted_config());
    harness.provider.script().causal_read = Err(ProviderStatus::NotImplemented);
    let session = harness.node.sessions().open_client(true, true);

    let err = harness.node.causal().wait(&session).unwrap_err();

    assert_eq!(err.kind, ReplicationErrorKind::ConfigurationError);
    assert_eq!(err.user_error_class(), UserErrorClass::ConfigurationError);
}

#[test]
fn test_failed_barrier_is_a_read_error() {
    let harness = Harness::start(scripted_config());
    harness.provider.script().causal_read = Err(ProviderStatus::ConnFail);
    let session = harness.node.sessions().open_client(true, true);

    let err = harness.node.causal().wait(&session).unwrap_err();

    assert_eq!(err.kind, ReplicationErrorKind::ReadFailed);
    assert_eq!(err.user_error_class(), UserErrorClass::ErrorOnRead);
    assert!(err.is_retryable());
    assert_eq!(
        harness.node.state().metrics_snapshot().causal_wait_failures,
        1
    );
}

#[test]
fn test_disabled_node_reads_without_barrier() {
    let node = NodeReplication::new(
        ReplicationConfig::disabled(),
        Arc::new(ProviderRegistry::new()),
        NodeCollaborators::default(),
    )
    .unwrap();
    node.start().unwrap();
    let session = node.sessions().open_client(true, true);

    assert_eq!(node.causal().wait(&session).unwrap(), None);
}

#[test]
fn test_loopback_barrier_reaches_last_ordered_statement() {
    let config = ReplicationConfig::with_provider("loopback", "loopback://causal");
    let node = NodeReplication::new(
        config,
        Arc::new(ProviderRegistry::new()),
        NodeCollaborators::default(),
    )
    .unwrap();
    node.start().unwrap();
    node.gate().ready_wait();

    let writer = node.sessions().open_client(true, false);
    let seqno = node
        .toi()
        .begin(
            &writer,
            &Statement::new(Some("shop"), None, "CREATE DATABASE shop"),
        )
        .unwrap()
        .unwrap();
    node.toi().end(&writer).unwrap();

    let reader = node.sessions().open_client(true, true);
    assert_eq!(node.causal().wait(&reader).unwrap(), Some(seqno));
}

#[test]
fn test_closed_session_cannot_read() {
    let harness = Harness::start(scripted_config());
    let session = harness.node.sessions().open_client(true, true);
    harness.node.sessions().close_client_sessions();

    let err = harness.node.causal().wait(&session).unwrap_err();

    assert_eq!(err.kind, ReplicationErrorKind::ConnectionClosed);
    assert_eq!(err.user_error_class(), UserErrorClass::ConnectionClosed);
    assert_eq!(harness.provider.script().causal_read_calls, 0);
}
