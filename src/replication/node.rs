//! Node replication lifecycle
//!
//! `NodeReplication` wires the components together and runs the startup
//! sequence:
//!
//! 1. Init the provider (falls back to standalone if it cannot load)
//! 2. Without a cluster address, stop here
//! 3. If engines initialise before the transfer, grab the coordinator
//! 4. Connect
//! 5. Start the rollback helper and one applier
//! 6. If grabbed: wait for the transfer, initialise engines, release the
//!    view handler
//! 7. Start the remaining appliers
//!
//! `stop` reverses it: disconnect, close clients, join appliers, stop the
//! rollback helper.

use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use tracing::{debug, info, warn};

use super::causal::CausalReadGate;
use super::config::ReplicationConfig;
use super::conflict::ConflictResolver;
use super::dispatch::{AbortOnFatal, EventDispatcher, FatalHandler, LoggingApplier, WriteSetApplier};
use super::errors::{ReplicationError, ReplicationResult};
use super::gate::ReplicationGate;
use super::membership::MembershipController;
use super::rollback::{NoopAborter, RollbackHelper, TransactionAborter};
use super::session::SessionRegistry;
use super::sst::{NoTransport, SnapshotTransport, StateTransferCoordinator};
use super::state::ReplicationState;
use super::status::StatusSnapshot;
use super::toi::TotalOrderIsolation;
use super::view::Anchor;
use crate::observability::ProviderLogBridge;
use crate::provider::{ProviderHandle, ProviderMode, ProviderRegistry};

/// Host hook initialising storage engines.
pub trait EngineInitializer: Send + Sync {
    fn initialize(&self) -> ReplicationResult<()>;
}

/// Nothing to initialise.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoEngines;

impl EngineInitializer for NoEngines {
    fn initialize(&self) -> ReplicationResult<()> {
        Ok(())
    }
}

/// Host services the replication layer calls into.
#[derive(Clone)]
pub struct NodeCollaborators {
    pub transport: Arc<dyn SnapshotTransport>,
    pub applier: Arc<dyn WriteSetApplier>,
    pub aborter: Arc<dyn TransactionAborter>,
    pub engines: Arc<dyn EngineInitializer>,
    pub fatal: Arc<dyn FatalHandler>,
}

impl Default for NodeCollaborators {
    fn default() -> Self {
        Self {
            transport: Arc::new(NoTransport),
            applier: Arc::new(LoggingApplier),
            aborter: Arc::new(NoopAborter),
            engines: Arc::new(NoEngines),
            fatal: Arc::new(AbortOnFatal),
        }
    }
}

/// Replication for one database node.
pub struct NodeReplication {
    config: ReplicationConfig,
    state: Arc<ReplicationState>,
    sessions: Arc<SessionRegistry>,
    provider: Arc<ProviderHandle>,
    sst: Arc<StateTransferCoordinator>,
    membership: Arc<MembershipController>,
    gate: ReplicationGate,
    toi: TotalOrderIsolation,
    conflicts: ConflictResolver,
    causal: CausalReadGate,
    rollback: Arc<RollbackHelper>,
    dispatcher: Arc<EventDispatcher>,
    engines: Arc<dyn EngineInitializer>,
    appliers: Mutex<Vec<JoinHandle<()>>>,
}

impl NodeReplication {
    /// Build a node from a validated configuration.
    pub fn new(
        config: ReplicationConfig,
        registry: Arc<ProviderRegistry>,
        collaborators: NodeCollaborators,
    ) -> ReplicationResult<Self> {
        Self::resume(config, registry, collaborators, Anchor::undefined())
    }

    /// Build a node resuming from a persisted anchor.
    pub fn resume(
        config: ReplicationConfig,
        registry: Arc<ProviderRegistry>,
        collaborators: NodeCollaborators,
        anchor: Anchor,
    ) -> ReplicationResult<Self> {
        config.validate()?;

        let state = Arc::new(ReplicationState::with_anchor(anchor));
        let sessions = Arc::new(SessionRegistry::new());
        let provider = Arc::new(ProviderHandle::new(registry, Arc::clone(&state)));
        let sst = Arc::new(StateTransferCoordinator::new(
            Arc::clone(&state),
            collaborators.transport,
        ));
        let membership = Arc::new(MembershipController::new(
            Arc::clone(&state),
            Arc::clone(&sst),
            Arc::clone(&sessions),
            &config,
        ));
        let gate = ReplicationGate::new(
            Arc::clone(&state),
            Duration::from_millis(config.ready_wait_log_interval_ms),
        );
        let rollback = Arc::new(RollbackHelper::new(collaborators.aborter));
        let dispatcher = Arc::new(EventDispatcher::new(
            Arc::clone(&state),
            Arc::clone(&membership),
            gate.clone(),
            Arc::clone(&sst),
            collaborators.applier,
            collaborators.fatal,
            ProviderLogBridge::new(config.debug),
        ));

        Ok(Self {
            toi: TotalOrderIsolation::new(Arc::clone(&state), Arc::clone(&provider), &config),
            conflicts: ConflictResolver::new(Arc::clone(&state), Arc::clone(&rollback)),
            causal: CausalReadGate::new(Arc::clone(&state), Arc::clone(&provider)),
            config,
            state,
            sessions,
            provider,
            sst,
            membership,
            gate,
            rollback,
            dispatcher,
            engines: collaborators.engines,
            appliers: Mutex::new(Vec::new()),
        })
    }

    /// Run the startup sequence.
    pub fn start(&self) -> ReplicationResult<ProviderMode> {
        let mode = self.provider.init(&self.config, self.dispatcher.clone())?;

        if !self.config.has_cluster_address() {
            info!("no cluster address, replication not started");
            return Ok(mode);
        }
        if mode.is_disabled() {
            self.provider.connect(&self.config)?;
            return Ok(mode);
        }

        let engines_first = self.config.sst_init_engines_first;
        if engines_first {
            self.sst.grab();
        }

        self.provider.connect(&self.config)?;
        self.rollback.start()?;
        self.spawn_appliers(1)?;

        if engines_first {
            let anchor = self.sst.wait()?;
            info!(anchor = %anchor, "state received, initialising storage engines");
            let initialized = self.engines.initialize();
            self.sst.engines_initialized();
            initialized?;
        }

        self.spawn_appliers(self.config.slave_threads.saturating_sub(1))?;
        Ok(mode)
    }

    fn spawn_appliers(&self, count: usize) -> ReplicationResult<()> {
        let mut appliers = self.appliers.lock().unwrap_or_else(|e| e.into_inner());
        for _ in 0..count {
            let provider = self.provider.provider()?;
            let sessions = Arc::clone(&self.sessions);
            let name = format!("applier-{}", appliers.len() + 1);
            let handle = thread::Builder::new()
                .name(name)
                .spawn(move || {
                    let session = sessions.open_applier();
                    debug!(session = %session.id(), "applier started");
                    if let Err(status) = provider.recv(session.id()) {
                        warn!(session = %session.id(), status = %status, "applier stopped on provider error");
                    }
                    if let Err(e) = sessions.unregister(&session) {
                        warn!(error = %e, "applier session not unregistered");
                    }
                    debug!(session = %session.id(), "applier exited");
                })
                .map_err(|e| ReplicationError::invalid_state(format!("cannot spawn applier: {}", e)))?;
            appliers.push(handle);
        }
        Ok(())
    }

    /// Disconnect and wait for appliers to finish.
    pub fn stop(&self) {
        self.provider.disconnect(&self.sessions);

        let appliers: Vec<_> = self
            .appliers
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .drain(..)
            .collect();
        let count = appliers.len();
        for applier in appliers {
            if applier.join().is_err() {
                warn!("applier thread panicked");
            }
        }
        if count > 0 {
            info!(appliers = count, "appliers stopped");
        }
        self.rollback.stop();
    }

    /// Stop, unload the provider and tear the state down.
    pub fn shutdown(&self) {
        self.stop();
        self.provider.deinit();
        self.state.teardown();
    }

    /// Number of running applier threads.
    pub fn applier_count(&self) -> usize {
        self.appliers
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .len()
    }

    pub fn status(&self) -> StatusSnapshot {
        StatusSnapshot::capture(&self.state, self.toi.in_flight())
    }

    pub fn config(&self) -> &ReplicationConfig {
        &self.config
    }

    pub fn state(&self) -> &Arc<ReplicationState> {
        &self.state
    }

    pub fn sessions(&self) -> &Arc<SessionRegistry> {
        &self.sessions
    }

    pub fn provider(&self) -> &Arc<ProviderHandle> {
        &self.provider
    }

    pub fn sst(&self) -> &Arc<StateTransferCoordinator> {
        &self.sst
    }

    pub fn membership(&self) -> &Arc<MembershipController> {
        &self.membership
    }

    pub fn gate(&self) -> &ReplicationGate {
        &self.gate
    }

    pub fn toi(&self) -> &TotalOrderIsolation {
        &self.toi
    }

    pub fn conflicts(&self) -> &ConflictResolver {
        &self.conflicts
    }

    pub fn causal(&self) -> &CausalReadGate {
        &self.causal
    }

    pub fn dispatcher(&self) -> &Arc<EventDispatcher> {
        &self.dispatcher
    }
}

impl Drop for NodeReplication {
    fn drop(&mut self) {
        if self.applier_count() > 0 || self.rollback.is_running() {
            self.stop();
        }
    }
}
