//! Shared fixtures for the integration tests
//!
//! `ScriptedProvider` is a provider whose answers are set by the test and
//! whose calls are recorded. Tests keep an `Arc` to it and register a factory
//! handing out clones of that `Arc`, so they can inspect it and push events
//! through the sink the node installed.

#![allow(dead_code)]

use std::sync::{Arc, Condvar, Mutex, MutexGuard};

use aerocluster::provider::{
    Capabilities, EventReply, EventSink, ProviderEvent, ProviderInitArgs, ProviderLoadError,
    ProviderRegistry, ProviderResult, ReplicationProvider,
};
use aerocluster::replication::{
    Anchor, CertificationKey, ClusterView, FatalHandler, NodeCollaborators, NodeReplication,
    NoTransport, ReplicationConfig, ReplicationError, Seqno, SessionId, SnapshotTransport,
};

/// Answers and recorded calls.
pub struct Script {
    pub init: ProviderResult<()>,
    pub connect: ProviderResult<()>,
    pub to_execute_start: ProviderResult<Seqno>,
    pub to_execute_end: ProviderResult<()>,
    pub causal_read: ProviderResult<Seqno>,
    pub capabilities: Capabilities,
    pub options: Option<String>,

    pub init_args: Option<ProviderInitArgs>,
    pub events: Option<Arc<dyn EventSink>>,
    pub connect_calls: usize,
    pub disconnect_calls: usize,
    pub causal_read_calls: usize,
    pub started: Vec<(SessionId, Vec<CertificationKey>, Vec<u8>)>,
    pub ended: Vec<SessionId>,
}

impl Default for Script {
    fn default() -> Self {
        Self {
            init: Ok(()),
            connect: Ok(()),
            to_execute_start: Ok(Seqno::new(42)),
            to_execute_end: Ok(()),
            causal_read: Ok(Seqno::new(7)),
            capabilities: Capabilities::MULTI_MASTER | Capabilities::CERTIFICATION,
            options: Some("scripted.option = 1".to_string()),
            init_args: None,
            events: None,
            connect_calls: 0,
            disconnect_calls: 0,
            causal_read_calls: 0,
            started: Vec::new(),
            ended: Vec::new(),
        }
    }
}

/// Provider driven entirely by the test.
#[derive(Default)]
pub struct ScriptedProvider {
    script: Mutex<Script>,
    connected: Mutex<bool>,
    disconnected: Condvar,
}

impl ScriptedProvider {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn script(&self) -> MutexGuard<'_, Script> {
        self.script.lock().unwrap()
    }

    /// Deliver an event through the sink handed over at init.
    pub fn deliver(&self, event: ProviderEvent<'_>) -> EventReply {
        let sink = self
            .script()
            .events
            .clone()
            .expect("provider not initialised");
        sink.deliver(event)
    }

    pub fn deliver_view(&self, view: &ClusterView) -> EventReply {
        self.deliver(ProviderEvent::ViewChanged(view))
    }

    /// Registry resolving "scripted" to this instance.
    pub fn registry(self: &Arc<Self>) -> Arc<ProviderRegistry> {
        let mut registry = ProviderRegistry::new();
        let provider = Arc::clone(self);
        registry.register("scripted", move || {
            Ok(Box::new(Arc::clone(&provider)) as Box<dyn ReplicationProvider>)
        });
        Arc::new(registry)
    }
}

impl ReplicationProvider for ScriptedProvider {
    fn name(&self) -> &str {
        "scripted"
    }

    fn version(&self) -> &str {
        "1.0"
    }

    fn vendor(&self) -> &str {
        "tests"
    }

    fn init(&self, args: ProviderInitArgs) -> ProviderResult<()> {
        let mut script = self.script();
        script.events = Some(Arc::clone(&args.events));
        script.init_args = Some(args);
        script.init
    }

    fn capabilities(&self) -> Capabilities {
        self.script().capabilities
    }

    fn connect(&self, _cluster_name: &str, _address: &str, _donor: &str) -> ProviderResult<()> {
        let mut script = self.script();
        script.connect_calls += 1;
        if script.connect.is_ok() {
            *self.connected.lock().unwrap() = true;
        }
        script.connect
    }

    fn disconnect(&self) -> ProviderResult<()> {
        self.script().disconnect_calls += 1;
        *self.connected.lock().unwrap() = false;
        self.disconnected.notify_all();
        Ok(())
    }

    fn recv(&self, _applier: SessionId) -> ProviderResult<()> {
        let mut connected = self.connected.lock().unwrap();
        while *connected {
            connected = self.disconnected.wait(connected).unwrap();
        }
        Ok(())
    }

    fn causal_read(&self) -> ProviderResult<Seqno> {
        let mut script = self.script();
        script.causal_read_calls += 1;
        script.causal_read
    }

    fn to_execute_start(
        &self,
        session: SessionId,
        keys: &[CertificationKey],
        buffer: &[u8],
    ) -> ProviderResult<Seqno> {
        let mut script = self.script();
        script.started.push((session, keys.to_vec(), buffer.to_vec()));
        script.to_execute_start
    }

    fn to_execute_end(&self, session: SessionId) -> ProviderResult<()> {
        let mut script = self.script();
        script.ended.push(session);
        script.to_execute_end
    }

    fn options_get(&self) -> Option<String> {
        self.script().options.clone()
    }
}

/// Registry whose "broken" provider never loads.
pub fn broken_registry() -> Arc<ProviderRegistry> {
    let mut registry = ProviderRegistry::new();
    registry.register("broken", || Err(ProviderLoadError::new("broken", "missing symbol")));
    Arc::new(registry)
}

/// Fatal handler that records instead of aborting.
#[derive(Default)]
pub struct RecordingFatal {
    errors: Mutex<Vec<ReplicationError>>,
}

impl RecordingFatal {
    pub fn errors(&self) -> Vec<ReplicationError> {
        self.errors.lock().unwrap().clone()
    }
}

impl FatalHandler for RecordingFatal {
    fn on_fatal(&self, error: &ReplicationError) {
        self.errors.lock().unwrap().push(error.clone());
    }
}

/// Transport answering every request with a payload of fixed size.
pub struct FixedTransport {
    pub request_len: usize,
}

impl SnapshotTransport for FixedTransport {
    fn prepare_request(&self) -> Result<Vec<u8>, i32> {
        Ok(vec![0xAB; self.request_len])
    }

    fn donate(&self, _request: &[u8], _state: Anchor, _bypass: bool) -> Result<(), i32> {
        Ok(())
    }
}

/// Configuration selecting the scripted provider.
pub fn scripted_config() -> ReplicationConfig {
    let mut config = ReplicationConfig::with_provider("scripted", "gcomm://node-a,node-b");
    config.node_name = "node-a".to_string();
    config.node_incoming_address = "10.0.0.5:3306".to_string();
    config
}

/// A started node wired to a scripted provider.
pub struct Harness {
    pub node: NodeReplication,
    pub provider: Arc<ScriptedProvider>,
    pub fatal: Arc<RecordingFatal>,
}

impl Harness {
    pub fn start(config: ReplicationConfig) -> Self {
        Self::start_with(config, Arc::new(NoTransport), Anchor::undefined())
    }

    pub fn start_with(
        config: ReplicationConfig,
        transport: Arc<dyn SnapshotTransport>,
        anchor: Anchor,
    ) -> Self {
        let provider = ScriptedProvider::new();
        let fatal = Arc::new(RecordingFatal::default());
        let collaborators = NodeCollaborators {
            transport,
            fatal: fatal.clone(),
            ..NodeCollaborators::default()
        };
        let node = NodeReplication::resume(config, provider.registry(), collaborators, anchor)
            .expect("valid configuration");
        node.start().expect("node starts");
        Self {
            node,
            provider,
            fatal,
        }
    }
}
