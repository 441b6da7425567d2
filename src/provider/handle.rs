//! Provider lifecycle
//!
//! Load → init → connect → ... → disconnect → deinit.
//!
//! A provider that fails to load is replaced once by the "none" provider and
//! the node continues standalone. If even that fails the error is fatal.

use std::net::UdpSocket;
use std::sync::{Arc, RwLock};

use tracing::{error, info, warn};

use super::{
    EventSink, LoadedProvider, ProviderIdentity, ProviderInitArgs, ProviderRegistry,
    ProviderStatus, ReplicationProvider,
};
use crate::observability::Event;
use crate::provider::Capabilities;
use crate::replication::{
    ReplicationConfig, ReplicationError, ReplicationResult, ReplicationState, SessionRegistry,
    PROVIDER_NONE,
};

/// Which provider ended up active after `init`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProviderMode {
    /// Replication disabled by configuration
    Disabled,
    /// The configured provider failed to load; running standalone
    FellBackToDisabled,
    /// A real provider is active
    Loaded,
}

impl ProviderMode {
    pub fn is_disabled(&self) -> bool {
        !matches!(self, Self::Loaded)
    }
}

/// Owner of the active provider.
pub struct ProviderHandle {
    registry: Arc<ProviderRegistry>,
    state: Arc<ReplicationState>,
    provider: RwLock<Option<Arc<dyn ReplicationProvider>>>,
    mode: RwLock<Option<ProviderMode>>,
}

impl ProviderHandle {
    pub fn new(registry: Arc<ProviderRegistry>, state: Arc<ReplicationState>) -> Self {
        Self {
            registry,
            state,
            provider: RwLock::new(None),
            mode: RwLock::new(None),
        }
    }

    /// Load the configured provider and hand it the event sink.
    ///
    /// With the disabled provider the node is ready immediately.
    pub fn init(
        &self,
        config: &ReplicationConfig,
        events: Arc<dyn EventSink>,
    ) -> ReplicationResult<ProviderMode> {
        self.state.set_ready(false);

        if config.is_provider_disabled() {
            return self.init_disabled(config, events, ProviderMode::Disabled);
        }

        let provider = match self.registry.load(&config.provider) {
            Ok(provider) => provider,
            Err(e) => {
                error!(
                    event = %Event::ProviderLoadFailed,
                    provider = %config.provider,
                    error = %e,
                    "reverting to no provider"
                );
                return self.init_disabled(config, events, ProviderMode::FellBackToDisabled);
            }
        };

        let loaded = LoadedProvider::new(config.provider.trim(), provider);
        let identity = loaded.identity().clone();
        let args = ProviderInitArgs {
            data_dir: config.data_dir.clone(),
            node_name: config.node_name.clone(),
            node_incoming: resolve_incoming_address(config),
            options: config.provider_options.clone(),
            max_protocol_version: config.max_protocol_version,
            state: self.state.anchor(),
            events,
        };
        if let Err(status) = loaded.init(args) {
            error!(provider = %identity.name, status = %status, "provider init failed, must shut down");
            return Err(ReplicationError::provider_init(format!(
                "provider '{}' init failed: {}",
                identity.name, status
            )));
        }

        info!(
            event = %Event::ProviderLoaded,
            name = %identity.name,
            version = %identity.version,
            vendor = %identity.vendor,
            "provider loaded"
        );
        self.state.set_provider_identity(identity);
        self.state.set_replication_enabled(true);
        self.install(Arc::new(loaded), ProviderMode::Loaded);
        Ok(ProviderMode::Loaded)
    }

    fn init_disabled(
        &self,
        config: &ReplicationConfig,
        events: Arc<dyn EventSink>,
        mode: ProviderMode,
    ) -> ReplicationResult<ProviderMode> {
        let provider = self.registry.load(PROVIDER_NONE).map_err(|e| {
            error!(event = %Event::ProviderLoadFailed, error = %e, "could not revert to no provider");
            ReplicationError::provider_load(format!("could not revert to no provider: {}", e))
        })?;

        let args = ProviderInitArgs {
            data_dir: config.data_dir.clone(),
            node_name: config.node_name.clone(),
            node_incoming: None,
            options: String::new(),
            max_protocol_version: config.max_protocol_version,
            state: self.state.anchor(),
            events,
        };
        provider.init(args).map_err(|status| {
            ReplicationError::provider_load(format!("no provider failed to initialise: {}", status))
        })?;

        if mode == ProviderMode::FellBackToDisabled {
            warn!(event = %Event::ProviderFallback, "running without replication");
        }
        self.state.set_provider_identity(ProviderIdentity::bounded(
            provider.name(),
            provider.version(),
            provider.vendor(),
        ));
        self.state.set_replication_enabled(false);
        self.install(Arc::from(provider), mode);
        self.state.set_ready(true);
        Ok(mode)
    }

    fn install(&self, provider: Arc<dyn ReplicationProvider>, mode: ProviderMode) {
        *self.provider.write().unwrap_or_else(|e| e.into_inner()) = Some(provider);
        *self.mode.write().unwrap_or_else(|e| e.into_inner()) = Some(mode);
    }

    /// Join the configured cluster.
    ///
    /// A no-op for the disabled provider. Without a cluster address the node
    /// stays unready, waiting for one.
    pub fn connect(&self, config: &ReplicationConfig) -> ReplicationResult<()> {
        let provider = self.provider()?;
        if self.is_disabled() {
            self.state.set_ready(true);
            return Ok(());
        }
        if !config.has_cluster_address() {
            self.state.set_ready(false);
            info!("no cluster address configured, waiting for one");
            return Ok(());
        }

        let address = config.cluster_address.trim();
        if !address.contains("://") {
            return Err(ReplicationError::configuration_error(format!(
                "unrecognized cluster address: '{}'",
                address
            )));
        }

        info!(
            event = %Event::ReplicationStart,
            cluster = %config.cluster_name,
            address = %address,
            "starting replication"
        );
        match provider.connect(&config.cluster_name, address, &config.sst_donor) {
            Ok(()) => {}
            Err(ProviderStatus::AddressNotSupported) => {
                error!(event = %Event::ConnectFailed, address = %address, "unrecognized cluster address");
                return Err(ReplicationError::configuration_error(format!(
                    "unrecognized cluster address: '{}'",
                    address
                )));
            }
            Err(status) => {
                error!(event = %Event::ConnectFailed, status = %status, "provider connect failed");
                return Err(ReplicationError::connect_failed(format!(
                    "provider connect failed: {}",
                    status
                )));
            }
        }

        self.state.set_connected(true);
        self.state.set_capabilities(provider.capabilities());
        match provider.options_get() {
            Some(options) => self.state.set_provider_options(Some(options)),
            None => warn!("failed to get provider options"),
        }
        Ok(())
    }

    /// Leave the cluster. Connected and ready are cleared before client
    /// sessions are closed; the caller drains appliers afterwards.
    pub fn disconnect(&self, sessions: &SessionRegistry) {
        let provider = match self.provider() {
            Ok(provider) => provider,
            Err(_) => {
                info!("provider was not loaded, nothing to stop");
                return;
            }
        };

        info!(event = %Event::ReplicationStop, "stopping replication");
        self.state.set_connected(false);
        self.state.set_ready(false);
        if let Err(status) = provider.disconnect() {
            warn!(status = %status, "provider disconnect failed");
        }
        sessions.close_client_sessions();
    }

    /// Unload the provider and forget its identity.
    pub fn deinit(&self) {
        let unloaded = self
            .provider
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .take();
        *self.mode.write().unwrap_or_else(|e| e.into_inner()) = None;
        self.state.set_provider_identity(ProviderIdentity::default());
        self.state.set_replication_enabled(false);
        self.state.set_capabilities(Capabilities::empty());
        if let Some(provider) = unloaded {
            info!(event = %Event::ProviderUnloaded, name = provider.name(), "provider unloaded");
        }
    }

    /// The active provider.
    pub fn provider(&self) -> ReplicationResult<Arc<dyn ReplicationProvider>> {
        self.provider
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
            .ok_or_else(|| ReplicationError::invalid_state("provider is not initialised"))
    }

    pub fn mode(&self) -> Option<ProviderMode> {
        *self.mode.read().unwrap_or_else(|e| e.into_inner())
    }

    /// Whether replication is off (disabled or fallen back).
    pub fn is_disabled(&self) -> bool {
        self.mode().map_or(true, |mode| mode.is_disabled())
    }
}

/// Address clients reach this node at.
///
/// "AUTO" (or nothing) asks for detection; detection failure leaves it unset.
pub fn resolve_incoming_address(config: &ReplicationConfig) -> Option<String> {
    if config.wants_incoming_auto() {
        detect_local_address()
    } else {
        Some(config.node_incoming_address.trim().to_string())
    }
}

fn detect_local_address() -> Option<String> {
    // Connecting a UDP socket selects a route without sending anything
    let socket = UdpSocket::bind(("0.0.0.0", 0)).ok()?;
    socket.connect(("192.0.2.1", 9)).ok()?;
    let ip = socket.local_addr().ok()?.ip();
    if ip.is_unspecified() {
        None
    } else {
        Some(ip.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::provider::{EventReply, ProviderEvent, ProviderLoadError};
    use crate::replication::ReplicationErrorKind;

    struct NullSink;

    impl EventSink for NullSink {
        fn deliver(&self, _event: ProviderEvent<'_>) -> EventReply {
            EventReply::Ack
        }
    }

    fn handle(registry: ProviderRegistry) -> (ProviderHandle, Arc<ReplicationState>) {
        let state = Arc::new(ReplicationState::new());
        (ProviderHandle::new(Arc::new(registry), Arc::clone(&state)), state)
    }

    #[test]
    fn test_disabled_ready_immediately() {
        let (handle, state) = handle(ProviderRegistry::new());
        let mode = handle
            .init(&ReplicationConfig::disabled(), Arc::new(NullSink))
            .unwrap();
        assert_eq!(mode, ProviderMode::Disabled);
        assert!(state.is_ready());
        assert!(!state.is_replication_enabled());
        assert!(handle.connect(&ReplicationConfig::disabled()).is_ok());
        assert!(!state.is_connected());
    }

    #[test]
    fn test_unknown_provider_falls_back() {
        let (handle, state) = handle(ProviderRegistry::new());
        let config = ReplicationConfig::with_provider("galera", "gcomm://");
        let mode = handle.init(&config, Arc::new(NullSink)).unwrap();
        assert_eq!(mode, ProviderMode::FellBackToDisabled);
        assert!(handle.is_disabled());
        assert!(state.is_ready());
    }

    #[test]
    fn test_loaded_provider_caches_identity() {
        let (handle, state) = handle(ProviderRegistry::new());
        let config = ReplicationConfig::with_provider("loopback", "loopback://");
        assert_eq!(
            handle.init(&config, Arc::new(NullSink)).unwrap(),
            ProviderMode::Loaded
        );
        assert!(!state.is_ready());
        assert!(state.is_replication_enabled());
        assert_eq!(state.provider_identity().name, "loopback");

        handle.deinit();
        assert!(state.provider_identity().is_empty());
        assert!(handle.provider().is_err());
    }

    #[test]
    fn test_connect_without_address_waits() {
        let (handle, state) = handle(ProviderRegistry::new());
        let config = ReplicationConfig::with_provider("loopback", "");
        handle.init(&config, Arc::new(NullSink)).unwrap();
        assert!(handle.connect(&config).is_ok());
        assert!(!state.is_ready());
        assert!(!state.is_connected());
    }

    #[test]
    fn test_connect_malformed_address() {
        let (handle, _) = handle(ProviderRegistry::new());
        let config = ReplicationConfig::with_provider("loopback", "10.0.0.1");
        handle.init(&config, Arc::new(NullSink)).unwrap();
        let err = handle.connect(&config).unwrap_err();
        assert_eq!(err.kind, ReplicationErrorKind::ConfigurationError);
    }

    #[test]
    fn test_connect_unsupported_scheme() {
        let (handle, _) = handle(ProviderRegistry::new());
        let config = ReplicationConfig::with_provider("loopback", "gcomm://10.0.0.1");
        handle.init(&config, Arc::new(NullSink)).unwrap();
        let err = handle.connect(&config).unwrap_err();
        assert_eq!(err.kind, ReplicationErrorKind::ConfigurationError);
    }

    #[test]
    fn test_connect_caches_capabilities_and_options() {
        let (handle, state) = handle(ProviderRegistry::new());
        let config = ReplicationConfig::with_provider("loopback", "loopback://");
        handle.init(&config, Arc::new(NullSink)).unwrap();
        handle.connect(&config).unwrap();
        assert!(state.is_connected());
        assert!(state.capabilities().contains(Capabilities::ISOLATION));
        assert!(!state.incremental_data_collection());
        assert!(state.provider_options().is_some());

        let sessions = SessionRegistry::new();
        let client = sessions.open_client(true, false);
        handle.disconnect(&sessions);
        assert!(!state.is_connected());
        assert!(client.is_killed());
    }

    #[test]
    fn test_factory_failure_falls_back() {
        let mut registry = ProviderRegistry::empty();
        registry.register("broken", || Err(ProviderLoadError::new("broken", "gone")));
        let (handle, _) = handle(registry);
        let config = ReplicationConfig::with_provider("broken", "gcomm://");
        let mode = handle.init(&config, Arc::new(NullSink)).unwrap();
        assert_eq!(mode, ProviderMode::FellBackToDisabled);
    }

    #[test]
    fn test_explicit_incoming_address_passed_through() {
        let mut config = ReplicationConfig::disabled();
        config.node_incoming_address = "10.1.2.3:3306".into();
        assert_eq!(
            resolve_incoming_address(&config),
            Some("10.1.2.3:3306".to_string())
        );
    }
}
