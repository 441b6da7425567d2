//! A provider resolved from the registry.

use std::fmt;

use super::{
    Capabilities, ProviderIdentity, ProviderInitArgs, ProviderResult, ReplicationProvider,
};
use crate::replication::{CertificationKey, Seqno, SessionId};

/// A real provider, together with the spec it was loaded from and its
/// identity captured at load time.
pub struct LoadedProvider {
    spec: String,
    identity: ProviderIdentity,
    inner: Box<dyn ReplicationProvider>,
}

impl LoadedProvider {
    pub fn new(spec: impl Into<String>, inner: Box<dyn ReplicationProvider>) -> Self {
        let identity = ProviderIdentity::bounded(inner.name(), inner.version(), inner.vendor());
        Self {
            spec: spec.into(),
            identity,
            inner,
        }
    }

    /// The name it was loaded by.
    pub fn spec(&self) -> &str {
        &self.spec
    }

    /// Identity strings, bounded in length.
    pub fn identity(&self) -> &ProviderIdentity {
        &self.identity
    }
}

impl fmt::Debug for LoadedProvider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LoadedProvider")
            .field("spec", &self.spec)
            .field("identity", &self.identity)
            .finish_non_exhaustive()
    }
}

impl ReplicationProvider for LoadedProvider {
    fn name(&self) -> &str {
        &self.identity.name
    }

    fn version(&self) -> &str {
        &self.identity.version
    }

    fn vendor(&self) -> &str {
        &self.identity.vendor
    }

    fn init(&self, args: ProviderInitArgs) -> ProviderResult<()> {
        self.inner.init(args)
    }

    fn capabilities(&self) -> Capabilities {
        self.inner.capabilities()
    }

    fn connect(&self, cluster_name: &str, address: &str, donor: &str) -> ProviderResult<()> {
        self.inner.connect(cluster_name, address, donor)
    }

    fn disconnect(&self) -> ProviderResult<()> {
        self.inner.disconnect()
    }

    fn recv(&self, applier: SessionId) -> ProviderResult<()> {
        self.inner.recv(applier)
    }

    fn causal_read(&self) -> ProviderResult<Seqno> {
        self.inner.causal_read()
    }

    fn to_execute_start(
        &self,
        session: SessionId,
        keys: &[CertificationKey],
        buffer: &[u8],
    ) -> ProviderResult<Seqno> {
        self.inner.to_execute_start(session, keys, buffer)
    }

    fn to_execute_end(&self, session: SessionId) -> ProviderResult<()> {
        self.inner.to_execute_end(session)
    }

    fn options_get(&self) -> Option<String> {
        self.inner.options_get()
    }
}
