//! The "none" provider: replication off, node runs standalone.

use super::{Capabilities, ProviderInitArgs, ProviderResult, ProviderStatus, ReplicationProvider};
use crate::replication::{CertificationKey, Seqno, SessionId};

/// Provider standing in when replication is disabled.
///
/// Every call succeeds without effect, except causal reads which cannot be
/// honoured without a group.
#[derive(Debug, Default, Clone, Copy)]
pub struct DisabledProvider;

impl DisabledProvider {
    pub fn new() -> Self {
        Self
    }
}

impl ReplicationProvider for DisabledProvider {
    fn name(&self) -> &str {
        "none"
    }

    fn version(&self) -> &str {
        "0.0"
    }

    fn vendor(&self) -> &str {
        "aerocluster"
    }

    fn init(&self, _args: ProviderInitArgs) -> ProviderResult<()> {
        Ok(())
    }

    fn capabilities(&self) -> Capabilities {
        Capabilities::empty()
    }

    fn connect(&self, _cluster_name: &str, _address: &str, _donor: &str) -> ProviderResult<()> {
        Ok(())
    }

    fn disconnect(&self) -> ProviderResult<()> {
        Ok(())
    }

    fn recv(&self, _applier: SessionId) -> ProviderResult<()> {
        Ok(())
    }

    fn causal_read(&self) -> ProviderResult<Seqno> {
        Err(ProviderStatus::NotImplemented)
    }

    fn to_execute_start(
        &self,
        _session: SessionId,
        _keys: &[CertificationKey],
        _buffer: &[u8],
    ) -> ProviderResult<Seqno> {
        Ok(Seqno::UNDEFINED)
    }

    fn to_execute_end(&self, _session: SessionId) -> ProviderResult<()> {
        Ok(())
    }

    fn options_get(&self) -> Option<String> {
        None
    }
}
