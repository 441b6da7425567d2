//! Operator-facing status

use serde::Serialize;
use uuid::Uuid;

use super::errors::{ReplicationError, ReplicationResult};
use super::state::{AutoIncrement, ReplicationState};
use super::view::{MemberStatus, Seqno, ViewStatus};
use crate::observability::MetricsSnapshot;

/// Point-in-time copy of everything operators can query.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StatusSnapshot {
    pub connected: bool,
    pub ready: bool,
    pub cluster_state_uuid: Uuid,
    pub cluster_conf_id: i64,
    pub cluster_status: ViewStatus,
    pub cluster_size: usize,
    pub local_index: i64,
    pub provider_name: String,
    pub provider_version: String,
    pub provider_vendor: String,
    pub member_status: MemberStatus,
    pub local_state_uuid: Uuid,
    pub local_seqno: Seqno,
    pub protocol_version: i32,
    pub incremental_data_collection: bool,
    pub auto_increment: AutoIncrement,
    pub toi_in_flight: usize,
    pub metrics: MetricsSnapshot,
}

impl StatusSnapshot {
    pub fn capture(state: &ReplicationState, toi_in_flight: usize) -> Self {
        let cluster = state.cluster();
        let identity = state.provider_identity();
        let anchor = state.anchor();
        Self {
            connected: state.is_connected(),
            ready: state.is_ready(),
            cluster_state_uuid: cluster.state_uuid,
            cluster_conf_id: cluster.conf_id,
            cluster_status: cluster.status,
            cluster_size: cluster.size,
            local_index: cluster.local_index,
            provider_name: identity.name,
            provider_version: identity.version,
            provider_vendor: identity.vendor,
            member_status: state.member_status(),
            local_state_uuid: anchor.uuid,
            local_seqno: anchor.seqno,
            protocol_version: state.protocol_version(),
            incremental_data_collection: state.incremental_data_collection(),
            auto_increment: state.auto_increment(),
            toi_in_flight,
            metrics: state.metrics_snapshot(),
        }
    }

    pub fn to_json_pretty(&self) -> ReplicationResult<String> {
        serde_json::to_string_pretty(self)
            .map_err(|e| ReplicationError::invalid_state(format!("cannot render status: {}", e)))
    }
}
