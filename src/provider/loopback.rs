//! Single-node loopback provider
//!
//! Forms a one-member primary component with itself. Useful for running a
//! node with replication enabled but no peers, and for exercising the full
//! startup path in tests.
//!
//! - `connect` queues a Primary view followed by Synced
//! - `recv` delivers queued events one at a time until disconnect
//! - total order operations get consecutive seqnos
//! - `disconnect` delivers a Disconnected view on the calling thread

use std::collections::{HashSet, VecDeque};
use std::sync::{Arc, Condvar, Mutex, MutexGuard};

use tracing::debug;
use uuid::Uuid;

use super::{
    Capabilities, EventSink, ProviderEvent, ProviderInitArgs, ProviderResult, ProviderStatus,
    ReplicationProvider,
};
use crate::observability::ProviderLogLevel;
use crate::replication::{CertificationKey, ClusterView, Seqno, SessionId};

/// Address scheme the loopback provider accepts.
pub const LOOPBACK_SCHEME: &str = "loopback://";

enum Pending {
    View(ClusterView),
    Synced,
}

struct Group {
    events: Option<Arc<dyn EventSink>>,
    uuid: Uuid,
    max_protocol_version: i32,
    conf_id: i64,
    last_seqno: Seqno,
    connected: bool,
    queue: VecDeque<Pending>,
    in_total_order: HashSet<SessionId>,
}

/// One-node group.
pub struct LoopbackProvider {
    group: Mutex<Group>,
    queued: Condvar,
    delivery: Mutex<()>,
}

impl Default for LoopbackProvider {
    fn default() -> Self {
        Self::new()
    }
}

impl LoopbackProvider {
    pub fn new() -> Self {
        Self {
            group: Mutex::new(Group {
                events: None,
                uuid: Uuid::nil(),
                max_protocol_version: 1,
                conf_id: 0,
                last_seqno: Seqno::UNASSIGNED,
                connected: false,
                queue: VecDeque::new(),
                in_total_order: HashSet::new(),
            }),
            queued: Condvar::new(),
            delivery: Mutex::new(()),
        }
    }

    fn group(&self) -> MutexGuard<'_, Group> {
        self.group.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Last seqno handed out.
    pub fn last_seqno(&self) -> Seqno {
        self.group().last_seqno
    }

    fn sink(&self) -> Option<Arc<dyn EventSink>> {
        self.group().events.clone()
    }
}

impl ReplicationProvider for LoopbackProvider {
    fn name(&self) -> &str {
        "loopback"
    }

    fn version(&self) -> &str {
        env!("CARGO_PKG_VERSION")
    }

    fn vendor(&self) -> &str {
        "aerocluster"
    }

    fn init(&self, args: ProviderInitArgs) -> ProviderResult<()> {
        let mut group = self.group();
        // Resume the history the node already belongs to
        if args.state.is_set() {
            group.uuid = args.state.uuid;
            if !args.state.seqno.is_undefined() {
                group.last_seqno = args.state.seqno;
            }
        } else {
            group.uuid = Uuid::new_v4();
        }
        group.max_protocol_version = args.max_protocol_version;
        let sink = Arc::clone(&args.events);
        group.events = Some(args.events);
        drop(group);

        sink.deliver(ProviderEvent::Log {
            level: ProviderLogLevel::Info,
            message: "loopback provider initialised",
        });
        Ok(())
    }

    fn capabilities(&self) -> Capabilities {
        Capabilities::MULTI_MASTER
            | Capabilities::CERTIFICATION
            | Capabilities::ISOLATION
            | Capabilities::CAUSAL_READS
    }

    fn connect(&self, cluster_name: &str, address: &str, _donor: &str) -> ProviderResult<()> {
        if !address.starts_with(LOOPBACK_SCHEME) {
            return Err(ProviderStatus::AddressNotSupported);
        }
        let mut group = self.group();
        if group.events.is_none() {
            return Err(ProviderStatus::NodeFail);
        }
        if group.connected {
            return Err(ProviderStatus::ConnFail);
        }
        group.connected = true;
        group.conf_id += 1;
        let view = ClusterView::primary(group.uuid, group.conf_id, 1, 0, group.last_seqno.next())
            .with_protocol_version(group.max_protocol_version);
        group.queue.push_back(Pending::View(view));
        group.queue.push_back(Pending::Synced);
        debug!(cluster = cluster_name, conf_id = group.conf_id, "loopback connected");
        self.queued.notify_all();
        Ok(())
    }

    fn disconnect(&self) -> ProviderResult<()> {
        let sink = {
            let mut group = self.group();
            if !group.connected {
                return Ok(());
            }
            group.connected = false;
            group.queue.clear();
            self.queued.notify_all();
            group.events.clone()
        };

        let _delivery = self.delivery.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(sink) = sink {
            sink.deliver(ProviderEvent::ViewChanged(&ClusterView::disconnected()));
        }
        Ok(())
    }

    fn recv(&self, _applier: SessionId) -> ProviderResult<()> {
        let sink = self.sink().ok_or(ProviderStatus::NodeFail)?;
        loop {
            // Popping and delivering under one lock keeps events in order
            // across applier threads
            let _delivery = self.delivery.lock().unwrap_or_else(|e| e.into_inner());
            let next = {
                let mut group = self.group();
                loop {
                    if let Some(next) = group.queue.pop_front() {
                        break next;
                    }
                    if !group.connected {
                        return Ok(());
                    }
                    group = self
                        .queued
                        .wait(group)
                        .unwrap_or_else(|e| e.into_inner());
                }
            };
            match next {
                Pending::View(view) => {
                    sink.deliver(ProviderEvent::ViewChanged(&view));
                }
                Pending::Synced => {
                    sink.deliver(ProviderEvent::Synced);
                }
            }
        }
    }

    fn causal_read(&self) -> ProviderResult<Seqno> {
        let group = self.group();
        if !group.connected {
            return Err(ProviderStatus::ConnFail);
        }
        Ok(group.last_seqno)
    }

    fn to_execute_start(
        &self,
        session: SessionId,
        _keys: &[CertificationKey],
        _buffer: &[u8],
    ) -> ProviderResult<Seqno> {
        let mut group = self.group();
        if !group.connected {
            return Err(ProviderStatus::ConnFail);
        }
        if !group.in_total_order.insert(session) {
            return Err(ProviderStatus::TrxFail);
        }
        group.last_seqno = group.last_seqno.next();
        Ok(group.last_seqno)
    }

    fn to_execute_end(&self, session: SessionId) -> ProviderResult<()> {
        if self.group().in_total_order.remove(&session) {
            Ok(())
        } else {
            Err(ProviderStatus::TrxMissing)
        }
    }

    fn options_get(&self) -> Option<String> {
        let group = self.group();
        Some(format!(
            "loopback.group = {}; loopback.max_protocol_version = {}",
            group.uuid, group.max_protocol_version
        ))
    }
}
