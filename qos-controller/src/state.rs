use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::{Mutex, RwLock};
use qos_proto::config::ControllerConfig;

use crate::installer::{GroupRegistry, MeterRegistry};
use crate::poller::SnapshotStore;
use crate::routing::RoutingConfig;
use crate::session::SessionMap;

/// Everything the session layer, classifier, installer and poller share.
pub struct SharedState {
    pub config: ControllerConfig,
    pub routing: RoutingConfig,
    pub sessions: SessionMap,
    pub meters: MeterRegistry,
    pub groups: GroupRegistry,
    /// Per-dpid learned `eth.src -> in_port` table, the L2 fallback used only when the
    /// static routing table has no entry for a destination.
    pub mac_tables: Mutex<HashMap<u64, HashMap<[u8; 6], u32>>>,
    pub snapshots: SnapshotStore,
    pub http: reqwest::Client,
}

impl SharedState {
    pub fn new(config: ControllerConfig, routing: RoutingConfig) -> Self {
        let http = reqwest::Client::builder()
            .timeout(config.agent_timeout)
            .build()
            .unwrap_or_else(|_| reqwest::Client::new());
        SharedState {
            config,
            routing,
            sessions: Arc::new(RwLock::new(HashMap::new())),
            meters: MeterRegistry::new(),
            groups: GroupRegistry::new(),
            mac_tables: Mutex::new(HashMap::new()),
            snapshots: SnapshotStore::new(),
            http,
        }
    }

    pub fn learn_mac(&self, dpid: u64, mac: [u8; 6], in_port: u32) {
        let mut tables = self.mac_tables.lock();
        tables.entry(dpid).or_default().insert(mac, in_port);
    }

    pub fn lookup_mac(&self, dpid: u64, mac: [u8; 6]) -> Option<u32> {
        self.mac_tables.lock().get(&dpid)?.get(&mac).copied()
    }

    pub fn agent_timeout(&self) -> Duration {
        self.config.agent_timeout
    }
}
