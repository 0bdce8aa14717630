//! JSON contract spoken between `qos-controller` and `qos-agent`. The controller is the
//! HTTP client (`reqwest`); the agent exposes these as `axum` routes.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

/// Posted once per polled (dpid, port[, qid]) by the controller's stats loop.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ObserveRequest {
    pub dpid: u64,
    pub port: u32,
    pub qid: Option<u32>,
    pub load_bps: f64,
    pub drops: u64,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ObserveResponse {
    pub state: u8,
    pub max_load_bps: f64,
    pub total_drops: u64,
}

/// One egress option the classifier offers the policy for an elastic-class flow.
#[derive(Clone, Copy, Debug, Serialize, Deserialize)]
pub struct ActionCandidate {
    pub action_idx: u32,
    pub out_port: u32,
    pub queue_id: u32,
    pub meter_rate_kbps: u32,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ActRequest {
    pub dpid: u64,
    pub dst_prefix: String,
    pub candidates: Vec<ActionCandidate>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ActResponse {
    pub action: u32,
    pub out_port: u32,
    pub queue_id: u32,
    pub meter_rate_kbps: u32,
    pub state: u8,
    pub epsilon: f64,
    pub step: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reward: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub q_values: Option<Vec<f64>>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: String,
}

#[derive(Clone, Copy, Debug, Serialize, Deserialize)]
pub struct HealthResponse {
    pub ok: bool,
}

/// `GET /snapshot`: a view over the Telemetry Store's current samples.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct SnapshotResponse {
    pub ts: u64,
    pub port_load: HashMap<String, f64>,
    pub queue_load: HashMap<String, f64>,
    pub queue_drops: HashMap<String, u64>,
}

/// `GET /agent`: the most recent policy decision recorded per flow-key.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct AgentDecision {
    pub flow_key: String,
    pub step: u64,
    pub state: u8,
    pub action: u32,
    pub out_port: u32,
    pub epsilon: f64,
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct AgentSummaryResponse {
    pub decisions: Vec<AgentDecision>,
}

/// `GET /debug/qtable[?key=...]`.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct QTableRow {
    pub flow_key: String,
    pub actions: Vec<u32>,
    pub q: Vec<Vec<f64>>,
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct QTableDumpResponse {
    pub rows: Vec<QTableRow>,
}

/// `GET /debug/summary`.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct DebugSummaryResponse {
    pub tracked_flows: usize,
    pub step: u64,
    pub epsilon: f64,
}

/// `GET /routing` (controller side): the static routing table.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RoutingEntry {
    pub dpid: u64,
    pub subnet_prefix: String,
    pub port: u32,
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct RoutingTableResponse {
    pub entries: Vec<RoutingEntry>,
}
