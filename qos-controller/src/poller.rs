//! Controller Loop: one periodic task per connected switch that polls port and queue
//! counters, turns the raw counters into a rate/drop delta against the previous poll, and
//! relays each delta to the Policy Service's `/observe` endpoint. The raw counters
//! themselves never leave this process; only the derived delta is sent over the wire.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;

use parking_lot::Mutex;
use qos_proto::ofp::message::{OfpMessage, PortStats, QueueStats};
use qos_proto::policy::ObserveRequest;
use tokio_util::sync::CancellationToken;
use tracing::warn;

use crate::policy_client;
use crate::session::Session;
use crate::state::SharedState;

const OFPP_ANY: u32 = 0xffff_ffff;
const OFPQ_ALL: u32 = 0xffff_ffff;

#[derive(Clone, Copy, Eq, PartialEq, Hash)]
struct SnapKey {
    dpid: u64,
    port: u32,
    qid: Option<u32>,
}

#[derive(Clone, Copy)]
struct CounterPoint {
    bytes: u64,
    drops: u64,
    at: Instant,
}

/// Holds the last raw counter reading per `(dpid, port[, qid])`, used only to compute the
/// next delta. Never exposed outside this module.
#[derive(Default)]
pub struct SnapshotStore(Mutex<HashMap<SnapKey, CounterPoint>>);

impl SnapshotStore {
    pub fn new() -> Self {
        SnapshotStore::default()
    }

    /// Records `(bytes, drops)` for `key` and returns `(load_bps, drop_delta)` against the
    /// previous reading, or `None` if this is the first reading for that key.
    fn delta(&self, key: SnapKey, bytes: u64, drops: u64) -> Option<(f64, u64)> {
        let now = Instant::now();
        let mut points = self.0.lock();
        let prev = points.insert(key, CounterPoint { bytes, drops, at: now });
        let prev = prev?;
        let elapsed = now.saturating_duration_since(prev.at).as_secs_f64();
        if elapsed <= 0.0 {
            return None;
        }
        let byte_delta = bytes.saturating_sub(prev.bytes);
        let load_bps = (byte_delta as f64 * 8.0) / elapsed;
        let drop_delta = drops.saturating_sub(prev.drops);
        Some((load_bps, drop_delta))
    }
}

/// The periodic polling task for one switch session; runs until `cancel` fires (on session
/// close) or the session's writer queue is gone.
pub async fn run(state: Arc<SharedState>, session: Arc<Session>, cancel: CancellationToken) {
    let interval = state.config.monitor_interval;
    loop {
        tokio::select! {
            _ = cancel.cancelled() => return,
            _ = tokio::time::sleep(interval) => {}
        }
        if session
            .send(&OfpMessage::PortStatsRequest { port_no: OFPP_ANY })
            .await
            .is_err()
        {
            return;
        }
        if session
            .send(&OfpMessage::QueueStatsRequest {
                port_no: OFPP_ANY,
                queue_id: OFPQ_ALL,
            })
            .await
            .is_err()
        {
            return;
        }
    }
}

pub async fn handle_port_stats_reply(state: Arc<SharedState>, dpid: u64, stats: Vec<PortStats>) {
    for s in stats {
        let key = SnapKey {
            dpid,
            port: s.port_no,
            qid: None,
        };
        if let Some((load_bps, drops)) = state.snapshots.delta(key, s.tx_bytes, s.tx_dropped) {
            feed_observe(&state, dpid, s.port_no, None, load_bps, drops).await;
        }
    }
}

pub async fn handle_queue_stats_reply(state: Arc<SharedState>, dpid: u64, stats: Vec<QueueStats>) {
    for s in stats {
        let key = SnapKey {
            dpid,
            port: s.port_no,
            qid: Some(s.queue_id),
        };
        if let Some((load_bps, drops)) = state.snapshots.delta(key, s.tx_bytes, s.tx_errors) {
            feed_observe(&state, dpid, s.port_no, Some(s.queue_id), load_bps, drops).await;
        }
    }
}

async fn feed_observe(state: &Arc<SharedState>, dpid: u64, port: u32, qid: Option<u32>, load_bps: f64, drops: u64) {
    if load_bps > state.config.congestion_threshold_bps {
        warn!(dpid, port, ?qid, load_bps, "port load exceeds congestion threshold");
    }
    let req = ObserveRequest {
        dpid,
        port,
        qid,
        load_bps,
        drops,
    };
    if let Err(e) = policy_client::observe(&state.http, &state.config.agent_url, &req).await {
        warn!(dpid, port, ?qid, error = %e, "observe relay to policy service failed, skipping this cycle");
    }
}
