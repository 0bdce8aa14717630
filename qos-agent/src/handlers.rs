use std::collections::HashMap;
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;

use qos_proto::policy::{
    ActRequest, ActResponse, AgentDecision, AgentSummaryResponse, DebugSummaryResponse,
    ErrorResponse, HealthResponse, ObserveRequest, ObserveResponse, QTableDumpResponse,
    QTableRow, SnapshotResponse,
};
use qos_qtable::Candidate;
use qos_telemetry::Aggregate;

use crate::state::AppState;

fn flow_key(dpid: u64, dst_prefix: &str) -> String {
    format!("{dpid}:{dst_prefix}")
}

fn switch_aggregate(state: &AppState, dpid: u64) -> Aggregate {
    let samples = state
        .telemetry
        .snapshot(dpid, state.config.qtable.metrics_ttl, None);
    samples
        .into_iter()
        .fold(Aggregate::default(), |acc, s| Aggregate {
            max_load_bps: acc.max_load_bps.max(s.load_bps),
            total_drops: acc.total_drops + s.drops,
        })
}

fn congestion_state(agg: Aggregate, threshold: f64) -> u8 {
    qos_qtable::reward::congestion_state(agg.max_load_bps, agg.total_drops, threshold)
}

pub async fn health() -> Json<HealthResponse> {
    Json(HealthResponse { ok: true })
}

pub async fn observe(
    State(state): State<Arc<AppState>>,
    Json(req): Json<ObserveRequest>,
) -> Json<ObserveResponse> {
    state
        .telemetry
        .update(req.dpid, req.port, req.qid, req.load_bps, req.drops);

    let agg = switch_aggregate(&state, req.dpid);
    let threshold = state.config.qtable.congestion_threshold_bps;
    Json(ObserveResponse {
        state: congestion_state(agg, threshold),
        max_load_bps: agg.max_load_bps,
        total_drops: agg.total_drops,
    })
}

pub async fn act(State(state): State<Arc<AppState>>, Json(req): Json<ActRequest>) -> Response {
    if req.candidates.is_empty() {
        return (
            StatusCode::BAD_REQUEST,
            Json(ErrorResponse {
                error: "candidates required".to_string(),
            }),
        )
            .into_response();
    }

    let ActRequest {
        dpid,
        dst_prefix,
        candidates,
    } = req;

    let ports: Vec<u32> = candidates.iter().map(|c| c.out_port).collect();
    let agg = state.telemetry.query_ports(dpid, &ports);
    let threshold = state.config.qtable.congestion_threshold_bps;
    let state_now = congestion_state(agg, threshold);

    let key = flow_key(dpid, &dst_prefix);
    let engine_candidates: Vec<Candidate> = candidates
        .iter()
        .map(|c| Candidate {
            action_idx: c.action_idx,
            out_port: c.out_port,
            queue_id: c.queue_id,
        })
        .collect();

    let telemetry = &state.telemetry;
    let decision = state.engine.decide(
        &key,
        &engine_candidates,
        state_now,
        threshold,
        &state.config.qtable.backup_ports,
        |out_port, queue_id| {
            telemetry
                .query_queue(dpid, out_port, queue_id)
                .map(|a| (a.max_load_bps, a.total_drops))
                .unwrap_or_else(|| {
                    let p = telemetry.query_port(dpid, out_port);
                    (p.max_load_bps, p.total_drops)
                })
        },
    );

    let meter_rate_kbps = candidates
        .iter()
        .find(|c| c.action_idx == decision.action_idx)
        .map(|c| c.meter_rate_kbps)
        .unwrap_or(0);

    if state.engine.should_persist(decision.step) {
        let _ = state.persist_tx.try_send(());
    }

    if state.decision_log.is_some() {
        let state = state.clone();
        let dst_prefix = dst_prefix.clone();
        let q_values = decision.q_values.clone();
        let (step, decision_state, action_idx, out_port, epsilon, reward) = (
            decision.step,
            decision.state,
            decision.action_idx,
            decision.out_port,
            decision.epsilon,
            decision.reward,
        );
        // Runs off the response task: CSV I/O must never add latency to the `/act` call.
        tokio::task::spawn_blocking(move || {
            if let Some(log) = &state.decision_log {
                log.append(
                    step,
                    dpid,
                    &dst_prefix,
                    decision_state,
                    action_idx,
                    out_port,
                    epsilon,
                    agg.max_load_bps,
                    agg.total_drops,
                    reward,
                    &q_values,
                );
            }
        });
    }

    Json(ActResponse {
        action: decision.action_idx,
        out_port: decision.out_port,
        queue_id: decision.queue_id,
        meter_rate_kbps,
        state: decision.state,
        epsilon: decision.epsilon,
        step: decision.step,
        reward: decision.reward,
        q_values: Some(decision.q_values),
    })
    .into_response()
}

pub async fn snapshot(State(state): State<Arc<AppState>>) -> Json<SnapshotResponse> {
    let ts = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs();

    let mut port_load = HashMap::new();
    let mut queue_load = HashMap::new();
    let mut queue_drops = HashMap::new();

    for (dpid, samples) in state.telemetry.snapshot_all(state.config.qtable.metrics_ttl) {
        for s in samples {
            match s.qid {
                None => {
                    port_load.insert(format!("{dpid}:{}", s.port), s.load_bps);
                }
                Some(qid) => {
                    let key = format!("{dpid}:{}:{qid}", s.port);
                    queue_load.insert(key.clone(), s.load_bps);
                    queue_drops.insert(key, s.drops);
                }
            }
        }
    }

    Json(SnapshotResponse {
        ts,
        port_load,
        queue_load,
        queue_drops,
    })
}

pub async fn agent_summary(State(state): State<Arc<AppState>>) -> Json<AgentSummaryResponse> {
    let mut flows = state.engine.dump();
    flows.sort_by(|a, b| a.flow_key.cmp(&b.flow_key));

    let step = state.engine.step();
    let epsilon = state.engine.epsilon();
    let decisions = flows
        .into_iter()
        .filter_map(|f| {
            f.last.map(|(decision_state, action, out_port)| AgentDecision {
                flow_key: f.flow_key,
                step,
                state: decision_state,
                action,
                out_port,
                epsilon,
            })
        })
        .collect();

    Json(AgentSummaryResponse { decisions })
}

pub async fn debug_summary(State(state): State<Arc<AppState>>) -> Json<DebugSummaryResponse> {
    Json(DebugSummaryResponse {
        tracked_flows: state.engine.dump().len(),
        step: state.engine.step(),
        epsilon: state.engine.epsilon(),
    })
}

pub async fn debug_qtable(
    State(state): State<Arc<AppState>>,
    Query(params): Query<HashMap<String, String>>,
) -> Response {
    if let Some(key) = params.get("key") {
        return match state.engine.dump_key(key) {
            Some(snap) => Json(QTableRow {
                flow_key: snap.flow_key,
                actions: snap.actions,
                q: snap.q,
            })
            .into_response(),
            None => (
                StatusCode::NOT_FOUND,
                Json(ErrorResponse {
                    error: "key not found".to_string(),
                }),
            )
                .into_response(),
        };
    }

    let rows = state
        .engine
        .dump()
        .into_iter()
        .map(|snap| QTableRow {
            flow_key: snap.flow_key,
            actions: snap.actions,
            q: snap.q,
        })
        .collect();
    Json(QTableDumpResponse { rows }).into_response()
}
