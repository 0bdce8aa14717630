//! Read-only admin API: exposes the static routing table this controller is using so an
//! operator can confirm the compiled-in or file-loaded topology without reading logs.

use std::sync::Arc;

use axum::extract::State;
use axum::Json;
use qos_proto::policy::{RoutingEntry, RoutingTableResponse};

use crate::state::SharedState;

pub async fn routing_table(State(state): State<Arc<SharedState>>) -> Json<RoutingTableResponse> {
    let entries = state
        .routing
        .entries()
        .into_iter()
        .map(|(dpid, subnet_prefix, port)| RoutingEntry {
            dpid,
            subnet_prefix,
            port,
        })
        .collect();
    Json(RoutingTableResponse { entries })
}
