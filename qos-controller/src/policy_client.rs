//! Thin `reqwest` wrapper around the Policy Service's HTTP/JSON contract. Every call here
//! already runs under the client's configured hard timeout (`QLEARNING_AGENT_TIMEOUT_S`);
//! callers decide what to do when a call errors out, which in this controller always means
//! falling back to a static decision rather than retrying.

use anyhow::{bail, Result};
use qos_proto::policy::{ActRequest, ActResponse, ObserveRequest, ObserveResponse};

pub async fn observe(http: &reqwest::Client, base_url: &str, req: &ObserveRequest) -> Result<ObserveResponse> {
    let resp = http.post(format!("{base_url}/observe")).json(req).send().await?;
    if !resp.status().is_success() {
        bail!("agent /observe returned {}", resp.status());
    }
    Ok(resp.json().await?)
}

pub async fn act(http: &reqwest::Client, base_url: &str, req: &ActRequest) -> Result<ActResponse> {
    let resp = http.post(format!("{base_url}/act")).json(req).send().await?;
    if !resp.status().is_success() {
        bail!("agent /act returned {}", resp.status());
    }
    Ok(resp.json().await?)
}
