//! Append-only CSV log of `/act` decisions, one row per call. Mirrors the legacy Flask
//! agent's log format exactly so existing analysis notebooks keep working: the header is
//! written once, lazily, the first time a row is appended to a path that doesn't exist
//! yet or hasn't been touched by this process.

use std::fs::OpenOptions;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

use serde::Serialize;

const HEADER: &[&str] = &[
    "ts",
    "step",
    "dpid",
    "dst_prefix",
    "state",
    "action",
    "out_port",
    "epsilon",
    "max_load_bps",
    "total_drops",
    "reward",
    "q_values",
];

#[derive(Serialize)]
struct Row {
    ts: f64,
    step: u64,
    dpid: u64,
    dst_prefix: String,
    state: u8,
    action: u32,
    out_port: u32,
    epsilon: f64,
    max_load_bps: f64,
    total_drops: u64,
    reward: String,
    q_values: String,
}

pub struct DecisionLog {
    path: PathBuf,
    initialized: AtomicBool,
}

impl DecisionLog {
    pub fn new(path: PathBuf) -> Self {
        DecisionLog {
            path,
            initialized: AtomicBool::new(false),
        }
    }

    /// Appends one row. Blocking file I/O — callers run this on a `spawn_blocking` task.
    /// A write failure is logged and swallowed, matching the legacy agent: a log-write
    /// hiccup must never fail the `/act` call that already happened.
    pub fn append(
        &self,
        step: u64,
        dpid: u64,
        dst_prefix: &str,
        state: u8,
        action: u32,
        out_port: u32,
        epsilon: f64,
        max_load_bps: f64,
        total_drops: u64,
        reward: Option<f64>,
        q_values: &[f64],
    ) {
        if let Err(e) = self.try_append(
            step,
            dpid,
            dst_prefix,
            state,
            action,
            out_port,
            epsilon,
            max_load_bps,
            total_drops,
            reward,
            q_values,
        ) {
            tracing::warn!(error = %e, path = %self.path.display(), "decision log write failed");
        }
    }

    #[allow(clippy::too_many_arguments)]
    fn try_append(
        &self,
        step: u64,
        dpid: u64,
        dst_prefix: &str,
        state: u8,
        action: u32,
        out_port: u32,
        epsilon: f64,
        max_load_bps: f64,
        total_drops: u64,
        reward: Option<f64>,
        q_values: &[f64],
    ) -> anyhow::Result<()> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let needs_header = !self.initialized.load(Ordering::Relaxed) && !self.path.exists();
        if needs_header {
            let f = OpenOptions::new()
                .create(true)
                .append(true)
                .open(&self.path)?;
            let mut w = csv::Writer::from_writer(f);
            w.write_record(HEADER)?;
            w.flush()?;
            self.initialized.store(true, Ordering::Relaxed);
        }

        let ts = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_secs_f64();
        let row = Row {
            ts,
            step,
            dpid,
            dst_prefix: dst_prefix.to_string(),
            state,
            action,
            out_port,
            epsilon,
            max_load_bps,
            total_drops,
            reward: reward.map(|r| r.to_string()).unwrap_or_default(),
            q_values: serde_json::to_string(q_values).unwrap_or_default(),
        };

        let f = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)?;
        let mut w = csv::WriterBuilder::new().has_headers(false).from_writer(f);
        w.serialize(row)?;
        w.flush()?;
        Ok(())
    }
}
