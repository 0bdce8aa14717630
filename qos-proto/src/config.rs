//! Environment-variable configuration shared by both binaries. Each binary layers its
//! own `clap::Parser` CLI on top of these for flags that aren't just plumbing
//! (daemonizing, log level); network endpoints and tunables come from the environment
//! so the two processes can be wired together without a shared file, matching the
//! variable names the original Ryu/Flask prototype used.

use std::env;
use std::time::Duration;

use anyhow::{Context, Result};

fn env_or(key: &str, default: &str) -> String {
    env::var(key).unwrap_or_else(|_| default.to_string())
}

fn parse_env<T: std::str::FromStr>(key: &str, default: T) -> Result<T>
where
    T::Err: std::fmt::Display,
{
    match env::var(key) {
        Ok(v) => v
            .parse()
            .map_err(|e| anyhow::anyhow!("invalid {key}={v}: {e}")),
        Err(_) => Ok(default),
    }
}

fn parse_csv_ports(key: &str) -> Result<Vec<u32>> {
    match env::var(key) {
        Ok(v) if !v.trim().is_empty() => v
            .split(',')
            .map(|p| {
                p.trim()
                    .parse::<u32>()
                    .with_context(|| format!("invalid port in {key}: {p}"))
            })
            .collect(),
        _ => Ok(Vec::new()),
    }
}

/// Port numbers the packet classifier treats as priority/critical and bulk traffic;
/// defaults match `iot_classifier.classify`'s defaults in the reference topology.
#[derive(Clone, Copy, Debug)]
pub struct ClassifierConfig {
    pub crit_udp: u16,
    pub tel_udp: u16,
    pub bulk_tcp: u16,
}

impl Default for ClassifierConfig {
    fn default() -> Self {
        ClassifierConfig {
            crit_udp: 5001,
            tel_udp: 5002,
            bulk_tcp: 5003,
        }
    }
}

impl ClassifierConfig {
    pub fn from_env() -> Result<Self> {
        let d = Self::default();
        Ok(ClassifierConfig {
            crit_udp: parse_env("CRIT_UDP", d.crit_udp)?,
            tel_udp: parse_env("TEL_UDP", d.tel_udp)?,
            bulk_tcp: parse_env("BULK_TCP", d.bulk_tcp)?,
        })
    }
}

/// Tunables for the controller's OpenFlow session layer, classifier and polling loop.
#[derive(Clone, Debug)]
pub struct ControllerConfig {
    pub ofp_listen_addr: String,
    pub ofp_listen_port: u16,
    pub admin_listen_addr: String,
    pub admin_listen_port: u16,
    pub routing_config_path: Option<String>,
    pub monitor_interval: Duration,
    pub flow_idle_timeout: u16,
    pub flow_hard_timeout: u16,
    pub congestion_threshold_bps: f64,
    pub classifier: ClassifierConfig,
    pub agent_url: String,
    pub agent_timeout: Duration,
}

impl ControllerConfig {
    pub fn from_env() -> Result<Self> {
        let monitor_interval_s: f64 = parse_env("MONITOR_INTERVAL", 2.0)?;
        let agent_timeout_s: f64 = parse_env("QLEARNING_AGENT_TIMEOUT_S", 0.3)?;
        Ok(ControllerConfig {
            ofp_listen_addr: env_or("OFP_LISTEN_ADDR", "0.0.0.0"),
            ofp_listen_port: parse_env("OFP_LISTEN_PORT", 6653)?,
            admin_listen_addr: env_or("ADMIN_LISTEN_ADDR", "0.0.0.0"),
            admin_listen_port: parse_env("ADMIN_LISTEN_PORT", 8081)?,
            routing_config_path: env::var("ROUTING_CONFIG_PATH").ok(),
            monitor_interval: Duration::from_secs_f64(monitor_interval_s),
            flow_idle_timeout: parse_env("FLOW_IDLE_TIMEOUT", 60)?,
            flow_hard_timeout: parse_env("FLOW_HARD_TIMEOUT", 0)?,
            congestion_threshold_bps: parse_env("CONGESTION_THRESHOLD_BPS", 8_000_000.0)?,
            classifier: ClassifierConfig::from_env()?,
            agent_url: env_or("QLEARNING_AGENT_URL", "http://127.0.0.1:8080"),
            agent_timeout: Duration::from_secs_f64(agent_timeout_s),
        })
    }

    pub fn ofp_listen_socket(&self) -> String {
        format!("{}:{}", self.ofp_listen_addr, self.ofp_listen_port)
    }

    pub fn admin_listen_socket(&self) -> String {
        format!("{}:{}", self.admin_listen_addr, self.admin_listen_port)
    }
}

/// Tunables for the Q-learning policy engine, read by `qos-agent`.
#[derive(Clone, Debug)]
pub struct QTableConfig {
    pub learning_rate: f64,
    pub discount_factor: f64,
    pub epsilon_start: f64,
    pub epsilon_min: f64,
    pub epsilon_decay: f64,
    pub metrics_ttl: Duration,
    pub backup_ports: Vec<u32>,
    pub persist_path: String,
    pub persist_every_steps: u64,
    pub log_path: Option<String>,
    /// Shared with `ControllerConfig::congestion_threshold_bps` by name (`CONGESTION_THRESHOLD_BPS`);
    /// the agent needs its own copy since state/reward classification happens here, not
    /// in the controller that reads the other copy for its log warning.
    pub congestion_threshold_bps: f64,
}

impl QTableConfig {
    pub fn from_env() -> Result<Self> {
        let ttl_s: f64 = parse_env("QL_METRICS_TTL_S", 10.0)?;
        Ok(QTableConfig {
            learning_rate: parse_env("QL_LR", 0.1)?,
            discount_factor: parse_env("QL_GAMMA", 0.9)?,
            epsilon_start: parse_env("QL_EPSILON", 1.0)?,
            epsilon_min: parse_env("QL_EPSILON_MIN", 0.05)?,
            epsilon_decay: parse_env("QL_EPSILON_DECAY", 0.995)?,
            metrics_ttl: Duration::from_secs_f64(ttl_s),
            backup_ports: parse_csv_ports("QL_BACKUP_PORTS")?,
            persist_path: env_or("QL_PERSIST_PATH", "qtable-snapshot.json"),
            persist_every_steps: parse_env("QL_PERSIST_EVERY_STEPS", 10)?,
            log_path: env::var("QL_LOG_PATH").ok(),
            congestion_threshold_bps: parse_env("CONGESTION_THRESHOLD_BPS", 8_000_000.0)?,
        })
    }
}

/// Where `qos-agent` listens and which tunables it loads.
#[derive(Clone, Debug)]
pub struct AgentConfig {
    pub agent_listen_addr: String,
    pub agent_listen_port: u16,
    pub qtable: QTableConfig,
}

impl AgentConfig {
    pub fn from_env() -> Result<Self> {
        Ok(AgentConfig {
            agent_listen_addr: env_or("AGENT_LISTEN_ADDR", "0.0.0.0"),
            agent_listen_port: parse_env("AGENT_LISTEN_PORT", 8080)?,
            qtable: QTableConfig::from_env()?,
        })
    }

    pub fn listen_socket(&self) -> String {
        format!("{}:{}", self.agent_listen_addr, self.agent_listen_port)
    }
}
