//! OpenFlow Controller: speaks OpenFlow 1.3 to switches, installs QoS flows, and relays
//! telemetry to the Policy Agent. See `session`, `installer`, `classifier` and `poller`
//! for the four concerns this binary wires together.

use std::fs::OpenOptions;
use std::io::stderr;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use axum::routing::get;
use axum::Router;
use clap::Parser;
use daemon::Daemonize;
use tracing::info;

mod admin;
mod classifier;
mod installer;
mod policy_client;
mod poller;
mod routing;
mod session;
mod state;

use qos_proto::config::ControllerConfig;
use routing::RoutingConfig;
use state::SharedState;

#[derive(Parser, Debug)]
#[clap(version, about = "OpenFlow 1.3 QoS controller")]
struct Args {
    #[clap(flatten)]
    daemonize: Daemonize,

    /// File to write logs to; defaults to stderr.
    #[clap(long)]
    log_file: Option<PathBuf>,
}

fn init_tracing(log_file: &Option<PathBuf>) -> Result<()> {
    let filter = tracing_subscriber::EnvFilter::from_default_env();
    if let Some(path) = log_file {
        let writer = OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .with_context(|| format!("opening log file {}", path.display()))?;
        tracing_subscriber::fmt()
            .with_writer(writer)
            .with_ansi(false)
            .with_env_filter(filter)
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_writer(stderr)
            .with_env_filter(filter)
            .init();
    }
    Ok(())
}

fn main() -> Result<()> {
    let Args { daemonize, log_file } = Args::parse();
    init_tracing(&log_file)?;
    let _cleanup = unsafe { daemonize.run() };

    let config = ControllerConfig::from_env().context("loading controller configuration")?;
    let routing = RoutingConfig::load(config.routing_config_path.as_deref()).context("loading routing config")?;

    let runtime = tokio::runtime::Runtime::new().context("starting tokio runtime")?;
    runtime.block_on(run(config, routing))
}

async fn run(config: ControllerConfig, routing: RoutingConfig) -> Result<()> {
    let admin_socket = config.admin_listen_socket();
    let state = Arc::new(SharedState::new(config, routing));

    let ofp_state = state.clone();
    let ofp_task = tokio::spawn(async move { session::accept_loop(ofp_state).await });

    let app = Router::new()
        .route("/routing", get(admin::routing_table))
        .with_state(state);
    let addr: SocketAddr = admin_socket
        .parse()
        .with_context(|| format!("invalid admin listen address {admin_socket}"))?;
    info!(%addr, "qos-controller admin API listening");
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("binding {addr}"))?;
    let admin_task = tokio::spawn(async move { axum::serve(listener, app).await });

    tokio::select! {
        result = ofp_task => {
            result.context("OpenFlow accept loop task panicked")?.context("OpenFlow accept loop failed")?;
        }
        result = admin_task => {
            result.context("admin API task panicked")?.context("admin API server failed")?;
        }
    }
    Ok(())
}
