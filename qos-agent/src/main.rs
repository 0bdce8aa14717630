//! Policy Agent: HTTP service wrapping the Telemetry Store and Q-learning engine.
//! Speaks JSON to the Controller over `/observe` and `/act`, plus a read-only admin API.

use std::fs::OpenOptions;
use std::io::stderr;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use axum::routing::{get, post};
use axum::Router;
use clap::Parser;
use daemon::Daemonize;
use tokio::sync::mpsc;
use tracing::{error, info};

mod decision_log;
mod handlers;
mod state;

use qos_proto::config::AgentConfig;
use state::AppState;

#[derive(Parser, Debug)]
#[clap(version, about = "Policy Agent: Q-learning-driven QoS decisions over HTTP")]
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
    let Args {
        daemonize,
        log_file,
    } = Args::parse();
    init_tracing(&log_file)?;
    let _cleanup = unsafe { daemonize.run() };

    let config = AgentConfig::from_env().context("loading agent configuration")?;

    let runtime = tokio::runtime::Runtime::new().context("starting tokio runtime")?;
    runtime.block_on(run(config))
}

async fn run(config: AgentConfig) -> Result<()> {
    let listen = config.listen_socket();
    let (persist_tx, mut persist_rx) = mpsc::channel::<()>(1);
    let state = Arc::new(AppState::new(config, persist_tx));

    let persist_state = state.clone();
    tokio::spawn(async move {
        while persist_rx.recv().await.is_some() {
            let path = persist_state.persist_path();
            let engine = persist_state.clone();
            let result =
                tokio::task::spawn_blocking(move || engine.engine.write_snapshot(&path)).await;
            match result {
                Ok(Ok(())) => info!("q-table snapshot persisted"),
                Ok(Err(e)) => error!(error = %e, "q-table snapshot write failed"),
                Err(e) => error!(error = %e, "q-table snapshot task panicked"),
            }
        }
    });

    let app = Router::new()
        .route("/health", get(handlers::health))
        .route("/observe", post(handlers::observe))
        .route("/act", post(handlers::act))
        .route("/snapshot", get(handlers::snapshot))
        .route("/agent", get(handlers::agent_summary))
        .route("/debug/summary", get(handlers::debug_summary))
        .route("/debug/qtable", get(handlers::debug_qtable))
        .with_state(state);

    let addr: SocketAddr = listen
        .parse()
        .with_context(|| format!("invalid agent listen address {listen}"))?;
    info!(%addr, "qos-agent listening");
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("binding {addr}"))?;
    axum::serve(listener, app)
        .await
        .context("agent HTTP server failed")?;
    Ok(())
}
