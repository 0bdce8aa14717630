use std::path::PathBuf;

use qos_proto::config::AgentConfig;
use qos_qtable::{Hyperparams, QEngine};
use qos_telemetry::TelemetryStore;
use tokio::sync::mpsc;

use crate::decision_log::DecisionLog;

/// Everything the HTTP handlers need, shared behind `Arc` across the `axum` router.
pub struct AppState {
    pub config: AgentConfig,
    pub telemetry: TelemetryStore,
    pub engine: QEngine,
    pub decision_log: Option<DecisionLog>,
    /// Signals the background snapshot task; bounded at 1 so a burst of `/act` calls
    /// crossing the persistence boundary coalesces into a single pending write.
    pub persist_tx: mpsc::Sender<()>,
}

impl AppState {
    pub fn new(config: AgentConfig, persist_tx: mpsc::Sender<()>) -> Self {
        let hyper = Hyperparams {
            learning_rate: config.qtable.learning_rate,
            discount_factor: config.qtable.discount_factor,
            epsilon_start: config.qtable.epsilon_start,
            epsilon_min: config.qtable.epsilon_min,
            epsilon_decay: config.qtable.epsilon_decay,
            persist_every_steps: config.qtable.persist_every_steps,
        };
        let persist_path = PathBuf::from(&config.qtable.persist_path);
        let engine = QEngine::restore_or_new(hyper, &persist_path);
        let decision_log = config
            .qtable
            .log_path
            .as_ref()
            .map(|p| DecisionLog::new(PathBuf::from(p)));

        AppState {
            config,
            telemetry: TelemetryStore::new(),
            engine,
            decision_log,
            persist_tx,
        }
    }

    pub fn persist_path(&self) -> PathBuf {
        PathBuf::from(&self.config.qtable.persist_path)
    }
}
