/// Errors raised while loading a persisted Q-table document. Restore treats all of
/// these as "start fresh" rather than a fatal startup error — a corrupt snapshot should
/// never keep the agent from booting.
#[derive(Debug, thiserror::Error)]
pub enum RestoreError {
    #[error("snapshot version {found} is not the supported version {expected}")]
    UnsupportedVersion { found: u32, expected: u32 },
    #[error("flow-key {key:?} has a Q-matrix with {rows} rows, expected 3")]
    WrongRowCount { key: String, rows: usize },
    #[error("flow-key {key:?} row {row} has {got} columns, expected {expected}")]
    RaggedRow {
        key: String,
        row: usize,
        got: usize,
        expected: usize,
    },
    #[error("io error reading snapshot: {0}")]
    Io(#[from] std::io::Error),
    #[error("malformed snapshot json: {0}")]
    Json(#[from] serde_json::Error),
}
