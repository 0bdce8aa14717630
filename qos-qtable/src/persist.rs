use std::collections::HashMap;

use serde::{Deserialize, Serialize};

pub const SNAPSHOT_VERSION: u32 = 1;

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct PersistedEntry {
    pub actions: Vec<u32>,
    /// 3 rows (one per congestion state) × `actions.len()` columns.
    pub q: Vec<Vec<f64>>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct PersistedDocument {
    pub version: u32,
    pub epsilon: f64,
    pub step: u64,
    pub tables: HashMap<String, PersistedEntry>,
}
