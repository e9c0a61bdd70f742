use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::errors::CourierError;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunnerConfig {
    /// Fixed size of the worker pool for one batch.
    #[serde(default = "default_worker_count")]
    pub worker_count: usize,
    /// Bounded wait for the per-job lock before the attempt is skipped.
    #[serde(default = "default_lock_timeout_secs")]
    pub lock_timeout_secs: u64,
    /// Data directory for the file-backed store. None means the platform
    /// default (resolved by the CLI).
    #[serde(default)]
    pub data_dir: Option<PathBuf>,
}

fn default_worker_count() -> usize {
    5
}

fn default_lock_timeout_secs() -> u64 {
    10
}

impl Default for RunnerConfig {
    fn default() -> Self {
        Self {
            worker_count: default_worker_count(),
            lock_timeout_secs: default_lock_timeout_secs(),
            data_dir: None,
        }
    }
}

impl RunnerConfig {
    /// Load a config from a JSON file.
    pub fn load(path: &Path) -> Result<Self, CourierError> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            CourierError::Config(format!("Could not read {}: {}", path.display(), e))
        })?;
        let config = serde_json::from_str(&content).map_err(|e| {
            CourierError::Config(format!("Could not parse {}: {}", path.display(), e))
        })?;
        Ok(config)
    }
}
