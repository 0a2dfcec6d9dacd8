use std::fs;
use std::path::Path;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

pub const DEFAULT_FALLBACK_INTERVAL_MS: i64 = 60 * 60 * 1000;
pub const DEFAULT_ERROR_BACKOFF_MS: i64 = 5 * 60 * 1000;
pub const DEFAULT_MAX_DOWNLOAD: usize = 10_000;
pub const DEFAULT_PAGE_SIZE: usize = 1_000;

/// Scheduling and volume limits shared by every synchronization task.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
    /// Next-run delay when the remote gives no cache-expiry hint; also the
    /// retry delay after fatal remote errors.
    pub fallback_interval_ms: i64,
    /// Retry delay after transient errors (absent `retry_after`) and unmet
    /// prerequisites.
    pub error_backoff_ms: i64,
    /// Absolute cap on records downloaded in one run.
    pub max_download: usize,
    pub page_size: usize,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            fallback_interval_ms: DEFAULT_FALLBACK_INTERVAL_MS,
            error_backoff_ms: DEFAULT_ERROR_BACKOFF_MS,
            max_download: DEFAULT_MAX_DOWNLOAD,
            page_size: DEFAULT_PAGE_SIZE,
        }
    }
}

impl SyncConfig {
    /// Reads a JSON config file. A missing file yields the defaults.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        if !path.exists() {
            log::info!("[CONFIG] {} not found, using defaults", path.display());
            return Ok(Self::default());
        }
        let raw = fs::read_to_string(path)
            .with_context(|| format!("read config {}", path.display()))?;
        let config: SyncConfig = serde_json::from_str(&raw)
            .with_context(|| format!("parse config {}", path.display()))?;
        Ok(config)
    }
}
