use crate::{
    domain::position::{DEFAULT_BASE_POSITION, DEFAULT_RENUMBER_EPSILON},
    error::{Result, SyncError},
};
use serde::{Deserialize, Serialize};
use std::{path::Path, time::Duration};
use tokio::fs;

/// Tunables shared by the board store, reconciler and broadcaster
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "snake_case")]
pub struct SyncConfig {
    /// Position given to the first entity of an empty parent
    pub base_position: f64,
    /// Neighbour gap below which siblings are renumbered
    pub renumber_epsilon: f64,
    /// Per-board broadcast buffer; slower subscribers lag and must refetch
    pub channel_capacity: usize,
    /// Client-side timeout for a reconciliation request
    pub request_timeout_ms: u64,
    /// How often the reconciler re-acquires locks when an entity moves
    /// between parents while it waits
    pub max_lock_attempts: usize,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            base_position: DEFAULT_BASE_POSITION,
            renumber_epsilon: DEFAULT_RENUMBER_EPSILON,
            channel_capacity: 256,
            request_timeout_ms: 10_000,
            max_lock_attempts: 3,
        }
    }
}

impl SyncConfig {
    /// Loads and validates a JSON config file. Missing fields keep defaults.
    pub async fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let contents = fs::read_to_string(path).await?;
        let config: SyncConfig = serde_json::from_str(&contents)?;
        config.validate()?;
        tracing::debug!(path = %path.display(), "loaded sync config");
        Ok(config)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }

    pub fn validate(&self) -> Result<()> {
        if !(self.base_position.is_finite() && self.base_position > 0.0) {
            return Err(SyncError::ConfigError(format!(
                "base_position must be a positive number, got {}",
                self.base_position
            )));
        }
        if !(self.renumber_epsilon.is_finite() && self.renumber_epsilon > 0.0) {
            return Err(SyncError::ConfigError(format!(
                "renumber_epsilon must be a positive number, got {}",
                self.renumber_epsilon
            )));
        }
        if self.channel_capacity == 0 {
            return Err(SyncError::ConfigError(
                "channel_capacity must be at least 1".to_string(),
            ));
        }
        if self.request_timeout_ms == 0 {
            return Err(SyncError::ConfigError(
                "request_timeout_ms must be at least 1".to_string(),
            ));
        }
        if self.max_lock_attempts == 0 {
            return Err(SyncError::ConfigError(
                "max_lock_attempts must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}
