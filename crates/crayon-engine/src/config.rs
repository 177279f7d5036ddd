use crate::pending::PendingConfig;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

pub const DEFAULT_POLL_INTERVAL_MS: u64 = 1_500;
pub const DEFAULT_DISCOVERY_BATCH_SIZE: usize = 200;
pub const DEFAULT_PENDING_CAPACITY: usize = 1_000;
pub const DEFAULT_PENDING_TTL_SECS: u64 = 10 * 60;
pub const DEFAULT_PENDING_CHECKS_PER_TICK: usize = 50;
/// One year; anything longer never expires in practice.
pub const MAX_PENDING_TTL_SECS: u64 = 365 * 24 * 60 * 60;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("invalid config: {0}")]
    Parse(String),
    #[error("config value out of range: {0}")]
    Invalid(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub poll_interval_ms: u64,
    pub discovery_batch_size: usize,
    pub pending_capacity: usize,
    pub pending_ttl_secs: u64,
    pub pending_checks_per_tick: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: DEFAULT_POLL_INTERVAL_MS,
            discovery_batch_size: DEFAULT_DISCOVERY_BATCH_SIZE,
            pending_capacity: DEFAULT_PENDING_CAPACITY,
            pending_ttl_secs: DEFAULT_PENDING_TTL_SECS,
            pending_checks_per_tick: DEFAULT_PENDING_CHECKS_PER_TICK,
        }
    }
}

impl EngineConfig {
    pub fn from_toml_str(contents: &str) -> Result<Self, ConfigError> {
        let config: Self =
            toml::from_str(contents).map_err(|err| ConfigError::Parse(err.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml_str(&contents)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.poll_interval_ms == 0 {
            return Err(ConfigError::Invalid(
                "poll_interval_ms must be positive".to_string(),
            ));
        }
        if self.discovery_batch_size == 0 {
            return Err(ConfigError::Invalid(
                "discovery_batch_size must be positive".to_string(),
            ));
        }
        if self.pending_capacity == 0 {
            return Err(ConfigError::Invalid(
                "pending_capacity must be positive".to_string(),
            ));
        }
        if self.pending_ttl_secs == 0 {
            return Err(ConfigError::Invalid(
                "pending_ttl_secs must be positive".to_string(),
            ));
        }
        if self.pending_ttl_secs > MAX_PENDING_TTL_SECS {
            return Err(ConfigError::Invalid(format!(
                "pending_ttl_secs must be at most {MAX_PENDING_TTL_SECS}"
            )));
        }
        Ok(())
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn pending(&self) -> PendingConfig {
        PendingConfig {
            capacity: self.pending_capacity,
            ttl: chrono::Duration::seconds(self.pending_ttl_secs.min(MAX_PENDING_TTL_SECS) as i64),
        }
    }
}
