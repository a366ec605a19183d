//! Replay configuration loaded from TOML.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::domain::Timeframe;
use crate::replay::DEFAULT_SPEED_MS;
use crate::store::DEFAULT_BATCH_SIZE;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("read config file {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("parse config TOML: {0}")]
    Parse(#[from] toml::de::Error),
}

/// Every field is optional in the file; missing ones take their defaults.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReplayConfig {
    /// Autoplay interval per step, in milliseconds.
    pub speed_ms: u64,

    /// Rows per bulk-insert batch.
    pub insert_batch_size: usize,

    /// Directory of the file-backed key-value store.
    pub data_dir: PathBuf,

    /// Requested timeframe; `None` follows the session's base resolution.
    pub default_timeframe: Option<Timeframe>,

    /// Remember sessions across restarts.
    pub persist: bool,
}

impl Default for ReplayConfig {
    fn default() -> Self {
        Self {
            speed_ms: DEFAULT_SPEED_MS,
            insert_batch_size: DEFAULT_BATCH_SIZE,
            data_dir: PathBuf::from("data"),
            default_timeframe: None,
            persist: true,
        }
    }
}

impl ReplayConfig {
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml(&content)
    }

    pub fn from_toml(content: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(content)?;
        Ok(config.clamped())
    }

    /// Speed of at least 1 ms, batch size of at least 1.
    pub fn clamped(mut self) -> Self {
        self.speed_ms = self.speed_ms.max(1);
        self.insert_batch_size = self.insert_batch_size.max(1);
        self
    }
}
