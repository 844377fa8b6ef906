use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::errors::RelayError;

const CONFIG_FILE_NAME: &str = "config.json";
pub const MAX_ACTIVE_RUNS: usize = 5;
pub const DEFAULT_START_CHECKPOINT: &str = "192.168.99.100";

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
#[serde(default)]
pub struct AppConfig {
    /// Hard ceiling on athletes on course at the same time
    pub max_active_runs: usize,
    /// Start checkpoint used when a course does not name one
    pub default_start_checkpoint: String,
    /// LED pattern shown on the start checkpoint when a session completes
    pub celebration_pattern: String,
    pub celebration_secs: u64,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            max_active_runs: MAX_ACTIVE_RUNS,
            default_start_checkpoint: DEFAULT_START_CHECKPOINT.to_string(),
            celebration_pattern: "rainbow".to_string(),
            celebration_secs: 10,
        }
    }
}

impl AppConfig {
    fn local_path() -> Option<PathBuf> {
        dirs::config_dir().map(|dir| dir.join("fieldrelay").join(CONFIG_FILE_NAME))
    }

    pub fn from_local_file() -> Result<Option<Self>, RelayError> {
        match Self::local_path() {
            Some(config_path) if config_path.exists() => Ok(Some(Self::from_file(&config_path)?)),
            _ => Ok(None),
        }
    }

    pub fn from_file(path: &Path) -> Result<Self, RelayError> {
        let file = std::fs::File::open(path).map_err(|e| RelayError::ConfigIOError { source: e })?;
        serde_json::from_reader(file).map_err(|e| RelayError::ConfigSerializeError { source: e })
    }

    /// Write the config to the local config directory, returning where it went.
    pub fn save(&self) -> Result<PathBuf, RelayError> {
        let config_path = Self::local_path().ok_or(RelayError::NoConfigDir)?;
        self.save_to(&config_path)?;
        Ok(config_path)
    }

    pub fn save_to(&self, path: &Path) -> Result<(), RelayError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| RelayError::ConfigIOError { source: e })?;
        }

        let file =
            std::fs::File::create(path).map_err(|e| RelayError::ConfigIOError { source: e })?;
        serde_json::to_writer_pretty(file, self)
            .map_err(|e| RelayError::ConfigSerializeError { source: e })
    }
}
