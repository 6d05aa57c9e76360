//! Engine configuration
//!
//! Stored as JSON under the user config directory. Every field has a
//! default, so a partial or missing file is fine.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

use crate::engine::EngineKind;
use crate::queue::QueueLimits;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to access config {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("Failed to parse config {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Backend used for playback
    pub engine: EngineKind,
    /// Byte ceiling of each buffering queue
    pub queue_max_bytes: u64,
    /// Item ceiling of each buffering queue (0 = unbounded)
    pub queue_max_buffers: u32,
    /// previous() goes back a track at or below this position, restarts above it
    pub restart_threshold_ms: u64,
    /// Allowed drift between a seek target and the reported position
    pub seek_tolerance_ms: u64,
    /// Delay between a pipeline reset and the resume
    pub recovery_delay_ms: u64,
    /// Consecutive recoveries before giving up
    pub max_recovery_attempts: u32,
    /// Cadence of position notifications
    pub position_interval_ms: u64,
    /// Volume applied at startup, percent
    pub initial_volume: u32,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            engine: EngineKind::Auto,
            queue_max_bytes: 5_000_000,
            queue_max_buffers: 0,
            restart_threshold_ms: 5000,
            seek_tolerance_ms: 100,
            recovery_delay_ms: 1000,
            max_recovery_attempts: 5,
            position_interval_ms: 200,
            initial_volume: 50,
        }
    }
}

impl EngineConfig {
    /// Load from the default location, falling back to defaults when absent.
    pub fn load() -> Result<Self, ConfigError> {
        Self::load_from(&config_file_path())
    }

    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            return Ok(Self::default());
        }

        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;

        serde_json::from_str(&content).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    pub fn save(&self) -> Result<(), ConfigError> {
        self.save_to(&config_file_path())
    }

    pub fn save_to(&self, path: &Path) -> Result<(), ConfigError> {
        let io_err = |source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        };

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(io_err)?;
        }

        let content = serde_json::to_string_pretty(self).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })?;

        std::fs::write(path, content).map_err(io_err)
    }

    pub fn queue_limits(&self) -> QueueLimits {
        QueueLimits {
            max_bytes: self.queue_max_bytes,
            max_buffers: self.queue_max_buffers,
        }
    }

    pub fn recovery_delay(&self) -> Duration {
        Duration::from_millis(self.recovery_delay_ms)
    }

    pub fn position_interval(&self) -> Duration {
        Duration::from_millis(self.position_interval_ms.max(1))
    }
}

pub fn config_file_path() -> PathBuf {
    dirs::config_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("poto")
        .join("config.json")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_file_gives_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config = EngineConfig::load_from(&dir.path().join("absent.json")).unwrap();
        assert_eq!(config, EngineConfig::default());
        assert_eq!(config.queue_limits().max_bytes, 5_000_000);
        assert_eq!(config.queue_limits().max_buffers, 0);
    }

    #[test]
    fn test_partial_file_keeps_other_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        std::fs::write(&path, r#"{ "recovery_delay_ms": 250, "engine": "Buffered" }"#).unwrap();

        let config = EngineConfig::load_from(&path).unwrap();
        assert_eq!(config.recovery_delay(), Duration::from_millis(250));
        assert_eq!(config.engine, EngineKind::Buffered);
        assert_eq!(config.seek_tolerance_ms, 100);
    }

    #[test]
    fn test_save_then_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("config.json");
        let config = EngineConfig {
            queue_max_bytes: 1_000_000,
            initial_volume: 80,
            ..Default::default()
        };
        config.save_to(&path).unwrap();
        assert_eq!(EngineConfig::load_from(&path).unwrap(), config);
    }

    #[test]
    fn test_garbage_is_parse_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        std::fs::write(&path, "not json").unwrap();
        assert!(matches!(
            EngineConfig::load_from(&path),
            Err(ConfigError::Parse { .. })
        ));
    }
}
