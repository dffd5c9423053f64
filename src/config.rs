//! Configuration for the engine.
//!
//! The engine only reads configuration. Experiment-specific settings travel in
//! the experiment descriptors; this covers the runtime knobs shared by every
//! session.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

/// Runtime configuration shared by all experiment sessions.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Root directory under which each session creates its spill directory
    pub spill_root: PathBuf,

    /// Lower bound for an analysis sleep read from a dynamic sleep buffer
    #[serde(with = "duration_ms")]
    pub min_dynamic_sleep: Duration,

    /// Sleep between analysis iterations when the graph does not set one
    #[serde(with = "duration_ms")]
    pub default_sleep: Duration,

    /// How often the acquisition worker ticks generating inputs
    #[serde(with = "duration_ms")]
    pub tick_interval: Duration,

    /// Capacity of the acquisition queue between sources and the worker
    pub queue_capacity: usize,

    /// Tick generating inputs from the event clock between samples.
    /// Disable when samples carry synthetic timestamps.
    pub generate_ticks: bool,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            spill_root: std::env::temp_dir().join("sensorflow"),
            min_dynamic_sleep: Duration::from_millis(10),
            default_sleep: Duration::from_millis(20),
            tick_interval: Duration::from_millis(5),
            queue_capacity: 10_000,
            generate_ticks: true,
        }
    }
}

impl EngineConfig {
    /// Load configuration from the default location, falling back to defaults.
    pub fn load() -> Result<Self, ConfigError> {
        let config_path = Self::config_path();

        if config_path.exists() {
            Self::load_from(&config_path)
        } else {
            Ok(Self::default())
        }
    }

    /// Load configuration from an explicit path.
    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        let config: EngineConfig = serde_json::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    /// Get the path to the configuration file.
    pub fn config_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("sensorflow")
            .join("config.json")
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.queue_capacity == 0 {
            return Err(ConfigError::Invalid("queue_capacity must be positive".into()));
        }
        if self.tick_interval.is_zero() {
            return Err(ConfigError::Invalid("tick_interval must be positive".into()));
        }
        Ok(())
    }
}

/// Configuration errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Parse error: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

/// Serde support for Duration as whole milliseconds.
mod duration_ms {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        (duration.as_millis() as u64).serialize(serializer)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let millis = u64::deserialize(deserializer)?;
        Ok(Duration::from_millis(millis))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = EngineConfig::default();
        assert_eq!(config.min_dynamic_sleep, Duration::from_millis(10));
        assert_eq!(config.queue_capacity, 10_000);
        assert!(config.spill_root.ends_with("sensorflow"));
    }

    #[test]
    fn test_partial_config_uses_defaults() {
        let config: EngineConfig = serde_json::from_str(r#"{"tick_interval": 2}"#).unwrap();
        assert_eq!(config.tick_interval, Duration::from_millis(2));
        assert_eq!(config.default_sleep, Duration::from_millis(20));
    }

    #[test]
    fn test_load_from_rejects_zero_queue() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        std::fs::write(&path, r#"{"queue_capacity": 0}"#).unwrap();

        let err = EngineConfig::load_from(&path).unwrap_err();
        assert!(matches!(err, ConfigError::Invalid(_)));
    }
}
