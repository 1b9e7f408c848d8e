//! Configuration management module

pub mod device_config;
pub mod transmit_config;
pub mod validation;

use std::path::{Path, PathBuf};
use std::fs;
use serde::{Deserialize, Serialize};

pub use device_config::DeviceConfig;
pub use transmit_config::TransmitConfig;
pub use validation::validate_config;

use crate::{Error, Result};

/// System-wide configuration
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct SystemConfig {
    /// Library names and probe settings
    #[serde(default)]
    pub device: DeviceConfig,
    /// Worker timing
    #[serde(default)]
    pub transmit: TransmitConfig,
    /// Signal cache location
    #[serde(default)]
    pub cache: CacheConfig,
    /// Log level and output format
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl SystemConfig {
    /// Load configuration from file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = fs::read_to_string(path)?;
        let config: Self = serde_yaml::from_str(&content)
            .map_err(|e| Error::ConfigError(format!("Failed to parse config: {}", e)))?;
        validate_config(&config)?;
        Ok(config)
    }

    /// Save configuration to file
    pub fn to_file<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let content = serde_yaml::to_string(self)
            .map_err(|e| Error::ConfigError(format!("Failed to serialize config: {}", e)))?;
        fs::write(path, content)?;
        Ok(())
    }
}

/// Signal cache configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct CacheConfig {
    /// Where cached signals live
    pub directory: PathBuf,
    /// Reuse cached signals
    #[serde(default = "default_true")]
    pub enabled: bool,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            directory: PathBuf::from("signal_cache"),
            enabled: true,
        }
    }
}

/// Logging configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct LoggingConfig {
    /// Default filter directive, overridden by `RUST_LOG`
    pub level: String,
    /// Output layout
    #[serde(default)]
    pub format: LogFormat,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: LogFormat::Pretty,
        }
    }
}

/// Log output format
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    /// Multi-line human-readable output
    Pretty,
    /// One line per event
    Compact,
    /// Newline-delimited JSON
    Json,
}

pub(crate) fn default_true() -> bool {
    true
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_yaml_roundtrip_keeps_overrides() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("emitter.yaml");

        let mut config = SystemConfig::default();
        config.device.transfer_tool = "/opt/hackrf/bin/hackrf_transfer".to_string();
        config.transmit.poll_interval_ms = 50;
        config.logging.format = LogFormat::Json;
        config.to_file(&path).unwrap();

        let loaded = SystemConfig::from_file(&path).unwrap();
        assert_eq!(loaded.device.transfer_tool, "/opt/hackrf/bin/hackrf_transfer");
        assert_eq!(loaded.transmit.poll_interval_ms, 50);
        assert_eq!(loaded.logging.format, LogFormat::Json);
    }

    #[test]
    fn test_partial_yaml_uses_defaults() {
        let yaml = "transmit:\n  poll_interval_ms: 20\n";
        let config: SystemConfig = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(config.transmit.poll_interval_ms, 20);
        assert_eq!(config.transmit.terminate_grace_secs, 5.0);
        assert_eq!(config.device.transfer_tool, "hackrf_transfer");
        assert!(config.cache.enabled);
    }

    #[test]
    fn test_invalid_file_is_config_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("broken.yaml");
        fs::write(&path, "transmit: [1, 2").unwrap();
        assert!(matches!(SystemConfig::from_file(&path), Err(Error::ConfigError(_))));
    }
}
