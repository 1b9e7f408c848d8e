//! Device configuration types

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use super::default_true;

/// Device configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct DeviceConfig {
    /// Try the native library before the CLI tool
    #[serde(default = "default_true")]
    pub enable_native: bool,
    /// Shared library names tried in order
    #[serde(default = "default_library_names")]
    pub native_library_names: Vec<String>,
    /// Program used for the CLI tier
    #[serde(default = "default_transfer_tool")]
    pub transfer_tool: String,
    /// Program probed for an attached board
    #[serde(default = "default_info_tool")]
    pub info_tool: String,
    /// Upper bound on each CLI probe
    #[serde(default = "default_probe_timeout")]
    pub probe_timeout_secs: f64,
    /// Enable the RF front-end amplifier
    #[serde(default = "default_true")]
    pub amp_enable: bool,
    /// Directory for encoded signal files (system temp dir when unset)
    #[serde(default)]
    pub temp_dir: Option<PathBuf>,
}

impl Default for DeviceConfig {
    fn default() -> Self {
        Self {
            enable_native: true,
            native_library_names: default_library_names(),
            transfer_tool: default_transfer_tool(),
            info_tool: default_info_tool(),
            probe_timeout_secs: default_probe_timeout(),
            amp_enable: true,
            temp_dir: None,
        }
    }
}

#[cfg(target_os = "linux")]
fn default_library_names() -> Vec<String> {
    vec!["libhackrf.so.0".to_string(), "libhackrf.so".to_string()]
}

#[cfg(target_os = "macos")]
fn default_library_names() -> Vec<String> {
    vec!["libhackrf.dylib".to_string(), "libhackrf.0.dylib".to_string()]
}

#[cfg(target_os = "windows")]
fn default_library_names() -> Vec<String> {
    vec!["hackrf.dll".to_string(), "libhackrf.dll".to_string()]
}

#[cfg(not(any(target_os = "linux", target_os = "macos", target_os = "windows")))]
fn default_library_names() -> Vec<String> {
    vec!["libhackrf.so".to_string()]
}

fn default_transfer_tool() -> String {
    "hackrf_transfer".to_string()
}

fn default_info_tool() -> String {
    "hackrf_info".to_string()
}

fn default_probe_timeout() -> f64 {
    5.0
}
