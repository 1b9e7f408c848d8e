//! Configuration validation utilities

use crate::{Result, Error};
use super::SystemConfig;

/// Validate system configuration
pub fn validate_config(config: &SystemConfig) -> Result<()> {
    if config.device.transfer_tool.trim().is_empty() {
        return Err(Error::ValidationError("Transfer tool cannot be empty".to_string()));
    }

    if config.device.info_tool.trim().is_empty() {
        return Err(Error::ValidationError("Info tool cannot be empty".to_string()));
    }

    // Probes run at construction and must stay short
    let probe = config.device.probe_timeout_secs;
    if !(probe > 0.0 && probe <= 5.0) {
        return Err(Error::ValidationError(format!(
            "Probe timeout must be in (0, 5] seconds, got {}", probe
        )));
    }

    if config.transmit.poll_interval_ms == 0 {
        return Err(Error::ValidationError("Poll interval must be positive".to_string()));
    }

    let transmit = &config.transmit;
    for (name, value) in [
        ("launch_check_secs", transmit.launch_check_secs),
        ("safety_margin_secs", transmit.safety_margin_secs),
        ("terminate_grace_secs", transmit.terminate_grace_secs),
        ("join_timeout_secs", transmit.join_timeout_secs),
    ] {
        if !value.is_finite() || value < 0.0 {
            return Err(Error::ValidationError(format!(
                "{} must be a non-negative number, got {}", name, value
            )));
        }
    }

    Ok(())
}
