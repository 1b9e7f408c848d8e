//! HackRF Emitter - transmission control for HackRF software-defined radios
//!
//! This library sends baseband I/Q waveforms through a HackRF at a configured
//! frequency, sample rate and gain. Hardware access degrades across three
//! capability tiers (the native libhackrf API, the `hackrf_transfer` tool,
//! and a timing-only simulation), so the same start/stop cycle works on
//! machines with no radio attached.

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod config;
pub mod data_manager;
pub mod hardware;
pub mod interface;
pub mod logging;
pub mod processing;
pub mod transmit;
pub mod error;

pub use error::{Error, Result};
pub use config::SystemConfig;
pub use hardware::{CapabilityReport, CapabilityTier, DeviceInfo, DeviceState};
pub use transmit::{
    SessionOutcome, TransmissionReport, TransmissionRequest, TransmitController, TransmitState,
};

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_controller_creation_without_hardware() {
        let mut config = SystemConfig::default();
        config.device.enable_native = false;
        config.device.transfer_tool = "no-such-hackrf-transfer-tool".to_string();
        config.device.info_tool = "no-such-hackrf-info-tool".to_string();
        config.device.probe_timeout_secs = 1.0;

        let controller = TransmitController::new(config);
        let info = controller.get_device_info();
        assert_eq!(info.status, "connected");
        assert_eq!(info.capability, CapabilityTier::Simulation);
        assert!(!controller.is_transmitting());
    }
}
