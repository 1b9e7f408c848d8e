//! Capability detection across the native, CLI and simulation tiers

use std::io::Read;
use std::process::{Command, Stdio};
use std::sync::Arc;
use std::time::{Duration, Instant};

use serde::Serialize;
use tracing::{debug, info, warn};

use crate::{Result, Error};
use crate::config::DeviceConfig;
use crate::hardware::{CapabilityTier, NativeLibrary};

/// Poll step while waiting on a probe process
const PROBE_POLL: Duration = Duration::from_millis(20);

/// Result of a short-lived tool invocation
#[derive(Debug, Clone)]
pub struct ProbeOutput {
    /// Process exited with status 0
    pub success: bool,
    /// Captured standard output
    pub stdout: String,
}

/// Run `program args` and wait at most `timeout` for it to exit.
///
/// The child is killed when the timeout expires.
pub fn run_probe(program: &str, args: &[&str], timeout: Duration) -> Result<ProbeOutput> {
    let mut child = Command::new(program)
        .args(args)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::null())
        .spawn()?;

    let deadline = Instant::now() + timeout;
    let status = loop {
        if let Some(status) = child.try_wait()? {
            break status;
        }
        if Instant::now() >= deadline {
            let _ = child.kill();
            let _ = child.wait();
            return Err(Error::TimeoutError(format!(
                "{} did not exit within {:.1}s", program, timeout.as_secs_f64()
            )));
        }
        std::thread::sleep(PROBE_POLL);
    };

    let mut stdout = String::new();
    if let Some(mut out) = child.stdout.take() {
        let _ = out.read_to_string(&mut stdout);
    }
    Ok(ProbeOutput { success: status.success(), stdout })
}

/// Whether the transfer tool answers its help flag with a zero exit code
pub fn probe_transfer_tool(tool: &str, timeout: Duration) -> bool {
    match run_probe(tool, &["-h"], timeout) {
        Ok(output) => output.success,
        Err(e) => {
            debug!("{} probe failed: {}", tool, e);
            false
        }
    }
}

/// What detection found at startup
#[derive(Debug, Clone, Serialize)]
pub struct CapabilityReport {
    /// libhackrf loaded and `hackrf_init` succeeded
    pub native_loaded: bool,
    /// Boards listed by `hackrf_device_list`
    pub native_device_count: usize,
    /// `None` when the CLI was not probed because the native tier won
    pub cli_available: Option<bool>,
    /// `hackrf_info` saw a board; `None` when not probed
    pub cli_device_present: Option<bool>,
    /// Tier the controller starts from
    pub best_tier: CapabilityTier,
}

impl CapabilityReport {
    /// Whether any probe saw a physical board
    pub fn device_present(&self) -> bool {
        self.native_device_count > 0 || self.cli_device_present == Some(true)
    }

    /// Report for a host with no usable hardware
    pub fn simulation_only() -> Self {
        Self {
            native_loaded: false,
            native_device_count: 0,
            cli_available: Some(false),
            cli_device_present: None,
            best_tier: CapabilityTier::Simulation,
        }
    }
}

/// Probes the host once at controller construction
pub struct CapabilityDetector<'a> {
    config: &'a DeviceConfig,
}

impl<'a> CapabilityDetector<'a> {
    /// Detector over `config`
    pub fn new(config: &'a DeviceConfig) -> Self {
        Self { config }
    }

    fn probe_timeout(&self) -> Duration {
        Duration::from_secs_f64(self.config.probe_timeout_secs.clamp(0.0, 5.0))
    }

    /// Load and initialize libhackrf, then count boards
    fn detect_native(&self) -> Result<(Arc<NativeLibrary>, usize)> {
        if !self.config.enable_native {
            return Err(Error::BackendUnavailable("native tier disabled".to_string()));
        }
        let library = NativeLibrary::load(&self.config.native_library_names)?;
        library.init()?;
        let count = match library.device_count() {
            Ok(count) => count,
            Err(e) => {
                warn!("HackRF device enumeration failed: {}", e);
                0
            }
        };
        Ok((Arc::new(library), count))
    }

    fn detect_cli_device(&self) -> bool {
        match run_probe(&self.config.info_tool, &[], self.probe_timeout()) {
            Ok(output) => output.success,
            Err(e) => {
                warn!("Could not check HackRF device status: {}", e);
                false
            }
        }
    }

    /// Establish the best usable tier. Never fails: problems only degrade the tier.
    pub fn detect(&self) -> (CapabilityReport, Option<Arc<NativeLibrary>>) {
        match self.detect_native() {
            Ok((library, count)) => {
                if count > 0 {
                    info!("HackRF found via native API ({} device(s))", count);
                } else {
                    info!("libhackrf initialized but no HackRF devices found");
                }
                let report = CapabilityReport {
                    native_loaded: true,
                    native_device_count: count,
                    cli_available: None,
                    cli_device_present: None,
                    best_tier: CapabilityTier::NativeApi,
                };
                return (report, Some(library));
            }
            Err(e) => {
                info!("Native HackRF API unavailable: {}", e);
            }
        }

        let cli_available = probe_transfer_tool(&self.config.transfer_tool, self.probe_timeout());
        if !cli_available {
            info!("No HackRF tools available, running in simulation mode");
            return (CapabilityReport::simulation_only(), None);
        }

        let present = self.detect_cli_device();
        if present {
            info!("HackRF device found via {}", self.config.info_tool);
        } else {
            info!("{} available but no device found", self.config.transfer_tool);
        }
        let report = CapabilityReport {
            native_loaded: false,
            native_device_count: 0,
            cli_available: Some(true),
            cli_device_present: Some(present),
            best_tier: CapabilityTier::CliSubprocess,
        };
        (report, None)
    }
}
