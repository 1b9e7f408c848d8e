//! Hardware abstraction layer for HackRF transmission

pub mod hackrf_ffi;
pub mod device_manager;
pub mod native;
pub mod cli;
pub mod simulation;

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use num_complex::Complex32;
use serde::{Deserialize, Serialize};

pub use device_manager::{CapabilityDetector, CapabilityReport};
pub use hackrf_ffi::{NativeLibrary, NativeTransfer};
pub use native::NativeBackend;
pub use cli::CliBackend;
pub use simulation::SimulationBackend;

use crate::Result;
use crate::processing::{EncodedSignal, TilingPlan};

/// Hardware access tiers, in order of preference
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CapabilityTier {
    /// libhackrf loaded in-process
    NativeApi,
    /// `hackrf_transfer` child process
    CliSubprocess,
    /// Timing-only emulation
    Simulation,
}

impl CapabilityTier {
    /// On-disk format, `None` when the tier never writes a file
    pub fn sample_format(&self) -> Option<SampleFormat> {
        match self {
            CapabilityTier::NativeApi => Some(SampleFormat::Cf32),
            CapabilityTier::CliSubprocess => Some(SampleFormat::Cu8),
            CapabilityTier::Simulation => None,
        }
    }

    /// Stable identifier used in logs and JSON
    pub fn as_str(&self) -> &'static str {
        match self {
            CapabilityTier::NativeApi => "native_api",
            CapabilityTier::CliSubprocess => "cli_subprocess",
            CapabilityTier::Simulation => "simulation",
        }
    }
}

impl std::fmt::Display for CapabilityTier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Encoded sample format
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum SampleFormat {
    /// Complex 32-bit floats
    Cf32,
    /// Complex unsigned 8-bit integers
    Cu8,
}

impl SampleFormat {
    /// Get bytes per complex sample
    pub fn bytes_per_sample(&self) -> usize {
        match self {
            SampleFormat::Cf32 => 8, // 4 bytes real + 4 bytes imag
            SampleFormat::Cu8 => 2,  // 1 byte real + 1 byte imag
        }
    }

    /// Extension for temp files in this format
    pub fn file_suffix(&self) -> &'static str {
        match self {
            SampleFormat::Cf32 => ".complex64",
            SampleFormat::Cu8 => ".bin",
        }
    }

    /// Short format name
    pub fn as_str(&self) -> &'static str {
        match self {
            SampleFormat::Cf32 => "cf32",
            SampleFormat::Cu8 => "cu8",
        }
    }
}

/// Current radio settings, owned by the controller
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct DeviceState {
    /// Ready to accept commands (always true after construction)
    pub connected: bool,
    /// Center frequency in Hz
    pub frequency_hz: u64,
    /// Samples per second
    pub sample_rate_hz: u32,
    /// TX VGA gain in dB
    pub gain_db: u32,
    /// A worker is running
    pub transmitting: bool,
}

/// Status snapshot for the API layer
#[derive(Debug, Clone, Serialize)]
pub struct DeviceInfo {
    /// Always `connected`; simulation counts as a device
    pub status: String,
    /// Human-readable mode
    pub info: String,
    /// `HackRF One` or `Simulation`
    pub board_id: String,
    /// Center frequency in Hz
    pub current_frequency: u64,
    /// Samples per second
    pub current_sample_rate: u32,
    /// TX gain in dB
    pub current_gain: u32,
    /// A session is running
    pub transmission_active: bool,
    /// Best detected tier
    pub capability: CapabilityTier,
    /// A physical board was seen
    pub device_present: bool,
    /// Tier that ran the last session
    pub last_backend: Option<CapabilityTier>,
}

/// Radio parameters for one backend invocation
#[derive(Debug, Clone)]
pub struct TransmitJob {
    /// Center frequency in Hz
    pub frequency_hz: u64,
    /// Samples per second
    pub sample_rate_hz: u32,
    /// TX VGA gain in dB
    pub gain_db: u32,
    /// RF amplifier on
    pub amp_enable: bool,
    /// Looping and duration plan for this tier
    pub plan: TilingPlan,
}

impl TransmitJob {
    /// Wall-clock span to enforce
    pub fn effective_duration(&self) -> Duration {
        Duration::from_secs_f64(self.plan.effective_duration)
    }
}

/// How a backend invocation ended
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum TransmitOutcome {
    /// Ran for its full duration
    Completed,
    /// Stopped by a cancellation request
    Cancelled,
    /// Safety timeout forced the backend down
    ForceStopped,
}

/// Cooperative cancellation flag shared between controller and worker
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    /// Fresh, unraised flag
    pub fn new() -> Self {
        Self::default()
    }

    /// Raise the flag
    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    /// Whether the flag is raised
    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }

    /// Both handles share one flag
    pub fn same_flag(&self, other: &CancelToken) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }

    /// Sleep in `poll` steps until `deadline` or cancellation.
    ///
    /// Returns true when cancelled.
    pub fn sleep_until(&self, deadline: Instant, poll: Duration) -> bool {
        loop {
            if self.is_cancelled() {
                return true;
            }
            let now = Instant::now();
            if now >= deadline {
                return false;
            }
            std::thread::sleep(poll.min(deadline - now));
        }
    }
}

/// One capability tier's transmit path
pub trait TransmitBackend: Send + Sync {
    /// Tier implemented by this backend
    fn tier(&self) -> CapabilityTier;

    /// Whether the tier can be attempted on this host
    fn available(&self) -> bool;

    /// Materialize the wire file for this tier (`None` when no file is needed)
    fn encode(&self, samples: &[Complex32], plan: &TilingPlan) -> Result<Option<EncodedSignal>>;

    /// Run the transmission, blocking until it finishes, is cancelled, or fails
    fn transmit(
        &self,
        job: &TransmitJob,
        signal: Option<&EncodedSignal>,
        cancel: &CancelToken,
    ) -> Result<TransmitOutcome>;

    /// Abort any in-flight transmission started by this backend
    fn abort(&self);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sample_format() {
        assert_eq!(SampleFormat::Cf32.bytes_per_sample(), 8);
        assert_eq!(SampleFormat::Cu8.bytes_per_sample(), 2);
        assert_eq!(SampleFormat::Cu8.as_str(), "cu8");
    }

    #[test]
    fn test_tier_order_and_formats() {
        assert!(CapabilityTier::NativeApi < CapabilityTier::CliSubprocess);
        assert!(CapabilityTier::CliSubprocess < CapabilityTier::Simulation);
        assert_eq!(CapabilityTier::NativeApi.sample_format(), Some(SampleFormat::Cf32));
        assert_eq!(CapabilityTier::Simulation.sample_format(), None);
    }

    #[test]
    fn test_cancel_token_identity() {
        let token = CancelToken::new();
        assert!(token.same_flag(&token.clone()));
        assert!(!token.same_flag(&CancelToken::new()));
    }

    #[test]
    fn test_cancel_token_interrupts_sleep() {
        let token = CancelToken::new();
        let remote = token.clone();
        let handle = std::thread::spawn(move || {
            std::thread::sleep(Duration::from_millis(50));
            remote.cancel();
        });
        let start = Instant::now();
        let cancelled = token.sleep_until(start + Duration::from_secs(5), Duration::from_millis(10));
        handle.join().unwrap();
        assert!(cancelled);
        assert!(start.elapsed() < Duration::from_secs(1));
    }

    #[test]
    fn test_sleep_until_deadline() {
        let token = CancelToken::new();
        let start = Instant::now();
        assert!(!token.sleep_until(start + Duration::from_millis(30), Duration::from_millis(10)));
        assert!(start.elapsed() >= Duration::from_millis(30));
    }
}
