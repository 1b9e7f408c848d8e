#![allow(dead_code)]

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::{Duration, Instant};

use num_complex::Complex32;
use parking_lot::Mutex;

use hackrf_emitter::config::SystemConfig;
use hackrf_emitter::hardware::{
    CancelToken, CapabilityReport, CapabilityTier, TransmitBackend, TransmitJob, TransmitOutcome,
};
use hackrf_emitter::processing::{EncodedSignal, SignalEncoder, TilingPlan};
use hackrf_emitter::{Error, Result};

/// How a fake backend behaves when asked to transmit
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Behavior {
    /// Sleep out the effective duration, honouring cancellation
    Run,
    LaunchFailure,
    RuntimeFailure,
    EncodeFailure,
    Unavailable,
}

/// What the fake saw during `transmit`
#[derive(Debug, Clone)]
pub struct Observed {
    pub path: Option<PathBuf>,
    pub size_bytes: usize,
    pub copies: usize,
    pub repeat: bool,
}

/// Scriptable backend writing real temp files through `SignalEncoder`
pub struct FakeBackend {
    tier: CapabilityTier,
    behavior: Behavior,
    encoder: SignalEncoder,
    pub transmit_calls: AtomicUsize,
    pub aborted: AtomicBool,
    pub observed: Mutex<Option<Observed>>,
}

impl FakeBackend {
    pub fn new(tier: CapabilityTier, behavior: Behavior, temp_dir: &Path) -> Arc<Self> {
        Arc::new(Self {
            tier,
            behavior,
            encoder: SignalEncoder::new(Some(temp_dir.to_path_buf())),
            transmit_calls: AtomicUsize::new(0),
            aborted: AtomicBool::new(false),
            observed: Mutex::new(None),
        })
    }

    pub fn calls(&self) -> usize {
        self.transmit_calls.load(Ordering::SeqCst)
    }

    pub fn observed(&self) -> Option<Observed> {
        self.observed.lock().clone()
    }
}

impl TransmitBackend for FakeBackend {
    fn tier(&self) -> CapabilityTier {
        self.tier
    }

    fn available(&self) -> bool {
        self.behavior != Behavior::Unavailable
    }

    fn encode(&self, samples: &[Complex32], plan: &TilingPlan) -> Result<Option<EncodedSignal>> {
        if self.behavior == Behavior::EncodeFailure {
            return Err(Error::IoError(std::io::Error::new(
                std::io::ErrorKind::Other,
                "disk full",
            )));
        }
        self.encoder.encode(samples, self.tier, plan.copies)
    }

    fn transmit(
        &self,
        job: &TransmitJob,
        signal: Option<&EncodedSignal>,
        cancel: &CancelToken,
    ) -> Result<TransmitOutcome> {
        self.transmit_calls.fetch_add(1, Ordering::SeqCst);
        *self.observed.lock() = Some(Observed {
            path: signal.map(|s| s.path().to_path_buf()),
            size_bytes: signal.map_or(0, |s| s.size_bytes()),
            copies: job.plan.copies,
            repeat: job.plan.repeat,
        });
        match self.behavior {
            Behavior::LaunchFailure => Err(Error::LaunchFailure("fake exited at once".into())),
            Behavior::RuntimeFailure => Err(Error::RuntimeFailure("fake died mid-run".into())),
            _ => {
                let deadline = Instant::now() + job.effective_duration();
                if cancel.sleep_until(deadline, Duration::from_millis(10)) {
                    Ok(TransmitOutcome::Cancelled)
                } else {
                    Ok(TransmitOutcome::Completed)
                }
            }
        }
    }

    fn abort(&self) {
        self.aborted.store(true, Ordering::SeqCst);
    }
}

pub fn report_for(best_tier: CapabilityTier) -> CapabilityReport {
    CapabilityReport {
        native_loaded: best_tier == CapabilityTier::NativeApi,
        native_device_count: usize::from(best_tier == CapabilityTier::NativeApi),
        cli_available: Some(best_tier <= CapabilityTier::CliSubprocess),
        cli_device_present: Some(best_tier == CapabilityTier::CliSubprocess),
        best_tier,
    }
}

/// Config with fast polling and the encoder pointed at `temp_dir`
pub fn fast_config(temp_dir: &Path) -> SystemConfig {
    let mut config = SystemConfig::default();
    config.transmit.poll_interval_ms = 10;
    config.transmit.launch_check_secs = 0.2;
    config.transmit.terminate_grace_secs = 1.0;
    config.transmit.join_timeout_secs = 3.0;
    config.device.temp_dir = Some(temp_dir.to_path_buf());
    config
}

/// `seconds` of a constant signal at 1 ksps
pub fn signal(seconds: f64) -> Vec<Complex32> {
    vec![Complex32::new(0.25, -0.25); (seconds * 1_000.0).round() as usize]
}

pub fn files_in(dir: &Path) -> usize {
    std::fs::read_dir(dir).map(|d| d.count()).unwrap_or(0)
}

pub fn as_backend(fake: &Arc<FakeBackend>) -> Arc<dyn TransmitBackend> {
    fake.clone()
}
