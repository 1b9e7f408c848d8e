//! Transmission orchestrator: admission, worker launch and stop

pub mod session;
mod worker;

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use crossbeam::channel;
use num_complex::Complex32;
use parking_lot::Mutex;
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::{Result, Error};
use crate::config::SystemConfig;
use crate::hardware::{
    CancelToken, CapabilityDetector, CapabilityReport, CapabilityTier, CliBackend, DeviceInfo,
    DeviceState, NativeBackend, NativeLibrary, NativeTransfer, SimulationBackend, TransmitBackend,
};
use crate::processing::{natural_duration, SignalEncoder, TilingPlan};
use crate::processing::signals::samples_from_iq_bytes;

pub use session::{SessionOutcome, TransmissionReport};
use session::TransmissionSession;
use worker::Worker;

/// Highest TX VGA gain the board accepts
pub const MAX_TX_GAIN_DB: u32 = 47;

/// Longest transmission a single request may ask for (one week)
pub const MAX_DURATION_SECS: f64 = 7.0 * 24.0 * 3600.0;

const DEFAULT_FREQUENCY_HZ: u64 = 915_000_000;
const DEFAULT_SAMPLE_RATE_HZ: u32 = 2_000_000;
const DEFAULT_GAIN_DB: u32 = 20;

/// Orchestrator phase
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum TransmitState {
    /// Ready for `start()`
    Idle,
    /// Session reserved, signal being encoded
    Starting,
    /// Worker running
    Transmitting,
    /// `stop()` is cancelling the worker
    Stopping,
    /// Worker finished and is releasing resources
    Completed,
    /// Every tier failed; worker is releasing resources
    Failed,
}

/// One transmission to run
#[derive(Debug, Clone)]
pub struct TransmissionRequest {
    /// Baseband I/Q, full scale at magnitude 1.0
    pub samples: Vec<Complex32>,
    /// Center frequency in Hz
    pub frequency_hz: u64,
    /// Samples per second
    pub sample_rate_hz: u32,
    /// TX VGA gain in dB, at most `MAX_TX_GAIN_DB`
    pub gain_db: u32,
    /// Seconds to transmit; the signal's own length when `None`
    pub duration: Option<f64>,
}

impl TransmissionRequest {
    /// Request transmitting `samples` once, for their natural length
    pub fn new(samples: Vec<Complex32>, frequency_hz: u64, sample_rate_hz: u32, gain_db: u32) -> Self {
        Self { samples, frequency_hz, sample_rate_hz, gain_db, duration: None }
    }

    /// Transmit for `seconds`, looping or cutting the signal as needed
    pub fn with_duration(mut self, seconds: f64) -> Self {
        self.duration = Some(seconds);
        self
    }

    /// Build from unsigned 8-bit interleaved I/Q
    pub fn from_iq_bytes(bytes: &[u8], frequency_hz: u64, sample_rate_hz: u32, gain_db: u32) -> Self {
        Self::new(samples_from_iq_bytes(bytes), frequency_hz, sample_rate_hz, gain_db)
    }

    /// Checks that reject a request before any resource is allocated.
    ///
    /// Returns the natural duration of the signal.
    pub fn validate(&self) -> Result<f64> {
        if self.samples.is_empty() {
            return Err(Error::ValidationError("Signal contains no samples".to_string()));
        }
        if self.sample_rate_hz == 0 {
            return Err(Error::ValidationError("Sample rate must be positive".to_string()));
        }
        if self.gain_db > MAX_TX_GAIN_DB {
            return Err(Error::ValidationError(format!(
                "Gain {} dB exceeds the {} dB maximum", self.gain_db, MAX_TX_GAIN_DB
            )));
        }
        if let Some(duration) = self.duration {
            if !(duration.is_finite() && duration > 0.0) {
                return Err(Error::ValidationError(format!(
                    "Duration must be positive, got {}", duration
                )));
            }
            if duration > MAX_DURATION_SECS {
                return Err(Error::ValidationError(format!(
                    "Duration {}s exceeds the {}s maximum", duration, MAX_DURATION_SECS
                )));
            }
        }
        natural_duration(self.samples.len(), self.sample_rate_hz)
    }
}

/// State behind the controller lock
pub(crate) struct ControllerInner {
    pub device: DeviceState,
    pub phase: TransmitState,
    pub session: Option<TransmissionSession>,
    /// Cancel flag of a session reserved by `start()` but not yet launched
    pub pending: Option<CancelToken>,
    /// Id of the most recently started session
    pub generation: u64,
    pub last_backend: Option<CapabilityTier>,
    pub last_report: Option<TransmissionReport>,
}

/// Owns the device state and at most one transmission worker
pub struct TransmitController {
    config: SystemConfig,
    inner: Arc<Mutex<ControllerInner>>,
    /// Backends in tier preference order
    backends: Vec<Arc<dyn TransmitBackend>>,
    capability: CapabilityReport,
    library: Option<Arc<NativeLibrary>>,
    shut_down: AtomicBool,
}

impl TransmitController {
    /// Detect capabilities and build the real backends. Never fails on missing hardware.
    pub fn new(config: SystemConfig) -> Self {
        let (capability, library) = CapabilityDetector::new(&config.device).detect();
        let encoder = SignalEncoder::new(config.device.temp_dir.clone());
        let probe_timeout = Duration::from_secs_f64(config.device.probe_timeout_secs.clamp(0.0, 5.0));

        let native: Option<Arc<dyn NativeTransfer>> = library
            .clone()
            .map(|lib| -> Arc<dyn NativeTransfer> { lib });
        let backends: Vec<Arc<dyn TransmitBackend>> = vec![
            Arc::new(NativeBackend::new(native, encoder.clone(), config.transmit.clone())),
            Arc::new(CliBackend::new(
                config.device.transfer_tool.clone(),
                encoder,
                config.transmit.clone(),
                probe_timeout,
                capability.cli_available,
            )),
            Arc::new(SimulationBackend::new(config.transmit.poll_interval())),
        ];
        info!("Transmit controller ready, best tier: {}", capability.best_tier);
        Self::assemble(config, capability, backends, library)
    }

    /// Controller over caller-supplied backends, skipping detection
    pub fn with_backends(
        config: SystemConfig,
        capability: CapabilityReport,
        backends: Vec<Arc<dyn TransmitBackend>>,
    ) -> Self {
        Self::assemble(config, capability, backends, None)
    }

    fn assemble(
        config: SystemConfig,
        capability: CapabilityReport,
        mut backends: Vec<Arc<dyn TransmitBackend>>,
        library: Option<Arc<NativeLibrary>>,
    ) -> Self {
        backends.sort_by_key(|b| b.tier());
        let inner = ControllerInner {
            device: DeviceState {
                connected: true,
                frequency_hz: DEFAULT_FREQUENCY_HZ,
                sample_rate_hz: DEFAULT_SAMPLE_RATE_HZ,
                gain_db: DEFAULT_GAIN_DB,
                transmitting: false,
            },
            phase: TransmitState::Idle,
            session: None,
            pending: None,
            generation: 0,
            last_backend: None,
            last_report: None,
        };
        Self {
            config,
            inner: Arc::new(Mutex::new(inner)),
            backends,
            capability,
            library,
            shut_down: AtomicBool::new(false),
        }
    }

    /// Backends from the detected best tier downwards
    fn chain(&self) -> Vec<Arc<dyn TransmitBackend>> {
        self.backends
            .iter()
            .filter(|b| b.tier() >= self.capability.best_tier)
            .cloned()
            .collect()
    }

    fn backend(&self, tier: CapabilityTier) -> Option<&Arc<dyn TransmitBackend>> {
        self.backends.iter().find(|b| b.tier() == tier)
    }

    /// Launch a transmission and return without waiting for it.
    ///
    /// Only invalid requests and an already active session are reported as
    /// errors; backend problems degrade to the next tier inside the worker.
    /// The signal is encoded with the controller lock released, so status
    /// queries stay responsive and `stop()` can cancel the pending launch.
    pub fn start(&self, request: TransmissionRequest) -> Result<()> {
        if self.shut_down.load(Ordering::SeqCst) {
            return Err(Error::ValidationError("Controller has been shut down".to_string()));
        }
        let natural = request.validate()?;
        let chain = self.chain();
        let Some(first) = chain.first().cloned() else {
            return Err(Error::BackendUnavailable("no transmit backends configured".to_string()));
        };

        let cancel = CancelToken::new();
        let (session_id, previous_device) = {
            let mut inner = self.inner.lock();
            if inner.phase != TransmitState::Idle || inner.session.is_some() || inner.pending.is_some() {
                return Err(Error::TransmissionActive);
            }
            let previous = inner.device.clone();
            inner.phase = TransmitState::Starting;
            inner.generation += 1;
            inner.pending = Some(cancel.clone());
            inner.device.frequency_hz = request.frequency_hz;
            inner.device.sample_rate_hz = request.sample_rate_hz;
            inner.device.gain_db = request.gain_db;
            (inner.generation, previous)
        };

        let prepared = match TilingPlan::plan(natural, request.duration, first.tier())
            .and_then(|plan| first.encode(&request.samples, &plan))
        {
            Ok(signal) => signal,
            Err(e) if e.is_caller_facing() => {
                let mut inner = self.inner.lock();
                if inner.generation == session_id && !cancel.is_cancelled() {
                    inner.pending = None;
                    inner.device = previous_device;
                    inner.phase = TransmitState::Idle;
                }
                return Err(e);
            }
            Err(e) => {
                warn!("Encoding for {} tier failed: {}", first.tier(), e);
                None
            }
        };

        let mut inner = self.inner.lock();
        if inner.generation != session_id || cancel.is_cancelled() {
            info!("Transmission {} stopped before launch", session_id);
            drop(prepared);
            return Ok(());
        }

        let active_tier = Arc::new(Mutex::new(first.tier()));
        let (done_tx, done_rx) = channel::bounded(1);
        let worker = Worker {
            session_id,
            chain,
            samples: request.samples,
            natural_duration: natural,
            requested_duration: request.duration,
            frequency_hz: request.frequency_hz,
            sample_rate_hz: request.sample_rate_hz,
            gain_db: request.gain_db,
            amp_enable: self.config.device.amp_enable,
            prepared,
            cancel: cancel.clone(),
            active_tier: Arc::clone(&active_tier),
            shared: Arc::clone(&self.inner),
            done: done_tx,
        };

        inner.pending = None;
        let handle = match std::thread::Builder::new()
            .name(format!("hackrf-tx-{}", session_id))
            .spawn(move || worker.run())
        {
            Ok(handle) => handle,
            Err(e) => {
                inner.device = previous_device;
                inner.phase = TransmitState::Idle;
                return Err(Error::RuntimeFailure(format!("Failed to spawn transmission worker: {}", e)));
            }
        };

        inner.session = Some(TransmissionSession {
            id: session_id,
            started_at: Instant::now(),
            cancel,
            active_tier,
            done: done_rx,
            handle: Some(handle),
        });
        inner.device.transmitting = true;
        inner.phase = TransmitState::Transmitting;
        info!(
            "Transmission {} started: {} Hz, {} sps, {} dB, {}",
            session_id,
            request.frequency_hz,
            request.sample_rate_hz,
            request.gain_db,
            match request.duration {
                Some(d) => format!("{:.2}s requested", d),
                None => format!("{:.2}s natural", natural),
            }
        );
        Ok(())
    }

    /// Cancel the active transmission and wait (bounded) for cleanup.
    ///
    /// Succeeds when nothing is running.
    pub fn stop(&self) -> Result<()> {
        let session = {
            let mut inner = self.inner.lock();
            if let Some(pending) = inner.pending.take() {
                pending.cancel();
                inner.phase = TransmitState::Idle;
                info!("Cancelled transmission {} before launch", inner.generation);
                return Ok(());
            }
            match inner.session.take() {
                Some(session) => {
                    inner.phase = TransmitState::Stopping;
                    session
                }
                None => {
                    debug!("Stop requested with no active transmission");
                    return Ok(());
                }
            }
        };

        let session_id = session.id;
        let tier = session.tier();
        info!(
            "Stopping transmission {} ({} tier, running {:.2}s)",
            session_id,
            tier,
            session.started_at.elapsed().as_secs_f64()
        );
        session.cancel.cancel();
        if let Some(backend) = self.backend(tier) {
            backend.abort();
        }
        let finished = session.join(self.config.transmit.join_timeout());

        let mut inner = self.inner.lock();
        if inner.generation == session_id {
            inner.device.transmitting = false;
            inner.phase = TransmitState::Idle;
        }
        if finished {
            info!("Transmission {} stopped", session_id);
        }
        Ok(())
    }

    /// Block until no session is active or `timeout` passes. True when idle.
    pub fn wait_for_completion(&self, timeout: Duration) -> bool {
        let done = {
            let inner = self.inner.lock();
            match &inner.session {
                Some(session) => session.done.clone(),
                None => return inner.phase == TransmitState::Idle,
            }
        };
        let _ = done.recv_timeout(timeout);
        !self.is_transmitting()
    }

    /// Set the center frequency used by status reporting and the next session
    pub fn set_frequency(&self, frequency_hz: u64) -> Result<()> {
        if frequency_hz == 0 {
            return Err(Error::ValidationError("Frequency must be positive".to_string()));
        }
        self.inner.lock().device.frequency_hz = frequency_hz;
        debug!("Frequency set to {} Hz", frequency_hz);
        Ok(())
    }

    /// Set the sample rate; zero is rejected
    pub fn set_sample_rate(&self, sample_rate_hz: u32) -> Result<()> {
        if sample_rate_hz == 0 {
            return Err(Error::ValidationError("Sample rate must be positive".to_string()));
        }
        self.inner.lock().device.sample_rate_hz = sample_rate_hz;
        debug!("Sample rate set to {} sps", sample_rate_hz);
        Ok(())
    }

    /// Set the TX gain, at most `MAX_TX_GAIN_DB`
    pub fn set_gain(&self, gain_db: u32) -> Result<()> {
        if gain_db > MAX_TX_GAIN_DB {
            return Err(Error::ValidationError(format!(
                "Gain {} dB exceeds the {} dB maximum", gain_db, MAX_TX_GAIN_DB
            )));
        }
        self.inner.lock().device.gain_db = gain_db;
        debug!("Gain set to {} dB", gain_db);
        Ok(())
    }

    /// Consistent snapshot of the device state
    pub fn device_state(&self) -> DeviceState {
        self.inner.lock().device.clone()
    }

    /// A worker is running
    pub fn is_transmitting(&self) -> bool {
        self.inner.lock().device.transmitting
    }

    /// Current orchestrator phase
    pub fn state(&self) -> TransmitState {
        self.inner.lock().phase
    }

    /// What detection found at construction
    pub fn capability(&self) -> &CapabilityReport {
        &self.capability
    }

    /// Report of the most recently finished session
    pub fn last_report(&self) -> Option<TransmissionReport> {
        self.inner.lock().last_report.clone()
    }

    /// Status for the API layer; never touches hardware
    pub fn get_device_info(&self) -> DeviceInfo {
        let inner = self.inner.lock();
        let device_present = self.capability.device_present();
        let info = if inner.device.transmitting {
            "Transmitting"
        } else if !device_present {
            "Simulation Mode"
        } else if self.capability.best_tier == CapabilityTier::NativeApi {
            "Hardware Connected (API)"
        } else {
            "Hardware Connected"
        };
        DeviceInfo {
            status: "connected".to_string(),
            info: info.to_string(),
            board_id: if device_present { "HackRF One" } else { "Simulation" }.to_string(),
            current_frequency: inner.device.frequency_hz,
            current_sample_rate: inner.device.sample_rate_hz,
            current_gain: inner.device.gain_db,
            transmission_active: inner.device.transmitting,
            capability: self.capability.best_tier,
            device_present,
            last_backend: inner.last_backend,
        }
    }

    /// Stop any transmission and release the native library. Runs once.
    pub fn shutdown(&self) -> Result<()> {
        if self.shut_down.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        info!("Shutting down transmit controller");
        self.stop()?;
        if let Some(library) = &self.library {
            library.exit();
        }
        Ok(())
    }
}

impl Drop for TransmitController {
    fn drop(&mut self) {
        if let Err(e) = self.shutdown() {
            warn!("Error during controller shutdown: {}", e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    fn simulation_controller() -> TransmitController {
        let mut config = SystemConfig::default();
        config.transmit.poll_interval_ms = 10;
        TransmitController::with_backends(
            config,
            CapabilityReport::simulation_only(),
            vec![Arc::new(SimulationBackend::new(Duration::from_millis(10)))],
        )
    }

    fn tone(seconds: f64) -> Vec<Complex32> {
        vec![Complex32::new(0.5, -0.5); (seconds * 1_000.0) as usize]
    }

    #[test]
    fn test_validation_rejects_bad_requests() {
        let controller = simulation_controller();
        let empty = TransmissionRequest::new(Vec::new(), 915_000_000, 1_000, 10);
        assert!(matches!(controller.start(empty), Err(Error::ValidationError(_))));

        let zero_rate = TransmissionRequest::new(tone(0.1), 915_000_000, 0, 10);
        assert!(matches!(controller.start(zero_rate), Err(Error::ValidationError(_))));

        let negative = TransmissionRequest::new(tone(0.1), 915_000_000, 1_000, 10).with_duration(-1.0);
        assert!(matches!(controller.start(negative), Err(Error::ValidationError(_))));

        let loud = TransmissionRequest::new(tone(0.1), 915_000_000, 1_000, 60);
        assert!(matches!(controller.start(loud), Err(Error::ValidationError(_))));

        assert_eq!(controller.state(), TransmitState::Idle);
        assert!(controller.last_report().is_none());
    }

    #[test]
    fn test_start_updates_device_state() {
        let controller = simulation_controller();
        let request = TransmissionRequest::new(tone(0.2), 433_920_000, 1_000, 30);
        controller.start(request).unwrap();

        let state = controller.device_state();
        assert!(state.connected);
        assert!(state.transmitting);
        assert_eq!(state.frequency_hz, 433_920_000);
        assert_eq!(state.sample_rate_hz, 1_000);
        assert_eq!(state.gain_db, 30);
        assert_eq!(controller.get_device_info().info, "Transmitting");

        assert!(controller.wait_for_completion(Duration::from_secs(5)));
        assert_eq!(controller.state(), TransmitState::Idle);
        let report = controller.last_report().unwrap();
        assert_eq!(report.outcome, SessionOutcome::Completed);
        assert_eq!(report.backend_used, Some(CapabilityTier::Simulation));
    }

    #[test]
    fn test_setters_validate() {
        let controller = simulation_controller();
        assert!(controller.set_sample_rate(0).is_err());
        assert!(controller.set_frequency(0).is_err());
        assert!(controller.set_gain(MAX_TX_GAIN_DB + 1).is_err());
        controller.set_gain(40).unwrap();
        controller.set_frequency(2_450_000_000).unwrap();
        let info = controller.get_device_info();
        assert_eq!(info.current_gain, 40);
        assert_eq!(info.current_frequency, 2_450_000_000);
        assert_eq!(info.status, "connected");
        assert_eq!(info.info, "Simulation Mode");
        assert_eq!(info.capability, CapabilityTier::Simulation);
    }

    #[test]
    fn test_rejects_durations_beyond_the_maximum() {
        let controller = simulation_controller();
        for duration in [1e20, MAX_DURATION_SECS * 2.0, f64::INFINITY] {
            let request = TransmissionRequest::new(tone(0.1), 915_000_000, 1_000, 10).with_duration(duration);
            assert!(matches!(controller.start(request), Err(Error::ValidationError(_))));
        }
        assert_eq!(controller.state(), TransmitState::Idle);

        let week = TransmissionRequest::new(tone(0.1), 915_000_000, 1_000, 10).with_duration(MAX_DURATION_SECS);
        assert!(week.validate().is_ok());
    }

    /// CLI-shaped backend whose encoding takes a while
    struct SlowEncodeBackend {
        encoder: SignalEncoder,
        delay: Duration,
        transmits: AtomicUsize,
    }

    impl TransmitBackend for SlowEncodeBackend {
        fn tier(&self) -> CapabilityTier {
            CapabilityTier::CliSubprocess
        }

        fn available(&self) -> bool {
            true
        }

        fn encode(&self, samples: &[Complex32], plan: &TilingPlan) -> Result<Option<crate::processing::EncodedSignal>> {
            std::thread::sleep(self.delay);
            self.encoder.encode(samples, CapabilityTier::CliSubprocess, plan.copies)
        }

        fn transmit(
            &self,
            job: &crate::hardware::TransmitJob,
            _signal: Option<&crate::processing::EncodedSignal>,
            cancel: &CancelToken,
        ) -> Result<crate::hardware::TransmitOutcome> {
            self.transmits.fetch_add(1, Ordering::SeqCst);
            let deadline = Instant::now() + job.effective_duration();
            if cancel.sleep_until(deadline, Duration::from_millis(10)) {
                Ok(crate::hardware::TransmitOutcome::Cancelled)
            } else {
                Ok(crate::hardware::TransmitOutcome::Completed)
            }
        }

        fn abort(&self) {}
    }

    fn slow_controller(dir: &std::path::Path) -> (TransmitController, Arc<SlowEncodeBackend>) {
        let mut config = SystemConfig::default();
        config.transmit.poll_interval_ms = 10;
        config.device.temp_dir = Some(dir.to_path_buf());
        let slow = Arc::new(SlowEncodeBackend {
            encoder: SignalEncoder::new(Some(dir.to_path_buf())),
            delay: Duration::from_millis(400),
            transmits: AtomicUsize::new(0),
        });
        let backend: Arc<dyn TransmitBackend> = slow.clone();
        let mut capability = CapabilityReport::simulation_only();
        capability.best_tier = CapabilityTier::CliSubprocess;
        let controller = TransmitController::with_backends(config, capability, vec![backend]);
        (controller, slow)
    }

    #[test]
    fn test_status_queries_do_not_wait_for_encoding() {
        let dir = tempfile::tempdir().unwrap();
        let (controller, _slow) = slow_controller(dir.path());

        std::thread::scope(|scope| {
            let starter = scope.spawn(|| {
                controller.start(TransmissionRequest::new(tone(0.1), 915_000_000, 1_000, 10).with_duration(5.0))
            });
            std::thread::sleep(Duration::from_millis(100));
            assert_eq!(controller.state(), TransmitState::Starting);

            let queried = Instant::now();
            let info = controller.get_device_info();
            assert!(queried.elapsed() < Duration::from_millis(100));
            assert!(!info.transmission_active);
            assert!(!controller.is_transmitting());

            starter.join().unwrap().unwrap();
        });
        assert!(controller.is_transmitting());
        controller.stop().unwrap();
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);
    }

    #[test]
    fn test_stop_while_starting_cancels_the_launch() {
        let dir = tempfile::tempdir().unwrap();
        let (controller, slow) = slow_controller(dir.path());

        std::thread::scope(|scope| {
            let starter = scope.spawn(|| {
                controller.start(TransmissionRequest::new(tone(0.1), 915_000_000, 1_000, 10).with_duration(5.0))
            });
            std::thread::sleep(Duration::from_millis(100));

            let stop_started = Instant::now();
            controller.stop().unwrap();
            assert!(stop_started.elapsed() < Duration::from_millis(100));
            assert_eq!(controller.state(), TransmitState::Idle);

            starter.join().unwrap().unwrap();
        });

        assert!(!controller.is_transmitting());
        assert_eq!(controller.state(), TransmitState::Idle);
        assert_eq!(slow.transmits.load(Ordering::SeqCst), 0);
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);

        controller.start(TransmissionRequest::new(tone(0.05), 915_000_000, 1_000, 10)).unwrap();
        assert!(controller.wait_for_completion(Duration::from_secs(5)));
        assert_eq!(slow.transmits.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_shutdown_is_idempotent_and_final() {
        let controller = simulation_controller();
        controller.start(TransmissionRequest::new(tone(5.0), 915_000_000, 1_000, 10)).unwrap();
        controller.shutdown().unwrap();
        controller.shutdown().unwrap();
        assert!(!controller.is_transmitting());
        let again = TransmissionRequest::new(tone(0.1), 915_000_000, 1_000, 10);
        assert!(controller.start(again).is_err());
    }
}
