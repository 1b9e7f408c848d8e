//! Native libhackrf transmit path

use std::sync::Arc;
use std::time::Instant;

use crossbeam::channel::{self, RecvTimeoutError};
use num_complex::Complex32;
use parking_lot::Mutex;
use tracing::{debug, info, warn};

use crate::{Result, Error};
use crate::config::TransmitConfig;
use crate::error::ChannelErrorExt;
use crate::hardware::{
    CancelToken, CapabilityTier, NativeTransfer, TransmitBackend, TransmitJob, TransmitOutcome,
};
use crate::processing::{EncodedSignal, SignalEncoder, TilingPlan};
use crate::processing::encoder::file_size;

/// Runs `NativeTransfer::transfer` on its own thread and supervises it
pub struct NativeBackend {
    library: Option<Arc<dyn NativeTransfer>>,
    encoder: SignalEncoder,
    timing: TransmitConfig,
    /// Stop flag of the transfer this backend is running
    current: Mutex<Option<CancelToken>>,
}

impl NativeBackend {
    /// Backend over `library`; unavailable when `None`
    pub fn new(
        library: Option<Arc<dyn NativeTransfer>>,
        encoder: SignalEncoder,
        timing: TransmitConfig,
    ) -> Self {
        Self { library, encoder, timing, current: Mutex::new(None) }
    }

    fn library(&self) -> Result<&Arc<dyn NativeTransfer>> {
        self.library
            .as_ref()
            .filter(|lib| lib.is_initialized())
            .ok_or_else(|| Error::BackendUnavailable("libhackrf not initialized".to_string()))
    }

    /// Raise the transfer's stop flag and give its thread a bounded chance to return
    fn force_stop(
        &self,
        library: &dyn NativeTransfer,
        stop: &CancelToken,
        done: &channel::Receiver<Result<()>>,
    ) {
        stop.cancel();
        library.stop_all();
        match done.recv_timeout(self.timing.terminate_grace()) {
            Ok(Err(e)) => debug!("Native transfer ended with {} after stop", e),
            Ok(Ok(())) | Err(RecvTimeoutError::Disconnected) => {}
            Err(RecvTimeoutError::Timeout) => {
                warn!("Native transfer did not return after stop_all");
            }
        }
    }

    fn supervise(
        &self,
        library: &dyn NativeTransfer,
        job: &TransmitJob,
        stop: &CancelToken,
        cancel: &CancelToken,
        done: &channel::Receiver<Result<()>>,
    ) -> Result<TransmitOutcome> {
        let start = Instant::now();
        let effective = job.effective_duration();
        let safety = effective + self.timing.safety_margin();
        let poll = self.timing.poll_interval();

        loop {
            match done.recv_timeout(poll) {
                Ok(result) => {
                    result?;
                    info!("Native transmission completed: {:.1}s", start.elapsed().as_secs_f64());
                    return Ok(TransmitOutcome::Completed);
                }
                Err(RecvTimeoutError::Disconnected) => {
                    return Err(Error::RuntimeFailure("native transfer thread vanished".to_string()));
                }
                Err(RecvTimeoutError::Timeout) => {}
            }

            let elapsed = start.elapsed();
            if cancel.is_cancelled() {
                info!("Stop requested during native transmission");
                self.force_stop(library, stop, done);
                return Ok(TransmitOutcome::Cancelled);
            }
            if job.plan.ends_on_clock() && elapsed >= effective {
                info!("Duration reached ({:.1}s), stopping", effective.as_secs_f64());
                self.force_stop(library, stop, done);
                return Ok(TransmitOutcome::Completed);
            }
            if elapsed > safety {
                warn!("Native transmission exceeded {:.1}s, forcing stop", safety.as_secs_f64());
                self.force_stop(library, stop, done);
                return Ok(TransmitOutcome::ForceStopped);
            }
            debug!("Native transfer running for {:.1}s", elapsed.as_secs_f64());
        }
    }
}

impl TransmitBackend for NativeBackend {
    fn tier(&self) -> CapabilityTier {
        CapabilityTier::NativeApi
    }

    fn available(&self) -> bool {
        self.library().is_ok()
    }

    fn encode(&self, samples: &[Complex32], _plan: &TilingPlan) -> Result<Option<EncodedSignal>> {
        // Looping is delegated to the repeat flag
        self.encoder.encode(samples, CapabilityTier::NativeApi, 1)
    }

    fn transmit(
        &self,
        job: &TransmitJob,
        signal: Option<&EncodedSignal>,
        cancel: &CancelToken,
    ) -> Result<TransmitOutcome> {
        let library = Arc::clone(self.library()?);
        let signal = signal.ok_or_else(|| {
            Error::LaunchFailure("native transfer needs an encoded signal".to_string())
        })?;

        // Created before the transfer thread exists so no stop request can predate it
        let stop = CancelToken::new();
        *self.current.lock() = Some(stop.clone());
        if cancel.is_cancelled() {
            self.current.lock().take();
            return Ok(TransmitOutcome::Cancelled);
        }
        info!(
            "Transmitting via libhackrf: freq={} sr={} gain={} repeat={} ({} bytes)",
            job.frequency_hz,
            job.sample_rate_hz,
            job.gain_db,
            job.plan.repeat,
            file_size(signal.path()).unwrap_or(0),
        );

        let (done_tx, done_rx) = channel::bounded::<Result<()>>(1);
        let path = signal.path().to_path_buf();
        let thread_job = job.clone();
        let thread_stop = stop.clone();
        let thread_lib = Arc::clone(&library);
        let spawned = std::thread::Builder::new()
            .name("hackrf-native-tx".to_string())
            .spawn(move || {
                let result = thread_lib.transfer(&path, &thread_job, &thread_stop);
                if let Err(e) = done_tx.send(result).map_channel_err() {
                    debug!("Native transfer finished after supervision ended: {}", e);
                }
            });

        let outcome = match spawned {
            Ok(_) => self.supervise(library.as_ref(), job, &stop, cancel, &done_rx),
            Err(e) => Err(Error::LaunchFailure(format!("native transfer thread: {}", e))),
        };
        self.current.lock().take();
        outcome
    }

    fn abort(&self) {
        if let Some(stop) = self.current.lock().as_ref() {
            stop.cancel();
        }
        if let Some(library) = &self.library {
            library.stop_all();
        }
    }
}
