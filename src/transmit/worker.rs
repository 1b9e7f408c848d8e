//! Background worker: walks the tier chain and cleans up the session

use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::time::Instant;

use crossbeam::channel::Sender;
use num_complex::Complex32;
use parking_lot::Mutex;
use tracing::{debug, error, info, warn};

use crate::Error;
use crate::error::ChannelErrorExt;
use crate::hardware::{CancelToken, CapabilityTier, TransmitBackend, TransmitJob};
use crate::processing::{EncodedSignal, TilingPlan};
use crate::transmit::{ControllerInner, TransmitState};
use crate::transmit::session::{SessionOutcome, TransmissionReport};

/// Result of walking the chain
struct Attempt {
    outcome: SessionOutcome,
    backend_used: Option<CapabilityTier>,
    plan: Option<TilingPlan>,
}

impl Attempt {
    fn ended(outcome: SessionOutcome) -> Self {
        Self { outcome, backend_used: None, plan: None }
    }
}

/// Everything one session's worker thread owns
pub(crate) struct Worker {
    pub session_id: u64,
    /// Backends to try, preferred tier first
    pub chain: Vec<Arc<dyn TransmitBackend>>,
    pub samples: Vec<Complex32>,
    pub natural_duration: f64,
    pub requested_duration: Option<f64>,
    pub frequency_hz: u64,
    pub sample_rate_hz: u32,
    pub gain_db: u32,
    pub amp_enable: bool,
    /// Signal already encoded by `start()` for the first backend
    pub prepared: Option<EncodedSignal>,
    pub cancel: CancelToken,
    pub active_tier: Arc<Mutex<CapabilityTier>>,
    pub shared: Arc<Mutex<ControllerInner>>,
    pub done: Sender<()>,
}

/// Whether a backend error should move the session to the next tier
fn should_fall_back(tier: CapabilityTier, error: &Error) -> bool {
    match tier {
        CapabilityTier::NativeApi => true,
        CapabilityTier::CliSubprocess => {
            matches!(error, Error::LaunchFailure(_) | Error::BackendUnavailable(_))
        }
        CapabilityTier::Simulation => false,
    }
}

impl Worker {
    /// Thread entry point
    pub fn run(mut self) {
        let started = Instant::now();
        let mut temp_files: Vec<EncodedSignal> = Vec::new();
        let mut attempted: Vec<CapabilityTier> = Vec::new();

        let attempt = match panic::catch_unwind(AssertUnwindSafe(|| {
            self.attempt_chain(&mut temp_files, &mut attempted)
        })) {
            Ok(attempt) => attempt,
            Err(_) => {
                error!("Transmission worker {} panicked", self.session_id);
                Attempt::ended(SessionOutcome::Failed("worker panicked".to_string()))
            }
        };

        {
            let mut inner = self.shared.lock();
            if inner.generation == self.session_id && inner.phase != TransmitState::Stopping {
                inner.phase = match attempt.outcome {
                    SessionOutcome::Failed(_) => TransmitState::Failed,
                    _ => TransmitState::Completed,
                };
            }
        }

        // Backends have returned, so no process or library call still reads these
        drop(self.prepared.take());
        for signal in temp_files {
            let path = signal.path().display().to_string();
            match signal.close() {
                Ok(()) => debug!("Removed temp file {}", path),
                Err(e) => warn!("Failed to remove temp file {}: {}", path, e),
            }
        }

        let report = TransmissionReport {
            session_id: self.session_id,
            backend_used: attempt.backend_used,
            tiers_attempted: attempted,
            outcome: attempt.outcome,
            elapsed: started.elapsed(),
            effective_duration: attempt.plan.as_ref().map_or(0.0, |p| p.effective_duration),
            copies: attempt.plan.as_ref().map_or(0, |p| p.copies),
        };
        info!(
            "Session {} finished: {:?} via {} after {:.2}s",
            report.session_id,
            report.outcome,
            report.backend_used.map_or("no backend", |t| t.as_str()),
            report.elapsed.as_secs_f64(),
        );

        {
            let mut inner = self.shared.lock();
            if inner.generation == self.session_id {
                inner.device.transmitting = false;
                inner.phase = TransmitState::Idle;
                if inner.session.as_ref().map(|s| s.id) == Some(self.session_id) {
                    // Natural completion; nobody will join this thread
                    inner.session = None;
                }
                if report.backend_used.is_some() {
                    inner.last_backend = report.backend_used;
                }
                inner.last_report = Some(report);
            } else {
                debug!("Session {} superseded, leaving controller state alone", self.session_id);
            }
        }

        // Nobody listens once `stop()` has given up on this worker
        if let Err(e) = self.done.send(()).map_channel_err() {
            debug!("Session {} done signal dropped: {}", self.session_id, e);
        }
    }

    fn attempt_chain(
        &mut self,
        temp_files: &mut Vec<EncodedSignal>,
        attempted: &mut Vec<CapabilityTier>,
    ) -> Attempt {
        let chain = self.chain.clone();
        for (position, backend) in chain.iter().enumerate() {
            let tier = backend.tier();
            if self.cancel.is_cancelled() {
                return Attempt::ended(SessionOutcome::Cancelled);
            }
            attempted.push(tier);

            if !backend.available() {
                warn!("{} tier unavailable, falling back", tier);
                continue;
            }

            let plan = match TilingPlan::plan(self.natural_duration, self.requested_duration, tier) {
                Ok(plan) => plan,
                Err(e) => return Attempt::ended(SessionOutcome::Failed(e.to_string())),
            };

            let prepared = if position == 0 { self.prepared.take() } else { None };
            let signal = match prepared {
                Some(signal) => Some(signal),
                None => match backend.encode(&self.samples, &plan) {
                    Ok(signal) => signal,
                    Err(e) => {
                        warn!("Encoding for {} tier failed: {}, falling back", tier, e);
                        continue;
                    }
                },
            };
            let signal_index = signal.map(|s| {
                temp_files.push(s);
                temp_files.len() - 1
            });

            *self.active_tier.lock() = tier;
            let job = TransmitJob {
                frequency_hz: self.frequency_hz,
                sample_rate_hz: self.sample_rate_hz,
                gain_db: self.gain_db,
                amp_enable: self.amp_enable,
                plan: plan.clone(),
            };
            info!(
                "Session {} transmitting via {} ({:.2}s, looping={}, copies={})",
                self.session_id, tier, plan.effective_duration, plan.looping, plan.copies
            );

            let signal_ref = signal_index.map(|i| &temp_files[i]);
            match backend.transmit(&job, signal_ref, &self.cancel) {
                Ok(outcome) => {
                    return Attempt {
                        outcome: outcome.into(),
                        backend_used: Some(tier),
                        plan: Some(plan),
                    };
                }
                Err(e) if should_fall_back(tier, &e) => {
                    warn!("{} tier failed: {}, falling back", tier, e);
                }
                Err(e) => {
                    error!("{} transmission failed: {}", tier, e);
                    return Attempt {
                        outcome: SessionOutcome::Failed(e.to_string()),
                        backend_used: Some(tier),
                        plan: Some(plan),
                    };
                }
            }
        }

        error!("Session {}: no capability tier could transmit", self.session_id);
        Attempt::ended(SessionOutcome::Failed("no capability tier could transmit".to_string()))
    }
}
