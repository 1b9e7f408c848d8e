//! Timing-only backend used when no hardware path works

use std::time::{Duration, Instant};

use num_complex::Complex32;
use tracing::info;

use crate::Result;
use crate::hardware::{CancelToken, CapabilityTier, TransmitBackend, TransmitJob, TransmitOutcome};
use crate::processing::{EncodedSignal, TilingPlan};

/// Sleeps for the effective duration, honouring cancellation
pub struct SimulationBackend {
    poll_interval: Duration,
}

impl SimulationBackend {
    /// Simulation sleeping in `poll_interval` steps
    pub fn new(poll_interval: Duration) -> Self {
        Self { poll_interval }
    }
}

impl TransmitBackend for SimulationBackend {
    fn tier(&self) -> CapabilityTier {
        CapabilityTier::Simulation
    }

    fn available(&self) -> bool {
        true
    }

    fn encode(&self, _samples: &[Complex32], _plan: &TilingPlan) -> Result<Option<EncodedSignal>> {
        Ok(None)
    }

    fn transmit(
        &self,
        job: &TransmitJob,
        _signal: Option<&EncodedSignal>,
        cancel: &CancelToken,
    ) -> Result<TransmitOutcome> {
        info!(
            "Simulating transmission at {} Hz for {:.2}s",
            job.frequency_hz, job.plan.effective_duration
        );
        let deadline = Instant::now() + job.effective_duration();
        if cancel.sleep_until(deadline, self.poll_interval) {
            Ok(TransmitOutcome::Cancelled)
        } else {
            Ok(TransmitOutcome::Completed)
        }
    }

    fn abort(&self) {}
}
