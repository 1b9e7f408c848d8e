//! Bookkeeping for one in-flight transmission

use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use crossbeam::channel::{Receiver, RecvTimeoutError};
use parking_lot::Mutex;
use serde::Serialize;
use tracing::warn;

use crate::hardware::{CancelToken, CapabilityTier, TransmitOutcome};

/// How a session ended
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub enum SessionOutcome {
    /// Ran for its effective duration
    Completed,
    /// Ended by `stop()`
    Cancelled,
    /// Safety timeout had to force the backend down
    ForceStopped,
    /// No tier could finish the transmission
    Failed(String),
}

impl From<TransmitOutcome> for SessionOutcome {
    fn from(outcome: TransmitOutcome) -> Self {
        match outcome {
            TransmitOutcome::Completed => SessionOutcome::Completed,
            TransmitOutcome::Cancelled => SessionOutcome::Cancelled,
            TransmitOutcome::ForceStopped => SessionOutcome::ForceStopped,
        }
    }
}

/// Summary left behind by a finished session
#[derive(Debug, Clone, Serialize)]
pub struct TransmissionReport {
    /// Controller generation that ran the session
    pub session_id: u64,
    /// Tier that ran the transmission, `None` when every tier failed
    pub backend_used: Option<CapabilityTier>,
    /// Every tier tried, in order
    pub tiers_attempted: Vec<CapabilityTier>,
    /// How it ended
    pub outcome: SessionOutcome,
    /// Wall time from worker start to cleanup
    pub elapsed: Duration,
    /// Span the worker enforced, in seconds
    pub effective_duration: f64,
    /// Signal copies written by the tier that ran
    pub copies: usize,
}

/// Controller-side handle on a running worker
pub(crate) struct TransmissionSession {
    pub id: u64,
    pub started_at: Instant,
    pub cancel: CancelToken,
    /// Tier the worker is currently driving; moves as it falls back
    pub active_tier: Arc<Mutex<CapabilityTier>>,
    pub done: Receiver<()>,
    pub handle: Option<JoinHandle<()>>,
}

impl TransmissionSession {
    pub fn tier(&self) -> CapabilityTier {
        *self.active_tier.lock()
    }

    /// Wait for the worker to finish its cleanup, at most `timeout`.
    ///
    /// Returns false when the worker is still running; it is then detached.
    pub fn join(mut self, timeout: Duration) -> bool {
        let finished = match self.done.recv_timeout(timeout) {
            Ok(()) | Err(RecvTimeoutError::Disconnected) => true,
            Err(RecvTimeoutError::Timeout) => false,
        };
        if let Some(handle) = self.handle.take() {
            if finished {
                if handle.join().is_err() {
                    warn!("Transmission worker {} panicked", self.id);
                }
            } else {
                warn!(
                    "Transmission worker {} did not finish within {:.1}s, detaching",
                    self.id,
                    timeout.as_secs_f64()
                );
            }
        }
        finished
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crossbeam::channel;

    fn session(done: Receiver<()>, handle: JoinHandle<()>) -> TransmissionSession {
        TransmissionSession {
            id: 7,
            started_at: Instant::now(),
            cancel: CancelToken::new(),
            active_tier: Arc::new(Mutex::new(CapabilityTier::Simulation)),
            done,
            handle: Some(handle),
        }
    }

    #[test]
    fn test_join_waits_for_done_signal() {
        let (tx, rx) = channel::bounded(1);
        let handle = std::thread::spawn(move || {
            std::thread::sleep(Duration::from_millis(30));
            let _ = tx.send(());
        });
        assert!(session(rx, handle).join(Duration::from_secs(2)));
    }

    #[test]
    fn test_join_times_out_on_stuck_worker() {
        let (tx, rx) = channel::bounded::<()>(1);
        let handle = std::thread::spawn(move || {
            std::thread::sleep(Duration::from_millis(500));
            drop(tx);
        });
        let start = Instant::now();
        assert!(!session(rx, handle).join(Duration::from_millis(50)));
        assert!(start.elapsed() < Duration::from_millis(400));
    }

    #[test]
    fn test_outcome_conversion() {
        assert_eq!(SessionOutcome::from(TransmitOutcome::Cancelled), SessionOutcome::Cancelled);
        assert_eq!(SessionOutcome::from(TransmitOutcome::ForceStopped), SessionOutcome::ForceStopped);
    }
}
