//! Transmission timing configuration

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Timing knobs for the transmission worker
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct TransmitConfig {
    /// Cancellation / completion poll granularity
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
    /// How long a freshly spawned transfer process must survive
    #[serde(default = "default_launch_check")]
    pub launch_check_secs: f64,
    /// Added to the effective duration before a hung native call is forced down
    #[serde(default = "default_grace")]
    pub safety_margin_secs: f64,
    /// Wait between terminate and kill
    #[serde(default = "default_grace")]
    pub terminate_grace_secs: f64,
    /// Bounded wait for the worker in `stop()`
    #[serde(default = "default_join_timeout")]
    pub join_timeout_secs: f64,
}

impl Default for TransmitConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: default_poll_interval_ms(),
            launch_check_secs: default_launch_check(),
            safety_margin_secs: default_grace(),
            terminate_grace_secs: default_grace(),
            join_timeout_secs: default_join_timeout(),
        }
    }
}

impl TransmitConfig {
    /// Poll step for cancellation and completion
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    /// How long a fresh child must survive
    pub fn launch_check(&self) -> Duration {
        Duration::from_secs_f64(self.launch_check_secs)
    }

    /// Slack before a hung native call is forced down
    pub fn safety_margin(&self) -> Duration {
        Duration::from_secs_f64(self.safety_margin_secs)
    }

    /// Wait between terminate and kill
    pub fn terminate_grace(&self) -> Duration {
        Duration::from_secs_f64(self.terminate_grace_secs)
    }

    /// Bound on the worker join in `stop()`
    pub fn join_timeout(&self) -> Duration {
        Duration::from_secs_f64(self.join_timeout_secs)
    }
}

fn default_poll_interval_ms() -> u64 {
    100
}

fn default_launch_check() -> f64 {
    1.0
}

fn default_grace() -> f64 {
    5.0
}

fn default_join_timeout() -> f64 {
    7.0
}
