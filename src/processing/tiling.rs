//! Looping plan for signals shorter than the requested duration

use serde::Serialize;

use crate::{Result, Error};
use crate::hardware::CapabilityTier;

/// Most buffer copies the CLI tier writes; its repeat flag covers the rest
pub const MAX_COPIES: usize = 1_000;

/// How a buffer is stretched over the requested transmission span
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct TilingPlan {
    /// Length of one pass over the buffer, in seconds
    pub natural_duration: f64,
    /// Wall-clock span the worker enforces
    pub effective_duration: f64,
    /// Requested span exceeds one pass
    pub looping: bool,
    /// Number of buffer copies concatenated before encoding
    pub copies: usize,
    /// Ask the backend to wrap around on its own
    pub repeat: bool,
}

/// Seconds covered by `num_samples` complex samples at `sample_rate_hz`
pub fn natural_duration(num_samples: usize, sample_rate_hz: u32) -> Result<f64> {
    if sample_rate_hz == 0 {
        return Err(Error::ValidationError("Sample rate must be positive".to_string()));
    }
    if num_samples == 0 {
        return Err(Error::ValidationError("Signal contains no samples".to_string()));
    }
    Ok(num_samples as f64 / sample_rate_hz as f64)
}

impl TilingPlan {
    /// Plan a transmission of `natural` seconds of signal for `requested`
    /// seconds on `tier`.
    pub fn plan(natural: f64, requested: Option<f64>, tier: CapabilityTier) -> Result<Self> {
        if !natural.is_finite() || natural <= 0.0 {
            return Err(Error::ValidationError(format!(
                "Signal duration must be positive, got {}", natural
            )));
        }
        if let Some(requested) = requested {
            if !requested.is_finite() || requested <= 0.0 {
                return Err(Error::ValidationError(format!(
                    "Requested duration must be positive, got {}", requested
                )));
            }
        }

        let effective = requested.unwrap_or(natural);
        if effective <= natural {
            return Ok(Self {
                natural_duration: natural,
                effective_duration: effective,
                looping: false,
                copies: 1,
                repeat: false,
            });
        }

        let (copies, repeat) = match tier {
            // libhackrf wraps the buffer itself
            CapabilityTier::NativeApi => (1, true),
            CapabilityTier::CliSubprocess => (Self::copies_for(natural, effective), true),
            CapabilityTier::Simulation => (1, false),
        };

        Ok(Self {
            natural_duration: natural,
            effective_duration: effective,
            looping: true,
            copies,
            repeat,
        })
    }

    /// `max(1, ceil(requested / natural))`, capped at `MAX_COPIES`
    pub fn copies_for(natural: f64, requested: f64) -> usize {
        let copies = (requested / natural).ceil();
        if copies.is_finite() && copies >= 1.0 {
            (copies.min(MAX_COPIES as f64)) as usize
        } else {
            1
        }
    }

    /// The wall clock, not the end of the data, ends the transmission
    pub fn ends_on_clock(&self) -> bool {
        self.looping || self.effective_duration < self.natural_duration
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_natural_duration() {
        assert_eq!(natural_duration(4_000_000, 2_000_000).unwrap(), 2.0);
        assert!(natural_duration(0, 2_000_000).is_err());
        assert!(natural_duration(100, 0).is_err());
    }

    #[test]
    fn test_single_shot_without_request() {
        let plan = TilingPlan::plan(2.0, None, CapabilityTier::CliSubprocess).unwrap();
        assert!(!plan.looping);
        assert_eq!(plan.copies, 1);
        assert_eq!(plan.effective_duration, 2.0);
        assert!(!plan.repeat);
    }

    #[test]
    fn test_shorter_request_truncates() {
        let plan = TilingPlan::plan(2.0, Some(0.5), CapabilityTier::NativeApi).unwrap();
        assert!(!plan.looping);
        assert_eq!(plan.copies, 1);
        assert_eq!(plan.effective_duration, 0.5);
        assert!(plan.ends_on_clock());

        let full = TilingPlan::plan(2.0, Some(2.0), CapabilityTier::NativeApi).unwrap();
        assert!(!full.ends_on_clock());
    }

    #[test]
    fn test_cli_tier_concatenates_copies() {
        let plan = TilingPlan::plan(2.0, Some(10.0), CapabilityTier::CliSubprocess).unwrap();
        assert!(plan.looping);
        assert_eq!(plan.copies, 5);
        assert_eq!(plan.effective_duration, 10.0);
        assert!(plan.ends_on_clock());
    }

    #[test]
    fn test_cli_copies_round_up() {
        for (natural, requested) in [(2.0, 10.5), (0.3, 1.0), (1.0, 1.0001), (0.25, 7.3)] {
            let plan = TilingPlan::plan(natural, Some(requested), CapabilityTier::CliSubprocess).unwrap();
            assert_eq!(plan.copies, (requested / natural).ceil() as usize);
            assert!(plan.copies as f64 * natural >= requested);
        }
    }

    #[test]
    fn test_copies_are_capped() {
        let plan = TilingPlan::plan(1e-6, Some(3_600.0), CapabilityTier::CliSubprocess).unwrap();
        assert_eq!(plan.copies, MAX_COPIES);
        assert!(plan.repeat);
        assert_eq!(TilingPlan::copies_for(1.0, f64::MAX), MAX_COPIES);
    }

    #[test]
    fn test_native_tier_uses_repeat_flag() {
        let plan = TilingPlan::plan(2.0, Some(10.0), CapabilityTier::NativeApi).unwrap();
        assert!(plan.looping);
        assert!(plan.repeat);
        assert_eq!(plan.copies, 1);
    }

    #[test]
    fn test_rejects_degenerate_durations() {
        assert!(TilingPlan::plan(0.0, Some(1.0), CapabilityTier::Simulation).is_err());
        assert!(TilingPlan::plan(1.0, Some(0.0), CapabilityTier::Simulation).is_err());
        assert!(TilingPlan::plan(1.0, Some(-3.0), CapabilityTier::Simulation).is_err());
        assert!(TilingPlan::plan(1.0, Some(f64::NAN), CapabilityTier::Simulation).is_err());
    }
}
