//! Basic baseband synthesis: tones, AM and FM

use std::f64::consts::PI;

use num_complex::Complex32;

use crate::processing::encoder::encode_cu8;

fn sample_count(duration: f64, sample_rate: u32) -> usize {
    if duration.is_finite() && duration > 0.0 {
        (duration * sample_rate as f64).round() as usize
    } else {
        0
    }
}

/// Complex exponential at `baseband_hz`; a constant carrier when zero
pub fn sine_wave(baseband_hz: f64, duration: f64, sample_rate: u32) -> Vec<Complex32> {
    let n = sample_count(duration, sample_rate);
    if baseband_hz == 0.0 {
        return vec![Complex32::new(1.0, 0.0); n];
    }
    let step = 2.0 * PI * baseband_hz / sample_rate as f64;
    (0..n)
        .map(|i| {
            let phase = step * i as f64;
            Complex32::new(phase.cos() as f32, phase.sin() as f32)
        })
        .collect()
}

/// Amplitude modulation of a baseband carrier.
///
/// Envelope is normalised so full depth still fits in [-1, 1].
pub fn am_signal(
    carrier_hz: f64,
    mod_hz: f64,
    depth: f64,
    duration: f64,
    sample_rate: u32,
) -> Vec<Complex32> {
    let n = sample_count(duration, sample_rate);
    let fs = sample_rate as f64;
    let depth = depth.clamp(0.0, 1.0);
    (0..n)
        .map(|i| {
            let t = i as f64 / fs;
            let envelope = (1.0 + depth * (2.0 * PI * mod_hz * t).sin()) / (1.0 + depth);
            let phase = 2.0 * PI * carrier_hz * t;
            Complex32::new((envelope * phase.cos()) as f32, (envelope * phase.sin()) as f32)
        })
        .collect()
}

/// Frequency modulation with modulation index `index`
pub fn fm_signal(
    carrier_hz: f64,
    mod_hz: f64,
    index: f64,
    duration: f64,
    sample_rate: u32,
) -> Vec<Complex32> {
    let n = sample_count(duration, sample_rate);
    let fs = sample_rate as f64;
    (0..n)
        .map(|i| {
            let t = i as f64 / fs;
            let phase = 2.0 * PI * carrier_hz * t + index * (2.0 * PI * mod_hz * t).sin();
            Complex32::new(phase.cos() as f32, phase.sin() as f32)
        })
        .collect()
}

/// Decode unsigned 8-bit interleaved I/Q. A trailing odd byte is dropped.
pub fn samples_from_iq_bytes(bytes: &[u8]) -> Vec<Complex32> {
    bytes
        .chunks_exact(2)
        .map(|iq| {
            Complex32::new(
                (iq[0] as f32 - 127.0) / 127.0,
                (iq[1] as f32 - 127.0) / 127.0,
            )
        })
        .collect()
}

/// Encode to unsigned 8-bit interleaved I/Q for storage
pub fn iq_bytes_from_samples(samples: &[Complex32]) -> Vec<u8> {
    encode_cu8(samples)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sine_length_and_magnitude() {
        let s = sine_wave(1_000.0, 0.01, 2_000_000);
        assert_eq!(s.len(), 20_000);
        assert!(s.iter().all(|x| (x.norm() - 1.0).abs() < 1e-4));
    }

    #[test]
    fn test_zero_frequency_is_dc() {
        let s = sine_wave(0.0, 0.001, 1_000_000);
        assert_eq!(s.len(), 1_000);
        assert!(s.iter().all(|x| *x == Complex32::new(1.0, 0.0)));
    }

    #[test]
    fn test_am_stays_in_range() {
        let s = am_signal(10_000.0, 1_000.0, 1.0, 0.01, 1_000_000);
        assert!(s.iter().all(|x| x.norm() <= 1.0 + 1e-5));
        let peak = s.iter().map(|x| x.norm()).fold(0.0f32, f32::max);
        let trough = s.iter().map(|x| x.norm()).fold(1.0f32, f32::min);
        assert!(peak > 0.99);
        assert!(trough < 0.01);
    }

    #[test]
    fn test_fm_is_constant_envelope() {
        let s = fm_signal(5_000.0, 500.0, 3.0, 0.01, 1_000_000);
        assert_eq!(s.len(), 10_000);
        assert!(s.iter().all(|x| (x.norm() - 1.0).abs() < 1e-4));
    }

    #[test]
    fn test_iq_bytes_decode() {
        let s = samples_from_iq_bytes(&[254, 0, 127, 127, 9]);
        assert_eq!(s.len(), 2);
        assert_eq!(s[0], Complex32::new(1.0, -1.0));
        assert_eq!(s[1], Complex32::new(0.0, 0.0));
    }

    #[test]
    fn test_iq_bytes_survive_requantization() {
        let bytes: Vec<u8> = (0..=255u8).collect();
        assert_eq!(iq_bytes_from_samples(&samples_from_iq_bytes(&bytes)), bytes);
    }

    #[test]
    fn test_degenerate_duration_is_empty() {
        assert!(sine_wave(1.0, -1.0, 1_000).is_empty());
        assert!(fm_signal(1.0, 1.0, 1.0, f64::NAN, 1_000).is_empty());
    }
}
