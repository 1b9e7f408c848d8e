//! Wire-format encoding of complex sample buffers into temp files

use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use num_complex::Complex32;
use tempfile::{Builder, TempPath};
use tracing::debug;

use crate::{Result, Error};
use crate::hardware::{CapabilityTier, SampleFormat};

/// Temporary file holding the encoded signal.
///
/// The file is removed when the value is dropped.
#[derive(Debug)]
pub struct EncodedSignal {
    path: TempPath,
    format: SampleFormat,
    num_samples: usize,
    copies: usize,
}

impl EncodedSignal {
    /// Location of the temp file
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Wire format of the file
    pub fn format(&self) -> SampleFormat {
        self.format
    }

    /// Samples on disk, all copies included
    pub fn num_samples(&self) -> usize {
        self.num_samples * self.copies
    }

    /// Buffer repetitions written
    pub fn copies(&self) -> usize {
        self.copies
    }

    /// File size in bytes
    pub fn size_bytes(&self) -> usize {
        self.num_samples() * self.format.bytes_per_sample()
    }

    /// Remove the file now and report failures instead of ignoring them
    pub fn close(self) -> Result<()> {
        self.path.close()?;
        Ok(())
    }
}

/// Quantize one component to the unsigned 8-bit range
#[inline]
pub fn quantize_u8(x: f32) -> u8 {
    (x * 127.0 + 127.0).clamp(0.0, 255.0).round() as u8
}

/// Interleaved unsigned 8-bit I/Q
pub fn encode_cu8(samples: &[Complex32]) -> Vec<u8> {
    let mut out = Vec::with_capacity(samples.len() * 2);
    for s in samples {
        out.push(quantize_u8(s.re));
        out.push(quantize_u8(s.im));
    }
    out
}

/// Interleaved 32-bit float I/Q, unscaled
pub fn encode_cf32(samples: &[Complex32]) -> &[u8] {
    bytemuck::cast_slice(samples)
}

/// Writes encoded signals into a temp directory
#[derive(Debug, Clone)]
pub struct SignalEncoder {
    temp_dir: PathBuf,
}

impl Default for SignalEncoder {
    fn default() -> Self {
        Self::new(None)
    }
}

impl SignalEncoder {
    /// Encoder writing into `temp_dir`, the system temp dir when `None`
    pub fn new(temp_dir: Option<PathBuf>) -> Self {
        Self {
            temp_dir: temp_dir.unwrap_or_else(std::env::temp_dir),
        }
    }

    /// Encode `copies` back-to-back repetitions of `samples` for `tier`.
    ///
    /// Returns `None` for tiers that never touch the filesystem.
    pub fn encode(
        &self,
        samples: &[Complex32],
        tier: CapabilityTier,
        copies: usize,
    ) -> Result<Option<EncodedSignal>> {
        let Some(format) = tier.sample_format() else {
            return Ok(None);
        };
        if samples.is_empty() {
            return Err(Error::ValidationError("Cannot encode an empty signal".to_string()));
        }
        let copies = copies.max(1);

        let encoded_cu8;
        let block: &[u8] = match format {
            SampleFormat::Cf32 => encode_cf32(samples),
            SampleFormat::Cu8 => {
                encoded_cu8 = encode_cu8(samples);
                &encoded_cu8
            }
        };

        // Dropping the builder's file on error removes the partial output
        let mut file = Builder::new()
            .prefix("hackrf_tx_")
            .suffix(format.file_suffix())
            .tempfile_in(&self.temp_dir)?;
        {
            let mut writer = BufWriter::new(file.as_file_mut());
            for _ in 0..copies {
                writer.write_all(block)?;
            }
            writer.flush()?;
        }
        file.as_file().sync_all()?;

        let path = file.into_temp_path();
        debug!(
            "Encoded {} samples x{} as {} into {:?}",
            samples.len(), copies, format.as_str(), &*path
        );

        Ok(Some(EncodedSignal {
            path,
            format,
            num_samples: samples.len(),
            copies,
        }))
    }
}

/// Read back a float32 I/Q file
pub fn read_cf32(path: &Path) -> Result<Vec<Complex32>> {
    let bytes = std::fs::read(path)?;
    if bytes.len() % SampleFormat::Cf32.bytes_per_sample() != 0 {
        return Err(Error::ValidationError(format!(
            "{:?} is not a whole number of complex64 samples", path
        )));
    }
    Ok(bytemuck::pod_collect_to_vec(&bytes))
}

/// Size of a file on disk, for logging
pub fn file_size(path: &Path) -> Result<u64> {
    Ok(File::open(path)?.metadata()?.len())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tone(n: usize) -> Vec<Complex32> {
        (0..n)
            .map(|i| Complex32::from_polar(0.9, i as f32 * 0.1))
            .collect()
    }

    #[test]
    fn test_quantize_clips_and_rounds() {
        assert_eq!(quantize_u8(0.0), 127);
        assert_eq!(quantize_u8(1.0), 254);
        assert_eq!(quantize_u8(-1.0), 0);
        assert_eq!(quantize_u8(5.0), 255);
        assert_eq!(quantize_u8(-5.0), 0);
        assert_eq!(quantize_u8(0.5), 191); // 190.5 rounds away from zero
    }

    #[test]
    fn test_cu8_interleaves_i_then_q() {
        let bytes = encode_cu8(&[Complex32::new(1.0, -1.0), Complex32::new(0.0, 0.0)]);
        assert_eq!(bytes, vec![254, 0, 127, 127]);
    }

    #[test]
    fn test_native_file_is_unscaled_float() {
        let dir = tempfile::tempdir().unwrap();
        let encoder = SignalEncoder::new(Some(dir.path().to_path_buf()));
        let samples = vec![Complex32::new(1.5, -0.25), Complex32::new(0.0, 2.0)];

        let signal = encoder.encode(&samples, CapabilityTier::NativeApi, 1).unwrap().unwrap();
        assert_eq!(signal.format(), SampleFormat::Cf32);
        assert_eq!(file_size(signal.path()).unwrap(), 16);
        assert_eq!(read_cf32(signal.path()).unwrap(), samples);
    }

    #[test]
    fn test_cli_file_holds_all_copies() {
        let dir = tempfile::tempdir().unwrap();
        let encoder = SignalEncoder::new(Some(dir.path().to_path_buf()));
        let samples = tone(100);

        let signal = encoder.encode(&samples, CapabilityTier::CliSubprocess, 5).unwrap().unwrap();
        let bytes = std::fs::read(signal.path()).unwrap();
        assert_eq!(bytes.len(), 100 * 2 * 5);
        assert_eq!(signal.size_bytes(), bytes.len());
        assert_eq!(&bytes[..200], &bytes[800..]);
    }

    #[test]
    fn test_simulation_never_writes() {
        let dir = tempfile::tempdir().unwrap();
        let encoder = SignalEncoder::new(Some(dir.path().to_path_buf()));
        assert!(encoder.encode(&tone(10), CapabilityTier::Simulation, 1).unwrap().is_none());
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);
    }

    #[test]
    fn test_empty_signal_leaves_nothing_behind() {
        let dir = tempfile::tempdir().unwrap();
        let encoder = SignalEncoder::new(Some(dir.path().to_path_buf()));
        let result = encoder.encode(&[], CapabilityTier::CliSubprocess, 1);
        assert!(matches!(result, Err(Error::ValidationError(_))));
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);
    }

    #[test]
    fn test_drop_removes_file() {
        let dir = tempfile::tempdir().unwrap();
        let encoder = SignalEncoder::new(Some(dir.path().to_path_buf()));
        let signal = encoder.encode(&tone(10), CapabilityTier::CliSubprocess, 1).unwrap().unwrap();
        let path = signal.path().to_path_buf();
        assert!(path.exists());
        drop(signal);
        assert!(!path.exists());
    }
}
