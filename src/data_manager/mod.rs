//! Signal cache: generated waveforms keyed by their parameters

pub mod storage;

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use dashmap::DashMap;
use num_complex::Complex32;
use serde_json::json;
use tracing::{debug, info, warn};

use crate::{Result, Error};
use crate::config::CacheConfig;
use crate::processing::signals;

pub use storage::{CacheEntry, FileStorage};

/// Content key for a `(signal_type, protocol, parameters)` triple.
///
/// `serde_json::Value` objects serialize with sorted keys, so the key does
/// not depend on the order parameters were inserted in. BLAKE3 keeps keys
/// stable across builds, which matters because they name files on disk.
pub fn cache_key(signal_type: &str, protocol: &str, parameters: &serde_json::Value) -> String {
    let mut hasher = blake3::Hasher::new();
    for part in [signal_type, protocol, &parameters.to_string()] {
        hasher.update(&(part.len() as u64).to_le_bytes());
        hasher.update(part.as_bytes());
    }
    let digest = hasher.finalize().to_hex();
    let prefix: String = signal_type
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() { c.to_ascii_lowercase() } else { '_' })
        .collect();
    format!("{}_{}", prefix, &digest.as_str()[..16])
}

/// Persistent store of generated signals in unsigned 8-bit I/Q
pub struct SignalCache {
    storage: FileStorage,
    enabled: bool,
    index: DashMap<String, CacheEntry>,
}

impl SignalCache {
    /// Open the cache directory and index whatever it already holds
    pub fn new(config: &CacheConfig) -> Result<Self> {
        let storage = FileStorage::new(config.directory.clone())?;
        let index = DashMap::new();
        if config.enabled {
            for entry in storage.scan()? {
                index.insert(entry.key.clone(), entry);
            }
            info!(
                "Signal cache at {} ({} entries)",
                storage.base_path().display(),
                index.len()
            );
        } else {
            info!("Signal cache disabled, signals are regenerated on every request");
        }
        Ok(Self { storage, enabled: config.enabled, index })
    }

    /// Directory holding the cache files
    pub fn directory(&self) -> &Path {
        self.storage.base_path()
    }

    /// Whether lookups reuse stored signals
    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    /// Number of indexed entries
    pub fn len(&self) -> usize {
        self.index.len()
    }

    /// No entries indexed
    pub fn is_empty(&self) -> bool {
        self.index.is_empty()
    }

    /// Cached file for the parameters, generating and storing it on a miss.
    ///
    /// Returns the `.iq` path and its sample rate.
    pub fn get_or_generate<F>(
        &self,
        signal_type: &str,
        protocol: &str,
        parameters: serde_json::Value,
        generator: F,
    ) -> Result<(PathBuf, u32)>
    where
        F: FnOnce() -> Result<(Vec<Complex32>, u32)>,
    {
        let key = cache_key(signal_type, protocol, &parameters);

        if self.enabled {
            if let Some(entry) = self.lookup(&key)? {
                debug!("Cache hit for {} ({})", signal_type, key);
                return Ok((self.storage.iq_path(&key), entry.sample_rate));
            }
            debug!("Cache miss for {} ({})", signal_type, key);
        }

        let (samples, sample_rate) = generator()?;
        if samples.is_empty() {
            return Err(Error::CacheError(format!("Generator for {} produced no samples", signal_type)));
        }
        let path = self.storage.write_iq(&key, &signals::iq_bytes_from_samples(&samples))?;
        let entry = CacheEntry {
            key: key.clone(),
            signal_type: signal_type.to_string(),
            protocol: protocol.to_string(),
            parameters,
            sample_rate,
            num_samples: samples.len(),
            created_at: SystemTime::now()
                .duration_since(UNIX_EPOCH)
                .map(|d| d.as_secs())
                .unwrap_or(0),
        };
        self.storage.write_metadata(&entry)?;
        if self.enabled {
            self.index.insert(key, entry);
        }
        Ok((path, sample_rate))
    }

    fn lookup(&self, key: &str) -> Result<Option<CacheEntry>> {
        if let Some(entry) = self.index.get(key) {
            if self.storage.iq_path(key).is_file() {
                return Ok(Some(entry.clone()));
            }
        }
        // Stale index or a file written by another process
        self.index.remove(key);
        match self.storage.read_metadata(key)? {
            Some(entry) => {
                self.index.insert(key.to_string(), entry.clone());
                Ok(Some(entry))
            }
            None => Ok(None),
        }
    }

    /// Read a cached `.iq` file back as complex samples
    pub fn load_samples(path: &Path) -> Result<Vec<Complex32>> {
        let bytes = std::fs::read(path)?;
        Ok(signals::samples_from_iq_bytes(&bytes))
    }

    /// Remove every cached signal, returning the number of files deleted
    pub fn clear(&self) -> Result<usize> {
        let removed = self.storage.remove_all()?;
        self.index.clear();
        info!("Cleared signal cache ({} files)", removed);
        Ok(removed)
    }
}

/// Tone, AM and FM synthesis routed through the cache
pub struct SignalGenerator {
    cache: Arc<SignalCache>,
}

impl SignalGenerator {
    /// Generator writing through `cache`
    pub fn new(cache: Arc<SignalCache>) -> Self {
        Self { cache }
    }

    /// Cache backing this generator
    pub fn cache(&self) -> &Arc<SignalCache> {
        &self.cache
    }

    fn generate<F>(
        &self,
        signal_type: &str,
        parameters: serde_json::Value,
        sample_rate: u32,
        synth: F,
    ) -> Result<(Vec<Complex32>, u32)>
    where
        F: FnOnce() -> Vec<Complex32>,
    {
        if sample_rate == 0 {
            return Err(Error::ValidationError("Sample rate must be positive".to_string()));
        }
        let (path, rate) = self.cache.get_or_generate(signal_type, "raw", parameters, || {
            Ok((synth(), sample_rate))
        })?;
        let samples = SignalCache::load_samples(&path)?;
        if samples.is_empty() {
            warn!("Cached {} signal at {} is empty", signal_type, path.display());
        }
        Ok((samples, rate))
    }

    /// Baseband tone at `baseband_hz`
    pub fn sine_wave(&self, baseband_hz: f64, duration: f64, sample_rate: u32) -> Result<(Vec<Complex32>, u32)> {
        let params = json!({
            "frequency": baseband_hz,
            "duration": duration,
            "sample_rate": sample_rate,
        });
        self.generate("sine_wave", params, sample_rate, || {
            signals::sine_wave(baseband_hz, duration, sample_rate)
        })
    }

    /// Amplitude-modulated carrier, cached
    pub fn am_signal(
        &self,
        carrier_hz: f64,
        mod_hz: f64,
        depth: f64,
        duration: f64,
        sample_rate: u32,
    ) -> Result<(Vec<Complex32>, u32)> {
        let params = json!({
            "carrier_freq": carrier_hz,
            "modulation_freq": mod_hz,
            "modulation_depth": depth,
            "duration": duration,
            "sample_rate": sample_rate,
        });
        self.generate("am_signal", params, sample_rate, || {
            signals::am_signal(carrier_hz, mod_hz, depth, duration, sample_rate)
        })
    }

    /// Frequency-modulated carrier, cached
    pub fn fm_signal(
        &self,
        carrier_hz: f64,
        mod_hz: f64,
        index: f64,
        duration: f64,
        sample_rate: u32,
    ) -> Result<(Vec<Complex32>, u32)> {
        let params = json!({
            "carrier_freq": carrier_hz,
            "modulation_freq": mod_hz,
            "modulation_index": index,
            "duration": duration,
            "sample_rate": sample_rate,
        });
        self.generate("fm_signal", params, sample_rate, || {
            signals::fm_signal(carrier_hz, mod_hz, index, duration, sample_rate)
        })
    }
}
