//! On-disk layout of the signal cache

use std::fs::{self, File, create_dir_all};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::{Result, Error};

/// File extension of cached sample data
pub const IQ_EXTENSION: &str = "iq";
/// File extension of cache metadata
pub const METADATA_EXTENSION: &str = "json";

/// Metadata stored next to every cached signal
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheEntry {
    /// Cache key, also the file stem
    pub key: String,
    /// Generator name, e.g. `sine`
    pub signal_type: String,
    /// Protocol label, `raw` for plain waveforms
    pub protocol: String,
    /// Generator parameters as canonical JSON
    pub parameters: serde_json::Value,
    /// Samples per second
    pub sample_rate: u32,
    /// Complex samples in the `.iq` file
    pub num_samples: usize,
    /// Seconds since the Unix epoch
    pub created_at: u64,
}

/// Flat directory of `<key>.iq` / `<key>.json` pairs
#[derive(Debug, Clone)]
pub struct FileStorage {
    base_path: PathBuf,
}

impl FileStorage {
    /// Create the storage, making the directory if needed
    pub fn new(base_path: PathBuf) -> Result<Self> {
        create_dir_all(&base_path).map_err(|e| {
            Error::CacheError(format!("Cannot create {}: {}", base_path.display(), e))
        })?;
        Ok(Self { base_path })
    }

    /// Directory the files live in
    pub fn base_path(&self) -> &Path {
        &self.base_path
    }

    /// Path of the sample file for `key`
    pub fn iq_path(&self, key: &str) -> PathBuf {
        self.base_path.join(format!("{}.{}", key, IQ_EXTENSION))
    }

    /// Path of the metadata file for `key`
    pub fn metadata_path(&self, key: &str) -> PathBuf {
        self.base_path.join(format!("{}.{}", key, METADATA_EXTENSION))
    }

    /// Write sample bytes, returning the data file path
    pub fn write_iq(&self, key: &str, bytes: &[u8]) -> Result<PathBuf> {
        let path = self.iq_path(key);
        let mut writer = BufWriter::new(File::create(&path)?);
        writer.write_all(bytes)?;
        writer.flush()?;
        debug!("Cached {} bytes at {}", bytes.len(), path.display());
        Ok(path)
    }

    /// Raw unsigned 8-bit I/Q for `key`
    pub fn read_iq(&self, key: &str) -> Result<Vec<u8>> {
        Ok(fs::read(self.iq_path(key))?)
    }

    /// Write the JSON sidecar for `entry`
    pub fn write_metadata(&self, entry: &CacheEntry) -> Result<()> {
        let file = File::create(self.metadata_path(&entry.key))?;
        serde_json::to_writer_pretty(BufWriter::new(file), entry)?;
        Ok(())
    }

    /// Metadata for `key`, `None` when either file of the pair is missing
    pub fn read_metadata(&self, key: &str) -> Result<Option<CacheEntry>> {
        let meta_path = self.metadata_path(key);
        if !meta_path.is_file() || !self.iq_path(key).is_file() {
            return Ok(None);
        }
        let content = fs::read_to_string(meta_path)?;
        Ok(Some(serde_json::from_str(&content)?))
    }

    /// Every readable entry in the directory. Corrupt metadata is skipped.
    pub fn scan(&self) -> Result<Vec<CacheEntry>> {
        let mut entries = Vec::new();
        for dirent in fs::read_dir(&self.base_path)? {
            let path = dirent?.path();
            if path.extension().and_then(|e| e.to_str()) != Some(METADATA_EXTENSION) {
                continue;
            }
            let Some(key) = path.file_stem().and_then(|s| s.to_str()) else {
                continue;
            };
            match self.read_metadata(key) {
                Ok(Some(entry)) => entries.push(entry),
                Ok(None) => {}
                Err(e) => warn!("Skipping cache entry {}: {}", path.display(), e),
            }
        }
        Ok(entries)
    }

    /// Delete every cache file, returning how many were removed
    pub fn remove_all(&self) -> Result<usize> {
        let mut removed = 0;
        for dirent in fs::read_dir(&self.base_path)? {
            let path = dirent?.path();
            let ext = path.extension().and_then(|e| e.to_str());
            if path.is_file() && matches!(ext, Some(IQ_EXTENSION) | Some(METADATA_EXTENSION)) {
                fs::remove_file(&path)?;
                removed += 1;
            }
        }
        Ok(removed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(key: &str) -> CacheEntry {
        CacheEntry {
            key: key.to_string(),
            signal_type: "sine".to_string(),
            protocol: "raw".to_string(),
            parameters: serde_json::json!({"frequency": 1000.0}),
            sample_rate: 2_000_000,
            num_samples: 2,
            created_at: 0,
        }
    }

    #[test]
    fn test_metadata_requires_both_files() {
        let dir = tempfile::tempdir().unwrap();
        let storage = FileStorage::new(dir.path().to_path_buf()).unwrap();
        storage.write_metadata(&entry("abc")).unwrap();
        assert!(storage.read_metadata("abc").unwrap().is_none());

        storage.write_iq("abc", &[127, 127, 254, 0]).unwrap();
        assert_eq!(storage.read_metadata("abc").unwrap(), Some(entry("abc")));
        assert_eq!(storage.read_iq("abc").unwrap(), vec![127, 127, 254, 0]);
    }

    #[test]
    fn test_scan_and_remove_all_ignore_foreign_files() {
        let dir = tempfile::tempdir().unwrap();
        let storage = FileStorage::new(dir.path().to_path_buf()).unwrap();
        storage.write_iq("one", &[0, 0]).unwrap();
        storage.write_metadata(&entry("one")).unwrap();
        fs::write(dir.path().join("broken.json"), "{not json").unwrap();
        fs::write(dir.path().join("notes.txt"), "keep me").unwrap();

        let scanned = storage.scan().unwrap();
        assert_eq!(scanned.len(), 1);
        assert_eq!(scanned[0].key, "one");

        assert_eq!(storage.remove_all().unwrap(), 3);
        assert!(dir.path().join("notes.txt").exists());
    }
}
