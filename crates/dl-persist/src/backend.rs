//! Byte-quota key/value storage backends.
//!
//! A `set` either stores the whole value or nothing: quota checks happen
//! before any byte is written, and the directory backend writes through a
//! temp file and an atomic rename.

use std::collections::BTreeMap;
use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use serde::Serialize;
use thiserror::Error;
use tracing::{debug, trace};

/// Errors from storage backends.
#[derive(Error, Debug)]
pub enum BackendError {
    #[error("quota exceeded: {projected} bytes needed, {quota} available")]
    QuotaExceeded { projected: u64, quota: u64 },

    #[error("invalid storage key: {0:?}")]
    InvalidKey(String),

    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

impl BackendError {
    pub fn is_quota(&self) -> bool {
        matches!(self, BackendError::QuotaExceeded { .. })
    }
}

impl From<BackendError> for dl_common::Error {
    fn from(err: BackendError) -> Self {
        match err {
            BackendError::Io(e) => dl_common::Error::Io(e),
            other => dl_common::Error::Storage(other.to_string()),
        }
    }
}

/// Best-effort usage estimate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct StorageUsage {
    pub used: u64,
    pub quota: u64,
}

impl StorageUsage {
    /// Fraction of the quota in use; `None` for a zero quota.
    pub fn ratio(&self) -> Option<f64> {
        (self.quota > 0).then(|| self.used as f64 / self.quota as f64)
    }
}

/// Key/value store with a byte quota.
pub trait StorageBackend {
    fn get(&self, key: &str) -> Result<Option<Vec<u8>>, BackendError>;

    /// Store `bytes` under `key`, or fail with `QuotaExceeded` leaving the
    /// previous value untouched.
    fn set(&mut self, key: &str, bytes: &[u8]) -> Result<(), BackendError>;

    fn remove(&mut self, key: &str) -> Result<(), BackendError>;

    fn estimate_usage(&self) -> Option<StorageUsage>;
}

/// In-memory backend; usage counts key and value bytes.
#[derive(Debug, Clone, Default)]
pub struct MemoryBackend {
    entries: BTreeMap<String, Vec<u8>>,
    quota: u64,
}

impl MemoryBackend {
    pub fn new(quota: u64) -> Self {
        MemoryBackend {
            entries: BTreeMap::new(),
            quota,
        }
    }

    pub fn set_quota(&mut self, quota: u64) {
        self.quota = quota;
    }

    fn used(&self) -> u64 {
        self.entries
            .iter()
            .map(|(k, v)| (k.len() + v.len()) as u64)
            .sum()
    }
}

impl StorageBackend for MemoryBackend {
    fn get(&self, key: &str) -> Result<Option<Vec<u8>>, BackendError> {
        Ok(self.entries.get(key).cloned())
    }

    fn set(&mut self, key: &str, bytes: &[u8]) -> Result<(), BackendError> {
        let existing = self
            .entries
            .get(key)
            .map(|v| (key.len() + v.len()) as u64)
            .unwrap_or(0);
        let projected = self.used() - existing + (key.len() + bytes.len()) as u64;
        if projected > self.quota {
            return Err(BackendError::QuotaExceeded {
                projected,
                quota: self.quota,
            });
        }
        self.entries.insert(key.to_string(), bytes.to_vec());
        Ok(())
    }

    fn remove(&mut self, key: &str) -> Result<(), BackendError> {
        self.entries.remove(key);
        Ok(())
    }

    fn estimate_usage(&self) -> Option<StorageUsage> {
        Some(StorageUsage {
            used: self.used(),
            quota: self.quota,
        })
    }
}

const TEMP_SUFFIX: &str = ".tmp";

/// One file per key inside a directory, quota over all stored files.
#[derive(Debug, Clone)]
pub struct DirBackend {
    dir: PathBuf,
    quota: u64,
}

impl DirBackend {
    /// Open (and create) the backing directory.
    pub fn open(dir: impl Into<PathBuf>, quota: u64) -> Result<Self, BackendError> {
        let dir = dir.into();
        fs::create_dir_all(&dir)?;
        debug!(dir = %dir.display(), quota, "directory backend opened");
        Ok(DirBackend { dir, quota })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn path_for(&self, key: &str) -> Result<PathBuf, BackendError> {
        let valid = !key.is_empty()
            && key != "."
            && key != ".."
            && !key.ends_with(TEMP_SUFFIX)
            && key
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '-' | '_'));
        if !valid {
            return Err(BackendError::InvalidKey(key.to_string()));
        }
        Ok(self.dir.join(key))
    }

    fn used(&self) -> Result<u64, BackendError> {
        let mut total = 0;
        for entry in fs::read_dir(&self.dir)? {
            let entry = entry?;
            let name = entry.file_name();
            if name.to_string_lossy().ends_with(TEMP_SUFFIX) {
                continue;
            }
            let meta = entry.metadata()?;
            if meta.is_file() {
                total += meta.len();
            }
        }
        Ok(total)
    }
}

impl StorageBackend for DirBackend {
    fn get(&self, key: &str) -> Result<Option<Vec<u8>>, BackendError> {
        let path = self.path_for(key)?;
        match fs::read(&path) {
            Ok(bytes) => Ok(Some(bytes)),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    fn set(&mut self, key: &str, bytes: &[u8]) -> Result<(), BackendError> {
        let path = self.path_for(key)?;
        let existing = match fs::metadata(&path) {
            Ok(meta) => meta.len(),
            Err(e) if e.kind() == io::ErrorKind::NotFound => 0,
            Err(e) => return Err(e.into()),
        };
        let projected = self.used()? - existing + bytes.len() as u64;
        if projected > self.quota {
            return Err(BackendError::QuotaExceeded {
                projected,
                quota: self.quota,
            });
        }

        let temp_path = self.dir.join(format!("{}{}", key, TEMP_SUFFIX));
        let mut file = fs::File::create(&temp_path)?;
        file.write_all(bytes)?;
        file.sync_all()?;
        drop(file);
        fs::rename(&temp_path, &path)?;
        trace!(key, bytes = bytes.len(), "value written");
        Ok(())
    }

    fn remove(&mut self, key: &str) -> Result<(), BackendError> {
        let path = self.path_for(key)?;
        match fs::remove_file(&path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    fn estimate_usage(&self) -> Option<StorageUsage> {
        self.used().ok().map(|used| StorageUsage {
            used,
            quota: self.quota,
        })
    }
}
