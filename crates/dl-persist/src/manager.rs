//! Debounced snapshot persistence with bounded eviction.
//!
//! Mutations call [`PersistenceManager::mark_dirty`]; the first one in a
//! quiet period schedules a flush `debounce_ms` later and later ones
//! coalesce into it. The snapshot is taken when the flush runs, so it always
//! reflects the latest state.
//!
//! When the backend reports a full quota, the oldest data is trimmed at
//! each configured ratio in turn (0.1, 0.2, 0.3 by default) and the save
//! retried. A trim that removes nothing ends the retries early.

use std::time::{Duration, Instant};

use serde::Serialize;
use tracing::{debug, info, warn};

use dl_common::{Error, Result};
use dl_config::{PersistenceSettings, MAX_EVICTION_PASSES};
use dl_store::{StateSnapshot, TimeSeriesStore};

use crate::backend::{BackendError, StorageBackend, StorageUsage};

/// Usage must fall this far below the warning ratio before a new warning.
const WARN_REARM_MARGIN: f64 = 0.1;

/// Result of a successful save.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SaveOutcome {
    /// Size of the stored document.
    pub bytes: usize,
    /// Eviction passes needed before the write fit.
    pub attempts: u32,
    /// Samples evicted to make it fit.
    pub trimmed_points: usize,
}

/// Owns the backend and the debounce state.
#[derive(Debug)]
pub struct PersistenceManager<B: StorageBackend> {
    backend: B,
    settings: PersistenceSettings,
    pending: bool,
    deadline: Option<Instant>,
    warned: bool,
}

impl<B: StorageBackend> PersistenceManager<B> {
    pub fn new(backend: B, settings: PersistenceSettings) -> Self {
        PersistenceManager {
            backend,
            settings,
            pending: false,
            deadline: None,
            warned: false,
        }
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    pub fn backend_mut(&mut self) -> &mut B {
        &mut self.backend
    }

    pub fn settings(&self) -> &PersistenceSettings {
        &self.settings
    }

    /// Whether a mutation is waiting to be saved.
    pub fn is_pending(&self) -> bool {
        self.pending
    }

    /// When the scheduled flush is due, if one is scheduled.
    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    fn debounce(&self) -> Duration {
        Duration::from_millis(self.settings.debounce_ms)
    }

    /// Record a mutation; schedules a flush unless one is already scheduled.
    pub fn mark_dirty(&mut self, now: Instant) {
        self.pending = true;
        if self.deadline.is_none() {
            self.deadline = Some(now + self.debounce());
        }
    }

    /// Run the scheduled flush if it is due.
    pub fn poll(&mut self, now: Instant, store: &mut TimeSeriesStore) -> Result<Option<SaveOutcome>> {
        match self.deadline {
            Some(deadline) if now >= deadline => {
                self.deadline = None;
                self.take_pending(store)
            }
            _ => Ok(None),
        }
    }

    /// Save now if anything is pending, cancelling the scheduled flush.
    pub fn flush_now(&mut self, store: &mut TimeSeriesStore) -> Result<Option<SaveOutcome>> {
        self.deadline = None;
        self.take_pending(store)
    }

    fn take_pending(&mut self, store: &mut TimeSeriesStore) -> Result<Option<SaveOutcome>> {
        if !self.pending {
            return Ok(None);
        }
        self.pending = false;
        self.save(store).map(Some)
    }

    /// Serialize the store and write it, evicting old data on overflow.
    ///
    /// Fails with `StorageQuotaExceeded` when every eviction pass still
    /// leaves the document too large. Nothing partial is ever written.
    pub fn save(&mut self, store: &mut TimeSeriesStore) -> Result<SaveOutcome> {
        let key = self.settings.storage_key.clone();
        let mut payload = store.to_snapshot().to_json()?;

        match self.backend.set(&key, payload.as_bytes()) {
            Ok(()) => {
                debug!(key = %key, bytes = payload.len(), "state saved");
                return Ok(SaveOutcome {
                    bytes: payload.len(),
                    attempts: 0,
                    trimmed_points: 0,
                });
            }
            Err(BackendError::QuotaExceeded { projected, quota }) => {
                warn!(projected, quota, "storage quota exceeded, evicting oldest data");
            }
            Err(e) => return Err(e.into()),
        }

        let mut attempts = 0;
        let mut trimmed_points = 0;
        for &ratio in self.settings.eviction_ratios.iter().take(MAX_EVICTION_PASSES) {
            let removed = store.trim_oldest(ratio);
            if removed == 0 {
                break;
            }
            attempts += 1;
            trimmed_points += removed;
            payload = store.to_snapshot().to_json()?;

            match self.backend.set(&key, payload.as_bytes()) {
                Ok(()) => {
                    warn!(
                        attempts,
                        trimmed_points,
                        bytes = payload.len(),
                        "oldest data removed to fit storage quota"
                    );
                    return Ok(SaveOutcome {
                        bytes: payload.len(),
                        attempts,
                        trimmed_points,
                    });
                }
                Err(e) if e.is_quota() => {
                    debug!(ratio, removed, "still over quota after eviction");
                }
                Err(e) => return Err(e.into()),
            }
        }

        warn!(attempts, bytes = payload.len(), "storage full, state not saved");
        Err(Error::StorageQuotaExceeded {
            attempts,
            bytes: payload.len(),
        })
    }

    /// Read the stored snapshot. A corrupt document counts as absent.
    pub fn load(&self) -> Result<Option<StateSnapshot>> {
        let Some(bytes) = self.backend.get(&self.settings.storage_key)? else {
            return Ok(None);
        };
        let text = String::from_utf8_lossy(&bytes);
        match StateSnapshot::from_json(&text) {
            Ok(snapshot) => {
                info!(
                    groups = snapshot.groups.len(),
                    points = snapshot.total_points(),
                    "stored state loaded"
                );
                Ok(Some(snapshot))
            }
            Err(e) => {
                warn!(error = %e, "stored state is not valid JSON, ignoring");
                Ok(None)
            }
        }
    }

    /// Delete the stored snapshot and drop any scheduled flush.
    pub fn clear(&mut self) -> Result<()> {
        self.pending = false;
        self.deadline = None;
        self.backend.remove(&self.settings.storage_key)?;
        info!(key = %self.settings.storage_key, "stored state cleared");
        Ok(())
    }

    /// Returns the usage when it first crosses the warning ratio.
    ///
    /// The warning re-arms once usage drops back below the ratio by a margin.
    pub fn usage_check(&mut self) -> Option<StorageUsage> {
        let usage = self.backend.estimate_usage()?;
        let ratio = usage.ratio()?;
        if ratio >= self.settings.warn_ratio && !self.warned {
            self.warned = true;
            warn!(
                used = usage.used,
                quota = usage.quota,
                percent = (ratio * 100.0).round() as u64,
                "storage usage is high"
            );
            return Some(usage);
        }
        if ratio < self.settings.warn_ratio - WARN_REARM_MARGIN {
            self.warned = false;
        }
        None
    }
}
