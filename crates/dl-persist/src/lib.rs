//! Data Logger snapshot persistence.
//!
//! This crate provides:
//! - The `StorageBackend` trait with in-memory and directory implementations
//! - `PersistenceManager`: debounced saves with bounded eviction on overflow

pub mod backend;
pub mod manager;

pub use backend::{BackendError, DirBackend, MemoryBackend, StorageBackend, StorageUsage};
pub use manager::{PersistenceManager, SaveOutcome};
