//! Fuzz target for restoring a persisted snapshot.
//!
//! Stored state may be hand-edited or truncated. Restore must always yield
//! a usable store with at least one group.

#![no_main]

use dl_store::{StateSnapshot, TimeSeriesStore};
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    let Ok(snapshot) = serde_json::from_slice::<StateSnapshot>(data) else {
        return;
    };
    let store = TimeSeriesStore::from_snapshot(&snapshot);
    assert!(!store.groups().is_empty());
    assert!(store.group(&store.active_group_id()).is_some());
    let _ = store.to_snapshot().to_json();
});
