//! Fuzz target for live line ingestion.
//!
//! Any line is accepted without panicking, and labels stay unique across
//! the store afterwards.

#![no_main]

use std::collections::HashSet;

use dl_common::normalize_label;
use dl_store::{IngestionParser, TimeSeriesStore};
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &str| {
    let mut store = TimeSeriesStore::new();
    let mut parser = IngestionParser::new();
    for (i, line) in data.lines().take(64).enumerate() {
        parser.ingest_line(&mut store, line, i as i64 * 100);
    }

    let mut seen = HashSet::new();
    for group in store.groups() {
        for series in group.series() {
            assert!(seen.insert(normalize_label(series.label())));
            assert!(series.samples().iter().all(|s| s.v.is_finite()));
        }
    }
});
