//! Data Logger time-series store.
//!
//! This crate provides:
//! - `TimeSeriesStore`: groups, series, samples, and global timeline alignment
//! - `IngestionParser`: text/JSON line parsing and sample routing
//! - `StateSnapshot`: the persisted JSON document and its sanitizing restore

pub mod ingest;
pub mod snapshot;
pub mod store;

pub use ingest::{parse_json, parse_line, IngestOutcome, IngestionParser, ParsedSample};
pub use snapshot::{GroupState, SeriesState, StateSnapshot};
pub use store::{
    AlignmentReport, GlobalRange, Group, GroupAlignment, Series, StoreSettings, TimeRange,
    TimeSeriesStore,
};
