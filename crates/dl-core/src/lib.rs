//! Data Logger Core Library
//!
//! This library ties the logger crates together:
//! - Exit codes for CLI operations
//! - Structured logging setup
//! - Live data sources
//! - The `Session` that owns the store, its persistence, and the
//!   import/export guard
//!
//! The binary entry point is in `main.rs`.

pub mod exit_codes;
pub mod logging;
pub mod session;
pub mod source;

pub use session::{
    store_settings, Clock, ExportFile, ExportMode, ImportSummary, Operation, PumpSummary,
    Session, SystemClock,
};
pub use source::{LineSource, LiveDataSource};
