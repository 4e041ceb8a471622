//! Data Logger common types, IDs, and errors.
//!
//! This crate provides foundational types shared across the logger crates:
//! - Group and series identifiers
//! - The `Sample` reading type (finite values only)
//! - Label/name normalization and sanitizing rules
//! - The series colour palette
//! - The unified error taxonomy

pub mod error;
pub mod id;
pub mod palette;
pub mod sample;
pub mod text;

pub use error::{DecodeStage, Error, ErrorCategory, Result, StructuredError};
pub use id::{GroupId, SeriesId};
pub use palette::{palette_color, COLOR_PALETTE};
pub use sample::Sample;
pub use text::{make_unique, normalize_label, parse_leading_f64, sanitize_text};

/// Version of the persisted state snapshot document.
pub const SNAPSHOT_VERSION: u32 = 1;
