//! Error types for the Data Logger.
//!
//! This module provides structured error handling with:
//! - Stable error codes for machine parsing
//! - Category classification for error grouping
//! - Stage tags for import failures, so a caller can tell which part of a
//!   file (container, relationships, shared strings, a specific sheet) broke
//!
//! # Human-Facing Output
//!
//! ```text
//! ✗ Import Failed
//!   Reason: [sheet parse (Group 1)] malformed import: header row must start with "time"
//! ```

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use thiserror::Error;

/// Result type alias for Data Logger operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Error categories for grouping related errors.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCategory {
    /// Configuration file errors.
    Config,
    /// Store invariant violations (labels, last group/series, unknown ids).
    Store,
    /// Import decoding errors (CSV, SpreadsheetML, XLSX containers).
    Import,
    /// Persistence backend errors, including quota exhaustion.
    Storage,
    /// Session orchestration errors.
    Session,
    /// File I/O and serialization errors.
    Io,
}

impl fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ErrorCategory::Config => write!(f, "config"),
            ErrorCategory::Store => write!(f, "store"),
            ErrorCategory::Import => write!(f, "import"),
            ErrorCategory::Storage => write!(f, "storage"),
            ErrorCategory::Session => write!(f, "session"),
            ErrorCategory::Io => write!(f, "io"),
        }
    }
}

/// The decode stage an import failure happened in.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "stage", content = "sheet")]
pub enum DecodeStage {
    /// Locating the EOCD record and walking the central directory.
    Container,
    /// Reading the workbook definition and its relationships part.
    WorkbookParts,
    /// Parsing the workbook's sheet list.
    Workbook,
    /// Parsing the workbook relationships.
    Relationships,
    /// Reading or parsing the shared strings table.
    SharedStrings,
    /// Loading a worksheet part from the container.
    SheetLoad(String),
    /// Turning a worksheet into a table.
    SheetParse(String),
}

impl fmt::Display for DecodeStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DecodeStage::Container => write!(f, "container"),
            DecodeStage::WorkbookParts => write!(f, "workbook parts"),
            DecodeStage::Workbook => write!(f, "workbook"),
            DecodeStage::Relationships => write!(f, "relationships"),
            DecodeStage::SharedStrings => write!(f, "shared strings"),
            DecodeStage::SheetLoad(name) => write!(f, "sheet load ({})", name),
            DecodeStage::SheetParse(name) => write!(f, "sheet parse ({})", name),
        }
    }
}

/// Unified error type for the Data Logger.
#[derive(Error, Debug)]
pub enum Error {
    // Configuration errors (10-19)
    #[error("configuration error: {0}")]
    Config(String),

    // Store errors (20-29)
    #[error("label already in use: {label}")]
    LabelCollision { label: String },

    #[error("group not found: {group_id}")]
    GroupNotFound { group_id: String },

    #[error("series not found: {series_id}")]
    SeriesNotFound { series_id: String },

    #[error("group {group_id} must keep at least one series")]
    LastSeries { group_id: String },

    #[error("the store must keep at least one group")]
    LastGroup,

    #[error("sample value is not finite")]
    NonFiniteValue,

    #[error("group name already in use: {name}")]
    GroupNameCollision { name: String },

    // Import errors (30-39)
    #[error("malformed import: {0}")]
    MalformedImport(String),

    #[error("ZIP structure error: {0}")]
    ZipStructure(String),

    #[error("unsupported compression method: {method}")]
    UnsupportedCompressionMethod { method: u16 },

    #[error("missing required part: {part}")]
    MissingRequiredPart { part: String },

    #[error("malformed relationship: {0}")]
    MalformedRelationship(String),

    #[error("[{stage}] {source}")]
    Stage {
        stage: DecodeStage,
        #[source]
        source: Box<Error>,
    },

    // Storage errors (40-49)
    #[error("storage full: snapshot of {bytes} bytes still exceeds quota after {attempts} eviction attempts")]
    StorageQuotaExceeded { attempts: u32, bytes: usize },

    #[error("storage backend error: {0}")]
    Storage(String),

    // Session errors (50-59)
    #[error("another {operation} is already in progress")]
    Busy { operation: String },

    // I/O errors (60-69)
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON serialization error: {0}")]
    Json(#[from] serde_json::Error),
}

impl Error {
    /// Wrap an error with the decode stage it happened in.
    ///
    /// An error that already carries a stage keeps its innermost tag.
    pub fn at_stage(self, stage: DecodeStage) -> Error {
        match self {
            Error::Stage { .. } => self,
            other => Error::Stage {
                stage,
                source: Box::new(other),
            },
        }
    }

    /// Returns the decode stage, if this error was tagged with one.
    pub fn stage(&self) -> Option<&DecodeStage> {
        match self {
            Error::Stage { stage, .. } => Some(stage),
            _ => None,
        }
    }

    /// Returns the innermost error, skipping stage wrappers.
    pub fn root(&self) -> &Error {
        match self {
            Error::Stage { source, .. } => source.root(),
            other => other,
        }
    }

    /// Returns the error code for this error type.
    ///
    /// Error codes are stable and grouped by category:
    /// - 10-19: Configuration errors
    /// - 20-29: Store errors
    /// - 30-39: Import errors
    /// - 40-49: Storage errors
    /// - 50-59: Session errors
    /// - 60-69: I/O errors
    pub fn code(&self) -> u32 {
        match self {
            Error::Config(_) => 10,
            Error::LabelCollision { .. } => 20,
            Error::GroupNotFound { .. } => 21,
            Error::SeriesNotFound { .. } => 22,
            Error::LastSeries { .. } => 23,
            Error::LastGroup => 24,
            Error::NonFiniteValue => 25,
            Error::GroupNameCollision { .. } => 26,
            Error::MalformedImport(_) => 30,
            Error::ZipStructure(_) => 31,
            Error::UnsupportedCompressionMethod { .. } => 32,
            Error::MissingRequiredPart { .. } => 33,
            Error::MalformedRelationship(_) => 34,
            Error::Stage { source, .. } => source.code(),
            Error::StorageQuotaExceeded { .. } => 40,
            Error::Storage(_) => 41,
            Error::Busy { .. } => 50,
            Error::Io(_) => 60,
            Error::Json(_) => 61,
        }
    }

    /// Returns the error category for grouping and filtering.
    pub fn category(&self) -> ErrorCategory {
        match self {
            Error::Config(_) => ErrorCategory::Config,

            Error::LabelCollision { .. }
            | Error::GroupNotFound { .. }
            | Error::SeriesNotFound { .. }
            | Error::LastSeries { .. }
            | Error::LastGroup
            | Error::NonFiniteValue
            | Error::GroupNameCollision { .. } => ErrorCategory::Store,

            Error::MalformedImport(_)
            | Error::ZipStructure(_)
            | Error::UnsupportedCompressionMethod { .. }
            | Error::MissingRequiredPart { .. }
            | Error::MalformedRelationship(_)
            | Error::Stage { .. } => ErrorCategory::Import,

            Error::StorageQuotaExceeded { .. } | Error::Storage(_) => ErrorCategory::Storage,

            Error::Busy { .. } => ErrorCategory::Session,

            Error::Io(_) | Error::Json(_) => ErrorCategory::Io,
        }
    }

    /// Returns whether this error is potentially recoverable by the caller.
    pub fn is_recoverable(&self) -> bool {
        match self {
            Error::Config(_) => true,

            // Rename and retry
            Error::LabelCollision { .. } | Error::GroupNameCollision { .. } => true,
            Error::GroupNotFound { .. } | Error::SeriesNotFound { .. } => false,
            Error::LastSeries { .. } | Error::LastGroup => false,
            Error::NonFiniteValue => false,

            // A different file may import fine, this one never will
            Error::MalformedImport(_)
            | Error::ZipStructure(_)
            | Error::UnsupportedCompressionMethod { .. }
            | Error::MissingRequiredPart { .. }
            | Error::MalformedRelationship(_) => false,
            Error::Stage { source, .. } => source.is_recoverable(),

            // Export and clear old data
            Error::StorageQuotaExceeded { .. } => true,
            Error::Storage(_) => true,

            Error::Busy { .. } => true,

            Error::Io(_) => true,
            Error::Json(_) => false,
        }
    }

    /// Returns a short headline for human-readable output.
    pub fn headline(&self) -> &'static str {
        match self {
            Error::Config(_) => "Configuration Error",

            Error::LabelCollision { .. } => "Duplicate Label",
            Error::GroupNotFound { .. } => "Group Not Found",
            Error::SeriesNotFound { .. } => "Series Not Found",
            Error::LastSeries { .. } => "Cannot Remove Last Series",
            Error::LastGroup => "Cannot Remove Last Group",
            Error::NonFiniteValue => "Invalid Sample",
            Error::GroupNameCollision { .. } => "Duplicate Group Name",

            Error::MalformedImport(_)
            | Error::ZipStructure(_)
            | Error::UnsupportedCompressionMethod { .. }
            | Error::MissingRequiredPart { .. }
            | Error::MalformedRelationship(_)
            | Error::Stage { .. } => "Import Failed",

            Error::StorageQuotaExceeded { .. } => "Storage Full",
            Error::Storage(_) => "Storage Error",

            Error::Busy { .. } => "Operation In Progress",

            Error::Io(_) => "I/O Error",
            Error::Json(_) => "JSON Parse Error",
        }
    }

    /// Returns a human-readable remediation hint.
    pub fn remediation(&self) -> &'static str {
        match self {
            Error::Config(_) => "Run 'dl-core config validate' and fix the reported fields.",
            Error::LabelCollision { .. } => {
                "Pick a different label; labels are unique across all groups, ignoring case."
            }
            Error::GroupNotFound { .. } | Error::SeriesNotFound { .. } => {
                "The target was removed. Refresh the group list and retry."
            }
            Error::LastSeries { .. } | Error::LastGroup => {
                "Add another series or group before removing this one."
            }
            Error::NonFiniteValue => "Only finite numbers can be recorded.",
            Error::GroupNameCollision { .. } => {
                "Pick a different group name; names are unique, ignoring case."
            }
            Error::UnsupportedCompressionMethod { .. } => {
                "Re-save the workbook from a spreadsheet application as a standard .xlsx file."
            }
            Error::MalformedImport(_)
            | Error::ZipStructure(_)
            | Error::MissingRequiredPart { .. }
            | Error::MalformedRelationship(_)
            | Error::Stage { .. } => {
                "The file could not be read. Check that it was exported by the logger or has a 'time' header in row 2."
            }
            Error::StorageQuotaExceeded { .. } => {
                "Export the current data and start a new project to free storage."
            }
            Error::Storage(_) => "Check storage permissions and free space, then retry.",
            Error::Busy { .. } => "Wait for the running import or export to finish.",
            Error::Io(_) => "Check file paths and permissions. Retry the operation.",
            Error::Json(_) => "The saved state is not valid JSON. Reset the project.",
        }
    }
}

/// Structured error response for JSON output.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StructuredError {
    /// Stable error code.
    pub code: u32,

    /// Error category for grouping.
    pub category: ErrorCategory,

    /// Human-readable error message.
    pub message: String,

    /// Whether the error is potentially recoverable.
    pub recoverable: bool,

    /// Additional structured context (e.g., label, stage).
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub context: HashMap<String, serde_json::Value>,
}

impl From<&Error> for StructuredError {
    fn from(err: &Error) -> Self {
        let mut context = HashMap::new();

        match err {
            Error::LabelCollision { label } => {
                context.insert("label".to_string(), serde_json::json!(label));
            }
            Error::GroupNameCollision { name } => {
                context.insert("name".to_string(), serde_json::json!(name));
            }
            Error::Stage { stage, .. } => {
                context.insert("stage".to_string(), serde_json::json!(stage.to_string()));
            }
            Error::StorageQuotaExceeded { attempts, bytes } => {
                context.insert("attempts".to_string(), serde_json::json!(attempts));
                context.insert("bytes".to_string(), serde_json::json!(bytes));
            }
            Error::UnsupportedCompressionMethod { method } => {
                context.insert("method".to_string(), serde_json::json!(method));
            }
            _ => {}
        }

        StructuredError {
            code: err.code(),
            category: err.category(),
            message: err.to_string(),
            recoverable: err.is_recoverable(),
            context,
        }
    }
}

impl StructuredError {
    /// Serialize to JSON string.
    pub fn to_json(&self) -> String {
        serde_json::to_string(self).unwrap_or_else(|_| {
            format!(r#"{{"code":{},"error":"serialization_failed"}}"#, self.code)
        })
    }
}
