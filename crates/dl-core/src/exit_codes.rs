//! Exit codes for the dl-core CLI.
//!
//! Exit code ranges:
//! - 0: Success
//! - 10-19: User/environment errors (recoverable by user action)
//! - 20-29: Internal errors (bugs, should be reported)

use dl_common::{Error, ErrorCategory};

/// Exit codes for dl-core operations.
///
/// These codes are a stable contract for scripts driving the logger.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(i32)]
pub enum ExitCode {
    /// Success
    Clean = 0,

    // ========================================================================
    // User / Environment Errors (10-19)
    // ========================================================================
    /// Invalid arguments
    ArgsError = 10,

    /// Configuration file missing, unparsable or invalid
    ConfigError = 11,

    /// Store operation rejected (unknown id, duplicate label, last group)
    StoreError = 12,

    /// Import file could not be decoded
    ImportError = 13,

    /// Storage backend failure or quota exhausted
    StorageError = 14,

    /// Another import or export is running
    BusyError = 15,

    // ========================================================================
    // Internal Errors (20-29)
    // ========================================================================
    /// Internal error (bug - please report)
    InternalError = 20,

    /// I/O error
    IoError = 21,
}

impl ExitCode {
    /// Convert to i32 for process exit.
    pub fn as_i32(self) -> i32 {
        self as i32
    }

    pub fn is_success(self) -> bool {
        self == ExitCode::Clean
    }

    /// Check if this exit code is a user/environment error (codes 10-19).
    pub fn is_user_error(self) -> bool {
        (10..20).contains(&(self as i32))
    }

    /// Check if this exit code is an internal error (codes 20-29).
    pub fn is_internal_error(self) -> bool {
        (self as i32) >= 20
    }

    /// Get the error code name as a string constant (for JSON output).
    pub fn code_name(&self) -> &'static str {
        match self {
            ExitCode::Clean => "OK_CLEAN",
            ExitCode::ArgsError => "ERR_ARGS",
            ExitCode::ConfigError => "ERR_CONFIG",
            ExitCode::StoreError => "ERR_STORE",
            ExitCode::ImportError => "ERR_IMPORT",
            ExitCode::StorageError => "ERR_STORAGE",
            ExitCode::BusyError => "ERR_BUSY",
            ExitCode::InternalError => "ERR_INTERNAL",
            ExitCode::IoError => "ERR_IO",
        }
    }
}

impl From<&Error> for ExitCode {
    fn from(err: &Error) -> Self {
        match err.category() {
            ErrorCategory::Config => ExitCode::ConfigError,
            ErrorCategory::Store => ExitCode::StoreError,
            ErrorCategory::Import => ExitCode::ImportError,
            ErrorCategory::Storage => ExitCode::StorageError,
            ErrorCategory::Session => ExitCode::BusyError,
            ErrorCategory::Io => match err {
                Error::Json(_) => ExitCode::InternalError,
                _ => ExitCode::IoError,
            },
        }
    }
}

impl From<ExitCode> for i32 {
    fn from(code: ExitCode) -> Self {
        code as i32
    }
}

impl std::fmt::Display for ExitCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} ({})", self.code_name(), self.as_i32())
    }
}
