//! Configuration validation errors and semantic validation.

use thiserror::Error;

use crate::logger::{LoggerConfig, MAX_EVICTION_PASSES};

/// Validation result type.
pub type ValidationResult<T> = Result<T, ValidationError>;

/// Configuration validation errors.
#[derive(Error, Debug)]
pub enum ValidationError {
    #[error("I/O error: {0}")]
    IoError(String),

    #[error("Parse error: {0}")]
    ParseError(String),

    #[error("Invalid value for {field}: {message}")]
    InvalidValue { field: String, message: String },

    #[error("Version mismatch: expected {expected}, got {actual}")]
    VersionMismatch { expected: String, actual: String },
}

impl ValidationError {
    /// Error code for structured error reporting.
    pub fn code(&self) -> u32 {
        match self {
            ValidationError::IoError(_) => 60,
            ValidationError::ParseError(_) => 61,
            ValidationError::InvalidValue { .. } => 65,
            ValidationError::VersionMismatch { .. } => 66,
        }
    }
}

fn invalid(field: &str, message: impl Into<String>) -> ValidationError {
    ValidationError::InvalidValue {
        field: field.to_string(),
        message: message.into(),
    }
}

/// Validate a logger configuration semantically.
pub fn validate_config(config: &LoggerConfig) -> ValidationResult<()> {
    if config.schema_version != crate::CONFIG_SCHEMA_VERSION {
        return Err(ValidationError::VersionMismatch {
            expected: crate::CONFIG_SCHEMA_VERSION.to_string(),
            actual: config.schema_version.clone(),
        });
    }

    let p = &config.persistence;
    if p.storage_key.trim().is_empty() {
        return Err(invalid("persistence.storage_key", "must not be empty"));
    }
    if p.debounce_ms == 0 {
        return Err(invalid("persistence.debounce_ms", "must be positive"));
    }
    if p.quota_bytes == 0 {
        return Err(invalid("persistence.quota_bytes", "must be positive"));
    }
    if p.eviction_ratios.is_empty() {
        return Err(invalid("persistence.eviction_ratios", "must not be empty"));
    }
    if p.eviction_ratios.len() > MAX_EVICTION_PASSES {
        return Err(invalid(
            "persistence.eviction_ratios",
            format!("at most {} entries allowed", MAX_EVICTION_PASSES),
        ));
    }
    let mut previous = 0.0;
    for (i, ratio) in p.eviction_ratios.iter().enumerate() {
        if !ratio.is_finite() || *ratio <= 0.0 || *ratio > 1.0 {
            return Err(invalid(
                "persistence.eviction_ratios",
                format!("entry {} = {} is outside (0, 1]", i, ratio),
            ));
        }
        if *ratio <= previous {
            return Err(invalid(
                "persistence.eviction_ratios",
                "ratios must strictly increase",
            ));
        }
        previous = *ratio;
    }
    if !p.warn_ratio.is_finite() || p.warn_ratio <= 0.0 || p.warn_ratio > 1.0 {
        return Err(invalid("persistence.warn_ratio", "must be in (0, 1]"));
    }

    if config.ingest.default_group_prefix.trim().is_empty() {
        return Err(invalid("ingest.default_group_prefix", "must not be empty"));
    }

    if config.palette.is_empty() {
        return Err(invalid("palette", "must contain at least one colour"));
    }

    Ok(())
}
