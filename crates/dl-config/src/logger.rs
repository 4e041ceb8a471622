//! Typed `logger.json` configuration.
//!
//! Every field has a default, so a partial file (or none at all) yields a
//! usable configuration.

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::validate::{validate_config, ValidationError};
use dl_common::COLOR_PALETTE;

/// Root configuration document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggerConfig {
    /// Schema version of this file.
    pub schema_version: String,

    /// Snapshot persistence and eviction settings.
    pub persistence: PersistenceSettings,

    /// Live ingestion settings.
    pub ingest: IngestSettings,

    /// Spreadsheet export settings.
    pub export: ExportSettings,

    /// Series colours, cycled in creation order.
    pub palette: Vec<String>,
}

impl Default for LoggerConfig {
    fn default() -> Self {
        LoggerConfig {
            schema_version: crate::CONFIG_SCHEMA_VERSION.to_string(),
            persistence: PersistenceSettings::default(),
            ingest: IngestSettings::default(),
            export: ExportSettings::default(),
            palette: COLOR_PALETTE.iter().map(|c| c.to_string()).collect(),
        }
    }
}

/// Persistence settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PersistenceSettings {
    /// Key the snapshot is stored under.
    pub storage_key: String,

    /// Debounce window between a mutation and the flush it schedules.
    pub debounce_ms: u64,

    /// Byte quota of the storage backend.
    pub quota_bytes: u64,

    /// Fractions of the oldest data removed on successive overflow retries,
    /// at most [`MAX_EVICTION_PASSES`] of them.
    pub eviction_ratios: Vec<f64>,

    /// Usage fraction of the quota at which a storage warning is raised.
    pub warn_ratio: f64,
}

/// Upper bound on eviction retries for one save.
pub const MAX_EVICTION_PASSES: usize = 3;

impl Default for PersistenceSettings {
    fn default() -> Self {
        PersistenceSettings {
            storage_key: "loggerState.v1".to_string(),
            debounce_ms: 1200,
            quota_bytes: 5 * 1024 * 1024,
            eviction_ratios: vec![0.1, 0.2, 0.3],
            warn_ratio: 0.8,
        }
    }
}

/// Ingestion settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct IngestSettings {
    /// Name prefix of auto-created groups (`<prefix> <n>`).
    pub default_group_prefix: String,
}

impl Default for IngestSettings {
    fn default() -> Self {
        IngestSettings {
            default_group_prefix: "Group".to_string(),
        }
    }
}

/// Export settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExportSettings {
    /// Filename prefix for exports that combine several groups.
    pub combined_prefix: String,
}

impl Default for ExportSettings {
    fn default() -> Self {
        ExportSettings {
            combined_prefix: "sensor-data".to_string(),
        }
    }
}

impl LoggerConfig {
    /// Parse a configuration document from JSON text.
    pub fn from_json(json: &str) -> Result<Self, ValidationError> {
        serde_json::from_str(json).map_err(|e| ValidationError::ParseError(e.to_string()))
    }

    /// Serialize as pretty JSON.
    pub fn to_json_pretty(&self) -> Result<String, ValidationError> {
        serde_json::to_string_pretty(self).map_err(|e| ValidationError::ParseError(e.to_string()))
    }
}

/// Load and validate a configuration file, or the defaults when `path` is `None`.
pub fn load_config(path: Option<&Path>) -> Result<LoggerConfig, ValidationError> {
    let config = match path {
        Some(path) => {
            let text = std::fs::read_to_string(path)
                .map_err(|e| ValidationError::IoError(format!("{}: {}", path.display(), e)))?;
            LoggerConfig::from_json(&text)?
        }
        None => LoggerConfig::default(),
    };
    validate_config(&config)?;
    Ok(config)
}

impl From<ValidationError> for dl_common::Error {
    fn from(err: ValidationError) -> Self {
        dl_common::Error::Config(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_defaults_match_logger_behaviour() {
        let config = LoggerConfig::default();
        assert_eq!(config.persistence.storage_key, "loggerState.v1");
        assert_eq!(config.persistence.debounce_ms, 1200);
        assert_eq!(config.persistence.eviction_ratios, vec![0.1, 0.2, 0.3]);
        assert_eq!(config.palette.len(), 6);
    }

    #[test]
    fn test_partial_json_fills_defaults() {
        let config = LoggerConfig::from_json(r#"{"persistence": {"debounce_ms": 500}}"#).unwrap();
        assert_eq!(config.persistence.debounce_ms, 500);
        assert_eq!(config.persistence.quota_bytes, 5 * 1024 * 1024);
        assert_eq!(config.export.combined_prefix, "sensor-data");
    }

    #[test]
    fn test_load_config_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, r#"{{"persistence": {{"quota_bytes": 2048}}}}"#).unwrap();

        let config = load_config(Some(file.path())).unwrap();
        assert_eq!(config.persistence.quota_bytes, 2048);
    }

    #[test]
    fn test_load_config_rejects_invalid() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, r#"{{"persistence": {{"debounce_ms": 0}}}}"#).unwrap();

        assert!(load_config(Some(file.path())).is_err());
    }

    #[test]
    fn test_load_config_missing_file() {
        let err = load_config(Some(Path::new("/nonexistent/logger.json"))).unwrap_err();
        assert!(matches!(err, ValidationError::IoError(_)));
    }
}
