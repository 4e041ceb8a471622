//! Data Logger configuration loading and validation.
//!
//! This crate provides:
//! - Typed Rust structs for `logger.json`
//! - Config resolution (CLI → env → XDG → defaults)
//! - Semantic validation

pub mod logger;
pub mod resolve;
pub mod validate;

pub use logger::{
    load_config, ExportSettings, IngestSettings, LoggerConfig, PersistenceSettings,
    MAX_EVICTION_PASSES,
};
pub use resolve::{default_data_dir, resolve_config, xdg_config_dir, ConfigPaths, ConfigSource};
pub use validate::{validate_config, ValidationError, ValidationResult};

/// Schema version for configuration files.
pub const CONFIG_SCHEMA_VERSION: &str = "1.0.0";
