//! Configuration resolution and path discovery.
//!
//! Resolution order: CLI argument → environment variables → XDG path → defaults.

use std::path::{Path, PathBuf};

/// Discovered configuration file path.
#[derive(Debug, Clone, Default)]
pub struct ConfigPaths {
    /// Path to logger.json (or None if not found).
    pub logger: Option<PathBuf>,

    /// Source of the logger config (for diagnostics).
    pub logger_source: ConfigSource,
}

/// Where a configuration file was found.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum ConfigSource {
    /// Explicitly provided via CLI argument.
    CliArgument,

    /// Set via environment variable.
    Environment,

    /// Found in XDG config directory.
    XdgConfig,

    /// Using built-in defaults.
    #[default]
    BuiltinDefault,
}

impl std::fmt::Display for ConfigSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigSource::CliArgument => write!(f, "CLI argument"),
            ConfigSource::Environment => write!(f, "environment variable"),
            ConfigSource::XdgConfig => write!(f, "XDG config"),
            ConfigSource::BuiltinDefault => write!(f, "builtin default"),
        }
    }
}

/// Environment variable names.
const ENV_CONFIG_PATH: &str = "DL_CONFIG";
const ENV_CONFIG_DIR: &str = "DL_CONFIG_DIR";

/// Standard config file name.
const LOGGER_FILENAME: &str = "logger.json";

/// Application name for XDG directories.
const APP_NAME: &str = "data-logger";

/// Resolve the configuration path using the standard resolution order.
///
/// 1. Explicit CLI path (if it exists)
/// 2. `DL_CONFIG` environment variable
/// 3. `DL_CONFIG_DIR` environment variable + filename
/// 4. XDG config directory (~/.config/data-logger/)
/// 5. Built-in defaults (None)
pub fn resolve_config(cli_path: Option<&Path>) -> ConfigPaths {
    let mut paths = ConfigPaths::default();
    paths.logger = resolve_single_config(cli_path, &mut paths.logger_source);
    paths
}

fn resolve_single_config(cli_path: Option<&Path>, source: &mut ConfigSource) -> Option<PathBuf> {
    if let Some(path) = cli_path {
        if path.exists() {
            *source = ConfigSource::CliArgument;
            return Some(path.to_path_buf());
        }
    }

    if let Ok(env_path) = std::env::var(ENV_CONFIG_PATH) {
        let path = PathBuf::from(env_path);
        if path.exists() {
            *source = ConfigSource::Environment;
            return Some(path);
        }
    }

    if let Ok(config_dir) = std::env::var(ENV_CONFIG_DIR) {
        let path = PathBuf::from(config_dir).join(LOGGER_FILENAME);
        if path.exists() {
            *source = ConfigSource::Environment;
            return Some(path);
        }
    }

    if let Some(dir) = xdg_config_dir() {
        let path = dir.join(LOGGER_FILENAME);
        if path.exists() {
            *source = ConfigSource::XdgConfig;
            return Some(path);
        }
    }

    *source = ConfigSource::BuiltinDefault;
    None
}

/// Get the XDG config directory for the logger.
pub fn xdg_config_dir() -> Option<PathBuf> {
    dirs::config_dir().map(|d| d.join(APP_NAME))
}

/// Default directory for persisted state.
pub fn default_data_dir() -> PathBuf {
    dirs::data_local_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(APP_NAME)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_source_display() {
        assert_eq!(format!("{}", ConfigSource::CliArgument), "CLI argument");
        assert_eq!(
            format!("{}", ConfigSource::Environment),
            "environment variable"
        );
        assert_eq!(format!("{}", ConfigSource::XdgConfig), "XDG config");
        assert_eq!(
            format!("{}", ConfigSource::BuiltinDefault),
            "builtin default"
        );
    }

    #[test]
    fn test_cli_path_wins() {
        let file = tempfile::NamedTempFile::new().unwrap();
        let paths = resolve_config(Some(file.path()));
        assert_eq!(paths.logger.as_deref(), Some(file.path()));
        assert_eq!(paths.logger_source, ConfigSource::CliArgument);
    }

    #[test]
    fn test_xdg_config_dir() {
        if let Some(path) = xdg_config_dir() {
            assert!(path.ends_with(APP_NAME));
        }
    }

    #[test]
    fn test_default_data_dir() {
        assert!(default_data_dir().ends_with(APP_NAME));
    }
}
