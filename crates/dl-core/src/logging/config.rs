//! Logging configuration.
//!
//! Supports configuration via:
//! - Environment variables (DL_LOG, RUST_LOG, DL_LOG_FORMAT)
//! - CLI flags (--log-level, --log-format, -v, -q)

use clap::ValueEnum;

/// Log output format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, ValueEnum)]
pub enum LogFormat {
    /// Human-readable console format (default).
    #[default]
    Human,
    /// Machine-parseable JSON lines.
    #[value(alias = "json")]
    Jsonl,
}

/// Log level filter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, ValueEnum)]
pub enum LogLevel {
    Trace,
    Debug,
    #[default]
    Info,
    Warn,
    Error,
    Off,
}

impl LogLevel {
    /// Parse a bare level name, ignoring case.
    pub fn parse(value: &str) -> Option<Self> {
        <Self as ValueEnum>::from_str(value.trim(), true).ok()
    }

    /// Directive spelling understood by `EnvFilter`.
    pub fn as_str(self) -> &'static str {
        match self {
            LogLevel::Trace => "trace",
            LogLevel::Debug => "debug",
            LogLevel::Info => "info",
            LogLevel::Warn => "warn",
            LogLevel::Error => "error",
            LogLevel::Off => "off",
        }
    }
}

/// Logging configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogConfig {
    pub format: LogFormat,
    pub level: LogLevel,
    /// Whether to include timestamps in human output.
    pub timestamps: bool,
    /// Raw filter directives from `DL_LOG` / `RUST_LOG`, when they are more
    /// than a bare level (e.g. `dl_persist=trace`).
    pub directives: Option<String>,
}

impl Default for LogConfig {
    fn default() -> Self {
        LogConfig {
            format: LogFormat::Human,
            level: LogLevel::Info,
            timestamps: true,
            directives: None,
        }
    }
}

impl LogConfig {
    /// Create config from environment and CLI overrides.
    pub fn from_env(cli_level: Option<LogLevel>, cli_format: Option<LogFormat>) -> Self {
        Self::from_vars(
            std::env::var("DL_LOG").ok(),
            std::env::var("RUST_LOG").ok(),
            std::env::var("DL_LOG_FORMAT").ok(),
            cli_level,
            cli_format,
        )
    }

    fn from_vars(
        dl_log: Option<String>,
        rust_log: Option<String>,
        log_format: Option<String>,
        cli_level: Option<LogLevel>,
        cli_format: Option<LogFormat>,
    ) -> Self {
        let mut config = LogConfig::default();

        // DL_LOG takes precedence over RUST_LOG
        if let Some(val) = dl_log.or(rust_log).filter(|v| !v.trim().is_empty()) {
            match LogLevel::parse(&val) {
                Some(level) => config.level = level,
                None => config.directives = Some(val),
            }
        }

        if let Some(format) = log_format.and_then(|v| LogFormat::from_str(v.trim(), true).ok()) {
            config.format = format;
        }

        // CLI overrides take final precedence
        if let Some(level) = cli_level {
            config.level = level;
            config.directives = None;
        }
        if let Some(format) = cli_format {
            config.format = format;
        }

        config
    }

    /// Filter directives: the raw environment directives if present,
    /// otherwise `level` applied to every logger crate.
    pub fn filter_directives(&self) -> String {
        if let Some(directives) = &self.directives {
            return directives.clone();
        }
        super::LOG_TARGETS
            .iter()
            .map(|target| format!("{}={}", target, self.level.as_str()))
            .collect::<Vec<_>>()
            .join(",")
    }
}
