//! Logging configuration and initialization.
//!
//! # Environment Variables
//!
//! - `RUST_LOG`: standard tracing filter (e.g., `ingest_worker=debug`)
//! - `LOG_LEVEL`: default filter when `RUST_LOG` is not set
//! - `LOG_FORMAT`: output format - `pretty` (default), `compact`, or `json`
//! - `LOG_TIMESTAMPS`: timestamp format - `local` (default), `utc`, or `none`

use std::env;

use tracing_subscriber::fmt::time::{ChronoLocal, ChronoUtc};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, EnvFilter};

/// Log output format
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogFormat {
    /// Human-readable format with colors (default for terminals)
    #[default]
    Pretty,
    /// Compact single-line format
    Compact,
    /// JSON format for log aggregation
    Json,
}

impl LogFormat {
    /// Parse format from string
    pub fn parse(s: &str) -> Self {
        match s.to_lowercase().as_str() {
            "json" => LogFormat::Json,
            "compact" => LogFormat::Compact,
            _ => LogFormat::Pretty,
        }
    }
}

/// Timestamp format for log entries
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TimestampFormat {
    /// Local time with timezone (default)
    #[default]
    Local,
    /// UTC time (ISO 8601)
    Utc,
    /// No timestamps
    None,
}

impl TimestampFormat {
    /// Parse format from string
    pub fn parse(s: &str) -> Self {
        match s.to_lowercase().as_str() {
            "utc" => TimestampFormat::Utc,
            "none" | "off" => TimestampFormat::None,
            _ => TimestampFormat::Local,
        }
    }
}

/// Logging configuration
#[derive(Debug, Clone)]
pub struct LogConfig {
    /// Output format (pretty, compact, json)
    pub format: LogFormat,
    /// Timestamp format
    pub timestamps: TimestampFormat,
    /// Default log level filter
    pub default_level: String,
    /// Include source file location
    pub include_location: bool,
    /// Include target (module path)
    pub include_target: bool,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            format: LogFormat::Pretty,
            timestamps: TimestampFormat::Local,
            default_level: "info".to_string(),
            include_location: false,
            include_target: true,
        }
    }
}

impl LogConfig {
    /// Create config from environment variables
    pub fn from_env() -> Self {
        Self {
            format: env::var("LOG_FORMAT")
                .map(|s| LogFormat::parse(&s))
                .unwrap_or_default(),
            timestamps: env::var("LOG_TIMESTAMPS")
                .map(|s| TimestampFormat::parse(&s))
                .unwrap_or_default(),
            default_level: env::var("LOG_LEVEL").unwrap_or_else(|_| "info".to_string()),
            include_location: env::var("LOG_LOCATION")
                .map(|s| s == "true" || s == "1")
                .unwrap_or(false),
            include_target: true,
        }
    }

    /// Set the default log level
    pub fn with_default_level(mut self, level: impl Into<String>) -> Self {
        self.default_level = level.into();
        self
    }
}

/// Initialize logging with the given configuration
///
/// # Errors
///
/// Returns an error if a subscriber is already installed.
pub fn init_logging(config: LogConfig) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.default_level));

    if config.format == LogFormat::Json {
        let layer = fmt::layer()
            .json()
            .with_target(config.include_target)
            .with_file(config.include_location)
            .with_line_number(config.include_location)
            .with_timer(ChronoUtc::new("%Y-%m-%dT%H:%M:%S%.3fZ".to_string()));
        tracing_subscriber::registry()
            .with(env_filter)
            .with(layer)
            .try_init()?;
        return Ok(());
    }

    let compact = config.format == LogFormat::Compact;
    let layer = fmt::layer()
        .with_target(config.include_target)
        .with_file(config.include_location)
        .with_line_number(config.include_location)
        .with_ansi(atty::is(atty::Stream::Stdout));

    let registry = tracing_subscriber::registry().with(env_filter);
    match (config.timestamps, compact) {
        (TimestampFormat::Local, false) => registry
            .with(layer.with_timer(ChronoLocal::new("%Y-%m-%d %H:%M:%S%.3f %z".to_string())))
            .try_init()?,
        (TimestampFormat::Local, true) => registry
            .with(
                layer
                    .compact()
                    .with_timer(ChronoLocal::new("%Y-%m-%d %H:%M:%S%.3f %z".to_string())),
            )
            .try_init()?,
        (TimestampFormat::Utc, false) => registry
            .with(layer.with_timer(ChronoUtc::new("%Y-%m-%dT%H:%M:%S%.3fZ".to_string())))
            .try_init()?,
        (TimestampFormat::Utc, true) => registry
            .with(
                layer
                    .compact()
                    .with_timer(ChronoUtc::new("%Y-%m-%dT%H:%M:%S%.3fZ".to_string())),
            )
            .try_init()?,
        (TimestampFormat::None, false) => registry.with(layer.without_time()).try_init()?,
        (TimestampFormat::None, true) => {
            registry.with(layer.compact().without_time()).try_init()?
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_log_format_parse() {
        assert_eq!(LogFormat::parse("json"), LogFormat::Json);
        assert_eq!(LogFormat::parse("JSON"), LogFormat::Json);
        assert_eq!(LogFormat::parse("compact"), LogFormat::Compact);
        assert_eq!(LogFormat::parse("pretty"), LogFormat::Pretty);
        assert_eq!(LogFormat::parse("unknown"), LogFormat::Pretty);
    }

    #[test]
    fn test_timestamp_format_parse() {
        assert_eq!(TimestampFormat::parse("utc"), TimestampFormat::Utc);
        assert_eq!(TimestampFormat::parse("none"), TimestampFormat::None);
        assert_eq!(TimestampFormat::parse("off"), TimestampFormat::None);
        assert_eq!(TimestampFormat::parse("local"), TimestampFormat::Local);
    }

    #[test]
    fn test_log_config_default() {
        let config = LogConfig::default();
        assert_eq!(config.format, LogFormat::Pretty);
        assert_eq!(config.timestamps, TimestampFormat::Local);
        assert_eq!(config.default_level, "info");
    }

    #[test]
    fn test_log_config_builder() {
        let config = LogConfig::default().with_default_level("debug");
        assert_eq!(config.default_level, "debug");
    }
}
