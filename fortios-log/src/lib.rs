//! FortiOS Logging
//!
//! Installs a `tracing` subscriber configured from `FORTIOS_*` environment
//! variables. The client crates only emit events; call [`init`] once at
//! program start to see them.
//!
//! # Usage
//!
//! ```rust
//! fortios_log::init();
//! tracing::info!(host = "192.0.2.1", "connecting");
//! ```
//!
//! # Environment Variables
//!
//! - `FORTIOS_DEBUG=1` - Enable debug logging
//! - `FORTIOS_LOG_LEVEL=trace|debug|info|warn|error|off` - Set log level
//! - `FORTIOS_LOG_FORMAT=pretty|json|compact` - Set output format
//! - `FORTIOS_LOG_COLOR=1|0` - Enable/disable colors
//! - `FORTIOS_LOG_TIMESTAMPS=1|0` - Include timestamps
//! - `FORTIOS_LOG_TARGET=1|0` - Include the event target
//!
//! `RUST_LOG`, when set, replaces the level filter entirely.

use once_cell::sync::Lazy;
use std::env;
use std::fmt;
use std::str::FromStr;
use thiserror::Error;
use tracing::Subscriber;
use tracing_subscriber::fmt::time::{ChronoLocal, ChronoUtc};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::registry::LookupSpan;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer};

// ============================================================================
// Log Levels
// ============================================================================

/// Minimum level of emitted events.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Level {
    /// Trace level (most verbose)
    Trace,
    Debug,
    Info,
    Warn,
    /// Error level (least verbose)
    Error,
    /// Off (no logging)
    Off,
}

impl Level {
    /// Filter directive for this level.
    pub fn as_str(&self) -> &'static str {
        match self {
            Level::Trace => "trace",
            Level::Debug => "debug",
            Level::Info => "info",
            Level::Warn => "warn",
            Level::Error => "error",
            Level::Off => "off",
        }
    }
}

impl FromStr for Level {
    type Err = LogError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "trace" => Ok(Level::Trace),
            "debug" => Ok(Level::Debug),
            "info" => Ok(Level::Info),
            "warn" | "warning" => Ok(Level::Warn),
            "error" => Ok(Level::Error),
            "off" | "none" => Ok(Level::Off),
            other => Err(LogError::InvalidValue {
                name: "level",
                value: other.to_string(),
            }),
        }
    }
}

impl fmt::Display for Level {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ============================================================================
// Log Format
// ============================================================================

/// Output format for log events.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Format {
    /// Multi-line human-readable format
    Pretty,
    /// Compact single-line format
    Compact,
    /// JSON format for structured logging
    Json,
}

impl FromStr for Format {
    type Err = LogError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "pretty" => Ok(Format::Pretty),
            "compact" => Ok(Format::Compact),
            "json" => Ok(Format::Json),
            other => Err(LogError::InvalidValue {
                name: "format",
                value: other.to_string(),
            }),
        }
    }
}

// ============================================================================
// Errors
// ============================================================================

#[derive(Debug, Error)]
pub enum LogError {
    #[error("invalid log {name}: {value}")]
    InvalidValue { name: &'static str, value: String },

    #[error("a global subscriber is already installed: {0}")]
    AlreadyInitialized(String),
}

// ============================================================================
// Configuration
// ============================================================================

/// Global configuration, read from the environment on first use.
static CONFIG: Lazy<LogConfig> = Lazy::new(LogConfig::from_env);

/// Logging configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogConfig {
    /// Whether debug mode is enabled
    pub debug: bool,
    /// Minimum log level
    pub level: Level,
    /// Output format
    pub format: Format,
    /// Whether colors are enabled
    pub color: bool,
    /// Whether to include timestamps
    pub timestamps: bool,
    /// Whether to include the event target
    pub target: bool,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            debug: false,
            level: Level::Info,
            format: Format::Json,
            color: false, // JSON output doesn't use colors
            timestamps: true,
            target: true,
        }
    }
}

impl LogConfig {
    /// Create config from environment variables.
    pub fn from_env() -> Self {
        Self::from_lookup(|name| env::var(name).ok())
    }

    /// Create config from an arbitrary variable lookup. Unparseable values
    /// fall back to their defaults.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let flag = |name: &str| lookup(name).map(|v| v == "1" || v.eq_ignore_ascii_case("true"));

        let debug = flag("FORTIOS_DEBUG").unwrap_or(false);

        let level = lookup("FORTIOS_LOG_LEVEL")
            .and_then(|s| s.parse().ok())
            .unwrap_or(if debug { Level::Debug } else { Level::Info });

        let format = lookup("FORTIOS_LOG_FORMAT")
            .and_then(|s| s.parse().ok())
            .unwrap_or(Format::Json);

        let color = flag("FORTIOS_LOG_COLOR")
            .unwrap_or_else(|| format != Format::Json && lookup("NO_COLOR").is_none());

        Self {
            debug,
            level,
            format,
            color,
            timestamps: flag("FORTIOS_LOG_TIMESTAMPS").unwrap_or(true),
            target: flag("FORTIOS_LOG_TARGET").unwrap_or(true),
        }
    }

    pub fn with_level(mut self, level: Level) -> Self {
        self.level = level;
        self
    }

    pub fn with_format(mut self, format: Format) -> Self {
        self.format = format;
        self
    }

    pub fn with_color(mut self, color: bool) -> Self {
        self.color = color;
        self
    }

    /// Effective level; debug mode lowers it to at least `debug`.
    pub fn effective_level(&self) -> Level {
        if self.debug {
            self.level.min(Level::Debug)
        } else {
            self.level
        }
    }

    /// Filter for the subscriber. `RUST_LOG` wins when set and valid.
    pub fn env_filter(&self) -> EnvFilter {
        EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| EnvFilter::new(self.effective_level().as_str()))
    }

    fn fmt_layer<S>(&self) -> Box<dyn Layer<S> + Send + Sync + 'static>
    where
        S: Subscriber + for<'a> LookupSpan<'a>,
    {
        let layer = tracing_subscriber::fmt::layer()
            .with_writer(std::io::stderr)
            .with_target(self.target);

        match (self.format, self.timestamps) {
            (Format::Json, true) => layer
                .json()
                .with_ansi(false)
                .with_timer(ChronoUtc::rfc_3339())
                .boxed(),
            (Format::Json, false) => layer.json().with_ansi(false).without_time().boxed(),
            (Format::Compact, true) => layer
                .compact()
                .with_ansi(self.color)
                .with_timer(ChronoLocal::new("%H:%M:%S%.3f".to_string()))
                .boxed(),
            (Format::Compact, false) => layer
                .compact()
                .with_ansi(self.color)
                .without_time()
                .boxed(),
            (Format::Pretty, true) => layer
                .pretty()
                .with_ansi(self.color)
                .with_timer(ChronoLocal::rfc_3339())
                .boxed(),
            (Format::Pretty, false) => layer.pretty().with_ansi(self.color).without_time().boxed(),
        }
    }
}

// ============================================================================
// Public API
// ============================================================================

/// Get the global configuration.
pub fn config() -> &'static LogConfig {
    &CONFIG
}

/// Install the global subscriber from the environment configuration.
pub fn try_init() -> Result<(), LogError> {
    try_init_with(config())
}

/// Install the global subscriber from an explicit configuration.
pub fn try_init_with(config: &LogConfig) -> Result<(), LogError> {
    tracing_subscriber::registry()
        .with(config.fmt_layer())
        .with(config.env_filter())
        .try_init()
        .map_err(|e| LogError::AlreadyInitialized(e.to_string()))
}

/// Install the global subscriber, ignoring an already installed one.
pub fn init() {
    let _ = try_init();
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |name| vars.get(name).cloned()
    }

    #[test]
    fn test_level_ordering() {
        assert!(Level::Trace < Level::Debug);
        assert!(Level::Debug < Level::Info);
        assert!(Level::Info < Level::Warn);
        assert!(Level::Warn < Level::Error);
        assert!(Level::Error < Level::Off);
    }

    #[test]
    fn test_level_from_str() {
        assert_eq!("debug".parse::<Level>().unwrap(), Level::Debug);
        assert_eq!("DEBUG".parse::<Level>().unwrap(), Level::Debug);
        assert_eq!("warning".parse::<Level>().unwrap(), Level::Warn);
        assert!("invalid".parse::<Level>().is_err());
    }

    #[test]
    fn test_format_from_str() {
        assert_eq!("pretty".parse::<Format>().unwrap(), Format::Pretty);
        assert_eq!("Compact".parse::<Format>().unwrap(), Format::Compact);
        assert_eq!("json".parse::<Format>().unwrap(), Format::Json);
        assert!("xml".parse::<Format>().is_err());
    }

    #[test]
    fn test_defaults() {
        let config = LogConfig::from_lookup(lookup(&[]));
        assert_eq!(config, LogConfig::default());
        assert_eq!(config.effective_level(), Level::Info);
    }

    #[test]
    fn test_debug_flag_lowers_level() {
        let config = LogConfig::from_lookup(lookup(&[("FORTIOS_DEBUG", "1")]));
        assert!(config.debug);
        assert_eq!(config.level, Level::Debug);

        let config = LogConfig::from_lookup(lookup(&[
            ("FORTIOS_DEBUG", "true"),
            ("FORTIOS_LOG_LEVEL", "warn"),
        ]));
        assert_eq!(config.level, Level::Warn);
        assert_eq!(config.effective_level(), Level::Debug);

        let config = LogConfig::default().with_level(Level::Trace);
        assert_eq!(config.effective_level(), Level::Trace);
    }

    #[test]
    fn test_format_and_color() {
        let config = LogConfig::from_lookup(lookup(&[
            ("FORTIOS_LOG_FORMAT", "compact"),
            ("FORTIOS_LOG_TIMESTAMPS", "0"),
        ]));
        assert_eq!(config.format, Format::Compact);
        assert!(config.color);
        assert!(!config.timestamps);

        let config = LogConfig::from_lookup(lookup(&[
            ("FORTIOS_LOG_FORMAT", "pretty"),
            ("NO_COLOR", "1"),
        ]));
        assert!(!config.color);

        let config = LogConfig::from_lookup(lookup(&[("FORTIOS_LOG_COLOR", "1")]));
        assert_eq!(config.format, Format::Json);
        assert!(config.color);
    }

    #[test]
    fn test_bad_values_fall_back() {
        let config = LogConfig::from_lookup(lookup(&[
            ("FORTIOS_LOG_LEVEL", "loud"),
            ("FORTIOS_LOG_FORMAT", "xml"),
        ]));
        assert_eq!(config.level, Level::Info);
        assert_eq!(config.format, Format::Json);
    }
}
