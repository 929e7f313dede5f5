use crate::errors::types::{Error, Result};
use serde::Deserialize;
use std::str::FromStr;
use tracing::Level;
use tracing_subscriber::fmt::format::FmtSpan;
use tracing_subscriber::{fmt, EnvFilter};

/// Configuration for the logging system
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// The log level to use ("trace", "debug", "info", "warn", "error")
    pub level: String,
    /// Whether to enable JSON formatting
    pub json: bool,
    /// Whether to include file and line information
    pub file_info: bool,
    /// Whether to log span open/close events
    pub log_spans: bool,
    /// Application name to include in the welcome line
    pub app_name: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        LoggingConfig {
            level: "info".to_string(),
            json: false,
            file_info: false,
            log_spans: false,
            app_name: "devassoc".to_string(),
        }
    }
}

impl LoggingConfig {
    /// Create a new logging configuration
    pub fn new(level: impl Into<String>, app_name: impl Into<String>) -> Self {
        LoggingConfig {
            level: level.into(),
            app_name: app_name.into(),
            ..Default::default()
        }
    }

    /// Enable JSON formatting
    pub fn with_json(mut self) -> Self {
        self.json = true;
        self
    }

    /// Enable file and line information in logs
    pub fn with_file_info(mut self) -> Self {
        self.file_info = true;
        self
    }

    /// Enable span logging
    pub fn with_spans(mut self) -> Self {
        self.log_spans = true;
        self
    }
}

fn build_filter(level: Level) -> EnvFilter {
    EnvFilter::from_default_env().add_directive(level.into())
}

/// Set up the global logging system with the provided configuration.
///
/// Fails if a global subscriber is already installed.
pub fn setup_logging(config: &LoggingConfig) -> Result<()> {
    let level = parse_log_level(&config.level)?;

    let span_events = if config.log_spans {
        FmtSpan::ACTIVE
    } else {
        FmtSpan::NONE
    };

    let subscriber = fmt::Subscriber::builder()
        .with_env_filter(build_filter(level))
        .with_span_events(span_events)
        .with_file(config.file_info)
        .with_line_number(config.file_info);

    let installed = if config.json {
        subscriber.with_writer(std::io::stdout).json().try_init()
    } else {
        subscriber.try_init()
    };

    installed.map_err(|e| Error::Logging(e.to_string()))?;
    log_welcome(&config.app_name, env!("CARGO_PKG_VERSION"));
    Ok(())
}

/// Install a test-friendly subscriber; repeated calls are no-ops.
pub fn try_setup_test_logging() {
    let _ = fmt::Subscriber::builder()
        .with_env_filter(build_filter(Level::DEBUG))
        .with_test_writer()
        .try_init();
}

/// Parse a log level from a string
pub fn parse_log_level(level: &str) -> Result<Level> {
    Level::from_str(level).map_err(|_| Error::Config(format!("Invalid log level: {}", level)))
}

/// Log a welcome message with version info
pub fn log_welcome(app_name: &str, version: &str) {
    tracing::info!("Starting {} v{}", app_name, version);
}
