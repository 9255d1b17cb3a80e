//! Logging configuration and setup.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::fmt::{self, MakeWriter, format::FmtSpan};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer, Registry};

use crate::error::{TelemetryError, TelemetryResult};

type BoxedLayer = Box<dyn Layer<Registry> + Send + Sync>;

/// Log format options.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    /// Human-readable multi-line format with colors (default).
    #[default]
    Pretty,
    /// Compact single-line format.
    Compact,
    /// JSON lines for log shippers.
    Json,
    /// Default `tracing-subscriber` format with all fields.
    Full,
}

impl std::str::FromStr for LogFormat {
    type Err = TelemetryError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pretty" => Ok(Self::Pretty),
            "compact" => Ok(Self::Compact),
            "json" => Ok(Self::Json),
            "full" => Ok(Self::Full),
            other => Err(TelemetryError::ConfigError(format!(
                "unknown log format '{other}'"
            ))),
        }
    }
}

/// Log output target.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogTarget {
    /// Log to stdout.
    Stdout,
    /// Log to stderr.
    #[default]
    Stderr,
    /// Daily-rotated files in this directory.
    File(PathBuf),
}

/// Logging configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogConfig {
    /// Level filter (`info`, `debug`, ...).
    #[serde(default = "default_level")]
    pub level: String,
    /// Output format.
    #[serde(default)]
    pub format: LogFormat,
    /// Output target.
    #[serde(default)]
    pub target: LogTarget,
    /// File name prefix for [`LogTarget::File`].
    #[serde(default = "default_file_prefix")]
    pub file_prefix: String,
    /// Whether to use ANSI colors.
    #[serde(default = "default_true")]
    pub ansi: bool,
    /// Whether to include file/line info.
    #[serde(default)]
    pub file_info: bool,
    /// Whether to log span open/close events.
    #[serde(default)]
    pub span_events: bool,
    /// Per-target overrides, e.g. `bulwark_guard=trace`.
    #[serde(default)]
    pub directives: Vec<String>,
}

fn default_level() -> String {
    "info".to_string()
}

fn default_file_prefix() -> String {
    "bulwark".to_string()
}

fn default_true() -> bool {
    true
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: default_level(),
            format: LogFormat::default(),
            target: LogTarget::default(),
            file_prefix: default_file_prefix(),
            ansi: true,
            file_info: false,
            span_events: false,
            directives: Vec::new(),
        }
    }
}

impl LogConfig {
    /// A config at `level` with defaults otherwise.
    #[must_use]
    pub fn new(level: impl Into<String>) -> Self {
        Self {
            level: level.into(),
            ..Self::default()
        }
    }

    /// Set the format.
    #[must_use]
    pub fn with_format(mut self, format: LogFormat) -> Self {
        self.format = format;
        self
    }

    /// Set the target.
    #[must_use]
    pub fn with_target(mut self, target: LogTarget) -> Self {
        self.target = target;
        self
    }

    /// Log to daily-rotated files in `directory`. Disables colors.
    #[must_use]
    pub fn with_file_logging(mut self, directory: impl Into<PathBuf>) -> Self {
        self.target = LogTarget::File(directory.into());
        self.ansi = false;
        self
    }

    /// Add a directive override.
    #[must_use]
    pub fn with_directive(mut self, directive: impl Into<String>) -> Self {
        self.directives.push(directive.into());
        self
    }

    /// Disable ANSI colors.
    #[must_use]
    pub fn without_ansi(mut self) -> Self {
        self.ansi = false;
        self
    }

    /// Log span open/close events.
    #[must_use]
    pub fn with_span_events(mut self) -> Self {
        self.span_events = true;
        self
    }

    pub(crate) fn build_filter(&self) -> TelemetryResult<EnvFilter> {
        let mut filter = EnvFilter::try_new(&self.level)
            .map_err(|e| TelemetryError::ConfigError(e.to_string()))?;
        for directive in &self.directives {
            let directive = directive
                .parse()
                .map_err(|e: tracing_subscriber::filter::ParseError| {
                    TelemetryError::ConfigError(e.to_string())
                })?;
            filter = filter.add_directive(directive);
        }
        Ok(filter)
    }

    fn fmt_span(&self) -> FmtSpan {
        if self.span_events {
            FmtSpan::NEW | FmtSpan::CLOSE
        } else {
            FmtSpan::NONE
        }
    }

    fn layer<W>(&self, writer: W) -> BoxedLayer
    where
        W: for<'a> MakeWriter<'a> + Send + Sync + 'static,
    {
        let base = fmt::layer()
            .with_writer(writer)
            .with_ansi(self.ansi)
            .with_file(self.file_info)
            .with_line_number(self.file_info)
            .with_span_events(self.fmt_span());
        match self.format {
            LogFormat::Json => base.json().with_current_span(true).boxed(),
            LogFormat::Pretty => base.pretty().boxed(),
            LogFormat::Compact => base.compact().boxed(),
            LogFormat::Full => base.boxed(),
        }
    }
}

/// Install the global subscriber described by `config`.
///
/// # Errors
///
/// Returns [`TelemetryError::ConfigError`] for a bad level or directive or
/// an unwritable log directory, and [`TelemetryError::InitError`] if a
/// subscriber is already installed.
pub fn setup_logging(config: &LogConfig) -> TelemetryResult<()> {
    let filter = config.build_filter()?;
    let layer = match &config.target {
        LogTarget::Stdout => config.layer(std::io::stdout),
        LogTarget::Stderr => config.layer(std::io::stderr),
        LogTarget::File(dir) => {
            std::fs::create_dir_all(dir).map_err(|e| {
                TelemetryError::ConfigError(format!(
                    "failed to create log directory {}: {e}",
                    dir.display()
                ))
            })?;
            let appender = RollingFileAppender::new(Rotation::DAILY, dir, &config.file_prefix);
            config.layer(appender)
        },
    };

    tracing_subscriber::registry()
        .with(layer.with_filter(filter))
        .try_init()
        .map_err(|e| TelemetryError::InitError(e.to_string()))
}

/// Install `info`-level pretty logging on stderr.
///
/// # Errors
///
/// Same as [`setup_logging`].
pub fn setup_default_logging() -> TelemetryResult<()> {
    setup_logging(&LogConfig::default())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = LogConfig::default();
        assert_eq!(config.level, "info");
        assert_eq!(config.format, LogFormat::Pretty);
        assert_eq!(config.target, LogTarget::Stderr);
        assert!(config.ansi);
    }

    #[test]
    fn test_file_logging_disables_ansi() {
        let config = LogConfig::new("debug").with_file_logging("/var/log/bulwark");
        assert_eq!(config.target, LogTarget::File("/var/log/bulwark".into()));
        assert!(!config.ansi);
    }

    #[test]
    fn test_filter_directives() {
        assert!(
            LogConfig::new("info")
                .with_directive("bulwark_guard=trace")
                .build_filter()
                .is_ok()
        );
        assert!(
            LogConfig::new("info")
                .with_directive("[broken=syntax")
                .build_filter()
                .is_err()
        );
    }

    #[test]
    fn test_format_parsing() {
        assert_eq!("json".parse::<LogFormat>().unwrap(), LogFormat::Json);
        assert!("xml".parse::<LogFormat>().is_err());
    }

    #[test]
    fn test_serde_shape() {
        let config: LogConfig =
            serde_json::from_str(r#"{"level":"warn","format":"compact"}"#).unwrap();
        assert_eq!(config.level, "warn");
        assert_eq!(config.format, LogFormat::Compact);
        assert_eq!(config.file_prefix, "bulwark");
    }

    #[test]
    fn test_file_target_creates_directory() {
        let dir = tempfile::tempdir().unwrap();
        let logs = dir.path().join("logs");
        let config = LogConfig::new("info").with_file_logging(&logs);
        // A subscriber may already be installed by another test; the
        // directory is created either way.
        let _ = setup_logging(&config);
        assert!(logs.is_dir());
    }
}
