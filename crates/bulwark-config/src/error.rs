use std::io;

use thiserror::Error;

/// Configuration error type.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Failed to read a configuration file.
    #[error("failed to read config file at {path}: {source}")]
    ReadError {
        /// Path to the file.
        path: String,
        /// Underlying I/O error.
        #[source]
        source: io::Error,
    },

    /// Failed to parse TOML.
    #[error("failed to parse config file at {path}: {source}")]
    ParseError {
        /// Path to the file.
        path: String,
        /// Underlying TOML error.
        #[source]
        source: toml::de::Error,
    },

    /// A value is out of range or inconsistent.
    #[error("validation error in field '{field}': {message}")]
    ValidationError {
        /// Dotted field path.
        field: String,
        /// What is wrong.
        message: String,
    },

    /// Could not determine the home directory.
    #[error("could not determine home directory")]
    NoHomeDir,
}

/// Result type for configuration operations.
pub type ConfigResult<T> = Result<T, ConfigError>;
