#![deny(unsafe_code)]
#![warn(missing_docs)]
#![deny(clippy::all)]
#![warn(unreachable_pub)]
#![deny(clippy::unwrap_used)]
#![cfg_attr(test, allow(clippy::unwrap_used))]
//! Layered configuration for Bulwark.
//!
//! A single [`Config`] drives the risk policy, checkpoint and isolation
//! settings, manifest ceilings, storage location and logging.
//!
//! # Usage
//!
//! ```rust,no_run
//! use bulwark_config::Config;
//!
//! let resolved = Config::load(Some(std::path::Path::new("."))).unwrap();
//! println!("approval at risk >= {}", resolved.config.approval_threshold());
//! ```
//!
//! # Configuration Precedence
//!
//! From highest to lowest priority:
//!
//! 1. **Workspace** (`{workspace}/.bulwark/config.toml`), which can only tighten
//! 2. **User** (`~/.bulwark/config.toml` or `$BULWARK_HOME/config.toml`)
//! 3. **System** (`/etc/bulwark/config.toml`)
//! 4. **Environment variables** (`BULWARK_*`), fallback only
//! 5. **Embedded defaults** (`defaults.toml` compiled into the binary)
//!
//! # Design
//!
//! This crate depends on no other bulwark crate. Conversion to domain types
//! happens where the configuration is consumed.

/// Environment variable fallback resolution.
pub mod env;
/// Configuration error types.
pub mod error;
/// Configuration file discovery and loading.
pub mod loader;
/// Layered configuration merging with precedence.
pub mod merge;
/// Resolved configuration display.
pub mod show;
/// Configuration struct definitions.
pub mod types;
/// Configuration validation rules.
pub mod validate;

pub use error::{ConfigError, ConfigResult};
pub use show::{ResolvedConfig, ShowFormat};
pub use types::*;

impl Config {
    /// Load configuration with the full precedence chain.
    ///
    /// See [`loader::load`] for the algorithm.
    ///
    /// # Errors
    ///
    /// Returns a [`ConfigError`] if any config file is malformed or the final
    /// configuration fails validation.
    pub fn load(workspace_root: Option<&std::path::Path>) -> ConfigResult<ResolvedConfig> {
        loader::load(workspace_root, None)
    }

    /// Load configuration with `home_dir` as the bulwark home directory.
    ///
    /// # Errors
    ///
    /// Same as [`Config::load`].
    pub fn load_with_home(
        workspace_root: Option<&std::path::Path>,
        home_dir: &std::path::Path,
    ) -> ConfigResult<ResolvedConfig> {
        loader::load(workspace_root, Some(home_dir))
    }

    /// The configured data directory, or `~/.bulwark/data`.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::NoHomeDir`] if no directory is configured and
    /// the home directory is unknown.
    pub fn data_dir(&self) -> ConfigResult<std::path::PathBuf> {
        match &self.storage.data_dir {
            Some(dir) => Ok(dir.clone()),
            None => loader::default_data_dir(),
        }
    }
}
