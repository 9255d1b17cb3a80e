//! Config file discovery and layered loading.
//!
//! `Config::load()`:
//! 1. Parse `defaults.toml`
//! 2. Merge `/etc/bulwark/config.toml` (system)
//! 3. Merge `~/.bulwark/config.toml` or `$BULWARK_HOME/config.toml` (user)
//! 4. Merge `{workspace}/.bulwark/config.toml` and enforce tighten-only
//! 5. Apply env var fallbacks for unset fields
//! 6. Deserialize, validate, return [`ResolvedConfig`]

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use tracing::{debug, info, warn};

use crate::env::{apply_env_fallbacks, collect_env_vars};
use crate::error::{ConfigError, ConfigResult};
use crate::merge::{
    ConfigLayer, FieldSources, deep_merge_tracking, enforce_restrictions, record_leaves,
};
use crate::show::ResolvedConfig;
use crate::types::Config;
use crate::validate;

/// Embedded default configuration.
pub(crate) const DEFAULTS_TOML: &str = include_str!("defaults.toml");

/// Maximum allowed config file size (1 MiB).
const MAX_CONFIG_FILE_SIZE: u64 = 1_048_576;

const SYSTEM_CONFIG: &str = "/etc/bulwark/config.toml";

/// Files consulted for each layer. Missing files are skipped.
#[derive(Debug, Clone, Default)]
pub(crate) struct LayerPaths {
    pub(crate) system: Option<PathBuf>,
    pub(crate) user: Option<PathBuf>,
    pub(crate) workspace: Option<PathBuf>,
}

/// Load the configuration with layered file precedence.
///
/// `workspace_root` is the project being operated on; `None` skips the
/// workspace layer. `home_override` is used as the bulwark home directory
/// itself, bypassing `~/.bulwark` and `BULWARK_HOME`.
///
/// # Errors
///
/// Returns a [`ConfigError`] if a file is unreadable, oversized or
/// malformed, or if the merged configuration fails validation.
pub fn load(
    workspace_root: Option<&Path>,
    home_override: Option<&Path>,
) -> ConfigResult<ResolvedConfig> {
    let env_vars = collect_env_vars();

    let user = if let Some(h) = home_override {
        h.join("config.toml")
    } else {
        user_config_path(&home_directory()?, &env_vars)
    };

    let paths = LayerPaths {
        system: Some(PathBuf::from(SYSTEM_CONFIG)),
        user: Some(user),
        workspace: workspace_root.map(|root| root.join(".bulwark").join("config.toml")),
    };
    load_layers(&paths, &env_vars)
}

/// Merge the layers named by `paths` over the embedded defaults.
pub(crate) fn load_layers<S: ::std::hash::BuildHasher>(
    paths: &LayerPaths,
    env_vars: &HashMap<String, String, S>,
) -> ConfigResult<ResolvedConfig> {
    let mut merged: toml::Value =
        toml::from_str(DEFAULTS_TOML).map_err(|e| ConfigError::ParseError {
            path: "<embedded defaults>".to_owned(),
            source: e,
        })?;

    let mut field_sources = FieldSources::new();
    let mut loaded_files = Vec::new();
    record_leaves(&merged, "", ConfigLayer::Defaults, &mut field_sources);

    for (path, layer) in [
        (&paths.system, ConfigLayer::System),
        (&paths.user, ConfigLayer::User),
    ] {
        let Some(path) = path else { continue };
        if let Some(overlay) = try_load_file(path)? {
            deep_merge_tracking(&mut merged, &overlay, "", layer, &mut field_sources);
            loaded_files.push(path.display().to_string());
            info!(path = %path.display(), %layer, "loaded config");
        }
    }

    // The baseline for tighten-only enforcement is everything below the
    // workspace, so restrictions hold even without a user file.
    if let Some(ws_path) = &paths.workspace
        && let Some(overlay) = try_load_file(ws_path)?
    {
        let baseline = merged.clone();
        deep_merge_tracking(
            &mut merged,
            &overlay,
            "",
            ConfigLayer::Workspace,
            &mut field_sources,
        );
        enforce_restrictions(&mut merged, &baseline, &overlay);
        loaded_files.push(ws_path.display().to_string());
        info!(path = %ws_path.display(), "loaded workspace config");
    }

    let env_count = apply_env_fallbacks(&mut merged, &mut field_sources, env_vars);
    if env_count > 0 {
        debug!(count = env_count, "applied environment variable fallbacks");
    }

    let config: Config =
        merged
            .try_into()
            .map_err(|e: toml::de::Error| ConfigError::ParseError {
                path: "<merged config>".to_owned(),
                source: e,
            })?;

    validate::validate(&config)?;

    Ok(ResolvedConfig {
        config,
        field_sources,
        loaded_files,
    })
}

/// Load a config from a single file (no layering).
///
/// # Errors
///
/// Returns a [`ConfigError`] if the file is missing, unreadable, oversized,
/// malformed or invalid.
pub fn load_file(path: &Path) -> ConfigResult<Config> {
    let value = try_load_file(path)?.ok_or_else(|| ConfigError::ReadError {
        path: path.display().to_string(),
        source: std::io::Error::from(std::io::ErrorKind::NotFound),
    })?;
    let config: Config = value
        .try_into()
        .map_err(|e: toml::de::Error| ConfigError::ParseError {
            path: path.display().to_string(),
            source: e,
        })?;
    validate::validate(&config)?;
    Ok(config)
}

/// Default data directory: `~/.bulwark/data`.
///
/// # Errors
///
/// Returns [`ConfigError::NoHomeDir`] if the home directory is unknown.
pub fn default_data_dir() -> ConfigResult<PathBuf> {
    Ok(home_directory()?.join(".bulwark").join("data"))
}

/// Read and parse a file, returning `None` if it does not exist.
///
/// A single read avoids racing a separate existence check.
fn try_load_file(path: &Path) -> ConfigResult<Option<toml::Value>> {
    let content = match std::fs::read_to_string(path) {
        Ok(c) => c,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            debug!(path = %path.display(), "config file not found, skipping");
            return Ok(None);
        },
        Err(e) => {
            return Err(ConfigError::ReadError {
                path: path.display().to_string(),
                source: e,
            });
        },
    };

    if content.len() as u64 > MAX_CONFIG_FILE_SIZE {
        return Err(ConfigError::ValidationError {
            field: path.display().to_string(),
            message: format!(
                "config file is {} bytes, exceeding the {MAX_CONFIG_FILE_SIZE} byte limit",
                content.len(),
            ),
        });
    }

    let value: toml::Value = toml::from_str(&content).map_err(|e| ConfigError::ParseError {
        path: path.display().to_string(),
        source: e,
    })?;
    Ok(Some(value))
}

/// `~/.bulwark/config.toml`, or `$BULWARK_HOME/config.toml` when the former
/// is absent and `BULWARK_HOME` is a directory owned by the home owner.
fn user_config_path<S: ::std::hash::BuildHasher>(
    home_dir: &Path,
    env_vars: &HashMap<String, String, S>,
) -> PathBuf {
    let default_path = home_dir.join(".bulwark").join("config.toml");
    if default_path.exists() {
        return default_path;
    }
    let Some(raw) = env_vars.get("BULWARK_HOME") else {
        return default_path;
    };
    if let Some(canonical) = validate_bulwark_home(raw, home_dir) {
        canonical.join("config.toml")
    } else {
        warn!(
            path = %raw,
            "BULWARK_HOME is not a directory owned by the current user; ignoring"
        );
        default_path
    }
}

/// `BULWARK_HOME` must be a real directory owned by whoever owns `home_dir`.
fn validate_bulwark_home(raw_path: &str, home_dir: &Path) -> Option<PathBuf> {
    let canonical = PathBuf::from(raw_path).canonicalize().ok()?;
    if !canonical.is_dir() {
        return None;
    }

    #[cfg(unix)]
    {
        use std::os::unix::fs::MetadataExt;
        let dir_uid = canonical.metadata().ok()?.uid();
        let home_uid = home_dir.metadata().ok()?.uid();
        if dir_uid != home_uid {
            return None;
        }
    }

    #[cfg(not(unix))]
    let _ = home_dir;

    Some(canonical)
}

fn home_directory() -> ConfigResult<PathBuf> {
    directories::BaseDirs::new()
        .map(|d| d.home_dir().to_path_buf())
        .ok_or(ConfigError::NoHomeDir)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Mode;

    fn write(dir: &Path, rel: &str, content: &str) -> PathBuf {
        let path = dir.join(rel);
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(&path, content).unwrap();
        path
    }

    fn no_env() -> HashMap<String, String> {
        HashMap::new()
    }

    #[test]
    fn test_defaults_deserialize_to_default_config() {
        let config: Config = toml::from_str(DEFAULTS_TOML).unwrap();
        assert_eq!(config, Config::default());
    }

    #[test]
    fn test_load_without_files() {
        let resolved = load_layers(&LayerPaths::default(), &no_env()).unwrap();
        assert_eq!(resolved.config, Config::default());
        assert!(resolved.loaded_files.is_empty());
        assert_eq!(
            resolved.field_sources.get("deployment.mode"),
            Some(&ConfigLayer::Defaults)
        );
    }

    #[test]
    fn test_user_layer_overrides_system() {
        let dir = tempfile::tempdir().unwrap();
        let system = write(dir.path(), "etc/config.toml", "[logging]\nlevel = \"warn\"\n");
        let user = write(dir.path(), "home/config.toml", "[logging]\nlevel = \"debug\"\n");

        let paths = LayerPaths {
            system: Some(system),
            user: Some(user),
            workspace: None,
        };
        let resolved = load_layers(&paths, &no_env()).unwrap();
        assert_eq!(resolved.config.logging.level, "debug");
        assert_eq!(
            resolved.field_sources.get("logging.level"),
            Some(&ConfigLayer::User)
        );
        assert_eq!(resolved.loaded_files.len(), 2);
    }

    #[test]
    fn test_workspace_can_only_tighten() {
        let dir = tempfile::tempdir().unwrap();
        let user = write(
            dir.path(),
            "home/config.toml",
            "[deployment]\nmode = \"supervised\"\n",
        );
        let ws = write(
            dir.path(),
            "repo/.bulwark/config.toml",
            "[deployment]\nmode = \"autonomous\"\n[approval]\nthreshold = 5\n\
             [limits]\nmax_memory_mb = 256\n",
        );

        let paths = LayerPaths {
            system: None,
            user: Some(user),
            workspace: Some(ws),
        };
        let resolved = load_layers(&paths, &no_env()).unwrap();
        assert_eq!(resolved.config.deployment.mode, Mode::Supervised);
        assert_eq!(resolved.config.approval_threshold(), 3);
        assert_eq!(resolved.config.limits.max_memory_mb, 256);
    }

    #[test]
    fn test_env_fallback_applies_below_files() {
        let env = HashMap::from([
            ("BULWARK_MODE".to_string(), "safe".to_string()),
            ("BULWARK_LOG_LEVEL".to_string(), "trace".to_string()),
        ]);
        let dir = tempfile::tempdir().unwrap();
        let user = write(dir.path(), "config.toml", "[logging]\nlevel = \"warn\"\n");
        let paths = LayerPaths {
            user: Some(user),
            ..LayerPaths::default()
        };

        let resolved = load_layers(&paths, &env).unwrap();
        assert_eq!(resolved.config.deployment.mode, Mode::Safe);
        assert_eq!(resolved.config.logging.level, "warn");
    }

    #[test]
    fn test_invalid_env_mode_is_rejected() {
        let env = HashMap::from([("BULWARK_MODE".to_string(), "yolo".to_string())]);
        let err = load_layers(&LayerPaths::default(), &env).unwrap_err();
        assert!(matches!(err, ConfigError::ParseError { .. }));
    }

    #[test]
    fn test_oversized_file_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let mut body = String::from("[clock]\nnode_id = \"x\"\n");
        body.push_str(&"#".repeat(1_048_577));
        let path = write(dir.path(), "config.toml", &body);
        let err = try_load_file(&path).unwrap_err();
        assert!(matches!(err, ConfigError::ValidationError { .. }));
    }

    #[test]
    fn test_malformed_file_reports_path() {
        let dir = tempfile::tempdir().unwrap();
        let path = write(dir.path(), "config.toml", "[approval\n");
        let err = load_file(&path).unwrap_err();
        assert!(err.to_string().contains("config.toml"));
    }

    #[test]
    fn test_validation_runs_after_merge() {
        let dir = tempfile::tempdir().unwrap();
        let user = write(dir.path(), "config.toml", "[approval]\nthreshold = 9\n");
        let paths = LayerPaths {
            user: Some(user),
            ..LayerPaths::default()
        };
        let err = load_layers(&paths, &no_env()).unwrap_err();
        assert!(
            matches!(err, ConfigError::ValidationError { ref field, .. } if field == "approval.threshold")
        );
    }

    #[test]
    fn test_try_load_file_missing() {
        assert!(
            try_load_file(Path::new("/nonexistent/config.toml"))
                .unwrap()
                .is_none()
        );
        assert!(matches!(
            load_file(Path::new("/nonexistent/config.toml")),
            Err(ConfigError::ReadError { .. })
        ));
    }

    #[test]
    fn test_bulwark_home_used_when_default_absent() {
        let home = tempfile::tempdir().unwrap();
        let alt = tempfile::tempdir().unwrap();
        let env = HashMap::from([(
            "BULWARK_HOME".to_string(),
            alt.path().display().to_string(),
        )]);
        let path = user_config_path(home.path(), &env);
        assert_eq!(path, alt.path().canonicalize().unwrap().join("config.toml"));

        let env = HashMap::from([("BULWARK_HOME".to_string(), "/nonexistent".to_string())]);
        assert_eq!(
            user_config_path(home.path(), &env),
            home.path().join(".bulwark").join("config.toml")
        );
    }
}
