//! Action manifest files for `bulwark run`.
//!
//! ```toml
//! name = "prune-cache"
//! required_capabilities = ["fs:write:/var/cache/app/**"]
//! risk_level = 4
//! isolation_type = "subprocess"
//! trust_level = "verified"
//!
//! [limits]
//! timeout_secs = 30
//!
//! [command]
//! program = "sh"
//! args = ["-c", "rm -rf /var/cache/app/tmp"]
//! ```
//!
//! The manifest fields are the wire form of [`ActionManifest`]; the guard
//! validates them. `[command]` becomes the action body.

use std::path::Path;

use anyhow::{Context, Result};
use bulwark_core::ActionManifest;
use bulwark_isolation::{ActionBody, CommandSpec};
use serde::Deserialize;

/// Largest manifest file accepted.
const MAX_MANIFEST_BYTES: u64 = 1_048_576;

#[derive(Debug, Deserialize)]
struct ManifestFile {
    #[serde(flatten)]
    manifest: ActionManifest,
    command: CommandSpec,
    summary: Option<String>,
}

/// A parsed manifest file.
#[derive(Debug)]
pub(crate) struct LoadedManifest {
    pub(crate) manifest: ActionManifest,
    pub(crate) body: ActionBody,
    pub(crate) summary: Option<String>,
}

/// Parse manifest text. `default_image` fills in a missing `command.image`.
pub(crate) fn parse(text: &str, default_image: Option<&str>) -> Result<LoadedManifest> {
    let file: ManifestFile = toml::from_str(text).context("malformed manifest")?;
    let mut spec = file.command;
    if spec.image.is_none() {
        spec.image = default_image.map(str::to_owned);
    }
    Ok(LoadedManifest {
        manifest: file.manifest,
        body: ActionBody::Command(spec),
        summary: file.summary,
    })
}

/// Read and parse a manifest file.
pub(crate) fn load(path: &Path, default_image: Option<&str>) -> Result<LoadedManifest> {
    let meta = std::fs::metadata(path)
        .with_context(|| format!("failed to read manifest {}", path.display()))?;
    if meta.len() > MAX_MANIFEST_BYTES {
        anyhow::bail!(
            "manifest {} is {} bytes, exceeding the {MAX_MANIFEST_BYTES} byte limit",
            path.display(),
            meta.len()
        );
    }
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read manifest {}", path.display()))?;
    parse(&text, default_image).with_context(|| format!("in {}", path.display()))
}

#[cfg(test)]
mod tests {
    use bulwark_core::{IsolationType, TrustLevel};

    use super::*;

    const MANIFEST: &str = r#"
name = "prune-cache"
required_capabilities = ["fs:write:/var/cache/app/**"]
risk_level = 4
isolation_type = "subprocess"
trust_level = "verified"
summary = "prune the app cache"

[limits]
timeout_secs = 30
memory_mb = 256
cpu_secs = 10

[command]
program = "sh"
args = ["-c", "true"]
"#;

    #[test]
    fn test_parse_manifest() {
        let loaded = parse(MANIFEST, Some("alpine:3")).unwrap();
        assert_eq!(loaded.manifest.name, "prune-cache");
        assert_eq!(loaded.manifest.risk_level, 4);
        assert_eq!(loaded.manifest.isolation_type, IsolationType::Subprocess);
        assert_eq!(loaded.manifest.trust_level, TrustLevel::Verified);
        assert_eq!(loaded.manifest.limits.timeout_secs, 30);
        assert_eq!(loaded.summary.as_deref(), Some("prune the app cache"));
        match loaded.body {
            ActionBody::Command(spec) => {
                assert_eq!(spec.program, "sh");
                assert_eq!(spec.image.as_deref(), Some("alpine:3"));
            },
            ActionBody::Inline(_) => panic!("expected a command body"),
        }
    }

    #[test]
    fn test_out_of_range_risk_reaches_validation() {
        let text = MANIFEST.replace("risk_level = 4", "risk_level = 9");
        let loaded = parse(&text, None).unwrap();
        assert!(
            loaded
                .manifest
                .validate(&bulwark_core::ManifestCeilings::default())
                .is_err()
        );
    }

    #[test]
    fn test_missing_command_rejected() {
        assert!(parse("name = \"x\"\nrisk_level = 1\n", None).is_err());
    }
}
