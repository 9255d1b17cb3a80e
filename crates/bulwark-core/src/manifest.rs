//! Action manifests and their structural validation.
//!
//! A manifest is supplied by the caller for every action and is immutable
//! for the lifetime of one execution attempt. The core validates it but
//! does not author it.

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

use crate::error::{CoreError, CoreResult};
use crate::level::{IsolationType, RiskLevel, TrustLevel};

/// Maximum number of capabilities a single manifest may require.
pub const MAX_REQUIRED_CAPABILITIES: usize = 64;

/// Maximum length of an action name.
pub const MAX_NAME_LEN: usize = 128;

/// Resource ceilings attached to the execution boundary.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ResourceLimits {
    /// Wall-clock timeout in seconds.
    pub timeout_secs: u64,
    /// Memory ceiling in MiB.
    pub memory_mb: u64,
    /// CPU time quota in seconds.
    pub cpu_secs: u64,
}

impl Default for ResourceLimits {
    fn default() -> Self {
        Self {
            timeout_secs: 60,
            memory_mb: 512,
            cpu_secs: 30,
        }
    }
}

impl ResourceLimits {
    /// Wall-clock timeout as a [`std::time::Duration`].
    #[must_use]
    pub fn timeout(&self) -> std::time::Duration {
        std::time::Duration::from_secs(self.timeout_secs)
    }

    /// Memory ceiling in bytes.
    #[must_use]
    pub fn memory_bytes(&self) -> u64 {
        self.memory_mb.saturating_mul(1024 * 1024)
    }
}

/// Upper bounds a manifest's resource limits must stay within.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ManifestCeilings {
    /// Largest accepted wall-clock timeout.
    pub max_timeout_secs: u64,
    /// Largest accepted memory ceiling.
    pub max_memory_mb: u64,
    /// Largest accepted CPU quota.
    pub max_cpu_secs: u64,
}

impl Default for ManifestCeilings {
    fn default() -> Self {
        Self {
            max_timeout_secs: 3600,
            max_memory_mb: 4096,
            max_cpu_secs: 300,
        }
    }
}

/// The caller-supplied declaration for one action.
///
/// Fields are kept in their wire form (`risk_level` as a raw integer,
/// capabilities as strings) so that malformed input reaches
/// [`ActionManifest::validate`] instead of failing deserialization silently.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActionManifest {
    /// Human-readable action name.
    pub name: String,
    /// Capability patterns the action needs, e.g. `fs:write:/workspace/out/**`.
    #[serde(default)]
    pub required_capabilities: Vec<String>,
    /// Declared risk level (1-5).
    pub risk_level: u8,
    /// Requested isolation; may be strengthened, never weakened.
    #[serde(default)]
    pub isolation_type: IsolationType,
    /// Provenance classification of the action's code.
    #[serde(default)]
    pub trust_level: TrustLevel,
    /// Resource ceilings.
    #[serde(default)]
    pub limits: ResourceLimits,
}

impl ActionManifest {
    /// Start building a manifest.
    #[must_use]
    pub fn builder(name: impl Into<String>) -> ManifestBuilder {
        ManifestBuilder::new(name)
    }

    /// Validate the manifest structurally.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::InvalidManifest`] naming the first offending field.
    pub fn validate(&self, ceilings: &ManifestCeilings) -> CoreResult<ValidatedManifest> {
        let name = self.name.trim();
        if name.is_empty() {
            return Err(CoreError::manifest("name", "must not be empty"));
        }
        if name.len() > MAX_NAME_LEN {
            return Err(CoreError::manifest(
                "name",
                format!("longer than {MAX_NAME_LEN} bytes"),
            ));
        }
        if name.chars().any(char::is_control) {
            return Err(CoreError::manifest("name", "contains control characters"));
        }

        let risk_level = RiskLevel::new(self.risk_level).ok_or_else(|| {
            CoreError::manifest(
                "risk_level",
                format!("{} is outside 1-5", self.risk_level),
            )
        })?;

        if self.required_capabilities.len() > MAX_REQUIRED_CAPABILITIES {
            return Err(CoreError::manifest(
                "required_capabilities",
                format!("more than {MAX_REQUIRED_CAPABILITIES} entries"),
            ));
        }
        let mut seen = BTreeSet::new();
        for cap in &self.required_capabilities {
            if cap.is_empty() || cap.chars().any(|c| c.is_whitespace() || c.is_control()) {
                return Err(CoreError::manifest(
                    "required_capabilities",
                    format!("'{cap}' is empty or contains whitespace"),
                ));
            }
            if !seen.insert(cap.as_str()) {
                return Err(CoreError::manifest(
                    "required_capabilities",
                    format!("'{cap}' is listed twice"),
                ));
            }
        }

        check_limit(
            "limits.timeout_secs",
            self.limits.timeout_secs,
            ceilings.max_timeout_secs,
        )?;
        check_limit(
            "limits.memory_mb",
            self.limits.memory_mb,
            ceilings.max_memory_mb,
        )?;
        check_limit("limits.cpu_secs", self.limits.cpu_secs, ceilings.max_cpu_secs)?;

        Ok(ValidatedManifest {
            name: name.to_string(),
            required_capabilities: self.required_capabilities.clone(),
            risk_level,
            isolation_type: self.isolation_type,
            trust_level: self.trust_level,
            limits: self.limits,
        })
    }
}

fn check_limit(field: &str, value: u64, max: u64) -> CoreResult<()> {
    if value == 0 {
        return Err(CoreError::manifest(field, "must be greater than zero"));
    }
    if value > max {
        return Err(CoreError::manifest(
            field,
            format!("{value} exceeds the ceiling of {max}"),
        ));
    }
    Ok(())
}

/// A manifest that passed [`ActionManifest::validate`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ValidatedManifest {
    name: String,
    required_capabilities: Vec<String>,
    risk_level: RiskLevel,
    isolation_type: IsolationType,
    trust_level: TrustLevel,
    limits: ResourceLimits,
}

impl ValidatedManifest {
    /// Action name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Required capability patterns, in declaration order.
    #[must_use]
    pub fn required_capabilities(&self) -> &[String] {
        &self.required_capabilities
    }

    /// Declared risk level.
    #[must_use]
    pub fn risk_level(&self) -> RiskLevel {
        self.risk_level
    }

    /// Declared isolation type.
    #[must_use]
    pub fn isolation_type(&self) -> IsolationType {
        self.isolation_type
    }

    /// Declared trust level.
    #[must_use]
    pub fn trust_level(&self) -> TrustLevel {
        self.trust_level
    }

    /// Resource ceilings.
    #[must_use]
    pub fn limits(&self) -> ResourceLimits {
        self.limits
    }
}

/// Builder for [`ActionManifest`].
#[derive(Debug, Clone)]
pub struct ManifestBuilder {
    manifest: ActionManifest,
}

impl ManifestBuilder {
    fn new(name: impl Into<String>) -> Self {
        Self {
            manifest: ActionManifest {
                name: name.into(),
                required_capabilities: Vec::new(),
                risk_level: 1,
                isolation_type: IsolationType::default(),
                trust_level: TrustLevel::default(),
                limits: ResourceLimits::default(),
            },
        }
    }

    /// Require a capability.
    #[must_use]
    pub fn capability(mut self, pattern: impl Into<String>) -> Self {
        self.manifest.required_capabilities.push(pattern.into());
        self
    }

    /// Set the risk level.
    #[must_use]
    pub fn risk_level(mut self, level: u8) -> Self {
        self.manifest.risk_level = level;
        self
    }

    /// Set the requested isolation.
    #[must_use]
    pub fn isolation(mut self, isolation: IsolationType) -> Self {
        self.manifest.isolation_type = isolation;
        self
    }

    /// Set the trust level.
    #[must_use]
    pub fn trust_level(mut self, trust: TrustLevel) -> Self {
        self.manifest.trust_level = trust;
        self
    }

    /// Set resource limits.
    #[must_use]
    pub fn limits(mut self, limits: ResourceLimits) -> Self {
        self.manifest.limits = limits;
        self
    }

    /// Set only the wall-clock timeout.
    #[must_use]
    pub fn timeout_secs(mut self, secs: u64) -> Self {
        self.manifest.limits.timeout_secs = secs;
        self
    }

    /// Finish building.
    #[must_use]
    pub fn build(self) -> ActionManifest {
        self.manifest
    }
}
