use std::collections::BTreeMap;
use std::fmt;

/// Which configuration layer a value came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigLayer {
    /// Compiled-in `defaults.toml`.
    Defaults,
    /// `/etc/bulwark/config.toml`.
    System,
    /// `~/.bulwark/config.toml` or `$BULWARK_HOME/config.toml`.
    User,
    /// `{workspace}/.bulwark/config.toml`.
    Workspace,
    /// Environment variable fallback.
    Environment,
}

impl ConfigLayer {
    /// Short tag used in annotated output.
    #[must_use]
    pub fn tag(self) -> &'static str {
        match self {
            Self::Defaults => "defaults",
            Self::System => "system",
            Self::User => "user",
            Self::Workspace => "workspace",
            Self::Environment => "env",
        }
    }
}

impl fmt::Display for ConfigLayer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Defaults => write!(f, "defaults"),
            Self::System => write!(f, "system (/etc/bulwark/config.toml)"),
            Self::User => write!(f, "user (~/.bulwark/config.toml)"),
            Self::Workspace => write!(f, "workspace (.bulwark/config.toml)"),
            Self::Environment => write!(f, "environment variable"),
        }
    }
}

/// Dotted field path to the layer that set it.
pub type FieldSources = BTreeMap<String, ConfigLayer>;
