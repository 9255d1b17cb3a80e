//! Environment variable fallbacks.
//!
//! Env vars are fallback, not override: they apply only to fields that no
//! config file set.

use std::collections::HashMap;

use tracing::debug;

use crate::merge::{ConfigLayer, FieldSources, set_nested};

/// Mapping from environment variable name to config field path.
struct EnvMapping {
    var_name: &'static str,
    field_path: &'static [&'static str],
}

const ENV_MAPPINGS: &[EnvMapping] = &[
    EnvMapping {
        var_name: "BULWARK_MODE",
        field_path: &["deployment", "mode"],
    },
    EnvMapping {
        var_name: "BULWARK_LOG_LEVEL",
        field_path: &["logging", "level"],
    },
    EnvMapping {
        var_name: "BULWARK_LOG_FORMAT",
        field_path: &["logging", "format"],
    },
    EnvMapping {
        var_name: "BULWARK_DATA_DIR",
        field_path: &["storage", "data_dir"],
    },
    EnvMapping {
        var_name: "BULWARK_NODE_ID",
        field_path: &["clock", "node_id"],
    },
];

/// Collect the `BULWARK_*` variables from the process environment.
#[must_use]
pub fn collect_env_vars() -> HashMap<String, String> {
    std::env::vars()
        .filter(|(k, _)| k.starts_with("BULWARK_"))
        .collect()
}

/// Apply env fallbacks to fields not set by a config file.
///
/// Returns the number of variables applied.
pub fn apply_env_fallbacks<S: ::std::hash::BuildHasher>(
    merged: &mut toml::Value,
    sources: &mut FieldSources,
    env_vars: &HashMap<String, String, S>,
) -> usize {
    let mut count: usize = 0;

    for mapping in ENV_MAPPINGS {
        let key = mapping.field_path.join(".");
        if sources
            .get(&key)
            .is_some_and(|layer| *layer != ConfigLayer::Defaults)
        {
            continue;
        }

        if let Some(val) = env_vars.get(mapping.var_name) {
            debug!(var = mapping.var_name, field = %key, "applying env var fallback");
            set_nested(merged, mapping.field_path, toml::Value::String(val.clone()));
            sources.insert(key, ConfigLayer::Environment);
            count = count.saturating_add(1);
        }
    }

    count
}
