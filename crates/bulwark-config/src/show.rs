//! Source-annotated display for `config show`.

use std::fmt::{self, Write as _};

use crate::merge::FieldSources;
use crate::types::Config;

/// A resolved configuration together with source annotations.
#[derive(Debug, Clone)]
pub struct ResolvedConfig {
    /// The final merged configuration.
    pub config: Config,
    /// Dotted field path to the layer that set it.
    pub field_sources: FieldSources,
    /// Config files that were loaded, lowest precedence first.
    pub loaded_files: Vec<String>,
}

/// Output format for `config show`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShowFormat {
    /// TOML with inline comments naming the source layer.
    Toml,
    /// JSON with the config, sources and loaded files.
    Json,
}

impl ResolvedConfig {
    /// Render the configuration, optionally limited to one section.
    ///
    /// # Errors
    ///
    /// Returns [`fmt::Error`] if serialization fails or `section` does not
    /// exist.
    pub fn show(&self, format: ShowFormat, section: Option<&str>) -> Result<String, fmt::Error> {
        let mut value = toml::Value::try_from(&self.config).map_err(|_| fmt::Error)?;
        if let Some(name) = section {
            let table = value.as_table().ok_or(fmt::Error)?;
            let section_val = table.get(name).ok_or(fmt::Error)?.clone();
            let mut only = toml::map::Map::new();
            only.insert(name.to_owned(), section_val);
            value = toml::Value::Table(only);
        }
        match format {
            ShowFormat::Toml => self.show_toml(&value),
            ShowFormat::Json => self.show_json(&value),
        }
    }

    fn show_toml(&self, value: &toml::Value) -> Result<String, fmt::Error> {
        let body = toml::to_string_pretty(value).map_err(|_| fmt::Error)?;
        let mut output = String::new();

        output.push_str("# Resolved Bulwark configuration\n");
        output.push_str("# Source annotations: [defaults] [system] [user] [workspace] [env]\n");
        writeln!(
            output,
            "# Effective policy: approval at risk >= {}, checkpoint at risk >= {}, \
             approval window {}s",
            self.config.approval_threshold(),
            self.config.checkpoint_floor(),
            self.config.approval_timeout_secs(),
        )?;

        if !self.loaded_files.is_empty() {
            output.push_str("#\n# Loaded files (lowest precedence first):\n");
            for (i, path) in self.loaded_files.iter().enumerate() {
                writeln!(output, "#   {}. {path}", i.saturating_add(1))?;
            }
        }
        output.push('\n');

        let mut section = String::new();
        for line in body.lines() {
            let trimmed = line.trim();
            if let Some(header) = trimmed.strip_prefix('[').and_then(|h| h.strip_suffix(']')) {
                header.clone_into(&mut section);
            }
            match self.annotate_line(trimmed, &section) {
                Some(tag) => writeln!(output, "{line}  # [{tag}]")?,
                None => writeln!(output, "{line}")?,
            }
        }
        Ok(output)
    }

    fn show_json(&self, value: &toml::Value) -> Result<String, fmt::Error> {
        let sources: serde_json::Map<String, serde_json::Value> = self
            .field_sources
            .iter()
            .map(|(k, v)| (k.clone(), serde_json::Value::from(v.tag())))
            .collect();
        let doc = serde_json::json!({
            "config": value,
            "sources": sources,
            "loaded_files": self.loaded_files,
        });
        serde_json::to_string_pretty(&doc).map_err(|_| fmt::Error)
    }

    fn annotate_line(&self, trimmed: &str, section: &str) -> Option<&'static str> {
        if trimmed.is_empty() || trimmed.starts_with('#') || trimmed.starts_with('[') {
            return None;
        }
        let key = trimmed.split('=').next()?.trim();
        let path = if section.is_empty() {
            key.to_owned()
        } else {
            format!("{section}.{key}")
        };
        self.field_sources.get(&path).map(|layer| layer.tag())
    }

    /// Every path checked during loading, lowest precedence first.
    #[must_use]
    pub fn config_paths(home_dir: Option<&str>, workspace_root: Option<&str>) -> Vec<String> {
        vec![
            "/etc/bulwark/config.toml".to_owned(),
            home_dir.map_or_else(
                || "~/.bulwark/config.toml".to_owned(),
                |home| format!("{home}/.bulwark/config.toml"),
            ),
            workspace_root.map_or_else(
                || "{workspace}/.bulwark/config.toml".to_owned(),
                |ws| format!("{ws}/.bulwark/config.toml"),
            ),
        ]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::merge::ConfigLayer;

    fn resolved() -> ResolvedConfig {
        let mut field_sources = FieldSources::new();
        field_sources.insert("deployment.mode".into(), ConfigLayer::Defaults);
        field_sources.insert("logging.level".into(), ConfigLayer::Environment);
        ResolvedConfig {
            config: Config::default(),
            field_sources,
            loaded_files: vec!["/home/a/.bulwark/config.toml".into()],
        }
    }

    #[test]
    fn test_show_toml_annotates_sources() {
        let output = resolved().show(ShowFormat::Toml, None).unwrap();
        assert!(output.contains("Resolved Bulwark configuration"));
        assert!(output.contains("approval at risk >= 3"));
        assert!(output.contains("mode = \"supervised\"  # [defaults]"));
        assert!(output.contains("level = \"info\"  # [env]"));
        assert!(output.contains("1. /home/a/.bulwark/config.toml"));
    }

    #[test]
    fn test_show_json_is_valid() {
        let output = resolved().show(ShowFormat::Json, None).unwrap();
        let doc: serde_json::Value = serde_json::from_str(&output).unwrap();
        assert_eq!(doc["config"]["deployment"]["mode"], "supervised");
        assert_eq!(doc["sources"]["logging.level"], "env");
    }

    #[test]
    fn test_show_section() {
        let output = resolved().show(ShowFormat::Toml, Some("limits")).unwrap();
        assert!(output.contains("max_memory_mb"));
        assert!(!output.contains("node_id"));
        assert!(resolved().show(ShowFormat::Toml, Some("nope")).is_err());
    }

    #[test]
    fn test_config_paths() {
        let paths = ResolvedConfig::config_paths(Some("/home/a"), Some("/home/a/repo"));
        assert_eq!(paths.len(), 3);
        assert!(paths[1].contains("/home/a/.bulwark"));
        assert!(paths[2].contains("/home/a/repo/.bulwark"));
    }
}
