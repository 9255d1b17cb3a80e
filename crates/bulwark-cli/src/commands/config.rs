//! Config command - show, validate and locate configuration.

use std::path::Path;

use anyhow::{Result, bail};
use bulwark_config::{Config, ResolvedConfig, ShowFormat};
use colored::Colorize;

use crate::theme::Theme;

/// Print the resolved configuration with source annotations.
pub(crate) fn show(resolved: &ResolvedConfig, format: &str, section: Option<&str>) -> Result<()> {
    let show_format = match format {
        "toml" => ShowFormat::Toml,
        "json" => ShowFormat::Json,
        other => bail!("unknown format '{other}', expected toml or json"),
    };
    let Ok(rendered) = resolved.show(show_format, section) else {
        match section {
            Some(name) => bail!("no configuration section named '{name}'"),
            None => bail!("failed to render configuration"),
        }
    };
    println!("{rendered}");
    Ok(())
}

/// Load and validate, reporting the first problem found.
pub(crate) fn validate(workspace_root: Option<&Path>) -> Result<bool> {
    match Config::load(workspace_root) {
        Ok(resolved) => {
            println!("{}", Theme::success("Configuration is valid"));
            for file in &resolved.loaded_files {
                println!("  {} {file}", "loaded".dimmed());
            }
            println!(
                "  {} mode {}, approval at {}+, checkpoint at {}+",
                "effective".dimmed(),
                resolved.config.deployment.mode,
                resolved.config.approval_threshold(),
                resolved.config.checkpoint_floor()
            );
            Ok(true)
        },
        Err(e) => {
            println!("{}", Theme::error(&format!("Configuration is invalid: {e}")));
            Ok(false)
        },
    }
}

/// List every file consulted, marking the ones that exist.
pub(crate) fn paths(workspace_root: Option<&Path>) {
    let home = directories::BaseDirs::new().map(|d| d.home_dir().display().to_string());
    let workspace = workspace_root.map(|p| p.display().to_string());

    println!("\n{}", Theme::header("Config Paths (lowest precedence first)"));
    for path in ResolvedConfig::config_paths(home.as_deref(), workspace.as_deref()) {
        let marker = if Path::new(&path).is_file() {
            "found".green().to_string()
        } else {
            "absent".dimmed().to_string()
        };
        println!("  {marker:<8} {path}");
    }
    if let Ok(raw) = std::env::var("BULWARK_HOME") {
        println!("  {} BULWARK_HOME={raw}", "env".dimmed());
    }
    println!();
}
