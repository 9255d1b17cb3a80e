//! Bulwark CLI - security and execution gate for autonomous agents.
//!
//! Every command opens the persistent services under the configured data
//! directory, performs one operation and closes them again. `run` submits
//! an action manifest through the full guard and answers approval
//! requests on the terminal.

#![deny(unsafe_code)]
#![deny(missing_docs)]
#![deny(clippy::all)]
#![warn(unreachable_pub)]
#![deny(clippy::unwrap_used)]
#![cfg_attr(test, allow(clippy::unwrap_used))]

use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::Result;
use clap::{Parser, Subcommand};

mod approval_prompt;
mod commands;
mod config_bridge;
mod formatter;
mod manifest_file;
mod runtime;
mod theme;

use commands::{audit, caps, checkpoints, config, run};
use formatter::OutputFormat;
use runtime::Runtime;

/// Bulwark - security and execution gate for autonomous agents
#[derive(Parser)]
#[command(name = "bulwark")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Output format
    #[arg(long, global = true, value_enum, default_value_t = OutputFormat::Pretty)]
    format: OutputFormat,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run an action manifest through the guard
    Run {
        /// Path to the manifest (TOML)
        manifest: PathBuf,
        /// Principal the action runs as
        #[arg(short, long)]
        principal: String,
        /// JSON input for the action
        #[arg(short, long)]
        input: Option<String>,
        /// Name recorded on approvals given at this terminal
        #[arg(long, env = "USER", default_value = "cli")]
        approver: String,
    },

    /// Manage capability grants
    Caps {
        #[command(subcommand)]
        command: CapsCommands,
    },

    /// View, verify and export the audit chain
    Audit {
        #[command(subcommand)]
        command: AuditCommands,
    },

    /// Inspect stored checkpoints
    Checkpoints {
        #[command(subcommand)]
        command: CheckpointCommands,
    },

    /// View and validate configuration
    Config {
        #[command(subcommand)]
        command: ConfigCommands,
    },
}

#[derive(Subcommand)]
enum CapsCommands {
    /// Grant a capability to a principal
    Grant {
        /// Principal receiving the grant
        principal: String,
        /// Capability pattern, e.g. `fs:read:/workspace/**`
        capability: String,
        /// Lifetime in seconds (permanent if omitted)
        #[arg(long)]
        ttl: Option<u64>,
        /// Recorded issuer
        #[arg(long, default_value = "cli")]
        issuer: String,
    },
    /// Revoke a grant
    Revoke {
        /// Grant ID
        grant_id: String,
    },
    /// List live grants
    List {
        /// Only this principal
        #[arg(short, long)]
        principal: Option<String>,
    },
    /// Remove expired grants
    Sweep,
}

#[derive(Subcommand)]
enum AuditCommands {
    /// Show audit entries
    List {
        /// First sequence number
        #[arg(long)]
        from: Option<u64>,
        /// Last sequence number
        #[arg(long)]
        to: Option<u64>,
        /// Entries at or after this RFC 3339 time
        #[arg(long)]
        since: Option<String>,
        /// Entries before this RFC 3339 time
        #[arg(long)]
        until: Option<String>,
        /// Entries of one guarded execution
        #[arg(long)]
        correlation: Option<String>,
    },
    /// Verify chain integrity
    Verify {
        /// First sequence number
        #[arg(long)]
        from: Option<u64>,
        /// Last sequence number
        #[arg(long)]
        to: Option<u64>,
    },
    /// Export the chain as JSON lines
    Export {
        /// Output file (stdout if omitted)
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
}

#[derive(Subcommand)]
enum CheckpointCommands {
    /// List held checkpoints
    List,
}

#[derive(Subcommand)]
enum ConfigCommands {
    /// Show resolved configuration with source annotations
    Show {
        /// Output format (toml or json)
        #[arg(short, long, default_value = "toml")]
        format: String,
        /// Show only a specific section (e.g. approval, isolation)
        #[arg(short, long)]
        section: Option<String>,
    },
    /// Validate the current configuration
    Validate,
    /// Show config file paths being checked
    Paths,
}

#[tokio::main]
async fn main() -> ExitCode {
    match dispatch(Cli::parse()).await {
        Ok(true) => ExitCode::SUCCESS,
        Ok(false) => ExitCode::FAILURE,
        Err(e) => {
            eprintln!("{}", theme::Theme::error(&format!("{e:#}")));
            ExitCode::FAILURE
        },
    }
}

async fn dispatch(cli: Cli) -> Result<bool> {
    let workspace_root = std::env::current_dir().ok();

    // Validation reports load errors itself, so it runs before loading.
    if let Commands::Config { command } = &cli.command {
        match command {
            ConfigCommands::Validate => return config::validate(workspace_root.as_deref()),
            ConfigCommands::Paths => {
                config::paths(workspace_root.as_deref());
                return Ok(true);
            },
            ConfigCommands::Show { .. } => {},
        }
    }

    let resolved = bulwark_config::Config::load(workspace_root.as_deref())?;

    let mut log_config = config_bridge::to_log_config(&resolved.config);
    if cli.verbose {
        "debug".clone_into(&mut log_config.level);
    }
    if let Err(e) = bulwark_telemetry::setup_logging(&log_config) {
        eprintln!("Failed to initialize logging: {e}");
    }

    if let Commands::Config {
        command: ConfigCommands::Show {
            format: show_format,
            section,
        },
    } = &cli.command
    {
        config::show(&resolved, show_format, section.as_deref())?;
        return Ok(true);
    }

    let format = cli.format;
    let runtime = Runtime::open(&resolved.config).await?;
    let outcome = handle(&runtime, cli.command, format).await;
    runtime.close().await?;
    outcome
}

async fn handle(runtime: &Runtime, command: Commands, format: OutputFormat) -> Result<bool> {
    match command {
        Commands::Run {
            manifest,
            principal,
            input,
            approver,
        } => {
            let opts = run::RunOptions {
                manifest: &manifest,
                principal: &principal,
                input: input.as_deref(),
                approver: &approver,
            };
            run::run(runtime, &opts, format).await
        },
        Commands::Caps { command } => {
            handle_caps(runtime, command, format).await?;
            Ok(true)
        },
        Commands::Audit { command } => handle_audit(runtime, command, format).await,
        Commands::Checkpoints {
            command: CheckpointCommands::List,
        } => {
            checkpoints::list(runtime, format).await?;
            Ok(true)
        },
        Commands::Config { .. } => Ok(true),
    }
}

async fn handle_caps(runtime: &Runtime, command: CapsCommands, format: OutputFormat) -> Result<()> {
    match command {
        CapsCommands::Grant {
            principal,
            capability,
            ttl,
            issuer,
        } => caps::grant(runtime, &principal, &capability, ttl, &issuer, format).await,
        CapsCommands::Revoke { grant_id } => caps::revoke(runtime, &grant_id, format).await,
        CapsCommands::List { principal } => {
            caps::list(runtime, principal.as_deref(), format).await
        },
        CapsCommands::Sweep => caps::sweep(runtime, format).await,
    }
}

async fn handle_audit(runtime: &Runtime, command: AuditCommands, format: OutputFormat) -> Result<bool> {
    match command {
        AuditCommands::List {
            from,
            to,
            since,
            until,
            correlation,
        } => {
            let filter = audit::EntryFilter {
                from,
                to,
                since,
                until,
                correlation,
            };
            audit::list(runtime, &filter, format).await?;
            Ok(true)
        },
        AuditCommands::Verify { from, to } => audit::verify(runtime, from, to, format).await,
        AuditCommands::Export { output } => {
            audit::export(runtime, output.as_deref()).await?;
            Ok(true)
        },
    }
}

#[cfg(test)]
mod tests {
    use clap::CommandFactory;

    use super::*;

    #[test]
    fn test_cli_definition_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_parse_run() {
        let cli = Cli::try_parse_from([
            "bulwark",
            "run",
            "action.toml",
            "--principal",
            "agent-7",
            "--input",
            "{}",
            "--format",
            "json",
        ])
        .unwrap();
        assert_eq!(cli.format, OutputFormat::Json);
        let Commands::Run {
            manifest,
            principal,
            input,
            ..
        } = cli.command
        else {
            panic!("expected run");
        };
        assert_eq!(manifest, PathBuf::from("action.toml"));
        assert_eq!(principal, "agent-7");
        assert_eq!(input.as_deref(), Some("{}"));
    }

    #[test]
    fn test_parse_caps_grant_with_ttl() {
        let cli = Cli::try_parse_from([
            "bulwark",
            "caps",
            "grant",
            "agent-7",
            "fs:read:/workspace/**",
            "--ttl",
            "60",
        ])
        .unwrap();
        let Commands::Caps {
            command: CapsCommands::Grant { ttl, issuer, .. },
        } = cli.command
        else {
            panic!("expected caps grant");
        };
        assert_eq!(ttl, Some(60));
        assert_eq!(issuer, "cli");
    }

    #[test]
    fn test_run_requires_principal() {
        assert!(Cli::try_parse_from(["bulwark", "run", "action.toml"]).is_err());
    }
}
