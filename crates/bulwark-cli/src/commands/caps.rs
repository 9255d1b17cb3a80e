//! Caps command - grant, revoke and list capabilities.

use std::time::Duration;

use anyhow::{Context, Result};
use bulwark_capabilities::{Capability, Grant};
use bulwark_core::{GrantId, PrincipalId};
use colored::Colorize;

use crate::formatter::{OutputFormat, print_json};
use crate::runtime::Runtime;
use crate::theme::Theme;

/// Grant `capability` to `principal`.
pub(crate) async fn grant(
    runtime: &Runtime,
    principal: &str,
    capability: &str,
    ttl_secs: Option<u64>,
    issuer: &str,
    format: OutputFormat,
) -> Result<()> {
    let capability = Capability::parse(capability)
        .with_context(|| format!("invalid capability '{capability}'"))?;
    let grant = runtime
        .admin()
        .grant(
            &PrincipalId::new(principal),
            capability,
            ttl_secs.map(Duration::from_secs),
            issuer,
        )
        .await?;

    match format {
        OutputFormat::Json => print_json(&grant)?,
        OutputFormat::Pretty => println!(
            "{}",
            Theme::success(&format!(
                "Granted {} to {} ({})",
                grant.capability, grant.principal, grant.id
            ))
        ),
    }
    Ok(())
}

/// Revoke a grant by id.
pub(crate) async fn revoke(runtime: &Runtime, grant_id: &str, format: OutputFormat) -> Result<()> {
    let id: GrantId = grant_id
        .parse()
        .with_context(|| format!("invalid grant id '{grant_id}'"))?;
    let tombstone = runtime.admin().revoke(id, "cli").await?;

    match format {
        OutputFormat::Json => print_json(&tombstone)?,
        OutputFormat::Pretty => println!(
            "{}",
            Theme::success(&format!(
                "Revoked {} from {}",
                tombstone.capability, tombstone.principal
            ))
        ),
    }
    Ok(())
}

/// List live grants, for one principal or all of them.
pub(crate) async fn list(
    runtime: &Runtime,
    principal: Option<&str>,
    format: OutputFormat,
) -> Result<()> {
    let principal = principal.map(PrincipalId::new);
    let grants: Vec<Grant> = runtime.admin().list(principal.as_ref(), "cli").await?;

    if format == OutputFormat::Json {
        return print_json(&grants);
    }

    if grants.is_empty() {
        println!("{}", Theme::info("No capability grants"));
        return Ok(());
    }

    println!("\n{}", Theme::header("Capability Grants"));
    println!(
        "{:<10} {:<16} {:<40} {}",
        "GRANT".dimmed(),
        "PRINCIPAL".dimmed(),
        "CAPABILITY".dimmed(),
        "EXPIRES".dimmed()
    );
    println!("{}", Theme::separator());
    for grant in &grants {
        let expires = grant
            .expires_at
            .as_ref()
            .map_or_else(|| "never".dimmed().to_string(), Theme::timestamp);
        println!(
            "{:<10} {:<16} {:<40} {}",
            Theme::short_id(&grant.id.to_string()),
            grant.principal,
            grant.capability,
            expires
        );
    }
    println!();
    Ok(())
}

/// Remove expired grants.
pub(crate) async fn sweep(runtime: &Runtime, format: OutputFormat) -> Result<()> {
    let removed = runtime.admin().sweep_expired().await?;

    match format {
        OutputFormat::Json => print_json(&removed)?,
        OutputFormat::Pretty => {
            if removed.is_empty() {
                println!("{}", Theme::info("No expired grants"));
            } else {
                println!(
                    "{}",
                    Theme::success(&format!("Removed {} expired grants", removed.len()))
                );
                for tombstone in &removed {
                    println!("  - {} ({})", tombstone.capability, tombstone.principal);
                }
            }
        },
    }
    Ok(())
}
