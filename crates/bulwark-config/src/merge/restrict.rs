use super::enforce::{
    block_workspace_override, clamp_max_int, clamp_max_int_or, enforce_mode_tighten,
};
use super::path::get_nested;
use crate::types::Mode;

/// Enforce that the workspace layer can only tighten policy.
///
/// `baseline` is the merged value before the workspace layer was applied, so
/// enforcement holds even when no user file exists. Call after merging the
/// workspace layer and before deserializing.
pub fn enforce_restrictions(
    merged: &mut toml::Value,
    baseline: &toml::Value,
    workspace_layer: &toml::Value,
) {
    // Mode: safe < supervised < autonomous.
    enforce_mode_tighten(
        merged,
        baseline,
        workspace_layer,
        &["deployment", "mode"],
        "deployment.mode",
        &Mode::ORDERED,
    );

    // Threshold, floor and approval window default to the baseline mode's
    // preset when no layer below the workspace sets them.
    let preset = get_nested(baseline, &["deployment", "mode"])
        .and_then(toml::Value::as_str)
        .and_then(Mode::parse)
        .unwrap_or_default()
        .preset();

    clamp_max_int_or(
        merged,
        baseline,
        workspace_layer,
        &["approval", "threshold"],
        "approval.threshold",
        i64::from(preset.approval_threshold),
    );
    clamp_max_int_or(
        merged,
        baseline,
        workspace_layer,
        &["checkpoint", "floor"],
        "checkpoint.floor",
        i64::from(preset.checkpoint_floor),
    );
    clamp_max_int_or(
        merged,
        baseline,
        workspace_layer,
        &["approval", "timeout_secs"],
        "approval.timeout_secs",
        i64::try_from(preset.approval_timeout_secs).unwrap_or(i64::MAX),
    );

    // Container threshold: can only move down. Unset means never, so any
    // workspace value is a tightening.
    clamp_max_int(
        merged,
        baseline,
        workspace_layer,
        &["isolation", "container_at_risk"],
        "isolation.container_at_risk",
    );

    // Manifest ceilings: can only decrease.
    for field in ["max_timeout_secs", "max_memory_mb", "max_cpu_secs"] {
        clamp_max_int(
            merged,
            baseline,
            workspace_layer,
            &["limits", field],
            &format!("limits.{field}"),
        );
    }

    // A repository must not choose which binary runs actions or where
    // grants and audit records are stored.
    block_workspace_override(
        merged,
        baseline,
        workspace_layer,
        &["isolation", "container_runtime"],
        "isolation.container_runtime",
    );
    block_workspace_override(
        merged,
        baseline,
        workspace_layer,
        &["storage", "data_dir"],
        "storage.data_dir",
    );
}
