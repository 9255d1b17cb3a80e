use tracing::warn;

use super::path::{get_nested, remove_nested, set_nested};

/// Keep the workspace from raising an integer above the baseline.
pub(super) fn clamp_max_int(
    merged: &mut toml::Value,
    baseline: &toml::Value,
    workspace: &toml::Value,
    path: &[&str],
    field: &str,
) {
    let ceiling = get_nested(baseline, path).and_then(toml::Value::as_integer);
    clamp_to(merged, ceiling, workspace, path, field);
}

/// Like [`clamp_max_int`], but `implied` stands in for a baseline the
/// lower layers leave unset (a mode preset, for instance).
pub(super) fn clamp_max_int_or(
    merged: &mut toml::Value,
    baseline: &toml::Value,
    workspace: &toml::Value,
    path: &[&str],
    field: &str,
    implied: i64,
) {
    let ceiling = get_nested(baseline, path)
        .and_then(toml::Value::as_integer)
        .unwrap_or(implied);
    clamp_to(merged, Some(ceiling), workspace, path, field);
}

fn clamp_to(
    merged: &mut toml::Value,
    ceiling: Option<i64>,
    workspace: &toml::Value,
    path: &[&str],
    field: &str,
) {
    let Some(ceiling) = ceiling else {
        return;
    };
    let Some(requested) = get_nested(workspace, path).and_then(toml::Value::as_integer) else {
        return;
    };
    if requested > ceiling {
        warn!(
            field,
            requested, ceiling, "workspace config cannot raise this value, clamped"
        );
        set_nested(merged, path, toml::Value::Integer(ceiling));
    }
}

/// A mode named in `strictest_first` may only move toward the front.
pub(super) fn enforce_mode_tighten(
    merged: &mut toml::Value,
    baseline: &toml::Value,
    workspace: &toml::Value,
    path: &[&str],
    field: &str,
    strictest_first: &[&str],
) {
    let (Some((base_rank, base_mode)), Some((ws_rank, ws_mode))) = (
        rank(get_nested(baseline, path), strictest_first),
        rank(get_nested(workspace, path), strictest_first),
    ) else {
        return;
    };
    if ws_rank > base_rank {
        warn!(
            field,
            requested = ws_mode,
            kept = base_mode,
            "workspace config cannot loosen the mode, reverted"
        );
        set_nested(merged, path, toml::Value::String(base_mode.to_owned()));
    }
}

fn rank<'a>(value: Option<&'a toml::Value>, order: &[&str]) -> Option<(usize, &'a str)> {
    let name = value.and_then(toml::Value::as_str)?;
    order.iter().position(|m| *m == name).map(|i| (i, name))
}

/// Undo any workspace value for a field only system or user config may set.
pub(super) fn block_workspace_override(
    merged: &mut toml::Value,
    baseline: &toml::Value,
    workspace: &toml::Value,
    path: &[&str],
    field: &str,
) {
    if get_nested(workspace, path).is_none() {
        return;
    }
    warn!(field, "workspace config cannot set this field, ignored");
    match get_nested(baseline, path) {
        Some(kept) => set_nested(merged, path, kept.clone()),
        None => remove_nested(merged, path),
    }
}
