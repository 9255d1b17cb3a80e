use super::{ConfigLayer, FieldSources};

/// Merge `overlay` into `base`. Tables combine key by key; any other
/// overlay value, arrays included, wins outright.
pub fn deep_merge(base: &mut toml::Value, overlay: &toml::Value) {
    overlay_onto(base, overlay, "", &mut None);
}

/// [`deep_merge`], noting in `sources` which layer set each leaf.
pub fn deep_merge_tracking(
    base: &mut toml::Value,
    overlay: &toml::Value,
    prefix: &str,
    layer: ConfigLayer,
    sources: &mut FieldSources,
) {
    overlay_onto(base, overlay, prefix, &mut Some((layer, sources)));
}

type Tracker<'a> = Option<(ConfigLayer, &'a mut FieldSources)>;

fn overlay_onto(
    base: &mut toml::Value,
    overlay: &toml::Value,
    at: &str,
    tracker: &mut Tracker<'_>,
) {
    let (toml::Value::Table(into), toml::Value::Table(from)) = (&mut *base, overlay) else {
        *base = overlay.clone();
        if let Some((layer, sources)) = tracker {
            sources.insert(at.to_string(), *layer);
        }
        return;
    };
    for (key, value) in from {
        let path = join(at, key);
        match into.get_mut(key) {
            Some(existing) => overlay_onto(existing, value, &path, tracker),
            None => {
                into.insert(key.clone(), value.clone());
                if let Some((layer, sources)) = tracker {
                    record_leaves(value, &path, *layer, sources);
                }
            },
        }
    }
}

fn join(prefix: &str, key: &str) -> String {
    if prefix.is_empty() {
        key.to_string()
    } else {
        format!("{prefix}.{key}")
    }
}

/// Attribute every leaf under `val` to `layer`.
pub(crate) fn record_leaves(
    val: &toml::Value,
    prefix: &str,
    layer: ConfigLayer,
    sources: &mut FieldSources,
) {
    match val {
        toml::Value::Table(table) => {
            for (key, child) in table {
                record_leaves(child, &join(prefix, key), layer, sources);
            }
        },
        _ => {
            sources.insert(prefix.to_string(), layer);
        },
    }
}
