//! Field-level comparison of a desired projection against the remote one.

use serde_json::Value;

/// Dotted paths of fields whose desired value differs from the remote value.
///
/// Only fields present in `desired` are compared, so fields the remote adds
/// on its own never count as drift. Objects are compared field by field,
/// everything else as a whole. Paths listed in `write_only` are skipped: the
/// remote never returns them, so they always count as matching.
pub fn field_diff(desired: &Value, actual: &Value, write_only: &[&str]) -> Vec<String> {
    let mut drift = Vec::new();
    walk("", desired, actual, write_only, &mut drift);
    drift
}

fn walk(prefix: &str, desired: &Value, actual: &Value, write_only: &[&str], drift: &mut Vec<String>) {
    let (Value::Object(want), Value::Object(have)) = (desired, actual) else {
        if desired != actual {
            drift.push(if prefix.is_empty() { ".".to_string() } else { prefix.to_string() });
        }
        return;
    };

    for (field, want_value) in want {
        let path = if prefix.is_empty() {
            field.clone()
        } else {
            format!("{prefix}.{field}")
        };
        if write_only.contains(&path.as_str()) {
            continue;
        }
        match have.get(field) {
            Some(have_value) => walk(&path, want_value, have_value, write_only, drift),
            None if want_value.is_null() => {}
            None => drift.push(path),
        }
    }
}
