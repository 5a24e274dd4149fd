//! PII stripping and length limits applied before events are queued.

use serde_json::Value;

use crate::models::Metadata;

/// Metadata keys containing any of these (case-insensitive) are removed.
pub const PII_DENYLIST: [&str; 8] = [
    "email", "name", "phone", "ssn", "password", "token", "key", "secret",
];

/// Longest string kept in metadata, marker included.
pub const MAX_METADATA_STRING: usize = 1000;

/// Longest error stack kept, marker included.
pub const MAX_STACK_LENGTH: usize = 5000;

const TRUNCATION_MARKER: &str = "...";

/// Drop denylisted keys and truncate strings, at every nesting depth.
pub fn sanitize_metadata(metadata: Metadata) -> Metadata {
    metadata
        .into_iter()
        .filter(|(key, _)| !is_pii_key(key))
        .map(|(key, value)| (key, sanitize_value(value)))
        .collect()
}

fn sanitize_value(value: Value) -> Value {
    match value {
        Value::String(s) => Value::String(truncate(&s, MAX_METADATA_STRING)),
        Value::Object(map) => Value::Object(sanitize_metadata(map)),
        Value::Array(items) => Value::Array(items.into_iter().map(sanitize_value).collect()),
        other => other,
    }
}

pub fn is_pii_key(key: &str) -> bool {
    let lowered = key.to_lowercase();
    PII_DENYLIST.iter().any(|needle| lowered.contains(needle))
}

/// Cut `s` to at most `max` characters, ending in `...` when shortened.
pub fn truncate(s: &str, max: usize) -> String {
    if s.chars().count() <= max {
        return s.to_string();
    }
    let keep = max.saturating_sub(TRUNCATION_MARKER.len());
    let mut out: String = s.chars().take(keep).collect();
    out.push_str(TRUNCATION_MARKER);
    out
}

pub fn truncate_stack(stack: &str) -> String {
    truncate(stack, MAX_STACK_LENGTH)
}
