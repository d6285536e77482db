//! Untyped records as exchanged with the backing store.

use serde_json::Value as JsonValue;

/// A row: column name to JSON value.
pub type Record = serde_json::Map<String, JsonValue>;

/// Render a JSON value the way it appears in filter expressions and error
/// messages: strings unquoted, everything else as compact JSON.
pub fn render_value(value: &JsonValue) -> String {
    match value {
        JsonValue::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// Build a [`Record`] from a JSON value, rejecting anything but an object.
pub fn record_from_value(value: JsonValue) -> Option<Record> {
    match value {
        JsonValue::Object(map) => Some(map),
        _ => None,
    }
}
