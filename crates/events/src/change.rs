//! Normalized row-change events.

use core::str::FromStr;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use thiserror::Error;

use bookbuddy_core::Record;

/// Errors raised while decoding change payloads or server filters.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ChangeError {
    #[error("change payload is missing `{0}`")]
    MissingField(&'static str),

    #[error("unknown change type `{0}`")]
    UnknownType(String),

    #[error("malformed server filter `{0}`")]
    MalformedFilter(String),
}

/// Which mutations a subscription wants to observe.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum ChangeKind {
    #[serde(rename = "INSERT")]
    Insert,
    #[serde(rename = "UPDATE")]
    Update,
    #[serde(rename = "DELETE")]
    Delete,
    #[default]
    #[serde(rename = "*")]
    All,
}

impl ChangeKind {
    pub fn matches(&self, event: &ChangeEvent) -> bool {
        match self {
            ChangeKind::All => true,
            kind => *kind == event.kind(),
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ChangeKind::Insert => "INSERT",
            ChangeKind::Update => "UPDATE",
            ChangeKind::Delete => "DELETE",
            ChangeKind::All => "*",
        }
    }
}

impl FromStr for ChangeKind {
    type Err = ChangeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "INSERT" => Ok(ChangeKind::Insert),
            "UPDATE" => Ok(ChangeKind::Update),
            "DELETE" => Ok(ChangeKind::Delete),
            "*" | "ALL" => Ok(ChangeKind::All),
            _ => Err(ChangeError::UnknownType(s.to_string())),
        }
    }
}

/// A committed mutation of one row.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ChangeEvent {
    Inserted { new: Record },
    /// `old` is absent when the store does not publish the previous image.
    Updated { new: Record, old: Option<Record> },
    /// `old` may only carry the key columns, depending on the store.
    Deleted { old: Record },
}

impl ChangeEvent {
    pub fn kind(&self) -> ChangeKind {
        match self {
            ChangeEvent::Inserted { .. } => ChangeKind::Insert,
            ChangeEvent::Updated { .. } => ChangeKind::Update,
            ChangeEvent::Deleted { .. } => ChangeKind::Delete,
        }
    }

    pub fn new_record(&self) -> Option<&Record> {
        match self {
            ChangeEvent::Inserted { new } | ChangeEvent::Updated { new, .. } => Some(new),
            ChangeEvent::Deleted { .. } => None,
        }
    }

    pub fn old_record(&self) -> Option<&Record> {
        match self {
            ChangeEvent::Inserted { .. } => None,
            ChangeEvent::Updated { old, .. } => old.as_ref(),
            ChangeEvent::Deleted { old } => Some(old),
        }
    }

    /// Normalize a store-specific change payload.
    ///
    /// Accepts both the trigger shape (`type`, `record`, `old_record`) and the
    /// client shape (`eventType`, `new`, `old`). Empty objects count as absent.
    pub fn from_payload(payload: &JsonValue) -> Result<Self, ChangeError> {
        let kind = first_str(payload, &["type", "eventType", "event"])
            .ok_or(ChangeError::MissingField("type"))?;
        let new = first_record(payload, &["record", "new"]);
        let old = first_record(payload, &["old_record", "old"]);

        match kind.parse::<ChangeKind>()? {
            ChangeKind::Insert => Ok(ChangeEvent::Inserted {
                new: new.ok_or(ChangeError::MissingField("record"))?,
            }),
            ChangeKind::Update => Ok(ChangeEvent::Updated {
                new: new.ok_or(ChangeError::MissingField("record"))?,
                old,
            }),
            ChangeKind::Delete => Ok(ChangeEvent::Deleted {
                old: old.ok_or(ChangeError::MissingField("old_record"))?,
            }),
            ChangeKind::All => Err(ChangeError::UnknownType(kind.to_string())),
        }
    }
}

fn first_str<'a>(payload: &'a JsonValue, keys: &[&str]) -> Option<&'a str> {
    keys.iter().find_map(|k| payload.get(*k).and_then(JsonValue::as_str))
}

fn first_record(payload: &JsonValue, keys: &[&str]) -> Option<Record> {
    keys.iter().find_map(|k| match payload.get(*k) {
        Some(JsonValue::Object(map)) if !map.is_empty() => Some(map.clone()),
        _ => None,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn trigger_shape_is_normalized() {
        let payload = json!({
            "type": "UPDATE",
            "record": {"id": "1", "title": "new"},
            "old_record": {"id": "1", "title": "old"},
        });

        let event = ChangeEvent::from_payload(&payload).unwrap();
        assert_eq!(event.kind(), ChangeKind::Update);
        assert_eq!(event.new_record().unwrap()["title"], "new");
        assert_eq!(event.old_record().unwrap()["title"], "old");
    }

    #[test]
    fn client_shape_is_normalized_and_empty_new_is_absent() {
        let payload = json!({
            "eventType": "delete",
            "new": {},
            "old": {"id": "9"},
        });

        let event = ChangeEvent::from_payload(&payload).unwrap();
        assert_eq!(event, ChangeEvent::Deleted { old: json!({"id": "9"}).as_object().unwrap().clone() });
        assert!(event.new_record().is_none());
    }

    #[test]
    fn insert_without_record_is_rejected() {
        let err = ChangeEvent::from_payload(&json!({"type": "INSERT"})).unwrap_err();
        assert_eq!(err, ChangeError::MissingField("record"));
    }

    #[test]
    fn unknown_type_is_rejected() {
        let err = ChangeEvent::from_payload(&json!({"type": "TRUNCATE"})).unwrap_err();
        assert_eq!(err, ChangeError::UnknownType("TRUNCATE".into()));
    }

    #[test]
    fn kind_filter_matches() {
        let insert = ChangeEvent::Inserted { new: Record::new() };
        assert!(ChangeKind::All.matches(&insert));
        assert!(ChangeKind::Insert.matches(&insert));
        assert!(!ChangeKind::Delete.matches(&insert));
    }
}
