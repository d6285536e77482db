use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

use crate::change::{ChangeError, ChangeEvent};

/// A change event together with the table it happened in.
///
/// This is the unit a backing store publishes. Tenant scoping is not carried
/// here: listeners filter on the row's own columns (see
/// [`ServerFilter`](crate::ServerFilter)).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChangeEnvelope {
    table: String,
    commit_timestamp: DateTime<Utc>,
    event: ChangeEvent,
}

impl ChangeEnvelope {
    pub fn new(table: impl Into<String>, commit_timestamp: DateTime<Utc>, event: ChangeEvent) -> Self {
        Self {
            table: table.into(),
            commit_timestamp,
            event,
        }
    }

    pub fn table(&self) -> &str {
        &self.table
    }

    pub fn commit_timestamp(&self) -> DateTime<Utc> {
        self.commit_timestamp
    }

    pub fn event(&self) -> &ChangeEvent {
        &self.event
    }

    pub fn into_event(self) -> ChangeEvent {
        self.event
    }

    /// Value of `column` in the newest image of the row.
    pub fn column_value(&self, column: &str) -> Option<&JsonValue> {
        self.event
            .new_record()
            .and_then(|r| r.get(column))
            .or_else(|| self.event.old_record().and_then(|r| r.get(column)))
    }

    /// Decode a store notification payload.
    ///
    /// The table comes from the payload's `table` field, falling back to
    /// `table_hint`; a missing `commit_timestamp` defaults to now.
    pub fn from_payload(table_hint: Option<&str>, payload: &JsonValue) -> Result<Self, ChangeError> {
        let table = payload
            .get("table")
            .and_then(JsonValue::as_str)
            .or(table_hint)
            .ok_or(ChangeError::MissingField("table"))?;

        let commit_timestamp = payload
            .get("commit_timestamp")
            .and_then(JsonValue::as_str)
            .and_then(|s| DateTime::parse_from_rfc3339(s).ok())
            .map(|t| t.with_timezone(&Utc))
            .unwrap_or_else(Utc::now);

        Ok(Self::new(table, commit_timestamp, ChangeEvent::from_payload(payload)?))
    }
}
