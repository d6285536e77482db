//! Server-side change filters of the form `<column>=eq.<value>`.

use core::str::FromStr;

use bookbuddy_core::render_value;

use crate::change::ChangeError;
use crate::envelope::ChangeEnvelope;

/// Equality filter evaluated by the store before a change is delivered.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ServerFilter {
    column: String,
    value: String,
}

impl ServerFilter {
    pub fn eq(column: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            column: column.into(),
            value: value.into(),
        }
    }

    pub fn column(&self) -> &str {
        &self.column
    }

    pub fn value(&self) -> &str {
        &self.value
    }

    /// A change passes when the row's newest image carries the filtered value.
    pub fn matches(&self, envelope: &ChangeEnvelope) -> bool {
        envelope
            .column_value(&self.column)
            .is_some_and(|v| render_value(v) == self.value)
    }
}

impl core::fmt::Display for ServerFilter {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "{}=eq.{}", self.column, self.value)
    }
}

impl FromStr for ServerFilter {
    type Err = ChangeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let malformed = || ChangeError::MalformedFilter(s.to_string());
        let (column, rest) = s.split_once('=').ok_or_else(malformed)?;
        let value = rest.strip_prefix("eq.").ok_or_else(malformed)?;
        if column.is_empty() {
            return Err(malformed());
        }
        Ok(Self::eq(column, value))
    }
}
