//! Data layer error model.

use std::time::Duration;

use thiserror::Error;

/// Result type used across the data layer.
pub type DataResult<T> = Result<T, DataError>;

/// Data-layer error.
///
/// Every expected failure (zero matches, constraint violations, connectivity)
/// is a value of this type so callers can branch on it without a surrounding
/// panic handler. The `InvalidTable`, `UnknownOperator` and `InvalidOptions`
/// variants signal misuse of the API surface rather than a runtime condition;
/// see [`DataError::is_programming_error`].
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum DataError {
    /// A single-row operation matched no row after tenant scoping.
    #[error("no row in `{table}` matched {id}")]
    NotFound { table: String, id: String },

    /// A single-row lookup matched more than one row.
    #[error("{matched} rows in `{table}` matched a single-row lookup")]
    Ambiguous { table: String, matched: usize },

    /// A uniqueness conflict (duplicate key, existing object).
    #[error("conflict: {0}")]
    Conflict(String),

    /// A constraint other than uniqueness was violated.
    #[error("constraint violated: {0}")]
    Constraint(String),

    /// Any other backing-store failure, passed through with its detail.
    #[error("backing store error: {0}")]
    Backend(String),

    /// The backing store could not be reached.
    #[error("connection error: {0}")]
    Connection(String),

    /// A payload could not be encoded or decoded.
    #[error("serialization failed: {0}")]
    Serialization(String),

    /// The call did not complete within the configured timeout.
    #[error("call timed out after {0:?}")]
    Timeout(Duration),

    /// The backing store does not support the requested capability.
    #[error("unsupported: {0}")]
    Unsupported(String),

    /// A table name was missing or malformed.
    #[error("invalid table: {0}")]
    InvalidTable(String),

    /// A filter operator token is not part of the vocabulary.
    #[error("unknown filter operator `{0}`")]
    UnknownOperator(String),

    /// Query options or configuration values were malformed.
    #[error("invalid options: {0}")]
    InvalidOptions(String),

    /// An identifier failed to parse.
    #[error("invalid identifier: {0}")]
    InvalidId(String),
}

impl DataError {
    pub fn not_found(table: impl Into<String>, id: impl Into<String>) -> Self {
        Self::NotFound {
            table: table.into(),
            id: id.into(),
        }
    }

    pub fn ambiguous(table: impl Into<String>, matched: usize) -> Self {
        Self::Ambiguous {
            table: table.into(),
            matched,
        }
    }

    pub fn backend(msg: impl Into<String>) -> Self {
        Self::Backend(msg.into())
    }

    pub fn conflict(msg: impl Into<String>) -> Self {
        Self::Conflict(msg.into())
    }

    pub fn invalid_table(msg: impl Into<String>) -> Self {
        Self::InvalidTable(msg.into())
    }

    pub fn invalid_options(msg: impl Into<String>) -> Self {
        Self::InvalidOptions(msg.into())
    }

    /// `true` for zero-match results of single-row operations.
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }

    /// `true` when retrying the same call may succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Timeout(_) | Self::Connection(_))
    }

    /// `true` when the error indicates a caller bug rather than a runtime condition.
    pub fn is_programming_error(&self) -> bool {
        matches!(
            self,
            Self::InvalidTable(_) | Self::UnknownOperator(_) | Self::InvalidOptions(_)
        )
    }
}
