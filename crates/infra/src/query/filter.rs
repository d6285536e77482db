use core::str::FromStr;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

use bookbuddy_core::{DataError, DataResult};

/// Filter operator vocabulary.
///
/// The set is closed: an operator outside it cannot be represented, and
/// parsing an unknown token fails with [`DataError::UnknownOperator`].
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FilterOp {
    Eq,
    Neq,
    Gt,
    Gte,
    Lt,
    Lte,
    /// Case-sensitive pattern match (`%` any run, `_` one character).
    Like,
    /// Case-insensitive pattern match.
    Ilike,
    /// Set membership; the value is a JSON array.
    In,
    /// JSON containment (array or object includes the value).
    Contains,
}

impl FilterOp {
    pub const ALL: [FilterOp; 10] = [
        FilterOp::Eq,
        FilterOp::Neq,
        FilterOp::Gt,
        FilterOp::Gte,
        FilterOp::Lt,
        FilterOp::Lte,
        FilterOp::Like,
        FilterOp::Ilike,
        FilterOp::In,
        FilterOp::Contains,
    ];

    pub const fn as_str(&self) -> &'static str {
        match self {
            FilterOp::Eq => "eq",
            FilterOp::Neq => "neq",
            FilterOp::Gt => "gt",
            FilterOp::Gte => "gte",
            FilterOp::Lt => "lt",
            FilterOp::Lte => "lte",
            FilterOp::Like => "like",
            FilterOp::Ilike => "ilike",
            FilterOp::In => "in",
            FilterOp::Contains => "contains",
        }
    }
}

impl core::fmt::Display for FilterOp {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for FilterOp {
    type Err = DataError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|op| op.as_str() == s)
            .ok_or_else(|| DataError::UnknownOperator(s.to_string()))
    }
}

/// One `(column, operator, value)` triple of a filter specification.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Filter {
    pub column: String,
    pub op: FilterOp,
    pub value: JsonValue,
}

impl Filter {
    pub fn new(column: impl Into<String>, op: FilterOp, value: impl Into<JsonValue>) -> Self {
        Self {
            column: column.into(),
            op,
            value: value.into(),
        }
    }

    /// Build a filter from an operator given as text.
    pub fn parse(column: impl Into<String>, op: &str, value: impl Into<JsonValue>) -> DataResult<Self> {
        Ok(Self::new(column, op.parse()?, value))
    }

    pub fn eq(column: impl Into<String>, value: impl Into<JsonValue>) -> Self {
        Self::new(column, FilterOp::Eq, value)
    }

    pub fn neq(column: impl Into<String>, value: impl Into<JsonValue>) -> Self {
        Self::new(column, FilterOp::Neq, value)
    }

    pub fn gt(column: impl Into<String>, value: impl Into<JsonValue>) -> Self {
        Self::new(column, FilterOp::Gt, value)
    }

    pub fn gte(column: impl Into<String>, value: impl Into<JsonValue>) -> Self {
        Self::new(column, FilterOp::Gte, value)
    }

    pub fn lt(column: impl Into<String>, value: impl Into<JsonValue>) -> Self {
        Self::new(column, FilterOp::Lt, value)
    }

    pub fn lte(column: impl Into<String>, value: impl Into<JsonValue>) -> Self {
        Self::new(column, FilterOp::Lte, value)
    }

    pub fn like(column: impl Into<String>, pattern: impl Into<String>) -> Self {
        Self::new(column, FilterOp::Like, pattern.into())
    }

    pub fn ilike(column: impl Into<String>, pattern: impl Into<String>) -> Self {
        Self::new(column, FilterOp::Ilike, pattern.into())
    }

    pub fn in_list<I, V>(column: impl Into<String>, values: I) -> Self
    where
        I: IntoIterator<Item = V>,
        V: Into<JsonValue>,
    {
        let values: Vec<JsonValue> = values.into_iter().map(Into::into).collect();
        Self::new(column, FilterOp::In, JsonValue::Array(values))
    }

    pub fn contains(column: impl Into<String>, value: impl Into<JsonValue>) -> Self {
        Self::new(column, FilterOp::Contains, value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn every_operator_parses_from_its_token() {
        for op in FilterOp::ALL {
            assert_eq!(op.as_str().parse::<FilterOp>().unwrap(), op);
        }
    }

    #[test]
    fn unknown_operator_fails_loudly() {
        let err = Filter::parse("pages", "between", json!([1, 2])).unwrap_err();
        assert_eq!(err, DataError::UnknownOperator("between".into()));
        assert!(err.is_programming_error());
    }

    #[test]
    fn in_list_builds_an_array_value() {
        let filter = Filter::in_list("status", ["reading", "finished"]);
        assert_eq!(filter.op, FilterOp::In);
        assert_eq!(filter.value, json!(["reading", "finished"]));
    }

    #[test]
    fn serde_uses_lowercase_tokens() {
        let filter: Filter =
            serde_json::from_value(json!({"column": "title", "op": "ilike", "value": "%dune%"})).unwrap();
        assert_eq!(filter, Filter::ilike("title", "%dune%"));
    }
}
