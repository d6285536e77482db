//! Query handle: the composed predicate set a backing store executes.

use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

use bookbuddy_core::Record;

use super::filter::{Filter, FilterOp};

/// Column projection of returned rows.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum Projection {
    #[default]
    All,
    Columns(Vec<String>),
}

impl Projection {
    pub fn columns<I, S>(columns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::Columns(columns.into_iter().map(Into::into).collect())
    }

    /// Parse a select list such as `"id, title"`; `"*"` and `""` select everything.
    pub fn parse(spec: &str) -> Self {
        let columns: Vec<String> = spec
            .split(',')
            .map(str::trim)
            .filter(|c| !c.is_empty())
            .map(str::to_string)
            .collect();

        if columns.is_empty() || columns.iter().any(|c| c == "*") {
            Self::All
        } else {
            Self::Columns(columns)
        }
    }

    pub fn is_all(&self) -> bool {
        matches!(self, Self::All)
    }

    /// Keep only the projected columns of `record`.
    pub fn apply(&self, record: Record) -> Record {
        match self {
            Self::All => record,
            Self::Columns(columns) => {
                let mut record = record;
                columns
                    .iter()
                    .filter_map(|c| record.remove(c).map(|v| (c.clone(), v)))
                    .collect()
            }
        }
    }
}

/// Single-column sort.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Order {
    pub column: String,
    pub ascending: bool,
}

impl Order {
    pub fn asc(column: impl Into<String>) -> Self {
        Self {
            column: column.into(),
            ascending: true,
        }
    }

    pub fn desc(column: impl Into<String>) -> Self {
        Self {
            column: column.into(),
            ascending: false,
        }
    }
}

/// Effective offset and row cap of a query.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Default)]
pub struct Window {
    pub offset: u64,
    pub limit: Option<u64>,
}

/// A select/update/delete scope against one table.
///
/// Predicates are kept in the order they were added and combine with AND.
#[derive(Debug, Clone, PartialEq)]
pub struct Query {
    table: String,
    projection: Projection,
    predicates: Vec<Filter>,
    order: Option<Order>,
    limit: Option<u64>,
    range: Option<(u64, u64)>,
    count: bool,
    head: bool,
}

impl Query {
    pub fn new(table: impl Into<String>) -> Self {
        Self {
            table: table.into(),
            projection: Projection::All,
            predicates: Vec::new(),
            order: None,
            limit: None,
            range: None,
            count: false,
            head: false,
        }
    }

    pub fn select(mut self, projection: Projection) -> Self {
        self.projection = projection;
        self
    }

    /// Also report the total number of matching rows.
    pub fn with_count(mut self) -> Self {
        self.count = true;
        self
    }

    /// Count only; return no rows.
    pub fn head(mut self) -> Self {
        self.count = true;
        self.head = true;
        self
    }

    fn push(mut self, column: &str, op: FilterOp, value: JsonValue) -> Self {
        self.predicates.push(Filter::new(column, op, value));
        self
    }

    pub fn eq(self, column: &str, value: JsonValue) -> Self {
        self.push(column, FilterOp::Eq, value)
    }

    pub fn neq(self, column: &str, value: JsonValue) -> Self {
        self.push(column, FilterOp::Neq, value)
    }

    pub fn gt(self, column: &str, value: JsonValue) -> Self {
        self.push(column, FilterOp::Gt, value)
    }

    pub fn gte(self, column: &str, value: JsonValue) -> Self {
        self.push(column, FilterOp::Gte, value)
    }

    pub fn lt(self, column: &str, value: JsonValue) -> Self {
        self.push(column, FilterOp::Lt, value)
    }

    pub fn lte(self, column: &str, value: JsonValue) -> Self {
        self.push(column, FilterOp::Lte, value)
    }

    pub fn like(self, column: &str, pattern: JsonValue) -> Self {
        self.push(column, FilterOp::Like, pattern)
    }

    pub fn ilike(self, column: &str, pattern: JsonValue) -> Self {
        self.push(column, FilterOp::Ilike, pattern)
    }

    /// Membership in `values`; a non-array value is a one-element set.
    pub fn in_list(self, column: &str, values: JsonValue) -> Self {
        let values = match values {
            JsonValue::Array(_) => values,
            single => JsonValue::Array(vec![single]),
        };
        self.push(column, FilterOp::In, values)
    }

    pub fn contains(self, column: &str, value: JsonValue) -> Self {
        self.push(column, FilterOp::Contains, value)
    }

    pub fn order(mut self, order: Order) -> Self {
        self.order = Some(order);
        self
    }

    pub fn limit(mut self, limit: u64) -> Self {
        self.limit = Some(limit);
        self
    }

    /// Inclusive row range `[from, to]`; overrides `limit`.
    pub fn range(mut self, from: u64, to: u64) -> Self {
        self.range = Some((from, to));
        self
    }

    pub fn table(&self) -> &str {
        &self.table
    }

    pub fn projection(&self) -> &Projection {
        &self.projection
    }

    pub fn predicates(&self) -> &[Filter] {
        &self.predicates
    }

    pub fn order_by(&self) -> Option<&Order> {
        self.order.as_ref()
    }

    pub fn counts(&self) -> bool {
        self.count
    }

    pub fn is_head(&self) -> bool {
        self.head
    }

    pub fn window(&self) -> Window {
        match self.range {
            Some((from, to)) if to >= from => Window {
                offset: from,
                limit: Some(to - from + 1),
            },
            Some((from, _)) => Window {
                offset: from,
                limit: Some(0),
            },
            None => Window {
                offset: 0,
                limit: self.limit,
            },
        }
    }
}
