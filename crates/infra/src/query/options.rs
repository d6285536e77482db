//! Per-call options and result pages.

use serde::{Deserialize, Serialize};

use bookbuddy_core::{DataError, DataResult, Record};

use super::builder::{Order, Projection};

/// Options bag shared by every engine operation.
///
/// Built per call and discarded after use.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct QueryOptions {
    /// Columns returned by reads and by writes that return rows.
    pub select: Projection,
    /// Column used by the by-id operations.
    pub id_column: String,
    /// Bypass tenant injection (shared data, cross-tenant administration).
    pub skip_tenant_filter: bool,
    /// Comma-separated conflict target for upserts; defaults to `id_column`.
    pub on_conflict: Option<String>,
    pub order: Option<Order>,
    pub limit: Option<u64>,
    pub offset: Option<u64>,
}

impl Default for QueryOptions {
    fn default() -> Self {
        Self {
            select: Projection::All,
            id_column: Self::DEFAULT_ID_COLUMN.to_string(),
            skip_tenant_filter: false,
            on_conflict: None,
            order: None,
            limit: None,
            offset: None,
        }
    }
}

impl QueryOptions {
    pub const DEFAULT_ID_COLUMN: &'static str = "id";

    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_select(mut self, spec: &str) -> Self {
        self.select = Projection::parse(spec);
        self
    }

    pub fn with_id_column(mut self, column: impl Into<String>) -> Self {
        self.id_column = column.into();
        self
    }

    pub fn with_skip_tenant_filter(mut self) -> Self {
        self.skip_tenant_filter = true;
        self
    }

    pub fn with_on_conflict(mut self, target: impl Into<String>) -> Self {
        self.on_conflict = Some(target.into());
        self
    }

    pub fn with_order(mut self, order: Order) -> Self {
        self.order = Some(order);
        self
    }

    pub fn with_limit(mut self, limit: u64) -> Self {
        self.limit = Some(limit);
        self
    }

    pub fn with_offset(mut self, offset: u64) -> Self {
        self.offset = Some(offset);
        self
    }

    /// The upsert conflict target (`on_conflict`, falling back to `id_column`).
    pub fn conflict_target(&self) -> DataResult<ConflictTarget> {
        ConflictTarget::parse(self.on_conflict.as_deref().unwrap_or(&self.id_column))
    }
}

/// Columns of a unique key used to resolve upsert conflicts.
///
/// Not validated against the schema; choosing a real unique key is the
/// caller's responsibility.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConflictTarget(Vec<String>);

impl ConflictTarget {
    pub fn parse(spec: &str) -> DataResult<Self> {
        let columns: Vec<String> = spec
            .split(',')
            .map(str::trim)
            .filter(|c| !c.is_empty())
            .map(str::to_string)
            .collect();

        if columns.is_empty() {
            return Err(DataError::invalid_options("empty conflict target"));
        }
        Ok(Self(columns))
    }

    pub fn columns(&self) -> &[String] {
        &self.0
    }
}

impl core::fmt::Display for ConflictTarget {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(&self.0.join(","))
    }
}

/// Rows returned by a multi-record operation.
///
/// For reads `count` is the total number of matching rows across all pages;
/// for bulk writes it is the number of affected rows.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Page {
    pub records: Vec<Record>,
    pub count: u64,
}

impl Page {
    pub fn new(records: Vec<Record>, count: u64) -> Self {
        Self { records, count }
    }

    /// A page whose count is its own length.
    pub fn from_records(records: Vec<Record>) -> Self {
        let count = records.len() as u64;
        Self { records, count }
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn into_records(self) -> Vec<Record> {
        self.records
    }
}
