//! Filter compiler: applies a filter specification and pagination to a query.

use super::builder::{Order, Query};
use super::filter::{Filter, FilterOp};

/// Translates filter specifications and query options into a [`Query`].
///
/// Filters are applied in the supplied order, then the modifiers in the fixed
/// sequence order → limit → offset.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct FilterCompiler {
    default_page_size: u64,
}

impl Default for FilterCompiler {
    fn default() -> Self {
        Self::new(Self::DEFAULT_PAGE_SIZE)
    }
}

impl FilterCompiler {
    /// Page size assumed when an offset is given without a limit.
    pub const DEFAULT_PAGE_SIZE: u64 = 10;

    pub fn new(default_page_size: u64) -> Self {
        Self { default_page_size }
    }

    pub fn default_page_size(&self) -> u64 {
        self.default_page_size
    }

    pub fn apply_filter(&self, query: Query, filter: &Filter) -> Query {
        let column = filter.column.as_str();
        let value = filter.value.clone();
        match filter.op {
            FilterOp::Eq => query.eq(column, value),
            FilterOp::Neq => query.neq(column, value),
            FilterOp::Gt => query.gt(column, value),
            FilterOp::Gte => query.gte(column, value),
            FilterOp::Lt => query.lt(column, value),
            FilterOp::Lte => query.lte(column, value),
            FilterOp::Like => query.like(column, value),
            FilterOp::Ilike => query.ilike(column, value),
            FilterOp::In => query.in_list(column, value),
            FilterOp::Contains => query.contains(column, value),
        }
    }

    pub fn apply_filters(&self, query: Query, filters: &[Filter]) -> Query {
        filters
            .iter()
            .fold(query, |query, filter| self.apply_filter(query, filter))
    }

    /// Inclusive row range for offset pagination.
    ///
    /// `None` without an offset, or when the page would be empty.
    pub fn page_range(&self, limit: Option<u64>, offset: Option<u64>) -> Option<(u64, u64)> {
        let offset = offset?;
        let size = limit.unwrap_or(self.default_page_size);
        if size == 0 {
            return None;
        }
        Some((offset, offset.saturating_add(size - 1)))
    }

    pub fn apply_modifiers(
        &self,
        mut query: Query,
        order: Option<&Order>,
        limit: Option<u64>,
        offset: Option<u64>,
    ) -> Query {
        if let Some(order) = order {
            query = query.order(order.clone());
        }
        if let Some(limit) = limit {
            query = query.limit(limit);
        }
        if let Some((from, to)) = self.page_range(limit, offset) {
            query = query.range(from, to);
        }
        query
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::query::Window;
    use proptest::prelude::*;
    use serde_json::json;

    #[test]
    fn dispatches_each_operator_to_its_builder() {
        let compiler = FilterCompiler::default();
        let filters: Vec<Filter> = FilterOp::ALL
            .into_iter()
            .map(|op| Filter::new("c", op, json!(1)))
            .collect();

        let query = compiler.apply_filters(Query::new("books"), &filters);
        let ops: Vec<FilterOp> = query.predicates().iter().map(|p| p.op).collect();
        assert_eq!(ops, FilterOp::ALL);
    }

    #[test]
    fn offset_with_limit_computes_inclusive_range() {
        let compiler = FilterCompiler::default();
        assert_eq!(compiler.page_range(Some(10), Some(20)), Some((20, 29)));
        assert_eq!(compiler.page_range(Some(10), None), None);
    }

    #[test]
    fn offset_without_limit_uses_default_page_size() {
        assert_eq!(FilterCompiler::default().page_range(None, Some(5)), Some((5, 14)));
        assert_eq!(FilterCompiler::new(25).page_range(None, Some(0)), Some((0, 24)));
    }

    #[test]
    fn zero_limit_with_offset_yields_empty_window() {
        let compiler = FilterCompiler::default();
        let query = compiler.apply_modifiers(Query::new("books"), None, Some(0), Some(3));
        assert_eq!(query.window(), Window { offset: 0, limit: Some(0) });
    }

    #[test]
    fn modifiers_apply_order_then_window() {
        let compiler = FilterCompiler::default();
        let query = compiler.apply_modifiers(
            Query::new("books"),
            Some(&Order::desc("created_at")),
            Some(10),
            Some(20),
        );
        assert_eq!(query.order_by(), Some(&Order::desc("created_at")));
        assert_eq!(query.window(), Window { offset: 20, limit: Some(10) });
    }

    proptest! {
        #[test]
        fn range_spans_exactly_the_page(limit in 1u64..500, offset in 0u64..10_000) {
            let (from, to) = FilterCompiler::default().page_range(Some(limit), Some(offset)).unwrap();
            prop_assert_eq!(from, offset);
            prop_assert_eq!(to - from + 1, limit);
        }
    }
}
