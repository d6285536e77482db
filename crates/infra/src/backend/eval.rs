//! Predicate evaluation over in-memory records, with SQL-like semantics.
//!
//! - A missing column reads as `NULL`.
//! - Comparisons against `NULL` are false, except `eq null` (`IS NULL`) and
//!   `neq null` (`IS NOT NULL`).
//! - Values compare like `jsonb`: numbers numerically (`1 = 1.0`), strings
//!   and booleans only with their own type. `"1"` never equals `1`; ordering
//!   comparisons across types are false.
//! - `like`/`ilike` support `%`, `_` and backslash escapes.
//! - `contains` is JSON containment (`@>`).

use std::cmp::Ordering;

use serde_json::Value as JsonValue;

use bookbuddy_core::{Record, render_value};

use crate::query::{Filter, FilterOp, Order};

static NULL: JsonValue = JsonValue::Null;

fn column<'r>(record: &'r Record, name: &str) -> &'r JsonValue {
    record.get(name).unwrap_or(&NULL)
}

/// `true` when `record` satisfies every predicate.
pub fn matches_all(record: &Record, predicates: &[Filter]) -> bool {
    predicates.iter().all(|p| matches(record, p))
}

pub fn matches(record: &Record, filter: &Filter) -> bool {
    let actual = column(record, &filter.column);
    let expected = &filter.value;

    match filter.op {
        FilterOp::Eq if expected.is_null() => actual.is_null(),
        FilterOp::Neq if expected.is_null() => !actual.is_null(),
        _ if actual.is_null() => false,
        FilterOp::Eq => values_equal(actual, expected),
        FilterOp::Neq => !values_equal(actual, expected),
        FilterOp::Gt => compare(actual, expected) == Some(Ordering::Greater),
        FilterOp::Gte => matches!(compare(actual, expected), Some(Ordering::Greater | Ordering::Equal)),
        FilterOp::Lt => compare(actual, expected) == Some(Ordering::Less),
        FilterOp::Lte => matches!(compare(actual, expected), Some(Ordering::Less | Ordering::Equal)),
        FilterOp::Like => like(expected, actual, false),
        FilterOp::Ilike => like(expected, actual, true),
        FilterOp::In => match expected {
            JsonValue::Array(values) => values.iter().any(|v| values_equal(actual, v)),
            single => values_equal(actual, single),
        },
        FilterOp::Contains => contains(actual, expected),
    }
}

/// `jsonb` equality: numbers by value, everything else by type and value.
pub fn values_equal(a: &JsonValue, b: &JsonValue) -> bool {
    match (a, b) {
        (JsonValue::Number(x), JsonValue::Number(y)) => x.as_f64() == y.as_f64(),
        _ => a == b,
    }
}

/// Ordering of two non-null scalars of the same type; `None` otherwise.
pub fn compare(a: &JsonValue, b: &JsonValue) -> Option<Ordering> {
    match (a, b) {
        (JsonValue::Number(x), JsonValue::Number(y)) => x.as_f64()?.partial_cmp(&y.as_f64()?),
        (JsonValue::String(x), JsonValue::String(y)) => Some(x.cmp(y)),
        (JsonValue::Bool(x), JsonValue::Bool(y)) => Some(x.cmp(y)),
        _ => None,
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Token {
    AnyRun,
    AnyOne,
    Literal(char),
}

fn tokenize(pattern: &str) -> Vec<Token> {
    let mut tokens = Vec::with_capacity(pattern.len());
    let mut chars = pattern.chars();
    while let Some(c) = chars.next() {
        tokens.push(match c {
            '%' => Token::AnyRun,
            '_' => Token::AnyOne,
            '\\' => Token::Literal(chars.next().unwrap_or('\\')),
            other => Token::Literal(other),
        });
    }
    tokens
}

fn like(pattern: &JsonValue, actual: &JsonValue, case_insensitive: bool) -> bool {
    let JsonValue::String(pattern) = pattern else {
        return false;
    };
    let text = render_value(actual);

    let (pattern, text) = if case_insensitive {
        (pattern.to_lowercase(), text.to_lowercase())
    } else {
        (pattern.clone(), text)
    };

    let tokens = tokenize(&pattern);
    let text: Vec<char> = text.chars().collect();
    like_tokens(&tokens, &text)
}

// Greedy matcher with backtracking to the most recent `%`.
fn like_tokens(tokens: &[Token], text: &[char]) -> bool {
    let (mut t, mut s) = (0, 0);
    let mut backtrack: Option<(usize, usize)> = None;

    while s < text.len() {
        match tokens.get(t) {
            Some(Token::AnyRun) => {
                backtrack = Some((t, s));
                t += 1;
            }
            Some(Token::AnyOne) => {
                t += 1;
                s += 1;
            }
            Some(Token::Literal(c)) if *c == text[s] => {
                t += 1;
                s += 1;
            }
            _ => match backtrack {
                Some((bt, bs)) => {
                    t = bt + 1;
                    s = bs + 1;
                    backtrack = Some((bt, bs + 1));
                }
                None => return false,
            },
        }
    }

    tokens[t..].iter().all(|tok| *tok == Token::AnyRun)
}

/// JSON containment: `haystack @> needle`.
pub fn contains(haystack: &JsonValue, needle: &JsonValue) -> bool {
    match (haystack, needle) {
        (JsonValue::Object(h), JsonValue::Object(n)) => n
            .iter()
            .all(|(k, v)| h.get(k).is_some_and(|hv| contains(hv, v))),
        (JsonValue::Array(h), JsonValue::Array(n)) => n
            .iter()
            .all(|nv| h.iter().any(|hv| contains(hv, nv))),
        // A top-level array contains a bare scalar that is one of its elements.
        (JsonValue::Array(h), scalar) if !scalar.is_object() => {
            h.iter().any(|hv| values_equal(hv, scalar))
        }
        (h, n) => values_equal(h, n),
    }
}

/// Stable sort by one column. `NULL` sorts after every value, so it comes
/// last ascending and first descending.
pub fn sort(records: &mut [Record], order: &Order) {
    records.sort_by(|a, b| {
        let ordering = match (column(a, &order.column), column(b, &order.column)) {
            (JsonValue::Null, JsonValue::Null) => Ordering::Equal,
            (JsonValue::Null, _) => Ordering::Greater,
            (_, JsonValue::Null) => Ordering::Less,
            (x, y) => compare(x, y).unwrap_or(Ordering::Equal),
        };
        if order.ascending {
            ordering
        } else {
            ordering.reverse()
        }
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use serde_json::json;

    fn record(value: JsonValue) -> Record {
        value.as_object().cloned().unwrap()
    }

    #[test]
    fn eq_null_means_is_null() {
        let row = record(json!({"finished_at": null, "title": "Dune"}));
        assert!(matches(&row, &Filter::eq("finished_at", JsonValue::Null)));
        assert!(matches(&row, &Filter::eq("missing", JsonValue::Null)));
        assert!(!matches(&row, &Filter::eq("title", JsonValue::Null)));
        assert!(matches(&row, &Filter::neq("title", JsonValue::Null)));
    }

    #[test]
    fn comparisons_against_null_columns_are_false() {
        let row = record(json!({"pages": null}));
        assert!(!matches(&row, &Filter::gt("pages", 1)));
        assert!(!matches(&row, &Filter::neq("pages", 1)));
    }

    #[test]
    fn numbers_compare_numerically() {
        let row = record(json!({"pages": 120, "rating": 4.5}));
        assert!(matches(&row, &Filter::gt("pages", 99)));
        assert!(matches(&row, &Filter::eq("pages", 120.0)));
        assert!(matches(&row, &Filter::gte("rating", 4.5)));
        assert!(!matches(&row, &Filter::lt("pages", 100)));
    }

    #[test]
    fn values_of_different_types_never_match() {
        let row = record(json!({"pages": 1, "code": "1", "done": true}));
        assert!(!matches(&row, &Filter::eq("pages", "1")));
        assert!(!matches(&row, &Filter::eq("code", 1)));
        assert!(!matches(&row, &Filter::eq("done", "true")));
        assert!(!matches(&row, &Filter::gt("code", 0)));
        assert!(!matches(&row, &Filter::in_list("pages", ["1"])));
        assert!(matches(&row, &Filter::neq("code", 1)));
        assert!(matches(&row, &Filter::eq("code", "1")));
    }

    #[test]
    fn strings_compare_lexicographically() {
        let row = record(json!({"created_at": "2024-03-01T10:00:00Z"}));
        assert!(matches(&row, &Filter::gt("created_at", "2024-02-28T00:00:00Z")));
        assert!(matches(&row, &Filter::lte("created_at", "2024-03-01T10:00:00Z")));
    }

    #[test]
    fn like_handles_wildcards_and_escapes() {
        let row = record(json!({"title": "Project Hail Mary", "code": "50%_off"}));
        assert!(matches(&row, &Filter::like("title", "Project%")));
        assert!(matches(&row, &Filter::like("title", "%Hail%")));
        assert!(matches(&row, &Filter::like("title", "Project_Hail Mary")));
        assert!(!matches(&row, &Filter::like("title", "project%")));
        assert!(matches(&row, &Filter::ilike("title", "project%mary")));
        assert!(matches(&row, &Filter::like("code", "50\\%\\_off")));
        assert!(!matches(&row, &Filter::like("code", "50\\%x")));
    }

    #[test]
    fn in_and_contains() {
        let row = record(json!({"status": "reading", "tags": ["sci-fi", "space"], "meta": {"a": 1, "b": [1, 2]}}));
        assert!(matches(&row, &Filter::in_list("status", ["reading", "finished"])));
        assert!(!matches(&row, &Filter::in_list("status", ["wishlist"])));
        assert!(matches(&row, &Filter::contains("tags", json!(["space"]))));
        assert!(matches(&row, &Filter::contains("tags", json!("sci-fi"))));
        assert!(!matches(&row, &Filter::contains("tags", json!(["romance"]))));
        assert!(matches(&row, &Filter::contains("meta", json!({"b": [2]}))));
        assert!(!matches(&row, &Filter::contains("meta", json!({"a": 2}))));
    }

    #[test]
    fn sort_places_nulls_last_ascending_and_first_descending() {
        let mut rows = vec![
            record(json!({"id": "a", "pages": 300})),
            record(json!({"id": "b"})),
            record(json!({"id": "c", "pages": 100})),
        ];

        sort(&mut rows, &Order::asc("pages"));
        let ids: Vec<_> = rows.iter().map(|r| r["id"].as_str().unwrap()).collect();
        assert_eq!(ids, ["c", "a", "b"]);

        sort(&mut rows, &Order::desc("pages"));
        let ids: Vec<_> = rows.iter().map(|r| r["id"].as_str().unwrap()).collect();
        assert_eq!(ids, ["b", "a", "c"]);
    }

    proptest! {
        #[test]
        fn percent_matches_any_text(text in ".{0,40}") {
            let row = record(json!({"t": text}));
            prop_assert!(matches(&row, &Filter::like("t", "%")));
        }

        #[test]
        fn literal_pattern_matches_itself(text in "[a-zA-Z0-9 ]{0,40}") {
            let row = record(json!({"t": text.clone()}));
            prop_assert!(matches(&row, &Filter::like("t", text.clone())));
            prop_assert!(matches(&row, &Filter::ilike("t", text.to_uppercase())));
        }
    }
}
