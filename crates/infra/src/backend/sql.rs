//! SQL rendering for the Postgres backend.
//!
//! Pure functions from [`Query`] values to parameterised statements. Rows
//! travel as JSON in both directions:
//!
//! - reads project each row with `to_jsonb(t)` (or `jsonb_build_object` for a
//!   column list) into a single `row` column;
//! - writes bind the record as one `jsonb` parameter and expand it with
//!   `jsonb_populate_record`, so column types come from the table definition;
//! - predicates compare `to_jsonb(t) -> 'column'` against a `jsonb` parameter,
//!   except pattern matches which compare the column's text form.
//!
//! Identifiers are always double-quoted.

use serde_json::Value as JsonValue;

use bookbuddy_core::{DataError, DataResult, Record};

use crate::query::{ConflictTarget, Filter, FilterOp, Projection, Query};

/// Default `LISTEN`/`NOTIFY` channel carrying row changes.
pub const DEFAULT_CHANGE_CHANNEL: &str = "bookbuddy_changes";

/// A bind parameter, in positional order.
#[derive(Debug, Clone, PartialEq)]
pub enum SqlParam {
    Json(JsonValue),
    Text(String),
}

#[derive(Debug, Clone, PartialEq)]
pub struct SqlStatement {
    pub sql: String,
    pub params: Vec<SqlParam>,
}

/// `"name"` with embedded quotes doubled.
pub fn quote_ident(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

/// `'text'` with embedded quotes doubled.
pub fn quote_literal(text: &str) -> String {
    format!("'{}'", text.replace('\'', "''"))
}

#[derive(Default)]
struct Params(Vec<SqlParam>);

impl Params {
    fn push(&mut self, param: SqlParam) -> String {
        self.0.push(param);
        format!("${}", self.0.len())
    }

    fn json(&mut self, value: &JsonValue) -> String {
        format!("{}::jsonb", self.push(SqlParam::Json(value.clone())))
    }

    fn text(&mut self, value: &JsonValue) -> String {
        let text = match value {
            JsonValue::String(s) => s.clone(),
            other => other.to_string(),
        };
        self.push(SqlParam::Text(text))
    }
}

fn json_column(column: &str) -> String {
    format!("(to_jsonb(t) -> {})", quote_literal(column))
}

fn render_predicate(filter: &Filter, params: &mut Params) -> String {
    let column = &filter.column;
    let value = &filter.value;

    match filter.op {
        FilterOp::Eq if value.is_null() => format!("t.{} IS NULL", quote_ident(column)),
        FilterOp::Neq if value.is_null() => format!("t.{} IS NOT NULL", quote_ident(column)),
        FilterOp::Eq => format!("{} = {}", json_column(column), params.json(value)),
        FilterOp::Neq => format!("{} <> {}", json_column(column), params.json(value)),
        FilterOp::Gt => format!("{} > {}", json_column(column), params.json(value)),
        FilterOp::Gte => format!("{} >= {}", json_column(column), params.json(value)),
        FilterOp::Lt => format!("{} < {}", json_column(column), params.json(value)),
        FilterOp::Lte => format!("{} <= {}", json_column(column), params.json(value)),
        FilterOp::Like => format!("t.{}::text LIKE {}", quote_ident(column), params.text(value)),
        FilterOp::Ilike => format!("t.{}::text ILIKE {}", quote_ident(column), params.text(value)),
        FilterOp::In => format!(
            "{} IN (SELECT jsonb_array_elements({}))",
            json_column(column),
            params.json(value)
        ),
        FilterOp::Contains => format!("{} @> {}", json_column(column), params.json(value)),
    }
}

fn render_where(predicates: &[Filter], params: &mut Params) -> String {
    if predicates.is_empty() {
        return String::new();
    }
    let clauses: Vec<String> = predicates
        .iter()
        .map(|p| render_predicate(p, params))
        .collect();
    format!(" WHERE {}", clauses.join(" AND "))
}

/// Row expression producing the projected record as `jsonb`.
pub fn render_projection(projection: &Projection) -> String {
    match projection {
        Projection::All => "to_jsonb(t)".to_string(),
        Projection::Columns(columns) => {
            let pairs: Vec<String> = columns
                .iter()
                .map(|c| format!("{}, t.{}", quote_literal(c), quote_ident(c)))
                .collect();
            format!("jsonb_build_object({})", pairs.join(", "))
        }
    }
}

fn returning(projection: &Projection) -> String {
    format!(" RETURNING {} AS row", render_projection(projection))
}

pub fn render_select(query: &Query) -> SqlStatement {
    let mut params = Params::default();
    let mut sql = format!(
        "SELECT {} AS row FROM {} AS t{}",
        render_projection(query.projection()),
        quote_ident(query.table()),
        render_where(query.predicates(), &mut params)
    );

    if let Some(order) = query.order_by() {
        let direction = if order.ascending { "ASC NULLS LAST" } else { "DESC NULLS FIRST" };
        sql.push_str(&format!(" ORDER BY t.{} {}", quote_ident(&order.column), direction));
    }

    let window = query.window();
    if let Some(limit) = window.limit {
        sql.push_str(&format!(" LIMIT {limit}"));
    }
    if window.offset > 0 {
        sql.push_str(&format!(" OFFSET {}", window.offset));
    }

    SqlStatement { sql, params: params.0 }
}

pub fn render_count(query: &Query) -> SqlStatement {
    let mut params = Params::default();
    let sql = format!(
        "SELECT count(*) AS total FROM {} AS t{}",
        quote_ident(query.table()),
        render_where(query.predicates(), &mut params)
    );
    SqlStatement { sql, params: params.0 }
}

fn column_list(record: &Record) -> DataResult<String> {
    if record.is_empty() {
        return Err(DataError::invalid_options("record has no columns"));
    }
    Ok(record.keys().map(|c| quote_ident(c)).collect::<Vec<_>>().join(", "))
}

fn populate(table: &str, record: &Record, params: &mut Params) -> String {
    format!(
        "jsonb_populate_record(NULL::{}, {})",
        quote_ident(table),
        params.json(&JsonValue::Object(record.clone()))
    )
}

/// Single-row insert; only the record's own columns are written, so column
/// defaults apply to the rest.
pub fn render_insert(table: &str, record: &Record, projection: &Projection) -> DataResult<SqlStatement> {
    let mut params = Params::default();
    let columns = column_list(record)?;
    let sql = format!(
        "INSERT INTO {table} AS t ({columns}) SELECT {columns} FROM {source}{returning}",
        table = quote_ident(table),
        source = populate(table, record, &mut params),
        returning = returning(projection),
    );
    Ok(SqlStatement { sql, params: params.0 })
}

pub fn render_update(query: &Query, patch: &Record) -> DataResult<SqlStatement> {
    let mut params = Params::default();
    let columns = column_list(patch)?;
    let source = populate(query.table(), patch, &mut params);
    let sql = format!(
        "UPDATE {table} AS t SET ({columns}) = (SELECT {columns} FROM {source}){filter}{returning}",
        table = quote_ident(query.table()),
        filter = render_where(query.predicates(), &mut params),
        returning = returning(query.projection()),
    );
    Ok(SqlStatement { sql, params: params.0 })
}

pub fn render_delete(query: &Query) -> SqlStatement {
    let mut params = Params::default();
    let sql = format!(
        "DELETE FROM {} AS t{}{}",
        quote_ident(query.table()),
        render_where(query.predicates(), &mut params),
        returning(query.projection())
    );
    SqlStatement { sql, params: params.0 }
}

/// Insert-or-update on `target`.
///
/// With `owner_column`, the update only applies when the existing row has the
/// same owner value as the incoming one; otherwise the statement returns no row.
pub fn render_upsert(
    table: &str,
    record: &Record,
    target: &ConflictTarget,
    owner_column: Option<&str>,
    projection: &Projection,
) -> DataResult<SqlStatement> {
    let mut params = Params::default();
    let columns = column_list(record)?;
    let conflict = target
        .columns()
        .iter()
        .map(|c| quote_ident(c))
        .collect::<Vec<_>>()
        .join(", ");
    let assignments = record
        .keys()
        .map(|c| format!("{0} = EXCLUDED.{0}", quote_ident(c)))
        .collect::<Vec<_>>()
        .join(", ");
    let guard = owner_column
        .map(|c| format!(" WHERE t.{0} IS NOT DISTINCT FROM EXCLUDED.{0}", quote_ident(c)))
        .unwrap_or_default();

    let sql = format!(
        "INSERT INTO {table} AS t ({columns}) SELECT {columns} FROM {source} \
         ON CONFLICT ({conflict}) DO UPDATE SET {assignments}{guard}{returning}",
        table = quote_ident(table),
        source = populate(table, record, &mut params),
        returning = returning(projection),
    );
    Ok(SqlStatement { sql, params: params.0 })
}

fn notify_function_name(channel: &str) -> String {
    quote_ident(&format!("{channel}_notify"))
}

/// Trigger function publishing every row change as JSON on `channel`.
///
/// Payloads use the trigger shape understood by `ChangeEnvelope::from_payload`.
/// `NOTIFY` payloads are limited to 8000 bytes; larger rows are not delivered.
pub fn render_notify_function(channel: &str) -> String {
    format!(
        r#"CREATE OR REPLACE FUNCTION {function}() RETURNS trigger AS $$
BEGIN
    PERFORM pg_notify({channel}, json_build_object(
        'table', TG_TABLE_NAME,
        'type', TG_OP,
        'commit_timestamp', now(),
        'record', CASE WHEN TG_OP = 'DELETE' THEN NULL ELSE to_jsonb(NEW) END,
        'old_record', CASE WHEN TG_OP = 'INSERT' THEN NULL ELSE to_jsonb(OLD) END
    )::text);
    RETURN NULL;
END;
$$ LANGUAGE plpgsql"#,
        function = notify_function_name(channel),
        channel = quote_literal(channel),
    )
}

/// Statements (re)attaching the notify trigger to `table`.
pub fn render_notify_trigger(channel: &str, table: &str) -> [String; 2] {
    let trigger = quote_ident(&format!("{channel}_{table}"));
    let table = quote_ident(table);
    [
        format!("DROP TRIGGER IF EXISTS {trigger} ON {table}"),
        format!(
            "CREATE TRIGGER {trigger} AFTER INSERT OR UPDATE OR DELETE ON {table} \
             FOR EACH ROW EXECUTE FUNCTION {}()",
            notify_function_name(channel)
        ),
    ]
}
