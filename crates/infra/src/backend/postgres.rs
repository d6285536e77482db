//! Postgres-backed store (sqlx).
//!
//! Executes statements rendered by [`super::sql`] against a `PgPool`. Rows are
//! exchanged as `jsonb`, so any table works without compile-time schema.
//!
//! ## Error Mapping
//!
//! | SQLx Error | PostgreSQL Error Code | DataError |
//! |------------|----------------------|-----------|
//! | Database (unique violation) | `23505` | `Conflict` |
//! | Database (foreign key, check, not-null) | `23503`, `23514`, `23502` | `Constraint` |
//! | Database (other) | any other | `Backend` |
//! | PoolClosed, PoolTimedOut, Io, Tls | N/A | `Connection` |
//! | Decode, ColumnDecode | N/A | `Serialization` |
//! | Other | N/A | `Backend` |
//!
//! ## Change feed
//!
//! Changes arrive through `LISTEN` on a single channel fed by the trigger
//! installed with [`PostgresStore::install_change_notifications`]. Each
//! subscription owns one listener connection, released as soon as the
//! subscription is dropped; notifications for other tables or failing the
//! server filter are discarded before delivery.

use std::sync::Arc;
use std::sync::mpsc;

use serde_json::Value as JsonValue;
use sqlx::postgres::{PgArguments, PgListener, PgPoolOptions};
use sqlx::{PgPool, Postgres, Row};
use tokio::sync::oneshot;
use tracing::{debug, instrument, warn};

use bookbuddy_core::{DataError, DataResult, Record, record_from_value};
use bookbuddy_events::{ChangeEnvelope, ServerFilter, Subscription};

use super::sql::{self, SqlParam, SqlStatement};
use super::{BackingStore, ChangeFeed};
use crate::query::{ConflictTarget, Page, Projection, Query};

/// Postgres backing store.
///
/// `Send + Sync`; clones share the pool.
#[derive(Debug, Clone)]
pub struct PostgresStore {
    pool: Arc<PgPool>,
    channel: String,
}

impl PostgresStore {
    pub fn new(pool: PgPool) -> Self {
        Self {
            pool: Arc::new(pool),
            channel: sql::DEFAULT_CHANGE_CHANNEL.to_string(),
        }
    }

    /// Connect a pool to `database_url`.
    #[instrument(skip(database_url), err)]
    pub async fn connect(database_url: &str, max_connections: u32) -> DataResult<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .connect(database_url)
            .await
            .map_err(|e| map_sqlx_error("connect", e))?;
        Ok(Self::new(pool))
    }

    /// Use `channel` instead of the default notification channel.
    pub fn with_channel(mut self, channel: impl Into<String>) -> Self {
        self.channel = channel.into();
        self
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Install the notify trigger function and attach it to `tables`.
    #[instrument(skip(self, tables), fields(channel = %self.channel), err)]
    pub async fn install_change_notifications<I, S>(&self, tables: I) -> DataResult<()>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| map_sqlx_error("begin_transaction", e))?;

        sqlx::query(&sql::render_notify_function(&self.channel))
            .execute(&mut *tx)
            .await
            .map_err(|e| map_sqlx_error("create_notify_function", e))?;

        for table in tables {
            for statement in sql::render_notify_trigger(&self.channel, table.as_ref()) {
                sqlx::query(&statement)
                    .execute(&mut *tx)
                    .await
                    .map_err(|e| map_sqlx_error("create_notify_trigger", e))?;
            }
        }

        tx.commit()
            .await
            .map_err(|e| map_sqlx_error("commit_transaction", e))
    }

    async fn fetch_rows(&self, operation: &str, statement: &SqlStatement) -> DataResult<Vec<Record>> {
        debug!(operation, sql = %statement.sql, "executing statement");
        let rows = bind_all(sqlx::query(&statement.sql), &statement.params)
            .fetch_all(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error(operation, e))?;
        rows.iter().map(decode_row).collect()
    }

    /// Run one row-returning statement per record in a single transaction.
    async fn write_each<F>(&self, operation: &str, rows: Vec<Record>, render: F) -> DataResult<Vec<Record>>
    where
        F: Fn(&Record) -> DataResult<SqlStatement> + Send + Sync,
    {
        if rows.is_empty() {
            return Ok(Vec::new());
        }

        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| map_sqlx_error("begin_transaction", e))?;

        let mut written = Vec::with_capacity(rows.len());
        for record in &rows {
            let statement = render(record)?;
            debug!(operation, sql = %statement.sql, "executing statement");
            let row = bind_all(sqlx::query(&statement.sql), &statement.params)
                .fetch_optional(&mut *tx)
                .await
                .map_err(|e| map_sqlx_error(operation, e))?;
            // An owner-guarded upsert returns nothing when the conflicting row
            // is someone else's; dropping `tx` rolls the batch back.
            let row = row.ok_or_else(|| {
                DataError::conflict(format!("{operation} matched a row owned by another tenant"))
            })?;
            written.push(decode_row(&row)?);
        }

        tx.commit()
            .await
            .map_err(|e| map_sqlx_error("commit_transaction", e))?;
        Ok(written)
    }
}

#[async_trait::async_trait]
impl BackingStore for PostgresStore {
    fn backend_name(&self) -> &'static str {
        "postgres"
    }

    #[instrument(skip(self, query), fields(table = query.table()), err)]
    async fn select(&self, query: &Query) -> DataResult<Page> {
        let total = if query.counts() {
            let statement = sql::render_count(query);
            let row = bind_all(sqlx::query(&statement.sql), &statement.params)
                .fetch_one(&*self.pool)
                .await
                .map_err(|e| map_sqlx_error("count", e))?;
            let total: i64 = row
                .try_get("total")
                .map_err(|e| map_sqlx_error("count", e))?;
            Some(u64::try_from(total).unwrap_or(0))
        } else {
            None
        };

        if query.is_head() {
            return Ok(Page::new(Vec::new(), total.unwrap_or(0)));
        }

        let records = self.fetch_rows("select", &sql::render_select(query)).await?;
        let count = total.unwrap_or(records.len() as u64);
        Ok(Page::new(records, count))
    }

    #[instrument(skip(self, rows, projection), fields(row_count = rows.len()), err)]
    async fn insert(
        &self,
        table: &str,
        rows: Vec<Record>,
        projection: &Projection,
    ) -> DataResult<Vec<Record>> {
        self.write_each("insert", rows, |record| sql::render_insert(table, record, projection))
            .await
    }

    #[instrument(skip(self, query, patch), fields(table = query.table()), err)]
    async fn update(&self, query: &Query, patch: &Record) -> DataResult<Vec<Record>> {
        let statement = sql::render_update(query, patch)?;
        self.fetch_rows("update", &statement).await
    }

    #[instrument(skip(self, query), fields(table = query.table()), err)]
    async fn delete(&self, query: &Query) -> DataResult<Vec<Record>> {
        self.fetch_rows("delete", &sql::render_delete(query)).await
    }

    #[instrument(
        skip(self, rows, target, projection),
        fields(row_count = rows.len(), on_conflict = %target),
        err
    )]
    async fn upsert(
        &self,
        table: &str,
        rows: Vec<Record>,
        target: &ConflictTarget,
        owner_column: Option<&str>,
        projection: &Projection,
    ) -> DataResult<Vec<Record>> {
        self.write_each("upsert", rows, |record| {
            sql::render_upsert(table, record, target, owner_column, projection)
        })
        .await
    }
}

#[async_trait::async_trait]
impl ChangeFeed for PostgresStore {
    #[instrument(skip(self, filter), fields(pg_channel = %self.channel), err)]
    async fn listen(
        &self,
        channel: &str,
        table: &str,
        filter: Option<&ServerFilter>,
    ) -> DataResult<Subscription<ChangeEnvelope>> {
        let mut listener = PgListener::connect_with(&self.pool)
            .await
            .map_err(|e| map_sqlx_error("listen_connect", e))?;
        listener
            .listen(&self.channel)
            .await
            .map_err(|e| map_sqlx_error("listen", e))?;

        let (tx, rx) = mpsc::channel();
        let (close_tx, mut close_rx) = oneshot::channel::<()>();
        let subscription = Subscription::new(channel, rx).on_close(move || {
            let _ = close_tx.send(());
        });
        let channel = channel.to_string();
        let table = table.to_string();
        let filter = filter.cloned();

        // Owns the listener connection until the subscription is dropped.
        tokio::spawn(async move {
            loop {
                let notification = tokio::select! {
                    _ = &mut close_rx => {
                        debug!(%channel, "subscription closed, releasing listener");
                        break;
                    }
                    received = listener.recv() => match received {
                        Ok(n) => n,
                        Err(e) => {
                            warn!(%channel, error = %e, "change listener stopped");
                            break;
                        }
                    },
                };

                let envelope = serde_json::from_str::<JsonValue>(notification.payload())
                    .map_err(|e| e.to_string())
                    .and_then(|payload| {
                        ChangeEnvelope::from_payload(None, &payload).map_err(|e| e.to_string())
                    });
                let envelope = match envelope {
                    Ok(envelope) => envelope,
                    Err(error) => {
                        warn!(%channel, %error, "discarding malformed change notification");
                        continue;
                    }
                };

                if envelope.table() != table || !filter.as_ref().is_none_or(|f| f.matches(&envelope)) {
                    continue;
                }
                if tx.send(envelope).is_err() {
                    debug!(%channel, "subscriber gone, closing listener");
                    break;
                }
            }
        });

        Ok(subscription)
    }
}

fn bind_all<'q>(
    mut query: sqlx::query::Query<'q, Postgres, PgArguments>,
    params: &'q [SqlParam],
) -> sqlx::query::Query<'q, Postgres, PgArguments> {
    for param in params {
        query = match param {
            SqlParam::Json(value) => query.bind(value),
            SqlParam::Text(text) => query.bind(text.as_str()),
        };
    }
    query
}

fn decode_row(row: &sqlx::postgres::PgRow) -> DataResult<Record> {
    let value: JsonValue = row
        .try_get("row")
        .map_err(|e| map_sqlx_error("decode_row", e))?;
    record_from_value(value)
        .ok_or_else(|| DataError::Serialization("row is not a JSON object".to_string()))
}

/// Map SQLx errors to `DataError`.
fn map_sqlx_error(operation: &str, err: sqlx::Error) -> DataError {
    match err {
        sqlx::Error::Database(db_err) => {
            let msg = format!("database error in {}: {}", operation, db_err.message());
            match db_err.code().as_deref() {
                Some("23505") => DataError::Conflict(msg),
                Some("23503" | "23514" | "23502") => DataError::Constraint(msg),
                _ => DataError::Backend(msg),
            }
        }
        sqlx::Error::PoolClosed => {
            DataError::Connection(format!("connection pool closed in {}", operation))
        }
        sqlx::Error::PoolTimedOut => {
            DataError::Connection(format!("connection pool timed out in {}", operation))
        }
        sqlx::Error::Io(e) => DataError::Connection(format!("io error in {}: {}", operation, e)),
        sqlx::Error::Tls(e) => DataError::Connection(format!("tls error in {}: {}", operation, e)),
        sqlx::Error::Decode(e) => {
            DataError::Serialization(format!("decode error in {}: {}", operation, e))
        }
        sqlx::Error::ColumnDecode { index, source } => DataError::Serialization(format!(
            "column {} decode error in {}: {}",
            index, operation, source
        )),
        _ => DataError::Backend(format!("sqlx error in {}: {}", operation, err)),
    }
}
