use std::collections::{HashMap, VecDeque};
use std::sync::{Mutex, RwLock};
use std::time::Duration;

use chrono::Utc;
use serde_json::Value as JsonValue;
use tracing::warn;
use uuid::Uuid;

use bookbuddy_core::{DataError, DataResult, Record};
use bookbuddy_events::{
    ChangeBus, ChangeEnvelope, ChangeEvent, InMemoryEventBus, ServerFilter, Subscription,
};

use super::eval;
use super::{BackingStore, ChangeFeed};
use crate::query::{ConflictTarget, Page, Projection, Query};

/// In-memory backing store.
///
/// Intended for tests/dev. Not optimized for performance.
///
/// - Tables are created on first write; reading an unknown table yields no rows.
/// - Rows without an `id` get a UUIDv7 string id; a duplicate `id` is a
///   [`DataError::Conflict`].
/// - Every call holds the table lock for its whole duration, so batches are
///   all-or-nothing.
/// - Committed mutations are published on an in-memory bus, one envelope per row.
#[derive(Debug)]
pub struct InMemoryStore {
    tables: RwLock<HashMap<String, Vec<Record>>>,
    bus: InMemoryEventBus<ChangeEnvelope>,
    faults: Mutex<VecDeque<DataError>>,
    latency: Mutex<Option<Duration>>,
}

impl Default for InMemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryStore {
    const ID_COLUMN: &'static str = "id";

    pub fn new() -> Self {
        Self {
            tables: RwLock::new(HashMap::new()),
            bus: InMemoryEventBus::new(),
            faults: Mutex::new(VecDeque::new()),
            latency: Mutex::new(None),
        }
    }

    /// Make the next store call fail with `error` (queued, one per call).
    pub fn fail_next(&self, error: DataError) {
        if let Ok(mut faults) = self.faults.lock() {
            faults.push_back(error);
        }
    }

    /// Delay every subsequent store call by `latency`.
    pub fn set_latency(&self, latency: Option<Duration>) {
        if let Ok(mut slot) = self.latency.lock() {
            *slot = latency;
        }
    }

    /// Snapshot of a table's rows, in insertion order.
    pub fn rows(&self, table: &str) -> Vec<Record> {
        self.tables
            .read()
            .ok()
            .and_then(|t| t.get(table).cloned())
            .unwrap_or_default()
    }

    /// Insert rows directly, bypassing ids, conflicts and change publication.
    pub fn seed(&self, table: &str, rows: impl IntoIterator<Item = Record>) -> DataResult<()> {
        let mut tables = self.write()?;
        tables.entry(table.to_string()).or_default().extend(rows);
        Ok(())
    }

    async fn before_call(&self) -> DataResult<()> {
        let latency = self.latency.lock().ok().and_then(|l| *l);
        if let Some(latency) = latency {
            tokio::time::sleep(latency).await;
        }

        let fault = self.faults.lock().ok().and_then(|mut f| f.pop_front());
        match fault {
            Some(error) => Err(error),
            None => Ok(()),
        }
    }

    fn read(&self) -> DataResult<std::sync::RwLockReadGuard<'_, HashMap<String, Vec<Record>>>> {
        self.tables
            .read()
            .map_err(|_| DataError::backend("table lock poisoned"))
    }

    fn write(&self) -> DataResult<std::sync::RwLockWriteGuard<'_, HashMap<String, Vec<Record>>>> {
        self.tables
            .write()
            .map_err(|_| DataError::backend("table lock poisoned"))
    }

    fn publish(&self, table: &str, events: Vec<ChangeEvent>) {
        let now = Utc::now();
        for event in events {
            let envelope = ChangeEnvelope::new(table, now, event);
            match self.bus.publish(envelope) {
                Ok(delivered) => tracing::trace!(table, delivered, "published change"),
                Err(e) => warn!(table, error = ?e, "failed to publish change"),
            }
        }
    }

    fn assign_id(row: &mut Record) {
        let missing = row
            .get(Self::ID_COLUMN)
            .is_none_or(JsonValue::is_null);
        if missing {
            row.insert(
                Self::ID_COLUMN.to_string(),
                JsonValue::String(Uuid::now_v7().to_string()),
            );
        }
    }

    fn check_unique_id(table: &str, rows: &[Record], row: &Record) -> DataResult<()> {
        let Some(id) = row.get(Self::ID_COLUMN) else {
            return Ok(());
        };
        let taken = rows
            .iter()
            .any(|r| r.get(Self::ID_COLUMN).is_some_and(|v| eval::values_equal(v, id)));
        if taken {
            return Err(DataError::conflict(format!(
                "duplicate key value violates unique constraint \"{table}_pkey\""
            )));
        }
        Ok(())
    }

    fn same_owner(column: &str, existing: &Record, row: &Record) -> bool {
        match (existing.get(column), row.get(column)) {
            (Some(a), Some(b)) => eval::values_equal(a, b),
            (None, None) => true,
            _ => false,
        }
    }

    fn conflicts_on(target: &ConflictTarget, existing: &Record, row: &Record) -> bool {
        target.columns().iter().all(|c| match (existing.get(c), row.get(c)) {
            (Some(a), Some(b)) if !a.is_null() && !b.is_null() => eval::values_equal(a, b),
            _ => false,
        })
    }
}

#[async_trait::async_trait]
impl BackingStore for InMemoryStore {
    fn backend_name(&self) -> &'static str {
        "in_memory"
    }

    async fn select(&self, query: &Query) -> DataResult<Page> {
        self.before_call().await?;

        let mut matched: Vec<Record> = {
            let tables = self.read()?;
            tables
                .get(query.table())
                .map(|rows| {
                    rows.iter()
                        .filter(|r| eval::matches_all(r, query.predicates()))
                        .cloned()
                        .collect()
                })
                .unwrap_or_default()
        };
        let total = matched.len() as u64;

        if query.is_head() {
            return Ok(Page::new(Vec::new(), total));
        }
        if let Some(order) = query.order_by() {
            eval::sort(&mut matched, order);
        }

        let window = query.window();
        let records: Vec<Record> = matched
            .into_iter()
            .skip(usize::try_from(window.offset).unwrap_or(usize::MAX))
            .take(window.limit.map_or(usize::MAX, |l| usize::try_from(l).unwrap_or(usize::MAX)))
            .map(|r| query.projection().apply(r))
            .collect();

        let count = if query.counts() { total } else { records.len() as u64 };
        Ok(Page::new(records, count))
    }

    async fn insert(
        &self,
        table: &str,
        rows: Vec<Record>,
        projection: &Projection,
    ) -> DataResult<Vec<Record>> {
        self.before_call().await?;

        let inserted = {
            let mut tables = self.write()?;
            let mut staged = tables.get(table).cloned().unwrap_or_default();
            let mut inserted = Vec::with_capacity(rows.len());
            for mut row in rows {
                Self::assign_id(&mut row);
                Self::check_unique_id(table, &staged, &row)?;
                staged.push(row.clone());
                inserted.push(row);
            }
            tables.insert(table.to_string(), staged);
            inserted
        };

        self.publish(
            table,
            inserted
                .iter()
                .map(|r| ChangeEvent::Inserted { new: r.clone() })
                .collect(),
        );
        Ok(inserted.into_iter().map(|r| projection.apply(r)).collect())
    }

    async fn update(&self, query: &Query, patch: &Record) -> DataResult<Vec<Record>> {
        self.before_call().await?;

        let changed: Vec<(Record, Record)> = {
            let mut tables = self.write()?;
            let Some(rows) = tables.get_mut(query.table()) else {
                return Ok(Vec::new());
            };
            rows.iter_mut()
                .filter(|r| eval::matches_all(r, query.predicates()))
                .map(|row| {
                    let old = row.clone();
                    for (k, v) in patch {
                        row.insert(k.clone(), v.clone());
                    }
                    (old, row.clone())
                })
                .collect()
        };

        self.publish(
            query.table(),
            changed
                .iter()
                .map(|(old, new)| ChangeEvent::Updated {
                    new: new.clone(),
                    old: Some(old.clone()),
                })
                .collect(),
        );
        Ok(changed
            .into_iter()
            .map(|(_, new)| query.projection().apply(new))
            .collect())
    }

    async fn delete(&self, query: &Query) -> DataResult<Vec<Record>> {
        self.before_call().await?;

        let removed: Vec<Record> = {
            let mut tables = self.write()?;
            let Some(rows) = tables.get_mut(query.table()) else {
                return Ok(Vec::new());
            };
            let (removed, kept): (Vec<Record>, Vec<Record>) = std::mem::take(rows)
                .into_iter()
                .partition(|r| eval::matches_all(r, query.predicates()));
            *rows = kept;
            removed
        };

        self.publish(
            query.table(),
            removed
                .iter()
                .map(|r| ChangeEvent::Deleted { old: r.clone() })
                .collect(),
        );
        Ok(removed
            .into_iter()
            .map(|r| query.projection().apply(r))
            .collect())
    }

    async fn upsert(
        &self,
        table: &str,
        rows: Vec<Record>,
        target: &ConflictTarget,
        owner_column: Option<&str>,
        projection: &Projection,
    ) -> DataResult<Vec<Record>> {
        self.before_call().await?;

        let (written, events) = {
            let mut tables = self.write()?;
            let mut staged = tables.get(table).cloned().unwrap_or_default();
            let mut written = Vec::with_capacity(rows.len());
            let mut events = Vec::with_capacity(rows.len());

            for mut row in rows {
                match staged.iter_mut().find(|e| Self::conflicts_on(target, e, &row)) {
                    Some(existing) => {
                        if owner_column.is_some_and(|c| !Self::same_owner(c, existing, &row)) {
                            return Err(DataError::conflict(format!(
                                "`{table}` row matching on ({target}) belongs to another owner"
                            )));
                        }
                        let old = existing.clone();
                        for (k, v) in row {
                            existing.insert(k, v);
                        }
                        written.push(existing.clone());
                        events.push(ChangeEvent::Updated {
                            new: existing.clone(),
                            old: Some(old),
                        });
                    }
                    None => {
                        Self::assign_id(&mut row);
                        Self::check_unique_id(table, &staged, &row)?;
                        staged.push(row.clone());
                        events.push(ChangeEvent::Inserted { new: row.clone() });
                        written.push(row);
                    }
                }
            }

            tables.insert(table.to_string(), staged);
            (written, events)
        };

        self.publish(table, events);
        Ok(written.into_iter().map(|r| projection.apply(r)).collect())
    }
}

#[async_trait::async_trait]
impl ChangeFeed for InMemoryStore {
    async fn listen(
        &self,
        channel: &str,
        table: &str,
        filter: Option<&ServerFilter>,
    ) -> DataResult<Subscription<ChangeEnvelope>> {
        tracing::debug!(channel, table, filter = ?filter, "listening for changes");

        let table = table.to_string();
        let filter = filter.cloned();
        Ok(self.bus.subscribe_filtered(channel, move |envelope: &ChangeEnvelope| {
            envelope.table() == table && filter.as_ref().is_none_or(|f| f.matches(envelope))
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bookbuddy_core::record_from_value;
    use serde_json::json;

    fn record(value: JsonValue) -> Record {
        record_from_value(value).unwrap()
    }

    #[tokio::test]
    async fn insert_assigns_uuid_ids() {
        let store = InMemoryStore::new();
        let rows = store
            .insert(
                "books",
                vec![record(json!({"title": "A"})), record(json!({"title": "B"}))],
                &Projection::All,
            )
            .await
            .unwrap();

        let a = rows[0]["id"].as_str().unwrap();
        let b = rows[1]["id"].as_str().unwrap();
        assert_eq!(Uuid::parse_str(a).unwrap().get_version_num(), 7);
        assert_ne!(a, b);
    }

    #[tokio::test]
    async fn duplicate_id_rejects_the_whole_batch() {
        let store = InMemoryStore::new();
        store
            .insert("books", vec![record(json!({"id": "1"}))], &Projection::All)
            .await
            .unwrap();

        let err = store
            .insert(
                "books",
                vec![record(json!({"id": "2"})), record(json!({"id": "1"}))],
                &Projection::All,
            )
            .await
            .unwrap_err();

        assert!(matches!(err, DataError::Conflict(_)));
        assert_eq!(store.rows("books").len(), 1);
    }

    #[tokio::test]
    async fn select_counts_before_windowing() {
        let store = InMemoryStore::new();
        store
            .seed("books", (0..5).map(|i| record(json!({"id": i.to_string(), "n": i}))))
            .unwrap();

        let query = Query::new("books")
            .gte("n", json!(1))
            .order(crate::query::Order::desc("n"))
            .range(0, 1)
            .with_count();
        let page = store.select(&query).await.unwrap();

        assert_eq!(page.count, 4);
        let ns: Vec<_> = page.records.iter().map(|r| r["n"].as_i64().unwrap()).collect();
        assert_eq!(ns, [4, 3]);
    }

    #[tokio::test]
    async fn injected_fault_is_returned_once() {
        let store = InMemoryStore::new();
        store.fail_next(DataError::Connection("reset by peer".into()));

        let err = store.select(&Query::new("books")).await.unwrap_err();
        assert!(err.is_retryable());
        assert!(store.select(&Query::new("books")).await.is_ok());
    }

    #[tokio::test]
    async fn upsert_updates_on_conflict_target() {
        let store = InMemoryStore::new();
        let target = ConflictTarget::parse("user_id,app_id").unwrap();
        let row = |n: i64| record(json!({"user_id": "u1", "app_id": "bookbuddy", "current_streak": n}));

        store.upsert("reading_streaks", vec![row(1)], &target, None, &Projection::All).await.unwrap();
        store.upsert("reading_streaks", vec![row(2)], &target, None, &Projection::All).await.unwrap();

        let rows = store.rows("reading_streaks");
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0]["current_streak"], json!(2));
    }

    #[tokio::test]
    async fn upsert_refuses_rows_of_another_owner_and_writes_nothing() {
        let store = InMemoryStore::new();
        let target = ConflictTarget::parse("id").unwrap();
        store
            .seed("books", [record(json!({"id": "b1", "app_id": "otherapp", "title": "theirs"}))])
            .unwrap();

        let err = store
            .upsert(
                "books",
                vec![
                    record(json!({"id": "b2", "app_id": "bookbuddy", "title": "new"})),
                    record(json!({"id": "b1", "app_id": "bookbuddy", "title": "mine now"})),
                ],
                &target,
                Some("app_id"),
                &Projection::All,
            )
            .await
            .unwrap_err();

        assert!(matches!(err, DataError::Conflict(_)));
        let rows = store.rows("books");
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0]["app_id"], json!("otherapp"));
        assert_eq!(rows[0]["title"], json!("theirs"));
    }

    #[tokio::test]
    async fn listeners_receive_filtered_changes() {
        let store = InMemoryStore::new();
        let filter = ServerFilter::eq("app_id", "bookbuddy");
        let sub = store.listen("books:bookbuddy", "books", Some(&filter)).await.unwrap();

        store
            .insert(
                "books",
                vec![
                    record(json!({"app_id": "otherapp", "title": "X"})),
                    record(json!({"app_id": "bookbuddy", "title": "Y"})),
                ],
                &Projection::All,
            )
            .await
            .unwrap();
        store
            .insert("notes", vec![record(json!({"app_id": "bookbuddy"}))], &Projection::All)
            .await
            .unwrap();

        let envelope = sub.try_recv().unwrap();
        assert_eq!(envelope.column_value("title"), Some(&json!("Y")));
        assert!(sub.try_recv().is_err());
    }
}
