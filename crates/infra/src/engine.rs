//! CRUD engine: tenant-scoped operations over a [`BackingStore`].
//!
//! Every operation resolves the table, decides whether tenant isolation
//! applies (see [`TenantPolicy::should_inject`]) and then:
//!
//! - **reads / updates / deletes** get an equals predicate on the tenant
//!   column, added before any caller filter;
//! - **inserts / upserts** get the tenant column stamped into every record,
//!   overwriting whatever the caller supplied;
//! - **updates** also re-stamp the tenant column inside the patch, so a row
//!   can never be moved to another tenant.
//!
//! Expected failures come back as [`DataError`] values. The engine holds no
//! locks and opens no transactions; each call is as atomic as the single
//! backing-store operation it issues.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use serde_json::Value as JsonValue;
use tracing::{instrument, warn};

use bookbuddy_core::{DataError, DataResult, Record, Table, TenantPolicy, UserId, render_value};

use crate::backend::{BackingStore, IdentityProvider, StaticIdentity};
use crate::config::DataConfig;
use crate::query::{Filter, FilterCompiler, Page, Query, QueryOptions};

/// Tenant-aware CRUD operations.
///
/// Several engines (one per tenant) may share a store.
pub struct CrudEngine<S> {
    store: S,
    policy: TenantPolicy,
    compiler: FilterCompiler,
    call_timeout: Option<Duration>,
    identity: Arc<dyn IdentityProvider>,
}

impl<S> core::fmt::Debug for CrudEngine<S> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("CrudEngine")
            .field("policy", &self.policy)
            .field("compiler", &self.compiler)
            .field("call_timeout", &self.call_timeout)
            .finish_non_exhaustive()
    }
}

impl<S: BackingStore> CrudEngine<S> {
    pub fn new(store: S, policy: TenantPolicy) -> Self {
        Self {
            store,
            policy,
            compiler: FilterCompiler::default(),
            call_timeout: None,
            identity: Arc::new(StaticIdentity::anonymous()),
        }
    }

    /// Engine configured from `config` (tenant policy, page size, timeout).
    pub fn from_config(store: S, config: &DataConfig) -> Self {
        Self::new(store, config.tenant_policy())
            .with_default_page_size(config.default_page_size)
            .with_call_timeout(config.call_timeout())
    }

    pub fn with_default_page_size(mut self, page_size: u64) -> Self {
        self.compiler = FilterCompiler::new(page_size);
        self
    }

    /// Bound every backing-store call; expiry is [`DataError::Timeout`].
    pub fn with_call_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.call_timeout = timeout;
        self
    }

    pub fn with_identity(mut self, identity: impl IdentityProvider + 'static) -> Self {
        self.identity = Arc::new(identity);
        self
    }

    pub fn policy(&self) -> &TenantPolicy {
        &self.policy
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    /// The authenticated user, if any.
    pub fn current_user(&self) -> Option<UserId> {
        self.identity.current_user()
    }

    /// All matching rows of `table` with the total match count.
    ///
    /// No match is an empty page, not an error.
    #[instrument(
        skip_all,
        fields(table = table.name(), tenant = %self.policy.tenant(), backend = self.store.backend_name()),
        err
    )]
    pub async fn fetch_all(
        &self,
        table: impl Table,
        filters: &[Filter],
        options: &QueryOptions,
    ) -> DataResult<Page> {
        let table = resolve_table(&table)?;
        let query = self.compiler.apply_filters(self.scoped(table, options).with_count(), filters);
        let query = self.compiler.apply_modifiers(
            query,
            options.order.as_ref(),
            options.limit,
            options.offset,
        );
        self.call(self.store.select(&query)).await
    }

    /// The single row whose `id_column` equals `id`.
    #[instrument(
        skip_all,
        fields(table = table.name(), tenant = %self.policy.tenant(), id = %render_value(&id)),
        err
    )]
    pub async fn fetch_by_id(
        &self,
        table: impl Table,
        id: JsonValue,
        options: &QueryOptions,
    ) -> DataResult<Record> {
        let table = resolve_table(&table)?;
        let id_column = resolve_id_column(options)?;
        let query = self
            .scoped(table, options)
            .eq(id_column, id.clone())
            .with_count()
            .limit(2);

        let page = self.call(self.store.select(&query)).await?;
        match page.count {
            0 => Err(DataError::not_found(table, render_value(&id))),
            1 => page
                .records
                .into_iter()
                .next()
                .ok_or_else(|| DataError::not_found(table, render_value(&id))),
            matched => Err(DataError::ambiguous(table, usize::try_from(matched).unwrap_or(usize::MAX))),
        }
    }

    /// Insert one record and return it as stored.
    #[instrument(skip_all, fields(table = table.name(), tenant = %self.policy.tenant()), err)]
    pub async fn create(
        &self,
        table: impl Table,
        record: Record,
        options: &QueryOptions,
    ) -> DataResult<Record> {
        let table = resolve_table(&table)?;
        let record = self.stamp(table, record, options);
        let rows = self
            .call(self.store.insert(table, vec![record], &options.select))
            .await?;
        single_row(table, "insert", rows)
    }

    /// Insert several records; atomicity is the backing store's.
    #[instrument(
        skip_all,
        fields(table = table.name(), tenant = %self.policy.tenant(), rows = records.len()),
        err
    )]
    pub async fn create_many(
        &self,
        table: impl Table,
        records: Vec<Record>,
        options: &QueryOptions,
    ) -> DataResult<Vec<Record>> {
        let table = resolve_table(&table)?;
        if records.is_empty() {
            return Ok(Vec::new());
        }
        let records = records
            .into_iter()
            .map(|r| self.stamp(table, r, options))
            .collect();
        self.call(self.store.insert(table, records, &options.select))
            .await
    }

    /// Patch the row whose `id_column` equals `id`.
    #[instrument(
        skip_all,
        fields(table = table.name(), tenant = %self.policy.tenant(), id = %render_value(&id)),
        err
    )]
    pub async fn update(
        &self,
        table: impl Table,
        id: JsonValue,
        updates: Record,
        options: &QueryOptions,
    ) -> DataResult<Record> {
        let table = resolve_table(&table)?;
        let id_column = resolve_id_column(options)?;
        let patch = self.stamp(table, updates, options);
        if patch.is_empty() {
            return Err(DataError::invalid_options("update with no columns"));
        }
        let query = self.scoped(table, options).eq(id_column, id.clone());

        let rows = self.call(self.store.update(&query, &patch)).await?;
        if rows.len() > 1 {
            warn!(table, matched = rows.len(), "update by id touched several rows");
        }
        rows.into_iter()
            .next()
            .ok_or_else(|| DataError::not_found(table, render_value(&id)))
    }

    /// Patch every row matching `filters`; returns the updated rows.
    #[instrument(skip_all, fields(table = table.name(), tenant = %self.policy.tenant()), err)]
    pub async fn update_where(
        &self,
        table: impl Table,
        updates: Record,
        filters: &[Filter],
        options: &QueryOptions,
    ) -> DataResult<Page> {
        let table = resolve_table(&table)?;
        let patch = self.stamp(table, updates, options);
        if patch.is_empty() {
            return Err(DataError::invalid_options("update with no columns"));
        }
        let query = self.compiler.apply_filters(self.scoped(table, options), filters);

        let rows = self.call(self.store.update(&query, &patch)).await?;
        Ok(Page::from_records(rows))
    }

    /// Delete the row whose `id_column` equals `id` and return it.
    #[instrument(
        skip_all,
        fields(table = table.name(), tenant = %self.policy.tenant(), id = %render_value(&id)),
        err
    )]
    pub async fn remove(
        &self,
        table: impl Table,
        id: JsonValue,
        options: &QueryOptions,
    ) -> DataResult<Record> {
        let table = resolve_table(&table)?;
        let id_column = resolve_id_column(options)?;
        let query = self.scoped(table, options).eq(id_column, id.clone());

        let rows = self.call(self.store.delete(&query)).await?;
        rows.into_iter()
            .next()
            .ok_or_else(|| DataError::not_found(table, render_value(&id)))
    }

    /// Delete every row matching `filters`; removing nothing is not an error.
    #[instrument(skip_all, fields(table = table.name(), tenant = %self.policy.tenant()), err)]
    pub async fn remove_where(
        &self,
        table: impl Table,
        filters: &[Filter],
        options: &QueryOptions,
    ) -> DataResult<Page> {
        let table = resolve_table(&table)?;
        let query = self.compiler.apply_filters(self.scoped(table, options), filters);
        let rows = self.call(self.store.delete(&query)).await?;
        Ok(Page::from_records(rows))
    }

    /// Insert or update one record keyed on `on_conflict` (default `id_column`).
    #[instrument(skip_all, fields(table = table.name(), tenant = %self.policy.tenant()), err)]
    pub async fn upsert(
        &self,
        table: impl Table,
        record: Record,
        options: &QueryOptions,
    ) -> DataResult<Record> {
        let table = resolve_table(&table)?;
        let target = options.conflict_target()?;
        let record = self.stamp(table, record, options);
        let owner = self.owner_column(table, options);
        let rows = self
            .call(self.store.upsert(table, vec![record], &target, owner, &options.select))
            .await?;
        single_row(table, "upsert", rows)
    }

    #[instrument(
        skip_all,
        fields(table = table.name(), tenant = %self.policy.tenant(), rows = records.len()),
        err
    )]
    pub async fn upsert_many(
        &self,
        table: impl Table,
        records: Vec<Record>,
        options: &QueryOptions,
    ) -> DataResult<Vec<Record>> {
        let table = resolve_table(&table)?;
        let target = options.conflict_target()?;
        if records.is_empty() {
            return Ok(Vec::new());
        }
        let records = records
            .into_iter()
            .map(|r| self.stamp(table, r, options))
            .collect();
        let owner = self.owner_column(table, options);
        self.call(self.store.upsert(table, records, &target, owner, &options.select))
            .await
    }

    /// Number of rows matching `filters`, without fetching them.
    #[instrument(skip_all, fields(table = table.name(), tenant = %self.policy.tenant()), err)]
    pub async fn count(
        &self,
        table: impl Table,
        filters: &[Filter],
        options: &QueryOptions,
    ) -> DataResult<u64> {
        let table = resolve_table(&table)?;
        let query = self.compiler.apply_filters(self.scoped(table, options).head(), filters);
        let page = self.call(self.store.select(&query)).await?;
        Ok(page.count)
    }

    /// A query on `table` carrying the tenant predicate when isolation applies.
    fn scoped(&self, table: &str, options: &QueryOptions) -> Query {
        let query = Query::new(table).select(options.select.clone());
        if self.policy.should_inject(table, options.skip_tenant_filter) {
            query.eq(self.policy.tenant_column(), self.tenant_value())
        } else {
            query
        }
    }

    fn stamp(&self, table: &str, mut record: Record, options: &QueryOptions) -> Record {
        if self.policy.should_inject(table, options.skip_tenant_filter) {
            record.insert(self.policy.tenant_column().to_string(), self.tenant_value());
        }
        record
    }

    /// Column an upsert may only overwrite rows of the same value in.
    fn owner_column(&self, table: &str, options: &QueryOptions) -> Option<&str> {
        self.policy
            .should_inject(table, options.skip_tenant_filter)
            .then(|| self.policy.tenant_column())
    }

    fn tenant_value(&self) -> JsonValue {
        JsonValue::String(self.policy.tenant().as_str().to_string())
    }

    async fn call<T, F>(&self, operation: F) -> DataResult<T>
    where
        F: Future<Output = DataResult<T>>,
    {
        match self.call_timeout {
            Some(limit) => tokio::time::timeout(limit, operation)
                .await
                .map_err(|_| DataError::Timeout(limit))?,
            None => operation.await,
        }
    }
}

fn resolve_table<T: Table + ?Sized>(table: &T) -> DataResult<&str> {
    let name = table.name();
    if name.trim().is_empty() {
        return Err(DataError::invalid_table("table name is empty"));
    }
    Ok(name)
}

fn resolve_id_column(options: &QueryOptions) -> DataResult<&str> {
    if options.id_column.trim().is_empty() {
        return Err(DataError::invalid_options("id_column is empty"));
    }
    Ok(&options.id_column)
}

fn single_row(table: &str, operation: &str, rows: Vec<Record>) -> DataResult<Record> {
    rows.into_iter().next().ok_or_else(|| {
        DataError::backend(format!("{operation} on `{table}` returned no row"))
    })
}
