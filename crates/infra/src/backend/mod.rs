//! Backing-store capabilities consumed by the engine and the subscription bridge.
//!
//! A backing store executes compiled [`Query`] values against arbitrary tables.
//! It knows nothing about tenants: isolation is expressed entirely through the
//! predicates and stamped columns the engine hands it.
//!
//! ## Implementations
//!
//! - [`InMemoryStore`]: tests/dev, with change publication and fault injection.
//! - `PostgresStore` (feature `postgres`): sqlx over a `PgPool`, change feed
//!   via `LISTEN`/`NOTIFY`.

use std::sync::Arc;

use bookbuddy_core::{DataResult, Record, UserId};
use bookbuddy_events::{ChangeEnvelope, ServerFilter, Subscription};

use crate::query::{ConflictTarget, Page, Projection, Query};

pub mod eval;
pub mod in_memory;
pub mod sql;

#[cfg(feature = "postgres")]
pub mod postgres;

pub use in_memory::InMemoryStore;

#[cfg(feature = "postgres")]
pub use postgres::PostgresStore;

/// Row operations over a compiled query.
///
/// Mutations return the affected rows under the requested projection.
/// `update` and `delete` ignore the query's order and window.
#[async_trait::async_trait]
pub trait BackingStore: Send + Sync {
    /// Short backend identifier used in log fields.
    fn backend_name(&self) -> &'static str;

    /// Matching rows after order and window.
    ///
    /// `Page::count` is the total number of matches when the query counts,
    /// otherwise the number of rows returned. A head query returns no rows.
    async fn select(&self, query: &Query) -> DataResult<Page>;

    async fn insert(
        &self,
        table: &str,
        rows: Vec<Record>,
        projection: &Projection,
    ) -> DataResult<Vec<Record>>;

    async fn update(&self, query: &Query, patch: &Record) -> DataResult<Vec<Record>>;

    async fn delete(&self, query: &Query) -> DataResult<Vec<Record>>;

    /// Insert rows, updating any existing row that collides on `target`.
    ///
    /// With `owner_column`, a colliding row is only updated when its value in
    /// that column equals the incoming row's; any other collision is a
    /// [`DataError::Conflict`](bookbuddy_core::DataError::Conflict) and
    /// nothing is written.
    async fn upsert(
        &self,
        table: &str,
        rows: Vec<Record>,
        target: &ConflictTarget,
        owner_column: Option<&str>,
        projection: &Projection,
    ) -> DataResult<Vec<Record>>;
}

#[async_trait::async_trait]
impl<S> BackingStore for Arc<S>
where
    S: BackingStore + ?Sized,
{
    fn backend_name(&self) -> &'static str {
        (**self).backend_name()
    }

    async fn select(&self, query: &Query) -> DataResult<Page> {
        (**self).select(query).await
    }

    async fn insert(
        &self,
        table: &str,
        rows: Vec<Record>,
        projection: &Projection,
    ) -> DataResult<Vec<Record>> {
        (**self).insert(table, rows, projection).await
    }

    async fn update(&self, query: &Query, patch: &Record) -> DataResult<Vec<Record>> {
        (**self).update(query, patch).await
    }

    async fn delete(&self, query: &Query) -> DataResult<Vec<Record>> {
        (**self).delete(query).await
    }

    async fn upsert(
        &self,
        table: &str,
        rows: Vec<Record>,
        target: &ConflictTarget,
        owner_column: Option<&str>,
        projection: &Projection,
    ) -> DataResult<Vec<Record>> {
        (**self).upsert(table, rows, target, owner_column, projection).await
    }
}

/// Source of committed row changes.
#[async_trait::async_trait]
pub trait ChangeFeed: Send + Sync {
    /// Open a stream of changes to `table`, restricted to `filter` when given.
    ///
    /// `channel` names the stream for diagnostics; filtering happens at the
    /// source, so rejected changes never reach the subscription.
    async fn listen(
        &self,
        channel: &str,
        table: &str,
        filter: Option<&ServerFilter>,
    ) -> DataResult<Subscription<ChangeEnvelope>>;
}

#[async_trait::async_trait]
impl<F> ChangeFeed for Arc<F>
where
    F: ChangeFeed + ?Sized,
{
    async fn listen(
        &self,
        channel: &str,
        table: &str,
        filter: Option<&ServerFilter>,
    ) -> DataResult<Subscription<ChangeEnvelope>> {
        (**self).listen(channel, table, filter).await
    }
}

/// Authenticated-user lookup.
pub trait IdentityProvider: Send + Sync {
    fn current_user(&self) -> Option<UserId>;
}

impl<P> IdentityProvider for Arc<P>
where
    P: IdentityProvider + ?Sized,
{
    fn current_user(&self) -> Option<UserId> {
        (**self).current_user()
    }
}

/// Identity provider returning a fixed user, or nobody.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StaticIdentity(Option<UserId>);

impl StaticIdentity {
    pub fn user(user: UserId) -> Self {
        Self(Some(user))
    }

    pub fn anonymous() -> Self {
        Self(None)
    }
}

impl IdentityProvider for StaticIdentity {
    fn current_user(&self) -> Option<UserId> {
        self.0
    }
}
