//! Data access layer: tenant-scoped CRUD, change subscriptions and object storage.
//!
//! - [`query`]: filter vocabulary, query handle and compiler.
//! - [`backend`]: backing-store capabilities and their in-memory/Postgres implementations.
//! - [`engine`]: the CRUD engine applying the tenant policy.
//! - [`realtime`]: tenant-scoped change subscriptions.
//! - [`storage`]: tenant-namespaced blob storage.

pub mod backend;
pub mod config;
pub mod engine;
pub mod query;
pub mod realtime;
pub mod storage;

#[cfg(test)]
mod integration_tests;

pub use backend::{BackingStore, ChangeFeed, IdentityProvider, InMemoryStore, StaticIdentity};
pub use config::DataConfig;
pub use engine::CrudEngine;
pub use query::{ConflictTarget, Filter, FilterCompiler, FilterOp, Order, Page, Projection, Query, QueryOptions};
pub use realtime::{ChangeStream, SubscriptionBridge, SubscriptionHandle};
pub use storage::{InMemoryObjectStore, LocalObjectStore, ObjectStore, TenantBuckets, UploadOptions};

#[cfg(feature = "postgres")]
pub use backend::PostgresStore;
