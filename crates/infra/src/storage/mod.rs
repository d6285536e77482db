//! Blob object storage.
//!
//! [`ObjectStore`] is the raw capability over named buckets. Application code
//! goes through [`TenantBuckets`], which derives the bucket from the tenant and
//! an object kind (`<tenant>-<kind>`, e.g. `bookbuddy-covers`) so one tenant
//! cannot address another tenant's objects.

use serde::{Deserialize, Serialize};
use tracing::instrument;

use bookbuddy_core::{DataError, DataResult, TenantId};

pub mod local;
pub mod memory;

pub use local::LocalObjectStore;
pub use memory::InMemoryObjectStore;

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct UploadOptions {
    pub content_type: Option<String>,
    /// Replace an existing object instead of failing with `Conflict`.
    pub upsert: bool,
}

impl UploadOptions {
    pub fn with_content_type(mut self, content_type: impl Into<String>) -> Self {
        self.content_type = Some(content_type.into());
        self
    }

    pub fn with_upsert(mut self) -> Self {
        self.upsert = true;
        self
    }
}

/// Bucketed blob storage.
#[async_trait::async_trait]
pub trait ObjectStore: Send + Sync {
    /// Store `payload` at `path`; returns the stored path.
    async fn upload(
        &self,
        bucket: &str,
        path: &str,
        payload: Vec<u8>,
        options: &UploadOptions,
    ) -> DataResult<String>;

    /// Public URL of an object. Never fails; bad input gives an unusable URL.
    fn public_url(&self, bucket: &str, path: &str) -> String;

    /// Remove objects; paths that do not exist are ignored.
    async fn remove(&self, bucket: &str, paths: &[String]) -> DataResult<()>;
}

#[async_trait::async_trait]
impl<O> ObjectStore for std::sync::Arc<O>
where
    O: ObjectStore + ?Sized,
{
    async fn upload(
        &self,
        bucket: &str,
        path: &str,
        payload: Vec<u8>,
        options: &UploadOptions,
    ) -> DataResult<String> {
        (**self).upload(bucket, path, payload, options).await
    }

    fn public_url(&self, bucket: &str, path: &str) -> String {
        (**self).public_url(bucket, path)
    }

    async fn remove(&self, bucket: &str, paths: &[String]) -> DataResult<()> {
        (**self).remove(bucket, paths).await
    }
}

/// `<base>/<bucket>/<path>` with redundant slashes removed.
pub(crate) fn join_public_url(base: &str, bucket: &str, path: &str) -> String {
    format!(
        "{}/{}/{}",
        base.trim_end_matches('/'),
        bucket.trim_matches('/'),
        path.trim_start_matches('/')
    )
}

/// Reject empty object paths and any that could escape the bucket.
pub(crate) fn validate_path(path: &str) -> DataResult<()> {
    if path.trim().is_empty() {
        return Err(DataError::invalid_options("object path is empty"));
    }
    if path.starts_with('/') || path.split(['/', '\\']).any(|segment| segment == "..") {
        return Err(DataError::invalid_options(format!(
            "object path `{path}` escapes its bucket"
        )));
    }
    Ok(())
}

/// Tenant-namespaced view over an [`ObjectStore`].
#[derive(Debug, Clone)]
pub struct TenantBuckets<O> {
    store: O,
    tenant: TenantId,
}

impl<O: ObjectStore> TenantBuckets<O> {
    pub fn new(store: O, tenant: impl Into<TenantId>) -> Self {
        Self {
            store,
            tenant: tenant.into(),
        }
    }

    /// Bucket holding objects of `kind` for this tenant.
    pub fn bucket(&self, kind: &str) -> String {
        format!("{}-{}", self.tenant, kind)
    }

    pub fn store(&self) -> &O {
        &self.store
    }

    #[instrument(skip(self, payload, options), fields(tenant = %self.tenant, bytes = payload.len()), err)]
    pub async fn upload_object(
        &self,
        kind: &str,
        path: &str,
        payload: Vec<u8>,
        options: &UploadOptions,
    ) -> DataResult<String> {
        self.store
            .upload(&self.bucket(kind), path, payload, options)
            .await
    }

    pub fn public_url(&self, kind: &str, path: &str) -> String {
        self.store.public_url(&self.bucket(kind), path)
    }

    #[instrument(skip(self, paths), fields(tenant = %self.tenant, count = paths.len()), err)]
    pub async fn delete_objects(&self, kind: &str, paths: &[String]) -> DataResult<()> {
        self.store.remove(&self.bucket(kind), paths).await
    }
}
