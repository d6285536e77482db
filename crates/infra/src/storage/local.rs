use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use tokio::io::AsyncWriteExt;
use tracing::debug;

use bookbuddy_core::{DataError, DataResult};

use super::{ObjectStore, UploadOptions, join_public_url, validate_path};

/// Object store on the local filesystem: `<root>/<bucket>/<path>`.
///
/// Content types are not persisted; the serving layer derives them.
#[derive(Debug, Clone)]
pub struct LocalObjectStore {
    root: PathBuf,
    base_url: String,
}

impl LocalObjectStore {
    pub fn new(root: impl Into<PathBuf>, base_url: impl Into<String>) -> Self {
        Self {
            root: root.into(),
            base_url: base_url.into(),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn object_path(&self, bucket: &str, path: &str) -> DataResult<PathBuf> {
        validate_path(bucket)?;
        validate_path(path)?;
        Ok(self.root.join(bucket).join(path))
    }
}

fn io_error(operation: &str, target: &Path, err: std::io::Error) -> DataError {
    DataError::backend(format!("{operation} `{}`: {err}", target.display()))
}

#[async_trait::async_trait]
impl ObjectStore for LocalObjectStore {
    async fn upload(
        &self,
        bucket: &str,
        path: &str,
        payload: Vec<u8>,
        options: &UploadOptions,
    ) -> DataResult<String> {
        let target = self.object_path(bucket, path)?;
        if let Some(parent) = target.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| io_error("create directory", parent, e))?;
        }

        let mut file = tokio::fs::OpenOptions::new()
            .write(true)
            .create(true)
            .create_new(!options.upsert)
            .truncate(true)
            .open(&target)
            .await
            .map_err(|e| match e.kind() {
                ErrorKind::AlreadyExists => {
                    DataError::conflict(format!("object `{bucket}/{path}` already exists"))
                }
                _ => io_error("open", &target, e),
            })?;

        file.write_all(&payload)
            .await
            .map_err(|e| io_error("write", &target, e))?;
        file.flush()
            .await
            .map_err(|e| io_error("flush", &target, e))?;

        debug!(bucket, path, bytes = payload.len(), content_type = ?options.content_type, "stored object");
        Ok(path.to_string())
    }

    fn public_url(&self, bucket: &str, path: &str) -> String {
        join_public_url(&self.base_url, bucket, path)
    }

    async fn remove(&self, bucket: &str, paths: &[String]) -> DataResult<()> {
        for path in paths {
            let target = self.object_path(bucket, path)?;
            match tokio::fs::remove_file(&target).await {
                Ok(()) => {}
                Err(e) if e.kind() == ErrorKind::NotFound => {}
                Err(e) => return Err(io_error("remove", &target, e)),
            }
        }
        Ok(())
    }
}
