use std::collections::HashMap;
use std::sync::RwLock;

use bookbuddy_core::{DataError, DataResult};

use super::{ObjectStore, UploadOptions, join_public_url, validate_path};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredObject {
    pub bytes: Vec<u8>,
    pub content_type: Option<String>,
}

/// In-memory object store for tests/dev.
#[derive(Debug)]
pub struct InMemoryObjectStore {
    objects: RwLock<HashMap<(String, String), StoredObject>>,
    base_url: String,
}

impl InMemoryObjectStore {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            objects: RwLock::new(HashMap::new()),
            base_url: base_url.into(),
        }
    }

    pub fn get(&self, bucket: &str, path: &str) -> Option<StoredObject> {
        self.objects
            .read()
            .ok()?
            .get(&(bucket.to_string(), path.to_string()))
            .cloned()
    }

    pub fn len(&self) -> usize {
        self.objects.read().map(|o| o.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait::async_trait]
impl ObjectStore for InMemoryObjectStore {
    async fn upload(
        &self,
        bucket: &str,
        path: &str,
        payload: Vec<u8>,
        options: &UploadOptions,
    ) -> DataResult<String> {
        validate_path(path)?;
        let mut objects = self
            .objects
            .write()
            .map_err(|_| DataError::backend("object lock poisoned"))?;

        let key = (bucket.to_string(), path.to_string());
        if !options.upsert && objects.contains_key(&key) {
            return Err(DataError::conflict(format!("object `{bucket}/{path}` already exists")));
        }
        objects.insert(
            key,
            StoredObject {
                bytes: payload,
                content_type: options.content_type.clone(),
            },
        );
        Ok(path.to_string())
    }

    fn public_url(&self, bucket: &str, path: &str) -> String {
        join_public_url(&self.base_url, bucket, path)
    }

    async fn remove(&self, bucket: &str, paths: &[String]) -> DataResult<()> {
        let mut objects = self
            .objects
            .write()
            .map_err(|_| DataError::backend("object lock poisoned"))?;
        for path in paths {
            objects.remove(&(bucket.to_string(), path.clone()));
        }
        Ok(())
    }
}
