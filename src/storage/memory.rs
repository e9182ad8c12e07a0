use super::{validate_key, ObjectStorage, StoredObject};
use crate::error::{Error, Result};
use async_trait::async_trait;
use std::collections::{BTreeMap, HashSet};
use std::path::Path;
use std::time::Duration;
use tokio::sync::RwLock;

/// Object store held in memory, with failure injection for tests
#[derive(Default)]
pub struct InMemoryObjectStorage {
    objects: RwLock<BTreeMap<(String, String), Vec<u8>>>,
    failing_keys: RwLock<HashSet<String>>,
    failing_buckets: RwLock<HashSet<String>>,
}

impl InMemoryObjectStorage {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store an object of the given size
    pub async fn put(&self, bucket: &str, key: &str, size_bytes: usize) {
        self.objects
            .write()
            .await
            .insert((bucket.to_string(), key.to_string()), vec![0; size_bytes]);
    }

    /// Uploads and deletes of this key fail with a storage error
    pub async fn fail_key(&self, key: &str) {
        self.failing_keys.write().await.insert(key.to_string());
    }

    pub async fn clear_failures(&self) {
        self.failing_keys.write().await.clear();
        self.failing_buckets.write().await.clear();
    }

    /// Listing this bucket fails with a storage error
    pub async fn fail_bucket(&self, bucket: &str) {
        self.failing_buckets.write().await.insert(bucket.to_string());
    }

    pub async fn keys(&self, bucket: &str) -> Vec<String> {
        self.objects
            .read()
            .await
            .keys()
            .filter(|(b, _)| b == bucket)
            .map(|(_, k)| k.clone())
            .collect()
    }

    fn url(bucket: &str, key: &str) -> String {
        format!("memory://{}/{}", bucket, key)
    }
}

#[async_trait]
impl ObjectStorage for InMemoryObjectStorage {
    async fn upload(&self, bucket: &str, local_path: &Path, key: &str) -> Result<String> {
        validate_key(key)?;
        let bytes = tokio::fs::read(local_path).await.map_err(|e| {
            Error::Storage(format!("Failed to read {}: {}", local_path.display(), e))
        })?;
        self.upload_bytes(bucket, key, bytes).await
    }

    async fn upload_bytes(&self, bucket: &str, key: &str, bytes: Vec<u8>) -> Result<String> {
        validate_key(key)?;
        if self.failing_keys.read().await.contains(key) {
            return Err(Error::Storage(format!("Failed to upload {}/{}: injected failure", bucket, key)));
        }
        self.objects
            .write()
            .await
            .insert((bucket.to_string(), key.to_string()), bytes);
        Ok(Self::url(bucket, key))
    }

    async fn delete(&self, bucket: &str, key: &str) -> Result<bool> {
        if self.failing_keys.read().await.contains(key) {
            return Err(Error::Storage(format!("Failed to delete {}/{}: injected failure", bucket, key)));
        }
        Ok(self
            .objects
            .write()
            .await
            .remove(&(bucket.to_string(), key.to_string()))
            .is_some())
    }

    async fn presign(&self, bucket: &str, key: &str, ttl: Duration) -> Result<Option<String>> {
        if !self.exists(bucket, key).await? {
            return Ok(None);
        }
        Ok(Some(format!("{}?expires_in={}", Self::url(bucket, key), ttl.as_secs())))
    }

    async fn exists(&self, bucket: &str, key: &str) -> Result<bool> {
        Ok(self
            .objects
            .read()
            .await
            .contains_key(&(bucket.to_string(), key.to_string())))
    }

    async fn list(&self, bucket: &str, prefix: &str) -> Result<Vec<StoredObject>> {
        if self.failing_buckets.read().await.contains(bucket) {
            return Err(Error::Storage(format!("Failed to list {}: injected failure", bucket)));
        }
        Ok(self
            .objects
            .read()
            .await
            .iter()
            .filter(|((b, k), _)| b == bucket && k.starts_with(prefix))
            .map(|((_, k), data)| StoredObject {
                key: k.clone(),
                size_bytes: data.len() as u64,
            })
            .collect())
    }
}
