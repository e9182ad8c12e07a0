use crate::error::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

pub mod fs;
pub mod memory;

pub use fs::FsObjectStorage;
pub use memory::InMemoryObjectStorage;

/// An object key and its size as reported by the store
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoredObject {
    pub key: String,
    pub size_bytes: u64,
}

/// Bucket-scoped object store. One bucket per tenant.
#[async_trait]
pub trait ObjectStorage: Send + Sync {
    /// Copy a local file into the bucket, returning its URL
    async fn upload(&self, bucket: &str, local_path: &Path, key: &str) -> Result<String>;

    async fn upload_bytes(&self, bucket: &str, key: &str, bytes: Vec<u8>) -> Result<String>;

    /// `Ok(false)` when the key did not exist
    async fn delete(&self, bucket: &str, key: &str) -> Result<bool>;

    /// Time-limited read URL, `None` when the key does not exist
    async fn presign(&self, bucket: &str, key: &str, ttl: Duration) -> Result<Option<String>>;

    async fn exists(&self, bucket: &str, key: &str) -> Result<bool>;

    /// All objects under a prefix; a missing bucket lists as empty
    async fn list(&self, bucket: &str, prefix: &str) -> Result<Vec<StoredObject>>;
}

/// Reject keys that could escape the bucket
pub(crate) fn validate_key(key: &str) -> Result<()> {
    if key.is_empty()
        || key.starts_with('/')
        || key.contains('\\')
        || key.split('/').any(|part| part.is_empty() || part == "." || part == "..")
    {
        return Err(crate::error::Error::Validation(format!(
            "Invalid object key: {:?}",
            key
        )));
    }
    Ok(())
}
