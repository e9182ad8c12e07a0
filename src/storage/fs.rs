use super::{validate_key, ObjectStorage, StoredObject};
use crate::error::{Error, Result};
use async_trait::async_trait;
use log::debug;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::fs;

/// Object store on the local filesystem: `{root}/{bucket}/{key}`
#[derive(Debug, Clone)]
pub struct FsObjectStorage {
    root: PathBuf,
}

impl FsObjectStorage {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn bucket_dir(&self, bucket: &str) -> Result<PathBuf> {
        validate_key(bucket)?;
        if bucket.contains('/') {
            return Err(Error::Validation(format!("Invalid bucket name: {}", bucket)));
        }
        Ok(self.root.join(bucket))
    }

    fn object_path(&self, bucket: &str, key: &str) -> Result<PathBuf> {
        validate_key(key)?;
        Ok(self.bucket_dir(bucket)?.join(key))
    }

    fn url_for(path: &Path) -> String {
        format!("file://{}", path.display())
    }

    async fn prepare_parent(path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).await.map_err(|e| {
                Error::Storage(format!("Failed to create {}: {}", parent.display(), e))
            })?;
        }
        Ok(())
    }
}

#[async_trait]
impl ObjectStorage for FsObjectStorage {
    async fn upload(&self, bucket: &str, local_path: &Path, key: &str) -> Result<String> {
        let target = self.object_path(bucket, key)?;
        Self::prepare_parent(&target).await?;

        fs::copy(local_path, &target).await.map_err(|e| {
            Error::Storage(format!(
                "Failed to upload {} to {}/{}: {}",
                local_path.display(),
                bucket,
                key,
                e
            ))
        })?;

        debug!("Uploaded {} to {}/{}", local_path.display(), bucket, key);
        Ok(Self::url_for(&target))
    }

    async fn upload_bytes(&self, bucket: &str, key: &str, bytes: Vec<u8>) -> Result<String> {
        let target = self.object_path(bucket, key)?;
        Self::prepare_parent(&target).await?;

        fs::write(&target, bytes)
            .await
            .map_err(|e| Error::Storage(format!("Failed to write {}/{}: {}", bucket, key, e)))?;

        Ok(Self::url_for(&target))
    }

    async fn delete(&self, bucket: &str, key: &str) -> Result<bool> {
        let target = self.object_path(bucket, key)?;
        match fs::remove_file(&target).await {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(false),
            Err(e) => Err(Error::Storage(format!(
                "Failed to delete {}/{}: {}",
                bucket, key, e
            ))),
        }
    }

    // Local files carry no expiry; the ttl only applies to remote stores
    async fn presign(&self, bucket: &str, key: &str, _ttl: Duration) -> Result<Option<String>> {
        let target = self.object_path(bucket, key)?;
        if !self.exists(bucket, key).await? {
            return Ok(None);
        }
        let absolute = fs::canonicalize(&target).await.unwrap_or(target);
        Ok(Some(Self::url_for(&absolute)))
    }

    async fn exists(&self, bucket: &str, key: &str) -> Result<bool> {
        let target = self.object_path(bucket, key)?;
        match fs::metadata(&target).await {
            Ok(meta) => Ok(meta.is_file()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(false),
            Err(e) => Err(Error::Storage(format!("Failed to stat {}/{}: {}", bucket, key, e))),
        }
    }

    async fn list(&self, bucket: &str, prefix: &str) -> Result<Vec<StoredObject>> {
        let bucket_dir = self.bucket_dir(bucket)?;
        let mut objects = Vec::new();
        let mut pending = vec![bucket_dir.clone()];

        while let Some(dir) = pending.pop() {
            let mut entries = match fs::read_dir(&dir).await {
                Ok(entries) => entries,
                Err(e) if e.kind() == ErrorKind::NotFound => continue,
                Err(e) => {
                    return Err(Error::Storage(format!(
                        "Failed to list {}: {}",
                        dir.display(),
                        e
                    )))
                }
            };

            while let Some(entry) = entries
                .next_entry()
                .await
                .map_err(|e| Error::Storage(format!("Failed to list {}: {}", dir.display(), e)))?
            {
                let meta = entry
                    .metadata()
                    .await
                    .map_err(|e| Error::Storage(format!("Failed to stat entry: {}", e)))?;
                let path = entry.path();
                if meta.is_dir() {
                    pending.push(path);
                    continue;
                }

                let Ok(relative) = path.strip_prefix(&bucket_dir) else {
                    continue;
                };
                let key = relative
                    .components()
                    .map(|c| c.as_os_str().to_string_lossy())
                    .collect::<Vec<_>>()
                    .join("/");
                if key.starts_with(prefix) {
                    objects.push(StoredObject {
                        key,
                        size_bytes: meta.len(),
                    });
                }
            }
        }

        objects.sort_by(|a, b| a.key.cmp(&b.key));
        Ok(objects)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[tokio::test]
    async fn upload_list_delete() {
        let dir = tempdir().unwrap();
        let storage = FsObjectStorage::new(dir.path());

        let source = dir.path().join("capture.mp4");
        tokio::fs::write(&source, vec![7u8; 2048]).await.unwrap();

        let url = storage.upload("vms-t1", &source, "s1/r1.mp4").await.unwrap();
        assert!(url.starts_with("file://"));
        storage
            .upload_bytes("vms-t1", "s1/r1/thumbnails/0.jpg", vec![1, 2, 3])
            .await
            .unwrap();

        let all = storage.list("vms-t1", "").await.unwrap();
        assert_eq!(
            all,
            vec![
                StoredObject { key: "s1/r1.mp4".into(), size_bytes: 2048 },
                StoredObject { key: "s1/r1/thumbnails/0.jpg".into(), size_bytes: 3 },
            ]
        );
        assert_eq!(storage.list("vms-t1", "s1/r1/").await.unwrap().len(), 1);

        assert!(storage.delete("vms-t1", "s1/r1.mp4").await.unwrap());
        assert!(!storage.delete("vms-t1", "s1/r1.mp4").await.unwrap());
        assert!(!storage.exists("vms-t1", "s1/r1.mp4").await.unwrap());
    }

    #[tokio::test]
    async fn missing_bucket_lists_empty() {
        let dir = tempdir().unwrap();
        let storage = FsObjectStorage::new(dir.path());
        assert!(storage.list("vms-nobody", "").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn presign_missing_is_none() {
        let dir = tempdir().unwrap();
        let storage = FsObjectStorage::new(dir.path());
        let ttl = Duration::from_secs(60);
        assert_eq!(storage.presign("vms-t1", "nope.mp4", ttl).await.unwrap(), None);

        storage.upload_bytes("vms-t1", "yes.mp4", vec![0]).await.unwrap();
        assert!(storage.presign("vms-t1", "yes.mp4", ttl).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn rejects_escaping_keys() {
        let dir = tempdir().unwrap();
        let storage = FsObjectStorage::new(dir.path());
        assert!(matches!(
            storage.upload_bytes("vms-t1", "../escape", vec![0]).await,
            Err(Error::Validation(_))
        ));
    }
}
