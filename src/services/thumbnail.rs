use crate::config::{MediaConfig, StorageConfig};
use crate::db::repositories::RecordingRepository;
use crate::error::{Error, Result};
use crate::media::MediaProcessor;
use crate::storage::ObjectStorage;
use log::{debug, info, warn};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

/// Frame extraction from stored recordings
pub struct ThumbnailService {
    recordings: Arc<dyn RecordingRepository>,
    storage: Arc<dyn ObjectStorage>,
    media: Arc<dyn MediaProcessor>,
    storage_config: StorageConfig,
    media_config: MediaConfig,
}

impl ThumbnailService {
    pub fn new(
        recordings: Arc<dyn RecordingRepository>,
        storage: Arc<dyn ObjectStorage>,
        media: Arc<dyn MediaProcessor>,
        storage_config: StorageConfig,
        media_config: MediaConfig,
    ) -> Self {
        Self {
            recordings,
            storage,
            media,
            storage_config,
            media_config,
        }
    }

    /// One JPEG every `interval_seconds` over the recording, uploaded next to it.
    /// Returns presigned URLs of the thumbnails that were produced.
    pub async fn generate_thumbnails(
        &self,
        recording_id: Uuid,
        interval_seconds: u64,
    ) -> Result<Vec<String>> {
        let recording = match self.recordings.find_by_id(recording_id).await? {
            Some(r) if r.deleted_at.is_none() => r,
            _ => {
                return Err(Error::NotFound(format!(
                    "Recording {} not found",
                    recording_id
                )))
            }
        };
        let key = recording.storage_path.as_deref().ok_or_else(|| {
            Error::InvalidState(format!("Recording {} has no stored media yet", recording_id))
        })?;
        if interval_seconds == 0 {
            return Err(Error::Validation("Thumbnail interval must be positive".into()));
        }
        let offsets = offsets(recording.duration_seconds, interval_seconds);
        if offsets.len() as u64 > self.media_config.max_thumbnails {
            return Err(Error::Validation(format!(
                "{}s interval over {}s yields {} thumbnails, at most {} allowed",
                interval_seconds,
                recording.duration_seconds,
                offsets.len(),
                self.media_config.max_thumbnails
            )));
        }

        let bucket = self.storage_config.bucket_for(&recording.tenant_id);
        let ttl = Duration::from_secs(self.storage_config.presign_ttl_secs);
        let source = self.storage.presign(&bucket, key, ttl).await?.ok_or_else(|| {
            Error::Storage(format!("Object {}/{} is missing", bucket, key))
        })?;

        let work_dir = self
            .media_config
            .work_dir
            .join("thumbnails")
            .join(recording_id.to_string());
        tokio::fs::create_dir_all(&work_dir)
            .await
            .map_err(|e| Error::Media(format!("Failed to create {}: {}", work_dir.display(), e)))?;

        let prefix = format!("{}/{}/thumbnails", recording.stream_id, recording_id);
        let result = self
            .extract_all(&source, &bucket, &prefix, &offsets, &work_dir, ttl)
            .await;
        if let Err(e) = tokio::fs::remove_dir_all(&work_dir).await {
            debug!("Failed to remove {}: {}", work_dir.display(), e);
        }
        let urls = result?;

        if urls.is_empty() {
            return Err(Error::Media(format!(
                "No thumbnails could be extracted from recording {}",
                recording_id
            )));
        }

        info!("Generated {} thumbnails for recording {}", urls.len(), recording_id);
        Ok(urls)
    }

    /// Frames that cannot be extracted are skipped; a storage failure aborts
    async fn extract_all(
        &self,
        source: &str,
        bucket: &str,
        prefix: &str,
        offsets: &[u64],
        work_dir: &Path,
        ttl: Duration,
    ) -> Result<Vec<String>> {
        let mut urls = Vec::new();
        for &offset in offsets {
            let output = work_dir.join(format!("{}.jpg", offset));
            match self
                .media
                .thumbnail(source, Duration::from_secs(offset), &output)
                .await
            {
                Ok(true) => {}
                Ok(false) => {
                    warn!("No frame at {}s of {}", offset, prefix);
                    continue;
                }
                Err(e) => {
                    warn!("Thumbnail at {}s of {} failed: {}", offset, prefix, e);
                    continue;
                }
            }

            let thumb_key = format!("{}/{}.jpg", prefix, offset);
            self.storage.upload(bucket, &output, &thumb_key).await?;
            if let Some(url) = self.storage.presign(bucket, &thumb_key, ttl).await? {
                urls.push(url);
            }
        }
        Ok(urls)
    }
}

/// 0, interval, 2*interval, ... strictly before the end; always at least 0
fn offsets(duration_seconds: u64, interval_seconds: u64) -> Vec<u64> {
    let mut offsets: Vec<u64> = (0..duration_seconds)
        .step_by(interval_seconds as usize)
        .collect();
    if offsets.is_empty() {
        offsets.push(0);
    }
    offsets
}
