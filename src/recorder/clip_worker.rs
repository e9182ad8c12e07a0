use crate::config::{MediaConfig, StorageConfig};
use crate::db::repositories::{ClipRepository, RecordingRepository};
use crate::domain::{Clip, ClipStatus};
use crate::error::{Error, Result};
use crate::media::MediaProcessor;
use crate::messaging::{
    handler_fn, CreateClipMessage, EventPublisher, MessageBroker, QueueSpec, ReceivedMessage,
};
use crate::recorder::settle;
use crate::storage::ObjectStorage;
use chrono::Utc;
use log::{debug, error, info, warn};
use std::sync::Arc;
use std::time::Duration;

/// Cuts clips out of stored recordings (`clip.create`)
pub struct ClipWorker {
    recordings: Arc<dyn RecordingRepository>,
    clips: Arc<dyn ClipRepository>,
    storage: Arc<dyn ObjectStorage>,
    media: Arc<dyn MediaProcessor>,
    events: EventPublisher,
    storage_config: StorageConfig,
    media_config: MediaConfig,
}

impl ClipWorker {
    pub fn new(
        recordings: Arc<dyn RecordingRepository>,
        clips: Arc<dyn ClipRepository>,
        storage: Arc<dyn ObjectStorage>,
        media: Arc<dyn MediaProcessor>,
        events: EventPublisher,
        storage_config: StorageConfig,
        media_config: MediaConfig,
    ) -> Arc<Self> {
        Arc::new(Self {
            recordings,
            clips,
            storage,
            media,
            events,
            storage_config,
            media_config,
        })
    }

    pub async fn subscribe(self: &Arc<Self>, broker: &dyn MessageBroker) -> Result<String> {
        let worker = self.clone();
        broker
            .consume(
                QueueSpec::clips(),
                handler_fn(move |message| {
                    let worker = worker.clone();
                    async move { worker.handle_message(message).await }
                }),
            )
            .await
    }

    pub async fn handle_message(&self, received: ReceivedMessage) -> Result<()> {
        let message: CreateClipMessage = match serde_json::from_value(received.payload) {
            Ok(message) => message,
            Err(e) => {
                error!("Dropping malformed clip message: {}", e);
                return Ok(());
            }
        };
        let clip_id = message.clip_id;
        settle(
            self.process(&message, received.last_attempt).await,
            "clip",
            clip_id,
        )
    }

    /// Extract, upload and complete one clip.
    ///
    /// Retryable failures leave the clip `Processing` and are returned so the
    /// message is redelivered. On the last attempt, or for any other failure,
    /// the clip is marked `Error`.
    pub async fn process(&self, message: &CreateClipMessage, last_attempt: bool) -> Result<()> {
        let mut clip = match self.clips.find_by_id(message.clip_id).await? {
            Some(snapshot) => Clip::restore(snapshot),
            None => {
                return Err(Error::NotFound(format!("Clip {} not found", message.clip_id)));
            }
        };
        match clip.status() {
            ClipStatus::Completed | ClipStatus::Error => {
                info!("Clip {} already {}, skipping", clip.id(), clip.status());
                return Ok(());
            }
            ClipStatus::Pending => {
                clip.mark_processing(Utc::now())?;
                self.clips.update(&clip.snapshot()).await?;
                self.events.publish_domain(clip.take_events()).await;
            }
            // redelivery after a retryable failure
            ClipStatus::Processing => {}
        }

        match self.extract(&clip, message).await {
            Ok((key, size)) => {
                clip.mark_completed(&key, size, Utc::now())?;
                self.clips.update(&clip.snapshot()).await?;
                self.events.publish_domain(clip.take_events()).await;
                info!("Clip {} completed ({} bytes)", clip.id(), size);
                Ok(())
            }
            Err(e) if e.is_retryable() && !last_attempt => {
                warn!("Clip {} hit a transient failure: {}", clip.id(), e);
                Err(e)
            }
            Err(e) if e.is_retryable() => {
                error!("Clip {} failed on its last attempt: {}", clip.id(), e);
                if let Err(update) = self.fail(&mut clip).await {
                    error!("Clip {} could not be marked failed: {}", clip.id(), update);
                }
                Err(e)
            }
            Err(e) => {
                error!("Clip {} failed: {}", clip.id(), e);
                self.fail(&mut clip).await
            }
        }
    }

    async fn fail(&self, clip: &mut Clip) -> Result<()> {
        clip.mark_error(Utc::now())?;
        self.clips.update(&clip.snapshot()).await?;
        self.events.publish_domain(clip.take_events()).await;
        Ok(())
    }

    /// Returns the object key and size of the uploaded clip
    async fn extract(&self, clip: &Clip, message: &CreateClipMessage) -> Result<(String, u64)> {
        let recording = match self.recordings.find_by_id(clip.recording_id()).await? {
            Some(r) if r.deleted_at.is_none() => r,
            _ => {
                return Err(Error::NotFound(format!(
                    "Recording {} not found",
                    clip.recording_id()
                )))
            }
        };

        let bucket = self.storage_config.bucket_for(&message.tenant_id);
        let ttl = Duration::from_secs(self.storage_config.presign_ttl_secs);
        let source = self
            .storage
            .presign(&bucket, &message.source_path, ttl)
            .await?
            .ok_or_else(|| {
                Error::NotFound(format!("Object {}/{} is missing", bucket, message.source_path))
            })?;

        let offset = (clip.start_time() - recording.started_at)
            .to_std()
            .map_err(|_| {
                Error::Validation(format!(
                    "Clip {} starts before recording {}",
                    clip.id(),
                    recording.id
                ))
            })?;
        let duration = Duration::from_secs(clip.duration_seconds());

        let dir = self.media_config.work_dir.join("clips");
        tokio::fs::create_dir_all(&dir)
            .await
            .map_err(|e| Error::Media(format!("Failed to create {}: {}", dir.display(), e)))?;
        let output = dir.join(format!("{}.mp4", clip.id()));

        let result = self.cut_and_upload(&source, &output, offset, duration, clip, &bucket).await;
        if let Err(e) = tokio::fs::remove_file(&output).await {
            debug!("Failed to remove {}: {}", output.display(), e);
        }
        result
    }

    async fn cut_and_upload(
        &self,
        source: &str,
        output: &std::path::Path,
        offset: Duration,
        duration: Duration,
        clip: &Clip,
        bucket: &str,
    ) -> Result<(String, u64)> {
        if !self.media.clip(source, output, offset, duration).await? {
            return Err(Error::Media(format!("No media extracted for clip {}", clip.id())));
        }
        let size = tokio::fs::metadata(output)
            .await
            .map_err(|e| Error::Media(format!("Failed to stat {}: {}", output.display(), e)))?
            .len();

        let key = format!("{}/clips/{}.mp4", clip.recording_id(), clip.id());
        self.storage.upload(bucket, output, &key).await?;
        Ok((key, size))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::ClipSnapshot;
    use crate::messaging::commands::{CLIPS_EXCHANGE, CLIP_CREATE_KEY};
    use crate::testing::{Harness, TENANT};
    use chrono::Duration as ChronoDuration;

    fn worker(h: &Harness) -> Arc<ClipWorker> {
        ClipWorker::new(
            h.repos.recordings.clone(),
            h.repos.clips.clone(),
            h.storage.clone(),
            h.media.clone(),
            h.events(),
            h.config.storage.clone(),
            h.config.media.clone(),
        )
    }

    async fn pending_clip(h: &Harness) -> (ClipSnapshot, CreateClipMessage) {
        let recording = h.stored_recording(TENANT, 7, Utc::now(), 8192).await;
        let start = recording.started_at + ChronoDuration::seconds(120);
        let clip = Clip::new(
            recording.id,
            start,
            start + ChronoDuration::seconds(30),
            Utc::now(),
        )
        .unwrap()
        .snapshot();
        h.clips.insert(&clip).await.unwrap();
        let message = CreateClipMessage {
            clip_id: clip.id,
            recording_id: recording.id,
            tenant_id: TENANT.into(),
            start_time: clip.start_time,
            end_time: clip.end_time,
            source_path: recording.storage_path.clone().unwrap(),
        };
        (clip, message)
    }

    async fn clip(h: &Harness, id: uuid::Uuid) -> ClipSnapshot {
        h.clips.find_by_id(id).await.unwrap().unwrap()
    }

    #[tokio::test]
    async fn clip_is_cut_at_the_recording_offset() {
        let h = Harness::new();
        let (pending, message) = pending_clip(&h).await;

        worker(&h).process(&message, false).await.unwrap();

        let done = clip(&h, pending.id).await;
        assert_eq!(done.status, ClipStatus::Completed);
        let key = format!("{}/clips/{}.mp4", pending.recording_id, pending.id);
        assert_eq!(done.storage_path.as_deref(), Some(key.as_str()));
        assert_eq!(done.size_bytes, 1024);
        assert!(h.storage.keys(&h.bucket(TENANT)).await.contains(&key));

        let calls = h.media.calls();
        assert!(calls.iter().any(|c| c.starts_with("clip memory://") && c.ends_with(" 120 30")));
    }

    #[tokio::test]
    async fn completed_clip_is_not_reprocessed() {
        let h = Harness::new();
        let (pending, message) = pending_clip(&h).await;
        let worker = worker(&h);

        worker.process(&message, false).await.unwrap();
        worker.process(&message, false).await.unwrap();

        assert_eq!(clip(&h, pending.id).await.status, ClipStatus::Completed);
        assert_eq!(h.media.calls().len(), 1);
    }

    #[tokio::test]
    async fn extraction_failure_marks_error() {
        let h = Harness::new();
        h.media.set_fail_clip(true);
        let (pending, message) = pending_clip(&h).await;

        let received = ReceivedMessage {
            payload: serde_json::to_value(&message).unwrap(),
            retry_count: 0,
            last_attempt: false,
        };
        worker(&h).handle_message(received).await.unwrap();
        assert_eq!(clip(&h, pending.id).await.status, ClipStatus::Error);
    }

    #[tokio::test]
    async fn missing_source_marks_error() {
        let h = Harness::new();
        let (pending, mut message) = pending_clip(&h).await;
        message.source_path = "nowhere/gone.mp4".into();

        worker(&h).process(&message, false).await.unwrap();
        assert_eq!(clip(&h, pending.id).await.status, ClipStatus::Error);
    }

    #[tokio::test]
    async fn storage_failure_is_retried_then_completes() {
        let h = Harness::new();
        let (pending, message) = pending_clip(&h).await;
        let key = format!("{}/clips/{}.mp4", pending.recording_id, pending.id);
        h.storage.fail_key(&key).await;
        let worker = worker(&h);

        let err = worker.process(&message, false).await.unwrap_err();
        assert!(err.is_retryable());
        assert_eq!(clip(&h, pending.id).await.status, ClipStatus::Processing);

        h.storage.clear_failures().await;
        worker.process(&message, false).await.unwrap();
        assert_eq!(clip(&h, pending.id).await.status, ClipStatus::Completed);
    }

    #[tokio::test]
    async fn messages_arrive_through_the_broker() {
        let h = Harness::new();
        let worker = worker(&h);
        worker.subscribe(h.broker.as_ref()).await.unwrap();
        let (pending, message) = pending_clip(&h).await;

        h.broker
            .publish(
                CLIPS_EXCHANGE,
                CLIP_CREATE_KEY,
                &serde_json::to_value(&message).unwrap(),
            )
            .await
            .unwrap();

        for _ in 0..500 {
            if clip(&h, pending.id).await.status == ClipStatus::Completed {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("clip {} was never completed", pending.id);
    }

    #[tokio::test]
    async fn last_attempt_marks_the_clip_failed() {
        let h = Harness::new();
        let (pending, message) = pending_clip(&h).await;
        let key = format!("{}/clips/{}.mp4", pending.recording_id, pending.id);
        h.storage.fail_key(&key).await;

        let err = worker(&h).process(&message, true).await.unwrap_err();
        assert!(err.is_retryable());
        assert_eq!(clip(&h, pending.id).await.status, ClipStatus::Error);
    }

    #[tokio::test(start_paused = true)]
    async fn exhausted_retries_leave_the_clip_failed_and_dead_lettered() {
        let h = Harness::new();
        let worker = worker(&h);
        worker.subscribe(h.broker.as_ref()).await.unwrap();
        let (pending, message) = pending_clip(&h).await;
        let key = format!("{}/clips/{}.mp4", pending.recording_id, pending.id);
        h.storage.fail_key(&key).await;

        h.broker
            .publish(
                CLIPS_EXCHANGE,
                CLIP_CREATE_KEY,
                &serde_json::to_value(&message).unwrap(),
            )
            .await
            .unwrap();

        for _ in 0..2000 {
            if !h.broker.dead_letters("clips").await.is_empty() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert_eq!(h.broker.dead_letters("clips").await.len(), 1);
        assert_eq!(clip(&h, pending.id).await.status, ClipStatus::Error);
    }
}
