use crate::db::repositories::{ClipRepository, RecordingRepository};
use crate::domain::{Clip, ClipSnapshot};
use crate::error::{Error, Result};
use crate::messaging::commands::{CreateClipMessage, CLIPS_EXCHANGE, CLIP_CREATE_KEY};
use crate::messaging::{EventPublisher, MessageBroker};
use chrono::{DateTime, Utc};
use log::{error, info};
use std::sync::Arc;
use uuid::Uuid;

pub struct ClipService {
    recordings: Arc<dyn RecordingRepository>,
    clips: Arc<dyn ClipRepository>,
    broker: Arc<dyn MessageBroker>,
    events: EventPublisher,
}

impl ClipService {
    pub fn new(
        recordings: Arc<dyn RecordingRepository>,
        clips: Arc<dyn ClipRepository>,
        broker: Arc<dyn MessageBroker>,
        events: EventPublisher,
    ) -> Self {
        Self {
            recordings,
            clips,
            broker,
            events,
        }
    }

    /// Persist a pending clip over `[start, end)` of a stored recording and queue its extraction
    pub async fn create_clip(
        &self,
        recording_id: Uuid,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<ClipSnapshot> {
        let recording = match self.recordings.find_by_id(recording_id).await? {
            Some(r) if r.deleted_at.is_none() => r,
            _ => {
                return Err(Error::NotFound(format!(
                    "Recording {} not found",
                    recording_id
                )))
            }
        };
        let source_path = recording.storage_path.clone().ok_or_else(|| {
            Error::InvalidState(format!("Recording {} has no stored media yet", recording_id))
        })?;

        let mut clip = Clip::new(recording_id, start, end, Utc::now())?;
        let recorded_until = recording.stopped_at.unwrap_or_else(Utc::now);
        if start < recording.started_at || end > recorded_until {
            return Err(Error::Validation(format!(
                "Clip {} - {} is outside recording {} ({} - {})",
                start, end, recording_id, recording.started_at, recorded_until
            )));
        }

        self.clips.insert(&clip.snapshot()).await?;

        let message = CreateClipMessage {
            clip_id: clip.id(),
            recording_id,
            tenant_id: recording.tenant_id.clone(),
            start_time: start,
            end_time: end,
            source_path,
        };
        let published = match serde_json::to_value(&message) {
            Ok(body) => self.broker.publish(CLIPS_EXCHANGE, CLIP_CREATE_KEY, &body).await,
            Err(e) => Err(e.into()),
        };
        if let Err(e) = published {
            error!("Failed to queue clip {}: {}", clip.id(), e);
            clip.mark_error(Utc::now())?;
            self.clips.update(&clip.snapshot()).await?;
            self.events.publish_domain(clip.take_events()).await;
            return Err(e);
        }

        self.events.publish_domain(clip.take_events()).await;
        info!(
            "Clip {} queued for recording {} ({}s)",
            clip.id(),
            recording_id,
            clip.duration_seconds()
        );
        Ok(clip.snapshot())
    }

    pub async fn get_clip(&self, clip_id: Uuid) -> Result<ClipSnapshot> {
        self.clips
            .find_by_id(clip_id)
            .await?
            .ok_or_else(|| Error::NotFound(format!("Clip {} not found", clip_id)))
    }

    pub async fn list_clips(&self, recording_id: Uuid) -> Result<Vec<ClipSnapshot>> {
        self.clips.list_by_recording(recording_id).await
    }
}
