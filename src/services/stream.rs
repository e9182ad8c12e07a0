use crate::db::repositories::StreamRepository;
use crate::domain::{Stream, StreamSnapshot};
use crate::error::{Error, Result};
use crate::media::StreamIngestController;
use crate::messaging::EventPublisher;
use crate::metrics;
use crate::utils::KeyedLocks;
use chrono::Utc;
use log::{info, warn};
use serde_json::Value;
use std::sync::Arc;
use uuid::Uuid;

/// Start/stop of live camera streams
pub struct StreamService {
    streams: Arc<dyn StreamRepository>,
    ingest: Arc<dyn StreamIngestController>,
    events: EventPublisher,
    camera_locks: KeyedLocks<Uuid>,
}

impl StreamService {
    pub fn new(
        streams: Arc<dyn StreamRepository>,
        ingest: Arc<dyn StreamIngestController>,
        events: EventPublisher,
    ) -> Self {
        Self {
            streams,
            ingest,
            events,
            camera_locks: KeyedLocks::new(),
        }
    }

    /// Create a stream for the camera and hand it to the ingest server.
    /// A refused stream is persisted in `Error` and reported as an ingest error.
    pub async fn start_stream(
        &self,
        camera_id: Uuid,
        tenant_id: &str,
        source_url: &str,
    ) -> Result<StreamSnapshot> {
        let _guard = self.camera_locks.lock(&camera_id).await;

        if let Some(active) = self.streams.find_active_by_camera(camera_id).await? {
            return Err(Error::Conflict(format!(
                "Camera {} already has active stream {}",
                camera_id, active.id
            )));
        }

        let mut stream = Stream::new(tenant_id, camera_id, source_url)?;
        stream.start(Utc::now())?;
        self.streams.insert(&stream.snapshot()).await?;

        let accepted = match self.ingest.start_stream(stream.id(), source_url).await {
            Ok(accepted) => accepted,
            Err(e) => {
                warn!("Ingest failed to start stream {}: {}", stream.id(), e);
                false
            }
        };

        if accepted {
            stream.mark_running(Utc::now())?;
        } else {
            stream.mark_error(Utc::now())?;
        }
        self.streams.update(&stream.snapshot()).await?;
        self.events.publish_domain(stream.take_events()).await;
        self.refresh_gauge().await;

        if !accepted {
            return Err(Error::Ingest(format!(
                "Ingest refused stream {} for camera {}",
                stream.id(),
                camera_id
            )));
        }

        info!("Stream {} running for camera {}", stream.id(), camera_id);
        Ok(stream.snapshot())
    }

    pub async fn stop_stream(&self, stream_id: Uuid) -> Result<StreamSnapshot> {
        let camera_id = self.load(stream_id).await?.camera_id();
        let _guard = self.camera_locks.lock(&camera_id).await;

        // re-read under the lock
        let mut stream = self.load(stream_id).await?;
        stream.stop(Utc::now())?;

        match self.ingest.stop_stream(stream_id).await {
            Ok(true) => {}
            Ok(false) => warn!("Ingest had no session for stream {}", stream_id),
            Err(e) => warn!("Ingest failed to stop stream {}: {}", stream_id, e),
        }

        self.streams.update(&stream.snapshot()).await?;
        self.events.publish_domain(stream.take_events()).await;
        self.refresh_gauge().await;

        info!("Stream {} stopped", stream_id);
        Ok(stream.snapshot())
    }

    /// External confirmation that a starting stream is flowing or has failed
    pub async fn confirm_stream(&self, stream_id: Uuid, running: bool) -> Result<StreamSnapshot> {
        let camera_id = self.load(stream_id).await?.camera_id();
        let _guard = self.camera_locks.lock(&camera_id).await;

        let mut stream = self.load(stream_id).await?;
        if running {
            stream.mark_running(Utc::now())?;
        } else {
            stream.mark_error(Utc::now())?;
        }

        self.streams.update(&stream.snapshot()).await?;
        self.events.publish_domain(stream.take_events()).await;
        self.refresh_gauge().await;
        Ok(stream.snapshot())
    }

    pub async fn get_stream(&self, stream_id: Uuid) -> Result<StreamSnapshot> {
        Ok(self.load(stream_id).await?.snapshot())
    }

    /// Ingest-side view of the stream
    pub async fn ingest_status(&self, stream_id: Uuid) -> Result<Value> {
        self.load(stream_id).await?;
        self.ingest.get_status(stream_id).await
    }

    async fn load(&self, stream_id: Uuid) -> Result<Stream> {
        self.streams
            .find_by_id(stream_id)
            .await?
            .map(Stream::restore)
            .ok_or_else(|| Error::NotFound(format!("Stream {} not found", stream_id)))
    }

    async fn refresh_gauge(&self) {
        match self.streams.count_active().await {
            Ok(count) => metrics::set_active_streams(count),
            Err(e) => warn!("Failed to refresh active streams gauge: {}", e),
        }
    }
}
