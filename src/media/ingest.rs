use super::{MediaProcessor, StreamIngestController};
use crate::error::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use log::{info, warn};
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use uuid::Uuid;

/// Ingest without a relay server: capture pulls straight from the camera,
/// so starting a stream only verifies the source answers.
pub struct DirectIngestController {
    media: Arc<dyn MediaProcessor>,
    active: RwLock<HashMap<Uuid, (String, DateTime<Utc>)>>,
}

impl DirectIngestController {
    pub fn new(media: Arc<dyn MediaProcessor>) -> Self {
        Self {
            media,
            active: RwLock::new(HashMap::new()),
        }
    }
}

#[async_trait]
impl StreamIngestController for DirectIngestController {
    async fn start_stream(&self, stream_id: Uuid, source_url: &str) -> Result<bool> {
        if !self.media.check_source(source_url).await? {
            warn!("Source for stream {} did not answer: {}", stream_id, source_url);
            return Ok(false);
        }
        self.active
            .write()
            .await
            .insert(stream_id, (source_url.to_string(), Utc::now()));
        info!("Stream {} is live from {}", stream_id, source_url);
        Ok(true)
    }

    async fn stop_stream(&self, stream_id: Uuid) -> Result<bool> {
        Ok(self.active.write().await.remove(&stream_id).is_some())
    }

    async fn get_status(&self, stream_id: Uuid) -> Result<Value> {
        Ok(match self.active.read().await.get(&stream_id) {
            Some((source, since)) => json!({
                "stream_id": stream_id,
                "ready": true,
                "source": source,
                "since": since,
            }),
            None => json!({ "stream_id": stream_id, "ready": false }),
        })
    }
}
