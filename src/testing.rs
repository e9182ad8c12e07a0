//! In-memory wiring shared by service and worker tests

use crate::config::Config;
use crate::db::repositories::{
    InMemoryAuditRepository, InMemoryClipRepository, InMemoryRecordingRepository,
    InMemoryStreamRepository, RecordingRepository, StreamRepository,
};
use crate::db::Repositories;
use crate::domain::{
    RecordingSnapshot, RecordingStatus, RetentionPolicy, StreamSnapshot, StreamStatus,
};
use crate::media::fake::FakeMedia;
use crate::media::DirectIngestController;
use crate::messaging::{EventPublisher, InMemoryBroker, RetryPolicy};
use crate::storage::InMemoryObjectStorage;
use chrono::{DateTime, Duration, Utc};
use std::sync::Arc;
use tempfile::TempDir;
use uuid::Uuid;

pub(crate) const TENANT: &str = "city-1";

pub(crate) struct Harness {
    pub repos: Repositories,
    pub streams: Arc<InMemoryStreamRepository>,
    pub recordings: Arc<InMemoryRecordingRepository>,
    pub clips: Arc<InMemoryClipRepository>,
    pub audit: Arc<InMemoryAuditRepository>,
    pub storage: Arc<InMemoryObjectStorage>,
    pub broker: Arc<InMemoryBroker>,
    pub media: Arc<FakeMedia>,
    pub config: Config,
    _work_dir: TempDir,
}

impl Harness {
    pub fn new() -> Self {
        let streams = Arc::new(InMemoryStreamRepository::new());
        let recordings = Arc::new(InMemoryRecordingRepository::new());
        let clips = Arc::new(InMemoryClipRepository::new());
        let audit = Arc::new(InMemoryAuditRepository::new());
        let work_dir = tempfile::tempdir().expect("work dir");

        let mut config = Config::default();
        config.media.work_dir = work_dir.path().to_path_buf();

        Self {
            repos: Repositories {
                streams: streams.clone(),
                recordings: recordings.clone(),
                clips: clips.clone(),
                audit: audit.clone(),
            },
            streams,
            recordings,
            clips,
            audit,
            storage: Arc::new(InMemoryObjectStorage::new()),
            broker: Arc::new(InMemoryBroker::new(RetryPolicy::default())),
            media: Arc::new(FakeMedia::default()),
            config,
            _work_dir: work_dir,
        }
    }

    pub fn events(&self) -> EventPublisher {
        EventPublisher::new(self.broker.clone(), &self.config.message_broker.events_exchange)
    }

    pub fn ingest(&self) -> Arc<DirectIngestController> {
        Arc::new(DirectIngestController::new(self.media.clone()))
    }

    pub fn bucket(&self, tenant: &str) -> String {
        self.config.storage.bucket_for(tenant)
    }

    /// A stream already confirmed running
    pub async fn running_stream(&self) -> StreamSnapshot {
        let stream = StreamSnapshot {
            id: Uuid::new_v4(),
            tenant_id: TENANT.to_string(),
            camera_id: Uuid::new_v4(),
            source_url: "rtsp://camera.local/main".to_string(),
            status: StreamStatus::Running,
            started_at: Some(Utc::now()),
            stopped_at: None,
        };
        self.streams.insert(&stream).await.expect("insert stream");
        stream
    }

    /// A stopped recording with an object of `size` bytes in the tenant bucket
    pub async fn stored_recording(
        &self,
        tenant: &str,
        days: u32,
        stopped_at: DateTime<Utc>,
        size: usize,
    ) -> RecordingSnapshot {
        let id = Uuid::new_v4();
        let stream_id = Uuid::new_v4();
        let key = format!("{}/{}.mp4", stream_id, id);
        let recording = RecordingSnapshot {
            id,
            stream_id,
            tenant_id: tenant.to_string(),
            retention_policy: RetentionPolicy::new(days).expect("policy"),
            status: RecordingStatus::Stopped,
            started_at: stopped_at - Duration::hours(1),
            stopped_at: Some(stopped_at),
            storage_path: Some(key.clone()),
            size_bytes: size as u64,
            duration_seconds: 3600,
            incident: false,
            legal_hold: false,
            deleted_at: None,
        };
        self.recordings.put(recording.clone()).await;
        self.storage.put(&self.bucket(tenant), &key, size).await;
        recording
    }

    pub async fn recording(&self, id: Uuid) -> RecordingSnapshot {
        self.recordings
            .find_by_id(id)
            .await
            .expect("find recording")
            .expect("recording exists")
    }
}
