//! Wiring of repositories, adapters, services and workers

use crate::config::{Backend, Config};
use crate::db::{DatabaseService, Repositories};
use crate::media::{DirectIngestController, FfmpegProcessor, MediaProcessor, StreamIngestController};
use crate::messaging::{create_message_broker, EventPublisher, EventType, MessageBroker};
use crate::recorder::{CaptureWorker, ClipWorker, RetentionEnforcer, Scheduler, StorageReconciler};
use crate::services::{ClipService, RecordingService, StreamService, ThumbnailService};
use crate::storage::{FsObjectStorage, ObjectStorage};
use anyhow::{Context, Result};
use log::{error, info, warn};
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;

pub struct App {
    pub config: Config,
    pub repos: Repositories,
    pub broker: Arc<dyn MessageBroker>,
    pub storage: Arc<dyn ObjectStorage>,
    pub events: EventPublisher,
    pub streams: StreamService,
    pub recordings: RecordingService,
    pub clips: ClipService,
    pub thumbnails: ThumbnailService,
    pub capture_worker: Arc<CaptureWorker>,
    pub clip_worker: Arc<ClipWorker>,
    pub retention: Arc<RetentionEnforcer>,
    pub reconciler: Arc<StorageReconciler>,
    consumer_tags: tokio::sync::Mutex<Vec<String>>,
}

impl App {
    /// Connect the configured backends
    pub async fn build(config: Config) -> Result<Self> {
        let repos = match config.database.backend {
            Backend::External => DatabaseService::new(&config.database)
                .await
                .context("Failed to initialize database")?
                .repositories(),
            Backend::Memory => {
                warn!("Using in-memory repositories; nothing survives a restart");
                Repositories::in_memory()
            }
        };

        let broker = create_message_broker(config.message_broker.clone())
            .await
            .context("Failed to initialize message broker")?;
        info!("Message broker initialized");

        let storage: Arc<dyn ObjectStorage> =
            Arc::new(FsObjectStorage::new(config.storage.root_path.clone()));
        let media: Arc<dyn MediaProcessor> = Arc::new(FfmpegProcessor::new(&config.media));
        let ingest: Arc<dyn StreamIngestController> =
            Arc::new(DirectIngestController::new(media.clone()));

        Ok(Self::assemble(config, repos, broker, storage, media, ingest))
    }

    pub fn assemble(
        config: Config,
        repos: Repositories,
        broker: Arc<dyn MessageBroker>,
        storage: Arc<dyn ObjectStorage>,
        media: Arc<dyn MediaProcessor>,
        ingest: Arc<dyn StreamIngestController>,
    ) -> Self {
        let events = EventPublisher::new(broker.clone(), &config.message_broker.events_exchange);

        let streams = StreamService::new(repos.streams.clone(), ingest, events.clone());
        let recordings = RecordingService::new(
            repos.streams.clone(),
            repos.recordings.clone(),
            broker.clone(),
            events.clone(),
        );
        let clips = ClipService::new(
            repos.recordings.clone(),
            repos.clips.clone(),
            broker.clone(),
            events.clone(),
        );
        let thumbnails = ThumbnailService::new(
            repos.recordings.clone(),
            storage.clone(),
            media.clone(),
            config.storage.clone(),
            config.media.clone(),
        );

        let capture_worker = CaptureWorker::new(
            repos.recordings.clone(),
            storage.clone(),
            media.clone(),
            events.clone(),
            config.storage.clone(),
            config.media.clone(),
        );
        let clip_worker = ClipWorker::new(
            repos.recordings.clone(),
            repos.clips.clone(),
            storage.clone(),
            media,
            events.clone(),
            config.storage.clone(),
            config.media.clone(),
        );
        let retention = Arc::new(
            RetentionEnforcer::new(
                repos.recordings.clone(),
                repos.audit.clone(),
                storage.clone(),
                config.storage.clone(),
                &config.retention,
            )
            .with_events(events.clone()),
        );
        let reconciler = Arc::new(
            StorageReconciler::new(
                repos.streams.clone(),
                repos.recordings.clone(),
                repos.audit.clone(),
                storage.clone(),
                config.storage.clone(),
                config.reconciliation.clone(),
            )
            .with_events(events.clone()),
        );

        Self {
            config,
            repos,
            broker,
            storage,
            events,
            streams,
            recordings,
            clips,
            thumbnails,
            capture_worker,
            clip_worker,
            retention,
            reconciler,
            consumer_tags: tokio::sync::Mutex::new(Vec::new()),
        }
    }

    /// Subscribe the workers and schedule the periodic jobs
    pub async fn start(&self) -> Result<Scheduler> {
        let mut tags = self.consumer_tags.lock().await;
        tags.push(
            self.capture_worker
                .subscribe(self.broker.as_ref())
                .await
                .context("Failed to subscribe capture worker")?,
        );
        tags.push(
            self.clip_worker
                .subscribe(self.broker.as_ref())
                .await
                .context("Failed to subscribe clip worker")?,
        );
        info!("Workers subscribed");

        let mut scheduler = Scheduler::new();
        if self.config.retention.enabled {
            scheduler.schedule(
                self.retention.clone(),
                Duration::from_secs(self.config.retention.interval_secs),
            );
        }
        if self.config.reconciliation.enabled {
            scheduler.schedule(
                self.reconciler.clone(),
                Duration::from_secs(self.config.reconciliation.interval_secs),
            );
        }

        self.events
            .publish(
                EventType::SystemStartup,
                None,
                &json!({
                    "version": env!("CARGO_PKG_VERSION"),
                    "timestamp": chrono::Utc::now().to_rfc3339()
                }),
            )
            .await;
        Ok(scheduler)
    }

    /// Stop consuming, finish running captures, then close the broker
    pub async fn shutdown(&self, scheduler: Scheduler) {
        scheduler.shutdown().await;
        for tag in self.consumer_tags.lock().await.drain(..) {
            if let Err(e) = self.broker.unsubscribe(&tag).await {
                warn!("Failed to cancel consumer {}: {}", tag, e);
            }
        }
        self.capture_worker.shutdown().await;

        self.events
            .publish(
                EventType::SystemShutdown,
                None,
                &json!({"reason": "Normal shutdown"}),
            )
            .await;
        if let Err(e) = self.broker.close().await {
            error!("Failed to close message broker: {}", e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::RecordingStatus;
    use crate::error::Error;
    use crate::media::fake::FakeMedia;
    use crate::messaging::InMemoryBroker;
    use crate::storage::InMemoryObjectStorage;
    use uuid::Uuid;

    fn app() -> (App, tempfile::TempDir) {
        let work_dir = tempfile::tempdir().unwrap();
        let mut config = Config::default();
        config.media.work_dir = work_dir.path().to_path_buf();
        config.retention.enabled = false;
        config.reconciliation.enabled = false;

        let media = Arc::new(FakeMedia::default());
        let app = App::assemble(
            config,
            Repositories::in_memory(),
            Arc::new(InMemoryBroker::default()),
            Arc::new(InMemoryObjectStorage::new()),
            media.clone(),
            Arc::new(DirectIngestController::new(media)),
        );
        (app, work_dir)
    }

    async fn eventually<F, Fut>(mut check: F)
    where
        F: FnMut() -> Fut,
        Fut: std::future::Future<Output = bool>,
    {
        for _ in 0..500 {
            if check().await {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("condition never held");
    }

    #[tokio::test]
    async fn start_conflict_stop_start_again() {
        let (app, _dir) = app();
        let scheduler = app.start().await.unwrap();

        let stream = app
            .streams
            .start_stream(Uuid::new_v4(), "city-9", "rtsp://camera/main")
            .await
            .unwrap();

        let recording = app.recordings.start_recording(stream.id, 15).await.unwrap();
        assert!(matches!(
            app.recordings.start_recording(stream.id, 15).await,
            Err(Error::Conflict(_))
        ));
        let app_ref = &app;
        eventually(|| async move { app_ref.capture_worker.active_captures().await == 1 }).await;

        let stopped = app.recordings.stop_recording(recording.id).await.unwrap();
        assert_eq!(stopped.status, RecordingStatus::Stopped);
        eventually(|| async move {
            app_ref
                .recordings
                .get_recording(recording.id)
                .await
                .map(|r| r.storage_path.is_some())
                .unwrap_or(false)
        })
        .await;

        eventually(|| async move { app_ref.capture_worker.active_captures().await == 0 }).await;

        let again = app.recordings.start_recording(stream.id, 7).await.unwrap();
        assert_ne!(again.id, recording.id);
        eventually(|| async move { app_ref.capture_worker.active_captures().await == 1 }).await;

        app.shutdown(scheduler).await;
        let last = app.recordings.get_recording(again.id).await.unwrap();
        assert_eq!(last.status, RecordingStatus::Stopped);
        assert!(last.storage_path.is_some());
    }
}
