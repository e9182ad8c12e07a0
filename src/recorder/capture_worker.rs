use crate::config::{MediaConfig, StorageConfig};
use crate::db::repositories::RecordingRepository;
use crate::domain::{Recording, RecordingStatus};
use crate::error::{Error, Result};
use crate::media::MediaProcessor;
use crate::messaging::{handler_fn, EventPublisher, MessageBroker, QueueSpec, RecordingCommand};
use crate::recorder::settle;
use crate::storage::ObjectStorage;
use chrono::Utc;
use log::{debug, error, info, warn};
use serde_json::Value;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

/// What a running capture needs to finish on its own
#[derive(Debug, Clone)]
struct CaptureJob {
    recording_id: Uuid,
    stream_id: Uuid,
    tenant_id: String,
    source_url: String,
}

/// Consumes `recording.start` / `recording.stop` and records camera sources
/// into the tenant bucket.
pub struct CaptureWorker {
    recordings: Arc<dyn RecordingRepository>,
    storage: Arc<dyn ObjectStorage>,
    media: Arc<dyn MediaProcessor>,
    events: EventPublisher,
    storage_config: StorageConfig,
    media_config: MediaConfig,
    active: Mutex<HashMap<Uuid, CancellationToken>>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl CaptureWorker {
    pub fn new(
        recordings: Arc<dyn RecordingRepository>,
        storage: Arc<dyn ObjectStorage>,
        media: Arc<dyn MediaProcessor>,
        events: EventPublisher,
        storage_config: StorageConfig,
        media_config: MediaConfig,
    ) -> Arc<Self> {
        Arc::new(Self {
            recordings,
            storage,
            media,
            events,
            storage_config,
            media_config,
            active: Mutex::new(HashMap::new()),
            tasks: Mutex::new(Vec::new()),
        })
    }

    /// Start consuming the `recordings` queue. Returns the consumer tag.
    pub async fn subscribe(self: &Arc<Self>, broker: &dyn MessageBroker) -> Result<String> {
        let worker = self.clone();
        broker
            .consume(
                QueueSpec::recordings(),
                handler_fn(move |message| {
                    let worker = worker.clone();
                    async move { worker.handle_message(message.payload).await }
                }),
            )
            .await
    }

    pub async fn handle_message(self: &Arc<Self>, payload: Value) -> Result<()> {
        let command: RecordingCommand = match serde_json::from_value(payload) {
            Ok(command) => command,
            Err(e) => {
                error!("Dropping malformed recording command: {}", e);
                return Ok(());
            }
        };
        let recording_id = command.recording_id();
        settle(self.handle(command).await, "recording command", recording_id)
    }

    pub async fn handle(self: &Arc<Self>, command: RecordingCommand) -> Result<()> {
        match command {
            RecordingCommand::Start {
                recording_id,
                stream_id,
                tenant_id,
                source_url,
            } => {
                self.start_capture(CaptureJob {
                    recording_id,
                    stream_id,
                    tenant_id,
                    source_url,
                })
                .await
            }
            RecordingCommand::Stop { recording_id } => {
                match self.active.lock().await.get(&recording_id) {
                    Some(stop) => {
                        info!("Stopping capture of recording {}", recording_id);
                        stop.cancel();
                    }
                    None => debug!("No capture running for recording {}", recording_id),
                }
                Ok(())
            }
        }
    }

    pub async fn active_captures(&self) -> usize {
        self.active.lock().await.len()
    }

    /// Stop every capture and wait until each has been stored
    pub async fn shutdown(&self) {
        for stop in self.active.lock().await.values() {
            stop.cancel();
        }
        let tasks: Vec<JoinHandle<()>> = self.tasks.lock().await.drain(..).collect();
        info!("Waiting for {} captures to finish", tasks.len());
        for task in tasks {
            if let Err(e) = task.await {
                error!("Capture task ended abnormally: {}", e);
            }
        }
    }

    async fn start_capture(self: &Arc<Self>, job: CaptureJob) -> Result<()> {
        let mut active = self.active.lock().await;
        if active.contains_key(&job.recording_id) {
            warn!("Recording {} is already being captured", job.recording_id);
            return Ok(());
        }

        // the message may be a redelivery for a session that already ended
        match self.recordings.find_by_id(job.recording_id).await? {
            Some(r) if r.deleted_at.is_none() && r.status == RecordingStatus::Recording => {}
            Some(_) => {
                info!("Recording {} is no longer active, not capturing", job.recording_id);
                return Ok(());
            }
            None => {
                return Err(Error::NotFound(format!(
                    "Recording {} not found",
                    job.recording_id
                )))
            }
        }

        let stop = CancellationToken::new();
        active.insert(job.recording_id, stop.clone());
        drop(active);

        info!(
            "Capturing recording {} from {}",
            job.recording_id, job.source_url
        );
        let worker = self.clone();
        let task = tokio::spawn(async move { worker.run_capture(job, stop).await });

        let mut tasks = self.tasks.lock().await;
        tasks.retain(|t| !t.is_finished());
        tasks.push(task);
        Ok(())
    }

    async fn run_capture(self: Arc<Self>, job: CaptureJob, stop: CancellationToken) {
        let output = self
            .media_config
            .work_dir
            .join("recordings")
            .join(format!("{}.mp4", job.recording_id));
        let max_duration = Duration::from_secs(self.media_config.max_capture_secs);

        let captured = match prepare_dir(&output).await {
            Ok(()) => {
                self.media
                    .capture(&job.source_url, &output, max_duration, stop)
                    .await
            }
            Err(e) => Err(e),
        };

        let stored = match captured {
            Ok(true) => self.store(&job, &output).await.map(Some),
            Ok(false) => {
                warn!("Capture of recording {} produced no media", job.recording_id);
                Ok(None)
            }
            Err(e) => Err(e),
        };

        let finished = match stored {
            Ok(Some((key, size))) => self.finish_stored(&job, &key, size).await,
            Ok(None) => self.finish_failed(&job).await,
            Err(e) => {
                error!("Capture of recording {} failed: {}", job.recording_id, e);
                self.finish_failed(&job).await
            }
        };
        if let Err(e) = finished {
            error!("Failed to finalize recording {}: {}", job.recording_id, e);
        }

        if let Err(e) = tokio::fs::remove_file(&output).await {
            debug!("Failed to remove {}: {}", output.display(), e);
        }
        self.active.lock().await.remove(&job.recording_id);
    }

    /// Upload the captured file to `{stream_id}/{recording_id}.mp4`
    async fn store(&self, job: &CaptureJob, output: &Path) -> Result<(String, u64)> {
        let size = tokio::fs::metadata(output)
            .await
            .map_err(|e| Error::Media(format!("Failed to stat {}: {}", output.display(), e)))?
            .len();
        let bucket = self.storage_config.bucket_for(&job.tenant_id);
        let key = format!("{}/{}.mp4", job.stream_id, job.recording_id);
        self.storage.upload(&bucket, output, &key).await?;
        info!(
            "Stored recording {} as {}/{} ({} bytes)",
            job.recording_id, bucket, key, size
        );
        Ok((key, size))
    }

    async fn finish_stored(&self, job: &CaptureJob, key: &str, size: u64) -> Result<()> {
        let mut recording = self.load(job.recording_id).await?;
        let now = Utc::now();
        if recording.is_active() {
            recording.stop(now)?;
        }
        recording.attach_storage(key, size, now)?;
        self.recordings.update(&recording.snapshot()).await?;
        self.events.publish_domain(recording.take_events()).await;
        Ok(())
    }

    async fn finish_failed(&self, job: &CaptureJob) -> Result<()> {
        let mut recording = self.load(job.recording_id).await?;
        if !recording.is_active() {
            warn!(
                "Recording {} was stopped but has no stored media",
                job.recording_id
            );
            return Ok(());
        }
        recording.mark_error(Utc::now())?;
        self.recordings.update(&recording.snapshot()).await?;
        self.events.publish_domain(recording.take_events()).await;
        Ok(())
    }

    async fn load(&self, recording_id: Uuid) -> Result<Recording> {
        self.recordings
            .find_by_id(recording_id)
            .await?
            .map(Recording::restore)
            .ok_or_else(|| Error::NotFound(format!("Recording {} not found", recording_id)))
    }
}

async fn prepare_dir(output: &Path) -> Result<()> {
    let dir: PathBuf = output
        .parent()
        .map(Path::to_path_buf)
        .unwrap_or_else(|| PathBuf::from("."));
    tokio::fs::create_dir_all(&dir)
        .await
        .map_err(|e| Error::Media(format!("Failed to create {}: {}", dir.display(), e)))
}
