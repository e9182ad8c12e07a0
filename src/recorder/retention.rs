use crate::config::{RetentionConfig, StorageConfig};
use crate::db::repositories::{AuditRepository, RecordingRepository};
use crate::domain::{AuditAction, AuditRecord, Recording};
use crate::error::Result;
use crate::messaging::{EventPublisher, EventType};
use crate::metrics;
use crate::storage::ObjectStorage;
use chrono::{DateTime, Utc};
use log::{error, info, warn};
use serde::Serialize;
use serde_json::json;
use std::sync::Arc;

/// Outcome of one retention run
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RetentionSummary {
    pub candidates: usize,
    pub deleted_count: usize,
    pub failed_count: usize,
    pub freed_bytes: u64,
}

/// Deletes recordings whose retention period has elapsed.
///
/// Incident-flagged and legally held recordings are never selected. Each
/// candidate is handled on its own; a failure leaves the row live so the next
/// run retries it.
pub struct RetentionEnforcer {
    recordings: Arc<dyn RecordingRepository>,
    audit: Arc<dyn AuditRepository>,
    storage: Arc<dyn ObjectStorage>,
    storage_config: StorageConfig,
    batch_limit: usize,
    events: Option<EventPublisher>,
}

impl RetentionEnforcer {
    pub fn new(
        recordings: Arc<dyn RecordingRepository>,
        audit: Arc<dyn AuditRepository>,
        storage: Arc<dyn ObjectStorage>,
        storage_config: StorageConfig,
        config: &RetentionConfig,
    ) -> Self {
        Self {
            recordings,
            audit,
            storage,
            storage_config,
            batch_limit: config.batch_limit,
            events: None,
        }
    }

    /// Publish cleanup events through this publisher
    pub fn with_events(mut self, events: EventPublisher) -> Self {
        self.events = Some(events);
        self
    }

    pub async fn enforce(&self) -> Result<RetentionSummary> {
        self.enforce_at(Utc::now()).await
    }

    pub async fn enforce_at(&self, now: DateTime<Utc>) -> Result<RetentionSummary> {
        info!("Running retention enforcement");

        let expired = self
            .recordings
            .find_expired(now, self.batch_limit as i64)
            .await?;

        let mut summary = RetentionSummary {
            candidates: expired.len(),
            ..Default::default()
        };
        if expired.is_empty() {
            info!("No expired recordings found");
        }

        for snapshot in expired {
            let mut recording = Recording::restore(snapshot);
            if !recording.should_be_deleted(now) {
                warn!(
                    "Recording {} was selected but is not deletable, skipping",
                    recording.id()
                );
                continue;
            }

            match self.delete_one(&mut recording, now).await {
                Ok(Some(freed)) => {
                    summary.deleted_count += 1;
                    summary.freed_bytes += freed;
                }
                Ok(None) => info!(
                    "Recording {} was flagged or deleted since selection, skipping",
                    recording.id()
                ),
                Err(e) => {
                    summary.failed_count += 1;
                    error!("Failed to delete expired recording {}: {}", recording.id(), e);
                }
            }
        }

        metrics::record_retention_run(
            summary.deleted_count as u64,
            summary.failed_count as u64,
            summary.freed_bytes,
        );
        if let Some(events) = &self.events {
            events
                .publish(EventType::StorageCleanupCompleted, None, &summary)
                .await;
        }

        info!(
            "Retention run finished: {} candidates, {} deleted, {} failed, {} MB freed",
            summary.candidates,
            summary.deleted_count,
            summary.failed_count,
            summary.freed_bytes / 1024 / 1024
        );
        Ok(summary)
    }

    /// Claim the row with a conditional soft delete, remove the object, then
    /// audit. Returns bytes freed, or `None` when the claim was lost to a flag
    /// or another deleter.
    async fn delete_one(&self, recording: &mut Recording, now: DateTime<Utc>) -> Result<Option<u64>> {
        recording.mark_deleted(now)?;
        if !self.recordings.soft_delete(recording.id(), now).await? {
            return Ok(None);
        }

        let bucket = self.storage_config.bucket_for(recording.tenant_id());
        let mut freed = 0;
        if let Some(path) = recording.storage_path() {
            match self.storage.delete(&bucket, path).await {
                Ok(true) => freed = recording.size_bytes(),
                Ok(false) => warn!(
                    "Object {}/{} of recording {} was already gone",
                    bucket,
                    path,
                    recording.id()
                ),
                Err(e) => {
                    if let Err(restore) = self.recordings.restore_deleted(recording.id(), now).await {
                        error!(
                            "Recording {} stays deleted with its object in place: {}",
                            recording.id(),
                            restore
                        );
                    }
                    return Err(e);
                }
            }
        }

        let metadata = json!({
            "reason": "retention_policy",
            "retention_days": recording.retention_policy().days(),
            "size_bytes": recording.size_bytes(),
            "stream_id": recording.stream_id(),
            "recording_id": recording.id(),
            "storage_path": recording.storage_path(),
            "started_at": recording.started_at(),
            "stopped_at": recording.stopped_at(),
        });
        let record = AuditRecord::system(
            recording.tenant_id(),
            AuditAction::RecordingDeleted,
            "recording",
            Some(recording.id().to_string()),
            metadata,
            now,
        );
        // the row is already gone from every live view, so a lost audit is not retried
        if let Err(e) = self.audit.append(&record).await {
            error!(
                "Recording {} deleted but its audit record was not written: {}",
                recording.id(),
                e
            );
        }

        if let Some(events) = &self.events {
            events.publish_domain(recording.take_events()).await;
        }

        info!(
            "Deleted recording {} ({} days retention, {} bytes)",
            recording.id(),
            recording.retention_policy().days(),
            freed
        );
        Ok(Some(freed))
    }
}
