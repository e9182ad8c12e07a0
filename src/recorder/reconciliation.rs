use crate::config::{ReconciliationConfig, StorageConfig};
use crate::db::repositories::{AuditRepository, RecordingRepository, StreamRepository};
use crate::domain::{AuditAction, AuditRecord, RecordingSnapshot};
use crate::error::Result;
use crate::messaging::{EventPublisher, EventType};
use crate::metrics;
use crate::storage::{ObjectStorage, StoredObject};
use crate::utils::KeyedLocks;
use chrono::{DateTime, Utc};
use log::{error, info, warn};
use serde::Serialize;
use serde_json::json;
use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;
use uuid::Uuid;

/// A live recording whose object is absent from the bucket
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MissingFile {
    pub recording_id: Uuid,
    pub key: String,
    pub recorded_bytes: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SizeMismatch {
    pub recording_id: Uuid,
    pub key: String,
    pub stored_bytes: u64,
    pub recorded_bytes: u64,
}

/// Differences between one tenant bucket and the recordings table
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct Discrepancies {
    pub orphaned: Vec<StoredObject>,
    pub missing: Vec<MissingFile>,
    pub size_mismatches: Vec<SizeMismatch>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ReconciliationReport {
    pub tenant_id: String,
    pub bucket: String,
    pub checked_at: DateTime<Utc>,
    pub stored_objects: usize,
    pub recorded_files: usize,
    #[serde(flatten)]
    pub discrepancies: Discrepancies,
}

impl ReconciliationReport {
    pub fn is_clean(&self) -> bool {
        let d = &self.discrepancies;
        d.orphaned.is_empty() && d.missing.is_empty() && d.size_mismatches.is_empty()
    }

    /// Lost recordings, or more orphans than the threshold
    pub fn is_critical(&self, orphan_threshold: usize) -> bool {
        !self.discrepancies.missing.is_empty() || self.discrepancies.orphaned.len() > orphan_threshold
    }
}

/// Result of reconciling every tenant
#[derive(Debug, Clone, Default, Serialize)]
pub struct ReconciliationRun {
    pub reports: Vec<ReconciliationReport>,
    pub failed_tenants: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct OrphanCleanupSummary {
    pub tenant_id: String,
    pub dry_run: bool,
    pub candidates: usize,
    pub deleted_count: usize,
    pub freed_bytes: u64,
}

/// Thumbnails and clips live beside the recordings but are not tracked by them
pub fn is_derived_artifact(key: &str) -> bool {
    key.split('/').any(|part| part == "clips" || part == "thumbnails")
}

/// Compare bucket contents with the recordings that claim an object
pub fn compare(
    objects: &[StoredObject],
    recordings: &[RecordingSnapshot],
    size_tolerance_bytes: u64,
) -> Discrepancies {
    let stored: HashMap<&str, u64> = objects
        .iter()
        .filter(|o| !is_derived_artifact(&o.key))
        .map(|o| (o.key.as_str(), o.size_bytes))
        .collect();
    let recorded: HashMap<&str, &RecordingSnapshot> = recordings
        .iter()
        .filter_map(|r| r.storage_path.as_deref().map(|key| (key, r)))
        .collect();

    let mut result = Discrepancies::default();

    for object in objects {
        if !is_derived_artifact(&object.key) && !recorded.contains_key(object.key.as_str()) {
            result.orphaned.push(object.clone());
        }
    }

    for (key, recording) in &recorded {
        match stored.get(key) {
            None => result.missing.push(MissingFile {
                recording_id: recording.id,
                key: key.to_string(),
                recorded_bytes: recording.size_bytes,
            }),
            Some(&stored_bytes) if stored_bytes.abs_diff(recording.size_bytes) > size_tolerance_bytes => {
                result.size_mismatches.push(SizeMismatch {
                    recording_id: recording.id,
                    key: key.to_string(),
                    stored_bytes,
                    recorded_bytes: recording.size_bytes,
                })
            }
            Some(_) => {}
        }
    }

    result.orphaned.sort_by(|a, b| a.key.cmp(&b.key));
    result.missing.sort_by(|a, b| a.key.cmp(&b.key));
    result.size_mismatches.sort_by(|a, b| a.key.cmp(&b.key));
    result
}

/// Audits tenant buckets against the database
pub struct StorageReconciler {
    streams: Arc<dyn StreamRepository>,
    recordings: Arc<dyn RecordingRepository>,
    audit: Arc<dyn AuditRepository>,
    storage: Arc<dyn ObjectStorage>,
    storage_config: StorageConfig,
    config: ReconciliationConfig,
    events: Option<EventPublisher>,
    tenant_locks: KeyedLocks<String>,
}

impl StorageReconciler {
    pub fn new(
        streams: Arc<dyn StreamRepository>,
        recordings: Arc<dyn RecordingRepository>,
        audit: Arc<dyn AuditRepository>,
        storage: Arc<dyn ObjectStorage>,
        storage_config: StorageConfig,
        config: ReconciliationConfig,
    ) -> Self {
        Self {
            streams,
            recordings,
            audit,
            storage,
            storage_config,
            config,
            events: None,
            tenant_locks: KeyedLocks::new(),
        }
    }

    pub fn with_events(mut self, events: EventPublisher) -> Self {
        self.events = Some(events);
        self
    }

    /// Tenants known to either the streams or the recordings table
    pub async fn tenants(&self) -> Result<Vec<String>> {
        let mut tenants: BTreeSet<String> =
            self.streams.list_tenant_ids().await?.into_iter().collect();
        tenants.extend(self.recordings.list_tenant_ids().await?);
        Ok(tenants.into_iter().collect())
    }

    /// Detection only; a failing tenant is logged and skipped
    pub async fn reconcile_all(&self) -> Result<ReconciliationRun> {
        let tenants = self.tenants().await?;
        info!("Reconciling storage for {} tenants", tenants.len());

        let mut run = ReconciliationRun::default();
        for tenant in tenants {
            match self.reconcile_tenant(&tenant).await {
                Ok(report) => run.reports.push(report),
                Err(e) => {
                    error!("Storage reconciliation failed for tenant {}: {}", tenant, e);
                    run.failed_tenants.push(tenant);
                }
            }
        }
        Ok(run)
    }

    pub async fn reconcile_tenant(&self, tenant_id: &str) -> Result<ReconciliationReport> {
        let _guard = self.tenant_locks.lock(&tenant_id.to_string()).await;
        self.reconcile_locked(tenant_id).await
    }

    /// Delete orphaned objects of a tenant. With `dry_run` only reports what would go.
    pub async fn cleanup_orphans(&self, tenant_id: &str, dry_run: bool) -> Result<OrphanCleanupSummary> {
        let _guard = self.tenant_locks.lock(&tenant_id.to_string()).await;
        let report = self.reconcile_locked(tenant_id).await?;

        let mut summary = OrphanCleanupSummary {
            tenant_id: tenant_id.to_string(),
            dry_run,
            candidates: 0,
            deleted_count: 0,
            freed_bytes: 0,
        };

        for orphan in &report.discrepancies.orphaned {
            // a recording may have been stored since the listing
            if self.recordings.is_key_referenced(tenant_id, &orphan.key).await? {
                warn!("Object {} is referenced again, keeping it", orphan.key);
                continue;
            }
            summary.candidates += 1;

            if dry_run {
                info!(
                    "[dry run] would delete orphan {}/{} ({} bytes)",
                    report.bucket, orphan.key, orphan.size_bytes
                );
                continue;
            }

            match self.storage.delete(&report.bucket, &orphan.key).await {
                Ok(true) => {
                    summary.deleted_count += 1;
                    summary.freed_bytes += orphan.size_bytes;
                    let record = AuditRecord::system(
                        tenant_id,
                        AuditAction::OrphanDeleted,
                        "storage_object",
                        Some(orphan.key.clone()),
                        json!({
                            "bucket": report.bucket,
                            "key": orphan.key,
                            "size_bytes": orphan.size_bytes,
                        }),
                        Utc::now(),
                    );
                    if let Err(e) = self.audit.append(&record).await {
                        error!("Orphan {} deleted but not audited: {}", orphan.key, e);
                    }
                }
                Ok(false) => warn!("Orphan {} disappeared before deletion", orphan.key),
                Err(e) => error!("Failed to delete orphan {}: {}", orphan.key, e),
            }
        }

        if !dry_run {
            metrics::record_orphans_deleted(summary.deleted_count as u64, summary.freed_bytes);
        }
        info!(
            "Orphan cleanup for {}: {} candidates, {} deleted, {} bytes freed{}",
            tenant_id,
            summary.candidates,
            summary.deleted_count,
            summary.freed_bytes,
            if dry_run { " (dry run)" } else { "" }
        );
        Ok(summary)
    }

    async fn reconcile_locked(&self, tenant_id: &str) -> Result<ReconciliationReport> {
        let bucket = self.storage_config.bucket_for(tenant_id);
        let objects = self.storage.list(&bucket, "").await?;
        let recordings = self.recordings.list_stored_by_tenant(tenant_id).await?;
        let discrepancies = compare(&objects, &recordings, self.config.size_tolerance_bytes);

        let report = ReconciliationReport {
            tenant_id: tenant_id.to_string(),
            bucket: bucket.clone(),
            checked_at: Utc::now(),
            stored_objects: objects.len(),
            recorded_files: recordings.len(),
            discrepancies,
        };

        metrics::set_reconciliation_findings(
            tenant_id,
            report.discrepancies.orphaned.len(),
            report.discrepancies.missing.len(),
            report.discrepancies.size_mismatches.len(),
        );

        self.audit
            .append(&AuditRecord::system(
                tenant_id,
                AuditAction::StorageReconciled,
                "bucket",
                Some(bucket),
                serde_json::to_value(&report)?,
                report.checked_at,
            ))
            .await?;

        let counts = json!({
            "tenant_id": tenant_id,
            "orphaned": report.discrepancies.orphaned.len(),
            "missing": report.discrepancies.missing.len(),
            "size_mismatches": report.discrepancies.size_mismatches.len(),
        });
        if report.is_critical(self.config.orphan_alert_threshold) {
            error!(
                "Storage integrity alert for tenant {}: {} missing, {} orphaned",
                tenant_id,
                report.discrepancies.missing.len(),
                report.discrepancies.orphaned.len()
            );
            if let Some(events) = &self.events {
                events
                    .publish(EventType::StorageIntegrityAlert, None, &counts)
                    .await;
            }
        } else if report.is_clean() {
            info!("Storage for tenant {} is consistent", tenant_id);
        } else {
            warn!("Storage discrepancies for tenant {}: {}", tenant_id, counts);
        }
        if let Some(events) = &self.events {
            events.publish(EventType::StorageReconciled, None, &counts).await;
        }

        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{Harness, TENANT};
    use chrono::Duration;

    fn object(key: &str, size: u64) -> StoredObject {
        StoredObject {
            key: key.to_string(),
            size_bytes: size,
        }
    }

    fn row(key: &str, size: u64) -> RecordingSnapshot {
        RecordingSnapshot {
            id: Uuid::new_v4(),
            stream_id: Uuid::new_v4(),
            tenant_id: TENANT.to_string(),
            retention_policy: crate::domain::RetentionPolicy::new(7).unwrap(),
            status: crate::domain::RecordingStatus::Stopped,
            started_at: Utc::now(),
            stopped_at: Some(Utc::now()),
            storage_path: Some(key.to_string()),
            size_bytes: size,
            duration_seconds: 0,
            incident: false,
            legal_hold: false,
            deleted_at: None,
        }
    }

    fn reconciler(h: &Harness) -> StorageReconciler {
        StorageReconciler::new(
            h.repos.streams.clone(),
            h.repos.recordings.clone(),
            h.repos.audit.clone(),
            h.storage.clone(),
            h.config.storage.clone(),
            h.config.reconciliation.clone(),
        )
        .with_events(h.events())
    }

    #[test]
    fn orphaned_and_missing() {
        let d = compare(
            &[object("a", 10), object("b", 20)],
            &[row("a", 10), row("c", 30)],
            1024,
        );
        assert_eq!(d.orphaned, vec![object("b", 20)]);
        assert_eq!(d.missing.len(), 1);
        assert_eq!(d.missing[0].key, "c");
        assert!(d.size_mismatches.is_empty());
    }

    #[test]
    fn size_tolerance() {
        let within = compare(&[object("a", 10)], &[row("a", 15)], 1024);
        assert!(within.size_mismatches.is_empty());

        let beyond = compare(&[object("a", 10)], &[row("a", 5000)], 1024);
        assert_eq!(beyond.size_mismatches.len(), 1);
        assert_eq!(beyond.size_mismatches[0].stored_bytes, 10);
        assert_eq!(beyond.size_mismatches[0].recorded_bytes, 5000);
    }

    #[test]
    fn derived_artifacts_are_not_orphans() {
        let d = compare(
            &[
                object("s/r.mp4", 10),
                object("s/r/thumbnails/0.jpg", 1),
                object("r/clips/c.mp4", 1),
            ],
            &[row("s/r.mp4", 10)],
            0,
        );
        assert!(d.orphaned.is_empty());
    }

    #[tokio::test]
    async fn tenant_run_is_audited_with_full_report() {
        let h = Harness::new();
        let recording = h.stored_recording(TENANT, 7, Utc::now(), 100).await;
        h.storage.put(&h.bucket(TENANT), "stray/file.mp4", 50).await;

        let run = reconciler(&h).reconcile_all().await.unwrap();
        assert_eq!(run.reports.len(), 1);
        let report = &run.reports[0];
        assert_eq!(report.discrepancies.orphaned, vec![object("stray/file.mp4", 50)]);
        assert!(report.discrepancies.missing.is_empty());
        assert!(!report.is_critical(100));

        let audit = h.audit.all().await;
        assert_eq!(audit.len(), 1);
        assert_eq!(audit[0].action, AuditAction::StorageReconciled);
        assert_eq!(audit[0].metadata["orphaned"][0]["key"], "stray/file.mp4");
        assert_eq!(audit[0].metadata["recorded_files"], 1);

        // detection never deletes
        assert_eq!(h.storage.keys(&h.bucket(TENANT)).await.len(), 2);
        assert!(h.recording(recording.id).await.deleted_at.is_none());
    }

    #[tokio::test]
    async fn missing_file_raises_an_alert() {
        let h = Harness::new();
        let recording = h.stored_recording(TENANT, 7, Utc::now(), 100).await;
        h.storage
            .delete(&h.bucket(TENANT), recording.storage_path.as_ref().unwrap())
            .await
            .unwrap();

        let report = reconciler(&h).reconcile_tenant(TENANT).await.unwrap();
        assert!(report.is_critical(100));
        let published = h.broker.published().await;
        assert!(published
            .iter()
            .any(|m| m.routing_key == "storage.integrity_alert"));
    }

    #[tokio::test]
    async fn failing_tenant_does_not_stop_the_run() {
        let h = Harness::new();
        h.stored_recording("city-a", 7, Utc::now(), 10).await;
        h.stored_recording("city-b", 7, Utc::now(), 10).await;
        h.storage.fail_bucket(&h.bucket("city-a")).await;

        let run = reconciler(&h).reconcile_all().await.unwrap();
        assert_eq!(run.failed_tenants, vec!["city-a".to_string()]);
        assert_eq!(run.reports.len(), 1);
        assert_eq!(run.reports[0].tenant_id, "city-b");
    }

    #[tokio::test]
    async fn dry_run_deletes_nothing() {
        let h = Harness::new();
        h.stored_recording(TENANT, 7, Utc::now(), 10).await;
        h.storage.put(&h.bucket(TENANT), "stray/a.mp4", 70).await;

        let summary = reconciler(&h).cleanup_orphans(TENANT, true).await.unwrap();
        assert!(summary.dry_run);
        assert_eq!(summary.candidates, 1);
        assert_eq!(summary.deleted_count, 0);
        assert_eq!(summary.freed_bytes, 0);
        assert!(h
            .storage
            .keys(&h.bucket(TENANT))
            .await
            .contains(&"stray/a.mp4".to_string()));
    }

    #[tokio::test]
    async fn executed_cleanup_deletes_orphans_only() {
        let h = Harness::new();
        let kept = h.stored_recording(TENANT, 7, Utc::now(), 10).await;
        h.storage.put(&h.bucket(TENANT), "stray/a.mp4", 70).await;
        h.storage.put(&h.bucket(TENANT), "stray/b.mp4", 30).await;

        let summary = reconciler(&h).cleanup_orphans(TENANT, false).await.unwrap();
        assert_eq!(summary.deleted_count, 2);
        assert_eq!(summary.freed_bytes, 100);
        assert_eq!(
            h.storage.keys(&h.bucket(TENANT)).await,
            vec![kept.storage_path.clone().unwrap()]
        );

        let orphan_audits = h
            .audit
            .all()
            .await
            .into_iter()
            .filter(|r| r.action == AuditAction::OrphanDeleted)
            .count();
        assert_eq!(orphan_audits, 2);
    }

    #[tokio::test]
    async fn soft_deleted_rows_do_not_protect_their_objects() {
        let h = Harness::new();
        let mut gone = h.stored_recording(TENANT, 7, Utc::now() - Duration::days(9), 10).await;
        gone.deleted_at = Some(Utc::now());
        h.recordings.put(gone.clone()).await;

        let report = reconciler(&h).reconcile_tenant(TENANT).await.unwrap();
        assert_eq!(report.discrepancies.orphaned.len(), 1);
        assert_eq!(report.discrepancies.orphaned[0].key, gone.storage_path.unwrap());
    }
}
