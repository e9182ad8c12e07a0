use super::{AuditRepository, ClipRepository, RecordingRepository, StreamRepository};
use crate::db::models::audit_models::AuditQuery;
use crate::db::models::recording_models::{RecordingSearchQuery, RecordingStorageStats};
use crate::domain::{AuditRecord, ClipSnapshot, Recording, RecordingSnapshot, StreamSnapshot, StreamStatus};
use crate::error::{Error, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::{BTreeSet, HashMap, HashSet};
use tokio::sync::RwLock;
use uuid::Uuid;

/// Process-local streams table
#[derive(Default)]
pub struct InMemoryStreamRepository {
    rows: RwLock<HashMap<Uuid, StreamSnapshot>>,
}

impl InMemoryStreamRepository {
    pub fn new() -> Self {
        Self::default()
    }
}

fn stream_active(s: &StreamSnapshot) -> bool {
    matches!(s.status, StreamStatus::Starting | StreamStatus::Running)
}

#[async_trait]
impl StreamRepository for InMemoryStreamRepository {
    async fn insert(&self, stream: &StreamSnapshot) -> Result<()> {
        let mut rows = self.rows.write().await;
        if rows.contains_key(&stream.id) {
            return Err(Error::Conflict(format!("Stream {} already exists", stream.id)));
        }
        if stream_active(stream)
            && rows
                .values()
                .any(|s| s.camera_id == stream.camera_id && stream_active(s))
        {
            return Err(Error::Conflict(format!(
                "Camera {} already has an active stream",
                stream.camera_id
            )));
        }
        rows.insert(stream.id, stream.clone());
        Ok(())
    }

    async fn update(&self, stream: &StreamSnapshot) -> Result<()> {
        let mut rows = self.rows.write().await;
        if !rows.contains_key(&stream.id) {
            return Err(Error::NotFound(format!("Stream {} not found", stream.id)));
        }
        if stream_active(stream)
            && rows
                .values()
                .any(|s| s.id != stream.id && s.camera_id == stream.camera_id && stream_active(s))
        {
            return Err(Error::Conflict(format!(
                "Camera {} already has an active stream",
                stream.camera_id
            )));
        }
        rows.insert(stream.id, stream.clone());
        Ok(())
    }

    async fn find_by_id(&self, id: Uuid) -> Result<Option<StreamSnapshot>> {
        Ok(self.rows.read().await.get(&id).cloned())
    }

    async fn find_active_by_camera(&self, camera_id: Uuid) -> Result<Option<StreamSnapshot>> {
        Ok(self
            .rows
            .read()
            .await
            .values()
            .find(|s| s.camera_id == camera_id && stream_active(s))
            .cloned())
    }

    async fn count_active(&self) -> Result<i64> {
        Ok(self.rows.read().await.values().filter(|s| stream_active(s)).count() as i64)
    }

    async fn list_tenant_ids(&self) -> Result<Vec<String>> {
        let tenants: BTreeSet<String> = self
            .rows
            .read()
            .await
            .values()
            .map(|s| s.tenant_id.clone())
            .collect();
        Ok(tenants.into_iter().collect())
    }
}

/// Process-local recordings table with the same uniqueness rule as the
/// Postgres partial index
#[derive(Default)]
pub struct InMemoryRecordingRepository {
    rows: RwLock<HashMap<Uuid, RecordingSnapshot>>,
    failing_updates: RwLock<HashSet<Uuid>>,
    pending_holds: RwLock<HashSet<Uuid>>,
}

impl InMemoryRecordingRepository {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every later update of this recording fail with a database error
    pub async fn fail_updates_for(&self, id: Uuid) {
        self.failing_updates.write().await.insert(id);
    }

    /// Put a legal hold on the row right before the next write to it lands,
    /// as a concurrent `set_flags` would after the writer read its snapshot
    pub async fn hold_before_next_write(&self, id: Uuid) {
        self.pending_holds.write().await.insert(id);
    }

    async fn apply_pending_hold(&self, rows: &mut HashMap<Uuid, RecordingSnapshot>, id: Uuid) {
        if self.pending_holds.write().await.remove(&id) {
            if let Some(r) = rows.get_mut(&id) {
                r.legal_hold = true;
            }
        }
    }

    /// Seed a row as-is, bypassing the active-recording check
    pub async fn put(&self, recording: RecordingSnapshot) {
        self.rows.write().await.insert(recording.id, recording);
    }
}

fn recording_active(r: &RecordingSnapshot) -> bool {
    r.status == crate::domain::RecordingStatus::Recording && r.deleted_at.is_none()
}

#[async_trait]
impl RecordingRepository for InMemoryRecordingRepository {
    async fn insert(&self, recording: &RecordingSnapshot) -> Result<()> {
        let mut rows = self.rows.write().await;
        if rows.contains_key(&recording.id) {
            return Err(Error::Conflict(format!("Recording {} already exists", recording.id)));
        }
        if recording_active(recording)
            && rows
                .values()
                .any(|r| r.stream_id == recording.stream_id && recording_active(r))
        {
            return Err(Error::Conflict(format!(
                "Stream {} already has an active recording",
                recording.stream_id
            )));
        }
        rows.insert(recording.id, recording.clone());
        Ok(())
    }

    async fn update(&self, recording: &RecordingSnapshot) -> Result<()> {
        if self.failing_updates.read().await.contains(&recording.id) {
            return Err(Error::Database(format!(
                "Failed to update recording: injected failure for {}",
                recording.id
            )));
        }

        let mut rows = self.rows.write().await;
        self.apply_pending_hold(&mut rows, recording.id).await;
        match rows.get_mut(&recording.id) {
            Some(existing) if existing.deleted_at.is_none() => {
                existing.status = recording.status;
                existing.stopped_at = recording.stopped_at;
                existing.storage_path = recording.storage_path.clone();
                existing.size_bytes = recording.size_bytes;
                existing.duration_seconds = recording.duration_seconds;
                Ok(())
            }
            _ => Err(Error::NotFound(format!(
                "Recording {} not found or already deleted",
                recording.id
            ))),
        }
    }

    async fn set_flags(
        &self,
        id: Uuid,
        incident: Option<bool>,
        legal_hold: Option<bool>,
    ) -> Result<RecordingSnapshot> {
        let mut rows = self.rows.write().await;
        match rows.get_mut(&id) {
            Some(existing) if existing.deleted_at.is_none() => {
                if let Some(incident) = incident {
                    existing.incident = incident;
                }
                if let Some(legal_hold) = legal_hold {
                    existing.legal_hold = legal_hold;
                }
                Ok(existing.clone())
            }
            _ => Err(Error::NotFound(format!(
                "Recording {} not found or already deleted",
                id
            ))),
        }
    }

    async fn soft_delete(&self, id: Uuid, at: DateTime<Utc>) -> Result<bool> {
        if self.failing_updates.read().await.contains(&id) {
            return Err(Error::Database(format!(
                "Failed to soft-delete recording: injected failure for {}",
                id
            )));
        }

        let mut rows = self.rows.write().await;
        self.apply_pending_hold(&mut rows, id).await;
        match rows.get_mut(&id) {
            Some(r) if r.deleted_at.is_none() && !r.incident && !r.legal_hold && !recording_active(r) => {
                r.deleted_at = Some(at);
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn restore_deleted(&self, id: Uuid, at: DateTime<Utc>) -> Result<()> {
        if let Some(r) = self.rows.write().await.get_mut(&id) {
            if r.deleted_at == Some(at) {
                r.deleted_at = None;
            }
        }
        Ok(())
    }

    async fn find_by_id(&self, id: Uuid) -> Result<Option<RecordingSnapshot>> {
        Ok(self.rows.read().await.get(&id).cloned())
    }

    async fn find_active_by_stream(&self, stream_id: Uuid) -> Result<Option<RecordingSnapshot>> {
        Ok(self
            .rows
            .read()
            .await
            .values()
            .find(|r| r.stream_id == stream_id && recording_active(r))
            .cloned())
    }

    async fn search(&self, query: &RecordingSearchQuery) -> Result<Vec<RecordingSnapshot>> {
        let mut found: Vec<RecordingSnapshot> = self
            .rows
            .read()
            .await
            .values()
            .filter(|r| query.matches(r))
            .cloned()
            .collect();
        found.sort_by_key(|r| r.started_at);

        let offset = query.offset.unwrap_or(0).max(0) as usize;
        let limit = query
            .limit
            .unwrap_or(RecordingSearchQuery::DEFAULT_LIMIT)
            .max(0) as usize;
        Ok(found.into_iter().skip(offset).take(limit).collect())
    }

    async fn find_expired(&self, now: DateTime<Utc>, limit: i64) -> Result<Vec<RecordingSnapshot>> {
        let mut expired: Vec<RecordingSnapshot> = self
            .rows
            .read()
            .await
            .values()
            .filter(|r| !recording_active(r) && Recording::restore((*r).clone()).should_be_deleted(now))
            .cloned()
            .collect();
        expired.sort_by_key(|r| r.stopped_at);
        expired.truncate(limit.max(0) as usize);
        Ok(expired)
    }

    async fn list_stored_by_tenant(&self, tenant_id: &str) -> Result<Vec<RecordingSnapshot>> {
        Ok(self
            .rows
            .read()
            .await
            .values()
            .filter(|r| r.tenant_id == tenant_id && r.deleted_at.is_none() && r.storage_path.is_some())
            .cloned()
            .collect())
    }

    async fn is_key_referenced(&self, tenant_id: &str, storage_path: &str) -> Result<bool> {
        Ok(self.rows.read().await.values().any(|r| {
            r.tenant_id == tenant_id
                && r.deleted_at.is_none()
                && r.storage_path.as_deref() == Some(storage_path)
        }))
    }

    async fn list_tenant_ids(&self) -> Result<Vec<String>> {
        let tenants: BTreeSet<String> = self
            .rows
            .read()
            .await
            .values()
            .map(|r| r.tenant_id.clone())
            .collect();
        Ok(tenants.into_iter().collect())
    }

    async fn count_active(&self) -> Result<i64> {
        Ok(self
            .rows
            .read()
            .await
            .values()
            .filter(|r| recording_active(r))
            .count() as i64)
    }

    async fn storage_stats(&self, tenant_id: &str) -> Result<RecordingStorageStats> {
        let rows = self.rows.read().await;
        let live = rows
            .values()
            .filter(|r| r.tenant_id == tenant_id && r.deleted_at.is_none());
        let mut stats = RecordingStorageStats::default();
        for r in live {
            stats.total_count += 1;
            stats.total_size_bytes += r.size_bytes as i64;
        }
        Ok(stats)
    }
}

#[derive(Default)]
pub struct InMemoryClipRepository {
    rows: RwLock<HashMap<Uuid, ClipSnapshot>>,
}

impl InMemoryClipRepository {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ClipRepository for InMemoryClipRepository {
    async fn insert(&self, clip: &ClipSnapshot) -> Result<()> {
        let mut rows = self.rows.write().await;
        if rows.contains_key(&clip.id) {
            return Err(Error::Conflict(format!("Clip {} already exists", clip.id)));
        }
        rows.insert(clip.id, clip.clone());
        Ok(())
    }

    async fn update(&self, clip: &ClipSnapshot) -> Result<()> {
        let mut rows = self.rows.write().await;
        if !rows.contains_key(&clip.id) {
            return Err(Error::NotFound(format!("Clip {} not found", clip.id)));
        }
        rows.insert(clip.id, clip.clone());
        Ok(())
    }

    async fn find_by_id(&self, id: Uuid) -> Result<Option<ClipSnapshot>> {
        Ok(self.rows.read().await.get(&id).cloned())
    }

    async fn list_by_recording(&self, recording_id: Uuid) -> Result<Vec<ClipSnapshot>> {
        let mut clips: Vec<ClipSnapshot> = self
            .rows
            .read()
            .await
            .values()
            .filter(|c| c.recording_id == recording_id)
            .cloned()
            .collect();
        clips.sort_by_key(|c| c.start_time);
        Ok(clips)
    }
}

#[derive(Default)]
pub struct InMemoryAuditRepository {
    records: RwLock<Vec<AuditRecord>>,
}

impl InMemoryAuditRepository {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn all(&self) -> Vec<AuditRecord> {
        self.records.read().await.clone()
    }
}

#[async_trait]
impl AuditRepository for InMemoryAuditRepository {
    async fn append(&self, record: &AuditRecord) -> Result<()> {
        self.records.write().await.push(record.clone());
        Ok(())
    }

    async fn query(&self, query: &AuditQuery) -> Result<Vec<AuditRecord>> {
        let mut found: Vec<AuditRecord> = self
            .records
            .read()
            .await
            .iter()
            .filter(|r| query.matches(r))
            .cloned()
            .collect();
        found.sort_by_key(|r| r.created_at);
        Ok(found)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{AuditAction, RetentionPolicy, Stream};
    use chrono::Duration;
    use serde_json::json;

    fn recording(stream_id: Uuid, started: DateTime<Utc>) -> Recording {
        Recording::start(stream_id, "t1", RetentionPolicy::new(7).unwrap(), started)
    }

    #[tokio::test]
    async fn second_active_recording_conflicts() {
        let repo = InMemoryRecordingRepository::new();
        let stream_id = Uuid::new_v4();
        repo.insert(&recording(stream_id, Utc::now()).snapshot()).await.unwrap();

        let err = repo
            .insert(&recording(stream_id, Utc::now()).snapshot())
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Conflict(_)));

        // another stream is fine
        repo.insert(&recording(Uuid::new_v4(), Utc::now()).snapshot()).await.unwrap();
        assert_eq!(repo.count_active().await.unwrap(), 2);
    }

    #[tokio::test]
    async fn stopped_recording_frees_the_stream() {
        let repo = InMemoryRecordingRepository::new();
        let stream_id = Uuid::new_v4();
        let mut first = recording(stream_id, Utc::now());
        repo.insert(&first.snapshot()).await.unwrap();
        first.stop(Utc::now()).unwrap();
        repo.update(&first.snapshot()).await.unwrap();

        repo.insert(&recording(stream_id, Utc::now()).snapshot()).await.unwrap();
        assert!(repo.find_active_by_stream(stream_id).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn expired_excludes_flagged_and_orders_oldest_first() {
        let repo = InMemoryRecordingRepository::new();
        let now = Utc::now();

        let mut old = recording(Uuid::new_v4(), now - Duration::days(40));
        old.stop(now - Duration::days(39)).unwrap();
        let mut older = recording(Uuid::new_v4(), now - Duration::days(50));
        older.stop(now - Duration::days(49)).unwrap();
        let mut held = recording(Uuid::new_v4(), now - Duration::days(50));
        held.stop(now - Duration::days(49)).unwrap();
        held.set_legal_hold(true).unwrap();
        let mut fresh = recording(Uuid::new_v4(), now - Duration::days(2));
        fresh.stop(now - Duration::days(1)).unwrap();

        for r in [&old, &older, &held, &fresh] {
            repo.insert(&r.snapshot()).await.unwrap();
        }

        let expired = repo.find_expired(now, 1000).await.unwrap();
        let ids: Vec<Uuid> = expired.iter().map(|r| r.id).collect();
        assert_eq!(ids, vec![older.id(), old.id()]);

        assert_eq!(repo.find_expired(now, 1).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn deleted_rows_cannot_be_updated() {
        let repo = InMemoryRecordingRepository::new();
        let now = Utc::now();
        let mut r = recording(Uuid::new_v4(), now - Duration::days(20));
        r.stop(now - Duration::days(19)).unwrap();
        repo.insert(&r.snapshot()).await.unwrap();
        assert!(repo.soft_delete(r.id(), now).await.unwrap());
        assert!(!repo.soft_delete(r.id(), now).await.unwrap());

        assert!(matches!(repo.update(&r.snapshot()).await, Err(Error::NotFound(_))));
        assert!(matches!(
            repo.set_flags(r.id(), None, Some(true)).await,
            Err(Error::NotFound(_))
        ));
        assert!(repo.search(&RecordingSearchQuery::default()).await.unwrap().is_empty());
        assert!(repo.find_by_id(r.id()).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn flagged_or_active_rows_are_not_soft_deleted() {
        let repo = InMemoryRecordingRepository::new();
        let now = Utc::now();
        let active = recording(Uuid::new_v4(), now - Duration::days(20));
        let mut held = recording(Uuid::new_v4(), now - Duration::days(20));
        held.stop(now - Duration::days(19)).unwrap();
        repo.insert(&active.snapshot()).await.unwrap();
        repo.insert(&held.snapshot()).await.unwrap();
        repo.set_flags(held.id(), None, Some(true)).await.unwrap();

        assert!(!repo.soft_delete(active.id(), now).await.unwrap());
        assert!(!repo.soft_delete(held.id(), now).await.unwrap());
        assert!(repo.find_by_id(held.id()).await.unwrap().unwrap().deleted_at.is_none());
    }

    #[tokio::test]
    async fn restore_only_reverts_the_matching_delete() {
        let repo = InMemoryRecordingRepository::new();
        let now = Utc::now();
        let mut r = recording(Uuid::new_v4(), now - Duration::days(20));
        r.stop(now - Duration::days(19)).unwrap();
        repo.insert(&r.snapshot()).await.unwrap();
        assert!(repo.soft_delete(r.id(), now).await.unwrap());

        repo.restore_deleted(r.id(), now - Duration::seconds(1)).await.unwrap();
        assert!(repo.find_by_id(r.id()).await.unwrap().unwrap().deleted_at.is_some());
        repo.restore_deleted(r.id(), now).await.unwrap();
        assert!(repo.find_by_id(r.id()).await.unwrap().unwrap().deleted_at.is_none());
    }

    #[tokio::test]
    async fn update_from_a_stale_snapshot_keeps_newer_flags() {
        let repo = InMemoryRecordingRepository::new();
        let mut r = recording(Uuid::new_v4(), Utc::now());
        repo.insert(&r.snapshot()).await.unwrap();

        repo.set_flags(r.id(), Some(true), Some(true)).await.unwrap();
        r.stop(Utc::now()).unwrap();
        repo.update(&r.snapshot()).await.unwrap();

        let stored = repo.find_by_id(r.id()).await.unwrap().unwrap();
        assert_eq!(stored.status, crate::domain::RecordingStatus::Stopped);
        assert!(stored.incident);
        assert!(stored.legal_hold);
    }

    #[tokio::test]
    async fn one_active_stream_per_camera() {
        let repo = InMemoryStreamRepository::new();
        let camera = Uuid::new_v4();
        let mut a = Stream::new("t1", camera, "rtsp://cam/a").unwrap();
        a.start(Utc::now()).unwrap();
        repo.insert(&a.snapshot()).await.unwrap();

        let mut b = Stream::new("t1", camera, "rtsp://cam/b").unwrap();
        b.start(Utc::now()).unwrap();
        assert!(matches!(repo.insert(&b.snapshot()).await, Err(Error::Conflict(_))));
        assert_eq!(repo.count_active().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn audit_query_by_tenant_and_range() {
        let repo = InMemoryAuditRepository::new();
        let now = Utc::now();
        for (tenant, at) in [("t1", now - Duration::days(2)), ("t1", now), ("t2", now)] {
            let record = AuditRecord::system(
                tenant,
                AuditAction::StorageReconciled,
                "storage",
                None,
                json!({}),
                at,
            );
            repo.append(&record).await.unwrap();
        }

        let found = repo
            .query(&AuditQuery {
                tenant_id: "t1".into(),
                from: now - Duration::hours(1),
                to: now + Duration::hours(1),
                action: None,
            })
            .await
            .unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].tenant_id, "t1");
    }
}
