use crate::db::models::audit_models::AuditQuery;
use crate::db::models::recording_models::{RecordingSearchQuery, RecordingStorageStats};
use crate::domain::{AuditRecord, ClipSnapshot, RecordingSnapshot, StreamSnapshot};
use crate::error::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

pub mod audit;
pub mod clips;
pub mod memory;
pub mod recordings;
pub mod streams;

pub use audit::AuditLogRepository;
pub use clips::ClipsRepository;
pub use memory::{InMemoryAuditRepository, InMemoryClipRepository, InMemoryRecordingRepository, InMemoryStreamRepository};
pub use recordings::RecordingsRepository;
pub use streams::StreamsRepository;

#[async_trait]
pub trait StreamRepository: Send + Sync {
    /// Fails with `Conflict` when the camera already has an active stream
    async fn insert(&self, stream: &StreamSnapshot) -> Result<()>;
    async fn update(&self, stream: &StreamSnapshot) -> Result<()>;
    async fn find_by_id(&self, id: Uuid) -> Result<Option<StreamSnapshot>>;
    async fn find_active_by_camera(&self, camera_id: Uuid) -> Result<Option<StreamSnapshot>>;
    async fn count_active(&self) -> Result<i64>;
    async fn list_tenant_ids(&self) -> Result<Vec<String>>;
}

#[async_trait]
pub trait RecordingRepository: Send + Sync {
    /// Fails with `Conflict` when the stream already has an active recording
    async fn insert(&self, recording: &RecordingSnapshot) -> Result<()>;

    /// Writes status, timing and storage columns. The exemption flags and
    /// `deleted_at` are left alone; they only change through `set_flags` and
    /// `soft_delete`. Fails with `NotFound` when the row is missing or already
    /// soft-deleted.
    async fn update(&self, recording: &RecordingSnapshot) -> Result<()>;

    /// Change the incident and legal-hold flags of a live recording. `None`
    /// leaves a flag as it is. Returns the row as written.
    async fn set_flags(
        &self,
        id: Uuid,
        incident: Option<bool>,
        legal_hold: Option<bool>,
    ) -> Result<RecordingSnapshot>;

    /// Soft-delete the row only if it is still live, inactive and unflagged.
    /// `false` means some other writer got there first and nothing changed.
    async fn soft_delete(&self, id: Uuid, at: DateTime<Utc>) -> Result<bool>;

    /// Revert a `soft_delete` made at `at`
    async fn restore_deleted(&self, id: Uuid, at: DateTime<Utc>) -> Result<()>;

    /// Includes soft-deleted rows
    async fn find_by_id(&self, id: Uuid) -> Result<Option<RecordingSnapshot>>;
    async fn find_active_by_stream(&self, stream_id: Uuid) -> Result<Option<RecordingSnapshot>>;
    async fn search(&self, query: &RecordingSearchQuery) -> Result<Vec<RecordingSnapshot>>;

    /// Unflagged, undeleted recordings stopped more than their retention period ago, oldest first
    async fn find_expired(&self, now: DateTime<Utc>, limit: i64) -> Result<Vec<RecordingSnapshot>>;

    /// Live recordings of a tenant that have an object in storage
    async fn list_stored_by_tenant(&self, tenant_id: &str) -> Result<Vec<RecordingSnapshot>>;

    /// Whether a live recording of the tenant points at this key
    async fn is_key_referenced(&self, tenant_id: &str, storage_path: &str) -> Result<bool>;

    async fn list_tenant_ids(&self) -> Result<Vec<String>>;
    async fn count_active(&self) -> Result<i64>;
    async fn storage_stats(&self, tenant_id: &str) -> Result<RecordingStorageStats>;
}

#[async_trait]
pub trait ClipRepository: Send + Sync {
    async fn insert(&self, clip: &ClipSnapshot) -> Result<()>;
    async fn update(&self, clip: &ClipSnapshot) -> Result<()>;
    async fn find_by_id(&self, id: Uuid) -> Result<Option<ClipSnapshot>>;
    async fn list_by_recording(&self, recording_id: Uuid) -> Result<Vec<ClipSnapshot>>;
}

/// Append-only; there is no update or delete
#[async_trait]
pub trait AuditRepository: Send + Sync {
    async fn append(&self, record: &AuditRecord) -> Result<()>;
    async fn query(&self, query: &AuditQuery) -> Result<Vec<AuditRecord>>;
}
