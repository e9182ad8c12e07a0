use super::{from_db_i64, to_db_i64};
use crate::domain::{RecordingSnapshot, RecordingStatus, RetentionPolicy};
use crate::error::Error;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

pub const RECORDING_COLUMNS: &str = "id, stream_id, tenant_id, retention_days, status, started_at, \
     stopped_at, storage_path, size_bytes, duration_seconds, incident, legal_hold, deleted_at";

#[derive(Debug, Clone, sqlx::FromRow)]
pub struct RecordingDb {
    pub id: Uuid,
    pub stream_id: Uuid,
    pub tenant_id: String,
    pub retention_days: i32,
    pub status: RecordingStatus,
    pub started_at: DateTime<Utc>,
    pub stopped_at: Option<DateTime<Utc>>,
    pub storage_path: Option<String>,
    pub size_bytes: i64,
    pub duration_seconds: i64,
    pub incident: bool,
    pub legal_hold: bool,
    pub deleted_at: Option<DateTime<Utc>>,
}

impl TryFrom<RecordingDb> for RecordingSnapshot {
    type Error = Error;

    fn try_from(db: RecordingDb) -> Result<Self, Error> {
        let days = u32::try_from(db.retention_days).map_err(|_| {
            Error::Database(format!(
                "Recording {} has negative retention_days {}",
                db.id, db.retention_days
            ))
        })?;
        let retention_policy = RetentionPolicy::new(days)
            .map_err(|e| Error::Database(format!("Recording {}: {}", db.id, e)))?;

        Ok(Self {
            id: db.id,
            stream_id: db.stream_id,
            tenant_id: db.tenant_id,
            retention_policy,
            status: db.status,
            started_at: db.started_at,
            stopped_at: db.stopped_at,
            storage_path: db.storage_path,
            size_bytes: from_db_i64(db.size_bytes),
            duration_seconds: from_db_i64(db.duration_seconds),
            incident: db.incident,
            legal_hold: db.legal_hold,
            deleted_at: db.deleted_at,
        })
    }
}

impl From<&RecordingSnapshot> for RecordingDb {
    fn from(r: &RecordingSnapshot) -> Self {
        Self {
            id: r.id,
            stream_id: r.stream_id,
            tenant_id: r.tenant_id.clone(),
            retention_days: r.retention_policy.days() as i32,
            status: r.status,
            started_at: r.started_at,
            stopped_at: r.stopped_at,
            storage_path: r.storage_path.clone(),
            size_bytes: to_db_i64(r.size_bytes),
            duration_seconds: to_db_i64(r.duration_seconds),
            incident: r.incident,
            legal_hold: r.legal_hold,
            deleted_at: r.deleted_at,
        }
    }
}

/// Filters for listing recordings; deleted rows are never returned
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RecordingSearchQuery {
    pub tenant_id: Option<String>,
    pub stream_id: Option<Uuid>,
    /// Recordings still running or stopped after this instant
    pub from: Option<DateTime<Utc>>,
    /// Recordings started before this instant
    pub to: Option<DateTime<Utc>>,
    pub status: Option<RecordingStatus>,
    pub limit: Option<i64>,
    pub offset: Option<i64>,
}

impl RecordingSearchQuery {
    pub const DEFAULT_LIMIT: i64 = 500;

    pub fn for_stream(stream_id: Uuid) -> Self {
        Self {
            stream_id: Some(stream_id),
            ..Default::default()
        }
    }

    pub fn between(mut self, from: Option<DateTime<Utc>>, to: Option<DateTime<Utc>>) -> Self {
        self.from = from;
        self.to = to;
        self
    }

    /// In-memory equivalent of the SQL filter
    pub fn matches(&self, r: &RecordingSnapshot) -> bool {
        if r.deleted_at.is_some() {
            return false;
        }
        if let Some(tenant) = &self.tenant_id {
            if &r.tenant_id != tenant {
                return false;
            }
        }
        if let Some(stream_id) = self.stream_id {
            if r.stream_id != stream_id {
                return false;
            }
        }
        if let Some(status) = self.status {
            if r.status != status {
                return false;
            }
        }
        if let Some(from) = self.from {
            if matches!(r.stopped_at, Some(stopped) if stopped < from) {
                return false;
            }
        }
        if let Some(to) = self.to {
            if r.started_at >= to {
                return false;
            }
        }
        true
    }
}

/// Total size and count of stored recordings
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, sqlx::FromRow)]
pub struct RecordingStorageStats {
    pub total_count: i64,
    pub total_size_bytes: i64,
}
