use super::{from_db_i64, to_db_i64};
use crate::domain::{ClipSnapshot, ClipStatus};
use chrono::{DateTime, Utc};
use uuid::Uuid;

pub const CLIP_COLUMNS: &str =
    "id, recording_id, start_time, end_time, status, storage_path, size_bytes, created_at";

#[derive(Debug, Clone, sqlx::FromRow)]
pub struct ClipDb {
    pub id: Uuid,
    pub recording_id: Uuid,
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
    pub status: ClipStatus,
    pub storage_path: Option<String>,
    pub size_bytes: i64,
    pub created_at: DateTime<Utc>,
}

impl From<ClipDb> for ClipSnapshot {
    fn from(db: ClipDb) -> Self {
        Self {
            id: db.id,
            recording_id: db.recording_id,
            start_time: db.start_time,
            end_time: db.end_time,
            status: db.status,
            storage_path: db.storage_path,
            size_bytes: from_db_i64(db.size_bytes),
            created_at: db.created_at,
        }
    }
}

impl From<&ClipSnapshot> for ClipDb {
    fn from(c: &ClipSnapshot) -> Self {
        Self {
            id: c.id,
            recording_id: c.recording_id,
            start_time: c.start_time,
            end_time: c.end_time,
            status: c.status,
            storage_path: c.storage_path.clone(),
            size_bytes: to_db_i64(c.size_bytes),
            created_at: c.created_at,
        }
    }
}
