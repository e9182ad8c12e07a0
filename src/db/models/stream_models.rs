use crate::domain::{StreamSnapshot, StreamStatus};
use chrono::{DateTime, Utc};
use uuid::Uuid;

pub const STREAM_COLUMNS: &str = "id, tenant_id, camera_id, source_url, status, started_at, stopped_at";

#[derive(Debug, Clone, sqlx::FromRow)]
pub struct StreamDb {
    pub id: Uuid,
    pub tenant_id: String,
    pub camera_id: Uuid,
    pub source_url: String,
    pub status: StreamStatus,
    pub started_at: Option<DateTime<Utc>>,
    pub stopped_at: Option<DateTime<Utc>>,
}

impl From<StreamDb> for StreamSnapshot {
    fn from(db: StreamDb) -> Self {
        Self {
            id: db.id,
            tenant_id: db.tenant_id,
            camera_id: db.camera_id,
            source_url: db.source_url,
            status: db.status,
            started_at: db.started_at,
            stopped_at: db.stopped_at,
        }
    }
}

impl From<&StreamSnapshot> for StreamDb {
    fn from(s: &StreamSnapshot) -> Self {
        Self {
            id: s.id,
            tenant_id: s.tenant_id.clone(),
            camera_id: s.camera_id,
            source_url: s.source_url.clone(),
            status: s.status,
            started_at: s.started_at,
            stopped_at: s.stopped_at,
        }
    }
}
