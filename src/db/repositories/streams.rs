use super::StreamRepository;
use crate::db::models::stream_models::{StreamDb, STREAM_COLUMNS};
use crate::domain::StreamSnapshot;
use crate::error::{Error, Result};
use async_trait::async_trait;
use sqlx::PgPool;
use std::sync::Arc;
use uuid::Uuid;

/// Postgres-backed streams repository
#[derive(Clone)]
pub struct StreamsRepository {
    pub pool: Arc<PgPool>,
}

impl StreamsRepository {
    pub fn new(pool: Arc<PgPool>) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl StreamRepository for StreamsRepository {
    async fn insert(&self, stream: &StreamSnapshot) -> Result<()> {
        let db = StreamDb::from(stream);

        sqlx::query(&format!(
            "INSERT INTO streams ({}) VALUES ($1, $2, $3, $4, $5, $6, $7)",
            STREAM_COLUMNS
        ))
        .bind(db.id)
        .bind(&db.tenant_id)
        .bind(db.camera_id)
        .bind(&db.source_url)
        .bind(db.status)
        .bind(db.started_at)
        .bind(db.stopped_at)
        .execute(&*self.pool)
        .await
        .map_err(|e| match Error::from(e) {
            Error::Conflict(_) => Error::Conflict(format!(
                "Camera {} already has an active stream",
                db.camera_id
            )),
            Error::Database(msg) => Error::Database(format!("Failed to create stream: {}", msg)),
            other => other,
        })?;

        Ok(())
    }

    async fn update(&self, stream: &StreamSnapshot) -> Result<()> {
        let db = StreamDb::from(stream);

        let result = sqlx::query(
            "UPDATE streams SET status = $2, started_at = $3, stopped_at = $4, source_url = $5 WHERE id = $1",
        )
        .bind(db.id)
        .bind(db.status)
        .bind(db.started_at)
        .bind(db.stopped_at)
        .bind(&db.source_url)
        .execute(&*self.pool)
        .await
        .map_err(|e| match Error::from(e) {
            Error::Conflict(_) => Error::Conflict(format!(
                "Camera {} already has an active stream",
                db.camera_id
            )),
            Error::Database(msg) => Error::Database(format!("Failed to update stream: {}", msg)),
            other => other,
        })?;

        if result.rows_affected() == 0 {
            return Err(Error::NotFound(format!("Stream {} not found", db.id)));
        }
        Ok(())
    }

    async fn find_by_id(&self, id: Uuid) -> Result<Option<StreamSnapshot>> {
        let row = sqlx::query_as::<_, StreamDb>(&format!(
            "SELECT {} FROM streams WHERE id = $1",
            STREAM_COLUMNS
        ))
        .bind(id)
        .fetch_optional(&*self.pool)
        .await
        .map_err(|e| Error::Database(format!("Failed to get stream by ID: {}", e)))?;

        Ok(row.map(StreamSnapshot::from))
    }

    async fn find_active_by_camera(&self, camera_id: Uuid) -> Result<Option<StreamSnapshot>> {
        let row = sqlx::query_as::<_, StreamDb>(&format!(
            "SELECT {} FROM streams WHERE camera_id = $1 AND status IN ('STARTING', 'RUNNING')",
            STREAM_COLUMNS
        ))
        .bind(camera_id)
        .fetch_optional(&*self.pool)
        .await
        .map_err(|e| Error::Database(format!("Failed to get active stream: {}", e)))?;

        Ok(row.map(StreamSnapshot::from))
    }

    async fn count_active(&self) -> Result<i64> {
        sqlx::query_scalar::<_, i64>(
            "SELECT COUNT(*) FROM streams WHERE status IN ('STARTING', 'RUNNING')",
        )
        .fetch_one(&*self.pool)
        .await
        .map_err(|e| Error::Database(format!("Failed to count active streams: {}", e)))
    }

    async fn list_tenant_ids(&self) -> Result<Vec<String>> {
        sqlx::query_scalar::<_, String>("SELECT DISTINCT tenant_id FROM streams ORDER BY tenant_id")
            .fetch_all(&*self.pool)
            .await
            .map_err(|e| Error::Database(format!("Failed to list tenants: {}", e)))
    }
}
