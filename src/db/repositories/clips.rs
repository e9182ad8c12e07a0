use super::ClipRepository;
use crate::db::models::clip_models::{ClipDb, CLIP_COLUMNS};
use crate::domain::ClipSnapshot;
use crate::error::{Error, Result};
use async_trait::async_trait;
use sqlx::PgPool;
use std::sync::Arc;
use uuid::Uuid;

#[derive(Clone)]
pub struct ClipsRepository {
    pub pool: Arc<PgPool>,
}

impl ClipsRepository {
    pub fn new(pool: Arc<PgPool>) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl ClipRepository for ClipsRepository {
    async fn insert(&self, clip: &ClipSnapshot) -> Result<()> {
        let db = ClipDb::from(clip);

        sqlx::query(&format!(
            "INSERT INTO clips ({}) VALUES ($1, $2, $3, $4, $5, $6, $7, $8)",
            CLIP_COLUMNS
        ))
        .bind(db.id)
        .bind(db.recording_id)
        .bind(db.start_time)
        .bind(db.end_time)
        .bind(db.status)
        .bind(&db.storage_path)
        .bind(db.size_bytes)
        .bind(db.created_at)
        .execute(&*self.pool)
        .await
        .map_err(|e| Error::Database(format!("Failed to create clip: {}", e)))?;

        Ok(())
    }

    async fn update(&self, clip: &ClipSnapshot) -> Result<()> {
        let db = ClipDb::from(clip);

        let result = sqlx::query(
            "UPDATE clips SET status = $2, storage_path = $3, size_bytes = $4 WHERE id = $1",
        )
        .bind(db.id)
        .bind(db.status)
        .bind(&db.storage_path)
        .bind(db.size_bytes)
        .execute(&*self.pool)
        .await
        .map_err(|e| Error::Database(format!("Failed to update clip: {}", e)))?;

        if result.rows_affected() == 0 {
            return Err(Error::NotFound(format!("Clip {} not found", db.id)));
        }
        Ok(())
    }

    async fn find_by_id(&self, id: Uuid) -> Result<Option<ClipSnapshot>> {
        let row = sqlx::query_as::<_, ClipDb>(&format!(
            "SELECT {} FROM clips WHERE id = $1",
            CLIP_COLUMNS
        ))
        .bind(id)
        .fetch_optional(&*self.pool)
        .await
        .map_err(|e| Error::Database(format!("Failed to get clip by ID: {}", e)))?;

        Ok(row.map(ClipSnapshot::from))
    }

    async fn list_by_recording(&self, recording_id: Uuid) -> Result<Vec<ClipSnapshot>> {
        let rows = sqlx::query_as::<_, ClipDb>(&format!(
            "SELECT {} FROM clips WHERE recording_id = $1 ORDER BY start_time",
            CLIP_COLUMNS
        ))
        .bind(recording_id)
        .fetch_all(&*self.pool)
        .await
        .map_err(|e| Error::Database(format!("Failed to list clips: {}", e)))?;

        Ok(rows.into_iter().map(ClipSnapshot::from).collect())
    }
}
