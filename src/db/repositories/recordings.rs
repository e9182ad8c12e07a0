use super::RecordingRepository;
use crate::db::models::recording_models::{
    RecordingDb, RecordingSearchQuery, RecordingStorageStats, RECORDING_COLUMNS,
};
use crate::domain::{RecordingSnapshot, RecordingStatus};
use crate::error::{Error, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use log::debug;
use sqlx::PgPool;
use std::sync::Arc;
use uuid::Uuid;

/// Postgres-backed recordings repository
#[derive(Clone)]
pub struct RecordingsRepository {
    pub pool: Arc<PgPool>,
}

impl RecordingsRepository {
    pub fn new(pool: Arc<PgPool>) -> Self {
        Self { pool }
    }

    async fn fetch_all(&self, sql: &str, binder: impl FnOnce(Query<'_>) -> Query<'_>) -> Result<Vec<RecordingSnapshot>> {
        let rows = binder(sqlx::query_as::<_, RecordingDb>(sql))
            .fetch_all(&*self.pool)
            .await
            .map_err(|e| Error::Database(format!("Failed to query recordings: {}", e)))?;

        rows.into_iter().map(RecordingSnapshot::try_from).collect()
    }
}

type Query<'q> = sqlx::query::QueryAs<'q, sqlx::Postgres, RecordingDb, sqlx::postgres::PgArguments>;

#[async_trait]
impl RecordingRepository for RecordingsRepository {
    async fn insert(&self, recording: &RecordingSnapshot) -> Result<()> {
        let db = RecordingDb::from(recording);

        sqlx::query(&format!(
            "INSERT INTO recordings ({}) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13)",
            RECORDING_COLUMNS
        ))
        .bind(db.id)
        .bind(db.stream_id)
        .bind(&db.tenant_id)
        .bind(db.retention_days)
        .bind(db.status)
        .bind(db.started_at)
        .bind(db.stopped_at)
        .bind(&db.storage_path)
        .bind(db.size_bytes)
        .bind(db.duration_seconds)
        .bind(db.incident)
        .bind(db.legal_hold)
        .bind(db.deleted_at)
        .execute(&*self.pool)
        .await
        .map_err(|e| match Error::from(e) {
            Error::Conflict(_) => Error::Conflict(format!(
                "Stream {} already has an active recording",
                db.stream_id
            )),
            Error::Database(msg) => Error::Database(format!("Failed to create recording: {}", msg)),
            other => other,
        })?;

        debug!("Inserted recording {} for stream {}", db.id, db.stream_id);
        Ok(())
    }

    async fn update(&self, recording: &RecordingSnapshot) -> Result<()> {
        let db = RecordingDb::from(recording);

        let result = sqlx::query(
            r#"
            UPDATE recordings
            SET status = $2, stopped_at = $3, storage_path = $4, size_bytes = $5,
                duration_seconds = $6
            WHERE id = $1 AND deleted_at IS NULL
            "#,
        )
        .bind(db.id)
        .bind(db.status)
        .bind(db.stopped_at)
        .bind(&db.storage_path)
        .bind(db.size_bytes)
        .bind(db.duration_seconds)
        .execute(&*self.pool)
        .await
        .map_err(|e| Error::Database(format!("Failed to update recording: {}", e)))?;

        if result.rows_affected() == 0 {
            return Err(Error::NotFound(format!(
                "Recording {} not found or already deleted",
                db.id
            )));
        }
        Ok(())
    }

    async fn set_flags(
        &self,
        id: Uuid,
        incident: Option<bool>,
        legal_hold: Option<bool>,
    ) -> Result<RecordingSnapshot> {
        let row = sqlx::query_as::<_, RecordingDb>(&format!(
            r#"
            UPDATE recordings
            SET incident = COALESCE($2, incident), legal_hold = COALESCE($3, legal_hold)
            WHERE id = $1 AND deleted_at IS NULL
            RETURNING {}
            "#,
            RECORDING_COLUMNS
        ))
        .bind(id)
        .bind(incident)
        .bind(legal_hold)
        .fetch_optional(&*self.pool)
        .await
        .map_err(|e| Error::Database(format!("Failed to flag recording: {}", e)))?;

        row.map(RecordingSnapshot::try_from)
            .transpose()?
            .ok_or_else(|| Error::NotFound(format!("Recording {} not found or already deleted", id)))
    }

    async fn soft_delete(&self, id: Uuid, at: DateTime<Utc>) -> Result<bool> {
        let result = sqlx::query(
            r#"
            UPDATE recordings
            SET deleted_at = $2
            WHERE id = $1
              AND deleted_at IS NULL
              AND incident = FALSE
              AND legal_hold = FALSE
              AND status <> 'RECORDING'
            "#,
        )
        .bind(id)
        .bind(at)
        .execute(&*self.pool)
        .await
        .map_err(|e| Error::Database(format!("Failed to soft-delete recording: {}", e)))?;

        Ok(result.rows_affected() == 1)
    }

    async fn restore_deleted(&self, id: Uuid, at: DateTime<Utc>) -> Result<()> {
        sqlx::query("UPDATE recordings SET deleted_at = NULL WHERE id = $1 AND deleted_at = $2")
            .bind(id)
            .bind(at)
            .execute(&*self.pool)
            .await
            .map_err(|e| Error::Database(format!("Failed to restore recording: {}", e)))?;
        Ok(())
    }

    async fn find_by_id(&self, id: Uuid) -> Result<Option<RecordingSnapshot>> {
        let row = sqlx::query_as::<_, RecordingDb>(&format!(
            "SELECT {} FROM recordings WHERE id = $1",
            RECORDING_COLUMNS
        ))
        .bind(id)
        .fetch_optional(&*self.pool)
        .await
        .map_err(|e| Error::Database(format!("Failed to get recording by ID: {}", e)))?;

        row.map(RecordingSnapshot::try_from).transpose()
    }

    async fn find_active_by_stream(&self, stream_id: Uuid) -> Result<Option<RecordingSnapshot>> {
        let row = sqlx::query_as::<_, RecordingDb>(&format!(
            "SELECT {} FROM recordings WHERE stream_id = $1 AND status = $2 AND deleted_at IS NULL",
            RECORDING_COLUMNS
        ))
        .bind(stream_id)
        .bind(RecordingStatus::Recording)
        .fetch_optional(&*self.pool)
        .await
        .map_err(|e| Error::Database(format!("Failed to get active recording: {}", e)))?;

        row.map(RecordingSnapshot::try_from).transpose()
    }

    async fn search(&self, query: &RecordingSearchQuery) -> Result<Vec<RecordingSnapshot>> {
        let sql = format!(
            r#"
            SELECT {} FROM recordings
            WHERE deleted_at IS NULL
              AND ($1::text IS NULL OR tenant_id = $1)
              AND ($2::uuid IS NULL OR stream_id = $2)
              AND ($3::timestamptz IS NULL OR stopped_at IS NULL OR stopped_at >= $3)
              AND ($4::timestamptz IS NULL OR started_at < $4)
              AND ($5::text IS NULL OR status = $5)
            ORDER BY started_at ASC
            LIMIT $6 OFFSET $7
            "#,
            RECORDING_COLUMNS
        );

        self.fetch_all(&sql, |q| {
            q.bind(query.tenant_id.clone())
                .bind(query.stream_id)
                .bind(query.from)
                .bind(query.to)
                .bind(query.status)
                .bind(query.limit.unwrap_or(RecordingSearchQuery::DEFAULT_LIMIT))
                .bind(query.offset.unwrap_or(0))
        })
        .await
    }

    async fn find_expired(&self, now: DateTime<Utc>, limit: i64) -> Result<Vec<RecordingSnapshot>> {
        // whole days elapsed > retention_days  <=>  elapsed >= retention_days + 1 days
        let sql = format!(
            r#"
            SELECT {} FROM recordings
            WHERE deleted_at IS NULL
              AND incident = FALSE
              AND legal_hold = FALSE
              AND status <> 'RECORDING'
              AND stopped_at IS NOT NULL
              AND stopped_at <= $1 - make_interval(days => retention_days + 1)
            ORDER BY stopped_at ASC
            LIMIT $2
            "#,
            RECORDING_COLUMNS
        );

        self.fetch_all(&sql, |q| q.bind(now).bind(limit)).await
    }

    async fn list_stored_by_tenant(&self, tenant_id: &str) -> Result<Vec<RecordingSnapshot>> {
        let sql = format!(
            "SELECT {} FROM recordings WHERE tenant_id = $1 AND deleted_at IS NULL AND storage_path IS NOT NULL",
            RECORDING_COLUMNS
        );
        let tenant = tenant_id.to_string();
        self.fetch_all(&sql, |q| q.bind(tenant)).await
    }

    async fn is_key_referenced(&self, tenant_id: &str, storage_path: &str) -> Result<bool> {
        sqlx::query_scalar::<_, bool>(
            r#"
            SELECT EXISTS (
                SELECT 1 FROM recordings
                WHERE tenant_id = $1 AND storage_path = $2 AND deleted_at IS NULL
            )
            "#,
        )
        .bind(tenant_id)
        .bind(storage_path)
        .fetch_one(&*self.pool)
        .await
        .map_err(|e| Error::Database(format!("Failed to check storage key: {}", e)))
    }

    async fn list_tenant_ids(&self) -> Result<Vec<String>> {
        sqlx::query_scalar::<_, String>("SELECT DISTINCT tenant_id FROM recordings ORDER BY tenant_id")
            .fetch_all(&*self.pool)
            .await
            .map_err(|e| Error::Database(format!("Failed to list tenants: {}", e)))
    }

    async fn count_active(&self) -> Result<i64> {
        sqlx::query_scalar::<_, i64>(
            "SELECT COUNT(*) FROM recordings WHERE status = 'RECORDING' AND deleted_at IS NULL",
        )
        .fetch_one(&*self.pool)
        .await
        .map_err(|e| Error::Database(format!("Failed to count active recordings: {}", e)))
    }

    async fn storage_stats(&self, tenant_id: &str) -> Result<RecordingStorageStats> {
        sqlx::query_as::<_, RecordingStorageStats>(
            r#"
            SELECT COUNT(*)::BIGINT AS total_count,
                   COALESCE(SUM(size_bytes), 0)::BIGINT AS total_size_bytes
            FROM recordings
            WHERE tenant_id = $1 AND deleted_at IS NULL
            "#,
        )
        .bind(tenant_id)
        .fetch_one(&*self.pool)
        .await
        .map_err(|e| Error::Database(format!("Failed to get recording stats: {}", e)))
    }
}
