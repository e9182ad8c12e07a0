use super::AuditRepository;
use crate::db::models::audit_models::{AuditDb, AuditQuery, AUDIT_COLUMNS};
use crate::domain::AuditRecord;
use crate::error::{Error, Result};
use async_trait::async_trait;
use sqlx::PgPool;
use std::sync::Arc;

/// Postgres-backed append-only audit log
#[derive(Clone)]
pub struct AuditLogRepository {
    pub pool: Arc<PgPool>,
}

impl AuditLogRepository {
    pub fn new(pool: Arc<PgPool>) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl AuditRepository for AuditLogRepository {
    async fn append(&self, record: &AuditRecord) -> Result<()> {
        sqlx::query(&format!(
            "INSERT INTO audit_logs ({}) VALUES ($1, $2, $3, $4, $5, $6, $7, $8)",
            AUDIT_COLUMNS
        ))
        .bind(record.id)
        .bind(&record.tenant_id)
        .bind(&record.actor)
        .bind(record.action)
        .bind(&record.resource_type)
        .bind(&record.resource_id)
        .bind(&record.metadata)
        .bind(record.created_at)
        .execute(&*self.pool)
        .await
        .map_err(|e| Error::Database(format!("Failed to append audit record: {}", e)))?;

        Ok(())
    }

    async fn query(&self, query: &AuditQuery) -> Result<Vec<AuditRecord>> {
        let rows = sqlx::query_as::<_, AuditDb>(&format!(
            r#"
            SELECT {} FROM audit_logs
            WHERE tenant_id = $1 AND created_at >= $2 AND created_at < $3
              AND ($4::text IS NULL OR action = $4)
            ORDER BY created_at ASC
            "#,
            AUDIT_COLUMNS
        ))
        .bind(&query.tenant_id)
        .bind(query.from)
        .bind(query.to)
        .bind(query.action)
        .fetch_all(&*self.pool)
        .await
        .map_err(|e| Error::Database(format!("Failed to query audit log: {}", e)))?;

        Ok(rows.into_iter().map(AuditRecord::from).collect())
    }
}
