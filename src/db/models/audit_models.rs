use crate::domain::{AuditAction, AuditRecord};
use chrono::{DateTime, Utc};
use serde_json::Value;
use uuid::Uuid;

pub const AUDIT_COLUMNS: &str =
    "id, tenant_id, actor, action, resource_type, resource_id, metadata, created_at";

#[derive(Debug, Clone, sqlx::FromRow)]
pub struct AuditDb {
    pub id: Uuid,
    pub tenant_id: String,
    pub actor: String,
    pub action: AuditAction,
    pub resource_type: String,
    pub resource_id: Option<String>,
    pub metadata: Value,
    pub created_at: DateTime<Utc>,
}

impl From<AuditDb> for AuditRecord {
    fn from(db: AuditDb) -> Self {
        Self {
            id: db.id,
            tenant_id: db.tenant_id,
            actor: db.actor,
            action: db.action,
            resource_type: db.resource_type,
            resource_id: db.resource_id,
            metadata: db.metadata,
            created_at: db.created_at,
        }
    }
}

/// Audit lookup by tenant and creation time
#[derive(Debug, Clone)]
pub struct AuditQuery {
    pub tenant_id: String,
    pub from: DateTime<Utc>,
    pub to: DateTime<Utc>,
    pub action: Option<AuditAction>,
}

impl AuditQuery {
    pub fn matches(&self, record: &AuditRecord) -> bool {
        record.tenant_id == self.tenant_id
            && record.created_at >= self.from
            && record.created_at < self.to
            && self.action.map_or(true, |a| a == record.action)
    }
}
