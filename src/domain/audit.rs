use crate::error::{Error, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

/// Tenant used for records written by background workers
pub const SYSTEM_ACTOR: &str = "system";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AuditAction {
    #[serde(rename = "recording.deleted")]
    RecordingDeleted,
    #[serde(rename = "storage.reconciled")]
    StorageReconciled,
    #[serde(rename = "storage.orphan_deleted")]
    OrphanDeleted,
}

impl AuditAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            AuditAction::RecordingDeleted => "recording.deleted",
            AuditAction::StorageReconciled => "storage.reconciled",
            AuditAction::OrphanDeleted => "storage.orphan_deleted",
        }
    }
}

impl fmt::Display for AuditAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AuditAction {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "recording.deleted" => Ok(AuditAction::RecordingDeleted),
            "storage.reconciled" => Ok(AuditAction::StorageReconciled),
            "storage.orphan_deleted" => Ok(AuditAction::OrphanDeleted),
            other => Err(Error::Validation(format!("Unknown audit action: {}", other))),
        }
    }
}

/// Append-only record of a system action
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditRecord {
    pub id: Uuid,
    pub tenant_id: String,
    pub actor: String,
    pub action: AuditAction,
    pub resource_type: String,
    pub resource_id: Option<String>,
    pub metadata: Value,
    pub created_at: DateTime<Utc>,
}

impl AuditRecord {
    /// Record written by a background worker
    pub fn system(
        tenant_id: &str,
        action: AuditAction,
        resource_type: &str,
        resource_id: Option<String>,
        metadata: Value,
        at: DateTime<Utc>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            tenant_id: tenant_id.to_string(),
            actor: SYSTEM_ACTOR.to_string(),
            action,
            resource_type: resource_type.to_string(),
            resource_id,
            metadata,
            created_at: at,
        }
    }
}
