use super::events::{DomainEvent, EventLog};
use crate::error::{Error, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

/// Ingestion status of a camera stream
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum StreamStatus {
    Stopped,
    Starting,
    Running,
    Error,
}

impl StreamStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            StreamStatus::Stopped => "STOPPED",
            StreamStatus::Starting => "STARTING",
            StreamStatus::Running => "RUNNING",
            StreamStatus::Error => "ERROR",
        }
    }
}

impl fmt::Display for StreamStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for StreamStatus {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_uppercase().as_str() {
            "STOPPED" => Ok(StreamStatus::Stopped),
            "STARTING" => Ok(StreamStatus::Starting),
            "RUNNING" => Ok(StreamStatus::Running),
            "ERROR" => Ok(StreamStatus::Error),
            other => Err(Error::Validation(format!("Unknown stream status: {}", other))),
        }
    }
}

/// Plain state of a stream, used for persistence and API responses
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StreamSnapshot {
    pub id: Uuid,
    pub tenant_id: String,
    pub camera_id: Uuid,
    pub source_url: String,
    pub status: StreamStatus,
    pub started_at: Option<DateTime<Utc>>,
    pub stopped_at: Option<DateTime<Utc>>,
}

/// Live ingestion of one camera
#[derive(Debug, Clone)]
pub struct Stream {
    id: Uuid,
    tenant_id: String,
    camera_id: Uuid,
    source_url: String,
    status: StreamStatus,
    started_at: Option<DateTime<Utc>>,
    stopped_at: Option<DateTime<Utc>>,
    events: EventLog,
}

impl Stream {
    /// Create a stopped stream
    pub fn new(tenant_id: &str, camera_id: Uuid, source_url: &str) -> Result<Self> {
        if tenant_id.trim().is_empty() {
            return Err(Error::Validation("Stream tenant must not be empty".into()));
        }
        if source_url.trim().is_empty() {
            return Err(Error::Validation("Stream source URL must not be empty".into()));
        }

        Ok(Self {
            id: Uuid::new_v4(),
            tenant_id: tenant_id.to_string(),
            camera_id,
            source_url: source_url.to_string(),
            status: StreamStatus::Stopped,
            started_at: None,
            stopped_at: None,
            events: EventLog::default(),
        })
    }

    /// Rehydrate from persisted state without recording events
    pub fn restore(snapshot: StreamSnapshot) -> Self {
        Self {
            id: snapshot.id,
            tenant_id: snapshot.tenant_id,
            camera_id: snapshot.camera_id,
            source_url: snapshot.source_url,
            status: snapshot.status,
            started_at: snapshot.started_at,
            stopped_at: snapshot.stopped_at,
            events: EventLog::default(),
        }
    }

    pub fn snapshot(&self) -> StreamSnapshot {
        StreamSnapshot {
            id: self.id,
            tenant_id: self.tenant_id.clone(),
            camera_id: self.camera_id,
            source_url: self.source_url.clone(),
            status: self.status,
            started_at: self.started_at,
            stopped_at: self.stopped_at,
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn tenant_id(&self) -> &str {
        &self.tenant_id
    }

    pub fn camera_id(&self) -> Uuid {
        self.camera_id
    }

    pub fn source_url(&self) -> &str {
        &self.source_url
    }

    pub fn status(&self) -> StreamStatus {
        self.status
    }

    pub fn started_at(&self) -> Option<DateTime<Utc>> {
        self.started_at
    }

    pub fn stopped_at(&self) -> Option<DateTime<Utc>> {
        self.stopped_at
    }

    /// Starting or running
    pub fn is_active(&self) -> bool {
        matches!(self.status, StreamStatus::Starting | StreamStatus::Running)
    }

    pub fn is_running(&self) -> bool {
        self.status == StreamStatus::Running
    }

    pub fn start(&mut self, at: DateTime<Utc>) -> Result<()> {
        if !matches!(self.status, StreamStatus::Stopped | StreamStatus::Error) {
            return Err(self.invalid("start"));
        }
        self.status = StreamStatus::Starting;
        self.started_at = Some(at);
        self.stopped_at = None;
        self.events.record(DomainEvent::StreamStarting {
            stream_id: self.id,
            camera_id: self.camera_id,
            at,
        });
        Ok(())
    }

    /// Ingest confirmed the stream is flowing
    pub fn mark_running(&mut self, at: DateTime<Utc>) -> Result<()> {
        if self.status != StreamStatus::Starting {
            return Err(self.invalid("mark running"));
        }
        self.status = StreamStatus::Running;
        self.events.record(DomainEvent::StreamRunning {
            stream_id: self.id,
            at,
        });
        Ok(())
    }

    /// Ingest refused or failed to bring up a starting stream
    pub fn mark_error(&mut self, at: DateTime<Utc>) -> Result<()> {
        if self.status != StreamStatus::Starting {
            return Err(self.invalid("mark error"));
        }
        self.status = StreamStatus::Error;
        self.events.record(DomainEvent::StreamFailed {
            stream_id: self.id,
            at,
        });
        Ok(())
    }

    pub fn stop(&mut self, at: DateTime<Utc>) -> Result<()> {
        if self.status == StreamStatus::Stopped {
            return Err(self.invalid("stop"));
        }
        self.status = StreamStatus::Stopped;
        self.stopped_at = Some(at);
        self.events.record(DomainEvent::StreamStopped {
            stream_id: self.id,
            at,
        });
        Ok(())
    }

    pub fn pending_events(&self) -> &[DomainEvent] {
        self.events.peek()
    }

    pub fn take_events(&mut self) -> Vec<DomainEvent> {
        self.events.take()
    }

    fn invalid(&self, action: &str) -> Error {
        Error::InvalidState(format!(
            "Cannot {} stream {} in status {}",
            action, self.id, self.status
        ))
    }
}
