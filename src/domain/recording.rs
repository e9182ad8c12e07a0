use super::events::{DomainEvent, EventLog};
use super::retention_policy::RetentionPolicy;
use crate::error::{Error, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

const BYTES_PER_MB: f64 = 1024.0 * 1024.0;

/// Capture status of a recording
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum RecordingStatus {
    Recording,
    Stopped,
    Error,
}

impl RecordingStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            RecordingStatus::Recording => "RECORDING",
            RecordingStatus::Stopped => "STOPPED",
            RecordingStatus::Error => "ERROR",
        }
    }
}

impl fmt::Display for RecordingStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RecordingStatus {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_uppercase().as_str() {
            "RECORDING" => Ok(RecordingStatus::Recording),
            "STOPPED" => Ok(RecordingStatus::Stopped),
            "ERROR" => Ok(RecordingStatus::Error),
            other => Err(Error::Validation(format!("Unknown recording status: {}", other))),
        }
    }
}

/// Plain state of a recording, used for persistence and API responses
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecordingSnapshot {
    pub id: Uuid,
    pub stream_id: Uuid,
    pub tenant_id: String,
    pub retention_policy: RetentionPolicy,
    pub status: RecordingStatus,
    pub started_at: DateTime<Utc>,
    pub stopped_at: Option<DateTime<Utc>>,
    pub storage_path: Option<String>,
    pub size_bytes: u64,
    pub duration_seconds: u64,
    pub incident: bool,
    pub legal_hold: bool,
    pub deleted_at: Option<DateTime<Utc>>,
}

impl RecordingSnapshot {
    pub fn file_size_mb(&self) -> f64 {
        self.size_bytes as f64 / BYTES_PER_MB
    }
}

/// A continuous capture session of one stream
#[derive(Debug, Clone)]
pub struct Recording {
    id: Uuid,
    stream_id: Uuid,
    tenant_id: String,
    retention_policy: RetentionPolicy,
    status: RecordingStatus,
    started_at: DateTime<Utc>,
    stopped_at: Option<DateTime<Utc>>,
    storage_path: Option<String>,
    size_bytes: u64,
    duration_seconds: u64,
    incident: bool,
    legal_hold: bool,
    deleted_at: Option<DateTime<Utc>>,
    events: EventLog,
}

impl Recording {
    /// Begin a new recording session
    pub fn start(
        stream_id: Uuid,
        tenant_id: &str,
        retention_policy: RetentionPolicy,
        at: DateTime<Utc>,
    ) -> Self {
        let id = Uuid::new_v4();
        let mut events = EventLog::default();
        events.record(DomainEvent::RecordingStarted {
            recording_id: id,
            stream_id,
            retention_days: retention_policy.days(),
            at,
        });

        Self {
            id,
            stream_id,
            tenant_id: tenant_id.to_string(),
            retention_policy,
            status: RecordingStatus::Recording,
            started_at: at,
            stopped_at: None,
            storage_path: None,
            size_bytes: 0,
            duration_seconds: 0,
            incident: false,
            legal_hold: false,
            deleted_at: None,
            events,
        }
    }

    /// Rehydrate from persisted state without recording events
    pub fn restore(snapshot: RecordingSnapshot) -> Self {
        Self {
            id: snapshot.id,
            stream_id: snapshot.stream_id,
            tenant_id: snapshot.tenant_id,
            retention_policy: snapshot.retention_policy,
            status: snapshot.status,
            started_at: snapshot.started_at,
            stopped_at: snapshot.stopped_at,
            storage_path: snapshot.storage_path,
            size_bytes: snapshot.size_bytes,
            duration_seconds: snapshot.duration_seconds,
            incident: snapshot.incident,
            legal_hold: snapshot.legal_hold,
            deleted_at: snapshot.deleted_at,
            events: EventLog::default(),
        }
    }

    pub fn snapshot(&self) -> RecordingSnapshot {
        RecordingSnapshot {
            id: self.id,
            stream_id: self.stream_id,
            tenant_id: self.tenant_id.clone(),
            retention_policy: self.retention_policy,
            status: self.status,
            started_at: self.started_at,
            stopped_at: self.stopped_at,
            storage_path: self.storage_path.clone(),
            size_bytes: self.size_bytes,
            duration_seconds: self.duration_seconds,
            incident: self.incident,
            legal_hold: self.legal_hold,
            deleted_at: self.deleted_at,
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn stream_id(&self) -> Uuid {
        self.stream_id
    }

    pub fn tenant_id(&self) -> &str {
        &self.tenant_id
    }

    pub fn retention_policy(&self) -> RetentionPolicy {
        self.retention_policy
    }

    pub fn status(&self) -> RecordingStatus {
        self.status
    }

    pub fn started_at(&self) -> DateTime<Utc> {
        self.started_at
    }

    pub fn stopped_at(&self) -> Option<DateTime<Utc>> {
        self.stopped_at
    }

    pub fn storage_path(&self) -> Option<&str> {
        self.storage_path.as_deref()
    }

    pub fn size_bytes(&self) -> u64 {
        self.size_bytes
    }

    pub fn file_size_mb(&self) -> f64 {
        self.size_bytes as f64 / BYTES_PER_MB
    }

    pub fn duration_seconds(&self) -> u64 {
        self.duration_seconds
    }

    pub fn incident(&self) -> bool {
        self.incident
    }

    pub fn legal_hold(&self) -> bool {
        self.legal_hold
    }

    pub fn deleted_at(&self) -> Option<DateTime<Utc>> {
        self.deleted_at
    }

    pub fn is_active(&self) -> bool {
        self.status == RecordingStatus::Recording
    }

    pub fn is_deleted(&self) -> bool {
        self.deleted_at.is_some()
    }

    pub fn stop(&mut self, at: DateTime<Utc>) -> Result<()> {
        if !self.is_active() {
            return Err(self.invalid("stop"));
        }
        self.status = RecordingStatus::Stopped;
        self.close(at);
        self.events.record(DomainEvent::RecordingStopped {
            recording_id: self.id,
            stream_id: self.stream_id,
            duration_seconds: self.duration_seconds,
            at,
        });
        Ok(())
    }

    /// Capture failed; the session is closed so the recording still ages out
    pub fn mark_error(&mut self, at: DateTime<Utc>) -> Result<()> {
        if !self.is_active() {
            return Err(self.invalid("mark error"));
        }
        self.status = RecordingStatus::Error;
        self.close(at);
        self.events.record(DomainEvent::RecordingFailed {
            recording_id: self.id,
            stream_id: self.stream_id,
            at,
        });
        Ok(())
    }

    /// Captured media landed in the object store
    pub fn attach_storage(&mut self, storage_path: &str, size_bytes: u64, at: DateTime<Utc>) -> Result<()> {
        if self.is_deleted() {
            return Err(self.invalid("attach storage to"));
        }
        if storage_path.trim().is_empty() {
            return Err(Error::Validation("Storage path must not be empty".into()));
        }
        self.storage_path = Some(storage_path.to_string());
        self.size_bytes = size_bytes;
        self.events.record(DomainEvent::RecordingStored {
            recording_id: self.id,
            storage_path: storage_path.to_string(),
            size_bytes,
            at,
        });
        Ok(())
    }

    pub fn set_incident(&mut self, incident: bool) -> Result<()> {
        if self.is_deleted() {
            return Err(self.invalid("flag"));
        }
        self.incident = incident;
        Ok(())
    }

    pub fn set_legal_hold(&mut self, legal_hold: bool) -> Result<()> {
        if self.is_deleted() {
            return Err(self.invalid("hold"));
        }
        self.legal_hold = legal_hold;
        Ok(())
    }

    /// Stopped longer than the retention period and not exempted by a flag
    pub fn should_be_deleted(&self, now: DateTime<Utc>) -> bool {
        if self.incident || self.legal_hold || self.is_deleted() {
            return false;
        }
        match self.stopped_at {
            Some(stopped_at) => (now - stopped_at).num_days() > i64::from(self.retention_policy.days()),
            None => false,
        }
    }

    /// Soft delete; the row stays for audit and reporting
    pub fn mark_deleted(&mut self, at: DateTime<Utc>) -> Result<()> {
        if self.is_deleted() || self.is_active() {
            return Err(self.invalid("delete"));
        }
        self.deleted_at = Some(at);
        self.events.record(DomainEvent::RecordingDeleted {
            recording_id: self.id,
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

    fn close(&mut self, at: DateTime<Utc>) {
        self.stopped_at = Some(at);
        self.duration_seconds = (at - self.started_at).num_seconds().max(0) as u64;
    }

    fn invalid(&self, action: &str) -> Error {
        let state = if self.is_deleted() {
            "DELETED".to_string()
        } else {
            self.status.to_string()
        };
        Error::InvalidState(format!(
            "Cannot {} recording {} in status {}",
            action, self.id, state
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn recording_started(at: DateTime<Utc>, days: u32) -> Recording {
        Recording::start(
            Uuid::new_v4(),
            "tenant-a",
            RetentionPolicy::new(days).unwrap(),
            at,
        )
    }

    #[test]
    fn new_recording_is_active() {
        let r = recording_started(Utc::now(), 7);
        assert!(r.is_active());
        assert_eq!(r.retention_policy().days(), 7);
        assert!(!r.incident());
        assert!(!r.legal_hold());
        assert!(matches!(
            r.pending_events(),
            [DomainEvent::RecordingStarted { retention_days: 7, .. }]
        ));
    }

    #[test]
    fn stop_sets_duration_in_whole_seconds() {
        let started = Utc::now() - Duration::milliseconds(90_750);
        let mut r = recording_started(started, 7);
        let stopped = started + Duration::milliseconds(90_750);

        r.stop(stopped).unwrap();

        assert_eq!(r.status(), RecordingStatus::Stopped);
        assert_eq!(r.stopped_at(), Some(stopped));
        assert_eq!(r.duration_seconds(), 90);
        assert!(!r.is_active());
    }

    #[test]
    fn stop_twice_is_invalid() {
        let mut r = recording_started(Utc::now(), 7);
        r.stop(Utc::now()).unwrap();
        assert!(matches!(r.stop(Utc::now()), Err(Error::InvalidState(_))));
        assert!(matches!(r.mark_error(Utc::now()), Err(Error::InvalidState(_))));
    }

    #[test]
    fn should_be_deleted_after_retention() {
        let now = Utc::now();
        let mut r = recording_started(now - Duration::days(9), 7);
        r.stop(now - Duration::days(8)).unwrap();
        assert!(r.should_be_deleted(now));
    }

    #[test]
    fn kept_within_retention() {
        let now = Utc::now();
        let mut r = recording_started(now - Duration::days(6), 7);
        r.stop(now - Duration::days(5)).unwrap();
        assert!(!r.should_be_deleted(now));
    }

    #[test]
    fn boundary_uses_whole_days() {
        let now = Utc::now();
        let mut r = recording_started(now - Duration::days(10), 7);
        // 7 days and 23 hours is still 7 whole days
        r.stop(now - Duration::days(7) - Duration::hours(23)).unwrap();
        assert!(!r.should_be_deleted(now));

        let mut r = recording_started(now - Duration::days(10), 7);
        r.stop(now - Duration::days(8)).unwrap();
        assert!(r.should_be_deleted(now));
    }

    #[test]
    fn active_recording_is_never_deleted() {
        let now = Utc::now();
        let r = recording_started(now - Duration::days(100), 7);
        assert!(!r.should_be_deleted(now));
    }

    #[test]
    fn incident_and_legal_hold_exempt() {
        let now = Utc::now();
        let mut incident = recording_started(now - Duration::days(101), 7);
        incident.stop(now - Duration::days(100)).unwrap();
        incident.set_incident(true).unwrap();
        assert!(!incident.should_be_deleted(now));

        let mut held = recording_started(now - Duration::days(101), 30);
        held.stop(now - Duration::days(100)).unwrap();
        held.set_legal_hold(true).unwrap();
        assert!(!held.should_be_deleted(now));

        held.set_legal_hold(false).unwrap();
        assert!(held.should_be_deleted(now));
    }

    #[test]
    fn error_closes_session() {
        let start = Utc::now() - Duration::seconds(30);
        let mut r = recording_started(start, 15);
        r.mark_error(start + Duration::seconds(30)).unwrap();
        assert_eq!(r.status(), RecordingStatus::Error);
        assert_eq!(r.duration_seconds(), 30);
        assert!(r.stopped_at().is_some());
    }

    #[test]
    fn soft_delete_once() {
        let now = Utc::now();
        let mut r = recording_started(now - Duration::days(40), 30);
        assert!(matches!(r.mark_deleted(now), Err(Error::InvalidState(_))));

        r.stop(now - Duration::days(39)).unwrap();
        r.mark_deleted(now).unwrap();
        assert!(r.is_deleted());
        assert!(!r.should_be_deleted(now));
        assert!(matches!(r.mark_deleted(now), Err(Error::InvalidState(_))));
        assert!(matches!(r.set_legal_hold(true), Err(Error::InvalidState(_))));
    }

    #[test]
    fn attach_storage_records_size() {
        let mut r = recording_started(Utc::now(), 7);
        r.attach_storage("s1/r1.mp4", 3 * 1024 * 1024, Utc::now()).unwrap();
        assert_eq!(r.storage_path(), Some("s1/r1.mp4"));
        assert_eq!(r.file_size_mb(), 3.0);
        assert!(matches!(
            r.attach_storage("", 1, Utc::now()),
            Err(Error::Validation(_))
        ));
    }

    #[test]
    fn restore_keeps_state_and_drops_events() {
        let mut r = recording_started(Utc::now(), 30);
        r.stop(Utc::now()).unwrap();
        let snapshot = r.snapshot();
        let restored = Recording::restore(snapshot.clone());
        assert_eq!(restored.snapshot(), snapshot);
        assert!(restored.pending_events().is_empty());
    }
}
