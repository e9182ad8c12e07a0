use super::events::{DomainEvent, EventLog};
use crate::error::{Error, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ClipStatus {
    Pending,
    Processing,
    Completed,
    Error,
}

impl ClipStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ClipStatus::Pending => "PENDING",
            ClipStatus::Processing => "PROCESSING",
            ClipStatus::Completed => "COMPLETED",
            ClipStatus::Error => "ERROR",
        }
    }
}

impl fmt::Display for ClipStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ClipStatus {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_uppercase().as_str() {
            "PENDING" => Ok(ClipStatus::Pending),
            "PROCESSING" => Ok(ClipStatus::Processing),
            "COMPLETED" => Ok(ClipStatus::Completed),
            "ERROR" => Ok(ClipStatus::Error),
            other => Err(Error::Validation(format!("Unknown clip status: {}", other))),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClipSnapshot {
    pub id: Uuid,
    pub recording_id: Uuid,
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
    pub status: ClipStatus,
    pub storage_path: Option<String>,
    pub size_bytes: u64,
    pub created_at: DateTime<Utc>,
}

impl ClipSnapshot {
    pub fn duration_seconds(&self) -> u64 {
        (self.end_time - self.start_time).num_seconds().max(0) as u64
    }
}

/// Exported time range of a recording
#[derive(Debug, Clone)]
pub struct Clip {
    id: Uuid,
    recording_id: Uuid,
    start_time: DateTime<Utc>,
    end_time: DateTime<Utc>,
    status: ClipStatus,
    storage_path: Option<String>,
    size_bytes: u64,
    created_at: DateTime<Utc>,
    events: EventLog,
}

impl Clip {
    pub fn new(
        recording_id: Uuid,
        start_time: DateTime<Utc>,
        end_time: DateTime<Utc>,
        at: DateTime<Utc>,
    ) -> Result<Self> {
        if end_time <= start_time {
            return Err(Error::Validation(format!(
                "Clip end {} must be after start {}",
                end_time, start_time
            )));
        }

        let id = Uuid::new_v4();
        let mut events = EventLog::default();
        events.record(DomainEvent::ClipRequested {
            clip_id: id,
            recording_id,
            at,
        });

        Ok(Self {
            id,
            recording_id,
            start_time,
            end_time,
            status: ClipStatus::Pending,
            storage_path: None,
            size_bytes: 0,
            created_at: at,
            events,
        })
    }

    pub fn restore(snapshot: ClipSnapshot) -> Self {
        Self {
            id: snapshot.id,
            recording_id: snapshot.recording_id,
            start_time: snapshot.start_time,
            end_time: snapshot.end_time,
            status: snapshot.status,
            storage_path: snapshot.storage_path,
            size_bytes: snapshot.size_bytes,
            created_at: snapshot.created_at,
            events: EventLog::default(),
        }
    }

    pub fn snapshot(&self) -> ClipSnapshot {
        ClipSnapshot {
            id: self.id,
            recording_id: self.recording_id,
            start_time: self.start_time,
            end_time: self.end_time,
            status: self.status,
            storage_path: self.storage_path.clone(),
            size_bytes: self.size_bytes,
            created_at: self.created_at,
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn recording_id(&self) -> Uuid {
        self.recording_id
    }

    pub fn start_time(&self) -> DateTime<Utc> {
        self.start_time
    }

    pub fn end_time(&self) -> DateTime<Utc> {
        self.end_time
    }

    pub fn status(&self) -> ClipStatus {
        self.status
    }

    pub fn storage_path(&self) -> Option<&str> {
        self.storage_path.as_deref()
    }

    pub fn size_bytes(&self) -> u64 {
        self.size_bytes
    }

    pub fn file_size_mb(&self) -> f64 {
        self.size_bytes as f64 / (1024.0 * 1024.0)
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn duration_seconds(&self) -> u64 {
        (self.end_time - self.start_time).num_seconds().max(0) as u64
    }

    /// Not yet finished, successfully or not
    pub fn is_processing(&self) -> bool {
        matches!(self.status, ClipStatus::Pending | ClipStatus::Processing)
    }

    pub fn mark_processing(&mut self, at: DateTime<Utc>) -> Result<()> {
        if self.status != ClipStatus::Pending {
            return Err(self.invalid("start processing"));
        }
        self.status = ClipStatus::Processing;
        self.events.record(DomainEvent::ClipProcessing { clip_id: self.id, at });
        Ok(())
    }

    pub fn mark_completed(&mut self, storage_path: &str, size_bytes: u64, at: DateTime<Utc>) -> Result<()> {
        if self.status != ClipStatus::Processing {
            return Err(self.invalid("complete"));
        }
        self.status = ClipStatus::Completed;
        self.storage_path = Some(storage_path.to_string());
        self.size_bytes = size_bytes;
        self.events.record(DomainEvent::ClipCompleted {
            clip_id: self.id,
            storage_path: storage_path.to_string(),
            size_bytes,
            at,
        });
        Ok(())
    }

    pub fn mark_error(&mut self, at: DateTime<Utc>) -> Result<()> {
        if !self.is_processing() {
            return Err(self.invalid("fail"));
        }
        self.status = ClipStatus::Error;
        self.events.record(DomainEvent::ClipFailed { clip_id: self.id, at });
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
            "Cannot {} clip {} in status {}",
            action, self.id, self.status
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn clip() -> Clip {
        let start = Utc::now();
        Clip::new(Uuid::new_v4(), start, start + Duration::minutes(5), Utc::now()).unwrap()
    }

    #[test]
    fn creation() {
        let c = clip();
        assert_eq!(c.status(), ClipStatus::Pending);
        assert_eq!(c.duration_seconds(), 300);
        assert!(c.is_processing());
        assert!(matches!(c.pending_events(), [DomainEvent::ClipRequested { .. }]));
    }

    #[test]
    fn end_must_follow_start() {
        let t = Utc::now();
        assert!(matches!(
            Clip::new(Uuid::new_v4(), t, t, t),
            Err(Error::Validation(_))
        ));
        assert!(matches!(
            Clip::new(Uuid::new_v4(), t, t - Duration::seconds(1), t),
            Err(Error::Validation(_))
        ));
    }

    #[test]
    fn duration_truncates_to_whole_seconds() {
        let t = Utc::now();
        let c = Clip::new(Uuid::new_v4(), t, t + Duration::milliseconds(2_999), t).unwrap();
        assert_eq!(c.duration_seconds(), 2);
    }

    #[test]
    fn processing_to_completed() {
        let mut c = clip();
        c.mark_processing(Utc::now()).unwrap();
        assert_eq!(c.status(), ClipStatus::Processing);
        assert!(c.is_processing());

        c.mark_completed("clips/r/c.mp4", 10 * 1024 * 1024, Utc::now()).unwrap();
        assert_eq!(c.status(), ClipStatus::Completed);
        assert_eq!(c.storage_path(), Some("clips/r/c.mp4"));
        assert_eq!(c.file_size_mb(), 10.0);
        assert!(!c.is_processing());
    }

    #[test]
    fn cannot_complete_without_processing() {
        let mut c = clip();
        assert!(matches!(
            c.mark_completed("x", 1, Utc::now()),
            Err(Error::InvalidState(_))
        ));
    }

    #[test]
    fn error_is_terminal() {
        let mut c = clip();
        c.mark_error(Utc::now()).unwrap();
        assert_eq!(c.status(), ClipStatus::Error);
        assert!(matches!(c.mark_processing(Utc::now()), Err(Error::InvalidState(_))));
        assert!(matches!(c.mark_error(Utc::now()), Err(Error::InvalidState(_))));
    }
}
