use chrono::{DateTime, Utc};
use serde::Serialize;
use uuid::Uuid;

/// Facts recorded by entity transitions, published only after the entity is persisted
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum DomainEvent {
    StreamStarting {
        stream_id: Uuid,
        camera_id: Uuid,
        at: DateTime<Utc>,
    },
    StreamRunning {
        stream_id: Uuid,
        at: DateTime<Utc>,
    },
    StreamFailed {
        stream_id: Uuid,
        at: DateTime<Utc>,
    },
    StreamStopped {
        stream_id: Uuid,
        at: DateTime<Utc>,
    },
    RecordingStarted {
        recording_id: Uuid,
        stream_id: Uuid,
        retention_days: u32,
        at: DateTime<Utc>,
    },
    RecordingStopped {
        recording_id: Uuid,
        stream_id: Uuid,
        duration_seconds: u64,
        at: DateTime<Utc>,
    },
    RecordingFailed {
        recording_id: Uuid,
        stream_id: Uuid,
        at: DateTime<Utc>,
    },
    RecordingStored {
        recording_id: Uuid,
        storage_path: String,
        size_bytes: u64,
        at: DateTime<Utc>,
    },
    RecordingDeleted {
        recording_id: Uuid,
        at: DateTime<Utc>,
    },
    ClipRequested {
        clip_id: Uuid,
        recording_id: Uuid,
        at: DateTime<Utc>,
    },
    ClipProcessing {
        clip_id: Uuid,
        at: DateTime<Utc>,
    },
    ClipCompleted {
        clip_id: Uuid,
        storage_path: String,
        size_bytes: u64,
        at: DateTime<Utc>,
    },
    ClipFailed {
        clip_id: Uuid,
        at: DateTime<Utc>,
    },
}

impl DomainEvent {
    /// Id of the entity the event belongs to
    pub fn source_id(&self) -> Uuid {
        match self {
            Self::StreamStarting { stream_id, .. }
            | Self::StreamRunning { stream_id, .. }
            | Self::StreamFailed { stream_id, .. }
            | Self::StreamStopped { stream_id, .. } => *stream_id,
            Self::RecordingStarted { recording_id, .. }
            | Self::RecordingStopped { recording_id, .. }
            | Self::RecordingFailed { recording_id, .. }
            | Self::RecordingStored { recording_id, .. }
            | Self::RecordingDeleted { recording_id, .. } => *recording_id,
            Self::ClipRequested { clip_id, .. }
            | Self::ClipProcessing { clip_id, .. }
            | Self::ClipCompleted { clip_id, .. }
            | Self::ClipFailed { clip_id, .. } => *clip_id,
        }
    }

    pub fn occurred_at(&self) -> DateTime<Utc> {
        match self {
            Self::StreamStarting { at, .. }
            | Self::StreamRunning { at, .. }
            | Self::StreamFailed { at, .. }
            | Self::StreamStopped { at, .. }
            | Self::RecordingStarted { at, .. }
            | Self::RecordingStopped { at, .. }
            | Self::RecordingFailed { at, .. }
            | Self::RecordingStored { at, .. }
            | Self::RecordingDeleted { at, .. }
            | Self::ClipRequested { at, .. }
            | Self::ClipProcessing { at, .. }
            | Self::ClipCompleted { at, .. }
            | Self::ClipFailed { at, .. } => *at,
        }
    }
}

/// Pending events of one entity
#[derive(Debug, Clone, Default)]
pub(crate) struct EventLog {
    pending: Vec<DomainEvent>,
}

impl EventLog {
    pub(crate) fn record(&mut self, event: DomainEvent) {
        self.pending.push(event);
    }

    pub(crate) fn take(&mut self) -> Vec<DomainEvent> {
        std::mem::take(&mut self.pending)
    }

    pub(crate) fn peek(&self) -> &[DomainEvent] {
        &self.pending
    }
}
