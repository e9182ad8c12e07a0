use crate::domain::DomainEvent;
use serde::{Deserialize, Serialize};
use std::fmt::{Display, Formatter};
use uuid::Uuid;

/// Event types published on the events exchange
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum EventType {
    // Stream events
    StreamStarting,
    StreamRunning,
    StreamError,
    StreamStopped,

    // Recording events
    RecordingStarted,
    RecordingStopped,
    RecordingError,
    RecordingStored,
    RecordingDeleted,

    // Clip events
    ClipRequested,
    ClipProcessing,
    ClipCompleted,
    ClipError,

    // Storage events
    StorageCleanupCompleted,
    StorageReconciled,
    StorageIntegrityAlert,

    // System events
    SystemStartup,
    SystemShutdown,
}

impl Display for EventType {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::StreamStarting => "stream.starting",
            Self::StreamRunning => "stream.running",
            Self::StreamError => "stream.error",
            Self::StreamStopped => "stream.stopped",
            Self::RecordingStarted => "recording.started",
            Self::RecordingStopped => "recording.stopped",
            Self::RecordingError => "recording.error",
            Self::RecordingStored => "recording.stored",
            Self::RecordingDeleted => "recording.deleted",
            Self::ClipRequested => "clip.requested",
            Self::ClipProcessing => "clip.processing",
            Self::ClipCompleted => "clip.completed",
            Self::ClipError => "clip.error",
            Self::StorageCleanupCompleted => "storage.cleanup_completed",
            Self::StorageReconciled => "storage.reconciled",
            Self::StorageIntegrityAlert => "storage.integrity_alert",
            Self::SystemStartup => "system.startup",
            Self::SystemShutdown => "system.shutdown",
        };
        f.write_str(name)
    }
}

impl From<&DomainEvent> for EventType {
    fn from(event: &DomainEvent) -> Self {
        match event {
            DomainEvent::StreamStarting { .. } => Self::StreamStarting,
            DomainEvent::StreamRunning { .. } => Self::StreamRunning,
            DomainEvent::StreamFailed { .. } => Self::StreamError,
            DomainEvent::StreamStopped { .. } => Self::StreamStopped,
            DomainEvent::RecordingStarted { .. } => Self::RecordingStarted,
            DomainEvent::RecordingStopped { .. } => Self::RecordingStopped,
            DomainEvent::RecordingFailed { .. } => Self::RecordingError,
            DomainEvent::RecordingStored { .. } => Self::RecordingStored,
            DomainEvent::RecordingDeleted { .. } => Self::RecordingDeleted,
            DomainEvent::ClipRequested { .. } => Self::ClipRequested,
            DomainEvent::ClipProcessing { .. } => Self::ClipProcessing,
            DomainEvent::ClipCompleted { .. } => Self::ClipCompleted,
            DomainEvent::ClipFailed { .. } => Self::ClipError,
        }
    }
}

/// Event message structure
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventMessage {
    /// Unique event ID
    pub id: Uuid,
    pub event_type: EventType,
    /// Entity the event is about (stream, recording or clip)
    pub source_id: Option<Uuid>,
    pub timestamp: chrono::DateTime<chrono::Utc>,
    pub payload: serde_json::Value,
}

impl EventMessage {
    pub fn new<T: Serialize>(
        event_type: EventType,
        source_id: Option<Uuid>,
        payload: T,
    ) -> Result<Self, serde_json::Error> {
        Ok(Self {
            id: Uuid::new_v4(),
            event_type,
            source_id,
            timestamp: chrono::Utc::now(),
            payload: serde_json::to_value(payload)?,
        })
    }

    /// Envelope for a domain event; the timestamp is when the transition happened
    pub fn from_domain(event: &DomainEvent) -> Result<Self, serde_json::Error> {
        Ok(Self {
            id: Uuid::new_v4(),
            event_type: EventType::from(event),
            source_id: Some(event.source_id()),
            timestamp: event.occurred_at(),
            payload: serde_json::to_value(event)?,
        })
    }

    /// `<event_type>.<source_id>`, or just the event type without a source
    pub fn routing_key(&self) -> String {
        match &self.source_id {
            Some(id) => format!("{}.{}", self.event_type, id),
            None => self.event_type.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    #[test]
    fn domain_event_envelope() {
        let recording_id = Uuid::new_v4();
        let at = Utc::now();
        let event = DomainEvent::RecordingDeleted { recording_id, at };

        let message = EventMessage::from_domain(&event).unwrap();
        assert_eq!(message.event_type, EventType::RecordingDeleted);
        assert_eq!(message.timestamp, at);
        assert_eq!(message.routing_key(), format!("recording.deleted.{}", recording_id));
        assert_eq!(message.payload["type"], "recording_deleted");
    }

    #[test]
    fn sourceless_routing_key() {
        let message = EventMessage::new(EventType::SystemStartup, None, ()).unwrap();
        assert_eq!(message.routing_key(), "system.startup");
    }
}
