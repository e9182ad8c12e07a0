//! Work messages exchanged between the use cases and the workers

use crate::messaging::broker::QueueSpec;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

pub const RECORDINGS_EXCHANGE: &str = "recordings";
pub const RECORDINGS_QUEUE: &str = "recordings";
pub const RECORDING_START_KEY: &str = "recording.start";
pub const RECORDING_STOP_KEY: &str = "recording.stop";

pub const CLIPS_EXCHANGE: &str = "clips";
pub const CLIPS_QUEUE: &str = "clips";
pub const CLIP_CREATE_KEY: &str = "clip.create";

/// Body of `recording.start` / `recording.stop`. A stop only carries the id,
/// so the richer variant has to be tried first.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RecordingCommand {
    Start {
        recording_id: Uuid,
        stream_id: Uuid,
        tenant_id: String,
        source_url: String,
    },
    Stop {
        recording_id: Uuid,
    },
}

impl RecordingCommand {
    pub fn recording_id(&self) -> Uuid {
        match self {
            Self::Start { recording_id, .. } | Self::Stop { recording_id } => *recording_id,
        }
    }

    pub fn routing_key(&self) -> &'static str {
        match self {
            Self::Start { .. } => RECORDING_START_KEY,
            Self::Stop { .. } => RECORDING_STOP_KEY,
        }
    }
}

/// Body of `clip.create`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreateClipMessage {
    pub clip_id: Uuid,
    pub recording_id: Uuid,
    pub tenant_id: String,
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
    /// Object key of the source recording in the tenant bucket
    pub source_path: String,
}

impl QueueSpec {
    pub fn recordings() -> Self {
        Self::new(
            RECORDINGS_QUEUE,
            RECORDINGS_EXCHANGE,
            &[RECORDING_START_KEY, RECORDING_STOP_KEY],
        )
    }

    pub fn clips() -> Self {
        Self::new(CLIPS_QUEUE, CLIPS_EXCHANGE, &[CLIP_CREATE_KEY])
    }
}
