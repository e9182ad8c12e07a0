use crate::error::Result;
use async_trait::async_trait;
use serde_json::Value;
use std::path::Path;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

pub mod ffmpeg;
pub mod ingest;

#[cfg(test)]
pub mod fake;

pub use ffmpeg::FfmpegProcessor;
pub use ingest::DirectIngestController;

/// Media operations on camera sources and stored recordings.
///
/// Every call runs under a hard time limit; a subprocess still running when
/// the limit expires is killed.
#[async_trait]
pub trait MediaProcessor: Send + Sync {
    /// Whether the source answers and yields media
    async fn check_source(&self, source_url: &str) -> Result<bool>;

    /// Record `source_url` into `output` until `stop` fires or `max_duration` elapses.
    /// Returns whether a usable file was written.
    async fn capture(
        &self,
        source_url: &str,
        output: &Path,
        max_duration: Duration,
        stop: CancellationToken,
    ) -> Result<bool>;

    /// Cut `[start_offset, start_offset + duration)` of `source` into `output`
    async fn clip(
        &self,
        source: &str,
        output: &Path,
        start_offset: Duration,
        duration: Duration,
    ) -> Result<bool>;

    /// Extract one frame at `offset` as a JPEG
    async fn thumbnail(&self, video: &str, offset: Duration, output: &Path) -> Result<bool>;
}

/// Live ingest server in front of the cameras
#[async_trait]
pub trait StreamIngestController: Send + Sync {
    async fn start_stream(&self, stream_id: Uuid, source_url: &str) -> Result<bool>;
    async fn stop_stream(&self, stream_id: Uuid) -> Result<bool>;
    async fn get_status(&self, stream_id: Uuid) -> Result<Value>;
}
