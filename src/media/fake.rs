use super::MediaProcessor;
use crate::error::{Error, Result};
use async_trait::async_trait;
use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// Media processor that writes placeholder files instead of running ffmpeg
pub struct FakeMedia {
    source_reachable: AtomicBool,
    fail_clip: AtomicBool,
    fail_thumbnail: AtomicBool,
    capture_bytes: AtomicUsize,
    calls: Mutex<Vec<String>>,
}

impl Default for FakeMedia {
    fn default() -> Self {
        Self {
            source_reachable: AtomicBool::new(true),
            fail_clip: AtomicBool::new(false),
            fail_thumbnail: AtomicBool::new(false),
            capture_bytes: AtomicUsize::new(4096),
            calls: Mutex::new(Vec::new()),
        }
    }
}

impl FakeMedia {
    pub fn set_source_reachable(&self, ok: bool) {
        self.source_reachable.store(ok, Ordering::SeqCst);
    }

    pub fn set_fail_clip(&self, fail: bool) {
        self.fail_clip.store(fail, Ordering::SeqCst);
    }

    pub fn set_fail_thumbnail(&self, fail: bool) {
        self.fail_thumbnail.store(fail, Ordering::SeqCst);
    }

    pub fn set_capture_bytes(&self, bytes: usize) {
        self.capture_bytes.store(bytes, Ordering::SeqCst);
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().map(|c| c.clone()).unwrap_or_default()
    }

    fn record(&self, call: String) {
        if let Ok(mut calls) = self.calls.lock() {
            calls.push(call);
        }
    }

    async fn write(path: &Path, bytes: usize) -> Result<()> {
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| Error::Media(e.to_string()))?;
        }
        tokio::fs::write(path, vec![0u8; bytes])
            .await
            .map_err(|e| Error::Media(e.to_string()))
    }
}

#[async_trait]
impl MediaProcessor for FakeMedia {
    async fn check_source(&self, source_url: &str) -> Result<bool> {
        self.record(format!("check_source {}", source_url));
        Ok(self.source_reachable.load(Ordering::SeqCst))
    }

    async fn capture(
        &self,
        source_url: &str,
        output: &Path,
        max_duration: Duration,
        stop: CancellationToken,
    ) -> Result<bool> {
        self.record(format!("capture {}", source_url));
        tokio::select! {
            _ = stop.cancelled() => {}
            _ = tokio::time::sleep(max_duration) => {}
        }
        let bytes = self.capture_bytes.load(Ordering::SeqCst);
        if bytes == 0 {
            return Ok(false);
        }
        Self::write(output, bytes).await?;
        Ok(true)
    }

    async fn clip(
        &self,
        source: &str,
        output: &Path,
        start_offset: Duration,
        duration: Duration,
    ) -> Result<bool> {
        self.record(format!(
            "clip {} {} {}",
            source,
            start_offset.as_secs(),
            duration.as_secs()
        ));
        if self.fail_clip.load(Ordering::SeqCst) {
            return Ok(false);
        }
        Self::write(output, 1024).await?;
        Ok(true)
    }

    async fn thumbnail(&self, video: &str, offset: Duration, output: &Path) -> Result<bool> {
        self.record(format!("thumbnail {} {}", video, offset.as_secs()));
        if self.fail_thumbnail.load(Ordering::SeqCst) {
            return Ok(false);
        }
        Self::write(output, 128).await?;
        Ok(true)
    }
}
