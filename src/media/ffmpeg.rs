use super::MediaProcessor;
use crate::config::MediaConfig;
use crate::error::{Error, Result};
use async_trait::async_trait;
use log::{debug, error, info, warn};
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::{Child, Command};
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;

/// `MediaProcessor` backed by the ffmpeg binary
#[derive(Debug, Clone)]
pub struct FfmpegProcessor {
    ffmpeg: PathBuf,
    source_check_timeout: Duration,
    thumbnail_timeout: Duration,
    clip_timeout: Duration,
    stop_grace: Duration,
}

impl FfmpegProcessor {
    pub fn new(config: &MediaConfig) -> Self {
        Self {
            ffmpeg: config.ffmpeg_path.clone(),
            source_check_timeout: Duration::from_secs(config.source_check_timeout_secs),
            thumbnail_timeout: Duration::from_secs(config.thumbnail_timeout_secs),
            clip_timeout: Duration::from_secs(config.clip_timeout_secs),
            stop_grace: Duration::from_secs(config.capture_stop_grace_secs),
        }
    }

    fn command(&self) -> Command {
        let mut cmd = Command::new(&self.ffmpeg);
        cmd.args(["-hide_banner", "-loglevel", "error", "-nostats", "-y"])
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        cmd
    }

    fn input_args(source: &str) -> Vec<String> {
        let mut args = Vec::new();
        if source.starts_with("rtsp://") || source.starts_with("rtsps://") {
            args.extend(["-rtsp_transport".to_string(), "tcp".to_string()]);
        }
        args.extend(["-i".to_string(), local_source(source)]);
        args
    }

    /// Run to completion within `limit`; the child is killed when the limit expires
    async fn run(&self, mut cmd: Command, limit: Duration, what: &str) -> Result<bool> {
        let child = cmd
            .spawn()
            .map_err(|e| Error::Media(format!("Failed to start ffmpeg for {}: {}", what, e)))?;

        match timeout(limit, child.wait_with_output()).await {
            Ok(Ok(output)) if output.status.success() => Ok(true),
            Ok(Ok(output)) => {
                let stderr = String::from_utf8_lossy(&output.stderr);
                warn!(
                    "ffmpeg {} exited with {}: {}",
                    what,
                    output.status,
                    stderr.lines().last().unwrap_or_default()
                );
                Ok(false)
            }
            Ok(Err(e)) => Err(Error::Media(format!("ffmpeg {} failed: {}", what, e))),
            Err(_) => {
                warn!("ffmpeg {} timed out after {:?}, killed", what, limit);
                Err(Error::Media(format!("ffmpeg {} timed out after {:?}", what, limit)))
            }
        }
    }

    async fn stop_child(&self, child: &mut Child) {
        if let Some(mut stdin) = child.stdin.take() {
            // ffmpeg finalizes the container when it reads "q"
            if let Err(e) = stdin.write_all(b"q").await {
                debug!("Could not ask ffmpeg to stop: {}", e);
            }
        }
        match timeout(self.stop_grace, child.wait()).await {
            Ok(_) => {}
            Err(_) => {
                warn!("ffmpeg did not stop within {:?}, killing", self.stop_grace);
                let _ = child.kill().await;
            }
        }
    }
}

/// ffmpeg reads local files by path, not by file:// URL
fn local_source(source: &str) -> String {
    source
        .strip_prefix("file://")
        .map(str::to_string)
        .unwrap_or_else(|| source.to_string())
}

fn secs(d: Duration) -> String {
    format!("{:.3}", d.as_secs_f64())
}

async fn has_content(path: &Path) -> bool {
    matches!(tokio::fs::metadata(path).await, Ok(meta) if meta.len() > 0)
}

#[async_trait]
impl MediaProcessor for FfmpegProcessor {
    async fn check_source(&self, source_url: &str) -> Result<bool> {
        let mut cmd = self.command();
        cmd.args(Self::input_args(source_url))
            .args(["-t", "1", "-f", "null", "-"]);

        match self.run(cmd, self.source_check_timeout, "source check").await {
            Ok(ok) => Ok(ok),
            Err(Error::Media(msg)) => {
                warn!("Source check of {} failed: {}", source_url, msg);
                Ok(false)
            }
            Err(e) => Err(e),
        }
    }

    async fn capture(
        &self,
        source_url: &str,
        output: &Path,
        max_duration: Duration,
        stop: CancellationToken,
    ) -> Result<bool> {
        if let Some(parent) = output.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| Error::Media(format!("Failed to create {}: {}", parent.display(), e)))?;
        }

        let mut cmd = self.command();
        cmd.stdin(Stdio::piped())
            .args(Self::input_args(source_url))
            .args(["-c", "copy", "-t", &secs(max_duration), "-f", "mp4"])
            .arg(output);

        let mut child = cmd
            .spawn()
            .map_err(|e| Error::Media(format!("Failed to start ffmpeg capture: {}", e)))?;
        info!("Capturing {} into {} (pid {})", source_url, output.display(), child.id().unwrap_or(0));

        let monitor = child.stderr.take().map(|stderr| {
            let source = source_url.to_string();
            tokio::spawn(async move {
                let mut lines = BufReader::new(stderr).lines();
                while let Ok(Some(line)) = lines.next_line().await {
                    if !line.is_empty() {
                        error!("ffmpeg [{}]: {}", source, line);
                    }
                }
            })
        });

        let hard_limit = max_duration + self.stop_grace;
        tokio::select! {
            status = child.wait() => {
                match status {
                    Ok(status) if !status.success() => warn!("Capture of {} exited with {}", source_url, status),
                    Ok(_) => {}
                    Err(e) => warn!("Capture of {} failed: {}", source_url, e),
                }
            }
            _ = stop.cancelled() => {
                info!("Stopping capture of {}", source_url);
                self.stop_child(&mut child).await;
            }
            _ = tokio::time::sleep(hard_limit) => {
                warn!("Capture of {} exceeded {:?}", source_url, hard_limit);
                self.stop_child(&mut child).await;
            }
        }

        if let Some(monitor) = monitor {
            monitor.abort();
        }

        Ok(has_content(output).await)
    }

    async fn clip(
        &self,
        source: &str,
        output: &Path,
        start_offset: Duration,
        duration: Duration,
    ) -> Result<bool> {
        let mut cmd = self.command();
        cmd.args(["-ss", &secs(start_offset)])
            .args(Self::input_args(source))
            .args(["-t", &secs(duration), "-c", "copy", "-avoid_negative_ts", "make_zero"])
            .arg(output);

        let ok = self.run(cmd, self.clip_timeout, "clip").await?;
        Ok(ok && has_content(output).await)
    }

    async fn thumbnail(&self, video: &str, offset: Duration, output: &Path) -> Result<bool> {
        let mut cmd = self.command();
        cmd.args(["-ss", &secs(offset)])
            .args(Self::input_args(video))
            .args(["-frames:v", "1", "-q:v", "2"])
            .arg(output);

        let ok = self.run(cmd, self.thumbnail_timeout, "thumbnail").await?;
        Ok(ok && has_content(output).await)
    }
}
