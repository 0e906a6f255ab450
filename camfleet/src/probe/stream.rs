use std::time::Duration;

use async_trait::async_trait;
use tracing::debug;

use super::StreamProbe;
use crate::utils::url::redact_credentials;

/// Validates a stream by letting ffmpeg decode a short window into the null muxer.
#[derive(Debug, Clone)]
pub struct FfmpegProbe {
    ffmpeg_path: String,
    /// Media duration ffmpeg must read (`-t`).
    duration: Duration,
    /// Wall clock bound on the whole run.
    timeout: Duration,
}

impl FfmpegProbe {
    pub fn new(ffmpeg_path: impl Into<String>, duration: Duration, timeout: Duration) -> Self {
        Self {
            ffmpeg_path: ffmpeg_path.into(),
            duration,
            timeout,
        }
    }

    fn build_args(&self, url: &str) -> Vec<String> {
        vec![
            "-rtsp_transport".to_string(),
            "tcp".to_string(),
            "-i".to_string(),
            url.to_string(),
            "-t".to_string(),
            self.duration.as_secs().max(1).to_string(),
            "-f".to_string(),
            "null".to_string(),
            "-".to_string(),
        ]
    }
}

#[async_trait]
impl StreamProbe for FfmpegProbe {
    async fn probe(&self, url: &str) -> bool {
        let redacted = redact_credentials(url);
        let mut child = match process_utils::silent_command(&self.ffmpeg_path)
            .args(self.build_args(url))
            .spawn()
        {
            Ok(child) => child,
            Err(e) => {
                debug!(url = %redacted, "Failed to spawn probe: {}", e);
                return false;
            }
        };

        // On timeout the child is dropped, and with it killed.
        match tokio::time::timeout(self.timeout, child.wait()).await {
            Ok(Ok(status)) => {
                debug!(url = %redacted, code = ?status.code(), "Probe finished");
                status.success()
            }
            Ok(Err(e)) => {
                debug!(url = %redacted, "Error waiting for probe: {}", e);
                false
            }
            Err(_) => {
                debug!(url = %redacted, "Probe timed out after {:?}", self.timeout);
                false
            }
        }
    }
}
