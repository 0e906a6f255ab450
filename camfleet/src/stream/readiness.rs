use std::path::Path;
use std::time::Duration;

use tracing::debug;

use crate::worker::WorkerHandle;
use crate::{Error, Result};

/// Wait until the encoder has written its playlist.
///
/// Polls for `manifest` every `poll`. Fails with `WorkerCrashed` as soon as
/// the encoder exits and with `StartupTimeout` once `timeout` has passed.
pub async fn wait_for_manifest(
    manifest: &Path,
    encoder: &WorkerHandle,
    poll: Duration,
    timeout: Duration,
) -> Result<()> {
    let stream_id = encoder.stream_id();

    let appeared = async {
        let mut ticker = tokio::time::interval(poll);
        loop {
            ticker.tick().await;
            if tokio::fs::try_exists(manifest).await.unwrap_or(false) {
                break;
            }
        }
    };

    tokio::select! {
        biased;
        _ = appeared => {
            debug!(stream_id = %stream_id, "Manifest ready");
            Ok(())
        }
        exit = encoder.wait_for_exit() => Err(Error::crashed(stream_id, encoder.kind(), exit)),
        _ = tokio::time::sleep(timeout) => Err(Error::StartupTimeout {
            stream_id: stream_id.to_string(),
            timeout,
        }),
    }
}
