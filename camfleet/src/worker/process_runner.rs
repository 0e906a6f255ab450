//! Child process plumbing: exit waiting with cancellation and pipe draining.

use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::Child;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, warn};

use super::handle::{ExitState, WorkerKind};

/// Wait for `child` to exit, killing it first if `cancellation_token` fires.
pub(crate) async fn wait_or_kill(
    mut child: Child,
    cancellation_token: CancellationToken,
) -> ExitState {
    tokio::select! {
        _ = cancellation_token.cancelled() => {
            if let Err(e) = child.kill().await {
                warn!("Failed to kill worker process: {}", e);
            }
            match child.wait().await {
                Ok(status) => ExitState::Exited { code: status.code() },
                Err(e) => ExitState::Failed(e.to_string()),
            }
        }
        status = child.wait() => {
            match status {
                Ok(exit_status) => ExitState::Exited { code: exit_status.code() },
                Err(e) => {
                    error!("Error waiting for process: {}", e);
                    ExitState::Failed(e.to_string())
                }
            }
        }
    }
}

/// Forward every stdout line to `tx` until EOF.
///
/// Reading continues after the receiver is gone so the child never blocks on a full pipe.
pub(crate) fn spawn_stdout_forwarder<R>(
    reader: R,
    tx: mpsc::Sender<String>,
    stream_id: String,
    kind: WorkerKind,
) where
    R: AsyncRead + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        let mut lines = BufReader::new(reader).lines();
        let mut forwarding = true;
        loop {
            match lines.next_line().await {
                Ok(Some(line)) => {
                    if forwarding && tx.send(line).await.is_err() {
                        forwarding = false;
                    }
                }
                Ok(None) => break,
                Err(e) => {
                    debug!(
                        stream_id = %stream_id,
                        kind = %kind,
                        "Error reading worker stdout: {}",
                        e
                    );
                    break;
                }
            }
        }
    });
}

/// Log every stderr line of a worker.
pub(crate) fn spawn_stderr_logger<R>(reader: R, stream_id: String, kind: WorkerKind)
where
    R: AsyncRead + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        let mut lines = BufReader::new(reader).lines();
        loop {
            match lines.next_line().await {
                Ok(Some(line)) => {
                    if line.contains("Error") || line.contains("error") {
                        warn!(stream_id = %stream_id, kind = %kind, "{}", line);
                    } else {
                        debug!(stream_id = %stream_id, kind = %kind, "{}", line);
                    }
                }
                Ok(None) => break,
                Err(e) => {
                    debug!(
                        stream_id = %stream_id,
                        kind = %kind,
                        "Error reading worker stderr: {}",
                        e
                    );
                    break;
                }
            }
        }
    });
}
