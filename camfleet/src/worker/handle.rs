//! Handles on running worker processes.

use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::process::ChildStdin;
use tokio::sync::{Mutex, watch};
use tokio_util::sync::CancellationToken;

static NEXT_WORKER_ID: AtomicU64 = AtomicU64::new(1);

/// Process-unique generation number for a worker.
pub(crate) fn next_worker_id() -> u64 {
    NEXT_WORKER_ID.fetch_add(1, Ordering::Relaxed)
}

/// The role a worker plays for its stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum WorkerKind {
    Encoder,
    Detector,
    Recorder,
}

impl WorkerKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Encoder => "encoder",
            Self::Detector => "detector",
            Self::Recorder => "recorder",
        }
    }
}

impl fmt::Display for WorkerKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Observed state of the OS process behind a handle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExitState {
    Running,
    /// Process ended. `code` is `None` when it was terminated by a signal.
    Exited { code: Option<i32> },
    /// The process could not be spawned or waited on.
    Failed(String),
}

impl ExitState {
    pub fn is_running(&self) -> bool {
        matches!(self, Self::Running)
    }

    pub fn is_success(&self) -> bool {
        matches!(self, Self::Exited { code: Some(0) })
    }
}

impl fmt::Display for ExitState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Running => f.write_str("running"),
            Self::Exited { code: Some(code) } => write!(f, "exited with code {code}"),
            Self::Exited { code: None } => f.write_str("terminated by signal"),
            Self::Failed(reason) => write!(f, "failed: {reason}"),
        }
    }
}

/// How a worker should be brought down.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopMode {
    /// Kill the process and return without waiting for it to be reaped.
    Immediate,
    /// Ask the worker to finish (`q` on stdin, then EOF) and wait up to
    /// `timeout` before falling back to a kill.
    Graceful { timeout: Duration },
}

/// What a stop request actually did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StopOutcome {
    /// The process had already ended before the request.
    AlreadyExited(ExitState),
    /// A kill was issued; the exit is reaped in the background.
    Signalled,
    /// The worker shut itself down within the grace period.
    Finished(ExitState),
    /// The grace period ran out and the worker was killed.
    Escalated(ExitState),
}

/// Delivered once per spawn attempt when the worker is gone.
#[derive(Debug, Clone)]
pub struct ExitReport {
    pub stream_id: String,
    pub kind: WorkerKind,
    pub worker_id: u64,
    pub exit: ExitState,
    /// `true` when the exit followed a stop request rather than a crash.
    pub stop_requested: bool,
}

/// A single running external process.
#[derive(Debug)]
pub struct WorkerHandle {
    id: u64,
    stream_id: String,
    kind: WorkerKind,
    pid: Option<u32>,
    started_at: DateTime<Utc>,
    stdin: Mutex<Option<ChildStdin>>,
    cancel: CancellationToken,
    exit_rx: watch::Receiver<ExitState>,
    stop_requested: AtomicBool,
}

impl WorkerHandle {
    pub(crate) fn new(
        id: u64,
        stream_id: String,
        kind: WorkerKind,
        pid: Option<u32>,
        stdin: Option<ChildStdin>,
        cancel: CancellationToken,
        exit_rx: watch::Receiver<ExitState>,
    ) -> Self {
        Self {
            id,
            stream_id,
            kind,
            pid,
            started_at: Utc::now(),
            stdin: Mutex::new(stdin),
            cancel,
            exit_rx,
            stop_requested: AtomicBool::new(false),
        }
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn stream_id(&self) -> &str {
        &self.stream_id
    }

    pub fn kind(&self) -> WorkerKind {
        self.kind
    }

    pub fn pid(&self) -> Option<u32> {
        self.pid
    }

    pub fn started_at(&self) -> DateTime<Utc> {
        self.started_at
    }

    pub fn exit_state(&self) -> ExitState {
        self.exit_rx.borrow().clone()
    }

    pub fn is_running(&self) -> bool {
        self.exit_rx.borrow().is_running()
    }

    pub fn stop_requested(&self) -> bool {
        self.stop_requested.load(Ordering::Acquire)
    }

    pub(crate) fn mark_stop_requested(&self) {
        self.stop_requested.store(true, Ordering::Release);
    }

    pub(crate) fn kill(&self) {
        self.cancel.cancel();
    }

    pub(crate) fn stdin(&self) -> &Mutex<Option<ChildStdin>> {
        &self.stdin
    }

    /// Wait until the process has been reaped.
    pub async fn wait_for_exit(&self) -> ExitState {
        let mut rx = self.exit_rx.clone();
        match rx.wait_for(|state| !state.is_running()).await {
            Ok(state) => state.clone(),
            Err(_) => ExitState::Failed("exit monitor dropped".to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_worker_ids_increase() {
        let a = next_worker_id();
        let b = next_worker_id();
        assert!(b > a);
    }

    #[test]
    fn test_exit_state_display() {
        assert_eq!(ExitState::Exited { code: Some(1) }.to_string(), "exited with code 1");
        assert_eq!(ExitState::Exited { code: None }.to_string(), "terminated by signal");
        assert!(ExitState::Exited { code: Some(0) }.is_success());
        assert!(!ExitState::Failed("x".into()).is_running());
    }

    #[tokio::test]
    async fn test_wait_for_exit_sees_final_state() {
        let (tx, rx) = watch::channel(ExitState::Running);
        let handle = WorkerHandle::new(
            7,
            "1".to_string(),
            WorkerKind::Recorder,
            None,
            None,
            CancellationToken::new(),
            rx,
        );
        assert!(handle.is_running());

        tx.send_replace(ExitState::Exited { code: Some(0) });
        drop(tx);

        assert_eq!(handle.wait_for_exit().await, ExitState::Exited { code: Some(0) });
        assert!(!handle.is_running());
    }
}
