//! Lifecycle management for one class of worker process.
//!
//! A supervisor owns the live set of workers of a single [`WorkerKind`], keyed
//! by stream id. It spawns processes, drains their pipes, reaps them and
//! reports every exit exactly once through the callback given to
//! [`WorkerSupervisor::start`].

use std::sync::Arc;

use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use tokio::io::AsyncWriteExt;
use tokio::sync::{mpsc, watch};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::command::WorkerCommand;
use super::handle::{
    ExitReport, ExitState, StopMode, StopOutcome, WorkerHandle, WorkerKind, next_worker_id,
};
use super::process_runner::{spawn_stderr_logger, spawn_stdout_forwarder, wait_or_kill};
use crate::{Error, Result};

/// Capacity of the per-worker stdout line channel.
const STDOUT_CHANNEL_CAPACITY: usize = 64;

/// A freshly spawned worker and its stdout lines.
pub struct StartedWorker {
    pub handle: Arc<WorkerHandle>,
    /// Lines written to stdout. Dropping the receiver discards them.
    pub stdout: mpsc::Receiver<String>,
}

type ExitCallback = Box<dyn FnOnce(ExitReport) + Send + 'static>;

/// Spawns, tracks and stops workers of one kind.
#[derive(Clone)]
pub struct WorkerSupervisor {
    kind: WorkerKind,
    live: Arc<DashMap<String, Arc<WorkerHandle>>>,
}

impl WorkerSupervisor {
    pub fn new(kind: WorkerKind) -> Self {
        Self {
            kind,
            live: Arc::new(DashMap::new()),
        }
    }

    pub fn kind(&self) -> WorkerKind {
        self.kind
    }

    /// Spawn a worker for `stream_id`.
    ///
    /// `on_exit` runs once when the process is gone, or immediately if the
    /// spawn fails. A second start for a stream that still has a live worker
    /// is rejected without spawning and without calling `on_exit`.
    pub fn start<F>(
        &self,
        stream_id: &str,
        command: &WorkerCommand,
        on_exit: F,
    ) -> Result<StartedWorker>
    where
        F: FnOnce(ExitReport) + Send + 'static,
    {
        let on_exit: ExitCallback = Box::new(on_exit);
        let kind = self.kind;

        let vacant = match self.live.entry(stream_id.to_string()) {
            Entry::Occupied(_) => {
                return Err(Error::WorkerAlreadyRunning {
                    stream_id: stream_id.to_string(),
                    kind,
                });
            }
            Entry::Vacant(vacant) => vacant,
        };

        let worker_id = next_worker_id();
        debug!(
            stream_id = %stream_id,
            kind = %kind,
            worker_id,
            "Spawning worker: {}",
            command.display_redacted()
        );

        let mut child = match process_utils::piped_command(&command.program)
            .args(&command.args)
            .spawn()
        {
            Ok(child) => child,
            Err(source) => {
                warn!(stream_id = %stream_id, kind = %kind, "Failed to spawn worker: {}", source);
                on_exit(ExitReport {
                    stream_id: stream_id.to_string(),
                    kind,
                    worker_id,
                    exit: ExitState::Failed(source.to_string()),
                    stop_requested: false,
                });
                return Err(Error::ProcessSpawn {
                    stream_id: stream_id.to_string(),
                    kind,
                    source,
                });
            }
        };

        let pid = child.id();
        let stdin = child.stdin.take();
        let (stdout_tx, stdout_rx) = mpsc::channel(STDOUT_CHANNEL_CAPACITY);
        if let Some(stdout) = child.stdout.take() {
            spawn_stdout_forwarder(stdout, stdout_tx, stream_id.to_string(), kind);
        }
        if let Some(stderr) = child.stderr.take() {
            spawn_stderr_logger(stderr, stream_id.to_string(), kind);
        }

        let cancel = CancellationToken::new();
        let (exit_tx, exit_rx) = watch::channel(ExitState::Running);
        let handle = Arc::new(WorkerHandle::new(
            worker_id,
            stream_id.to_string(),
            kind,
            pid,
            stdin,
            cancel.clone(),
            exit_rx,
        ));
        vacant.insert(handle.clone());

        info!(stream_id = %stream_id, kind = %kind, worker_id, pid = ?pid, "Worker started");

        let live = self.live.clone();
        let monitored = handle.clone();
        tokio::spawn(async move {
            let exit = wait_or_kill(child, cancel).await;
            exit_tx.send_replace(exit.clone());
            live.remove_if(monitored.stream_id(), |_, h| h.id() == monitored.id());

            let stop_requested = monitored.stop_requested();
            let stream_id = monitored.stream_id();
            if stop_requested || exit.is_success() {
                debug!(stream_id = %stream_id, kind = %kind, worker_id, "Worker {}", exit);
            } else {
                warn!(stream_id = %stream_id, kind = %kind, worker_id, "Worker {}", exit);
            }

            on_exit(ExitReport {
                stream_id: monitored.stream_id().to_string(),
                kind,
                worker_id,
                exit,
                stop_requested,
            });
        });

        Ok(StartedWorker {
            handle,
            stdout: stdout_rx,
        })
    }

    /// Mark a worker as being stopped and drop it from the live set, so its
    /// exit is not reported as a crash. [`stop`](Self::stop) does this first.
    pub fn detach(&self, handle: &WorkerHandle) {
        handle.mark_stop_requested();
        self.live
            .remove_if(handle.stream_id(), |_, h| h.id() == handle.id());
    }

    /// Stop a worker. Best effort: never fails, the outcome says what happened.
    ///
    /// The handle is dropped from [`lookup`](Self::lookup) before anything else happens.
    pub async fn stop(&self, handle: &Arc<WorkerHandle>, mode: StopMode) -> StopOutcome {
        self.detach(handle);

        if !handle.is_running() {
            return StopOutcome::AlreadyExited(handle.exit_state());
        }

        match mode {
            StopMode::Immediate => {
                handle.kill();
                StopOutcome::Signalled
            }
            StopMode::Graceful { timeout } => {
                if let Some(mut stdin) = handle.stdin().lock().await.take() {
                    // The worker may already be on its way out; a broken pipe is fine.
                    if let Err(e) = stdin.write_all(b"q").await {
                        debug!(
                            stream_id = %handle.stream_id(),
                            kind = %handle.kind(),
                            "Failed to write quit command: {}",
                            e
                        );
                    }
                    let _ = stdin.flush().await;
                    drop(stdin);
                }

                match tokio::time::timeout(timeout, handle.wait_for_exit()).await {
                    Ok(exit) => StopOutcome::Finished(exit),
                    Err(_) => {
                        warn!(
                            stream_id = %handle.stream_id(),
                            kind = %handle.kind(),
                            "Worker ignored quit request for {:?}, killing",
                            timeout
                        );
                        handle.kill();
                        StopOutcome::Escalated(handle.wait_for_exit().await)
                    }
                }
            }
        }
    }

    /// The live worker for `stream_id`, if one is running and not being stopped.
    pub fn lookup(&self, stream_id: &str) -> Option<Arc<WorkerHandle>> {
        self.live
            .get(stream_id)
            .map(|entry| entry.value().clone())
            .filter(|handle| !handle.stop_requested())
    }

    pub fn live_count(&self) -> usize {
        self.live.len()
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use std::time::Duration;
    use tokio::sync::oneshot;

    fn sh(script: &str) -> WorkerCommand {
        WorkerCommand::new("sh").args(["-c", script])
    }

    fn reporter() -> (impl FnOnce(ExitReport) + Send + 'static, oneshot::Receiver<ExitReport>) {
        let (tx, rx) = oneshot::channel();
        (
            move |report| {
                let _ = tx.send(report);
            },
            rx,
        )
    }

    async fn report(rx: oneshot::Receiver<ExitReport>) -> ExitReport {
        tokio::time::timeout(Duration::from_secs(5), rx)
            .await
            .expect("exit report timed out")
            .expect("exit callback dropped")
    }

    #[tokio::test]
    async fn test_exit_reported_once_with_code() {
        let supervisor = WorkerSupervisor::new(WorkerKind::Detector);
        let (on_exit, rx) = reporter();

        let started = supervisor.start("s1", &sh("exit 2"), on_exit).unwrap();
        let report = report(rx).await;

        assert_eq!(report.worker_id, started.handle.id());
        assert_eq!(report.exit, ExitState::Exited { code: Some(2) });
        assert!(!report.stop_requested);
        assert!(supervisor.lookup("s1").is_none());
    }

    #[tokio::test]
    async fn test_second_start_rejected_while_live() {
        let supervisor = WorkerSupervisor::new(WorkerKind::Encoder);
        let (on_exit, rx) = reporter();
        let started = supervisor.start("s1", &sh("exec sleep 30"), on_exit).unwrap();

        let err = supervisor
            .start("s1", &sh("exec sleep 30"), |_| panic!("must not be called"))
            .err()
            .unwrap();
        assert!(matches!(err, Error::WorkerAlreadyRunning { .. }));

        supervisor.stop(&started.handle, StopMode::Immediate).await;
        assert!(report(rx).await.stop_requested);
    }

    #[tokio::test]
    async fn test_spawn_failure_still_reports() {
        let supervisor = WorkerSupervisor::new(WorkerKind::Recorder);
        let (on_exit, rx) = reporter();

        let result = supervisor.start(
            "s1",
            &WorkerCommand::new("/nonexistent/camfleet-worker"),
            on_exit,
        );

        assert!(matches!(result, Err(Error::ProcessSpawn { .. })));
        assert!(matches!(report(rx).await.exit, ExitState::Failed(_)));
        assert_eq!(supervisor.live_count(), 0);
    }

    #[tokio::test]
    async fn test_immediate_stop_hides_handle_at_once() {
        let supervisor = WorkerSupervisor::new(WorkerKind::Encoder);
        let (on_exit, rx) = reporter();
        let started = supervisor.start("s1", &sh("exec sleep 30"), on_exit).unwrap();
        assert!(supervisor.lookup("s1").is_some());

        let outcome = supervisor.stop(&started.handle, StopMode::Immediate).await;

        assert_eq!(outcome, StopOutcome::Signalled);
        assert!(supervisor.lookup("s1").is_none());
        let report = report(rx).await;
        assert!(report.stop_requested);
        assert_eq!(report.exit, ExitState::Exited { code: None });
    }

    #[tokio::test]
    async fn test_detach_hides_handle_before_stop_runs() {
        let supervisor = WorkerSupervisor::new(WorkerKind::Recorder);
        let (on_exit, rx) = reporter();
        let started = supervisor.start("s1", &sh("exec sleep 30"), on_exit).unwrap();

        supervisor.detach(&started.handle);

        assert!(supervisor.lookup("s1").is_none());
        assert_eq!(supervisor.live_count(), 0);
        supervisor.stop(&started.handle, StopMode::Immediate).await;
        assert!(report(rx).await.stop_requested);
    }

    #[tokio::test]
    async fn test_graceful_stop_sends_quit() {
        let supervisor = WorkerSupervisor::new(WorkerKind::Recorder);
        let (on_exit, rx) = reporter();
        let script = r#"read -r cmd; [ "$cmd" = q ] && exit 0; exit 9"#;
        let started = supervisor.start("s1", &sh(script), on_exit).unwrap();

        let outcome = supervisor
            .stop(&started.handle, StopMode::Graceful { timeout: Duration::from_secs(5) })
            .await;

        assert_eq!(outcome, StopOutcome::Finished(ExitState::Exited { code: Some(0) }));
        assert!(report(rx).await.stop_requested);
    }

    #[tokio::test]
    async fn test_graceful_stop_escalates() {
        let supervisor = WorkerSupervisor::new(WorkerKind::Recorder);
        let (on_exit, rx) = reporter();
        let started = supervisor
            .start("s1", &sh("exec sleep 30"), on_exit)
            .unwrap();

        let outcome = supervisor
            .stop(&started.handle, StopMode::Graceful { timeout: Duration::from_millis(200) })
            .await;

        assert!(matches!(outcome, StopOutcome::Escalated(_)));
        report(rx).await;
    }

    #[tokio::test]
    async fn test_stdout_lines_delivered() {
        let supervisor = WorkerSupervisor::new(WorkerKind::Detector);
        let (on_exit, _rx) = reporter();
        let mut started = supervisor
            .start("s1", &sh("echo CLEAR; echo ALARM"), on_exit)
            .unwrap();

        assert_eq!(started.stdout.recv().await.as_deref(), Some("CLEAR"));
        assert_eq!(started.stdout.recv().await.as_deref(), Some("ALARM"));
    }
}
