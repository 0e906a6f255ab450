//! Stream orchestration.
//!
//! The [`StreamManager`] composes the resolver, the three worker supervisors,
//! the registry and the event hub into the operations exposed over HTTP:
//! start a stream, stop it, toggle its recording and check a device.
//!
//! Every operation that changes a stream holds that stream's registry lock
//! from first look to last write, and refreshes the stream's published
//! [`StreamStatus`] before letting go. Readers only see those published
//! views and never wait on the lock. Unexpected worker exits arrive on a
//! channel and are handled by a reaper task under the same lock:
//! - encoder exit: the whole stream is torn down
//! - detector exit: detection stops, the stream stays live
//! - recorder exit: the recording session is cleared

use std::path::PathBuf;
use std::sync::{Arc, Weak};
use std::time::Duration;

use chrono::Utc;
use dashmap::DashMap;
use futures::future::join_all;
use tokio::sync::{OwnedSemaphorePermit, Semaphore, broadcast, mpsc};
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, error, info, warn};

use super::detection::spawn_detection_pump;
use super::id::StreamIdGenerator;
use super::readiness::wait_for_manifest;
use super::{StreamInfo, StreamStatus};
use crate::config::AppConfig;
use crate::events::{DetectionEvent, EventHub};
use crate::probe::{FfmpegProbe, PingProbe, ReachabilityProbe};
use crate::registry::{RecordingSession, StreamEntry, StreamRegistry, StreamState};
use crate::resolver::SourceResolver;
use crate::utils::fs;
use crate::worker::{
    CommandFactory, ExitReport, FfmpegCommands, StopMode, WorkerKind, WorkerSupervisor,
};
use crate::{Error, Result};

/// Playlist file name inside each stream's HLS directory.
pub const MANIFEST_FILE_NAME: &str = "stream.m3u8";

/// Settings the manager needs from [`AppConfig`].
#[derive(Debug, Clone)]
pub struct StreamManagerConfig {
    pub hls_root: PathBuf,
    pub recordings_dir: PathBuf,
    pub public_base_url: String,
    pub startup_timeout: Duration,
    pub readiness_poll: Duration,
    pub graceful_stop_timeout: Duration,
    pub max_streams: Option<usize>,
    pub precheck_reachability: bool,
}

impl Default for StreamManagerConfig {
    fn default() -> Self {
        Self::from(&AppConfig::default())
    }
}

impl From<&AppConfig> for StreamManagerConfig {
    fn from(config: &AppConfig) -> Self {
        Self {
            hls_root: config.hls_root.clone(),
            recordings_dir: config.recordings_dir.clone(),
            public_base_url: config.public_base_url.clone(),
            startup_timeout: config.startup_timeout,
            readiness_poll: config.readiness_poll,
            graceful_stop_timeout: config.graceful_stop_timeout,
            max_streams: config.max_streams,
            precheck_reachability: config.precheck_reachability,
        }
    }
}

/// What happens to an active recording when its stream is stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Finalize {
    /// Finish the recorder in a tracked background task.
    Background,
    /// Wait for the recorder to finish before returning.
    Await,
}

pub struct StreamManager {
    config: StreamManagerConfig,
    resolver: SourceResolver,
    reachability: Arc<dyn ReachabilityProbe>,
    commands: Arc<dyn CommandFactory>,
    registry: Arc<StreamRegistry>,
    /// Views of live streams, replaced under the stream lock.
    statuses: DashMap<String, StreamStatus>,
    events: EventHub,
    ids: StreamIdGenerator,
    encoders: WorkerSupervisor,
    detectors: WorkerSupervisor,
    recorders: WorkerSupervisor,
    capacity: Option<(Arc<Semaphore>, usize)>,
    /// Recorders still finalizing after their stream was stopped.
    finalizers: TaskTracker,
    exit_tx: mpsc::UnboundedSender<ExitReport>,
    cancel: CancellationToken,
}

impl StreamManager {
    /// Create the manager and start its exit reaper. Must be called inside a Tokio runtime.
    pub fn new(
        config: StreamManagerConfig,
        resolver: SourceResolver,
        reachability: Arc<dyn ReachabilityProbe>,
        commands: Arc<dyn CommandFactory>,
    ) -> Arc<Self> {
        let (exit_tx, exit_rx) = mpsc::unbounded_channel();
        let capacity = config
            .max_streams
            .map(|limit| (Arc::new(Semaphore::new(limit)), limit));

        let manager = Arc::new(Self {
            config,
            resolver,
            reachability,
            commands,
            registry: Arc::new(StreamRegistry::new()),
            statuses: DashMap::new(),
            events: EventHub::new(),
            ids: StreamIdGenerator::new(),
            encoders: WorkerSupervisor::new(WorkerKind::Encoder),
            detectors: WorkerSupervisor::new(WorkerKind::Detector),
            recorders: WorkerSupervisor::new(WorkerKind::Recorder),
            capacity,
            finalizers: TaskTracker::new(),
            exit_tx,
            cancel: CancellationToken::new(),
        });

        Self::spawn_exit_reaper(Arc::downgrade(&manager), exit_rx, manager.cancel.clone());
        manager
    }

    /// Manager wired to ffmpeg, the detector script and the system `ping`.
    pub fn from_app_config(config: &AppConfig) -> Arc<Self> {
        let probe = FfmpegProbe::new(
            &config.ffmpeg_path,
            config.probe_duration,
            config.probe_timeout,
        );
        let resolver = SourceResolver::new(config.rtsp_templates.clone(), Arc::new(probe));
        Self::new(
            StreamManagerConfig::from(config),
            resolver,
            Arc::new(PingProbe::new(config.ping_timeout)),
            Arc::new(FfmpegCommands::from_config(config)),
        )
    }

    fn spawn_exit_reaper(
        manager: Weak<Self>,
        mut exit_rx: mpsc::UnboundedReceiver<ExitReport>,
        cancel: CancellationToken,
    ) {
        tokio::spawn(async move {
            loop {
                let report = tokio::select! {
                    _ = cancel.cancelled() => break,
                    report = exit_rx.recv() => match report {
                        Some(report) => report,
                        None => break,
                    },
                };
                let Some(manager) = manager.upgrade() else {
                    break;
                };
                // Exit handling waits for the stream lock; keep other reports flowing.
                tokio::spawn(async move { manager.handle_worker_exit(report).await });
            }
            debug!("Worker exit reaper stopped");
        });
    }

    fn graceful(&self) -> StopMode {
        StopMode::Graceful {
            timeout: self.config.graceful_stop_timeout,
        }
    }

    fn reserve_slot(&self) -> Result<Option<OwnedSemaphorePermit>> {
        match &self.capacity {
            Some((semaphore, limit)) => semaphore
                .clone()
                .try_acquire_owned()
                .map(Some)
                .map_err(|_| Error::CapacityExceeded { limit: *limit }),
            None => Ok(None),
        }
    }

    /// Public playlist URL for a stream.
    pub fn stream_url(&self, id: &str) -> String {
        format!(
            "{}/hls/{}/{}",
            self.config.public_base_url.trim_end_matches('/'),
            id,
            MANIFEST_FILE_NAME
        )
    }

    /// Whether a device answers a ping.
    pub async fn check_device(&self, address: &str) -> Result<bool> {
        let address = address.trim();
        if address.is_empty() {
            return Err(Error::MissingParameter("ip"));
        }
        let online = self.reachability.is_reachable(address).await;
        debug!(address = %address, online, "Device check");
        Ok(online)
    }

    /// Discover the camera's stream, start its encoder and detector, and wait
    /// until the HLS playlist exists.
    ///
    /// On any failure after the encoder was spawned, every worker started so
    /// far is stopped and the stream never becomes visible. Once the source is
    /// resolved the start runs to completion even if the caller goes away.
    pub async fn start_stream(
        self: &Arc<Self>,
        address: &str,
        username: &str,
        password: &str,
    ) -> Result<StreamInfo> {
        let address = address.trim();
        if address.is_empty() {
            return Err(Error::MissingParameter("ip"));
        }

        let permit = self.reserve_slot()?;

        if self.config.precheck_reachability && !self.reachability.is_reachable(address).await {
            return Err(Error::UnreachableDevice {
                address: address.to_string(),
            });
        }

        let source_url = self.resolver.resolve(address, username, password).await?;

        let manager = Arc::clone(self);
        let address = address.to_string();
        tokio::spawn(async move { manager.launch(&address, source_url, permit).await })
            .await
            .map_err(|e| Error::Other(format!("Stream start task failed: {e}")))?
    }

    async fn launch(
        &self,
        address: &str,
        source_url: String,
        permit: Option<OwnedSemaphorePermit>,
    ) -> Result<StreamInfo> {
        let id = self.ids.next_id();
        let hls_dir = self.config.hls_root.join(&id);
        let manifest_path = hls_dir.join(MANIFEST_FILE_NAME);
        fs::ensure_dir_all_with_op("creating HLS directory", &hls_dir).await?;

        let encoder_cmd = self.commands.encoder(&source_url, &manifest_path);
        let on_exit = exit_reporter(self.exit_tx.clone());
        let encoder = match self.encoders.start(&id, &encoder_cmd, on_exit) {
            Ok(started) => started.handle,
            Err(e) => {
                self.discard_hls_dir(&id, &hls_dir).await;
                return Err(e);
            }
        };

        let entry = StreamEntry::new(
            id.clone(),
            source_url.clone(),
            hls_dir.clone(),
            manifest_path.clone(),
            encoder.clone(),
            permit,
        );
        let mut guard = match self.registry.insert(entry) {
            Ok(guard) => guard,
            Err(e) => {
                self.encoders.stop(&encoder, StopMode::Immediate).await;
                return Err(e);
            }
        };

        let detector_cmd = self.commands.detector(&source_url);
        let on_exit = exit_reporter(self.exit_tx.clone());
        match self.detectors.start(&id, &detector_cmd, on_exit) {
            Ok(started) => {
                guard.detector = Some(started.handle);
                spawn_detection_pump(
                    id.clone(),
                    started.stdout,
                    self.registry.clone(),
                    self.events.clone(),
                );
            }
            Err(e) => warn!(stream_id = %id, "Continuing without motion detection: {}", e),
        }

        if let Err(e) = wait_for_manifest(
            &manifest_path,
            &encoder,
            self.config.readiness_poll,
            self.config.startup_timeout,
        )
        .await
        {
            warn!(stream_id = %id, "Stream failed to start: {}", e);
            if let Err(te) = guard.transition(StreamState::Stopping) {
                debug!(stream_id = %id, "{}", te);
            }
            self.teardown(&mut guard, Finalize::Await).await;
            let _ = guard.transition(StreamState::Stopped);
            self.registry.remove(&id);
            drop(guard);
            self.discard_hls_dir(&id, &hls_dir).await;
            return Err(e);
        }

        guard.transition(StreamState::Live)?;
        self.publish_status(&guard);
        info!(stream_id = %id, address = %address, "Stream live");

        Ok(StreamInfo {
            stream_id: id.clone(),
            stream_url: self.stream_url(&id),
            rtsp: source_url,
        })
    }

    /// Stop a stream. Unknown ids are a no-op; returns whether a stream was stopped.
    ///
    /// Encoder and detector are killed; an active recording is finalized in
    /// the background so the file stays playable.
    pub async fn stop_stream(&self, id: &str) -> bool {
        self.stop_with(id, Finalize::Background).await
    }

    async fn stop_with(&self, id: &str, finalize: Finalize) -> bool {
        let Some(mut guard) = self.registry.lock(id).await else {
            debug!(stream_id = %id, "Stop requested for unknown stream");
            return false;
        };

        self.statuses.remove(id);
        if let Err(e) = guard.transition(StreamState::Stopping) {
            warn!(stream_id = %id, "{}", e);
        }
        self.teardown(&mut guard, finalize).await;
        if let Err(e) = guard.transition(StreamState::Stopped) {
            warn!(stream_id = %id, "{}", e);
        }
        self.registry.remove(id);
        drop(guard);

        info!(stream_id = %id, "Stream stopped");
        true
    }

    async fn teardown(&self, entry: &mut StreamEntry, finalize: Finalize) {
        if let Some(detector) = entry.detector.take() {
            self.detectors.stop(&detector, StopMode::Immediate).await;
        }
        self.encoders.stop(&entry.encoder, StopMode::Immediate).await;

        if let Some(session) = entry.recording.take() {
            self.recorders.detach(&session.handle);
            let recorders = self.recorders.clone();
            let mode = self.graceful();
            let stream_id = entry.id.clone();
            let finish = async move {
                let outcome = recorders.stop(&session.handle, mode).await;
                info!(
                    stream_id = %stream_id,
                    path = %session.path.display(),
                    outcome = ?outcome,
                    "Recording finalized"
                );
            };
            match finalize {
                Finalize::Background => {
                    self.finalizers.spawn(finish);
                }
                Finalize::Await => finish.await,
            }
        }
    }

    async fn discard_hls_dir(&self, id: &str, hls_dir: &std::path::Path) {
        if let Err(e) = fs::remove_dir_all_if_exists(hls_dir).await {
            warn!(stream_id = %id, "Failed to clean up HLS directory: {}", e);
        }
    }

    /// Start recording if the stream is not recording, stop it otherwise.
    ///
    /// Returns the new recording state. `source_url` is required and is
    /// validated before the stream is looked up. Stopping waits for the
    /// recorder to finalize its file.
    pub async fn toggle_recording(&self, id: &str, source_url: Option<&str>) -> Result<bool> {
        let source_url = source_url
            .map(str::trim)
            .filter(|url| !url.is_empty())
            .ok_or(Error::MissingParameter("rtspUrl"))?;

        let mut guard = match self.registry.lock(id).await {
            Some(guard) if guard.is_live() => guard,
            _ => return Err(Error::stream_not_found(id)),
        };

        if let Some(session) = guard.recording.take() {
            let outcome = self.recorders.stop(&session.handle, self.graceful()).await;
            info!(
                stream_id = %id,
                path = %session.path.display(),
                outcome = ?outcome,
                "Recording stopped"
            );
            self.publish_status(&guard);
            return Ok(false);
        }

        let path = self
            .config
            .recordings_dir
            .join(format!("record_{}_{}.mp4", id, Utc::now().timestamp_millis()));
        fs::ensure_parent_dir_with_op("creating recordings directory", &path).await?;

        let command = self.commands.recorder(source_url, &path);
        let on_exit = exit_reporter(self.exit_tx.clone());
        let started = self.recorders.start(id, &command, on_exit)?;
        guard.recording = Some(RecordingSession {
            handle: started.handle,
            path: path.clone(),
            started_at: Utc::now(),
        });
        self.publish_status(&guard);

        info!(stream_id = %id, path = %path.display(), "Recording started");
        Ok(true)
    }

    async fn handle_worker_exit(&self, report: ExitReport) {
        if report.stop_requested {
            return;
        }
        let Some(mut guard) = self.registry.lock(&report.stream_id).await else {
            return;
        };
        let crash = Error::crashed(&report.stream_id, report.kind, &report.exit);

        match report.kind {
            WorkerKind::Encoder => {
                if guard.encoder.id() != report.worker_id || !guard.is_live() {
                    return;
                }
                error!(stream_id = %report.stream_id, "{}; stopping stream", crash);
                self.statuses.remove(&report.stream_id);
                if let Err(e) = guard.transition(StreamState::Stopping) {
                    warn!(stream_id = %report.stream_id, "{}", e);
                }
                self.teardown(&mut guard, Finalize::Background).await;
                let _ = guard.transition(StreamState::Stopped);
                self.registry.remove(&report.stream_id);
            }
            WorkerKind::Detector => {
                if guard
                    .detector
                    .as_ref()
                    .is_some_and(|d| d.id() == report.worker_id)
                {
                    warn!(stream_id = %report.stream_id, "{}; detection disabled", crash);
                    guard.detector = None;
                    self.publish_status(&guard);
                }
            }
            WorkerKind::Recorder => {
                let current = guard
                    .recording
                    .as_ref()
                    .is_some_and(|r| r.handle.id() == report.worker_id);
                if current && let Some(session) = guard.recording.take() {
                    warn!(
                        stream_id = %report.stream_id,
                        path = %session.path.display(),
                        "{}; recording ended",
                        crash
                    );
                    self.publish_status(&guard);
                }
            }
        }
    }

    fn status_of(&self, entry: &StreamEntry) -> StreamStatus {
        StreamStatus {
            stream_id: entry.id.clone(),
            state: entry.state(),
            rtsp: entry.source_url.clone(),
            stream_url: self.stream_url(&entry.id),
            created_at: entry.created_at,
            recording: entry.recording.is_some(),
            recording_path: entry
                .recording
                .as_ref()
                .map(|r| r.path.to_string_lossy().into_owned()),
            detection: self.registry.detection(&entry.id).unwrap_or_default(),
            detector_active: entry.detector.is_some(),
        }
    }

    /// Replace the published view of a live stream. Call with the stream locked.
    fn publish_status(&self, entry: &StreamEntry) {
        if entry.is_live() {
            self.statuses.insert(entry.id.clone(), self.status_of(entry));
        }
    }

    /// Status of a live stream.
    pub fn stream_status(&self, id: &str) -> Option<StreamStatus> {
        let mut status = self.statuses.get(id)?.value().clone();
        status.detection = self.registry.detection(id).unwrap_or_default();
        Some(status)
    }

    /// Status of every live stream, oldest first.
    pub fn list_streams(&self) -> Vec<StreamStatus> {
        let mut streams: Vec<StreamStatus> = self
            .statuses
            .iter()
            .map(|entry| {
                let mut status = entry.value().clone();
                status.detection = self.registry.detection(entry.key()).unwrap_or_default();
                status
            })
            .collect();
        streams.sort_by(|a, b| {
            a.stream_id
                .len()
                .cmp(&b.stream_id.len())
                .then_with(|| a.stream_id.cmp(&b.stream_id))
        });
        streams
    }

    /// Current detection state of every live stream.
    pub fn detection_snapshot(&self) -> Vec<DetectionEvent> {
        self.list_streams()
            .into_iter()
            .map(|s| DetectionEvent {
                stream_id: s.stream_id,
                status: s.detection,
            })
            .collect()
    }

    pub fn subscribe(&self) -> broadcast::Receiver<DetectionEvent> {
        self.events.subscribe()
    }

    pub fn events(&self) -> &EventHub {
        &self.events
    }

    /// Number of registered streams, including ones still starting.
    pub fn stream_count(&self) -> usize {
        self.registry.len()
    }

    /// Workers of `kind` currently running and not being stopped.
    pub fn live_workers(&self, kind: WorkerKind) -> usize {
        match kind {
            WorkerKind::Encoder => self.encoders.live_count(),
            WorkerKind::Detector => self.detectors.live_count(),
            WorkerKind::Recorder => self.recorders.live_count(),
        }
    }

    /// Stop every stream, waiting for recordings to be finalized, then stop the reaper.
    pub async fn shutdown(&self) {
        let ids = self.registry.ids();
        if !ids.is_empty() {
            info!(count = ids.len(), "Stopping all streams");
        }
        join_all(ids.iter().map(|id| self.stop_with(id, Finalize::Await))).await;

        self.finalizers.close();
        if !self.finalizers.is_empty() {
            info!(count = self.finalizers.len(), "Waiting for recordings to finalize");
        }
        self.finalizers.wait().await;
        self.cancel.cancel();
    }
}

fn exit_reporter(
    tx: mpsc::UnboundedSender<ExitReport>,
) -> impl FnOnce(ExitReport) + Send + 'static {
    move |report| {
        let _ = tx.send(report);
    }
}

impl Drop for StreamManager {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}
