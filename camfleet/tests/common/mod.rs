//! Fakes shared by the integration tests: scripted probes and shell scripts
//! standing in for ffmpeg and the detector.

#![allow(dead_code)]

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use camfleet::probe::{ReachabilityProbe, StreamProbe};
use camfleet::resolver::SourceResolver;
use camfleet::stream::{StreamManager, StreamManagerConfig};
use camfleet::worker::{CommandFactory, WorkerCommand};
use tempfile::TempDir;

pub const TEMPLATE_A: &str = "rtsp://{user}:{pass}@{ip}/a";
pub const TEMPLATE_B: &str = "rtsp://{user}:{pass}@{ip}/b";

/// Accepts URLs containing `needle` and records every probe.
pub struct FakeProbe {
    needle: Option<&'static str>,
    pub calls: Mutex<Vec<String>>,
}

impl FakeProbe {
    pub fn accepting(needle: &'static str) -> Arc<Self> {
        Arc::new(Self {
            needle: Some(needle),
            calls: Mutex::new(Vec::new()),
        })
    }

    pub fn rejecting() -> Arc<Self> {
        Arc::new(Self {
            needle: None,
            calls: Mutex::new(Vec::new()),
        })
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().unwrap().len()
    }
}

#[async_trait]
impl StreamProbe for FakeProbe {
    async fn probe(&self, url: &str) -> bool {
        self.calls.lock().unwrap().push(url.to_string());
        self.needle.is_some_and(|n| url.contains(n))
    }
}

pub struct FakeReachability(pub bool);

#[async_trait]
impl ReachabilityProbe for FakeReachability {
    async fn is_reachable(&self, _address: &str) -> bool {
        self.0
    }
}

/// How the scripted encoder behaves.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EncoderScript {
    /// Writes the playlist shortly after starting and keeps running.
    Ready,
    /// Runs without ever writing the playlist.
    NeverReady,
    /// Exits with an error before writing anything.
    ExitEarly,
    /// Writes the playlist, then dies.
    CrashAfterReady,
}

impl EncoderScript {
    fn body(self) -> &'static str {
        match self {
            Self::Ready => r#"sleep 0.1; printf '#EXTM3U\n' > "$1"; exec sleep 60"#,
            Self::NeverReady => "exec sleep 60",
            Self::ExitEarly => "exit 3",
            Self::CrashAfterReady => r#"printf '#EXTM3U\n' > "$1"; sleep 0.5; exit 1"#,
        }
    }
}

/// Shell scripts in place of the real workers.
pub struct ScriptCommands {
    pub encoder: EncoderScript,
    /// Lines the detector prints before idling.
    pub detector_lines: Vec<&'static str>,
    /// Detector exits with an error shortly after its lines instead of idling.
    pub detector_crashes: bool,
    /// Recorder exits with an error right after creating its file.
    pub recorder_crashes: bool,
    pub recorders_built: AtomicUsize,
}

impl ScriptCommands {
    pub fn new(encoder: EncoderScript) -> Self {
        Self {
            encoder,
            detector_lines: Vec::new(),
            detector_crashes: false,
            recorder_crashes: false,
            recorders_built: AtomicUsize::new(0),
        }
    }

    pub fn with_detector_lines(mut self, lines: Vec<&'static str>) -> Self {
        self.detector_lines = lines;
        self
    }

    pub fn with_detector_crash(mut self) -> Self {
        self.detector_crashes = true;
        self
    }

    pub fn with_recorder_crash(mut self) -> Self {
        self.recorder_crashes = true;
        self
    }

    pub fn recorders_built(&self) -> usize {
        self.recorders_built.load(Ordering::SeqCst)
    }
}

fn shell(script: &str, name: &str) -> WorkerCommand {
    WorkerCommand::new("sh").args(["-c", script, name])
}

impl CommandFactory for ScriptCommands {
    fn encoder(&self, _source_url: &str, manifest: &Path) -> WorkerCommand {
        shell(self.encoder.body(), "encoder").arg(manifest.to_string_lossy())
    }

    fn detector(&self, _source_url: &str) -> WorkerCommand {
        let mut script = String::new();
        for line in &self.detector_lines {
            script.push_str(&format!("echo '{line}'; "));
        }
        script.push_str(if self.detector_crashes {
            "sleep 0.3; exit 1"
        } else {
            "exec sleep 60"
        });
        shell(&script, "detector")
    }

    fn recorder(&self, _source_url: &str, output: &Path) -> WorkerCommand {
        self.recorders_built.fetch_add(1, Ordering::SeqCst);
        // Creates the file, then on quit leaves `<output>.done` behind as proof
        // that it finished on its own.
        let script = if self.recorder_crashes {
            r#": > "$1"; exit 1"#
        } else {
            r#": > "$1"; read -r _; : > "$1.done"; exit 0"#
        };
        shell(script, "recorder").arg(output.to_string_lossy())
    }
}

pub struct Harness {
    pub dir: TempDir,
    pub manager: Arc<StreamManager>,
    pub probe: Arc<FakeProbe>,
    pub commands: Arc<ScriptCommands>,
}

impl Harness {
    pub fn hls_root(&self) -> PathBuf {
        self.dir.path().join("hls")
    }

    pub fn recordings_dir(&self) -> PathBuf {
        self.dir.path().join("recordings")
    }
}

pub fn test_config(dir: &Path) -> StreamManagerConfig {
    StreamManagerConfig {
        hls_root: dir.join("hls"),
        recordings_dir: dir.join("recordings"),
        public_base_url: "http://cams.local:5000".to_string(),
        startup_timeout: Duration::from_secs(5),
        readiness_poll: Duration::from_millis(20),
        graceful_stop_timeout: Duration::from_secs(3),
        max_streams: None,
        precheck_reachability: false,
    }
}

/// Build a manager around the given fakes. Must run inside a Tokio runtime.
pub fn harness_with(
    probe: Arc<FakeProbe>,
    commands: ScriptCommands,
    tweak: impl FnOnce(&mut StreamManagerConfig),
) -> Harness {
    let dir = tempfile::tempdir().unwrap();
    let mut config = test_config(dir.path());
    tweak(&mut config);

    let commands = Arc::new(commands);
    let resolver = SourceResolver::new(
        vec![TEMPLATE_A.to_string(), TEMPLATE_B.to_string()],
        probe.clone(),
    );
    let manager = StreamManager::new(
        config,
        resolver,
        Arc::new(FakeReachability(true)),
        commands.clone(),
    );

    Harness {
        dir,
        manager,
        probe,
        commands,
    }
}

/// A manager whose second template resolves and whose encoder becomes ready.
pub fn harness() -> Harness {
    harness_with(
        FakeProbe::accepting("/b"),
        ScriptCommands::new(EncoderScript::Ready),
        |_| {},
    )
}

/// Marker the scripted recorder writes after a clean quit.
pub fn finalized_marker(recording: &str) -> PathBuf {
    PathBuf::from(format!("{recording}.done"))
}

/// Poll `check` until it holds or `timeout` passes.
pub async fn eventually<F, Fut>(timeout: Duration, mut check: F) -> bool
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = bool>,
{
    let deadline = tokio::time::Instant::now() + timeout;
    loop {
        if check().await {
            return true;
        }
        if tokio::time::Instant::now() >= deadline {
            return false;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
}
