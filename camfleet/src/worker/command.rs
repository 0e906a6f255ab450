//! Command lines for the three worker kinds.

use std::path::Path;

use crate::config::AppConfig;
use crate::utils::url::redact_credentials;

/// A program and its arguments, ready to be spawned.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkerCommand {
    pub program: String,
    pub args: Vec<String>,
}

impl WorkerCommand {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
        }
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    /// Command line with credentials masked, for logs.
    pub fn display_redacted(&self) -> String {
        std::iter::once(self.program.clone())
            .chain(self.args.iter().map(|a| redact_credentials(a)))
            .collect::<Vec<_>>()
            .join(" ")
    }
}

/// Builds the command line for each worker kind.
pub trait CommandFactory: Send + Sync {
    /// Republish `source_url` as HLS with the playlist at `manifest`.
    fn encoder(&self, source_url: &str, manifest: &Path) -> WorkerCommand;

    /// Motion detector printing `ALARM` / `CLEAR` lines for `source_url`.
    fn detector(&self, source_url: &str) -> WorkerCommand;

    /// Copy the video track of `source_url` into `output`.
    fn recorder(&self, source_url: &str, output: &Path) -> WorkerCommand;
}

/// The production workers: ffmpeg for encoding and recording, a script for detection.
#[derive(Debug, Clone)]
pub struct FfmpegCommands {
    ffmpeg_path: String,
    detector_program: String,
    detector_script: String,
}

impl FfmpegCommands {
    pub fn new(
        ffmpeg_path: impl Into<String>,
        detector_program: impl Into<String>,
        detector_script: impl Into<String>,
    ) -> Self {
        Self {
            ffmpeg_path: ffmpeg_path.into(),
            detector_program: detector_program.into(),
            detector_script: detector_script.into(),
        }
    }

    pub fn from_config(config: &AppConfig) -> Self {
        Self::new(
            &config.ffmpeg_path,
            &config.detector_program,
            &config.detector_script,
        )
    }
}

impl CommandFactory for FfmpegCommands {
    fn encoder(&self, source_url: &str, manifest: &Path) -> WorkerCommand {
        WorkerCommand::new(&self.ffmpeg_path)
            .args(["-rtsp_transport", "tcp", "-i", source_url])
            .arg("-an")
            .args(["-c:v", "libx264", "-preset", "ultrafast", "-tune", "zerolatency"])
            .args(["-g", "15"])
            .args(["-f", "hls", "-hls_time", "2", "-hls_list_size", "50"])
            .args(["-hls_flags", "append_list+delete_segments"])
            .arg(manifest.to_string_lossy())
    }

    fn detector(&self, source_url: &str) -> WorkerCommand {
        WorkerCommand::new(&self.detector_program)
            .arg(&self.detector_script)
            .arg(source_url)
    }

    fn recorder(&self, source_url: &str, output: &Path) -> WorkerCommand {
        WorkerCommand::new(&self.ffmpeg_path)
            .args(["-rtsp_transport", "tcp"])
            .args(["-fflags", "+genpts", "-avoid_negative_ts", "make_zero"])
            .args(["-use_wallclock_as_timestamps", "1"])
            .args(["-i", source_url])
            .args(["-map", "0:v:0", "-c:v", "copy", "-an"])
            .args(["-movflags", "+faststart+frag_keyframe+empty_moov"])
            .args(["-flush_packets", "1", "-muxdelay", "0"])
            .arg(output.to_string_lossy())
    }
}
