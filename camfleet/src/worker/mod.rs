//! External worker processes: encoder, detector and recorder.
//!
//! [`WorkerSupervisor`] is generic over the worker role; the stream manager
//! runs one instance per [`WorkerKind`]. Command lines come from a
//! [`CommandFactory`] so tests can substitute shell scripts for ffmpeg.

mod command;
mod handle;
mod process_runner;
mod supervisor;

pub use command::{CommandFactory, FfmpegCommands, WorkerCommand};
pub use handle::{ExitReport, ExitState, StopMode, StopOutcome, WorkerHandle, WorkerKind};
pub use supervisor::{StartedWorker, WorkerSupervisor};
