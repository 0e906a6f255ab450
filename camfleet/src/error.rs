//! Application-wide error types.

use std::path::{Path, PathBuf};
use std::time::Duration;

use thiserror::Error;

use crate::worker::WorkerKind;

/// Application-wide result type.
pub type Result<T> = std::result::Result<T, Error>;

/// Application-wide error type.
#[derive(Error, Debug)]
pub enum Error {
    #[error("Device {address} is unreachable")]
    UnreachableDevice { address: String },

    #[error("No RTSP stream found for {address} after {attempts} candidate(s)")]
    RtspNotFound { address: String, attempts: usize },

    #[error("Failed to spawn {kind} worker for stream {stream_id}: {source}")]
    ProcessSpawn {
        stream_id: String,
        kind: WorkerKind,
        #[source]
        source: std::io::Error,
    },

    #[error("Stream {stream_id} did not become ready within {timeout:?}")]
    StartupTimeout { stream_id: String, timeout: Duration },

    #[error("Missing required parameter: {0}")]
    MissingParameter(&'static str),

    #[error("{kind} worker for stream {stream_id} exited unexpectedly: {status}")]
    WorkerCrashed {
        stream_id: String,
        kind: WorkerKind,
        status: String,
    },

    #[error("Stream not found: {0}")]
    StreamNotFound(String),

    #[error("Stream limit of {limit} reached")]
    CapacityExceeded { limit: usize },

    #[error("A {kind} worker is already running for stream {stream_id}")]
    WorkerAlreadyRunning { stream_id: String, kind: WorkerKind },

    #[error("Invalid state transition: cannot transition from {from} to {to}")]
    InvalidStateTransition { from: String, to: String },

    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("IO error while {op} ({}): {source}", .path.display())]
    IoPath {
        op: &'static str,
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("{0}")]
    Other(String),
}

impl Error {
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Configuration(msg.into())
    }

    pub fn io_path(op: &'static str, path: &Path, source: std::io::Error) -> Self {
        Self::IoPath {
            op,
            path: path.to_path_buf(),
            source,
        }
    }

    pub fn stream_not_found(id: impl Into<String>) -> Self {
        Self::StreamNotFound(id.into())
    }

    pub fn crashed(stream_id: impl Into<String>, kind: WorkerKind, status: impl ToString) -> Self {
        Self::WorkerCrashed {
            stream_id: stream_id.into(),
            kind,
            status: status.to_string(),
        }
    }
}
