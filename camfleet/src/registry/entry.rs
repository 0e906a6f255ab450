use std::path::PathBuf;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use tokio::sync::OwnedSemaphorePermit;

use super::state::StreamState;
use crate::Result;
use crate::worker::WorkerHandle;

/// An active recorder and the file it writes.
#[derive(Debug, Clone)]
pub struct RecordingSession {
    pub handle: Arc<WorkerHandle>,
    pub path: PathBuf,
    pub started_at: DateTime<Utc>,
}

/// Everything the registry knows about one stream.
#[derive(Debug)]
pub struct StreamEntry {
    pub id: String,
    /// Resolved source URL, credentials included.
    pub source_url: String,
    pub hls_dir: PathBuf,
    pub manifest_path: PathBuf,
    pub created_at: DateTime<Utc>,
    pub encoder: Arc<WorkerHandle>,
    pub detector: Option<Arc<WorkerHandle>>,
    pub recording: Option<RecordingSession>,
    state: StreamState,
    /// Slot in the stream limit, released when the entry is dropped.
    _capacity: Option<OwnedSemaphorePermit>,
}

impl StreamEntry {
    pub fn new(
        id: String,
        source_url: String,
        hls_dir: PathBuf,
        manifest_path: PathBuf,
        encoder: Arc<WorkerHandle>,
        capacity: Option<OwnedSemaphorePermit>,
    ) -> Self {
        Self {
            id,
            source_url,
            hls_dir,
            manifest_path,
            created_at: Utc::now(),
            encoder,
            detector: None,
            recording: None,
            state: StreamState::Starting,
            _capacity: capacity,
        }
    }

    pub fn state(&self) -> StreamState {
        self.state
    }

    pub fn is_live(&self) -> bool {
        self.state == StreamState::Live
    }

    pub fn transition(&mut self, target: StreamState) -> Result<()> {
        self.state = self.state.transition_to(target)?;
        Ok(())
    }
}
