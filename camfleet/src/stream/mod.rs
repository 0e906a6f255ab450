//! Stream lifecycle: ids, readiness, detection and the orchestrating manager.

mod detection;
mod id;
mod manager;
mod readiness;

use chrono::{DateTime, Utc};
use serde::Serialize;

pub use id::StreamIdGenerator;
pub use manager::{MANIFEST_FILE_NAME, StreamManager, StreamManagerConfig};
pub use readiness::wait_for_manifest;

use crate::events::DetectionStatus;
use crate::registry::StreamState;

/// Result of a successful start.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StreamInfo {
    pub stream_id: String,
    /// Public HLS playlist URL.
    pub stream_url: String,
    /// The source URL the resolver settled on.
    pub rtsp: String,
}

/// Externally visible view of a live stream.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StreamStatus {
    pub stream_id: String,
    pub state: StreamState,
    pub rtsp: String,
    pub stream_url: String,
    pub created_at: DateTime<Utc>,
    pub recording: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub recording_path: Option<String>,
    pub detection: DetectionStatus,
    pub detector_active: bool,
}
