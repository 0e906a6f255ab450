use std::sync::Arc;

use tokio::sync::mpsc;
use tracing::debug;

use crate::events::{DetectionEvent, DetectionStatus, EventHub};
use crate::registry::StreamRegistry;

/// Turn detector stdout into detection state and events until the pipe closes.
pub(crate) fn spawn_detection_pump(
    stream_id: String,
    mut lines: mpsc::Receiver<String>,
    registry: Arc<StreamRegistry>,
    hub: EventHub,
) {
    tokio::spawn(async move {
        while let Some(line) = lines.recv().await {
            let Some(status) = DetectionStatus::parse_line(&line) else {
                debug!(stream_id = %stream_id, line = %line, "Ignoring detector output");
                continue;
            };

            if !registry.set_detection(&stream_id, status) {
                break;
            }
            hub.publish(DetectionEvent {
                stream_id: stream_id.clone(),
                status,
            });
        }
        debug!(stream_id = %stream_id, "Detection pump finished");
    });
}
