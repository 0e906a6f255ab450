//! Authoritative in-memory store of streams.
//!
//! Each stream sits behind its own async mutex. Operations that change a
//! stream hold that mutex for their whole duration, which serializes start,
//! stop, recording toggles and crash handling per id while leaving different
//! streams independent. Detection state is kept outside the entry lock so the
//! detector output pump never queues behind a slow stop.

mod entry;
mod state;

use std::sync::Arc;

use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use tokio::sync::{Mutex, OwnedMutexGuard};

pub use entry::{RecordingSession, StreamEntry};
pub use state::StreamState;

use crate::events::DetectionStatus;
use crate::{Error, Result};

type StreamSlot = Arc<Mutex<StreamEntry>>;

/// Exclusive access to one stream entry.
pub type StreamGuard = OwnedMutexGuard<StreamEntry>;

#[derive(Debug, Default)]
pub struct StreamRegistry {
    streams: DashMap<String, StreamSlot>,
    detection: DashMap<String, DetectionStatus>,
}

impl StreamRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a new entry and return it already locked, so nobody can observe
    /// or modify it before the caller is done setting it up.
    pub fn insert(&self, entry: StreamEntry) -> Result<StreamGuard> {
        let id = entry.id.clone();
        match self.streams.entry(id.clone()) {
            Entry::Occupied(_) => {
                Err(Error::Other(format!("Stream id {id} is already registered")))
            }
            Entry::Vacant(vacant) => {
                let slot = Arc::new(Mutex::new(entry));
                let guard = slot
                    .clone()
                    .try_lock_owned()
                    .map_err(|_| Error::Other(format!("Stream {id} locked on insert")))?;
                vacant.insert(slot);
                self.detection.insert(id, DetectionStatus::default());
                Ok(guard)
            }
        }
    }

    /// Lock a stream for exclusive use. `None` if it does not exist or was
    /// stopped while waiting for the lock.
    pub async fn lock(&self, id: &str) -> Option<StreamGuard> {
        let slot = self.streams.get(id).map(|s| s.value().clone())?;
        let guard = slot.lock_owned().await;
        if guard.state().is_terminal() {
            return None;
        }
        Some(guard)
    }

    /// Drop a stream and its detection state.
    pub fn remove(&self, id: &str) -> bool {
        self.detection.remove(id);
        self.streams.remove(id).is_some()
    }

    /// Record a detector verdict. Ignored for unknown streams.
    pub fn set_detection(&self, id: &str, status: DetectionStatus) -> bool {
        match self.detection.get_mut(id) {
            Some(mut current) => {
                *current = status;
                true
            }
            None => false,
        }
    }

    pub fn detection(&self, id: &str) -> Option<DetectionStatus> {
        self.detection.get(id).map(|d| *d.value())
    }

    pub fn contains(&self, id: &str) -> bool {
        self.streams.contains_key(id)
    }

    /// Ids of every registered stream in ascending order, whatever their state.
    pub fn ids(&self) -> Vec<String> {
        sorted_ids(self.streams.iter().map(|e| e.key().clone()))
    }

    pub fn len(&self) -> usize {
        self.streams.len()
    }

    pub fn is_empty(&self) -> bool {
        self.streams.is_empty()
    }
}

/// Numeric ids compare by length first so `999` sorts before `1000`.
fn sorted_ids(ids: impl Iterator<Item = String>) -> Vec<String> {
    let mut ids: Vec<String> = ids.collect();
    ids.sort_by(|a, b| a.len().cmp(&b.len()).then_with(|| a.cmp(b)));
    ids
}
