use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use tracing::trace;
use uuid::Uuid;

const EVENT_CAPACITY: usize = 256;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum LoomEvent {
    SlotAssigned { index: usize, path: PathBuf },
    SlotCleared { index: usize },
    SlotMuted { index: usize, muted: bool },
    SlotVolumeChanged { index: usize, volume: f32 },
    SlotPanChanged { index: usize, pan: f32 },
    BankReset,
    BounceStarted { inputs: usize },
    BounceFinished { path: PathBuf },
    BounceFailed { error: String },
    RecordingAdded { id: Uuid },
    RecordingRenamed { id: Uuid, title: String },
    RecordingNotesUpdated { id: Uuid },
    RecordingRemoved { id: Uuid },
    LibraryCleared,
}

/// Per-instance event channel. Cloning shares the channel; sends with no
/// live subscribers are dropped.
#[derive(Debug, Clone)]
pub struct EventBus {
    sender: broadcast::Sender<LoomEvent>,
}

impl Default for EventBus {
    fn default() -> Self {
        let (sender, _) = broadcast::channel(EVENT_CAPACITY);
        Self { sender }
    }
}

impl EventBus {
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<LoomEvent> {
        self.sender.subscribe()
    }

    pub fn emit(&self, event: LoomEvent) {
        if self.sender.send(event).is_err() {
            trace!("event dropped, no subscribers");
        }
    }
}
