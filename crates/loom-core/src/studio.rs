use std::{path::Path, sync::Arc};

use chrono::Utc;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use tracing::{info, instrument, warn};
use uuid::Uuid;

use crate::{
    bank::{BankSnapshot, SlotError, SlotStatus, TrackBank},
    config::LoomConfig,
    events::{EventBus, LoomEvent},
    library::{LibraryError, RecordingLibrary},
    mixdown::{BounceError, MixdownEngine},
    model::{AudioSource, Recording},
    playback::PlaybackBackend,
};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct StudioStatus {
    pub slots: Vec<SlotStatus>,
    pub bounce_in_progress: bool,
}

/// Owns one mixer bank, one library and one mixdown engine, and wires the
/// bounce result into the library. Hosts construct as many as they need.
#[derive(Debug)]
pub struct Studio {
    bank: Mutex<TrackBank>,
    library: Mutex<RecordingLibrary>,
    mixdown: MixdownEngine,
    events: EventBus,
}

impl Studio {
    #[must_use]
    pub fn new(config: &LoomConfig, backend: Arc<dyn PlaybackBackend>) -> Self {
        let events = EventBus::default();
        let library = RecordingLibrary::new(&config.library.recordings_dir, events.clone())
            .with_default_title(&config.library.default_title);
        Self {
            bank: Mutex::new(TrackBank::new(backend, events.clone())),
            library: Mutex::new(library),
            mixdown: MixdownEngine::new(config.bounce.clone()),
            events,
        }
    }

    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<LoomEvent> {
        self.events.subscribe()
    }

    pub fn assign(&self, source: AudioSource) -> Result<usize, SlotError> {
        self.bank.lock().assign(source)
    }

    pub fn assign_take(&self, path: &Path) -> Result<usize, SlotError> {
        self.assign(AudioSource::new(path))
    }

    pub fn clear(&self, index: usize) -> Result<(), SlotError> {
        self.bank.lock().clear(index)
    }

    pub fn set_mute(&self, index: usize, muted: bool) -> Result<(), SlotError> {
        self.bank.lock().set_mute(index, muted)
    }

    pub fn set_volume(&self, index: usize, volume: f32) -> Result<f32, SlotError> {
        self.bank.lock().set_volume(index, volume)
    }

    pub fn set_pan(&self, index: usize, pan: f32) -> Result<f32, SlotError> {
        self.bank.lock().set_pan(index, pan)
    }

    pub fn reset_all(&self) {
        self.bank.lock().reset_all();
    }

    #[must_use]
    pub fn snapshot(&self) -> BankSnapshot {
        self.bank.lock().snapshot()
    }

    #[must_use]
    pub fn status(&self) -> StudioStatus {
        StudioStatus {
            slots: self.bank.lock().status(),
            bounce_in_progress: self.mixdown.is_bouncing(),
        }
    }

    #[must_use]
    pub fn bounce_in_progress(&self) -> bool {
        self.mixdown.is_bouncing()
    }

    #[must_use]
    pub fn recordings(&self) -> Vec<Recording> {
        self.library.lock().recordings().to_vec()
    }

    pub fn save_take(
        &self,
        take_path: &Path,
        title: Option<String>,
        notes: &str,
        tags: &str,
    ) -> Result<Uuid, LibraryError> {
        self.library.lock().save_take(take_path, title, notes, tags)
    }

    pub fn rename_recording(&self, id: Uuid, title: &str) -> Result<(), LibraryError> {
        self.library.lock().rename(id, title)
    }

    pub fn update_notes(&self, id: Uuid, notes: &str) -> Result<(), LibraryError> {
        self.library.lock().update_notes(id, notes)
    }

    pub fn remove_recording(&self, id: Uuid) -> Result<Recording, LibraryError> {
        self.library.lock().remove(id)
    }

    /// Bounces the current bank and files the result as a new recording.
    /// The bank is never modified, whether the bounce succeeds or not.
    /// `BounceStarted` is only published once the bounce has been accepted.
    #[instrument(skip(self))]
    pub async fn bounce(&self, title: Option<String>) -> Result<Recording, BounceError> {
        let snapshot = self.snapshot();
        let prepared = self
            .mixdown
            .prepare(&snapshot)
            .map_err(|error| self.bounce_failed(error))?;
        self.events.emit(LoomEvent::BounceStarted {
            inputs: prepared.session().inputs.len(),
        });

        let source = prepared
            .render()
            .await
            .map_err(|error| self.bounce_failed(error))?;

        let title = title
            .filter(|value| !value.trim().is_empty())
            .unwrap_or_else(|| format!("Mixdown {}", Utc::now().format("%Y-%m-%d %H:%M:%S")));
        let recording = Recording::new(title, source.clone());
        self.library.lock().append(recording.clone());
        info!(id = %recording.id, path = %source.path.display(), "bounce filed in library");
        self.events.emit(LoomEvent::BounceFinished { path: source.path });
        Ok(recording)
    }

    fn bounce_failed(&self, error: BounceError) -> BounceError {
        warn!(%error, "bounce failed");
        self.events.emit(LoomEvent::BounceFailed {
            error: error.to_string(),
        });
        error
    }
}
