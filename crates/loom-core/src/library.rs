use std::{
    fs,
    path::{Path, PathBuf},
};

use anyhow::Context;
use thiserror::Error;
use tracing::{info, instrument, warn};
use uuid::Uuid;

use crate::{
    events::{EventBus, LoomEvent},
    model::{AudioSource, DEFAULT_RECORDING_TITLE, Recording},
};

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum LibraryError {
    #[error("recording not found: {0}")]
    NotFound(Uuid),
    #[error("io error: {0}")]
    Io(String),
}

impl From<anyhow::Error> for LibraryError {
    fn from(value: anyhow::Error) -> Self {
        Self::Io(format!("{value:#}"))
    }
}

/// Append-only list of saved ideas. Titles and notes may be edited in
/// place; the audio behind a recording never changes.
#[derive(Debug)]
pub struct RecordingLibrary {
    recordings_dir: PathBuf,
    default_title: String,
    recordings: Vec<Recording>,
    events: EventBus,
}

impl RecordingLibrary {
    #[must_use]
    pub fn new(recordings_dir: impl Into<PathBuf>, events: EventBus) -> Self {
        Self {
            recordings_dir: recordings_dir.into(),
            default_title: DEFAULT_RECORDING_TITLE.to_string(),
            recordings: Vec::new(),
            events,
        }
    }

    #[must_use]
    pub fn with_default_title(mut self, default_title: impl Into<String>) -> Self {
        self.default_title = default_title.into();
        self
    }

    #[must_use]
    pub fn recordings_dir(&self) -> &Path {
        &self.recordings_dir
    }

    #[must_use]
    pub fn recordings(&self) -> &[Recording] {
        &self.recordings
    }

    #[must_use]
    pub fn get(&self, id: Uuid) -> Option<&Recording> {
        self.recordings.iter().find(|recording| recording.id == id)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.recordings.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.recordings.is_empty()
    }

    #[instrument(skip(self, recording), fields(title = %recording.title))]
    pub fn append(&mut self, mut recording: Recording) -> Uuid {
        if self.get(recording.id).is_some() {
            let previous = recording.id;
            recording.id = Uuid::new_v4();
            warn!(%previous, id = %recording.id, "duplicate recording id reassigned");
        }
        if recording.title.trim().is_empty() {
            recording.title.clone_from(&self.default_title);
        }

        let id = recording.id;
        self.recordings.push(recording);
        info!(%id, "recording added");
        self.events.emit(LoomEvent::RecordingAdded { id });
        id
    }

    /// Copies a finished take into the library directory under a fresh name
    /// and appends it.
    #[instrument(skip(self, notes, tags), fields(take = %take_path.display()))]
    pub fn save_take(
        &mut self,
        take_path: &Path,
        title: Option<String>,
        notes: impl Into<String>,
        tags: impl Into<String>,
    ) -> Result<Uuid, LibraryError> {
        fs::create_dir_all(&self.recordings_dir).with_context(|| {
            format!(
                "failed to create recordings directory: {}",
                self.recordings_dir.display()
            )
        })?;

        let extension = take_path
            .extension()
            .and_then(|value| value.to_str())
            .unwrap_or("wav");
        let destination = self
            .recordings_dir
            .join(format!("{}.{extension}", Uuid::new_v4()));
        fs::copy(take_path, &destination).with_context(|| {
            format!(
                "failed to copy take {} to {}",
                take_path.display(),
                destination.display()
            )
        })?;

        let title = title
            .filter(|value| !value.trim().is_empty())
            .unwrap_or_else(|| self.default_title.clone());
        let recording = Recording::new(title, AudioSource::new(destination))
            .with_notes(notes)
            .with_tags(tags);
        Ok(self.append(recording))
    }

    #[instrument(skip(self, new_title))]
    pub fn rename(&mut self, id: Uuid, new_title: impl Into<String>) -> Result<(), LibraryError> {
        let title = new_title.into();
        let recording = self.get_mut(id)?;
        recording.title.clone_from(&title);
        info!(title = %title, "recording renamed");
        self.events.emit(LoomEvent::RecordingRenamed { id, title });
        Ok(())
    }

    #[instrument(skip(self, notes))]
    pub fn update_notes(&mut self, id: Uuid, notes: impl Into<String>) -> Result<(), LibraryError> {
        self.get_mut(id)?.notes = notes.into();
        info!("recording notes updated");
        self.events.emit(LoomEvent::RecordingNotesUpdated { id });
        Ok(())
    }

    /// Drops the entry. The audio file stays where it is.
    #[instrument(skip(self))]
    pub fn remove(&mut self, id: Uuid) -> Result<Recording, LibraryError> {
        let position = self
            .recordings
            .iter()
            .position(|recording| recording.id == id)
            .ok_or(LibraryError::NotFound(id))?;
        let removed = self.recordings.remove(position);
        info!("recording removed");
        self.events.emit(LoomEvent::RecordingRemoved { id });
        Ok(removed)
    }

    #[instrument(skip(self))]
    pub fn clear(&mut self) {
        let removed = self.recordings.len();
        self.recordings.clear();
        info!(removed, "library cleared");
        self.events.emit(LoomEvent::LibraryCleared);
    }

    fn get_mut(&mut self, id: Uuid) -> Result<&mut Recording, LibraryError> {
        self.recordings
            .iter_mut()
            .find(|recording| recording.id == id)
            .ok_or(LibraryError::NotFound(id))
    }
}
