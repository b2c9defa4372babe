use std::{
    path::{Path, PathBuf},
    time::Duration,
};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

pub const TRACK_COUNT: usize = 8;
pub const DEFAULT_SAMPLE_RATE: u32 = 48_000;
pub const DEFAULT_BITS_PER_SAMPLE: u16 = 16;
pub const DEFAULT_VOLUME: f32 = 1.0;
pub const DEFAULT_PAN: f32 = 0.0;
pub const DEFAULT_RECORDING_TITLE: &str = "Untitled Idea";

/// A decodable audio file on durable storage. Never mutated after creation;
/// slots and library entries hold their own clones.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct AudioSource {
    pub path: PathBuf,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration_hint: Option<Duration>,
}

impl AudioSource {
    #[must_use]
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            duration_hint: None,
        }
    }

    #[must_use]
    pub fn with_duration_hint(path: impl Into<PathBuf>, duration_hint: Duration) -> Self {
        Self {
            path: path.into(),
            duration_hint: Some(duration_hint),
        }
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Recording {
    pub id: Uuid,
    pub title: String,
    pub source: AudioSource,
    pub notes: String,
    pub tags: String,
    pub created_at: DateTime<Utc>,
}

impl Recording {
    #[must_use]
    pub fn new(title: impl Into<String>, source: AudioSource) -> Self {
        Self {
            id: Uuid::new_v4(),
            title: title.into(),
            source,
            notes: String::new(),
            tags: String::new(),
            created_at: Utc::now(),
        }
    }

    #[must_use]
    pub fn with_notes(mut self, notes: impl Into<String>) -> Self {
        self.notes = notes.into();
        self
    }

    #[must_use]
    pub fn with_tags(mut self, tags: impl Into<String>) -> Self {
        self.tags = tags.into();
        self
    }
}

/// Clamps a slot volume into `[0, 1]`. NaN falls back to the default.
#[must_use]
pub fn clamp_volume(volume: f32) -> f32 {
    if volume.is_nan() {
        return DEFAULT_VOLUME;
    }
    volume.clamp(0.0, 1.0)
}

/// Clamps a slot pan into `[-1, 1]`. NaN falls back to centre.
#[must_use]
pub fn clamp_pan(pan: f32) -> f32 {
    if pan.is_nan() {
        return DEFAULT_PAN;
    }
    pan.clamp(-1.0, 1.0)
}
