use std::{array, sync::Arc};

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info, instrument, warn};

use crate::{
    events::{EventBus, LoomEvent},
    model::{AudioSource, DEFAULT_PAN, DEFAULT_VOLUME, TRACK_COUNT, clamp_pan, clamp_volume},
    playback::{PlaybackBackend, PlaybackHandle},
};

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum SlotError {
    #[error("no empty mixer slot, clear one first")]
    Full,
    #[error("mixer slot {0} is empty")]
    EmptySlot(usize),
    #[error("mixer slot {0} is out of range")]
    OutOfRange(usize),
    #[error("playback could not start for slot {index}: {reason}")]
    Playback { index: usize, reason: String },
}

#[derive(Debug)]
pub struct OccupiedSlot {
    source: AudioSource,
    muted: bool,
    volume: f32,
    pan: f32,
    playback: Box<dyn PlaybackHandle>,
}

impl OccupiedSlot {
    #[must_use]
    pub fn source(&self) -> &AudioSource {
        &self.source
    }

    #[must_use]
    pub fn muted(&self) -> bool {
        self.muted
    }

    #[must_use]
    pub fn volume(&self) -> f32 {
        self.volume
    }

    #[must_use]
    pub fn pan(&self) -> f32 {
        self.pan
    }

    #[must_use]
    pub fn playback(&self) -> &dyn PlaybackHandle {
        self.playback.as_ref()
    }
}

/// One mixer channel. An empty slot carries no state at all, so clearing a
/// slot cannot leave a stale mute flag or playback handle behind.
#[derive(Debug, Default)]
pub enum TrackSlot {
    #[default]
    Empty,
    Occupied(OccupiedSlot),
}

impl TrackSlot {
    #[must_use]
    pub fn is_occupied(&self) -> bool {
        matches!(self, Self::Occupied(_))
    }

    #[must_use]
    pub fn as_occupied(&self) -> Option<&OccupiedSlot> {
        match self {
            Self::Empty => None,
            Self::Occupied(slot) => Some(slot),
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct SlotStatus {
    pub index: usize,
    pub occupied: bool,
    pub muted: bool,
    pub volume: f32,
    pub pan: f32,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SlotSnapshot {
    pub index: usize,
    pub source: AudioSource,
    pub muted: bool,
    pub volume: f32,
    pub pan: f32,
}

/// Point-in-time copy of every occupied slot, in index order.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct BankSnapshot {
    pub slots: Vec<SlotSnapshot>,
}

impl BankSnapshot {
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn audible(&self) -> impl Iterator<Item = &SlotSnapshot> {
        self.slots.iter().filter(|slot| !slot.muted)
    }
}

pub struct TrackBank {
    slots: [TrackSlot; TRACK_COUNT],
    backend: Arc<dyn PlaybackBackend>,
    events: EventBus,
}

impl std::fmt::Debug for TrackBank {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TrackBank")
            .field("slots", &self.slots)
            .finish_non_exhaustive()
    }
}

impl TrackBank {
    #[must_use]
    pub fn new(backend: Arc<dyn PlaybackBackend>, events: EventBus) -> Self {
        Self {
            slots: array::from_fn(|_| TrackSlot::Empty),
            backend,
            events,
        }
    }

    #[must_use]
    pub fn slots(&self) -> &[TrackSlot] {
        &self.slots
    }

    #[must_use]
    pub fn occupied_count(&self) -> usize {
        self.slots.iter().filter(|slot| slot.is_occupied()).count()
    }

    #[must_use]
    pub fn is_full(&self) -> bool {
        self.occupied_count() == TRACK_COUNT
    }

    #[instrument(skip(self, source), fields(path = %source.path.display()))]
    pub fn assign(&mut self, source: AudioSource) -> Result<usize, SlotError> {
        let index = self
            .slots
            .iter()
            .position(|slot| !slot.is_occupied())
            .ok_or_else(|| {
                warn!("assign rejected, bank full");
                SlotError::Full
            })?;

        let playback = self.backend.start_loop(&source).map_err(|error| {
            warn!(index, ?error, "live playback failed, slot left empty");
            SlotError::Playback {
                index,
                reason: format!("{error:#}"),
            }
        })?;

        let path = source.path.clone();
        self.slots[index] = TrackSlot::Occupied(OccupiedSlot {
            source,
            muted: false,
            volume: DEFAULT_VOLUME,
            pan: DEFAULT_PAN,
            playback,
        });
        info!(index, "take assigned to slot");
        self.events.emit(LoomEvent::SlotAssigned { index, path });
        Ok(index)
    }

    #[instrument(skip(self))]
    pub fn clear(&mut self, index: usize) -> Result<(), SlotError> {
        let slot = self
            .slots
            .get_mut(index)
            .ok_or(SlotError::OutOfRange(index))?;

        match std::mem::take(slot) {
            TrackSlot::Empty => {
                debug!("clear noop, slot already empty");
            }
            TrackSlot::Occupied(mut occupied) => {
                occupied.playback.stop();
                info!("slot cleared");
                self.events.emit(LoomEvent::SlotCleared { index });
            }
        }
        Ok(())
    }

    #[instrument(skip(self))]
    pub fn set_mute(&mut self, index: usize, muted: bool) -> Result<(), SlotError> {
        let slot = self.occupied_mut(index)?;
        if muted {
            slot.playback.pause();
        } else {
            slot.playback.resume();
        }
        slot.muted = muted;
        info!("slot mute updated");
        self.events.emit(LoomEvent::SlotMuted { index, muted });
        Ok(())
    }

    /// Returns the stored (clamped) volume.
    #[instrument(skip(self))]
    pub fn set_volume(&mut self, index: usize, volume: f32) -> Result<f32, SlotError> {
        let volume = clamp_volume(volume);
        let slot = self.occupied_mut(index)?;
        slot.volume = volume;
        slot.playback.set_gain(volume);
        debug!(volume, "slot volume updated");
        self.events
            .emit(LoomEvent::SlotVolumeChanged { index, volume });
        Ok(volume)
    }

    /// Returns the stored (clamped) pan.
    #[instrument(skip(self))]
    pub fn set_pan(&mut self, index: usize, pan: f32) -> Result<f32, SlotError> {
        let pan = clamp_pan(pan);
        let slot = self.occupied_mut(index)?;
        slot.pan = pan;
        slot.playback.set_pan(pan);
        debug!(pan, "slot pan updated");
        self.events.emit(LoomEvent::SlotPanChanged { index, pan });
        Ok(pan)
    }

    /// Mute flags are carried, not applied; the mixdown engine decides what
    /// a muted slot means for the render.
    #[must_use]
    pub fn snapshot(&self) -> BankSnapshot {
        let slots = self
            .slots
            .iter()
            .enumerate()
            .filter_map(|(index, slot)| {
                slot.as_occupied().map(|occupied| SlotSnapshot {
                    index,
                    source: occupied.source.clone(),
                    muted: occupied.muted,
                    volume: occupied.volume,
                    pan: occupied.pan,
                })
            })
            .collect();
        BankSnapshot { slots }
    }

    #[must_use]
    pub fn status(&self) -> Vec<SlotStatus> {
        self.slots
            .iter()
            .enumerate()
            .map(|(index, slot)| match slot {
                TrackSlot::Empty => SlotStatus {
                    index,
                    occupied: false,
                    muted: false,
                    volume: DEFAULT_VOLUME,
                    pan: DEFAULT_PAN,
                },
                TrackSlot::Occupied(occupied) => SlotStatus {
                    index,
                    occupied: true,
                    muted: occupied.muted,
                    volume: occupied.volume,
                    pan: occupied.pan,
                },
            })
            .collect()
    }

    #[instrument(skip(self))]
    pub fn reset_all(&mut self) {
        let stopped = self.stop_all();
        info!(stopped, "bank reset");
        self.events.emit(LoomEvent::BankReset);
    }

    fn stop_all(&mut self) -> usize {
        let mut stopped = 0;
        for slot in &mut self.slots {
            if let TrackSlot::Occupied(mut occupied) = std::mem::take(slot) {
                occupied.playback.stop();
                stopped += 1;
            }
        }
        stopped
    }

    fn occupied_mut(&mut self, index: usize) -> Result<&mut OccupiedSlot, SlotError> {
        match self.slots.get_mut(index) {
            None => Err(SlotError::OutOfRange(index)),
            Some(TrackSlot::Empty) => Err(SlotError::EmptySlot(index)),
            Some(TrackSlot::Occupied(occupied)) => Ok(occupied),
        }
    }
}

impl Drop for TrackBank {
    fn drop(&mut self) {
        let stopped = self.stop_all();
        if stopped > 0 {
            debug!(stopped, "bank dropped, live playback stopped");
        }
    }
}
