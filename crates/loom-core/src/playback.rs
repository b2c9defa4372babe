use std::{fmt, sync::Arc};

use anyhow::Result;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::{debug, instrument};

use crate::model::{AudioSource, DEFAULT_PAN, DEFAULT_VOLUME};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct PlaybackState {
    pub playing: bool,
    pub looping: bool,
    pub stopped: bool,
    pub gain: f32,
    pub pan: f32,
}

impl Default for PlaybackState {
    fn default() -> Self {
        Self {
            playing: false,
            looping: false,
            stopped: false,
            gain: DEFAULT_VOLUME,
            pan: DEFAULT_PAN,
        }
    }
}

/// A live monitoring voice owned by exactly one occupied slot.
pub trait PlaybackHandle: Send + fmt::Debug {
    fn pause(&mut self);
    fn resume(&mut self);
    fn set_gain(&mut self, gain: f32);
    fn set_pan(&mut self, pan: f32);
    fn stop(&mut self);
    fn state(&self) -> PlaybackState;
}

/// Opens looping monitor voices. Audio device integrations implement this;
/// the mixer only ever sees the handles it returns.
pub trait PlaybackBackend: Send + Sync {
    fn start_loop(&self, source: &AudioSource) -> Result<Box<dyn PlaybackHandle>>;
}

/// Device-free backend. Tracks transport state so hosts without an output
/// device (and tests) can observe what the mixer asked for.
#[derive(Debug, Default, Clone)]
pub struct HeadlessBackend {
    voices: Arc<Mutex<Vec<Arc<Mutex<PlaybackState>>>>>,
}

impl HeadlessBackend {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// States of every voice this backend has opened, in start order.
    #[must_use]
    pub fn voices(&self) -> Vec<PlaybackState> {
        self.voices.lock().iter().map(|voice| *voice.lock()).collect()
    }

    #[must_use]
    pub fn active_voices(&self) -> usize {
        self.voices
            .lock()
            .iter()
            .filter(|voice| !voice.lock().stopped)
            .count()
    }
}

impl PlaybackBackend for HeadlessBackend {
    #[instrument(skip(self, source), fields(path = %source.path.display()))]
    fn start_loop(&self, source: &AudioSource) -> Result<Box<dyn PlaybackHandle>> {
        if !source.path.is_file() {
            return Err(anyhow::anyhow!(
                "cannot open audio for playback: {}",
                source.path.display()
            ));
        }

        let state = Arc::new(Mutex::new(PlaybackState {
            playing: true,
            looping: true,
            ..PlaybackState::default()
        }));
        self.voices.lock().push(Arc::clone(&state));
        debug!("headless loop started");
        Ok(Box::new(HeadlessVoice { state }))
    }
}

#[derive(Debug)]
struct HeadlessVoice {
    state: Arc<Mutex<PlaybackState>>,
}

impl PlaybackHandle for HeadlessVoice {
    fn pause(&mut self) {
        self.state.lock().playing = false;
    }

    fn resume(&mut self) {
        let mut state = self.state.lock();
        if !state.stopped {
            state.playing = true;
        }
    }

    fn set_gain(&mut self, gain: f32) {
        self.state.lock().gain = gain;
    }

    fn set_pan(&mut self, pan: f32) {
        self.state.lock().pan = pan;
    }

    fn stop(&mut self) {
        let mut state = self.state.lock();
        state.playing = false;
        state.stopped = true;
    }

    fn state(&self) -> PlaybackState {
        *self.state.lock()
    }
}
