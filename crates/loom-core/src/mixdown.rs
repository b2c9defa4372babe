use std::{
    fs,
    io::BufWriter,
    path::{Path, PathBuf},
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
    time::Duration,
};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use tempfile::NamedTempFile;
use thiserror::Error;
use tokio::task::{JoinSet, spawn_blocking};
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

use crate::{
    bank::{BankSnapshot, SlotSnapshot},
    config::BounceConfig,
    decode::{DecodedTake, decode_take},
    model::AudioSource,
};

const CANCEL_CHECK_FRAMES: usize = 4_096;
const DURATION_HINT_TOLERANCE: Duration = Duration::from_millis(50);

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum BounceError {
    #[error("no active tracks to bounce")]
    NothingToBounce,
    #[error("track {index} could not be loaded: {reason}")]
    AssetError { index: usize, reason: String },
    #[error("a bounce is already in progress")]
    BounceInProgress,
    #[error("render failed: {0}")]
    RenderError(String),
}

/// Where and how a single bounce is written.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct OutputRequest {
    pub path: PathBuf,
    pub sample_rate: u32,
    pub bits_per_sample: u16,
}

/// Inputs of one bounce: the audible slots of a snapshot plus the output
/// target. Lives only as long as the bounce call.
#[derive(Debug, Clone, PartialEq)]
pub struct MixSession {
    pub inputs: Vec<SlotSnapshot>,
    pub output: OutputRequest,
}

impl MixSession {
    pub fn from_snapshot(
        snapshot: &BankSnapshot,
        config: &BounceConfig,
    ) -> Result<Self, BounceError> {
        let inputs: Vec<SlotSnapshot> = snapshot.audible().cloned().collect();
        if inputs.is_empty() {
            return Err(BounceError::NothingToBounce);
        }

        let file_name = format!("mixdown-{}.wav", Uuid::new_v4());
        Ok(Self {
            inputs,
            output: OutputRequest {
                path: config.output_dir.join(file_name),
                sample_rate: config.sample_rate,
                bits_per_sample: config.bits_per_sample,
            },
        })
    }
}

#[derive(Debug)]
struct ResolvedInput {
    index: usize,
    volume: f32,
    pan: f32,
    take: DecodedTake,
}

#[derive(Debug)]
pub struct MixdownEngine {
    config: BounceConfig,
    in_flight: Arc<AtomicBool>,
}

impl MixdownEngine {
    #[must_use]
    pub fn new(config: BounceConfig) -> Self {
        Self {
            config: config.normalized(),
            in_flight: Arc::new(AtomicBool::new(false)),
        }
    }

    #[must_use]
    pub fn config(&self) -> &BounceConfig {
        &self.config
    }

    /// True while any part of a bounce still runs, including blocking work
    /// left behind by an abandoned bounce future.
    #[must_use]
    pub fn is_bouncing(&self) -> bool {
        self.in_flight.load(Ordering::Acquire)
    }

    /// Validates `snapshot` and claims the engine without doing any I/O.
    /// The claim is held until the returned bounce, and every blocking task
    /// it starts, is gone.
    pub fn prepare(&self, snapshot: &BankSnapshot) -> Result<PreparedBounce, BounceError> {
        let session = MixSession::from_snapshot(snapshot, &self.config)?;
        let lease = RenderLease::acquire(&self.in_flight)?;
        Ok(PreparedBounce {
            session,
            cancel: CancelOnDrop(lease),
        })
    }

    /// Renders every unmuted slot of `snapshot` into one new file.
    ///
    /// Dropping the returned future cancels the bounce: pending decodes are
    /// aborted, the render stops at its next check and its temporary file is
    /// removed before the engine accepts another bounce. Nothing is written
    /// to the output directory unless the whole render succeeds.
    #[instrument(skip(self, snapshot), fields(slots = snapshot.len()))]
    pub async fn bounce(&self, snapshot: &BankSnapshot) -> Result<AudioSource, BounceError> {
        self.prepare(snapshot)?.render().await
    }
}

/// A bounce that has passed validation and owns the engine's claim.
#[derive(Debug)]
pub struct PreparedBounce {
    session: MixSession,
    cancel: CancelOnDrop,
}

impl PreparedBounce {
    #[must_use]
    pub fn session(&self) -> &MixSession {
        &self.session
    }

    pub async fn render(self) -> Result<AudioSource, BounceError> {
        let Self { session, cancel } = self;
        info!(
            inputs = session.inputs.len(),
            path = %session.output.path.display(),
            "bounce started"
        );

        let inputs = resolve_inputs(&session.inputs, &cancel.0).await?;
        let output = session.output.clone();
        let lease = Arc::clone(&cancel.0);
        let rendered = spawn_blocking(move || render_to_temp(&inputs, &output, lease))
            .await
            .map_err(|error| BounceError::RenderError(format!("render task failed: {error}")))?
            .map_err(|error| {
                warn!(?error, "render failed");
                BounceError::RenderError(format!("{error:#}"))
            })?;

        let duration = rendered.duration;
        rendered
            .file
            .persist_noclobber(&session.output.path)
            .map_err(|error| {
                BounceError::RenderError(format!(
                    "failed to persist {}: {}",
                    session.output.path.display(),
                    error.error
                ))
            })?;

        info!(
            path = %session.output.path.display(),
            duration_seconds = duration.as_secs_f64(),
            "bounce completed"
        );
        Ok(AudioSource::with_duration_hint(session.output.path, duration))
    }
}

/// Shared by the bounce future and every blocking task it spawns. The
/// engine is released when the last holder drops.
#[derive(Debug)]
struct RenderLease {
    in_flight: Arc<AtomicBool>,
    cancelled: AtomicBool,
}

impl RenderLease {
    fn acquire(in_flight: &Arc<AtomicBool>) -> Result<Arc<Self>, BounceError> {
        in_flight
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .map_err(|_| {
                warn!("bounce rejected, another render is in flight");
                BounceError::BounceInProgress
            })?;
        Ok(Arc::new(Self {
            in_flight: Arc::clone(in_flight),
            cancelled: AtomicBool::new(false),
        }))
    }
}

impl Drop for RenderLease {
    fn drop(&mut self) {
        self.in_flight.store(false, Ordering::Release);
        debug!("bounce released the engine");
    }
}

/// Held by the async side only. Raises the cancel flag when the bounce
/// future finishes or is dropped.
#[derive(Debug)]
struct CancelOnDrop(Arc<RenderLease>);

impl Drop for CancelOnDrop {
    fn drop(&mut self) {
        self.0.cancelled.store(true, Ordering::Release);
    }
}

/// Decodes every input concurrently. The first failure aborts the rest.
async fn resolve_inputs(
    inputs: &[SlotSnapshot],
    lease: &Arc<RenderLease>,
) -> Result<Vec<ResolvedInput>, BounceError> {
    let mut loads = JoinSet::new();
    for (position, input) in inputs.iter().enumerate() {
        let path = input.source.path.clone();
        let lease = Arc::clone(lease);
        loads.spawn_blocking(move || {
            let decoded = decode_take(&path);
            drop(lease);
            (position, decoded)
        });
    }

    let mut decoded: Vec<Option<DecodedTake>> = inputs.iter().map(|_| None).collect();
    while let Some(joined) = loads.join_next().await {
        let (position, result) = joined
            .map_err(|error| BounceError::RenderError(format!("asset loader failed: {error}")))?;
        match result {
            Ok(take) => decoded[position] = Some(take),
            Err(error) => {
                loads.abort_all();
                let index = inputs[position].index;
                warn!(index, ?error, "asset failed to load, bounce aborted");
                return Err(BounceError::AssetError {
                    index,
                    reason: format!("{error:#}"),
                });
            }
        }
    }

    inputs
        .iter()
        .zip(decoded)
        .map(|(input, take)| {
            let take = take.ok_or_else(|| {
                BounceError::RenderError(format!("slot {} was never resolved", input.index))
            })?;
            if let Some(hint) = input.source.duration_hint {
                let actual = take.duration();
                if hint.abs_diff(actual) > DURATION_HINT_TOLERANCE {
                    debug!(
                        index = input.index,
                        hint_seconds = hint.as_secs_f64(),
                        actual_seconds = actual.as_secs_f64(),
                        "duration hint disagrees with decoded length"
                    );
                }
            }
            Ok(ResolvedInput {
                index: input.index,
                volume: input.volume,
                pan: input.pan,
                take,
            })
        })
        .collect()
}

// Field order matters: the temp file is removed before the lease lets go.
struct RenderedMix {
    file: NamedTempFile,
    duration: Duration,
    _lease: Arc<RenderLease>,
}

#[instrument(skip(inputs, lease), fields(inputs = inputs.len(), path = %output.path.display()))]
fn render_to_temp(
    inputs: &[ResolvedInput],
    output: &OutputRequest,
    lease: Arc<RenderLease>,
) -> Result<RenderedMix> {
    let output_dir = output
        .path
        .parent()
        .filter(|parent| !parent.as_os_str().is_empty())
        .map_or_else(|| Path::new(".").to_path_buf(), Path::to_path_buf);
    fs::create_dir_all(&output_dir).with_context(|| {
        format!(
            "failed to create bounce output directory: {}",
            output_dir.display()
        )
    })?;

    let mut file = tempfile::Builder::new()
        .prefix(".bounce-")
        .suffix(".wav.part")
        .tempfile_in(&output_dir)
        .context("failed to create temporary bounce file")?;

    let mixed = mix_inputs(inputs, output.sample_rate, &lease.cancelled)?;
    let frames = mixed.len() / 2;
    write_wav(
        &mut file,
        &mixed,
        output.sample_rate,
        output.bits_per_sample,
        &lease.cancelled,
    )?;

    if lease.cancelled.load(Ordering::Acquire) {
        return Err(anyhow::anyhow!("bounce cancelled"));
    }

    debug!(frames, "mix rendered to temporary file");
    Ok(RenderedMix {
        file,
        duration: Duration::from_secs_f64(frames as f64 / f64::from(output.sample_rate)),
        _lease: lease,
    })
}

/// Sums inputs from a common origin into interleaved stereo. The result is
/// as long as the longest input.
fn mix_inputs(
    inputs: &[ResolvedInput],
    sample_rate: u32,
    cancelled: &AtomicBool,
) -> Result<Vec<f32>> {
    let tracks: Vec<(&ResolvedInput, Vec<f32>)> = inputs
        .iter()
        .map(|input| {
            let samples =
                resample_linear(&input.take.samples, input.take.sample_rate, sample_rate);
            (input, samples)
        })
        .collect();

    let frames = tracks
        .iter()
        .map(|(_, samples)| samples.len())
        .max()
        .unwrap_or_default();
    let mut buffer = vec![0.0_f32; frames * 2];

    for (input, samples) in &tracks {
        let (left_gain, right_gain) = pan_gains(input.volume, input.pan);
        for (frame, chunk) in samples.chunks(CANCEL_CHECK_FRAMES).enumerate() {
            if cancelled.load(Ordering::Acquire) {
                return Err(anyhow::anyhow!("bounce cancelled during mix"));
            }
            let offset = frame * CANCEL_CHECK_FRAMES * 2;
            let target = &mut buffer[offset..offset + chunk.len() * 2];
            for (sample, out) in chunk.iter().zip(target.chunks_exact_mut(2)) {
                out[0] += sample * left_gain;
                out[1] += sample * right_gain;
            }
        }
        debug!(index = input.index, frames = samples.len(), "track mixed");
    }

    for sample in &mut buffer {
        *sample = sample.clamp(-1.0, 1.0);
    }
    Ok(buffer)
}

fn write_wav(
    file: &mut NamedTempFile,
    interleaved: &[f32],
    sample_rate: u32,
    bits_per_sample: u16,
    cancelled: &AtomicBool,
) -> Result<()> {
    let spec = hound::WavSpec {
        channels: 2,
        sample_rate,
        bits_per_sample,
        sample_format: hound::SampleFormat::Int,
    };
    let scale = ((1_i64 << (bits_per_sample - 1)) - 1) as f32;

    let mut writer = hound::WavWriter::new(BufWriter::new(file.as_file_mut()), spec)
        .context("failed to start wav stream")?;
    for chunk in interleaved.chunks(CANCEL_CHECK_FRAMES * 2) {
        if cancelled.load(Ordering::Acquire) {
            return Err(anyhow::anyhow!("bounce cancelled while writing"));
        }
        for sample in chunk {
            let quantized = (sample * scale).round() as i32;
            writer
                .write_sample(quantized)
                .context("failed to write bounce sample")?;
        }
    }
    writer.finalize().context("failed to finalize bounce wav")?;
    Ok(())
}

/// Linear balance law: centre is unity on both sides, full left silences
/// the right channel and vice versa.
#[must_use]
pub fn pan_gains(volume: f32, pan: f32) -> (f32, f32) {
    let left = volume * (1.0 - pan.max(0.0));
    let right = volume * (1.0 + pan.min(0.0));
    (left, right)
}

#[must_use]
pub fn resample_linear(samples: &[f32], from_rate: u32, to_rate: u32) -> Vec<f32> {
    if from_rate == to_rate || from_rate == 0 || to_rate == 0 || samples.is_empty() {
        return samples.to_vec();
    }

    let ratio = f64::from(from_rate) / f64::from(to_rate);
    let out_len = (samples.len() as f64 / ratio).round() as usize;
    let last = samples.len() - 1;
    (0..out_len)
        .map(|position| {
            let source_position = position as f64 * ratio;
            let base = (source_position.floor() as usize).min(last);
            let next = (base + 1).min(last);
            let fraction = (source_position - base as f64) as f32;
            samples[base] + (samples[next] - samples[base]) * fraction
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn resolved(index: usize, volume: f32, pan: f32, samples: Vec<f32>) -> ResolvedInput {
        ResolvedInput {
            index,
            volume,
            pan,
            take: DecodedTake {
                sample_rate: 48_000,
                channels: 1,
                samples,
            },
        }
    }

    #[test]
    fn centre_pan_is_unity_on_both_sides() {
        assert_eq!(pan_gains(1.0, 0.0), (1.0, 1.0));
        assert_eq!(pan_gains(0.5, -1.0), (0.5, 0.0));
        assert_eq!(pan_gains(0.5, 1.0), (0.0, 0.5));
    }

    #[test]
    fn resampling_doubles_length_when_rate_doubles() {
        let samples: Vec<f32> = (0..1_000).map(|value| value as f32 / 1_000.0).collect();
        let resampled = resample_linear(&samples, 24_000, 48_000);
        assert_eq!(resampled.len(), 2_000);
        assert!((resampled[1] - 0.0005).abs() < 1e-6);
    }

    #[test]
    fn mix_length_follows_longest_input() {
        let cancelled = AtomicBool::new(false);
        let inputs = [
            resolved(0, 1.0, 0.0, vec![0.25; 10]),
            resolved(1, 1.0, -1.0, vec![0.5; 30]),
        ];
        let mixed = mix_inputs(&inputs, 48_000, &cancelled).expect("mix should succeed");

        assert_eq!(mixed.len(), 60);
        assert_eq!(&mixed[0..2], &[0.75, 0.25]);
        assert_eq!(&mixed[20..22], &[0.5, 0.0]);
    }

    #[test]
    fn summed_output_is_clamped() {
        let cancelled = AtomicBool::new(false);
        let inputs = [
            resolved(0, 1.0, 0.0, vec![0.8; 4]),
            resolved(1, 1.0, 0.0, vec![0.8; 4]),
        ];
        let mixed = mix_inputs(&inputs, 48_000, &cancelled).expect("mix should succeed");
        assert!(mixed.iter().all(|sample| (*sample - 1.0).abs() < f32::EPSILON));
    }

    #[test]
    fn cancelled_mix_stops() {
        let cancelled = AtomicBool::new(true);
        let inputs = [resolved(0, 1.0, 0.0, vec![0.1; 16])];
        assert!(mix_inputs(&inputs, 48_000, &cancelled).is_err());
    }

    #[test]
    fn cancelled_write_stops_before_finalizing() {
        let cancelled = AtomicBool::new(true);
        let dir = tempfile::tempdir().expect("tempdir should be creatable");
        let mut file = NamedTempFile::new_in(dir.path()).expect("temp file should be creatable");
        let result = write_wav(&mut file, &[0.1; 64], 48_000, 16, &cancelled);
        assert!(result.is_err());
    }

    #[test]
    fn engine_stays_claimed_until_blocking_work_lets_go() {
        let engine = MixdownEngine::new(BounceConfig::default());
        let snapshot = BankSnapshot {
            slots: vec![SlotSnapshot {
                index: 0,
                source: AudioSource::new("a.wav"),
                muted: false,
                volume: 1.0,
                pan: 0.0,
            }],
        };
        let prepared = engine.prepare(&snapshot).expect("engine should be free");
        let worker = Arc::clone(&prepared.cancel.0);
        assert_eq!(
            engine.prepare(&snapshot).map(|_| ()),
            Err(BounceError::BounceInProgress)
        );

        drop(prepared);
        assert!(worker.cancelled.load(Ordering::Acquire));
        assert!(engine.is_bouncing(), "a running task still holds the engine");

        drop(worker);
        assert!(!engine.is_bouncing());
        assert!(engine.prepare(&snapshot).is_ok());
    }

    #[test]
    fn session_skips_muted_slots() {
        let snapshot = BankSnapshot {
            slots: vec![
                SlotSnapshot {
                    index: 0,
                    source: AudioSource::new("a.wav"),
                    muted: true,
                    volume: 1.0,
                    pan: 0.0,
                },
                SlotSnapshot {
                    index: 3,
                    source: AudioSource::new("b.wav"),
                    muted: false,
                    volume: 0.5,
                    pan: 0.0,
                },
            ],
        };
        let session = MixSession::from_snapshot(&snapshot, &BounceConfig::default())
            .expect("one audible slot is enough");
        assert_eq!(session.inputs.len(), 1);
        assert_eq!(session.inputs[0].index, 3);
        assert!(session.output.path.starts_with("data/bounces"));
    }

    #[test]
    fn all_muted_snapshot_is_nothing_to_bounce() {
        let snapshot = BankSnapshot {
            slots: vec![SlotSnapshot {
                index: 1,
                source: AudioSource::new("a.wav"),
                muted: true,
                volume: 1.0,
                pan: 0.0,
            }],
        };
        assert_eq!(
            MixSession::from_snapshot(&snapshot, &BounceConfig::default()),
            Err(BounceError::NothingToBounce)
        );
    }
}
