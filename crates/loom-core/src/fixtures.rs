//! Deterministic tone takes for demos and tests.

use std::{f32::consts::TAU, fs, path::Path};

use anyhow::{Context, Result};

/// Writes a mono 16-bit sine take of `seconds` length.
pub fn write_tone_take(
    path: &Path,
    seconds: f32,
    frequency_hz: f32,
    sample_rate: u32,
) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)
            .with_context(|| format!("failed to create take directory: {}", parent.display()))?;
    }

    let spec = hound::WavSpec {
        channels: 1,
        sample_rate,
        bits_per_sample: 16,
        sample_format: hound::SampleFormat::Int,
    };
    let frame_count = (seconds.max(0.0) * sample_rate as f32).round() as usize;

    let mut writer = hound::WavWriter::create(path, spec)
        .with_context(|| format!("failed to create take: {}", path.display()))?;
    for frame in 0..frame_count {
        let phase = frame as f32 / sample_rate as f32 * frequency_hz * TAU;
        let sample = (phase.sin() * 0.4 * f32::from(i16::MAX)).round() as i16;
        writer
            .write_sample(sample)
            .context("failed to write take sample")?;
    }
    writer.finalize().context("failed to finalize take")?;
    Ok(())
}

/// Tone takes of different lengths, one per mixer slot in the demo.
pub const DEMO_TAKES: [(&str, f32, f32); 3] = [
    ("bass.wav", 4.0, 110.0),
    ("pad.wav", 6.0, 220.0),
    ("lead.wav", 3.0, 440.0),
];
