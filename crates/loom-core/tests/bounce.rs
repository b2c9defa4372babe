use std::{
    fs,
    path::{Path, PathBuf},
    time::Duration,
};

use loom_core::{
    AudioSource, BankSnapshot, BounceConfig, BounceError, MixdownEngine, SlotSnapshot,
    fixtures::write_tone_take,
};
use tempfile::tempdir;

fn engine(output_dir: &Path) -> MixdownEngine {
    MixdownEngine::new(BounceConfig {
        output_dir: output_dir.to_path_buf(),
        ..BounceConfig::default()
    })
}

fn take(dir: &Path, name: &str, seconds: f32, sample_rate: u32) -> PathBuf {
    let path = dir.join(name);
    write_tone_take(&path, seconds, 330.0, sample_rate).expect("take should be writable");
    path
}

fn slot(index: usize, path: &Path) -> SlotSnapshot {
    SlotSnapshot {
        index,
        source: AudioSource::new(path),
        muted: false,
        volume: 1.0,
        pan: 0.0,
    }
}

fn files_in(dir: &Path) -> Vec<PathBuf> {
    match fs::read_dir(dir) {
        Ok(entries) => entries
            .map(|entry| entry.expect("dir entry should be readable").path())
            .collect(),
        Err(_) => Vec::new(),
    }
}

fn part_files_in(dir: &Path) -> usize {
    files_in(dir)
        .iter()
        .filter(|path| {
            path.file_name()
                .and_then(|name| name.to_str())
                .is_some_and(|name| name.starts_with(".bounce-"))
        })
        .count()
}

/// Waits for blocking work left behind by a dropped bounce. While the engine
/// still reports a bounce, a partial file may exist; once it stops, none may.
async fn wait_for_release(engine: &MixdownEngine, output_dir: &Path) {
    for _ in 0..2_000 {
        let bouncing = engine.is_bouncing();
        let parts = part_files_in(output_dir);
        if !bouncing {
            assert_eq!(parts, 0, "engine released while a partial file remained");
            return;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    panic!("abandoned bounce never released the engine");
}

#[tokio::test]
async fn empty_snapshot_fails_without_touching_disk() {
    let temp = tempdir().expect("tempdir should be creatable");
    let output_dir = temp.path().join("bounces");
    let engine = engine(&output_dir);

    let err = engine
        .bounce(&BankSnapshot::default())
        .await
        .expect_err("empty bank should not bounce");

    assert_eq!(err, BounceError::NothingToBounce);
    assert!(!output_dir.exists());
    assert!(!engine.is_bouncing());
}

#[tokio::test]
async fn bounce_lasts_as_long_as_longest_take() {
    let temp = tempdir().expect("tempdir should be creatable");
    let output_dir = temp.path().join("bounces");
    let short = take(temp.path(), "short.wav", 3.0, 48_000);
    let long = take(temp.path(), "long.wav", 5.0, 48_000);

    let snapshot = BankSnapshot {
        slots: vec![slot(0, &short), slot(1, &long)],
    };
    let source = engine(&output_dir)
        .bounce(&snapshot)
        .await
        .expect("bounce should succeed");

    assert!(source.path.starts_with(&output_dir));
    assert_eq!(source.duration_hint.map(|hint| hint.as_secs_f64()), Some(5.0));

    let reader = hound::WavReader::open(&source.path).expect("bounce should be a wav file");
    assert_eq!(reader.spec().channels, 2);
    assert_eq!(reader.spec().sample_rate, 48_000);
    assert_eq!(reader.duration(), 5 * 48_000);
    assert_eq!(files_in(&output_dir), vec![source.path.clone()]);
}

#[tokio::test]
async fn muted_slot_is_left_out_of_the_mix() {
    let temp = tempdir().expect("tempdir should be creatable");
    let output_dir = temp.path().join("bounces");
    let first = take(temp.path(), "first.wav", 3.0, 48_000);
    let second = take(temp.path(), "second.wav", 5.0, 48_000);

    let mut muted = slot(0, &first);
    muted.muted = true;
    let mut right = slot(1, &second);
    right.pan = 1.0;

    let source = engine(&output_dir)
        .bounce(&BankSnapshot {
            slots: vec![muted, right],
        })
        .await
        .expect("bounce should succeed");

    let mut reader = hound::WavReader::open(&source.path).expect("bounce should be a wav file");
    assert_eq!(reader.duration(), 5 * 48_000);
    let samples: Vec<i16> = reader
        .samples::<i16>()
        .map(|sample| sample.expect("sample should decode"))
        .collect();
    let left_peak = samples.iter().step_by(2).map(|s| s.unsigned_abs()).max();
    let right_peak = samples.iter().skip(1).step_by(2).map(|s| s.unsigned_abs()).max();

    assert_eq!(left_peak, Some(0), "muted slot 0 must not reach the left channel");
    assert!(right_peak.unwrap_or_default() > 1_000);
}

#[tokio::test]
async fn undecodable_take_fails_whole_bounce_and_leaves_nothing() {
    let temp = tempdir().expect("tempdir should be creatable");
    let output_dir = temp.path().join("bounces");
    let good = take(temp.path(), "good.wav", 1.0, 48_000);
    let broken = temp.path().join("broken.wav");
    fs::write(&broken, b"definitely not a riff header").expect("broken take should be writable");

    let snapshot = BankSnapshot {
        slots: vec![slot(0, &good), slot(2, &broken)],
    };
    let err = engine(&output_dir)
        .bounce(&snapshot)
        .await
        .expect_err("broken take should fail the bounce");

    assert!(matches!(err, BounceError::AssetError { index: 2, .. }));
    assert!(files_in(&output_dir).is_empty());
}

#[tokio::test]
async fn unwritable_output_is_a_render_error() {
    let temp = tempdir().expect("tempdir should be creatable");
    let blocker = temp.path().join("not-a-dir");
    fs::write(&blocker, b"file in the way").expect("blocker should be writable");
    let good = take(temp.path(), "good.wav", 0.5, 48_000);

    let err = engine(&blocker.join("bounces"))
        .bounce(&BankSnapshot {
            slots: vec![slot(0, &good)],
        })
        .await
        .expect_err("output under a file should fail");

    assert!(matches!(err, BounceError::RenderError(_)));
}

#[tokio::test]
async fn takes_at_other_rates_are_resampled() {
    let temp = tempdir().expect("tempdir should be creatable");
    let output_dir = temp.path().join("bounces");
    let low_rate = take(temp.path(), "low.wav", 1.0, 24_000);

    let source = engine(&output_dir)
        .bounce(&BankSnapshot {
            slots: vec![slot(0, &low_rate)],
        })
        .await
        .expect("bounce should succeed");

    let reader = hound::WavReader::open(&source.path).expect("bounce should be a wav file");
    assert_eq!(reader.spec().sample_rate, 48_000);
    assert_eq!(reader.duration(), 48_000);
}

#[tokio::test]
async fn second_bounce_while_rendering_is_rejected() {
    let temp = tempdir().expect("tempdir should be creatable");
    let output_dir = temp.path().join("bounces");
    let long = take(temp.path(), "long.wav", 4.0, 48_000);
    let snapshot = BankSnapshot {
        slots: vec![slot(0, &long)],
    };
    let engine = engine(&output_dir);

    let first = engine.bounce(&snapshot);
    tokio::pin!(first);
    tokio::select! {
        biased;
        _ = &mut first => panic!("bounce should still be decoding"),
        () = std::future::ready(()) => {}
    }
    assert!(engine.is_bouncing());

    let err = engine
        .bounce(&snapshot)
        .await
        .expect_err("overlapping bounce should be rejected");
    assert_eq!(err, BounceError::BounceInProgress);

    let source = first.await.expect("first bounce should still finish");
    assert!(source.path.is_file());
    assert!(!engine.is_bouncing());
}

#[tokio::test]
async fn abandoned_bounce_releases_engine_and_writes_nothing() {
    let temp = tempdir().expect("tempdir should be creatable");
    let output_dir = temp.path().join("bounces");
    let long = take(temp.path(), "long.wav", 4.0, 48_000);
    let snapshot = BankSnapshot {
        slots: vec![slot(0, &long)],
    };
    let engine = engine(&output_dir);

    {
        let pending = engine.bounce(&snapshot);
        tokio::pin!(pending);
        tokio::select! {
            biased;
            _ = &mut pending => panic!("bounce should still be decoding"),
            () = std::future::ready(()) => {}
        }
        assert!(engine.is_bouncing());
    }

    wait_for_release(&engine, &output_dir).await;
    assert!(files_in(&output_dir).is_empty());

    let source = engine
        .bounce(&snapshot)
        .await
        .expect("engine should accept a new bounce");
    assert_eq!(files_in(&output_dir), vec![source.path]);
}

#[tokio::test]
async fn engine_stays_busy_until_an_abandoned_render_cleans_up() {
    let temp = tempdir().expect("tempdir should be creatable");
    let output_dir = temp.path().join("bounces");
    let long = take(temp.path(), "long.wav", 120.0, 48_000);
    let snapshot = BankSnapshot {
        slots: vec![slot(0, &long)],
    };
    let engine = engine(&output_dir);

    {
        let pending = engine.bounce(&snapshot);
        tokio::pin!(pending);
        let mut rendering = false;
        for _ in 0..20_000 {
            tokio::select! {
                biased;
                result = &mut pending => panic!("render ended early: {result:?}"),
                () = tokio::time::sleep(Duration::from_millis(1)) => {}
            }
            if part_files_in(&output_dir) > 0 {
                rendering = true;
                break;
            }
        }
        assert!(rendering, "render never created its partial file");
    }

    wait_for_release(&engine, &output_dir).await;
    assert!(files_in(&output_dir).is_empty());
}

#[tokio::test]
async fn every_bounce_gets_a_fresh_path() {
    let temp = tempdir().expect("tempdir should be creatable");
    let output_dir = temp.path().join("bounces");
    let short = take(temp.path(), "short.wav", 0.25, 48_000);
    let snapshot = BankSnapshot {
        slots: vec![slot(0, &short)],
    };
    let engine = engine(&output_dir);

    let first = engine.bounce(&snapshot).await.expect("bounce should succeed");
    let second = engine.bounce(&snapshot).await.expect("bounce should succeed");

    assert_ne!(first.path, second.path);
    assert_eq!(files_in(&output_dir).len(), 2);
}
