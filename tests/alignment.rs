//! Alignment and mixing on the shared timeline

use crescendo_audio::audio::mixer::{MixSettings, Timeline, align_to_reference, mix_aligned};
use crescendo_audio::audio::processing::TakeConditioning;
use crescendo_audio::audio::wav::{read_pcm16, write_mono_pcm16};
use std::sync::atomic::AtomicBool;
use tempfile::tempdir;

fn ramp(len: usize, scale: f32) -> Vec<f32> {
    (0..len).map(|i| ((i % 200) as f32 - 100.0) * scale).collect()
}

/// 1 s reference at 48 kHz, 0.5 s take starting half-way through
#[test]
fn test_late_take_overlaps_second_half() {
    let reference = ramp(48000, 100.0);
    let vocal = ramp(24000, 50.0);
    let settings = MixSettings::default();

    let mix = mix_aligned(&reference, &vocal, 24000, &settings).unwrap();
    assert_eq!(mix.len(), 48000);

    for i in 0..24000 {
        assert_eq!(mix[i], (reference[i] * 0.5) as i16, "sample {}", i);
    }
    for i in 24000..48000 {
        let expected = reference[i] * 0.5 + vocal[i - 24000] * 0.5;
        assert_eq!(mix[i], expected as i16, "sample {}", i);
    }
}

/// Capture started 500 samples before playback
#[test]
fn test_negative_offset_places_vocal_first() {
    let reference = vec![2000.0f32; 1000];
    let vocal = vec![-4000.0f32; 200];

    let mix = mix_aligned(&reference, &vocal, -500, &MixSettings::default()).unwrap();

    let timeline = Timeline::new(reference.len(), vocal.len(), -500);
    assert_eq!(timeline.vocal_index(-500), 0);
    assert_eq!(timeline.reference_index(), 500);
    assert_eq!(mix.len(), 1500);
    assert_eq!(mix.len() as i64, (1000i64).max(500 + 200) - (-500i64).min(0));

    // vocal alone, silence, then reference alone
    assert!(mix[..200].iter().all(|&s| s == -2000));
    assert!(mix[200..500].iter().all(|&s| s == 0));
    assert!(mix[500..].iter().all(|&s| s == 1000));
}

#[test]
fn test_full_scale_sum_does_not_wrap() {
    let pos = vec![32767.0f32; 64];
    let neg = vec![-32768.0f32; 64];
    let settings = MixSettings::default();

    let loud = mix_aligned(&pos, &pos, 0, &settings).unwrap();
    assert!(loud.iter().all(|&s| s == 32767));

    let quiet = mix_aligned(&neg, &neg, 0, &settings).unwrap();
    assert!(quiet.iter().all(|&s| s == -32768));

    let cancel = mix_aligned(&pos, &neg, 0, &settings).unwrap();
    assert!(cancel.iter().all(|&s| s.abs() <= 1));
}

#[test]
fn test_mix_level_does_not_depend_on_offset() {
    let reference = ramp(4000, 80.0);
    let vocal = ramp(1000, 80.0);
    let settings = MixSettings::default();

    let early = mix_aligned(&reference, &vocal, 0, &settings).unwrap();
    let late = mix_aligned(&reference, &vocal, 3000, &settings).unwrap();

    assert_eq!(&early[1000..3000], &late[1000..3000]);
    assert_eq!(&early[..1000], &late[3000..4000]);
}

#[test]
fn test_align_files_resamples_take_to_timeline_rate() {
    let dir = tempdir().unwrap();
    let reference = dir.path().join("reference.wav");
    let take = dir.path().join("take_001.wav");

    write_mono_pcm16(&reference, &vec![1000; 4800], 48000).unwrap();
    // take captured at 24 kHz: 1200 frames = 2400 at the timeline rate
    write_mono_pcm16(&take, &vec![2000; 1200], 24000).unwrap();

    let conditioning = TakeConditioning {
        enabled: false,
        ..Default::default()
    };
    let cancel = AtomicBool::new(false);
    let aligned = align_to_reference(
        &reference,
        &take,
        960,
        48000,
        &MixSettings::default(),
        &conditioning,
        &cancel,
    )
    .unwrap();

    assert_eq!(aligned.mix_frames, 4800);
    assert_eq!(aligned.aligned_frames, 960 + 2400);
    assert!(aligned.aligned_path.ends_with("take_001_aligned.wav"));

    let mix = read_pcm16(&aligned.mix_path).unwrap();
    assert_eq!(mix.sample_rate, 48000);
    assert_eq!(mix.samples[0], 500);
    assert!((mix.samples[2000] - 1500).abs() <= 20, "{}", mix.samples[2000]);

    // sinc edges ring; the body of the take keeps its level
    let shifted = read_pcm16(&aligned.aligned_path).unwrap();
    assert_eq!(shifted.samples.len(), 960 + 2400);
    assert!(shifted.samples[..960].iter().all(|&s| s == 0));
    assert!(
        shifted.samples[1160..3160]
            .iter()
            .all(|&s| (s - 2000).abs() <= 20)
    );
}

#[test]
fn test_conditioning_limits_a_hot_take() {
    let dir = tempdir().unwrap();
    let reference = dir.path().join("reference.wav");
    let take = dir.path().join("hot.wav");

    write_mono_pcm16(&reference, &vec![0; 8000], 8000).unwrap();
    write_mono_pcm16(&take, &vec![32767; 8000], 8000).unwrap();

    let cancel = AtomicBool::new(false);
    let aligned = align_to_reference(
        &reference,
        &take,
        0,
        8000,
        &MixSettings::default(),
        &TakeConditioning::default(),
        &cancel,
    )
    .unwrap();
    assert!(aligned.conditioning_gain < 1.0);

    let shifted = read_pcm16(&aligned.aligned_path).unwrap();
    let peak = shifted.samples.iter().map(|s| s.unsigned_abs()).max().unwrap();
    assert!(peak as f32 <= 0.95 * 32768.0 + 1.0);
    // faded edges
    assert_eq!(shifted.samples[0], 0);
}
