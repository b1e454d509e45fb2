//! Sync orchestrator state machine, end to end on the virtual device

use crescendo_audio::audio::processing::TakeConditioning;
use crescendo_audio::audio::virtual_device::{VirtualBackend, VirtualDevice};
use crescendo_audio::audio::wav::{read_pcm16, write_mono_pcm16};
use crescendo_audio::config::Settings;
use crescendo_audio::sync::{SyncError, SyncOperation, SyncSession, SyncState};
use std::path::PathBuf;
use tempfile::{TempDir, tempdir};

struct Fixture {
    _dir: TempDir,
    reference: PathBuf,
    session: SyncSession<VirtualBackend>,
    device: VirtualDevice,
}

fn fixture_with(backend: VirtualBackend) -> Fixture {
    let _ = env_logger::builder().is_test(true).try_init();

    let dir = tempdir().unwrap();
    let reference = dir.path().join("reference.wav");
    write_mono_pcm16(&reference, &vec![8000; 4800], 48000).unwrap();

    let settings = Settings {
        recordings_dir: dir.path().join("takes"),
        conditioning: TakeConditioning {
            enabled: false,
            ..Default::default()
        },
        ..Default::default()
    };

    let device = backend.device();
    Fixture {
        _dir: dir,
        reference,
        session: SyncSession::with_backend(backend, &settings),
        device,
    }
}

fn fixture() -> Fixture {
    fixture_with(VirtualBackend::new(48000).with_buffer_frames(256))
}

fn sing(device: &VirtualDevice, buffers: usize) {
    for _ in 0..buffers {
        assert!(device.process(&[0.25f32; 480], 1));
    }
}

#[test]
fn test_full_take_cycle() {
    let mut f = fixture();
    assert_eq!(f.session.state(), SyncState::Idle);

    f.session.arm(&f.reference).unwrap();
    assert_eq!(f.session.state(), SyncState::Armed);

    let anchors = f.session.start_run(&f.reference).unwrap();
    assert_eq!(f.session.state(), SyncState::Running);
    assert_eq!(anchors.offset_samples(), 0);

    sing(&f.device, 10);

    let result = f.session.stop_run_and_align().unwrap();
    assert_eq!(f.session.state(), SyncState::Stopped);
    assert!(!f.device.is_open());

    assert_eq!(result.offset_samples, 0);
    assert_eq!(result.offset_ms, 0.0);
    assert_eq!(result.sample_rate, 48000);
    assert_eq!(result.capture_write_errors, 0);
    assert!(result.raw_recording_path.exists());
    assert!(result.aligned_recording_path.exists());
    assert!(!result.logs.is_empty());

    let mix = read_pcm16(&result.mix_path).unwrap();
    assert_eq!(mix.samples.len(), 4800);
    // 8000 * 0.5 + 8192 * 0.5
    assert_eq!(mix.samples[100], 8096);

    let taken = f.session.take_result().unwrap();
    assert_eq!(taken, result);
    assert_eq!(f.session.state(), SyncState::Idle);

    // ready for the next take
    f.session.arm(&f.reference).unwrap();
}

#[test]
fn test_review_playback_respects_mutes() {
    let mut f = fixture();
    f.session.arm(&f.reference).unwrap();
    f.session.start_run(&f.reference).unwrap();
    sing(&f.device, 10);
    f.session.stop_run_and_align().unwrap();

    let anchor = f.session.play_aligned().unwrap();
    assert!(anchor.is_some());
    assert!(f.device.is_open());
    f.device.take_output();

    let reference_level = 8000.0 / 32768.0;
    let vocal_level = 8192.0 / 32768.0;

    f.device.render(16);
    let both = f.device.take_output();
    assert!((both[0] - (reference_level + vocal_level)).abs() < 1e-6);

    f.session.set_mute_ref(true);
    f.device.render(16);
    assert!((f.device.take_output()[0] - vocal_level).abs() < 1e-6);

    f.session.set_mute_rec(true);
    f.device.render(16);
    assert_eq!(f.device.take_output()[0], 0.0);

    f.session.stop_playback();
    assert!(!f.device.is_open());
    assert_eq!(f.session.state(), SyncState::Stopped);
}

#[test]
fn test_out_of_order_calls_are_rejected() {
    let mut f = fixture();

    let err = f.session.start_run(&f.reference).unwrap_err();
    assert!(matches!(
        err,
        SyncError::InvalidState {
            operation: SyncOperation::StartRun,
            state: SyncState::Idle
        }
    ));

    f.session.arm(&f.reference).unwrap();
    assert!(matches!(
        f.session.arm(&f.reference),
        Err(SyncError::InvalidState { .. })
    ));
    assert!(matches!(
        f.session.stop_run(),
        Err(SyncError::InvalidState { .. })
    ));
    assert!(matches!(
        f.session.play_aligned(),
        Err(SyncError::InvalidState { .. })
    ));
    // rejected calls change nothing
    assert_eq!(f.session.state(), SyncState::Armed);
}

#[test]
fn test_start_with_other_reference_is_rejected() {
    let mut f = fixture();
    f.session.arm(&f.reference).unwrap();

    let other = f.reference.with_file_name("other.wav");
    assert!(matches!(
        f.session.start_run(&other),
        Err(SyncError::ReferenceMismatch { .. })
    ));
    assert_eq!(f.session.state(), SyncState::Armed);
}

#[test]
fn test_engine_failure_returns_to_idle() {
    let mut f = fixture_with(VirtualBackend::new(48000).failing("no microphone permission"));
    f.session.arm(&f.reference).unwrap();

    let err = f.session.start_run(&f.reference).unwrap_err();
    assert!(matches!(err, SyncError::Engine(_)));
    assert_eq!(f.session.state(), SyncState::Idle);

    // a fresh arm is required
    assert!(matches!(
        f.session.start_run(&f.reference),
        Err(SyncError::InvalidState { .. })
    ));
}

#[test]
fn test_alignment_failure_leaves_audio_stopped() {
    let mut f = fixture();
    f.session.arm(&f.reference).unwrap();
    f.session.start_run(&f.reference).unwrap();
    sing(&f.device, 2);

    std::fs::remove_file(&f.reference).unwrap();

    let err = f.session.stop_run_and_align().unwrap_err();
    assert!(matches!(err, SyncError::Alignment(_)));
    assert_eq!(f.session.state(), SyncState::Idle);
    assert!(!f.device.is_open());
    assert!(!f.session.transport().is_running());
}

#[test]
fn test_cancel_alignment_returns_to_idle() {
    let mut f = fixture();
    f.session.arm(&f.reference).unwrap();
    f.session.start_run(&f.reference).unwrap();
    sing(&f.device, 2);

    f.session.stop_run().unwrap();
    assert_eq!(f.session.state(), SyncState::Stopped);
    assert!(f.session.is_alignment_pending());

    assert!(f.session.cancel_alignment());
    assert_eq!(f.session.state(), SyncState::Idle);
    assert!(!f.session.cancel_alignment());
}

#[test]
fn test_reset_mid_run_finalizes_recording() {
    let mut f = fixture();
    f.session.arm(&f.reference).unwrap();
    f.session.start_run(&f.reference).unwrap();
    sing(&f.device, 3);

    f.session.reset();
    assert_eq!(f.session.state(), SyncState::Idle);
    assert!(!f.device.is_open());

    let takes: Vec<_> = std::fs::read_dir(f.reference.with_file_name("takes"))
        .unwrap()
        .collect();
    assert_eq!(takes.len(), 1);
}

#[test]
fn test_take_record_from_run() {
    use crescendo_audio::analysis::{HoldSettings, PitchFrame};
    use crescendo_audio::take::{NoteWindow, TakeRecord};

    let mut f = fixture();
    f.session.arm(&f.reference).unwrap();
    f.session.start_run(&f.reference).unwrap();
    sing(&f.device, 10);
    let result = f.session.stop_run_and_align().unwrap();

    let frames: Vec<PitchFrame> = (0..10)
        .map(|i| PitchFrame::new(i as f64 * 0.01, Some(440.0)))
        .collect();
    let notes = [NoteWindow::from_midi(0.0, 0.1, 69)];
    let record = TakeRecord::from_run(&result, frames, &notes, &HoldSettings::default(), 50.0);

    assert_eq!(record.recording_path, result.raw_recording_path);
    assert_eq!(record.offset_samples, 0);
    assert_eq!(record.accuracy_pct, 100.0);
    assert!((record.notes[0].hold.hold_percent - 1.0).abs() < 1e-9);

    let json = record.to_json().unwrap();
    let restored = TakeRecord::from_json(&json).unwrap();
    assert_eq!(restored.id, record.id);
    assert_eq!(restored.created_at, record.created_at);
    assert_eq!(restored.notes.len(), 1);
}
