// Playback - two-track player rendered from the output callback
//
// The reference track carries the exercise audio; the recording track carries
// an aligned take during review. Both are decoded, down-mixed and resampled
// to the engine rate on the control thread, so the callback only reads
// preloaded f32 frames.
//
// A voice is pinned to the engine clock: frame `start_frame` plays at clock
// sample `start_at`, and the frame heard at clock `t` is always
// `start_frame + (t - start_at)`. A buffer the callback could not render is
// lost as silence but never shifts later audio against its anchor.

use crate::audio::clock::SampleAnchor;
use crate::audio::format_conversion::i16_to_f32;
use crate::audio::processing::{ResampleError, resample};
use crate::audio::wav::PcmBuffer;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicI64, AtomicUsize, Ordering};

/// Playback track
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Track {
    Reference,
    Recording,
}

/// A file to start on a track, optionally from an offset
#[derive(Debug, Clone, PartialEq)]
pub struct TrackCue {
    pub track: Track,
    pub path: PathBuf,
    pub seek_seconds: f64,
}

impl TrackCue {
    pub fn new(track: Track, path: impl Into<PathBuf>) -> Self {
        Self {
            track,
            path: path.into(),
            seek_seconds: 0.0,
        }
    }

    pub fn with_seek(mut self, seek_seconds: f64) -> Self {
        self.seek_seconds = seek_seconds;
        self
    }
}

/// Decode a PCM buffer into mono f32 frames at the engine rate
pub fn prepare_track(buffer: &PcmBuffer, engine_rate: u32) -> Result<Arc<[f32]>, ResampleError> {
    // Averaged frames stay in 16-bit units; scale the same way as i16_to_f32
    let scale = i16_to_f32(1);
    let mono: Vec<f32> = buffer
        .downmix_mono()
        .into_iter()
        .map(|s| s * scale)
        .collect();

    if buffer.sample_rate != engine_rate {
        log::info!(
            "Resampling track {} -> {} Hz",
            buffer.sample_rate,
            engine_rate
        );
        Ok(resample(&mono, 1, buffer.sample_rate, engine_rate)?.into())
    } else {
        Ok(mono.into())
    }
}

struct Voice {
    frames: Arc<[f32]>,
    start_frame: usize,
    start_at: SampleAnchor,
}

impl Voice {
    #[inline]
    fn sample_at(&self, t: SampleAnchor) -> f32 {
        if t < self.start_at {
            return 0.0;
        }
        let index = self.start_frame + (t - self.start_at) as usize;
        self.frames.get(index).copied().unwrap_or(0.0)
    }
}

/// Voices rendered by the output callback, behind a mutex the control
/// thread only takes to load or clear
#[derive(Default)]
pub struct Player {
    reference: Option<Voice>,
    recording: Option<Voice>,
}

impl Player {
    pub fn new() -> Self {
        Self::default()
    }

    /// Put frames on a track: `start_frame` plays at clock sample `start_at`
    pub fn load(
        &mut self,
        track: Track,
        frames: Arc<[f32]>,
        start_frame: usize,
        start_at: SampleAnchor,
    ) {
        let voice = Some(Voice {
            start_frame: start_frame.min(frames.len()),
            frames,
            start_at,
        });
        match track {
            Track::Reference => self.reference = voice,
            Track::Recording => self.recording = voice,
        }
    }

    pub fn clear(&mut self) {
        self.reference = None;
        self.recording = None;
    }

    pub fn has_voices(&self) -> bool {
        self.reference.is_some() || self.recording.is_some()
    }

    /// Mono frame at clock sample `t` (audio thread)
    #[inline]
    pub fn sample_at(&self, t: SampleAnchor, reference_gain: f32, recording_gain: f32) -> f32 {
        let mut out = 0.0;
        if let Some(voice) = &self.reference {
            out += voice.sample_at(t) * reference_gain;
        }
        if let Some(voice) = &self.recording {
            out += voice.sample_at(t) * recording_gain;
        }
        out.clamp(-1.0, 1.0)
    }
}

/// Lock-free record of where one track sits on the engine clock
#[derive(Debug, Default)]
pub struct TrackCursor {
    active: AtomicBool,
    start_at: AtomicI64,
    start_frame: AtomicUsize,
    len: AtomicUsize,
}

impl TrackCursor {
    fn set(&self, start_at: SampleAnchor, start_frame: usize, len: usize) {
        self.start_at.store(start_at, Ordering::Relaxed);
        self.start_frame.store(start_frame.min(len), Ordering::Relaxed);
        self.len.store(len, Ordering::Relaxed);
        self.active.store(true, Ordering::Release);
    }

    fn clear(&self) {
        self.active.store(false, Ordering::Release);
    }

    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::Acquire)
    }

    /// Next frame the track plays once the clock reads `t`
    pub fn position_at(&self, t: SampleAnchor) -> Option<usize> {
        if !self.is_active() {
            return None;
        }
        let start_at = self.start_at.load(Ordering::Relaxed);
        let start_frame = self.start_frame.load(Ordering::Relaxed);
        let len = self.len.load(Ordering::Relaxed);
        let elapsed = (t - start_at).max(0) as usize;
        Some(start_frame.saturating_add(elapsed).min(len))
    }

    pub fn is_playing_at(&self, t: SampleAnchor) -> bool {
        self.position_at(t)
            .is_some_and(|p| p < self.len.load(Ordering::Relaxed))
    }
}

/// Cursors for both tracks, readable without touching the player
#[derive(Debug, Default)]
pub struct PlayerCursors {
    reference: TrackCursor,
    recording: TrackCursor,
}

impl PlayerCursors {
    pub fn get(&self, track: Track) -> &TrackCursor {
        match track {
            Track::Reference => &self.reference,
            Track::Recording => &self.recording,
        }
    }

    pub fn set(&self, track: Track, start_at: SampleAnchor, start_frame: usize, len: usize) {
        self.get(track).set(start_at, start_frame, len);
    }

    pub fn clear(&self) {
        self.reference.clear();
        self.recording.clear();
    }

    /// A player node exists as long as some track has been scheduled
    pub fn has_voices(&self) -> bool {
        self.reference.is_active() || self.recording.is_active()
    }
}
