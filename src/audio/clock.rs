// Sample clock - the engine's running frame counter
//
// The output callback is the master clock: every rendered buffer advances
// the counter by its frame count. Playback and recording anchors are read
// from this counter, so both share one hardware clock even though capture
// arrives on a different callback.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicI64, AtomicU32, Ordering};

/// Engine-relative sample position
pub type SampleAnchor = i64;

/// Shared clock state, cloned into the audio callbacks
#[derive(Clone, Debug)]
pub struct SampleClock {
    frames_rendered: Arc<AtomicI64>,
    has_rendered: Arc<AtomicBool>,
    /// Frames between the callback instant and the moment its first frame is
    /// heard, as reported by the device timestamps
    output_latency_frames: Arc<AtomicI64>,
    sample_rate: Arc<AtomicU32>,
}

impl SampleClock {
    pub fn new(sample_rate: u32) -> Self {
        Self {
            frames_rendered: Arc::new(AtomicI64::new(0)),
            has_rendered: Arc::new(AtomicBool::new(false)),
            output_latency_frames: Arc::new(AtomicI64::new(0)),
            sample_rate: Arc::new(AtomicU32::new(sample_rate)),
        }
    }

    /// Advance by one rendered buffer (called from the output callback)
    pub fn advance(&self, frames: usize) {
        self.frames_rendered
            .fetch_add(frames as i64, Ordering::AcqRel);
        self.has_rendered.store(true, Ordering::Release);
    }

    /// Total frames rendered by the output path, absent before the first buffer
    pub fn mixer_time(&self) -> Option<SampleAnchor> {
        if self.has_rendered.load(Ordering::Acquire) {
            Some(self.frames_rendered.load(Ordering::Acquire))
        } else {
            None
        }
    }

    /// Raw frame counter; the first frame of the next rendered buffer
    pub fn frames_rendered(&self) -> SampleAnchor {
        self.frames_rendered.load(Ordering::Acquire)
    }

    /// Mixer time shifted to when the current frame actually reaches the speaker
    pub fn presentation_time(&self) -> Option<SampleAnchor> {
        self.mixer_time()
            .map(|t| t + self.output_latency_frames.load(Ordering::Relaxed))
    }

    pub fn has_rendered(&self) -> bool {
        self.has_rendered.load(Ordering::Acquire)
    }

    pub fn set_output_latency_frames(&self, frames: i64) {
        self.output_latency_frames
            .store(frames.max(0), Ordering::Relaxed);
    }

    pub fn output_latency_frames(&self) -> i64 {
        self.output_latency_frames.load(Ordering::Relaxed)
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate.load(Ordering::Relaxed)
    }

    /// Set the negotiated rate (before the stream starts)
    pub fn set_sample_rate(&self, sample_rate: u32) {
        self.sample_rate.store(sample_rate, Ordering::Relaxed);
    }

    /// Forget everything rendered so far (engine restarted)
    pub fn reset(&self) {
        self.frames_rendered.store(0, Ordering::Release);
        self.has_rendered.store(false, Ordering::Release);
        self.output_latency_frames.store(0, Ordering::Relaxed);
    }

    /// Convert a frame count to milliseconds at the clock rate
    pub fn frames_to_ms(&self, frames: i64) -> f64 {
        frames_to_ms(frames, self.sample_rate())
    }
}

/// Convert a frame count to milliseconds
pub fn frames_to_ms(frames: i64, sample_rate: u32) -> f64 {
    if sample_rate == 0 {
        return 0.0;
    }
    frames as f64 * 1000.0 / sample_rate as f64
}

/// Convert a duration in seconds to whole frames (floor)
pub fn seconds_to_frames(seconds: f64, sample_rate: u32) -> usize {
    if seconds <= 0.0 || !seconds.is_finite() {
        return 0;
    }
    (seconds * sample_rate as f64) as usize
}
