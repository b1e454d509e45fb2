// Atomic parameters - lock-free gains shared between control and audio threads

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};

/// Thread-safe f32 stored as raw bits in an `AtomicU32`
#[derive(Clone, Debug)]
pub struct AtomicF32 {
    inner: Arc<AtomicU32>,
}

impl AtomicF32 {
    pub fn new(value: f32) -> Self {
        Self {
            inner: Arc::new(AtomicU32::new(value.to_bits())),
        }
    }

    /// Set the value (control thread)
    pub fn set(&self, value: f32) {
        self.inner.store(value.to_bits(), Ordering::Relaxed);
    }

    /// Get the value (audio thread)
    pub fn get(&self) -> f32 {
        f32::from_bits(self.inner.load(Ordering::Relaxed))
    }
}

impl Default for AtomicF32 {
    fn default() -> Self {
        Self::new(0.0)
    }
}

/// Playback gain with a mute switch that remembers the unmuted level
#[derive(Clone, Debug)]
pub struct TrackGain {
    level: AtomicF32,
    muted: Arc<AtomicBool>,
}

impl TrackGain {
    pub fn new(level: f32) -> Self {
        Self {
            level: AtomicF32::new(level.max(0.0)),
            muted: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn set_level(&self, level: f32) {
        let level = if level.is_finite() { level.max(0.0) } else { 0.0 };
        self.level.set(level);
    }

    pub fn level(&self) -> f32 {
        self.level.get()
    }

    pub fn set_muted(&self, muted: bool) {
        self.muted.store(muted, Ordering::Relaxed);
    }

    pub fn is_muted(&self) -> bool {
        self.muted.load(Ordering::Relaxed)
    }

    /// Gain the renderer applies right now
    #[inline]
    pub fn effective(&self) -> f32 {
        if self.is_muted() { 0.0 } else { self.level.get() }
    }
}

impl Default for TrackGain {
    fn default() -> Self {
        Self::new(1.0)
    }
}
