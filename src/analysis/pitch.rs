// Pitch frames - the output of an external pitch estimator

use serde::{Deserialize, Serialize};

/// One pitch estimate at a point in a take
///
/// Any field other than `time` may be absent: unvoiced frames, silence and
/// low-confidence estimates carry no `hz`.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct PitchFrame {
    /// Seconds from the start of the take
    pub time: f64,
    pub hz: Option<f64>,
    pub midi: Option<f64>,
    pub voiced_prob: Option<f64>,
    pub rms: Option<f64>,
}

impl PitchFrame {
    pub fn new(time: f64, hz: Option<f64>) -> Self {
        Self {
            time,
            hz,
            midi: hz.and_then(hz_to_midi),
            ..Default::default()
        }
    }

    pub fn with_rms(mut self, rms: f64) -> Self {
        self.rms = Some(rms);
        self
    }

    pub fn with_voiced_prob(mut self, prob: f64) -> Self {
        self.voiced_prob = Some(prob.clamp(0.0, 1.0));
        self
    }

    /// Positive, finite frequency if the frame has one
    pub fn voiced_hz(&self) -> Option<f64> {
        self.hz.filter(|hz| hz.is_finite() && *hz > 0.0)
    }

    /// Signed distance to `target_hz` in cents (NaN when either is unusable)
    pub fn cents_from(&self, target_hz: f64) -> f64 {
        match self.hz {
            Some(hz) => cents_between(hz, target_hz),
            None => f64::NAN,
        }
    }
}

/// `1200 * log2(hz / reference_hz)`, NaN if either frequency is non-positive
pub fn cents_between(hz: f64, reference_hz: f64) -> f64 {
    if hz > 0.0 && reference_hz > 0.0 {
        1200.0 * (hz / reference_hz).log2()
    } else {
        f64::NAN
    }
}

/// MIDI note number (fractional), absent for non-positive input
pub fn hz_to_midi(hz: f64) -> Option<f64> {
    if hz > 0.0 && hz.is_finite() {
        Some(69.0 + 12.0 * (hz / 440.0).log2())
    } else {
        None
    }
}

/// Frequency of a (fractional) MIDI note number
pub fn midi_to_hz(midi: f64) -> f64 {
    440.0 * 2f64.powf((midi - 69.0) / 12.0)
}
