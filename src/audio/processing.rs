// Offline signal processing - take conditioning and sample-rate conversion
//
// None of this runs on the real-time thread. Fades and peak normalization
// prepare a freshly recorded take before it is encoded or mixed; sinc
// resampling (rubato) brings a reference asset to the engine rate on load and
// a take to the timeline rate before mixing.

use rubato::{
    Resampler, SincFixedIn, SincInterpolationParameters, SincInterpolationType, WindowFunction,
};
use serde::{Deserialize, Serialize};

#[derive(Debug, thiserror::Error)]
pub enum ResampleError {
    #[error("Resampler setup failed: {0}")]
    Setup(#[from] rubato::ResamplerConstructionError),

    #[error("Resampling failed: {0}")]
    Process(#[from] rubato::ResampleError),
}

/// Conditioning applied to a recorded take before it is mixed
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TakeConditioning {
    pub enabled: bool,
    /// Linear fade length at both ends, in milliseconds
    pub fade_ms: f32,
    /// Peak ceiling as a fraction of full scale
    pub peak_ceiling: f32,
}

impl Default for TakeConditioning {
    fn default() -> Self {
        Self {
            enabled: true,
            fade_ms: 8.0,
            peak_ceiling: 0.95,
        }
    }
}

/// Apply a linear fade-in and fade-out of `fade_ms` to a mono signal
///
/// The fade is shortened to half the signal on very short takes so the two
/// ramps never overlap.
pub fn fade_edges(samples: &mut [f32], sample_rate: u32, fade_ms: f32) {
    if samples.is_empty() || fade_ms <= 0.0 {
        return;
    }

    let requested = (fade_ms * 0.001 * sample_rate as f32).round() as usize;
    let fade_len = requested.min(samples.len() / 2);
    if fade_len == 0 {
        return;
    }

    let len = samples.len();
    for i in 0..fade_len {
        let gain = i as f32 / fade_len as f32;
        samples[i] *= gain;
        samples[len - 1 - i] *= gain;
    }
}

/// Largest absolute sample value
pub fn peak(samples: &[f32]) -> f32 {
    samples.iter().fold(0.0f32, |acc, &s| acc.max(s.abs()))
}

/// Scale down so the peak sits at `ceiling`; returns the gain applied
///
/// Quiet signals are left alone: the gain is never above 1.0.
pub fn normalize_peak(samples: &mut [f32], ceiling: f32) -> f32 {
    let measured = peak(samples);
    if measured <= ceiling || measured == 0.0 {
        return 1.0;
    }

    let gain = ceiling / measured;
    for sample in samples.iter_mut() {
        *sample *= gain;
    }
    gain
}

/// Fade and peak-limit a mono take in place; returns the normalization gain
pub fn condition_take(samples: &mut [f32], sample_rate: u32, settings: &TakeConditioning) -> f32 {
    if !settings.enabled {
        return 1.0;
    }
    fade_edges(samples, sample_rate, settings.fade_ms);
    normalize_peak(samples, settings.peak_ceiling)
}

/// Input frames of zero padding that flush the sinc filter
const SINC_LEN: usize = 256;

/// Resample an interleaved signal from `from_rate` to `to_rate`
///
/// The result has `round(frames * to_rate / from_rate)` frames and is
/// compensated for the filter delay, so sample 0 stays at time 0. Equal or
/// zero rates return the input unchanged.
pub fn resample(
    samples: &[f32],
    channels: usize,
    from_rate: u32,
    to_rate: u32,
) -> Result<Vec<f32>, ResampleError> {
    let channels = channels.max(1);
    let frames = samples.len() / channels;
    if from_rate == to_rate || from_rate == 0 || to_rate == 0 || frames == 0 {
        return Ok(samples.to_vec());
    }

    let params = SincInterpolationParameters {
        sinc_len: SINC_LEN,
        f_cutoff: 0.95,
        interpolation: SincInterpolationType::Linear,
        oversampling_factor: 256,
        window: WindowFunction::BlackmanHarris2,
    };

    let ratio = to_rate as f64 / from_rate as f64;
    let padded = frames + SINC_LEN;
    let mut resampler = SincFixedIn::<f32>::new(ratio, 1.0, params, padded, channels)?;

    let mut planar = vec![vec![0.0f32; padded]; channels];
    for (i, frame) in samples.chunks_exact(channels).enumerate() {
        for (c, &s) in frame.iter().enumerate() {
            planar[c][i] = s;
        }
    }

    let delay = resampler.output_delay();
    let output = resampler.process(&planar, None)?;
    let out_frames = (frames as f64 * ratio).round() as usize;

    let mut out = vec![0.0f32; out_frames * channels];
    for (c, wave) in output.iter().enumerate() {
        for (i, &s) in wave.iter().skip(delay).take(out_frames).enumerate() {
            out[i * channels + c] = s;
        }
    }
    Ok(out)
}
