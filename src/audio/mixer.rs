// Alignment & mixing - put a take and the reference on one timeline
//
// The reference sits at sample 0 of the timeline; the vocal take sits at
// `offset_samples`, which may be negative when capture began before
// playback. Both are mono f32 in 16-bit units. They are summed in f32 after
// a fixed headroom attenuation and hard-clipped to i16 only when encoded,
// so the output level never depends on the offset.

use crate::audio::processing::{ResampleError, TakeConditioning, condition_take, resample};
use crate::audio::wav::{WavError, read_pcm16, write_mono_pcm16};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};

/// Samples accumulated between two cancellation checks
const MIX_CHUNK: usize = 1 << 16;

/// Full scale of one 16-bit sample as f32
const I16_SCALE: f32 = 32768.0;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MixSettings {
    /// Attenuation applied to each signal before summing
    pub headroom: f32,
}

impl Default for MixSettings {
    fn default() -> Self {
        Self { headroom: 0.5 }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum MixError {
    #[error("WAV error: {0}")]
    Wav(#[from] WavError),

    #[error("Alignment cancelled")]
    Cancelled,

    #[error("Invalid sample rate: {0}")]
    InvalidSampleRate(u32),

    #[error("Timeline of {0} samples cannot be allocated")]
    TimelineTooLong(i64),

    #[error("Resample error: {0}")]
    Resample(#[from] ResampleError),
}

/// Sample range covered by the mix, relative to the reference's sample 0
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Timeline {
    pub start: i64,
    pub end: i64,
}

impl Timeline {
    pub fn new(reference_len: usize, vocal_len: usize, offset_samples: i64) -> Self {
        let start = offset_samples.min(0);
        let end = (reference_len as i64).max(offset_samples + vocal_len as i64);
        Self { start, end }
    }

    pub fn len(&self) -> i64 {
        (self.end - self.start).max(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Buffer index of the reference's first sample
    pub fn reference_index(&self) -> usize {
        (-self.start) as usize
    }

    /// Buffer index of the vocal's first sample
    pub fn vocal_index(&self, offset_samples: i64) -> usize {
        (offset_samples - self.start) as usize
    }
}

/// Hard-clip one accumulated value to 16 bits (truncating toward zero)
#[inline]
fn encode_sample(value: f32) -> i16 {
    value.clamp(i16::MIN as f32, i16::MAX as f32) as i16
}

fn check_cancel(cancel: &AtomicBool) -> Result<(), MixError> {
    if cancel.load(Ordering::Relaxed) {
        Err(MixError::Cancelled)
    } else {
        Ok(())
    }
}

fn accumulate(
    acc: &mut [f32],
    at: usize,
    signal: &[f32],
    gain: f32,
    cancel: &AtomicBool,
) -> Result<(), MixError> {
    for (dst, src) in acc[at..at + signal.len()]
        .chunks_mut(MIX_CHUNK)
        .zip(signal.chunks(MIX_CHUNK))
    {
        check_cancel(cancel)?;
        for (d, &s) in dst.iter_mut().zip(src) {
            *d += s * gain;
        }
    }
    Ok(())
}

/// Mix a reference and a vocal take on a shared timeline
pub fn mix_aligned(
    reference: &[f32],
    vocal: &[f32],
    offset_samples: i64,
    settings: &MixSettings,
) -> Result<Vec<i16>, MixError> {
    let never = AtomicBool::new(false);
    mix_aligned_cancellable(reference, vocal, offset_samples, settings, &never)
}

/// `mix_aligned`, checking `cancel` between chunks
pub fn mix_aligned_cancellable(
    reference: &[f32],
    vocal: &[f32],
    offset_samples: i64,
    settings: &MixSettings,
    cancel: &AtomicBool,
) -> Result<Vec<i16>, MixError> {
    let timeline = Timeline::new(reference.len(), vocal.len(), offset_samples);
    let total = usize::try_from(timeline.len())
        .map_err(|_| MixError::TimelineTooLong(timeline.len()))?;

    let mut acc = vec![0.0f32; total];
    accumulate(
        &mut acc,
        timeline.reference_index(),
        reference,
        settings.headroom,
        cancel,
    )?;
    accumulate(
        &mut acc,
        timeline.vocal_index(offset_samples),
        vocal,
        settings.headroom,
        cancel,
    )?;

    check_cancel(cancel)?;
    Ok(acc.into_iter().map(encode_sample).collect())
}

/// Vocal moved onto the reference's sample 0 (no headroom)
///
/// Capture that happened before playback started is dropped; a late start is
/// padded with silence.
pub fn shift_to_reference(vocal: &[f32], offset_samples: i64) -> Vec<i16> {
    let end = (offset_samples + vocal.len() as i64).max(0) as usize;
    let mut out = vec![0i16; end];
    for (i, &s) in vocal.iter().enumerate() {
        let t = offset_samples + i as i64;
        if t >= 0 {
            out[t as usize] = encode_sample(s);
        }
    }
    out
}

/// Files and figures produced by one alignment
#[derive(Debug, Clone, PartialEq)]
pub struct AlignedMix {
    pub aligned_path: PathBuf,
    pub mix_path: PathBuf,
    /// Offset on the timeline, in timeline samples
    pub offset_samples: i64,
    pub sample_rate: u32,
    pub mix_frames: usize,
    pub aligned_frames: usize,
    /// Normalization gain applied while conditioning the take
    pub conditioning_gain: f32,
}

/// Where the alignment outputs go, next to the raw take
pub fn output_paths(recording: &Path) -> (PathBuf, PathBuf) {
    let stem = recording
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| "take".to_string());
    let dir = recording.parent().unwrap_or_else(|| Path::new("."));
    (
        dir.join(format!("{}_aligned.wav", stem)),
        dir.join(format!("{}_mix.wav", stem)),
    )
}

/// Decode a file to mono 16-bit-unit samples at `rate`
fn load_mono(path: &Path, rate: u32) -> Result<Vec<f32>, MixError> {
    let buffer = read_pcm16(path)?;
    let mono = buffer.downmix_mono();
    Ok(resample(&mono, 1, buffer.sample_rate, rate)?)
}

/// Align a recorded take against its reference and write both outputs
///
/// `offset_samples` is measured on the engine clock at `timeline_rate`; both
/// files are brought to that rate before mixing.
pub fn align_to_reference(
    reference_path: &Path,
    recording_path: &Path,
    offset_samples: i64,
    timeline_rate: u32,
    settings: &MixSettings,
    conditioning: &TakeConditioning,
    cancel: &AtomicBool,
) -> Result<AlignedMix, MixError> {
    if timeline_rate == 0 {
        return Err(MixError::InvalidSampleRate(timeline_rate));
    }

    let reference = load_mono(reference_path, timeline_rate)?;
    check_cancel(cancel)?;

    let mut vocal = load_mono(recording_path, timeline_rate)?;
    check_cancel(cancel)?;

    // Conditioning works on full-scale-relative values
    vocal.iter_mut().for_each(|s| *s /= I16_SCALE);
    let conditioning_gain = condition_take(&mut vocal, timeline_rate, conditioning);
    vocal.iter_mut().for_each(|s| *s *= I16_SCALE);

    let mix = mix_aligned_cancellable(&reference, &vocal, offset_samples, settings, cancel)?;
    let aligned = shift_to_reference(&vocal, offset_samples);

    let (aligned_path, mix_path) = output_paths(recording_path);
    write_mono_pcm16(&aligned_path, &aligned, timeline_rate)?;
    write_mono_pcm16(&mix_path, &mix, timeline_rate)?;

    log::info!(
        "Aligned {} at offset {} samples ({} Hz): {} mix frames",
        recording_path.display(),
        offset_samples,
        timeline_rate,
        mix.len()
    );

    Ok(AlignedMix {
        aligned_path,
        mix_path,
        offset_samples,
        sample_rate: timeline_rate,
        mix_frames: mix.len(),
        aligned_frames: aligned.len(),
        conditioning_gain,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_timeline_positive_offset() {
        let t = Timeline::new(48000, 24000, 24000);
        assert_eq!(t.start, 0);
        assert_eq!(t.len(), 48000);
        assert_eq!(t.reference_index(), 0);
        assert_eq!(t.vocal_index(24000), 24000);
    }

    #[test]
    fn test_timeline_negative_offset() {
        let t = Timeline::new(1000, 200, -500);
        assert_eq!(t.start, -500);
        assert_eq!(t.len(), 1500);
        assert_eq!(t.reference_index(), 500);
        assert_eq!(t.vocal_index(-500), 0);
    }

    #[test]
    fn test_mix_applies_headroom_and_truncates() {
        let mix =
            mix_aligned(&[1001.0, -1001.0], &[0.0, 0.0], 0, &MixSettings::default()).unwrap();
        assert_eq!(mix, vec![500, -500]);
    }

    #[test]
    fn test_mix_clips_without_wrapping() {
        let settings = MixSettings { headroom: 1.0 };
        let mix = mix_aligned(&[30000.0, -30000.0], &[30000.0, -30000.0], 0, &settings).unwrap();
        assert_eq!(mix, vec![i16::MAX, i16::MIN]);
    }

    #[test]
    fn test_mix_of_empty_signals_is_ok_and_empty() {
        let mix = mix_aligned(&[], &[], 0, &MixSettings::default());
        assert!(matches!(mix, Ok(ref v) if v.is_empty()));
    }

    #[test]
    fn test_cancelled_mix_stops() {
        let cancel = AtomicBool::new(true);
        let result =
            mix_aligned_cancellable(&[1.0; 8], &[1.0; 8], 0, &MixSettings::default(), &cancel);
        assert!(matches!(result, Err(MixError::Cancelled)));
    }

    #[test]
    fn test_shift_to_reference() {
        assert_eq!(shift_to_reference(&[1.0, 2.0], 2), vec![0, 0, 1, 2]);
        assert_eq!(shift_to_reference(&[1.0, 2.0, 3.0], -1), vec![2, 3]);
        assert!(shift_to_reference(&[1.0], -5).is_empty());
    }

    #[test]
    fn test_output_paths_sit_next_to_take() {
        let (aligned, mix) = output_paths(Path::new("/tmp/takes/take_1.wav"));
        assert_eq!(aligned, Path::new("/tmp/takes/take_1_aligned.wav"));
        assert_eq!(mix, Path::new("/tmp/takes/take_1_mix.wav"));
    }
}
