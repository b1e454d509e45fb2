// Format conversion between device samples and 16-bit PCM
//
// The device side is whatever cpal negotiates (f32, i16, u16...). Internally
// playback renders f32 in [-1, 1] and capture stores 16-bit PCM, so these
// helpers sit on both edges of the real-time callbacks. All of them are
// allocation-free.

use cpal::{FromSample, Sample};

/// Convert f32 sample to i16 (capture encode)
///
/// Maps [-1.0, 1.0] to [-32767, 32767] with rounding; values outside the
/// range are clamped so a hot microphone never wraps around.
#[inline]
pub fn f32_to_i16(sample: f32) -> i16 {
    let clamped = if sample.is_nan() { 0.0 } else { sample.clamp(-1.0, 1.0) };
    (clamped * i16::MAX as f32).round() as i16
}

/// Convert i16 sample to f32 (playback decode)
///
/// Divides by 32768 so -32768 maps exactly to -1.0.
#[inline]
pub fn i16_to_f32(sample: i16) -> f32 {
    sample as f32 / 32768.0
}

/// Convert any device input sample to i16 PCM
#[inline]
pub fn device_sample_to_i16<T>(sample: T) -> i16
where
    T: Sample,
    f32: FromSample<T>,
{
    f32_to_i16(f32::from_sample_(sample))
}

/// Write one mono f32 sample to every channel of an interleaved output frame
#[inline]
pub fn write_mono_to_interleaved_frame<T>(internal_sample: f32, output_frame: &mut [T])
where
    T: Sample + FromSample<f32>,
{
    for channel_sample in output_frame.iter_mut() {
        *channel_sample = Sample::from_sample::<f32>(internal_sample);
    }
}

/// Fill an output buffer with silence in the device format
#[inline]
pub fn write_silence<T>(output: &mut [T])
where
    T: Sample + FromSample<f32>,
{
    for sample in output.iter_mut() {
        *sample = Sample::from_sample::<f32>(0.0);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_f32_to_i16_conversion() {
        assert_eq!(f32_to_i16(0.0), 0);
        assert_eq!(f32_to_i16(1.0), i16::MAX);
        assert_eq!(f32_to_i16(-1.0), -i16::MAX);

        let mid = f32_to_i16(0.5);
        assert_eq!(mid, 16384);
    }

    #[test]
    fn test_clamping_and_nan() {
        assert_eq!(f32_to_i16(2.0), i16::MAX);
        assert_eq!(f32_to_i16(-2.0), -i16::MAX);
        assert_eq!(f32_to_i16(f32::NAN), 0);
    }

    #[test]
    fn test_i16_to_f32_conversion() {
        assert_eq!(i16_to_f32(0), 0.0);
        assert_eq!(i16_to_f32(i16::MIN), -1.0);
        assert!((i16_to_f32(i16::MAX) - 1.0).abs() < 0.001);
    }

    #[test]
    fn test_roundtrip_i16() {
        let test_values = [-1.0f32, -0.5, -0.1, 0.0, 0.1, 0.5, 0.9, 1.0];

        for &original in &test_values {
            let back = i16_to_f32(f32_to_i16(original));
            assert!(
                (back - original).abs() < 0.001,
                "Roundtrip failed for {}: got {}",
                original,
                back
            );
        }
    }

    #[test]
    fn test_device_sample_to_i16() {
        assert_eq!(device_sample_to_i16(0.5f32), 16384);
        assert_eq!(device_sample_to_i16(1234i16), 1234);
    }

    #[test]
    fn test_write_mono_to_interleaved() {
        let mut output: [f32; 2] = [0.0; 2];
        write_mono_to_interleaved_frame(0.5, &mut output);
        assert_eq!(output, [0.5, 0.5]);

        let mut output_i16: [i16; 2] = [7; 2];
        write_silence(&mut output_i16);
        assert_eq!(output_i16, [0, 0]);
    }
}
