// WAV codec - 16-bit PCM RIFF/WAVE reading and writing
//
// Reading walks the chunk list instead of assuming the canonical 44-byte
// layout: recorders and editors put LIST/fact/JUNK chunks before `data`, the
// `fmt ` chunk may even follow `data`, and every odd-sized chunk is followed
// by one pad byte.
//
// Writing goes through hound, which emits the canonical 44-byte header
// (RIFF size = 36 + data bytes, 16-byte `fmt ` chunk) for 16-bit PCM with one
// or two channels.

use hound::{SampleFormat, WavSpec, WavWriter};
use std::path::{Path, PathBuf};

const WAVE_FORMAT_PCM: u16 = 0x0001;
const WAVE_FORMAT_EXTENSIBLE: u16 = 0xFFFE;
const BYTES_PER_SAMPLE: usize = 2;

/// Size of the header written for mono/stereo 16-bit files
pub const CANONICAL_HEADER_BYTES: usize = 44;

/// WAV codec errors
///
/// Everything except `Io` and `Encode` is a format error: the input is not a
/// 16-bit PCM WAV container we can trust.
#[derive(Debug, thiserror::Error)]
pub enum WavError {
    #[error("Not a RIFF/WAVE file")]
    MissingRiffHeader,

    #[error("Unsupported WAV audio format {0:#06x} (only PCM is supported)")]
    UnsupportedFormat(u16),

    #[error("Unsupported bit depth: {0} bits (only 16-bit PCM is supported)")]
    UnsupportedBitDepth(u16),

    #[error("WAV file has no fmt chunk")]
    MissingFmtChunk,

    #[error("WAV file has no data chunk")]
    MissingDataChunk,

    #[error("Invalid fmt chunk: {0}")]
    InvalidFmtChunk(String),

    #[error("Chunk '{id}' declares {declared} bytes but only {available} remain")]
    TruncatedChunk {
        id: String,
        declared: usize,
        available: usize,
    },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("WAV encoding error: {0}")]
    Encode(#[from] hound::Error),
}

impl WavError {
    /// True for malformed/unsupported input, false for I/O and encoder failures
    pub fn is_format_error(&self) -> bool {
        !matches!(self, WavError::Io(_) | WavError::Encode(_))
    }
}

/// Interleaved 16-bit PCM samples with their format
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PcmBuffer {
    pub samples: Vec<i16>,
    pub sample_rate: u32,
    pub channels: u16,
}

impl PcmBuffer {
    pub fn mono(samples: Vec<i16>, sample_rate: u32) -> Self {
        Self {
            samples,
            sample_rate,
            channels: 1,
        }
    }

    /// Number of frames (one sample per channel)
    pub fn frame_count(&self) -> usize {
        self.samples.len() / self.channels.max(1) as usize
    }

    pub fn duration_seconds(&self) -> f64 {
        if self.sample_rate == 0 {
            return 0.0;
        }
        self.frame_count() as f64 / self.sample_rate as f64
    }

    /// Payload size as declared in the `data` chunk
    pub fn data_bytes(&self) -> usize {
        self.frame_count() * self.channels as usize * BYTES_PER_SAMPLE
    }

    pub fn is_empty(&self) -> bool {
        self.frame_count() == 0
    }

    /// Average all channels into one signal, kept in 16-bit units
    ///
    /// Values are not rounded: truncation back to i16 happens only when the
    /// final signal is encoded.
    pub fn downmix_mono(&self) -> Vec<f32> {
        let channels = self.channels.max(1) as usize;
        if channels == 1 {
            return self.samples.iter().map(|&s| s as f32).collect();
        }
        self.samples
            .chunks_exact(channels)
            .map(|frame| frame.iter().map(|&s| s as f32).sum::<f32>() / channels as f32)
            .collect()
    }
}

#[derive(Debug, Clone, Copy)]
struct FmtChunk {
    format: u16,
    channels: u16,
    sample_rate: u32,
    bits_per_sample: u16,
}

fn read_u16(bytes: &[u8], offset: usize) -> u16 {
    u16::from_le_bytes([bytes[offset], bytes[offset + 1]])
}

fn read_u32(bytes: &[u8], offset: usize) -> u32 {
    u32::from_le_bytes([
        bytes[offset],
        bytes[offset + 1],
        bytes[offset + 2],
        bytes[offset + 3],
    ])
}

fn parse_fmt(body: &[u8]) -> Result<FmtChunk, WavError> {
    if body.len() < 16 {
        return Err(WavError::InvalidFmtChunk(format!(
            "expected at least 16 bytes, got {}",
            body.len()
        )));
    }

    let mut format = read_u16(body, 0);
    let channels = read_u16(body, 2);
    let sample_rate = read_u32(body, 4);
    let bits_per_sample = read_u16(body, 14);

    // WAVE_FORMAT_EXTENSIBLE carries the real format tag in the first two
    // bytes of the SubFormat GUID (offset 24 of the chunk body)
    if format == WAVE_FORMAT_EXTENSIBLE {
        if body.len() < 40 {
            return Err(WavError::InvalidFmtChunk(
                "extensible fmt chunk shorter than 40 bytes".to_string(),
            ));
        }
        format = read_u16(body, 24);
    }

    Ok(FmtChunk {
        format,
        channels,
        sample_rate,
        bits_per_sample,
    })
}

/// Decode an in-memory RIFF/WAVE image into 16-bit PCM
pub fn decode_pcm16(bytes: &[u8]) -> Result<PcmBuffer, WavError> {
    if bytes.len() < 12 || &bytes[0..4] != b"RIFF" || &bytes[8..12] != b"WAVE" {
        return Err(WavError::MissingRiffHeader);
    }

    let mut fmt: Option<FmtChunk> = None;
    let mut data: Option<&[u8]> = None;
    let mut cursor = 12;

    while cursor + 8 <= bytes.len() {
        let id = &bytes[cursor..cursor + 4];
        let declared = read_u32(bytes, cursor + 4) as usize;
        let body_start = cursor + 8;
        let available = bytes.len() - body_start;

        if declared > available {
            return Err(WavError::TruncatedChunk {
                id: String::from_utf8_lossy(id).into_owned(),
                declared,
                available,
            });
        }

        let body = &bytes[body_start..body_start + declared];
        match id {
            b"fmt " => fmt = Some(parse_fmt(body)?),
            b"data" => data = Some(body),
            _ => {}
        }

        // Chunks are word-aligned
        cursor = body_start + declared + (declared & 1);
    }

    let fmt = fmt.ok_or(WavError::MissingFmtChunk)?;
    if fmt.format != WAVE_FORMAT_PCM {
        return Err(WavError::UnsupportedFormat(fmt.format));
    }
    if fmt.bits_per_sample != 16 {
        return Err(WavError::UnsupportedBitDepth(fmt.bits_per_sample));
    }
    if fmt.channels == 0 || fmt.sample_rate == 0 {
        return Err(WavError::InvalidFmtChunk(format!(
            "{} channels at {} Hz",
            fmt.channels, fmt.sample_rate
        )));
    }
    let data = data.ok_or(WavError::MissingDataChunk)?;

    // Only whole frames; a trailing partial frame is dropped
    let frame_bytes = fmt.channels as usize * BYTES_PER_SAMPLE;
    let usable = data.len() - data.len() % frame_bytes;
    let samples = data[..usable]
        .chunks_exact(BYTES_PER_SAMPLE)
        .map(|pair| i16::from_le_bytes([pair[0], pair[1]]))
        .collect();

    Ok(PcmBuffer {
        samples,
        sample_rate: fmt.sample_rate,
        channels: fmt.channels,
    })
}

/// Read a 16-bit PCM WAV file (mono or multi-channel, interleaved)
pub fn read_pcm16(path: impl AsRef<Path>) -> Result<PcmBuffer, WavError> {
    let bytes = std::fs::read(path.as_ref())?;
    decode_pcm16(&bytes)
}

/// Write an interleaved 16-bit buffer
pub fn write_pcm16(path: impl AsRef<Path>, buffer: &PcmBuffer) -> Result<PathBuf, WavError> {
    let path = path.as_ref();
    let spec = WavSpec {
        channels: buffer.channels,
        sample_rate: buffer.sample_rate,
        bits_per_sample: 16,
        sample_format: SampleFormat::Int,
    };

    let mut writer = WavWriter::create(path, spec)?;
    let usable = buffer.frame_count() * buffer.channels as usize;
    for &sample in &buffer.samples[..usable] {
        writer.write_sample(sample)?;
    }
    writer.finalize()?;

    Ok(path.to_path_buf())
}

/// Write mono 16-bit samples with the canonical 44-byte header
pub fn write_mono_pcm16(
    path: impl AsRef<Path>,
    samples: &[i16],
    sample_rate: u32,
) -> Result<PathBuf, WavError> {
    let path = path.as_ref();
    let spec = WavSpec {
        channels: 1,
        sample_rate,
        bits_per_sample: 16,
        sample_format: SampleFormat::Int,
    };

    let mut writer = WavWriter::create(path, spec)?;
    for &sample in samples {
        writer.write_sample(sample)?;
    }
    writer.finalize()?;

    log::debug!(
        "Wrote {} ({} samples @ {} Hz)",
        path.display(),
        samples.len(),
        sample_rate
    );

    Ok(path.to_path_buf())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn fmt_body(format: u16, channels: u16, sample_rate: u32, bits: u16) -> Vec<u8> {
        let block_align = channels * bits / 8;
        let mut body = Vec::new();
        body.extend_from_slice(&format.to_le_bytes());
        body.extend_from_slice(&channels.to_le_bytes());
        body.extend_from_slice(&sample_rate.to_le_bytes());
        body.extend_from_slice(&(sample_rate * block_align as u32).to_le_bytes());
        body.extend_from_slice(&block_align.to_le_bytes());
        body.extend_from_slice(&bits.to_le_bytes());
        body
    }

    fn riff(chunks: &[(&[u8; 4], Vec<u8>)]) -> Vec<u8> {
        let mut body = b"WAVE".to_vec();
        for (id, chunk) in chunks {
            body.extend_from_slice(*id);
            body.extend_from_slice(&(chunk.len() as u32).to_le_bytes());
            body.extend_from_slice(chunk);
            if chunk.len() % 2 == 1 {
                body.push(0);
            }
        }
        let mut bytes = b"RIFF".to_vec();
        bytes.extend_from_slice(&(body.len() as u32).to_le_bytes());
        bytes.extend_from_slice(&body);
        bytes
    }

    fn pcm_bytes(samples: &[i16]) -> Vec<u8> {
        samples.iter().flat_map(|s| s.to_le_bytes()).collect()
    }

    #[test]
    fn test_canonical_header_layout() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("header.wav");
        write_mono_pcm16(&path, &[1, -1, 300], 48000).unwrap();

        let bytes = std::fs::read(&path).unwrap();
        assert_eq!(bytes.len(), CANONICAL_HEADER_BYTES + 6);
        assert_eq!(&bytes[0..4], b"RIFF");
        assert_eq!(read_u32(&bytes, 4), 36 + 6);
        assert_eq!(&bytes[8..16], b"WAVEfmt ");
        assert_eq!(read_u32(&bytes, 16), 16);
        assert_eq!(read_u16(&bytes, 20), 1); // PCM
        assert_eq!(read_u16(&bytes, 22), 1); // mono
        assert_eq!(read_u32(&bytes, 24), 48000);
        assert_eq!(read_u32(&bytes, 28), 96000); // byte rate
        assert_eq!(read_u16(&bytes, 32), 2); // block align
        assert_eq!(read_u16(&bytes, 34), 16);
        assert_eq!(&bytes[36..40], b"data");
        assert_eq!(read_u32(&bytes, 40), 6);
    }

    #[test]
    fn test_writing_twice_is_byte_identical() {
        let dir = tempdir().unwrap();
        let samples: Vec<i16> = (0..1000).map(|i| (i * 37 % 2000 - 1000) as i16).collect();
        let a = write_mono_pcm16(dir.path().join("a.wav"), &samples, 44100).unwrap();
        let b = write_mono_pcm16(dir.path().join("b.wav"), &samples, 44100).unwrap();
        assert_eq!(std::fs::read(a).unwrap(), std::fs::read(b).unwrap());
    }

    #[test]
    fn test_decode_rejects_missing_magic() {
        let mut bytes = riff(&[(b"fmt ", fmt_body(1, 1, 8000, 16)), (b"data", pcm_bytes(&[1]))]);
        bytes[8..12].copy_from_slice(b"AVI ");
        assert!(matches!(decode_pcm16(&bytes), Err(WavError::MissingRiffHeader)));
        assert!(matches!(decode_pcm16(b"RIFF"), Err(WavError::MissingRiffHeader)));
    }

    #[test]
    fn test_decode_rejects_float_format() {
        let bytes = riff(&[(b"fmt ", fmt_body(3, 1, 8000, 16)), (b"data", pcm_bytes(&[1]))]);
        let err = decode_pcm16(&bytes).unwrap_err();
        assert!(matches!(err, WavError::UnsupportedFormat(3)));
        assert!(err.is_format_error());
    }

    #[test]
    fn test_decode_rejects_8_bit() {
        let bytes = riff(&[(b"fmt ", fmt_body(1, 1, 8000, 8)), (b"data", vec![0, 1, 2, 3])]);
        assert!(matches!(
            decode_pcm16(&bytes),
            Err(WavError::UnsupportedBitDepth(8))
        ));
    }

    #[test]
    fn test_decode_rejects_missing_data() {
        let bytes = riff(&[(b"fmt ", fmt_body(1, 1, 8000, 16))]);
        assert!(matches!(decode_pcm16(&bytes), Err(WavError::MissingDataChunk)));
    }

    #[test]
    fn test_decode_skips_odd_sized_chunk_before_data() {
        let bytes = riff(&[
            (b"fmt ", fmt_body(1, 1, 22050, 16)),
            (b"LIST", vec![b'I', b'N', b'F']), // 3 bytes + pad
            (b"data", pcm_bytes(&[5, -5, 32767, -32768])),
        ]);
        let pcm = decode_pcm16(&bytes).unwrap();
        assert_eq!(pcm.samples, vec![5, -5, 32767, -32768]);
        assert_eq!(pcm.sample_rate, 22050);
        assert_eq!(pcm.channels, 1);
    }

    #[test]
    fn test_decode_accepts_fmt_after_data() {
        let bytes = riff(&[
            (b"data", pcm_bytes(&[1, 2, 3, 4])),
            (b"fmt ", fmt_body(1, 2, 44100, 16)),
        ]);
        let pcm = decode_pcm16(&bytes).unwrap();
        assert_eq!(pcm.channels, 2);
        assert_eq!(pcm.frame_count(), 2);
        assert_eq!(pcm.downmix_mono(), vec![1.5, 3.5]);
    }

    #[test]
    fn test_decode_rejects_chunk_past_end_of_file() {
        let mut bytes = riff(&[(b"fmt ", fmt_body(1, 1, 8000, 16)), (b"data", pcm_bytes(&[1, 2]))]);
        bytes.truncate(bytes.len() - 2);
        assert!(matches!(
            decode_pcm16(&bytes),
            Err(WavError::TruncatedChunk { .. })
        ));
    }

    #[test]
    fn test_stereo_round_trip_through_write_pcm16() {
        let dir = tempdir().unwrap();
        let buffer = PcmBuffer {
            samples: vec![100, -100, 200, -200, 300, -300],
            sample_rate: 32000,
            channels: 2,
        };
        let path = write_pcm16(dir.path().join("stereo.wav"), &buffer).unwrap();
        let decoded = read_pcm16(&path).unwrap();
        assert_eq!(decoded, buffer);
        assert_eq!(decoded.data_bytes(), 12);
        assert_eq!(decoded.downmix_mono(), vec![0.0, 0.0, 0.0]);
    }

    #[test]
    fn test_read_missing_file_is_io_error() {
        let err = read_pcm16("/definitely/not/here.wav").unwrap_err();
        assert!(matches!(err, WavError::Io(_)));
        assert!(!err.is_format_error());
    }
}
