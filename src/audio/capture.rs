// Capture tap - appends microphone buffers to an open WAV file
//
// Runs inside the input callback. Samples are staged in a preallocated block
// of fixed size and appended to the writer whenever the block fills, so the
// callback never grows a buffer. A failed append is counted and dropped:
// nothing here may return an error to the audio thread.

use crate::audio::format_conversion::device_sample_to_i16;
use crate::audio::wav::WavError;
use cpal::{FromSample, Sample};
use hound::{SampleFormat, WavSpec, WavWriter};
use std::fs::File;
use std::io::{BufWriter, Seek, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

/// What a finished capture produced
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CaptureReport {
    pub path: PathBuf,
    pub frames_written: u64,
    pub write_errors: u64,
    pub sample_rate: u32,
    pub channels: u16,
}

/// Open recording file plus its staging block
pub struct CaptureSink<W: Write + Seek = BufWriter<File>> {
    writer: WavWriter<W>,
    path: PathBuf,
    staging: Vec<i16>,
    block_samples: usize,
    frames_written: u64,
    sample_rate: u32,
    channels: u16,
    errors: Arc<AtomicU64>,
}

impl CaptureSink {
    /// Create the output file sized to the input format
    pub fn create(
        path: &Path,
        sample_rate: u32,
        channels: u16,
        block_frames: usize,
        errors: Arc<AtomicU64>,
    ) -> Result<Self, WavError> {
        let spec = WavSpec {
            channels,
            sample_rate,
            bits_per_sample: 16,
            sample_format: SampleFormat::Int,
        };
        let writer = WavWriter::create(path, spec)?;
        Ok(Self::from_writer(writer, path, block_frames, errors))
    }

    /// Count a buffer the callback could not deliver (tap busy)
    pub fn record_dropped_buffer(errors: &AtomicU64) {
        errors.fetch_add(1, Ordering::Relaxed);
    }
}

impl<W: Write + Seek> CaptureSink<W> {
    /// Wrap an already opened writer; `path` is only reported back
    pub fn from_writer(
        writer: WavWriter<W>,
        path: &Path,
        block_frames: usize,
        errors: Arc<AtomicU64>,
    ) -> Self {
        let spec = writer.spec();
        let block_samples = block_frames.max(1) * spec.channels.max(1) as usize;

        Self {
            writer,
            path: path.to_path_buf(),
            staging: Vec::with_capacity(block_samples),
            block_samples,
            frames_written: 0,
            sample_rate: spec.sample_rate,
            channels: spec.channels,
            errors,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn frames_written(&self) -> u64 {
        self.frames_written
    }

    /// Append one interleaved device buffer (audio thread)
    pub fn push<T>(&mut self, data: &[T])
    where
        T: Sample,
        f32: FromSample<T>,
    {
        for &sample in data {
            self.staging.push(device_sample_to_i16(sample));
            if self.staging.len() == self.block_samples {
                self.flush_block();
            }
        }
    }

    /// Append the staged block; a failure costs exactly that block
    fn flush_block(&mut self) {
        if self.staging.is_empty() {
            return;
        }

        let mut failed = false;
        for &sample in &self.staging {
            if self.writer.write_sample(sample).is_err() {
                failed = true;
                break;
            }
        }

        if failed {
            self.errors.fetch_add(1, Ordering::Relaxed);
        } else {
            self.frames_written += (self.staging.len() / self.channels.max(1) as usize) as u64;
        }
        self.staging.clear();
    }

    /// Flush the partial block and finalize the header
    pub fn finish(mut self) -> Result<CaptureReport, WavError> {
        self.flush_block();
        let report = CaptureReport {
            path: self.path.clone(),
            frames_written: self.frames_written,
            write_errors: self.errors.load(Ordering::Relaxed),
            sample_rate: self.sample_rate,
            channels: self.channels,
        };
        self.writer.finalize()?;
        Ok(report)
    }
}
