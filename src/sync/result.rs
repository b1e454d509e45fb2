// Run result - what one completed arm/run/align cycle produced

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SyncRunResult {
    /// Wall-clock recording start, nanoseconds since the Unix epoch
    pub rec_start_ns: i64,
    pub raw_recording_path: PathBuf,
    /// Take shifted onto the reference's sample 0
    pub aligned_recording_path: PathBuf,
    /// Reference and take mixed on the shared timeline
    pub mix_path: PathBuf,
    /// Recording anchor minus playback anchor, in engine samples
    pub offset_samples: i64,
    pub offset_ms: f64,
    /// Engine sample rate the offset and the output files use
    pub sample_rate: u32,
    /// Capture buffers that could not be written
    pub capture_write_errors: u64,
    pub logs: Vec<String>,
}

impl SyncRunResult {
    pub fn offset_seconds(&self) -> f64 {
        self.offset_ms / 1000.0
    }

    pub fn had_capture_errors(&self) -> bool {
        self.capture_write_errors > 0
    }
}
