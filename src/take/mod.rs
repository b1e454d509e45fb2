// Take records - a scored take ready to hand to storage
//
// The crate never touches a database; a `TakeRecord` is serialized to JSON
// and whoever persists takes stores the string.

use crate::analysis::hold::HoldSettings;
use crate::analysis::pitch::{PitchFrame, midi_to_hz};
use crate::analysis::summary::{NoteScore, score_take, take_accuracy};
use crate::sync::result::SyncRunResult;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use uuid::Uuid;

#[derive(Debug, thiserror::Error)]
pub enum TakeError {
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// One note of the exercise: a time window and the pitch to hold
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NoteWindow {
    pub start_sec: f64,
    pub end_sec: f64,
    pub target_hz: f64,
}

impl NoteWindow {
    pub fn new(start_sec: f64, end_sec: f64, target_hz: f64) -> Self {
        Self {
            start_sec,
            end_sec,
            target_hz,
        }
    }

    pub fn from_midi(start_sec: f64, end_sec: f64, midi_note: u8) -> Self {
        Self::new(start_sec, end_sec, midi_to_hz(midi_note as f64))
    }

    pub fn duration(&self) -> f64 {
        (self.end_sec - self.start_sec).max(0.0)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TakeRecord {
    pub id: Uuid,
    pub created_at: DateTime<Utc>,
    pub recording_path: PathBuf,
    pub aligned_recording_path: PathBuf,
    pub offset_samples: i64,
    pub sample_rate: u32,
    pub frames: Vec<PitchFrame>,
    pub notes: Vec<NoteScore>,
    /// Percent of notes whose median error is within the accuracy threshold
    pub accuracy_pct: f64,
}

impl TakeRecord {
    /// Score `frames` against `notes` and attach the run's files
    pub fn from_run(
        run: &SyncRunResult,
        frames: Vec<PitchFrame>,
        notes: &[NoteWindow],
        settings: &HoldSettings,
        accuracy_threshold_cents: f64,
    ) -> Self {
        let scores = score_take(notes, &frames, settings);
        let accuracy_pct = take_accuracy(&scores, accuracy_threshold_cents);

        Self {
            id: Uuid::new_v4(),
            created_at: DateTime::from_timestamp_nanos(run.rec_start_ns),
            recording_path: run.raw_recording_path.clone(),
            aligned_recording_path: run.aligned_recording_path.clone(),
            offset_samples: run.offset_samples,
            sample_rate: run.sample_rate,
            frames,
            notes: scores,
            accuracy_pct,
        }
    }

    pub fn to_json(&self) -> Result<String, TakeError> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    pub fn from_json(json: &str) -> Result<Self, TakeError> {
        Ok(serde_json::from_str(json)?)
    }
}
