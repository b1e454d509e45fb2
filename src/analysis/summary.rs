// Take-level scoring - frame gating, cents summaries and per-note scores

use crate::analysis::hold::{HoldMetrics, HoldSettings, analyze_hold};
use crate::analysis::pitch::{PitchFrame, cents_between};
use crate::take::NoteWindow;
use serde::{Deserialize, Serialize};

/// Keep-mask over `frames`
///
/// A frame is dropped when its RMS is below `rms_gate_ratio` of the loudest
/// frame, when it has no usable pitch, or when its pitch jumps more than
/// `jump_gate_cents` away from the last kept pitch. A ratio or jump of 0
/// disables that gate.
pub fn gate_frames(frames: &[PitchFrame], rms_gate_ratio: f64, jump_gate_cents: f64) -> Vec<bool> {
    let mut keep = vec![true; frames.len()];

    if rms_gate_ratio > 0.0 {
        let max_rms = frames
            .iter()
            .filter_map(|f| f.rms)
            .fold(0.0f64, f64::max);
        if max_rms > 0.0 {
            let floor = rms_gate_ratio * max_rms;
            for (k, frame) in keep.iter_mut().zip(frames) {
                if frame.rms.is_some_and(|rms| rms < floor) {
                    *k = false;
                }
            }
        }
    }

    let mut prev: Option<f64> = None;
    for (k, frame) in keep.iter_mut().zip(frames) {
        let Some(hz) = frame.voiced_hz() else {
            *k = false;
            continue;
        };
        if let Some(p) = prev {
            if jump_gate_cents > 0.0 && cents_between(hz, p).abs() > jump_gate_cents {
                *k = false;
                continue;
            }
        }
        prev = Some(hz);
    }

    keep
}

/// Cents errors beyond `max_abs_cents` are outliers; outlier bursts shorter
/// than `ignore_short_ms` are left out of the summary instead of counted
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct OutlierGate {
    pub max_abs_cents: f64,
    pub ignore_short_ms: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct CentsSummary {
    pub mean_abs_cents: Option<f64>,
    pub pct_within_25: Option<f64>,
    pub pct_within_50: Option<f64>,
    pub pct_within_100: Option<f64>,
    pub valid_frames: usize,
}

fn valid_mask(cents: &[f64], gate: Option<&OutlierGate>, frame_duration: f64) -> Vec<bool> {
    let mut valid: Vec<bool> = cents.iter().map(|c| !c.is_nan()).collect();
    let Some(gate) = gate.filter(|g| g.max_abs_cents > 0.0) else {
        return valid;
    };

    let outlier: Vec<bool> = cents.iter().map(|c| c.abs() > gate.max_abs_cents).collect();

    if gate.ignore_short_ms > 0.0 && frame_duration > 0.0 {
        let min_frames = ((gate.ignore_short_ms / 1000.0 / frame_duration) as usize).max(1);
        let mut i = 0;
        while i < outlier.len() {
            if !outlier[i] {
                i += 1;
                continue;
            }
            let start = i;
            while i < outlier.len() && outlier[i] {
                i += 1;
            }
            if i - start < min_frames {
                valid[start..i].iter_mut().for_each(|v| *v = false);
            }
        }
    } else {
        for (v, o) in valid.iter_mut().zip(&outlier) {
            *v &= !o;
        }
    }

    valid
}

/// Summarize a cents-error track; NaN entries are skipped
pub fn summarize_cents(cents: &[f64], gate: Option<&OutlierGate>, frame_duration: f64) -> CentsSummary {
    let valid = valid_mask(cents, gate, frame_duration);
    let used: Vec<f64> = cents
        .iter()
        .zip(&valid)
        .filter(|(_, v)| **v)
        .map(|(c, _)| c.abs())
        .collect();

    if used.is_empty() {
        return CentsSummary::default();
    }

    let n = used.len() as f64;
    let within = |limit: f64| Some(used.iter().filter(|&&c| c <= limit).count() as f64 / n * 100.0);

    CentsSummary {
        mean_abs_cents: Some(used.iter().sum::<f64>() / n),
        pct_within_25: within(25.0),
        pct_within_50: within(50.0),
        pct_within_100: within(100.0),
        valid_frames: used.len(),
    }
}

/// Scoring of a single note
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NoteScore {
    pub note: NoteWindow,
    pub hold: HoldMetrics,
    /// Median signed cents error of the voiced frames in the window
    pub median_cents: Option<f64>,
    pub voiced_frames: usize,
}

fn median(values: &mut [f64]) -> Option<f64> {
    if values.is_empty() {
        return None;
    }
    values.sort_by(f64::total_cmp);
    let mid = values.len() / 2;
    Some(if values.len() % 2 == 0 {
        (values[mid - 1] + values[mid]) / 2.0
    } else {
        values[mid]
    })
}

/// Score every note of a take against the take's pitch frames
pub fn score_take(notes: &[NoteWindow], frames: &[PitchFrame], settings: &HoldSettings) -> Vec<NoteScore> {
    notes
        .iter()
        .map(|note| {
            let mut cents: Vec<f64> = frames
                .iter()
                .filter(|f| f.time >= note.start_sec && f.time <= note.end_sec)
                .map(|f| f.cents_from(note.target_hz))
                .filter(|c| c.is_finite())
                .collect();

            NoteScore {
                note: note.clone(),
                hold: analyze_hold(frames, note.start_sec, note.end_sec, note.target_hz, settings),
                voiced_frames: cents.len(),
                median_cents: median(&mut cents),
            }
        })
        .collect()
}

/// Percent of scored notes whose median error is within `threshold_cents`
pub fn take_accuracy(scores: &[NoteScore], threshold_cents: f64) -> f64 {
    let scored: Vec<f64> = scores.iter().filter_map(|s| s.median_cents).collect();
    if scored.is_empty() {
        return 0.0;
    }
    let hits = scored.iter().filter(|c| c.abs() <= threshold_cents).count();
    hits as f64 / scored.len() as f64 * 100.0
}
