// Pitch-hold analysis - how long and how steadily a note was held in tune
//
// Works on the pitch frames inside one note window. A "hold run" is a
// sequence of consecutive on-pitch frames with no abnormal gap between them.
// Each frame in a run contributes the time until the frame after it, so the
// result measures elapsed held time rather than a frame count and stays
// correct when the estimator's hop rate is irregular.

use crate::analysis::pitch::PitchFrame;
use linreg::linear_regression;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HoldSettings {
    /// Largest |cents| from the target that still counts as on pitch
    pub cents_threshold: f64,
    /// A gap longer than `gap_factor` times the median hop breaks a run
    pub gap_factor: f64,
}

impl Default for HoldSettings {
    fn default() -> Self {
        Self {
            cents_threshold: 25.0,
            gap_factor: 2.1,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct HoldMetrics {
    pub max_continuous_on_pitch_sec: f64,
    /// Population standard deviation of cents over the longest run
    pub stability_cents_std_dev: Option<f64>,
    /// On-pitch time over all runs divided by the note length, in [0, 1]
    pub hold_percent: f64,
    /// Least-squares slope of cents against time over the longest run
    pub drift_cents_per_sec: Option<f64>,
}

impl HoldMetrics {
    /// Result for windows with nothing to measure
    pub const EMPTY: HoldMetrics = HoldMetrics {
        max_continuous_on_pitch_sec: 0.0,
        stability_cents_std_dev: None,
        hold_percent: 0.0,
        drift_cents_per_sec: None,
    };

    pub fn is_empty(&self) -> bool {
        *self == Self::EMPTY
    }
}

impl Default for HoldMetrics {
    fn default() -> Self {
        Self::EMPTY
    }
}

#[derive(Default)]
struct Run {
    duration: f64,
    /// (seconds into the note, cents from target)
    samples: Vec<(f64, f64)>,
}

/// Median of the strictly positive time steps between frames
fn median_hop(frames: &[&PitchFrame]) -> Option<f64> {
    let mut deltas: Vec<f64> = frames
        .windows(2)
        .map(|w| w[1].time - w[0].time)
        .filter(|d| *d > 0.0)
        .collect();
    if deltas.is_empty() {
        return None;
    }

    deltas.sort_by(f64::total_cmp);
    let mid = deltas.len() / 2;
    if deltas.len() % 2 == 0 {
        Some((deltas[mid - 1] + deltas[mid]) / 2.0)
    } else {
        Some(deltas[mid])
    }
}

fn population_std_dev(values: impl Iterator<Item = f64> + Clone) -> Option<f64> {
    let n = values.clone().count();
    if n == 0 {
        return None;
    }
    let mean = values.clone().sum::<f64>() / n as f64;
    let variance = values.map(|v| (v - mean) * (v - mean)).sum::<f64>() / n as f64;
    Some(variance.sqrt())
}

fn drift(samples: &[(f64, f64)]) -> Option<f64> {
    if samples.len() < 2 {
        return None;
    }
    let (xs, ys): (Vec<f64>, Vec<f64>) = samples.iter().copied().unzip();

    let first = xs[0];
    if xs.iter().all(|&x| x == first) {
        return None;
    }

    linear_regression::<_, _, f64>(&xs, &ys)
        .ok()
        .map(|(slope, _intercept)| slope)
        .filter(|slope| slope.is_finite())
}

/// Hold metrics for one note
///
/// Windows with fewer than two frames, an empty time range or a non-positive
/// target return `HoldMetrics::EMPTY`.
pub fn analyze_hold(
    frames: &[PitchFrame],
    note_start: f64,
    note_end: f64,
    target_hz: f64,
    settings: &HoldSettings,
) -> HoldMetrics {
    if !(note_end > note_start) || !(target_hz > 0.0) || !target_hz.is_finite() {
        return HoldMetrics::EMPTY;
    }

    let mut window: Vec<&PitchFrame> = frames
        .iter()
        .filter(|f| f.time >= note_start && f.time <= note_end)
        .collect();
    if window.len() < 2 {
        return HoldMetrics::EMPTY;
    }
    window.sort_by(|a, b| a.time.total_cmp(&b.time));

    let hop = median_hop(&window);
    let gap_threshold = hop.map_or(f64::INFINITY, |h| h * settings.gap_factor);

    let cents: Vec<f64> = window.iter().map(|f| f.cents_from(target_hz)).collect();
    let on_pitch: Vec<bool> = cents
        .iter()
        .map(|c| c.is_finite() && c.abs() <= settings.cents_threshold)
        .collect();

    let mut best: Option<Run> = None;
    let mut current: Option<Run> = None;
    let mut total_on_pitch = 0.0;

    let close = |run: Option<Run>, best: &mut Option<Run>| {
        if let Some(run) = run {
            let longer = match best {
                Some(b) => run.duration > b.duration,
                None => run.duration > 0.0,
            };
            if longer {
                *best = Some(run);
            }
        }
    };

    for i in 0..window.len() {
        let t = window[i].time;

        if !on_pitch[i] {
            close(current.take(), &mut best);
            continue;
        }
        if i > 0 && current.is_some() && t - window[i - 1].time > gap_threshold {
            close(current.take(), &mut best);
        }

        // The next frame is judged on its own: it may be off pitch, or late
        let interval = match window.get(i + 1) {
            Some(next) => {
                let step = next.time - t;
                if on_pitch[i + 1] && step <= gap_threshold {
                    step
                } else {
                    // Held until the next estimate, at most one hop
                    hop.map_or(step, |h| step.min(h))
                }
            }
            None => note_end - t,
        };

        let run = current.get_or_insert_with(Run::default);
        run.duration += interval;
        run.samples.push((t - note_start, cents[i]));
        total_on_pitch += interval;
    }
    close(current.take(), &mut best);

    let Some(best) = best else {
        return HoldMetrics::EMPTY;
    };

    HoldMetrics {
        max_continuous_on_pitch_sec: best.duration,
        stability_cents_std_dev: population_std_dev(best.samples.iter().map(|s| s.1)),
        hold_percent: (total_on_pitch / (note_end - note_start)).clamp(0.0, 1.0),
        drift_cents_per_sec: drift(&best.samples),
    }
}
