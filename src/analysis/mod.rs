// Analysis module - pitch-hold metrics and take scoring
//
// Everything here is pure and synchronous: safe to call from any thread on
// an immutable frame sequence.

pub mod hold;
pub mod pitch;
pub mod summary;

pub use hold::{HoldMetrics, HoldSettings, analyze_hold};
pub use pitch::{PitchFrame, cents_between, hz_to_midi, midi_to_hz};
pub use summary::{
    CentsSummary, NoteScore, OutlierGate, gate_frames, score_take, summarize_cents, take_accuracy,
};
