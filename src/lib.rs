// Crescendo audio core - synchronized take recording and pitch-hold scoring
//
// Library exports for the app shell, tests and benchmarks.

pub mod analysis;
pub mod audio;
pub mod config;
pub mod messaging;
pub mod sync;
pub mod take;

// Re-export commonly used types for convenience
pub use analysis::{HoldMetrics, HoldSettings, PitchFrame, analyze_hold};
pub use audio::engine::CpalBackend;
pub use audio::mixer::{MixSettings, mix_aligned};
pub use audio::transport::{AudioBackend, EngineConfig, EngineError, EngineSetup, TransportClock};
pub use audio::virtual_device::{VirtualBackend, VirtualDevice};
pub use audio::wav::{PcmBuffer, WavError, read_pcm16, write_mono_pcm16};
pub use config::Settings;
pub use sync::{SyncError, SyncRunResult, SyncSession, SyncState};
pub use take::{NoteWindow, TakeRecord};
