// Sync module - orchestrates playback, capture and alignment for one take

pub mod job;
pub mod result;
pub mod session;
pub mod state;

pub use job::{AlignJob, AlignRequest, CancelToken};
pub use result::SyncRunResult;
pub use session::{RunAnchors, SyncError, SyncSession};
pub use state::{SyncOperation, SyncState};
