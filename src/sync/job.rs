// Background alignment - the mix runs on its own thread
//
// Stopping a run hands the two files and the measured offset to a worker;
// the session joins it later or cancels it. Cancelling only flips a flag:
// the mixer checks it between chunks and gives up with `MixError::Cancelled`.

use crate::audio::mixer::{AlignedMix, MixError, MixSettings, align_to_reference};
use crate::audio::processing::TakeConditioning;
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::JoinHandle;

/// Shared cancellation flag for one piece of background work
#[derive(Debug, Clone, Default)]
pub struct CancelToken {
    cancelled: Arc<AtomicBool>,
}

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::Relaxed);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::Relaxed)
    }

    /// The raw flag, as the mixer expects it
    pub fn flag(&self) -> &AtomicBool {
        &self.cancelled
    }
}

/// Everything the worker needs to align one take
#[derive(Debug, Clone)]
pub struct AlignRequest {
    pub reference_path: PathBuf,
    pub recording_path: PathBuf,
    pub offset_samples: i64,
    pub sample_rate: u32,
    pub mix: MixSettings,
    pub conditioning: TakeConditioning,
}

impl AlignRequest {
    fn run(&self, cancel: &CancelToken) -> Result<AlignedMix, MixError> {
        align_to_reference(
            &self.reference_path,
            &self.recording_path,
            self.offset_samples,
            self.sample_rate,
            &self.mix,
            &self.conditioning,
            cancel.flag(),
        )
    }
}

/// Why a job produced no mix
#[derive(Debug)]
pub enum JobFailure {
    Mix(MixError),
    /// The worker thread panicked
    Panicked(String),
}

/// A running alignment
pub struct AlignJob {
    handle: Option<JoinHandle<Result<AlignedMix, MixError>>>,
    cancel: CancelToken,
}

impl AlignJob {
    /// Start aligning on a named worker thread
    pub fn spawn(request: AlignRequest) -> std::io::Result<Self> {
        let cancel = CancelToken::new();
        let worker_cancel = cancel.clone();

        let handle = std::thread::Builder::new()
            .name("align-mix".to_string())
            .spawn(move || request.run(&worker_cancel))?;

        Ok(Self {
            handle: Some(handle),
            cancel,
        })
    }

    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    pub fn is_finished(&self) -> bool {
        self.handle.as_ref().is_none_or(|h| h.is_finished())
    }

    /// Wait for the worker and return its result
    pub fn join(mut self) -> Result<AlignedMix, JobFailure> {
        let Some(handle) = self.handle.take() else {
            return Err(JobFailure::Panicked("alignment already joined".to_string()));
        };

        match handle.join() {
            Ok(result) => result.map_err(JobFailure::Mix),
            Err(payload) => {
                let message = payload
                    .downcast_ref::<&str>()
                    .map(|s| s.to_string())
                    .or_else(|| payload.downcast_ref::<String>().cloned())
                    .unwrap_or_else(|| "unknown panic".to_string());
                Err(JobFailure::Panicked(message))
            }
        }
    }
}

impl Drop for AlignJob {
    fn drop(&mut self) {
        // An abandoned job should not keep mixing in the background
        if self.handle.is_some() {
            self.cancel.cancel();
        }
    }
}
