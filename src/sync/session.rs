// Sync session - sequences one take: arm, run, stop, align, review
//
// The session owns its `TransportClock`; nothing here is process-wide. All
// methods are called from one control thread. Only the alignment runs
// elsewhere (see `job`).
//
// State flow:
//
//   idle --arm--> armed --start_run--> running --stop_run--> stopped
//     ^                                                         |
//     +------------- take_result / cancel_alignment / reset ----+
//
// Tearing down audio and aligning the take are separate failure domains:
// `stop_run` always leaves the engine stopped before the worker starts.

use crate::audio::clock::{SampleAnchor, frames_to_ms};
use crate::audio::mixer::{AlignedMix, MixError, MixSettings};
use crate::audio::playback::{Track, TrackCue};
use crate::audio::processing::TakeConditioning;
use crate::audio::transport::{AudioBackend, EngineError, RecordingStart, TransportClock};
use crate::audio::wav::{WavError, read_pcm16};
use crate::config::Settings;
use crate::sync::job::{AlignJob, AlignRequest, JobFailure};
use crate::sync::result::SyncRunResult;
use crate::sync::state::{SyncOperation, SyncState};
use std::path::{Path, PathBuf};

#[derive(Debug, thiserror::Error)]
pub enum SyncError {
    #[error("cannot {} while {}: {}", .operation, .state, .operation.hint())]
    InvalidState {
        operation: SyncOperation,
        state: SyncState,
    },

    #[error("Reference file error: {0}")]
    Reference(#[source] WavError),

    #[error("Reference file has no audio")]
    EmptyReference,

    #[error("Session was armed with {} but the run asked for {}", .armed.display(), .requested.display())]
    ReferenceMismatch { armed: PathBuf, requested: PathBuf },

    #[error("Recording failed to start: {0}")]
    Engine(#[from] EngineError),

    #[error("No recording was captured")]
    MissingRecording,

    #[error("Alignment failed: {0}")]
    Alignment(#[from] MixError),

    #[error("Alignment worker failed: {0}")]
    Worker(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Sample anchors captured when a run starts
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RunAnchors {
    pub playback_start_sample: SampleAnchor,
    pub record_start_sample: SampleAnchor,
}

impl RunAnchors {
    /// How many engine samples after playback the capture began
    pub fn offset_samples(&self) -> i64 {
        self.record_start_sample - self.playback_start_sample
    }
}

struct ActiveRun {
    reference: PathBuf,
    anchors: RunAnchors,
    recording: RecordingStart,
    sample_rate: u32,
}

struct PendingAlignment {
    job: AlignJob,
    reference: PathBuf,
    raw_recording_path: PathBuf,
    rec_start_ns: i64,
    offset_samples: i64,
    sample_rate: u32,
    capture_write_errors: u64,
}

struct Review {
    reference: PathBuf,
    result: SyncRunResult,
}

/// One orchestrated take against one reference
pub struct SyncSession<B: AudioBackend> {
    transport: TransportClock<B>,
    state: SyncState,
    recordings_dir: PathBuf,
    mix: MixSettings,
    conditioning: TakeConditioning,
    armed_reference: Option<PathBuf>,
    run: Option<ActiveRun>,
    pending: Option<PendingAlignment>,
    review: Option<Review>,
    logs: Vec<String>,
}

impl<B: AudioBackend> SyncSession<B> {
    pub fn new(transport: TransportClock<B>, settings: &Settings) -> Self {
        Self {
            transport,
            state: SyncState::Idle,
            recordings_dir: settings.recordings_dir.clone(),
            mix: settings.mix,
            conditioning: settings.conditioning,
            armed_reference: None,
            run: None,
            pending: None,
            review: None,
            logs: Vec::new(),
        }
    }

    /// Build the transport from `settings.engine` as well
    pub fn with_backend(backend: B, settings: &Settings) -> Self {
        Self::new(TransportClock::new(backend, settings.engine.clone()), settings)
    }

    pub fn state(&self) -> SyncState {
        self.state
    }

    pub fn transport(&self) -> &TransportClock<B> {
        &self.transport
    }

    /// Result of the last alignment, while it is under review
    pub fn result(&self) -> Option<&SyncRunResult> {
        self.review.as_ref().map(|r| &r.result)
    }

    pub fn is_alignment_pending(&self) -> bool {
        self.pending.is_some()
    }

    /// Anchors of the run in progress
    pub fn anchors(&self) -> Option<RunAnchors> {
        self.run.as_ref().map(|r| r.anchors)
    }

    /// Log lines collected for the current run
    pub fn logs(&self) -> &[String] {
        &self.logs
    }

    fn require(&self, operation: SyncOperation, expected: SyncState) -> Result<(), SyncError> {
        if self.state == expected {
            Ok(())
        } else {
            Err(SyncError::InvalidState {
                operation,
                state: self.state,
            })
        }
    }

    fn log(&mut self, line: String) {
        log::info!("{}", line);
        self.logs.push(line);
    }

    fn collect_notifications(&mut self) {
        for notification in self.transport.drain_notifications() {
            log::warn!("{}", notification);
            self.logs.push(notification.to_string());
        }
    }

    /// Stop the engine; failures only end up in the logs
    fn teardown(&mut self) {
        if let Err(e) = self.transport.stop_all() {
            self.log(format!("audio teardown: {}", e));
        }
        self.collect_notifications();
    }

    /// idle -> armed: check that the reference decodes
    pub fn arm(&mut self, reference: &Path) -> Result<(), SyncError> {
        self.require(SyncOperation::Arm, SyncState::Idle)?;

        let buffer = read_pcm16(reference).map_err(SyncError::Reference)?;
        if buffer.is_empty() {
            return Err(SyncError::EmptyReference);
        }

        self.logs.clear();
        self.log(format!(
            "armed {} ({:.2}s, {} Hz, {} ch)",
            reference.display(),
            buffer.duration_seconds(),
            buffer.sample_rate,
            buffer.channels
        ));
        self.armed_reference = Some(reference.to_path_buf());
        self.state = SyncState::Armed;
        Ok(())
    }

    /// armed -> running: start reference playback and capture together
    ///
    /// Any engine failure stops the transport and returns the session to idle.
    pub fn start_run(&mut self, reference: &Path) -> Result<RunAnchors, SyncError> {
        self.require(SyncOperation::StartRun, SyncState::Armed)?;

        let armed = self.armed_reference.clone().unwrap_or_default();
        if armed != reference {
            return Err(SyncError::ReferenceMismatch {
                armed,
                requested: reference.to_path_buf(),
            });
        }

        match self.start_audio(reference) {
            Ok(run) => {
                let anchors = run.anchors;
                self.log(format!(
                    "run started: playback at sample {}, capture at sample {} -> {}",
                    anchors.playback_start_sample,
                    anchors.record_start_sample,
                    run.recording.path.display()
                ));
                self.run = Some(run);
                self.state = SyncState::Running;
                Ok(anchors)
            }
            Err(e) => {
                self.log(format!("run failed to start: {}", e));
                self.teardown();
                self.armed_reference = None;
                self.state = SyncState::Idle;
                Err(e)
            }
        }
    }

    fn start_audio(&mut self, reference: &Path) -> Result<ActiveRun, SyncError> {
        let setup = self.transport.ensure_running()?;
        for warning in setup.warnings() {
            self.logs.push(format!("audio configuration degraded: {}", warning));
        }

        let playback_start_sample = self
            .transport
            .start_playback(reference, 0.0)?
            .ok_or(SyncError::EmptyReference)?;
        let recording = self.transport.start_recording(&self.recordings_dir)?;

        Ok(ActiveRun {
            reference: reference.to_path_buf(),
            anchors: RunAnchors {
                playback_start_sample,
                record_start_sample: recording.anchor,
            },
            recording,
            sample_rate: setup.output.sample_rate,
        })
    }

    /// running -> stopped: tear down audio and start aligning in the background
    pub fn stop_run(&mut self) -> Result<(), SyncError> {
        self.require(SyncOperation::StopRun, SyncState::Running)?;
        let Some(run) = self.run.take() else {
            self.state = SyncState::Idle;
            return Err(SyncError::MissingRecording);
        };

        let stopped = self.transport.stop_all();
        self.collect_notifications();

        let report = match stopped {
            Ok(Some(report)) => report,
            Ok(None) => {
                self.state = SyncState::Idle;
                return Err(SyncError::MissingRecording);
            }
            Err(e) => {
                self.log(format!("recording could not be finalized: {}", e));
                self.state = SyncState::Idle;
                return Err(e.into());
            }
        };

        let offset_samples = run.anchors.offset_samples();
        self.log(format!(
            "captured {} frames @ {} Hz, {} write error(s)",
            report.frames_written, report.sample_rate, report.write_errors
        ));
        self.log(format!(
            "offset {} samples ({:.2} ms)",
            offset_samples,
            frames_to_ms(offset_samples, run.sample_rate)
        ));

        let request = AlignRequest {
            reference_path: run.reference.clone(),
            recording_path: report.path.clone(),
            offset_samples,
            sample_rate: run.sample_rate,
            mix: self.mix,
            conditioning: self.conditioning,
        };
        let job = match AlignJob::spawn(request) {
            Ok(job) => job,
            Err(e) => {
                self.state = SyncState::Idle;
                return Err(e.into());
            }
        };

        self.pending = Some(PendingAlignment {
            job,
            reference: run.reference,
            raw_recording_path: report.path,
            rec_start_ns: run.recording.started_at_ns,
            offset_samples,
            sample_rate: run.sample_rate,
            capture_write_errors: report.write_errors,
        });
        self.state = SyncState::Stopped;
        Ok(())
    }

    /// Wait for the alignment started by `stop_run`
    ///
    /// A failed or cancelled alignment returns the session to idle.
    pub fn await_alignment(&mut self) -> Result<SyncRunResult, SyncError> {
        self.require(SyncOperation::AwaitAlignment, SyncState::Stopped)?;

        if let Some(review) = &self.review {
            return Ok(review.result.clone());
        }
        let Some(pending) = self.pending.take() else {
            return Err(SyncError::InvalidState {
                operation: SyncOperation::AwaitAlignment,
                state: self.state,
            });
        };

        let PendingAlignment {
            job,
            reference,
            raw_recording_path,
            rec_start_ns,
            offset_samples,
            sample_rate,
            capture_write_errors,
        } = pending;

        let mix: AlignedMix = match job.join() {
            Ok(mix) => mix,
            Err(failure) => {
                self.state = SyncState::Idle;
                return Err(match failure {
                    JobFailure::Mix(e) => {
                        self.log(format!("alignment failed: {}", e));
                        SyncError::Alignment(e)
                    }
                    JobFailure::Panicked(msg) => {
                        self.log(format!("alignment worker panicked: {}", msg));
                        SyncError::Worker(msg)
                    }
                });
            }
        };

        self.log(format!(
            "aligned take written to {} ({} frames), mix to {}",
            mix.aligned_path.display(),
            mix.aligned_frames,
            mix.mix_path.display()
        ));

        let result = SyncRunResult {
            rec_start_ns,
            raw_recording_path,
            aligned_recording_path: mix.aligned_path,
            mix_path: mix.mix_path,
            offset_samples,
            offset_ms: frames_to_ms(offset_samples, sample_rate),
            sample_rate,
            capture_write_errors,
            logs: self.logs.clone(),
        };
        self.review = Some(Review {
            reference,
            result: result.clone(),
        });
        Ok(result)
    }

    /// `stop_run` then `await_alignment`
    pub fn stop_run_and_align(&mut self) -> Result<SyncRunResult, SyncError> {
        self.stop_run()?;
        self.await_alignment()
    }

    /// Drop a pending alignment; returns true if one was running
    pub fn cancel_alignment(&mut self) -> bool {
        let Some(pending) = self.pending.take() else {
            return false;
        };
        pending.job.cancel();
        self.log("alignment cancelled".to_string());
        self.state = SyncState::Idle;
        true
    }

    /// Replay the reference with the aligned take on the recording track
    pub fn play_aligned(&mut self) -> Result<Option<SampleAnchor>, SyncError> {
        self.require(SyncOperation::PlayAligned, SyncState::Stopped)?;
        let Some(review) = &self.review else {
            return Err(SyncError::InvalidState {
                operation: SyncOperation::PlayAligned,
                state: self.state,
            });
        };

        let cues = [
            TrackCue::new(Track::Reference, review.reference.clone()),
            TrackCue::new(Track::Recording, review.result.aligned_recording_path.clone()),
        ];

        let started = self
            .transport
            .ensure_running()
            .and_then(|_| self.transport.schedule(&cues));
        match started {
            Ok(anchor) => Ok(anchor),
            Err(e) => {
                self.log(format!("review playback failed: {}", e));
                self.teardown();
                self.review = None;
                self.state = SyncState::Idle;
                Err(e.into())
            }
        }
    }

    /// Stop review playback, keeping the result
    pub fn stop_playback(&mut self) {
        self.teardown();
    }

    /// stopped -> idle, handing over the result
    pub fn take_result(&mut self) -> Result<SyncRunResult, SyncError> {
        self.require(SyncOperation::TakeResult, SyncState::Stopped)?;
        let Some(review) = self.review.take() else {
            return Err(SyncError::InvalidState {
                operation: SyncOperation::TakeResult,
                state: self.state,
            });
        };

        self.teardown();
        self.armed_reference = None;
        self.state = SyncState::Idle;
        Ok(review.result)
    }

    /// Back to idle from anywhere, stopping audio and cancelling work
    pub fn reset(&mut self) {
        if let Some(pending) = self.pending.take() {
            pending.job.cancel();
        }
        self.teardown();
        self.run = None;
        self.review = None;
        self.armed_reference = None;
        self.state = SyncState::Idle;
        log::debug!("sync session reset");
    }

    pub fn set_mute_ref(&self, muted: bool) {
        self.transport.set_track_muted(Track::Reference, muted);
    }

    pub fn set_mute_rec(&self, muted: bool) {
        self.transport.set_track_muted(Track::Recording, muted);
    }
}

impl<B: AudioBackend> Drop for SyncSession<B> {
    fn drop(&mut self) {
        if let Some(pending) = self.pending.take() {
            pending.job.cancel();
        }
    }
}
