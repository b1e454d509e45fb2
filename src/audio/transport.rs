// Transport clock - one running audio graph with a playback path and a
// capture path on a shared sample clock
//
// `TransportClock` owns the engine for one session. The device itself sits
// behind the `AudioBackend` trait: `CpalBackend` drives real hardware,
// `VirtualBackend` is pumped by hand (tests, headless runs). Both call back
// into `EngineShared`, which holds everything the real-time callbacks touch.
//
// # Callback rules
//
// The render and capture callbacks only use `try_lock`; if the control
// thread holds a lock they output silence (render) or count a dropped
// buffer (capture). They never log, never return errors and never allocate.
// Playback is pinned to the clock, so a silent buffer never delays the
// reference against its anchor. Control-thread queries about playback read
// `PlayerCursors` and never contend for the player lock.

use crate::audio::capture::{CaptureReport, CaptureSink};
use crate::audio::clock::{SampleAnchor, SampleClock, seconds_to_frames};
use crate::audio::format_conversion::{write_mono_to_interleaved_frame, write_silence};
use crate::audio::parameters::TrackGain;
use crate::audio::playback::{Player, PlayerCursors, Track, TrackCue, prepare_track};
use crate::audio::processing::ResampleError;
use crate::audio::wav::{WavError, read_pcm16};
use crate::messaging::channels::{
    NOTIFICATION_CAPACITY, NotificationConsumer, NotificationProducer,
    create_notification_channel, drain,
};
use crate::messaging::notification::{Notification, NotificationCategory};
use cpal::{FromSample, Sample};
use ringbuf::traits::Producer;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, TryLockError};
use std::time::{Duration, Instant};

/// Engine settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Sample rate to ask the output device for (None = device default)
    pub preferred_sample_rate: Option<u32>,
    /// Fixed device buffer size (None = device default)
    pub preferred_buffer_frames: Option<u32>,
    /// Frames per block appended to the recording file
    pub capture_block_frames: usize,
    /// How long to wait for the first rendered buffer
    pub render_wait_ms: u64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            preferred_sample_rate: Some(48000),
            preferred_buffer_frames: None,
            capture_block_frames: 1024,
            render_wait_ms: 500,
        }
    }
}

/// Negotiated stream format
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct StreamFormat {
    pub sample_rate: u32,
    pub channels: u16,
}

/// Whether the device accepted the requested configuration
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SetupStatus {
    Configured,
    /// Running, but some settings fell back to what the device allowed
    Degraded { warnings: Vec<String> },
}

/// What `ensure_running` ended up with
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EngineSetup {
    pub device_name: String,
    pub output: StreamFormat,
    pub input: StreamFormat,
    pub buffer_frames: Option<u32>,
    pub status: SetupStatus,
}

impl EngineSetup {
    pub fn is_degraded(&self) -> bool {
        matches!(self.status, SetupStatus::Degraded { .. })
    }

    pub fn warnings(&self) -> &[String] {
        match &self.status {
            SetupStatus::Configured => &[],
            SetupStatus::Degraded { warnings } => warnings,
        }
    }

    /// Build the status from collected fallback warnings
    pub fn status_from(warnings: Vec<String>) -> SetupStatus {
        if warnings.is_empty() {
            SetupStatus::Configured
        } else {
            SetupStatus::Degraded { warnings }
        }
    }
}

/// Engine errors - fatal to the current run
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error("No audio output device found")]
    NoOutputDevice,

    #[error("No audio input device found")]
    NoInputDevice,

    #[error("Audio configuration error: {0}")]
    Config(String),

    #[error("Unsupported sample format: {0}")]
    UnsupportedSampleFormat(String),

    #[error("Failed to build audio stream: {0}")]
    BuildStream(String),

    #[error("Failed to start audio stream: {0}")]
    StartStream(String),

    #[error("Audio engine is not running")]
    NotRunning,

    #[error("Audio engine rendered nothing within {0} ms")]
    ClockUnavailable(u64),

    #[error("A recording is already in progress")]
    AlreadyRecording,

    #[error("Playback file error: {0}")]
    PlaybackFile(#[source] WavError),

    #[error("Playback resample error: {0}")]
    Resample(#[from] ResampleError),

    #[error("Recording file error: {0}")]
    RecordingFile(#[source] WavError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// A device that can run the shared engine callbacks
pub trait AudioBackend {
    /// Open and start the streams; callbacks must go through `shared`
    fn start(
        &mut self,
        shared: &EngineShared,
        config: &EngineConfig,
    ) -> Result<EngineSetup, EngineError>;

    /// Close the streams; must be safe to call when not started
    fn stop(&mut self);
}

/// Everything the audio callbacks share with the control thread
#[derive(Clone)]
pub struct EngineShared {
    pub clock: SampleClock,
    player: Arc<Mutex<Player>>,
    cursors: Arc<PlayerCursors>,
    pub(crate) tap: Arc<Mutex<Option<CaptureSink>>>,
    recording: Arc<AtomicBool>,
    capture_errors: Arc<AtomicU64>,
    reference_gain: TrackGain,
    recording_gain: TrackGain,
    notifications: Arc<Mutex<NotificationProducer>>,
}

fn lock_or_recover<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

impl EngineShared {
    fn new(notifications: NotificationProducer) -> Self {
        Self {
            clock: SampleClock::new(0),
            player: Arc::new(Mutex::new(Player::new())),
            cursors: Arc::new(PlayerCursors::default()),
            tap: Arc::new(Mutex::new(None)),
            recording: Arc::new(AtomicBool::new(false)),
            capture_errors: Arc::new(AtomicU64::new(0)),
            reference_gain: TrackGain::default(),
            recording_gain: TrackGain::default(),
            notifications: Arc::new(Mutex::new(notifications)),
        }
    }

    /// Output callback body: render the player, then advance the clock
    pub fn render_output<T>(&self, data: &mut [T], channels: usize)
    where
        T: Sample + FromSample<f32>,
    {
        // ========== REAL-TIME ZONE ==========
        let channels = channels.max(1);
        let frames = data.len() / channels;

        if let Ok(player) = self.player.try_lock() {
            let start = self.clock.frames_rendered();
            let reference_gain = self.reference_gain.effective();
            let recording_gain = self.recording_gain.effective();
            for (i, frame) in data.chunks_mut(channels).enumerate() {
                let sample = player.sample_at(start + i as i64, reference_gain, recording_gain);
                write_mono_to_interleaved_frame(sample, frame);
            }
        } else {
            write_silence(data);
        }

        self.clock.advance(frames);
        // ========== REAL-TIME ZONE END ==========
    }

    /// Input callback body: hand the buffer to the tap if one is installed
    pub fn capture_input<T>(&self, data: &[T])
    where
        T: Sample,
        f32: FromSample<T>,
    {
        // ========== REAL-TIME ZONE ==========
        match self.tap.try_lock() {
            Ok(mut tap) => {
                if let Some(sink) = tap.as_mut() {
                    sink.push(data);
                }
            }
            Err(TryLockError::WouldBlock) => {
                if self.recording.load(Ordering::Acquire) {
                    CaptureSink::record_dropped_buffer(&self.capture_errors);
                }
            }
            Err(TryLockError::Poisoned(_)) => {
                CaptureSink::record_dropped_buffer(&self.capture_errors);
            }
        }
        // ========== REAL-TIME ZONE END ==========
    }

    /// Queue a notification without blocking (stream error callbacks)
    pub fn notify(&self, notification: Notification) {
        if let Ok(mut tx) = self.notifications.try_lock() {
            let _ = tx.try_push(notification);
        }
    }

    /// Engine sample position; prefers the player's presentation mapping
    pub fn current_sample_time(&self) -> Option<SampleAnchor> {
        if self.cursors.has_voices() {
            self.clock.presentation_time()
        } else {
            self.clock.mixer_time()
        }
    }

    pub fn capture_error_count(&self) -> u64 {
        self.capture_errors.load(Ordering::Relaxed)
    }

    /// Put frames on a track so `start_frame` plays at clock sample `start_at`
    fn load_track(
        &self,
        track: Track,
        frames: Arc<[f32]>,
        start_frame: usize,
        start_at: SampleAnchor,
    ) {
        let len = frames.len();
        let mut player = lock_or_recover(&self.player);
        player.load(track, frames, start_frame, start_at);
        self.cursors.set(track, start_at, start_frame, len);
    }

    fn clear_tracks(&self) {
        let mut player = lock_or_recover(&self.player);
        player.clear();
        self.cursors.clear();
    }

    fn playback_position(&self, track: Track) -> Option<usize> {
        let now = self.clock.frames_rendered();
        self.cursors.get(track).position_at(now)
    }

    fn is_playing(&self) -> bool {
        let now = self.clock.frames_rendered();
        [Track::Reference, Track::Recording]
            .into_iter()
            .any(|track| self.cursors.get(track).is_playing_at(now))
    }

    fn gain(&self, track: Track) -> &TrackGain {
        match track {
            Track::Reference => &self.reference_gain,
            Track::Recording => &self.recording_gain,
        }
    }
}

/// A recording that has just started
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordingStart {
    pub path: PathBuf,
    pub anchor: SampleAnchor,
    /// Wall-clock start in nanoseconds since the Unix epoch
    pub started_at_ns: i64,
    pub format: StreamFormat,
}

/// Owned audio engine for one session
pub struct TransportClock<B: AudioBackend> {
    backend: B,
    shared: EngineShared,
    config: EngineConfig,
    setup: Option<EngineSetup>,
    notification_rx: NotificationConsumer,
}

impl<B: AudioBackend> TransportClock<B> {
    pub fn new(backend: B, config: EngineConfig) -> Self {
        let (tx, rx) = create_notification_channel(NOTIFICATION_CAPACITY);
        Self {
            backend,
            shared: EngineShared::new(tx),
            config,
            setup: None,
            notification_rx: rx,
        }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    pub fn is_running(&self) -> bool {
        self.setup.is_some()
    }

    pub fn setup(&self) -> Option<&EngineSetup> {
        self.setup.as_ref()
    }

    pub fn sample_rate(&self) -> Option<u32> {
        self.setup.as_ref().map(|s| s.output.sample_rate)
    }

    /// Start the engine once; later calls return the existing setup
    pub fn ensure_running(&mut self) -> Result<EngineSetup, EngineError> {
        if let Some(setup) = &self.setup {
            return Ok(setup.clone());
        }

        self.shared.clock.reset();
        match self.backend.start(&self.shared, &self.config) {
            Ok(setup) => {
                log::info!(
                    "Audio engine started on '{}': out {} Hz/{} ch, in {} Hz/{} ch",
                    setup.device_name,
                    setup.output.sample_rate,
                    setup.output.channels,
                    setup.input.sample_rate,
                    setup.input.channels
                );
                for warning in setup.warnings() {
                    log::warn!("Audio configuration degraded: {}", warning);
                }
                self.setup = Some(setup.clone());
                Ok(setup)
            }
            Err(e) => {
                log::error!("Audio engine failed to start: {}", e);
                self.backend.stop();
                Err(e)
            }
        }
    }

    /// Engine sample position, absent until a buffer has been rendered
    pub fn current_sample_time(&self) -> Option<SampleAnchor> {
        if self.setup.is_none() {
            return None;
        }
        self.shared.current_sample_time()
    }

    /// Block until the output callback has rendered its first buffer
    pub fn wait_for_render(&self) -> Result<SampleAnchor, EngineError> {
        if self.setup.is_none() {
            return Err(EngineError::NotRunning);
        }

        let deadline = Instant::now() + Duration::from_millis(self.config.render_wait_ms);
        loop {
            if let Some(t) = self.shared.current_sample_time() {
                return Ok(t);
            }
            if Instant::now() >= deadline {
                return Err(EngineError::ClockUnavailable(self.config.render_wait_ms));
            }
            std::thread::sleep(Duration::from_millis(1));
        }
    }

    /// Play a file on the reference track from `seek_seconds`
    ///
    /// Returns `None` without touching the player when the seek position is
    /// at or past the end of the file.
    pub fn start_playback(
        &mut self,
        path: &Path,
        seek_seconds: f64,
    ) -> Result<Option<SampleAnchor>, EngineError> {
        self.schedule(&[TrackCue::new(Track::Reference, path).with_seek(seek_seconds)])
    }

    /// Start several tracks on one anchor
    pub fn schedule(&mut self, cues: &[TrackCue]) -> Result<Option<SampleAnchor>, EngineError> {
        let rate = self.sample_rate().ok_or(EngineError::NotRunning)?;

        let mut prepared = Vec::with_capacity(cues.len());
        for cue in cues {
            let buffer = read_pcm16(&cue.path).map_err(EngineError::PlaybackFile)?;
            let frames = prepare_track(&buffer, rate)?;
            let start = seconds_to_frames(cue.seek_seconds, rate);
            if start >= frames.len() {
                log::info!(
                    "Seek {:.3}s is past the end of {}; nothing to play",
                    cue.seek_seconds,
                    cue.path.display()
                );
                continue;
            }
            prepared.push((cue.track, frames, start));
        }

        if prepared.is_empty() {
            return Ok(None);
        }

        self.wait_for_render()?;

        // Every track starts with the next rendered buffer and is heard one
        // output latency later
        let start_at = self.shared.clock.frames_rendered();
        for (track, frames, start) in prepared {
            self.shared.load_track(track, frames, start, start_at);
        }

        let anchor = start_at + self.shared.clock.output_latency_frames();
        log::debug!("Playback scheduled at sample {}", anchor);
        Ok(Some(anchor))
    }

    /// Open a new take in `directory` and install the capture tap
    pub fn start_recording(&mut self, directory: &Path) -> Result<RecordingStart, EngineError> {
        let format = self
            .setup
            .as_ref()
            .map(|s| s.input)
            .ok_or(EngineError::NotRunning)?;

        if lock_or_recover(&self.shared.tap).is_some() {
            return Err(EngineError::AlreadyRecording);
        }

        std::fs::create_dir_all(directory)?;
        let path = directory.join(take_file_name(chrono::Utc::now()));

        self.shared.capture_errors.store(0, Ordering::Relaxed);
        let sink = CaptureSink::create(
            &path,
            format.sample_rate,
            format.channels,
            self.config.capture_block_frames,
            Arc::clone(&self.shared.capture_errors),
        )
        .map_err(EngineError::RecordingFile)?;

        self.wait_for_render()?;

        let mut tap = lock_or_recover(&self.shared.tap);
        *tap = Some(sink);
        self.shared.recording.store(true, Ordering::Release);
        drop(tap);

        let anchor = self
            .shared
            .current_sample_time()
            .ok_or(EngineError::ClockUnavailable(self.config.render_wait_ms))?;
        let started_at_ns = wall_clock_ns(chrono::Utc::now());

        log::info!("Recording to {} from sample {}", path.display(), anchor);
        Ok(RecordingStart {
            path,
            anchor,
            started_at_ns,
            format,
        })
    }

    /// Remove the capture tap and finalize the file; `None` if not recording
    pub fn stop_recording(&mut self) -> Result<Option<CaptureReport>, EngineError> {
        let sink = {
            let mut tap = lock_or_recover(&self.shared.tap);
            self.shared.recording.store(false, Ordering::Release);
            tap.take()
        };

        match sink {
            Some(sink) => {
                let report = sink.finish().map_err(EngineError::RecordingFile)?;
                if report.write_errors > 0 {
                    log::warn!(
                        "{} capture buffer(s) failed to write to {}",
                        report.write_errors,
                        report.path.display()
                    );
                }
                Ok(Some(report))
            }
            None => Ok(None),
        }
    }

    /// Stop the streams, finalize any recording and clear the player
    ///
    /// The engine is stopped even when finalizing the recording fails.
    pub fn stop_all(&mut self) -> Result<Option<CaptureReport>, EngineError> {
        self.backend.stop();
        let was_running = self.setup.take().is_some();

        self.shared.clear_tracks();
        let report = self.stop_recording();

        if was_running {
            log::info!("Audio engine stopped");
        }
        report
    }

    /// Stop whatever the player is doing, keeping the engine running
    pub fn stop_playback(&mut self) {
        self.shared.clear_tracks();
    }

    pub fn is_playing(&self) -> bool {
        self.shared.is_playing()
    }

    pub fn is_recording(&self) -> bool {
        self.shared.recording.load(Ordering::Acquire)
    }

    pub fn playback_position(&self, track: Track) -> Option<usize> {
        self.shared.playback_position(track)
    }

    pub fn set_track_level(&self, track: Track, level: f32) {
        self.shared.gain(track).set_level(level);
    }

    pub fn set_track_muted(&self, track: Track, muted: bool) {
        self.shared.gain(track).set_muted(muted);
    }

    pub fn is_track_muted(&self, track: Track) -> bool {
        self.shared.gain(track).is_muted()
    }

    /// Capture buffers lost since the current recording started
    pub fn capture_error_count(&self) -> u64 {
        self.shared.capture_error_count()
    }

    /// Notifications raised by the stream error callbacks since the last call
    pub fn drain_notifications(&mut self) -> Vec<Notification> {
        drain(&mut self.notification_rx)
    }

    #[cfg(test)]
    pub(crate) fn shared(&self) -> &EngineShared {
        &self.shared
    }

    /// Raise a notification from the control thread
    pub fn notify(&self, category: NotificationCategory, message: String) {
        self.shared.notify(Notification::warning(category, message));
    }
}

impl<B: AudioBackend> Drop for TransportClock<B> {
    fn drop(&mut self) {
        if let Err(e) = self.stop_all() {
            log::error!("Error while tearing down audio engine: {}", e);
        }
    }
}

/// Nanoseconds since the Unix epoch, or 0 outside the representable range
fn wall_clock_ns(now: chrono::DateTime<chrono::Utc>) -> i64 {
    match now.timestamp_nanos_opt() {
        Some(ns) => ns,
        None => {
            log::warn!(
                "System clock {} is out of range; recording start time set to 0",
                now
            );
            0
        }
    }
}

/// File name for a take started at `now`
pub fn take_file_name(now: chrono::DateTime<chrono::Utc>) -> String {
    format!("take_{}.wav", now.format("%Y%m%d_%H%M%S_%3f"))
}
