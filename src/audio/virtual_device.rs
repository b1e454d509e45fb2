// Virtual device - an audio backend driven by hand
//
// Stands in for the sound card when there is none (tests, CI, offline
// tools). Nothing runs on its own: `VirtualDevice::process` performs one
// duplex cycle, rendering an output buffer and then feeding an input buffer
// to the capture tap, exactly as the CPAL callbacks would.

use crate::audio::transport::{
    AudioBackend, EngineConfig, EngineError, EngineSetup, EngineShared, StreamFormat,
};
use std::sync::{Arc, Mutex, MutexGuard};

#[derive(Default)]
struct DeviceState {
    shared: Option<EngineShared>,
    output_channels: u16,
    buffer_frames: usize,
    /// First channel of everything rendered since the last `take_output`
    rendered: Vec<f32>,
    scratch: Vec<f32>,
}

/// Handle to a started virtual backend, cloneable across threads
#[derive(Clone, Default)]
pub struct VirtualDevice {
    state: Arc<Mutex<DeviceState>>,
}

impl VirtualDevice {
    fn state(&self) -> MutexGuard<'_, DeviceState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// True between backend start and stop
    pub fn is_open(&self) -> bool {
        self.state().shared.is_some()
    }

    /// Render `frames` output frames; returns false when the device is closed
    pub fn render(&self, frames: usize) -> bool {
        let mut state = self.state();
        let Some(shared) = state.shared.clone() else {
            return false;
        };

        let channels = state.output_channels.max(1) as usize;
        let mut scratch = std::mem::take(&mut state.scratch);
        scratch.clear();
        scratch.resize(frames * channels, 0.0);

        shared.render_output(&mut scratch, channels);
        state
            .rendered
            .extend(scratch.chunks(channels).map(|frame| frame[0]));
        state.scratch = scratch;
        true
    }

    /// One duplex cycle: render as many frames as `input` holds, then capture it
    pub fn process(&self, input: &[f32], input_channels: u16) -> bool {
        let frames = input.len() / input_channels.max(1) as usize;
        if !self.render(frames) {
            return false;
        }
        let shared = self.state().shared.clone();
        match shared {
            Some(shared) => {
                shared.capture_input(input);
                true
            }
            None => false,
        }
    }

    /// Render whole device buffers until at least `frames` have been produced
    pub fn run_for(&self, frames: usize) -> bool {
        let block = self.state().buffer_frames.max(1);
        let mut done = 0;
        while done < frames {
            if !self.render(block) {
                return false;
            }
            done += block;
        }
        true
    }

    /// Mono output rendered since the last call
    pub fn take_output(&self) -> Vec<f32> {
        std::mem::take(&mut self.state().rendered)
    }
}

/// `AudioBackend` with a fixed format and no hardware
pub struct VirtualBackend {
    output: StreamFormat,
    input: StreamFormat,
    buffer_frames: usize,
    warnings: Vec<String>,
    failure: Option<String>,
    device: VirtualDevice,
}

impl VirtualBackend {
    pub fn new(sample_rate: u32) -> Self {
        Self {
            output: StreamFormat {
                sample_rate,
                channels: 2,
            },
            input: StreamFormat {
                sample_rate,
                channels: 1,
            },
            buffer_frames: 256,
            warnings: Vec::new(),
            failure: None,
            device: VirtualDevice::default(),
        }
    }

    pub fn with_input(mut self, sample_rate: u32, channels: u16) -> Self {
        self.input = StreamFormat {
            sample_rate,
            channels,
        };
        self
    }

    pub fn with_output_channels(mut self, channels: u16) -> Self {
        self.output.channels = channels;
        self
    }

    pub fn with_buffer_frames(mut self, frames: usize) -> Self {
        self.buffer_frames = frames.max(1);
        self
    }

    /// Report a degraded setup with this warning
    pub fn with_warning(mut self, warning: impl Into<String>) -> Self {
        self.warnings.push(warning.into());
        self
    }

    /// Make `start` fail
    pub fn failing(mut self, reason: impl Into<String>) -> Self {
        self.failure = Some(reason.into());
        self
    }

    pub fn device(&self) -> VirtualDevice {
        self.device.clone()
    }
}

impl AudioBackend for VirtualBackend {
    fn start(
        &mut self,
        shared: &EngineShared,
        _config: &EngineConfig,
    ) -> Result<EngineSetup, EngineError> {
        if let Some(reason) = &self.failure {
            return Err(EngineError::StartStream(reason.clone()));
        }

        shared.clock.set_sample_rate(self.output.sample_rate);
        {
            let mut state = self.device.state();
            state.shared = Some(shared.clone());
            state.output_channels = self.output.channels;
            state.buffer_frames = self.buffer_frames;
            state.rendered.clear();
        }

        // A real device calls back right after starting; do the same once so
        // the clock is readable
        self.device.render(self.buffer_frames);

        Ok(EngineSetup {
            device_name: "virtual".to_string(),
            output: self.output,
            input: self.input,
            buffer_frames: Some(self.buffer_frames as u32),
            status: EngineSetup::status_from(self.warnings.clone()),
        })
    }

    fn stop(&mut self) {
        self.device.state().shared = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::transport::TransportClock;

    #[test]
    fn test_start_primes_the_clock() {
        let backend = VirtualBackend::new(48000).with_buffer_frames(128);
        let mut transport = TransportClock::new(backend, EngineConfig::default());

        assert_eq!(transport.current_sample_time(), None);
        let setup = transport.ensure_running().unwrap();
        assert!(!setup.is_degraded());
        assert_eq!(transport.current_sample_time(), Some(128));
    }

    #[test]
    fn test_render_after_stop_is_refused() {
        let backend = VirtualBackend::new(48000);
        let device = backend.device();
        let mut transport = TransportClock::new(backend, EngineConfig::default());
        transport.ensure_running().unwrap();
        assert!(device.render(64));

        transport.stop_all().unwrap();
        assert!(!device.is_open());
        assert!(!device.render(64));
    }

    #[test]
    fn test_failing_backend_reports_start_error() {
        let backend = VirtualBackend::new(48000).failing("device busy");
        let mut transport = TransportClock::new(backend, EngineConfig::default());
        let err = transport.ensure_running().unwrap_err();
        assert!(matches!(err, EngineError::StartStream(_)));
        assert!(!transport.is_running());
    }

    #[test]
    fn test_warnings_make_setup_degraded() {
        let backend = VirtualBackend::new(44100).with_warning("fixed buffer refused");
        let mut transport = TransportClock::new(backend, EngineConfig::default());
        let setup = transport.ensure_running().unwrap();
        assert!(setup.is_degraded());
        assert_eq!(setup.warnings(), ["fixed buffer refused".to_string()]);
    }
}
