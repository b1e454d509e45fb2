// Audio engine - CPAL duplex backend
//
// # Format Support
//
// Output and input streams are built for whatever sample format the device
// prefers:
// - **F32**: Floating point 32-bit
// - **I16**: Signed 16-bit integer (common on Windows/WASAPI)
// - **U16**: Unsigned 16-bit integer
//
// Everything inside the engine is f32; conversion to and from the device
// format happens in the callbacks through CPAL's `FromSample` conversions.
//
// # Clocking
//
// The output stream is the master clock. Each output callback advances the
// shared `SampleClock` and refreshes the output latency from the callback
// and playback timestamps. The input stream only feeds the capture tap.
//
// # Stream Limitations
//
// On macOS (CoreAudio) `Stream` is not Send, so a `CpalBackend` must stay on
// the thread that created it. Stream errors are reported through the
// notification queue; there is no automatic reconnection.

use crate::audio::transport::{
    AudioBackend, EngineConfig, EngineError, EngineSetup, EngineShared, StreamFormat,
};
use crate::messaging::notification::{Notification, NotificationCategory};
use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{
    BufferSize, Device, FromSample, SampleFormat, SampleRate, SizedSample, Stream,
    StreamConfig, SupportedStreamConfig, SupportedStreamConfigRange,
};

/// Real hardware through the default CPAL host
#[derive(Default)]
pub struct CpalBackend {
    output_stream: Option<Stream>,
    input_stream: Option<Stream>,
}

impl CpalBackend {
    pub fn new() -> Self {
        Self::default()
    }
}

impl AudioBackend for CpalBackend {
    fn start(
        &mut self,
        shared: &EngineShared,
        config: &EngineConfig,
    ) -> Result<EngineSetup, EngineError> {
        let host = cpal::default_host();

        let output_device = host
            .default_output_device()
            .ok_or(EngineError::NoOutputDevice)?;
        let input_device = host
            .default_input_device()
            .ok_or(EngineError::NoInputDevice)?;

        let device_name = output_device
            .name()
            .unwrap_or_else(|_| "Unknown".to_string());
        log::info!("Audio device: {}", device_name);

        let mut warnings = Vec::new();

        // Output format: preferred rate if the device has it, default otherwise
        let default_output = output_device
            .default_output_config()
            .map_err(|e| EngineError::Config(e.to_string()))?;
        let output_config = match config.preferred_sample_rate {
            Some(rate) if rate != default_output.sample_rate().0 => {
                let ranges = output_device
                    .supported_output_configs()
                    .map(|r| r.collect::<Vec<_>>())
                    .unwrap_or_default();
                match config_with_rate(&default_output, ranges, rate) {
                    Some(c) => c,
                    None => {
                        warnings.push(format!(
                            "output device does not support {} Hz, using {} Hz",
                            rate,
                            default_output.sample_rate().0
                        ));
                        default_output
                    }
                }
            }
            _ => default_output,
        };
        let engine_rate = output_config.sample_rate().0;

        // Input format: follow the output rate when the device allows it
        let default_input = input_device
            .default_input_config()
            .map_err(|e| EngineError::Config(e.to_string()))?;
        let input_config = if default_input.sample_rate().0 == engine_rate {
            default_input
        } else {
            let ranges = input_device
                .supported_input_configs()
                .map(|r| r.collect::<Vec<_>>())
                .unwrap_or_default();
            match config_with_rate(&default_input, ranges, engine_rate) {
                Some(c) => c,
                None => {
                    warnings.push(format!(
                        "input runs at {} Hz while output runs at {} Hz",
                        default_input.sample_rate().0,
                        engine_rate
                    ));
                    default_input
                }
            }
        };

        shared.clock.set_sample_rate(engine_rate);

        let output_format = output_config.sample_format();
        let mut output_stream_config: StreamConfig = output_config.config();
        if let Some(frames) = config.preferred_buffer_frames {
            output_stream_config.buffer_size = BufferSize::Fixed(frames);
        }

        let output_stream = match build_output(
            &output_device,
            output_format,
            &output_stream_config,
            shared,
        ) {
            Ok(stream) => stream,
            Err(e) if config.preferred_buffer_frames.is_some() => {
                warnings.push(format!(
                    "fixed buffer of {} frames refused ({}), using device default",
                    config.preferred_buffer_frames.unwrap_or_default(),
                    e
                ));
                output_stream_config.buffer_size = BufferSize::Default;
                build_output(&output_device, output_format, &output_stream_config, shared)?
            }
            Err(e) => return Err(e),
        };

        let input_stream_config: StreamConfig = input_config.config();
        let input_stream = build_input(
            &input_device,
            input_config.sample_format(),
            &input_stream_config,
            shared,
        )?;

        output_stream
            .play()
            .map_err(|e| EngineError::StartStream(e.to_string()))?;
        input_stream
            .play()
            .map_err(|e| EngineError::StartStream(e.to_string()))?;

        let buffer_frames = match output_stream_config.buffer_size {
            BufferSize::Fixed(frames) => Some(frames),
            BufferSize::Default => None,
        };

        self.output_stream = Some(output_stream);
        self.input_stream = Some(input_stream);

        Ok(EngineSetup {
            device_name,
            output: StreamFormat {
                sample_rate: engine_rate,
                channels: output_stream_config.channels,
            },
            input: StreamFormat {
                sample_rate: input_stream_config.sample_rate.0,
                channels: input_stream_config.channels,
            },
            buffer_frames,
            status: EngineSetup::status_from(warnings),
        })
    }

    fn stop(&mut self) {
        // Input first so the tap sees no more buffers once output stops
        for stream in [self.input_stream.take(), self.output_stream.take()]
            .into_iter()
            .flatten()
        {
            if let Err(e) = stream.pause() {
                log::debug!("Pausing stream failed: {}", e);
            }
        }
    }
}

/// Same channel count and sample format as `default`, at `rate`
fn config_with_rate(
    default: &SupportedStreamConfig,
    ranges: Vec<SupportedStreamConfigRange>,
    rate: u32,
) -> Option<SupportedStreamConfig> {
    ranges
        .into_iter()
        .find(|range| {
            range.channels() == default.channels()
                && range.sample_format() == default.sample_format()
                && range.min_sample_rate().0 <= rate
                && rate <= range.max_sample_rate().0
        })
        .map(|range| range.with_sample_rate(SampleRate(rate)))
}

fn build_output(
    device: &Device,
    format: SampleFormat,
    config: &StreamConfig,
    shared: &EngineShared,
) -> Result<Stream, EngineError> {
    match format {
        SampleFormat::F32 => build_output_stream::<f32>(device, config, shared.clone()),
        SampleFormat::I16 => build_output_stream::<i16>(device, config, shared.clone()),
        SampleFormat::U16 => build_output_stream::<u16>(device, config, shared.clone()),
        other => Err(EngineError::UnsupportedSampleFormat(format!(
            "{:?}. Supported formats: F32, I16, U16",
            other
        ))),
    }
}

fn build_input(
    device: &Device,
    format: SampleFormat,
    config: &StreamConfig,
    shared: &EngineShared,
) -> Result<Stream, EngineError> {
    match format {
        SampleFormat::F32 => build_input_stream::<f32>(device, config, shared.clone()),
        SampleFormat::I16 => build_input_stream::<i16>(device, config, shared.clone()),
        SampleFormat::U16 => build_input_stream::<u16>(device, config, shared.clone()),
        other => Err(EngineError::UnsupportedSampleFormat(format!(
            "{:?}. Supported formats: F32, I16, U16",
            other
        ))),
    }
}

fn build_output_stream<T>(
    device: &Device,
    config: &StreamConfig,
    shared: EngineShared,
) -> Result<Stream, EngineError>
where
    T: SizedSample + FromSample<f32> + Send + 'static,
{
    let channels = config.channels as usize;
    let sample_rate = config.sample_rate.0 as f64;
    let error_shared = shared.clone();

    device
        .build_output_stream(
            config,
            move |data: &mut [T], info: &cpal::OutputCallbackInfo| {
                let timestamp = info.timestamp();
                if let Some(latency) = timestamp.playback.duration_since(&timestamp.callback) {
                    shared
                        .clock
                        .set_output_latency_frames((latency.as_secs_f64() * sample_rate) as i64);
                }
                shared.render_output(data, channels);
            },
            move |err| {
                error_shared.notify(Notification::error(
                    NotificationCategory::Engine,
                    format!("Output stream error: {}", err),
                ));
            },
            None,
        )
        .map_err(|e| EngineError::BuildStream(e.to_string()))
}

fn build_input_stream<T>(
    device: &Device,
    config: &StreamConfig,
    shared: EngineShared,
) -> Result<Stream, EngineError>
where
    T: SizedSample + Send + 'static,
    f32: FromSample<T>,
{
    let error_shared = shared.clone();

    device
        .build_input_stream(
            config,
            move |data: &[T], _: &cpal::InputCallbackInfo| {
                shared.capture_input(data);
            },
            move |err| {
                error_shared.notify(Notification::error(
                    NotificationCategory::Capture,
                    format!("Input stream error: {}", err),
                ));
            },
            None,
        )
        .map_err(|e| EngineError::BuildStream(e.to_string()))
}
