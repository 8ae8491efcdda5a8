//! cpal audio host
//!
//! Opens the output device (and a capture device when the engine has input
//! channels) and drives the [`Mixer`] from the device callback.
//!
//! ```text
//! ┌──────────────────┐   update()   ┌─────────────────────┐
//! │   Host thread    │─────────────►│   SharedState       │
//! │  (owns Engine)   │◄─────────────│  (try-locked by RT) │
//! └──────────────────┘              └──────────┬──────────┘
//!                                              │
//!                                   ┌──────────▼──────────┐
//!   Capture stream ──rtrb ring────► │ cpal output callback│
//!                                   │    (owns Mixer)     │
//!                                   └─────────────────────┘
//! ```
//!
//! The mixer renders at the engine's channel count; the callback maps each
//! frame onto the device's channel layout.

use cpal::traits::{DeviceTrait, StreamTrait};
use cpal::{BufferSize as CpalBufferSize, SampleFormat, Stream, StreamConfig};

use super::config::{AudioConfig, MAX_BUFFER_SIZE};
use super::device::{resolve_device, Direction};
use super::error::{AudioError, AudioResult};
use crate::config::EngineConfig;
use crate::engine::{Engine, Mixer};
use crate::types::{Sample, StereoSample, MAX_CHANNELS};

/// Capture ring size in device buffers
const INPUT_RING_BUFFERS: usize = 4;

/// Keeps the audio streams alive. Drop this to stop audio.
pub struct AudioHandle {
    _output_stream: Stream,
    _input_stream: Option<Stream>,
    sample_rate: u32,
    buffer_size: u32,
    device_channels: u16,
}

impl AudioHandle {
    /// Sample rate negotiated with the device
    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    /// Requested device buffer size in frames
    pub fn buffer_size(&self) -> u32 {
        self.buffer_size
    }

    /// Channel count of the output device
    pub fn device_channels(&self) -> u16 {
        self.device_channels
    }

    /// Output latency in milliseconds
    pub fn latency_ms(&self) -> f32 {
        (self.buffer_size as f32 / self.sample_rate as f32) * 1000.0
    }
}

/// Open the devices and start mixing
///
/// The engine is created at the sample rate the output device accepts,
/// which may differ from `config.sample_rate`. The returned [`Engine`] is
/// for the host thread; its mixer is moved into the output callback.
pub fn start_audio_system(config: &EngineConfig) -> AudioResult<(Engine, AudioHandle)> {
    config.validate()?;

    let device = resolve_device(config.audio.output_device.as_ref(), Direction::Output)?;
    let device_name = device.name().unwrap_or_else(|_| "Unknown".to_string());
    log::info!("Using audio output device: {}", device_name);

    let (supported, buffer_size) = get_output_config(&device, config)?;
    let sample_rate = supported.sample_rate().0;
    let stream_config = StreamConfig {
        channels: supported.channels(),
        sample_rate: supported.sample_rate(),
        buffer_size: CpalBufferSize::Fixed(buffer_size),
    };

    log::info!(
        "Audio config: {} channels, {}Hz, {} frames (~{:.1}ms latency)",
        stream_config.channels,
        sample_rate,
        buffer_size,
        (buffer_size as f32 / sample_rate as f32) * 1000.0
    );

    let engine_config = EngineConfig {
        sample_rate,
        ..config.clone()
    };
    let (engine, mixer) = Engine::new(&engine_config)?;

    let (input_stream, input) = if config.input_channels > 0 {
        let (stream, consumer) = build_input_stream(&config.audio, config.input_channels, sample_rate, buffer_size)?;
        (Some(stream), Some(consumer))
    } else {
        (None, None)
    };

    let state = CallbackState::new(mixer, config.input_channels, input);
    let output_stream = build_output_stream(&device, &stream_config, state)?;
    output_stream
        .play()
        .map_err(|e| AudioError::StreamPlayError(format!("Output: {}", e)))?;
    if let Some(stream) = &input_stream {
        stream
            .play()
            .map_err(|e| AudioError::StreamPlayError(format!("Input: {}", e)))?;
    }

    log::info!(
        "Audio streams started ({} output, {} input channels)",
        config.output_channels,
        config.input_channels
    );

    Ok((
        engine,
        AudioHandle {
            _output_stream: output_stream,
            _input_stream: input_stream,
            sample_rate,
            buffer_size,
            device_channels: stream_config.channels,
        },
    ))
}

/// State owned by the output callback
struct CallbackState {
    mixer: Mixer,
    /// Mixer output at the engine's channel count
    mix_buffer: Vec<Sample>,
    input_channels: usize,
    input: Option<rtrb::Consumer<Sample>>,
    input_buffer: Vec<Sample>,
}

impl CallbackState {
    fn new(mixer: Mixer, input_channels: usize, input: Option<rtrb::Consumer<Sample>>) -> Self {
        let channels = mixer.format().num_channels;
        Self {
            mixer,
            mix_buffer: vec![0.0; MAX_BUFFER_SIZE * channels],
            input_channels,
            input,
            input_buffer: vec![0.0; MAX_BUFFER_SIZE * input_channels],
        }
    }

    /// Fill one device buffer of `device_channels` interleaved channels
    fn process(&mut self, data: &mut [f32], device_channels: usize) {
        let channels = self.mixer.format().num_channels;
        for block in data.chunks_mut(MAX_BUFFER_SIZE * device_channels) {
            let frames = block.len() / device_channels;

            self.capture(frames);

            let mix = &mut self.mix_buffer[..frames * channels];
            self.mixer.render(mix, frames);

            for (frame, mixed) in block
                .chunks_exact_mut(device_channels)
                .zip(mix.chunks_exact(channels))
            {
                StereoSample::from_frame(mixed).write_frame(frame);
            }
        }
    }

    /// Pull captured frames and run them through the input DSP unit
    ///
    /// Missing frames (capture running behind) are silence.
    fn capture(&mut self, frames: usize) {
        let Some(consumer) = self.input.as_mut() else {
            return;
        };
        let input = &mut self.input_buffer[..frames * self.input_channels];
        for sample in input.iter_mut() {
            *sample = consumer.pop().unwrap_or(0.0);
        }
        self.mixer.process_input(input, self.input_channels, frames);
    }
}

/// Get the best output configuration for a device
///
/// Returns (SupportedStreamConfig, buffer_size_in_frames)
fn get_output_config(
    device: &cpal::Device,
    config: &EngineConfig,
) -> AudioResult<(cpal::SupportedStreamConfig, u32)> {
    let supported_configs: Vec<_> = device
        .supported_output_configs()
        .map_err(|e| AudioError::ConfigError(e.to_string()))?
        .collect();

    let target = config.sample_rate;
    let in_range = |c: &&cpal::SupportedStreamConfigRange| {
        target >= c.min_sample_rate().0 && target <= c.max_sample_rate().0
    };
    let wanted_channels = config.output_channels as u16;

    let best = supported_configs
        .iter()
        .filter(|c| c.sample_format() == SampleFormat::F32)
        .filter(|c| c.channels() == wanted_channels)
        .find(in_range)
        .or_else(|| {
            supported_configs
                .iter()
                .filter(|c| c.sample_format() == SampleFormat::F32)
                .find(in_range)
        })
        .or_else(|| {
            supported_configs
                .iter()
                .find(|c| c.sample_format() == SampleFormat::F32)
        })
        .ok_or_else(|| {
            AudioError::UnsupportedFormat("device offers no f32 output configuration".to_string())
        })?;

    let sample_rate = if in_range(&best) {
        cpal::SampleRate(target)
    } else {
        let fallback = best.max_sample_rate();
        log::warn!(
            "Audio device doesn't support {}Hz, falling back to {}Hz",
            target,
            fallback.0
        );
        fallback
    };

    let buffer_size = config.audio.buffer_size.as_frames();
    log::debug!(
        "Selected buffer size: {} frames for {:?} mode",
        buffer_size,
        config.audio.buffer_size
    );

    Ok((best.clone().with_sample_rate(sample_rate), buffer_size))
}

fn build_output_stream(
    device: &cpal::Device,
    config: &StreamConfig,
    mut state: CallbackState,
) -> AudioResult<Stream> {
    let channels = config.channels as usize;

    device
        .build_output_stream(
            config,
            move |data: &mut [f32], _info: &cpal::OutputCallbackInfo| {
                state.process(data, channels);
            },
            move |err| {
                log::error!("Output audio stream error: {}", err);
            },
            None,
        )
        .map_err(|e| AudioError::StreamBuildError(e.to_string()))
}

/// Open the capture stream feeding a lock-free ring buffer
///
/// The capture callback writes frames at `input_channels` width; extra
/// device channels are dropped and a mono device is duplicated.
fn build_input_stream(
    audio: &AudioConfig,
    input_channels: usize,
    sample_rate: u32,
    buffer_size: u32,
) -> AudioResult<(Stream, rtrb::Consumer<Sample>)> {
    let device = resolve_device(audio.input_device.as_ref(), Direction::Input)?;
    log::info!(
        "Using audio input device: {}",
        device.name().unwrap_or_else(|_| "Unknown".to_string())
    );

    let supported_configs: Vec<_> = device
        .supported_input_configs()
        .map_err(|e| AudioError::ConfigError(e.to_string()))?
        .collect();
    let supported = supported_configs
        .iter()
        .filter(|c| c.sample_format() == SampleFormat::F32)
        .find(|c| sample_rate >= c.min_sample_rate().0 && sample_rate <= c.max_sample_rate().0)
        .ok_or_else(|| {
            let input = supported_configs
                .first()
                .map(|c| c.max_sample_rate().0)
                .unwrap_or(0);
            AudioError::SampleRateMismatch {
                output: sample_rate,
                input,
            }
        })?;

    let device_channels = supported.channels() as usize;
    let config = StreamConfig {
        channels: supported.channels(),
        sample_rate: cpal::SampleRate(sample_rate),
        buffer_size: CpalBufferSize::Fixed(buffer_size),
    };

    let capacity = MAX_BUFFER_SIZE.min(buffer_size as usize * INPUT_RING_BUFFERS) * input_channels.max(MAX_CHANNELS);
    let (mut producer, consumer) = rtrb::RingBuffer::<Sample>::new(capacity);

    let stream = device
        .build_input_stream(
            &config,
            move |data: &[f32], _info: &cpal::InputCallbackInfo| {
                for frame in data.chunks_exact(device_channels) {
                    if producer.slots() < input_channels {
                        // Host is behind; drop the rest of this buffer
                        break;
                    }
                    let stereo = StereoSample::from_frame(frame);
                    let _ = producer.push(stereo.left);
                    if input_channels > 1 {
                        let _ = producer.push(stereo.right);
                    }
                }
            },
            move |err| {
                log::error!("Input audio stream error: {}", err);
            },
            None,
        )
        .map_err(|e| AudioError::StreamBuildError(e.to_string()))?;

    Ok((stream, consumer))
}
