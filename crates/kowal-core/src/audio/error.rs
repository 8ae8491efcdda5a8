//! Audio host error types

use thiserror::Error;

use crate::error::KwlError;

/// Errors that can occur while opening or running the host audio streams
#[derive(Error, Debug)]
pub enum AudioError {
    /// No audio devices available
    #[error("No audio {0} devices found")]
    NoDevices(&'static str),

    /// Failed to get default device
    #[error("Failed to get default audio device: {0}")]
    NoDefaultDevice(String),

    /// Device not found
    #[error("Audio device not found: {0}")]
    DeviceNotFound(String),

    /// Failed to get device configuration
    #[error("Failed to get device config: {0}")]
    ConfigError(String),

    /// Failed to build audio stream
    #[error("Failed to build audio stream: {0}")]
    StreamBuildError(String),

    /// Failed to start/play stream
    #[error("Failed to start audio stream: {0}")]
    StreamPlayError(String),

    /// Unsupported sample format
    #[error("Unsupported sample format: {0}")]
    UnsupportedFormat(String),

    /// Input and output devices disagree on the sample rate
    #[error("Sample rate mismatch: output={output}Hz, input={input}Hz")]
    SampleRateMismatch { output: u32, input: u32 },

    /// The engine rejected the negotiated settings
    #[error(transparent)]
    Engine(#[from] KwlError),
}

/// Result type for audio operations
pub type AudioResult<T> = Result<T, AudioError>;
