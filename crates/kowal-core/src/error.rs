//! Engine error types
//!
//! Every fallible engine operation returns [`KwlResult`]. Conditions that
//! arise on the realtime render path are never reported here; they are
//! absorbed into playback state instead.

use thiserror::Error;

/// Errors reported by engine, data and decoder operations
#[derive(Error, Debug)]
pub enum KwlError {
    // ─────────────────────────────────────────────────────────────
    // Lifecycle
    // ─────────────────────────────────────────────────────────────
    #[error("Engine data is already loaded")]
    EngineAlreadyLoaded,

    #[error("No engine data is loaded")]
    EngineDataNotLoaded,

    // ─────────────────────────────────────────────────────────────
    // Handles and identifiers
    // ─────────────────────────────────────────────────────────────
    #[error("Invalid event instance handle: {0:#010x}")]
    InvalidEventInstanceHandle(u32),

    #[error("Invalid event definition handle: {0}")]
    InvalidEventDefinitionHandle(usize),

    #[error("Invalid mix bus handle: {0}")]
    InvalidMixBusHandle(usize),

    #[error("Invalid mix preset handle: {0}")]
    InvalidMixPresetHandle(usize),

    #[error("Invalid wave bank handle: {0}")]
    InvalidWaveBankHandle(usize),

    #[error("Unknown event definition id: {0}")]
    UnknownEventDefinitionId(String),

    #[error("Unknown mix bus id: {0}")]
    UnknownMixBusId(String),

    #[error("Unknown mix preset id: {0}")]
    UnknownMixPresetId(String),

    // ─────────────────────────────────────────────────────────────
    // Resource exhaustion
    // ─────────────────────────────────────────────────────────────
    #[error("No free event instances")]
    NoFreeEventInstances,

    #[error("No free decoders")]
    NoFreeDecoders,

    #[error("Message queue is full")]
    MessageQueueFull,

    // ─────────────────────────────────────────────────────────────
    // Parameters
    // ─────────────────────────────────────────────────────────────
    #[error("Invalid parameter value: {0}")]
    InvalidParameterValue(&'static str),

    #[error("Event is not positional")]
    EventIsNotPositional,

    #[error("Event is not non-positional")]
    EventIsNotNonPositional,

    #[error("Positional events must be mono")]
    PositionalEventMustBeMono,

    #[error("Level metering is disabled")]
    LevelMeteringDisabled,

    #[error("Unsupported number of output channels: {0}")]
    UnsupportedNumOutputChannels(usize),

    #[error("Unsupported number of input channels: {0}")]
    UnsupportedNumInputChannels(usize),

    // ─────────────────────────────────────────────────────────────
    // Data
    // ─────────────────────────────────────────────────────────────
    #[error("File not found: {0}")]
    FileNotFound(String),

    #[error("Unknown file format")]
    UnknownFileFormat,

    #[error("Unsupported encoding")]
    UnsupportedEncoding,

    #[error("Corrupt binary data: {0}")]
    CorruptBinaryData(String),

    #[error("No loaded engine data matches wave bank '{0}'")]
    NoMatchingWaveBank(String),

    #[error("Wave bank '{0}' does not match the engine data")]
    WaveBankEntryMismatch(String),

    #[error("Error decoding audio data: {0}")]
    ErrorDecodingAudioData(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// Result type for engine operations
pub type KwlResult<T> = Result<T, KwlError>;

impl KwlError {
    /// Map an I/O error from opening `path` to a file error
    pub(crate) fn from_open(err: std::io::Error, path: &std::path::Path) -> Self {
        if err.kind() == std::io::ErrorKind::NotFound {
            KwlError::FileNotFound(path.display().to_string())
        } else {
            KwlError::Io(err)
        }
    }

    /// Map a read error from a binary stream, treating truncation as corruption
    pub(crate) fn from_read(err: std::io::Error) -> Self {
        if err.kind() == std::io::ErrorKind::UnexpectedEof {
            KwlError::CorruptBinaryData("unexpected end of data".to_string())
        } else {
            KwlError::Io(err)
        }
    }
}
