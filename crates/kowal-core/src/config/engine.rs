//! Engine settings

use serde::{Deserialize, Serialize};

use crate::audio::AudioConfig;
use crate::engine::MESSAGE_QUEUE_CAPACITY;
use crate::error::{KwlError, KwlResult};

/// Default number of streams that can decode at once
pub const DEFAULT_NUM_DECODERS: usize = 10;

/// Default number of freeform event slots
pub const DEFAULT_FREEFORM_CAPACITY: usize = 256;

/// Freeform slots are addressed with 16 bits
pub const MAX_FREEFORM_CAPACITY: usize = 0xffff;

/// Default mix preset cross-fade time in seconds
pub const DEFAULT_PRESET_FADE_SECS: f32 = 1.0;

/// Settings the engine is created with
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Output sample rate in Hz
    pub sample_rate: u32,

    /// 1 (mono) or 2 (stereo)
    pub output_channels: usize,

    /// 0 disables capture; at most 2
    pub input_channels: usize,

    /// Frames the mixer renders per pass. Longer host buffers are rendered
    /// in several passes.
    pub buffer_size: usize,

    /// Capacity of each control/mixer message queue
    pub message_queue_capacity: usize,

    /// Maximum number of simultaneously playing streams
    pub num_decoders: usize,

    /// Maximum number of freeform events alive at once
    pub freeform_capacity: usize,

    /// Start with output level metering on
    pub level_metering: bool,

    /// Time for a full mix preset cross-fade in seconds
    pub preset_fade_secs: f32,

    /// Host audio device settings
    pub audio: AudioConfig,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            sample_rate: 44100,
            output_channels: 2,
            input_channels: 0,
            buffer_size: 512,
            message_queue_capacity: MESSAGE_QUEUE_CAPACITY,
            num_decoders: DEFAULT_NUM_DECODERS,
            freeform_capacity: DEFAULT_FREEFORM_CAPACITY,
            level_metering: false,
            preset_fade_secs: DEFAULT_PRESET_FADE_SECS,
            audio: AudioConfig::default(),
        }
    }
}

impl EngineConfig {
    /// Check every value the engine depends on
    pub fn validate(&self) -> KwlResult<()> {
        if !(1..=2).contains(&self.output_channels) {
            return Err(KwlError::UnsupportedNumOutputChannels(self.output_channels));
        }
        if self.input_channels > 2 {
            return Err(KwlError::UnsupportedNumInputChannels(self.input_channels));
        }
        if self.sample_rate == 0 {
            return Err(KwlError::InvalidParameterValue("sample rate must be > 0"));
        }
        if self.buffer_size == 0 {
            return Err(KwlError::InvalidParameterValue("buffer size must be > 0"));
        }
        if self.message_queue_capacity == 0 {
            return Err(KwlError::InvalidParameterValue(
                "message queue capacity must be > 0",
            ));
        }
        if self.freeform_capacity > MAX_FREEFORM_CAPACITY {
            return Err(KwlError::InvalidParameterValue(
                "freeform capacity must be at most 65535",
            ));
        }
        if !(self.preset_fade_secs >= 0.0) {
            return Err(KwlError::InvalidParameterValue(
                "preset fade time must be >= 0",
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        assert!(EngineConfig::default().validate().is_ok());
    }

    #[test]
    fn test_channel_counts() {
        let config = EngineConfig {
            output_channels: 3,
            ..EngineConfig::default()
        };
        assert!(matches!(
            config.validate(),
            Err(KwlError::UnsupportedNumOutputChannels(3))
        ));

        let config = EngineConfig {
            output_channels: 0,
            ..EngineConfig::default()
        };
        assert!(config.validate().is_err());

        let config = EngineConfig {
            input_channels: 3,
            ..EngineConfig::default()
        };
        assert!(matches!(
            config.validate(),
            Err(KwlError::UnsupportedNumInputChannels(3))
        ));
    }

    #[test]
    fn test_zero_sizes_are_rejected() {
        for config in [
            EngineConfig {
                sample_rate: 0,
                ..EngineConfig::default()
            },
            EngineConfig {
                buffer_size: 0,
                ..EngineConfig::default()
            },
            EngineConfig {
                freeform_capacity: 0x10000,
                ..EngineConfig::default()
            },
        ] {
            assert!(matches!(
                config.validate(),
                Err(KwlError::InvalidParameterValue(_))
            ));
        }
    }
}
