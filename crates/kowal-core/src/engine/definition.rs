//! Event definitions
//!
//! A definition is immutable once published. The control engine and the
//! mixer both hold it through one `basedrop::Shared`; neither side writes
//! through it.

use super::sound::AudioRef;
use crate::data::AudioData;

/// What happens when every instance of a definition is busy
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum StealingMode {
    DontSteal,
    StealRandom,
    #[default]
    StealQuietest,
}

/// What starting an already playing instance does
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RetriggerMode {
    #[default]
    Retrigger,
    NoRetrigger,
}

/// Where an event's audio comes from
#[derive(Debug, Clone, Default)]
pub enum EventSource {
    #[default]
    None,
    /// Index of a sound in the engine data
    Sound(usize),
    /// A wave bank entry played through a decoder
    Stream { audio: AudioRef, looping: bool },
    /// PCM owned by a freeform event
    Freeform(AudioData),
}

/// Template shared by all instances of an event
#[derive(Debug, Clone)]
pub struct EventDefinition {
    pub id: String,
    /// Number of preallocated instances
    pub num_instances: usize,
    pub gain: f32,
    pub pitch: f32,
    /// Cosine of half the inner cone angle
    pub inner_cone_cos: f32,
    /// Cosine of half the outer cone angle
    pub outer_cone_cos: f32,
    pub outer_cone_gain: f32,
    /// Target bus; `None` routes to the freeform bus
    pub mix_bus: Option<usize>,
    pub is_positional: bool,
    pub retrigger: RetriggerMode,
    pub stealing: StealingMode,
    pub source: EventSource,
    /// Wave banks the event's audio lives in
    pub referenced_wave_banks: Vec<usize>,
}

impl Default for EventDefinition {
    fn default() -> Self {
        Self {
            id: String::new(),
            num_instances: 1,
            gain: 1.0,
            pitch: 1.0,
            inner_cone_cos: 1.0,
            outer_cone_cos: 1.0,
            outer_cone_gain: 1.0,
            mix_bus: None,
            is_positional: false,
            retrigger: RetriggerMode::default(),
            stealing: StealingMode::default(),
            source: EventSource::None,
            referenced_wave_banks: Vec::new(),
        }
    }
}

impl EventDefinition {
    /// Private definition of a freeform event
    pub fn freeform(audio: AudioData, is_positional: bool) -> Self {
        Self {
            id: "freeform".to_string(),
            is_positional,
            source: EventSource::Freeform(audio),
            ..Self::default()
        }
    }

    #[inline]
    pub fn is_streaming(&self) -> bool {
        matches!(self.source, EventSource::Stream { .. })
    }

    #[inline]
    pub fn references_wave_bank(&self, bank: usize) -> bool {
        self.referenced_wave_banks.contains(&bank)
    }

    /// Stream location, if this is a streaming definition
    #[inline]
    pub fn stream_ref(&self) -> Option<(AudioRef, bool)> {
        match self.source {
            EventSource::Stream { audio, looping } => Some((audio, looping)),
            _ => None,
        }
    }
}
