//! Mixing engine - control engine, mixer, events and mix buses
//!
//! The engine is split in two halves that never share mutable state directly:
//! - [`Engine`]: host-thread control side. Owns definitions and handles, runs
//!   positional and preset math in [`Engine::update`].
//! - [`Mixer`]: realtime side, driven by the audio callback. Renders the bus
//!   tree and reports back through bounded queues.
//!
//! Supporting pieces:
//! - Handles and the packed event instance handle encoding
//! - Event definitions, sounds and the per-instance render state
//! - Mix buses and mix presets with cross-fading
//! - Positional audio (distance attenuation, cones, Doppler)
//! - User DSP units attached to events, buses, input and output

mod control;
pub(crate) mod definition;
pub(crate) mod dsp;
mod events;
pub(crate) mod gc;
pub(crate) mod handle;
pub(crate) mod instance;
pub(crate) mod message;
pub(crate) mod mixbus;
pub(crate) mod mixer;
pub(crate) mod positional;
pub(crate) mod preset;
pub(crate) mod shared;
pub(crate) mod sound;

pub use control::{Engine, WaveBankLoadedCallback};
pub use definition::{EventDefinition, EventSource, RetriggerMode, StealingMode};
pub use dsp::{dsp_unit, DspUnit, DspUnitHandle};
pub use events::FreeformKind;
pub use gc::gc_handle;
pub use handle::{
    EventDefinitionHandle, EventHandle, MixBusHandle, MixPresetHandle, WaveBankHandle,
    MAX_INSTANCES_PER_DEFINITION, MAX_TABLE_ENTRIES,
};
pub use instance::{PlaybackState, StoppedCallback};
pub use message::{MessageQueue, MESSAGE_QUEUE_CAPACITY};
pub use mixbus::MixBus;
pub use mixer::{Mixer, MixerFormat};
pub use positional::{DistanceAttenuation, DistanceModel, Listener, PositionalSettings};
pub use preset::MixPreset;
pub use shared::{CounterSnapshot, MixerStats};
pub use sound::{PlaybackMode, Sound};
