//! Audio host
//!
//! Runs the [`Mixer`](crate::engine::Mixer) from a cpal device callback.
//! Hosts that drive the mixer themselves (offline rendering, another audio
//! API) can skip this module and call `Mixer::render` directly.

mod config;
mod cpal_backend;
mod device;
mod error;

pub use config::{
    AudioConfig, BufferSize, DeviceId, DEFAULT_BUFFER_SIZE, LOW_LATENCY_BUFFER_SIZE,
    MAX_BUFFER_SIZE,
};
pub use cpal_backend::{start_audio_system, AudioHandle};
pub use device::{
    find_device_by_id, get_available_output_devices, get_cpal_default_device, get_devices,
    AudioDevice, Direction,
};
pub use error::{AudioError, AudioResult};
