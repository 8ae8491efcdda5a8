//! Kowal Core - real-time software mixing engine
//!
//! Loads engine data (event definitions, mix buses, mix presets, sounds)
//! and wave banks, and mixes events into an interleaved output stream.
//! The control side lives on the host thread; the mixer runs in the audio
//! callback.

pub mod audio;
pub mod config;
pub mod data;
pub mod decoder;
pub mod engine;
pub mod error;
pub mod types;

pub use engine::Engine;
pub use glam::Vec3;
pub use error::{KwlError, KwlResult};
pub use types::*;
