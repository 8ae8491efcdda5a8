//! Engine configuration
//!
//! Settings are stored as YAML. A missing or unreadable file falls back to
//! the defaults, so a fresh install starts without any setup.
//!
//! ```ignore
//! use kowal_core::config::{default_config_path, load_config, EngineConfig};
//!
//! let config: EngineConfig = load_config(&default_config_path());
//! let (engine, mixer) = kowal_core::Engine::new(&config)?;
//! ```

mod engine;
mod io;
mod paths;

pub use engine::{
    EngineConfig, DEFAULT_FREEFORM_CAPACITY, DEFAULT_NUM_DECODERS, DEFAULT_PRESET_FADE_SECS,
    MAX_FREEFORM_CAPACITY,
};
pub use io::{load_config, save_config};
pub use paths::{default_config_dir, default_config_path};
