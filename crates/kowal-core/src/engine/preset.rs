//! Mix presets
//!
//! A preset is a full set of bus gains and pitches. Presets are blended by
//! weight: each weight moves towards its target at a fixed rate, and every
//! bus gets the weighted sum of each preset's log gain and pitch. Gains are
//! blended in the log domain and converted afterwards.

use super::mixbus::MixBus;
use crate::types::log_gain_to_linear;

/// One bus's values within a preset
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PresetBusParams {
    pub bus: usize,
    pub log_gain: [f32; 2],
    pub pitch: f32,
}

#[derive(Debug, Clone, PartialEq)]
pub struct MixPreset {
    pub id: String,
    pub is_default: bool,
    pub(crate) weight: f32,
    pub(crate) target: f32,
    pub params: Vec<PresetBusParams>,
}

impl MixPreset {
    /// The default preset starts fully applied
    pub fn new(id: String, is_default: bool, params: Vec<PresetBusParams>) -> Self {
        let weight = if is_default { 1.0 } else { 0.0 };
        Self {
            id,
            is_default,
            weight,
            target: weight,
            params,
        }
    }

    #[inline]
    pub fn weight(&self) -> f32 {
        self.weight
    }
}

/// Make `active` the target; without a fade the weights jump there
pub(crate) fn activate(presets: &mut [MixPreset], active: usize, fade: bool) {
    for (i, preset) in presets.iter_mut().enumerate() {
        preset.target = if i == active { 1.0 } else { 0.0 };
        if !fade {
            preset.weight = preset.target;
        }
    }
}

/// Advance the weights by `dt` seconds and write the blend into the buses
pub(crate) fn update(presets: &mut [MixPreset], buses: &mut [MixBus], dt: f32, fade_secs: f32) {
    let step = if fade_secs > 0.0 { dt / fade_secs } else { 1.0 };
    for preset in presets.iter_mut() {
        if preset.weight < preset.target {
            preset.weight = (preset.weight + step).min(preset.target);
        } else if preset.weight > preset.target {
            preset.weight = (preset.weight - step).max(preset.target);
        }
    }

    for bus in buses.iter_mut() {
        bus.preset_gain = [0.0; 2];
        bus.preset_pitch = 0.0;
    }
    for preset in presets.iter() {
        let w = preset.weight;
        for p in &preset.params {
            if let Some(bus) = buses.get_mut(p.bus) {
                bus.preset_gain[0] += p.log_gain[0] * w;
                bus.preset_gain[1] += p.log_gain[1] * w;
                bus.preset_pitch += p.pitch * w;
            }
        }
    }
    for bus in buses.iter_mut() {
        bus.preset_gain = bus.preset_gain.map(log_gain_to_linear);
    }
}
