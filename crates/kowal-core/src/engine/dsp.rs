//! DSP unit interface
//!
//! A DSP unit is an opaque processor attached to an event, a mix bus, the
//! input or the output. The mixer calls [`DspUnit::process`] from the audio
//! thread; the two update hooks give the unit a chance to exchange state
//! with each side of the engine.

use std::sync::Mutex;

use basedrop::Shared;

use super::gc::gc_handle;
use crate::types::Sample;

/// Processor called on interleaved float buffers
pub trait DspUnit: Send {
    /// Process `num_frames` interleaved frames in place
    ///
    /// Runs on the audio thread: no allocation, no blocking.
    fn process(&mut self, buffer: &mut [Sample], num_channels: usize, num_frames: usize);

    /// Called on the audio thread once per buffer, before rendering
    fn update_mixer(&mut self) {}

    /// Called on the control thread once per `update()`
    fn update_engine(&mut self) {}
}

/// Shareable DSP unit
///
/// The mixer only ever try-locks the unit and skips it for a buffer if the
/// control thread holds it.
pub type DspUnitHandle = Shared<Mutex<Box<dyn DspUnit>>>;

/// Wrap a unit so it can be attached to the engine
pub fn dsp_unit<U: DspUnit + 'static>(unit: U) -> DspUnitHandle {
    let unit: Box<dyn DspUnit> = Box::new(unit);
    Shared::new(&gc_handle(), Mutex::new(unit))
}

/// Audio thread: process if the unit is free
///
/// Returns false if the unit was busy and the buffer was left untouched.
#[inline]
pub(crate) fn try_process(
    unit: &DspUnitHandle,
    buffer: &mut [Sample],
    num_channels: usize,
    num_frames: usize,
) -> bool {
    match unit.try_lock() {
        Ok(mut unit) => {
            unit.process(buffer, num_channels, num_frames);
            true
        }
        Err(_) => false,
    }
}

/// Audio thread: run the mixer-side update if the unit is free
#[inline]
pub(crate) fn try_update_mixer(unit: &DspUnitHandle) -> bool {
    match unit.try_lock() {
        Ok(mut unit) => {
            unit.update_mixer();
            true
        }
        Err(_) => false,
    }
}

/// Control thread: run the engine-side update
pub(crate) fn update_engine(unit: &DspUnitHandle) {
    match unit.lock() {
        Ok(mut unit) => unit.update_engine(),
        Err(poisoned) => poisoned.into_inner().update_engine(),
    }
}
