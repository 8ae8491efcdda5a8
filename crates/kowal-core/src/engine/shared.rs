//! Parameter hand-off between the control engine and the mixer
//!
//! Every cross-thread parameter has three slots. The control slot lives in
//! the control engine's own records and the mixer slot in the mixer's;
//! only the middle, shared slot sits in [`SharedState`] behind the one
//! mutex the two threads have in common. Each side copies its slot to or
//! from the shared slot while holding the lock and does nothing else
//! there. The mixer only ever try-locks; when that fails it renders with
//! the values it already has.

use std::sync::atomic::{AtomicU64, Ordering};

use super::dsp::DspUnitHandle;
use super::message::{FromMixer, MessageQueue, ToMixer};

/// Shared slot of a three-slot parameter
#[derive(Clone, Default)]
pub struct SharedValue<T> {
    value: T,
}

impl<T: Clone> SharedValue<T> {
    pub fn new(value: T) -> Self {
        Self { value }
    }

    /// Copy the writer's slot in
    #[inline]
    pub fn store(&mut self, from: &T) {
        self.value.clone_from(from);
    }

    /// Copy out into the reader's slot
    #[inline]
    pub fn load_into(&self, into: &mut T) {
        into.clone_from(&self.value);
    }

    #[inline]
    pub fn get(&self) -> &T {
        &self.value
    }
}

/// Per-event values computed by the control engine
#[derive(Clone)]
pub struct EventParams {
    /// Effective left/right gain before fades
    pub gain: [f32; 2],
    pub pitch: f32,
    pub dsp: Option<DspUnitHandle>,
}

impl Default for EventParams {
    fn default() -> Self {
        Self {
            gain: [0.0; 2],
            pitch: 1.0,
            dsp: None,
        }
    }
}

/// Per-bus values: the product of the preset blend and the user setting
#[derive(Clone)]
pub struct BusParams {
    pub gain: [f32; 2],
    pub pitch: f32,
    pub dsp: Option<DspUnitHandle>,
}

impl Default for BusParams {
    fn default() -> Self {
        Self {
            gain: [1.0; 2],
            pitch: 1.0,
            dsp: None,
        }
    }
}

/// Engine-wide values
#[derive(Clone, Default)]
pub struct EngineParams {
    pub input_dsp: Option<DspUnitHandle>,
    pub output_dsp: Option<DspUnitHandle>,
    pub level_metering: bool,
    pub paused: bool,
}

/// Values reported by the mixer
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct MixerStats {
    /// Absolute peak of the last buffer per channel
    pub peak: [f32; 2],
    pub clipped: bool,
    pub frames_mixed: u64,
}

/// Everything guarded by the cross-thread mutex
pub struct SharedState {
    pub(crate) to_mixer: MessageQueue<ToMixer>,
    pub(crate) from_mixer: MessageQueue<FromMixer>,
    /// Indexed `[definition][instance]`
    pub(crate) events: Vec<Vec<SharedValue<EventParams>>>,
    /// Indexed by freeform slot
    pub(crate) freeform: Vec<SharedValue<EventParams>>,
    pub(crate) buses: Vec<SharedValue<BusParams>>,
    pub(crate) engine: SharedValue<EngineParams>,
    pub(crate) stats: SharedValue<MixerStats>,
}

impl SharedState {
    pub fn new(queue_capacity: usize, freeform_capacity: usize) -> Self {
        Self {
            to_mixer: MessageQueue::with_capacity(queue_capacity),
            from_mixer: MessageQueue::with_capacity(queue_capacity),
            events: Vec::new(),
            freeform: vec![SharedValue::default(); freeform_capacity],
            buses: Vec::new(),
            engine: SharedValue::default(),
            stats: SharedValue::default(),
        }
    }

    /// Shared slot of an event, data-driven or freeform
    #[inline]
    pub(crate) fn event(&self, handle: super::handle::EventHandle) -> Option<&SharedValue<EventParams>> {
        if handle.is_freeform() {
            self.freeform.get(handle.table_index())
        } else {
            self.events
                .get(handle.table_index())
                .and_then(|instances| instances.get(handle.instance_index()))
        }
    }

    #[inline]
    pub(crate) fn event_mut(
        &mut self,
        handle: super::handle::EventHandle,
    ) -> Option<&mut SharedValue<EventParams>> {
        if handle.is_freeform() {
            self.freeform.get_mut(handle.table_index())
        } else {
            self.events
                .get_mut(handle.table_index())
                .and_then(|instances| instances.get_mut(handle.instance_index()))
        }
    }
}

/// Realtime conditions counted by the mixer and logged by the control side
#[derive(Debug, Default)]
pub struct MixerCounters {
    /// Render calls that could not take the shared lock
    pub lock_misses: AtomicU64,
    /// Messages dropped because a queue was full
    pub dropped_messages: AtomicU64,
    /// Stream buffers that were not decoded in time
    pub missed_buffers: AtomicU64,
    /// DSP units skipped because they were busy
    pub busy_dsp_units: AtomicU64,
}

/// A snapshot of [`MixerCounters`]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CounterSnapshot {
    pub lock_misses: u64,
    pub dropped_messages: u64,
    pub missed_buffers: u64,
    pub busy_dsp_units: u64,
}

impl MixerCounters {
    #[inline]
    pub(crate) fn add(counter: &AtomicU64, n: u64) {
        if n > 0 {
            counter.fetch_add(n, Ordering::Relaxed);
        }
    }

    pub fn snapshot(&self) -> CounterSnapshot {
        CounterSnapshot {
            lock_misses: self.lock_misses.load(Ordering::Relaxed),
            dropped_messages: self.dropped_messages.load(Ordering::Relaxed),
            missed_buffers: self.missed_buffers.load(Ordering::Relaxed),
            busy_dsp_units: self.busy_dsp_units.load(Ordering::Relaxed),
        }
    }
}
