//! Mix bus tree
//!
//! Buses form a tree rooted at the master bus. Every bus owns a list of
//! playing events. Rendering is depth first: a bus renders its sub-buses
//! straight into the output with the accumulated gain and pitch of the
//! chain above them, then renders its own events into a scratch buffer,
//! runs its DSP unit on it, and adds it into the output.
//!
//! ```text
//! master (g_m, p_m)
//!  ├── music (g_m·g_1, p_m·p_1) ── events
//!  └── sfx   (g_m·g_2, p_m·p_2) ── events
//! ```
//!
//! Freeform events live on a separate root bus that renders next to master.

use basedrop::Owned;

use super::dsp::{self, DspUnitHandle};
use super::handle::EventHandle;
use super::instance::{RenderEnv, RenderState};
use super::message::{FromMixer, MessageQueue};
use super::shared::{BusParams, MixerCounters};
use crate::types::Sample;

// ─────────────────────────────────────────────────────────────────────────────
// Control side
// ─────────────────────────────────────────────────────────────────────────────

/// The control engine's record of a mix bus
#[derive(Clone)]
pub struct MixBus {
    pub id: String,
    pub sub_buses: Vec<usize>,
    pub(crate) user_gain: [f32; 2],
    pub(crate) user_pitch: f32,
    /// Linear gain from the preset blend
    pub(crate) preset_gain: [f32; 2],
    pub(crate) preset_pitch: f32,
    pub(crate) dsp: Option<DspUnitHandle>,
}

impl std::fmt::Debug for MixBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MixBus")
            .field("id", &self.id)
            .field("sub_buses", &self.sub_buses)
            .field("user_gain", &self.user_gain)
            .field("user_pitch", &self.user_pitch)
            .finish_non_exhaustive()
    }
}

impl MixBus {
    pub fn new(id: String, sub_buses: Vec<usize>) -> Self {
        Self {
            id,
            sub_buses,
            user_gain: [1.0; 2],
            user_pitch: 1.0,
            preset_gain: [1.0; 2],
            preset_pitch: 1.0,
            dsp: None,
        }
    }

    /// Control slot of the bus parameters
    pub(crate) fn params(&self) -> BusParams {
        BusParams {
            gain: [
                self.preset_gain[0] * self.user_gain[0],
                self.preset_gain[1] * self.user_gain[1],
            ],
            pitch: self.preset_pitch * self.user_pitch,
            dsp: self.dsp.clone(),
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Mixer side
// ─────────────────────────────────────────────────────────────────────────────

/// The mixer's half of a mix bus
pub struct MixerBus {
    pub(crate) sub_buses: Vec<usize>,
    /// Playing events, in start order; capacity is reserved up front
    pub(crate) events: Vec<EventHandle>,
    pub(crate) params: BusParams,
}

impl MixerBus {
    pub fn new(sub_buses: Vec<usize>, event_capacity: usize, params: BusParams) -> Self {
        Self {
            sub_buses,
            events: Vec::with_capacity(event_capacity),
            params,
        }
    }

    /// Add a playing event; false if the list is full
    pub(crate) fn attach(&mut self, event: EventHandle) -> bool {
        if self.events.contains(&event) {
            return true;
        }
        if self.events.len() >= self.events.capacity() {
            return false;
        }
        self.events.push(event);
        true
    }
}

/// Where a bus finds the render state behind an event handle
pub(crate) struct EventSlots<'a> {
    pub data: &'a mut [Vec<RenderState>],
    pub freeform: &'a mut [Option<Owned<RenderState>>],
}

impl EventSlots<'_> {
    pub(crate) fn get_mut(&mut self, handle: EventHandle) -> Option<&mut RenderState> {
        if handle.is_freeform() {
            self.freeform
                .get_mut(handle.table_index())
                .and_then(|slot| slot.as_deref_mut())
        } else {
            self.data
                .get_mut(handle.table_index())
                .and_then(|instances| instances.get_mut(handle.instance_index()))
        }
    }
}

/// One render pass over a bus tree
pub(crate) struct BusRenderer<'a, 'e> {
    pub slots: EventSlots<'a>,
    pub env: RenderEnv<'e>,
    pub outbox: &'a mut MessageQueue<FromMixer>,
    pub bus_scratch: &'a mut [Sample],
    pub event_scratch: &'a mut [Sample],
    pub num_channels: usize,
    pub num_frames: usize,
}

impl BusRenderer<'_, '_> {
    /// Render bus `index` and everything below it, adding into `out`
    pub(crate) fn render_bus(
        &mut self,
        buses: &mut [MixerBus],
        index: usize,
        out: &mut [Sample],
        pitch: f32,
        gain: [f32; 2],
    ) {
        for i in 0..buses[index].sub_buses.len() {
            let sub = buses[index].sub_buses[i];
            let params = &buses[sub].params;
            let sub_pitch = pitch * params.pitch;
            let sub_gain = [gain[0] * params.gain[0], gain[1] * params.gain[1]];
            self.render_bus(buses, sub, out, sub_pitch, sub_gain);
        }
        self.render_events(&mut buses[index], out, pitch, gain);
    }

    /// Render a bus's own events, without descending into sub-buses
    pub(crate) fn render_events(
        &mut self,
        bus: &mut MixerBus,
        out: &mut [Sample],
        pitch: f32,
        gain: [f32; 2],
    ) {
        let ch = self.num_channels;
        let n = self.num_frames;
        let len = ch * n;
        let bus_scratch = &mut self.bus_scratch[..len];
        bus_scratch.fill(0.0);

        let mut mixed = 0;
        let mut i = 0;
        while i < bus.events.len() {
            let handle = bus.events[i];
            let Some(state) = self.slots.get_mut(handle) else {
                bus.events.remove(i);
                continue;
            };

            let finished = state.render(self.event_scratch, ch, n, pitch, &mut self.env);
            for (acc, s) in bus_scratch.iter_mut().zip(&self.event_scratch[..len]) {
                *acc += *s;
            }
            mixed += 1;

            if finished {
                let message = state.finish();
                if self.outbox.push(message).is_err() {
                    MixerCounters::add(&self.env.counters.dropped_messages, 1);
                }
                if let FromMixer::UnloadFreeformEvent(_) = message {
                    if let Some(slot) = self.slots.freeform.get_mut(handle.table_index()) {
                        *slot = None;
                    }
                }
                bus.events.remove(i);
            } else {
                i += 1;
            }
        }

        if mixed == 0 {
            return;
        }
        if let Some(unit) = &bus.params.dsp {
            if !dsp::try_process(unit, bus_scratch, ch, n) {
                MixerCounters::add(&self.env.counters.busy_dsp_units, 1);
            }
        }

        for (frame_out, frame_in) in out[..len].chunks_exact_mut(ch).zip(bus_scratch.chunks_exact(ch)) {
            for (c, (o, s)) in frame_out.iter_mut().zip(frame_in).enumerate() {
                *o += gain[c.min(1)] * *s;
            }
        }
    }
}
