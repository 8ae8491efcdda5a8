//! The realtime mixer
//!
//! [`Mixer::render`] is the only entry point the audio callback needs. It
//! never blocks, never allocates and never logs. One render call:
//!
//! 1. Try-lock the shared state and take the queued commands
//! 2. Apply the commands (start, stop, pause, data hand-over)
//! 3. Try-lock again and pull the latest engine, bus and event parameters
//! 4. Render the freeform root and the master bus tree, clamp and meter
//! 5. Release the bus tree if an engine data unload was requested
//! 6. Try-lock a last time to publish notifications and meter readings
//! 7. Run the output DSP unit
//!
//! A failed try-lock skips that step for this buffer and is counted.

use std::sync::{Arc, Mutex, MutexGuard, TryLockError};

use basedrop::{Owned, Shared};
use rand::rngs::StdRng;
use rand::SeedableRng;

use super::dsp;
use super::handle::EventHandle;
use super::instance::{PlaybackState, RenderEnv, RenderState};
use super::message::{FromMixer, MessageQueue, ToMixer};
use super::mixbus::{BusRenderer, EventSlots, MixerBus};
use super::shared::{BusParams, EngineParams, MixerCounters, MixerStats, SharedState};
use super::sound::Sound;
use crate::data::WaveBankAudio;
use crate::types::Sample;

/// Everything the mixer needs from loaded engine data
///
/// Built on the control thread and handed over whole with `SetMasterBus`.
pub struct MixerData {
    pub(crate) buses: Vec<MixerBus>,
    pub(crate) master: usize,
    pub(crate) sounds: Vec<Sound>,
    /// Indexed `[definition][instance]`
    pub(crate) events: Vec<Vec<RenderState>>,
    /// Audio of loaded wave banks, filled in by `WaveBankLoaded`
    pub(crate) wave_banks: Vec<Option<Shared<WaveBankAudio>>>,
}

impl MixerData {
    pub(crate) fn new(
        buses: Vec<MixerBus>,
        master: usize,
        sounds: Vec<Sound>,
        events: Vec<Vec<RenderState>>,
        num_wave_banks: usize,
    ) -> Self {
        Self {
            buses,
            master,
            sounds,
            events,
            wave_banks: vec![None; num_wave_banks],
        }
    }
}

/// Disjoint borrows of the installed mixer data
struct DataParts<'a> {
    buses: &'a mut [MixerBus],
    master: usize,
    sounds: &'a [Sound],
    wave_banks: &'a [Option<Shared<WaveBankAudio>>],
    events: &'a mut [Vec<RenderState>],
}

fn split(data: Option<&mut MixerData>) -> DataParts<'_> {
    match data {
        Some(data) => {
            let MixerData {
                buses,
                master,
                sounds,
                events,
                wave_banks,
            } = data;
            DataParts {
                buses,
                master: *master,
                sounds,
                wave_banks,
                events,
            }
        }
        None => DataParts {
            buses: &mut [],
            master: 0,
            sounds: &[],
            wave_banks: &[],
            events: &mut [],
        },
    }
}

/// Audio format the mixer renders
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MixerFormat {
    pub sample_rate: u32,
    pub num_channels: usize,
    /// Frames rendered per internal pass; longer buffers are split
    pub max_frames: usize,
    pub freeform_capacity: usize,
}

/// The realtime half of the engine
pub struct Mixer {
    shared: Arc<Mutex<SharedState>>,
    counters: Arc<MixerCounters>,
    incoming: MessageQueue<ToMixer>,
    outgoing: MessageQueue<FromMixer>,
    data: Option<Owned<MixerData>>,
    freeform: Vec<Option<Owned<RenderState>>>,
    freeform_bus: MixerBus,
    bus_scratch: Vec<Sample>,
    event_scratch: Vec<Sample>,
    rng: StdRng,
    /// Meter readings accumulated since the last publish
    stats: MixerStats,
    engine: EngineParams,
    format: MixerFormat,
    reset_requested: bool,
}

/// Try-lock, recovering the state of a poisoned lock
fn try_lock(shared: &Mutex<SharedState>) -> Option<MutexGuard<'_, SharedState>> {
    match shared.try_lock() {
        Ok(guard) => Some(guard),
        Err(TryLockError::Poisoned(poisoned)) => Some(poisoned.into_inner()),
        Err(TryLockError::WouldBlock) => None,
    }
}

impl Mixer {
    pub(crate) fn new(
        format: MixerFormat,
        queue_capacity: usize,
        shared: Arc<Mutex<SharedState>>,
        counters: Arc<MixerCounters>,
    ) -> Self {
        let scratch_len = format.max_frames * format.num_channels;
        Self {
            shared,
            counters,
            incoming: MessageQueue::with_capacity(queue_capacity),
            outgoing: MessageQueue::with_capacity(queue_capacity),
            data: None,
            freeform: (0..format.freeform_capacity).map(|_| None).collect(),
            freeform_bus: MixerBus::new(Vec::new(), format.freeform_capacity, BusParams::default()),
            bus_scratch: vec![0.0; scratch_len],
            event_scratch: vec![0.0; scratch_len],
            rng: StdRng::seed_from_u64(0x6b77_6c00),
            stats: MixerStats::default(),
            engine: EngineParams::default(),
            format,
            reset_requested: false,
        }
    }

    #[inline]
    pub fn format(&self) -> MixerFormat {
        self.format
    }

    /// Render `num_frames` interleaved frames into `out`
    pub fn render(&mut self, out: &mut [Sample], num_frames: usize) {
        let ch = self.format.num_channels;
        let num_frames = num_frames.min(out.len() / ch);
        let out = &mut out[..num_frames * ch];
        out.fill(0.0);

        self.receive();
        self.process_messages();
        self.pull_params();
        self.update_dsp_units();

        if !self.engine.paused {
            for chunk in out.chunks_mut(self.format.max_frames * ch) {
                let frames = chunk.len() / ch;
                self.render_buses(chunk, frames);
            }

            // Peaks are taken before the clamp so an overshoot is visible
            let mut peak = [0.0f32; 2];
            for frame in out.chunks_exact_mut(ch) {
                for (c, s) in frame.iter_mut().enumerate() {
                    let p = &mut peak[c.min(1)];
                    *p = p.max(s.abs());
                    *s = s.clamp(-1.0, 1.0);
                }
            }
            if ch == 1 {
                peak[1] = peak[0];
            }
            if self.engine.level_metering {
                self.stats.peak[0] = self.stats.peak[0].max(peak[0].min(1.0));
                self.stats.peak[1] = self.stats.peak[1].max(peak[1].min(1.0));
                self.stats.clipped |= peak.iter().any(|p| *p > 1.0);
            }
        }
        self.stats.frames_mixed += num_frames as u64;

        if self.reset_requested {
            self.reset_requested = false;
            self.data = None;
            self.notify(FromMixer::UnloadEngineData);
        }

        self.publish();

        if let Some(unit) = &self.engine.output_dsp {
            if !dsp::try_process(unit, out, ch, num_frames) {
                MixerCounters::add(&self.counters.busy_dsp_units, 1);
            }
        }
    }

    /// Run captured input through the input DSP unit
    pub fn process_input(&mut self, input: &mut [Sample], num_channels: usize, num_frames: usize) {
        let num_frames = num_frames.min(input.len() / num_channels.max(1));
        if let Some(unit) = &self.engine.input_dsp {
            if !dsp::try_process(unit, input, num_channels, num_frames) {
                MixerCounters::add(&self.counters.busy_dsp_units, 1);
            }
        }
    }

    fn notify(&mut self, message: FromMixer) {
        if self.outgoing.push(message).is_err() {
            MixerCounters::add(&self.counters.dropped_messages, 1);
        }
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Shared state
    // ─────────────────────────────────────────────────────────────────────────

    fn receive(&mut self) {
        let Some(mut shared) = try_lock(&self.shared) else {
            MixerCounters::add(&self.counters.lock_misses, 1);
            return;
        };
        let dropped = shared.to_mixer.drain_into(&mut self.incoming);
        drop(shared);
        MixerCounters::add(&self.counters.dropped_messages, dropped as u64);
    }

    fn pull_params(&mut self) {
        let Some(shared) = try_lock(&self.shared) else {
            MixerCounters::add(&self.counters.lock_misses, 1);
            return;
        };
        shared.engine.load_into(&mut self.engine);

        let parts = split(self.data.as_deref_mut());
        for (index, bus) in parts.buses.iter_mut().enumerate() {
            if let Some(slot) = shared.buses.get(index) {
                slot.load_into(&mut bus.params);
            }
            for &handle in &bus.events {
                let state = parts
                    .events
                    .get_mut(handle.table_index())
                    .and_then(|instances| instances.get_mut(handle.instance_index()));
                if let (Some(slot), Some(state)) = (shared.event(handle), state) {
                    slot.load_into(&mut state.params);
                }
            }
        }
        for &handle in &self.freeform_bus.events {
            let state = self
                .freeform
                .get_mut(handle.table_index())
                .and_then(|slot| slot.as_deref_mut());
            if let (Some(slot), Some(state)) = (shared.event(handle), state) {
                slot.load_into(&mut state.params);
            }
        }
    }

    fn publish(&mut self) {
        let Some(mut shared) = try_lock(&self.shared) else {
            MixerCounters::add(&self.counters.lock_misses, 1);
            return;
        };
        let dropped = self.outgoing.drain_into(&mut shared.from_mixer);
        shared.stats.store(&self.stats);
        drop(shared);

        MixerCounters::add(&self.counters.dropped_messages, dropped as u64);
        self.stats.peak = [0.0; 2];
        self.stats.clipped = false;
    }

    fn update_dsp_units(&mut self) {
        let mut busy = 0;
        let mut tick = |unit: &dsp::DspUnitHandle| {
            if !dsp::try_update_mixer(unit) {
                busy += 1;
            }
        };

        for unit in [&self.engine.input_dsp, &self.engine.output_dsp].into_iter().flatten() {
            tick(unit);
        }
        if let Some(data) = self.data.as_deref() {
            for bus in &data.buses {
                if let Some(unit) = &bus.params.dsp {
                    tick(unit);
                }
                for &handle in &bus.events {
                    let state = data
                        .events
                        .get(handle.table_index())
                        .and_then(|instances| instances.get(handle.instance_index()));
                    if let Some(unit) = state.and_then(|state| state.params.dsp.as_ref()) {
                        tick(unit);
                    }
                }
            }
        }
        for &handle in &self.freeform_bus.events {
            let state = self.freeform.get(handle.table_index()).and_then(|slot| slot.as_deref());
            if let Some(unit) = state.and_then(|state| state.params.dsp.as_ref()) {
                tick(unit);
            }
        }

        MixerCounters::add(&self.counters.busy_dsp_units, busy);
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Commands
    // ─────────────────────────────────────────────────────────────────────────

    fn process_messages(&mut self) {
        // An empty queue with no capacity does not allocate
        let mut incoming = std::mem::replace(&mut self.incoming, MessageQueue::with_capacity(0));
        for message in incoming.drain() {
            self.handle_message(message);
        }
        self.incoming = incoming;
    }

    fn state_mut(&mut self, handle: EventHandle) -> Option<&mut RenderState> {
        if handle.is_freeform() {
            self.freeform.get_mut(handle.table_index())?.as_deref_mut()
        } else {
            self.data
                .as_deref_mut()?
                .events
                .get_mut(handle.table_index())?
                .get_mut(handle.instance_index())
        }
    }

    fn handle_message(&mut self, message: ToMixer) {
        match message {
            ToMixer::EventStart {
                event,
                fade_in_secs,
                voice,
                stream,
            } => {
                if let Some(voice) = voice {
                    if let Some(slot) = self.freeform.get_mut(event.table_index()) {
                        *slot = Some(voice);
                    }
                }
                self.start_event(event, fade_in_secs, stream, true);
            }
            ToMixer::EventRetrigger { event, fade_in_secs } => {
                self.start_event(event, fade_in_secs, None, false);
            }
            ToMixer::EventStop {
                event,
                fade_out_secs,
            } => {
                let sample_rate = self.format.sample_rate as f32;
                let parts = split(self.data.as_deref_mut());
                let mut slots = EventSlots {
                    data: parts.events,
                    freeform: &mut self.freeform,
                };
                if let Some(state) = slots.get_mut(event) {
                    state.request_stop(fade_out_secs, sample_rate, parts.sounds);
                }
            }
            ToMixer::EventPause(event) => {
                if let Some(state) = self.state_mut(event) {
                    state.paused = true;
                }
            }
            ToMixer::EventResume(event) => {
                if let Some(state) = self.state_mut(event) {
                    state.paused = false;
                }
            }
            ToMixer::FreeformEventStop(event) => {
                if let Some(state) = self.state_mut(event) {
                    if state.playback != PlaybackState::Stopped {
                        state.playback = PlaybackState::StopAndUnloadRequested;
                    }
                }
            }
            ToMixer::WaveBankLoaded { bank, audio } => {
                if let Some(slot) = self
                    .data
                    .as_deref_mut()
                    .and_then(|data| data.wave_banks.get_mut(bank))
                {
                    *slot = Some(audio);
                }
            }
            ToMixer::StopAllReferencingWaveBank(bank) => {
                if let Some(data) = self.data.as_deref_mut() {
                    for state in data.events.iter_mut().flatten() {
                        if state.playback != PlaybackState::Stopped
                            && state.definition.references_wave_bank(bank)
                        {
                            state.playback = PlaybackState::StopRequested;
                        }
                    }
                    // Playing events keep their own reference until they finish
                    if let Some(slot) = data.wave_banks.get_mut(bank) {
                        *slot = None;
                    }
                }
                self.notify(FromMixer::UnloadWaveBank(bank));
            }
            ToMixer::PrepareEngineDataUnload => {
                if let Some(data) = self.data.as_deref_mut() {
                    for state in data.events.iter_mut().flatten() {
                        if state.playback != PlaybackState::Stopped {
                            state.playback = PlaybackState::StopRequested;
                        }
                    }
                }
                self.reset_requested = true;
            }
            ToMixer::SetMasterBus(data) => {
                self.data = Some(data);
            }
        }
    }

    fn start_event(
        &mut self,
        event: EventHandle,
        fade_in_secs: f32,
        stream: Option<Owned<crate::decoder::StreamTap>>,
        attach: bool,
    ) {
        let sample_rate = self.format.sample_rate as f32;
        let parts = split(self.data.as_deref_mut());
        let mut slots = EventSlots {
            data: parts.events,
            freeform: &mut self.freeform,
        };
        let Some(state) = slots.get_mut(event) else {
            return;
        };

        let mut env = RenderEnv {
            sounds: parts.sounds,
            wave_banks: parts.wave_banks,
            rng: &mut self.rng,
            counters: &self.counters,
        };
        state.begin(fade_in_secs, sample_rate, stream, &mut env);
        if !attach {
            return;
        }

        let bus = match state.definition.mix_bus {
            Some(index) if !event.is_freeform() => parts.buses.get_mut(index),
            _ => Some(&mut self.freeform_bus),
        };
        if !bus.is_some_and(|bus| bus.attach(event)) {
            let message = state.finish();
            if self.outgoing.push(message).is_err() {
                MixerCounters::add(&self.counters.dropped_messages, 1);
            }
        }
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Rendering
    // ─────────────────────────────────────────────────────────────────────────

    fn render_buses(&mut self, out: &mut [Sample], num_frames: usize) {
        let parts = split(self.data.as_deref_mut());
        let mut renderer = BusRenderer {
            slots: EventSlots {
                data: parts.events,
                freeform: &mut self.freeform,
            },
            env: RenderEnv {
                sounds: parts.sounds,
                wave_banks: parts.wave_banks,
                rng: &mut self.rng,
                counters: &self.counters,
            },
            outbox: &mut self.outgoing,
            bus_scratch: &mut self.bus_scratch,
            event_scratch: &mut self.event_scratch,
            num_channels: self.format.num_channels,
            num_frames,
        };

        renderer.render_events(&mut self.freeform_bus, out, 1.0, [1.0; 2]);

        let buses = parts.buses;
        if let Some(master) = buses.get(parts.master) {
            let pitch = master.params.pitch;
            let gain = master.params.gain;
            renderer.render_bus(buses, parts.master, out, pitch, gain);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::AudioData;
    use crate::engine::definition::EventDefinition;
    use crate::engine::gc::gc_handle;
    use crate::engine::shared::EventParams;

    const FORMAT: MixerFormat = MixerFormat {
        sample_rate: 1000,
        num_channels: 2,
        max_frames: 4,
        freeform_capacity: 4,
    };

    fn mixer() -> (Mixer, Arc<Mutex<SharedState>>, Arc<MixerCounters>) {
        let shared = Arc::new(Mutex::new(SharedState::new(16, FORMAT.freeform_capacity)));
        let counters = Arc::new(MixerCounters::default());
        let mixer = Mixer::new(FORMAT, 16, shared.clone(), counters.clone());
        (mixer, shared, counters)
    }

    fn start_freeform(shared: &Mutex<SharedState>, slot: usize, samples: Vec<i16>) -> EventHandle {
        let handle = EventHandle::freeform(slot).unwrap();
        let definition = EventDefinition::freeform(AudioData::from_pcm(1, samples), false);
        let voice = RenderState::new(handle, Shared::new(&gc_handle(), definition));
        let mut shared = shared.lock().unwrap();
        shared.event_mut(handle).unwrap().store(&EventParams {
            gain: [1.0, 1.0],
            ..EventParams::default()
        });
        shared
            .to_mixer
            .push(ToMixer::EventStart {
                event: handle,
                fade_in_secs: 0.0,
                voice: Some(Owned::new(&gc_handle(), voice)),
                stream: None,
            })
            .ok()
            .unwrap();
        handle
    }

    #[test]
    fn test_renders_silence_without_data() {
        let (mut mixer, shared, _) = mixer();
        let mut out = vec![1.0; 8];
        mixer.render(&mut out, 4);
        assert_eq!(out, vec![0.0; 8]);
        assert_eq!(shared.lock().unwrap().stats.get().frames_mixed, 4);
    }

    #[test]
    fn test_freeform_event_plays_and_reports_stop() {
        let (mut mixer, shared, _) = mixer();
        let handle = start_freeform(&shared, 0, vec![16384; 6]);

        // Longer than the internal pass size, so it is split in two
        let mut out = vec![0.0; 16];
        mixer.render(&mut out, 8);
        assert!(out[..12].iter().all(|s| (s - 0.5).abs() < 1e-3));
        assert!(out[12..].iter().all(|s| *s == 0.0));

        let shared = shared.lock().unwrap();
        let messages: Vec<_> = shared.from_mixer.iter().copied().collect();
        assert_eq!(messages, vec![FromMixer::EventStopped(handle)]);
    }

    #[test]
    fn test_meters_and_clipping() {
        let (mut mixer, shared, _) = mixer();
        shared.lock().unwrap().engine.store(&EngineParams {
            level_metering: true,
            ..EngineParams::default()
        });
        start_freeform(&shared, 0, vec![32767; 16]);
        start_freeform(&shared, 1, vec![32767; 16]);

        let mut out = vec![0.0; 8];
        mixer.render(&mut out, 4);
        assert!(out.iter().all(|s| *s == 1.0));
        let stats = *shared.lock().unwrap().stats.get();
        assert_eq!(stats.peak, [1.0, 1.0]);
        assert!(stats.clipped);
    }

    #[test]
    fn test_full_scale_is_not_clipping() {
        let (mut mixer, shared, _) = mixer();
        shared.lock().unwrap().engine.store(&EngineParams {
            level_metering: true,
            ..EngineParams::default()
        });
        start_freeform(&shared, 0, vec![16384; 16]);
        start_freeform(&shared, 1, vec![16384; 16]);

        let mut out = vec![0.0; 8];
        mixer.render(&mut out, 4);
        assert!(out.iter().all(|s| *s == 1.0));
        let stats = *shared.lock().unwrap().stats.get();
        assert_eq!(stats.peak, [1.0, 1.0]);
        assert!(!stats.clipped);
    }

    #[test]
    fn test_paused_engine_is_silent() {
        let (mut mixer, shared, _) = mixer();
        shared.lock().unwrap().engine.store(&EngineParams {
            level_metering: true,
            paused: true,
            ..EngineParams::default()
        });
        start_freeform(&shared, 0, vec![32767; 16]);

        let mut out = vec![0.0; 8];
        mixer.render(&mut out, 4);
        assert_eq!(out, vec![0.0; 8]);
        assert_eq!(shared.lock().unwrap().stats.get().peak, [0.0, 0.0]);
    }

    #[test]
    fn test_held_lock_is_counted_not_waited_on() {
        let (mut mixer, shared, counters) = mixer();
        let _guard = shared.lock().unwrap();
        let mut out = vec![0.0; 8];
        mixer.render(&mut out, 4);
        assert_eq!(counters.snapshot().lock_misses, 3);
    }

    #[test]
    fn test_freeform_stop_requests_unload() {
        let (mut mixer, shared, _) = mixer();
        let handle = start_freeform(&shared, 0, vec![1000; 64]);
        let mut out = vec![0.0; 8];
        mixer.render(&mut out, 4);

        shared
            .lock()
            .unwrap()
            .to_mixer
            .push(ToMixer::FreeformEventStop(handle))
            .ok()
            .unwrap();
        mixer.render(&mut out, 4);
        assert!(mixer.freeform[0].is_none());
        let messages: Vec<_> = shared.lock().unwrap().from_mixer.iter().copied().collect();
        assert_eq!(messages, vec![FromMixer::UnloadFreeformEvent(handle)]);
    }
}
