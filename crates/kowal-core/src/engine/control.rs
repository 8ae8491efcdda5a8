//! The control engine
//!
//! [`Engine`] is the non-realtime half of the engine. It owns the loaded
//! definitions, hands out handles, runs the positional and preset math once
//! per [`Engine::update`] and talks to the [`Mixer`] only through the
//! message queues and the shared parameter slots.
//!
//! The host calls `update` at its own cadence, typically once per frame:
//!
//! ```ignore
//! let (mut engine, mixer) = Engine::new(&EngineConfig::default())?;
//! // move `mixer` into the audio callback, then:
//! engine.load_engine_data("game.kwl")?;
//! let hit = engine.event_handle("hit")?;
//! engine.start_event(hit, 0.0)?;
//! loop {
//!     engine.update(dt)?;
//! }
//! ```

use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};
use std::thread;
use std::time::Duration;

use basedrop::{Owned, Shared};
use crossbeam::channel::{unbounded, Receiver, Sender};
use glam::Vec3;
use rand::rngs::StdRng;
use rand::SeedableRng;

use super::definition::{EventDefinition, StealingMode};
use super::dsp::{self, DspUnitHandle};
use super::gc::gc_handle;
use super::handle::{EventHandle, MixBusHandle, MixPresetHandle, WaveBankHandle};
use super::instance::{EventInstance, RenderState};
use super::message::{FromMixer, MessageQueue, ToMixer};
use super::mixbus::{MixBus, MixerBus};
use super::mixer::{Mixer, MixerData, MixerFormat};
use super::positional::{DistanceAttenuation, DistanceModel, Listener, PositionalSettings};
use super::preset::{self, MixPreset};
use super::shared::{CounterSnapshot, EngineParams, MixerCounters, MixerStats, SharedState, SharedValue};
use crate::config::EngineConfig;
use crate::data::{
    identify_wave_bank, read_wave_bank_entries, read_wave_bank_file, EngineData, InputStream,
    WaveBank, WaveBankAudio, WaveBankLayout,
};
use crate::error::{KwlError, KwlResult};
use crate::types::log_gain_to_linear;

/// Poll interval of the blocking unload operations
const BLOCKING_POLL_INTERVAL: Duration = Duration::from_millis(1);

/// Called once a threaded wave bank load has been installed or has failed
pub type WaveBankLoadedCallback = Box<dyn FnOnce(KwlResult<WaveBankHandle>) + Send>;

/// Control-side records of one event definition
pub(super) struct DefinitionSlot {
    pub definition: Shared<EventDefinition>,
    pub instances: Vec<EventInstance>,
    pub stealing: StealingMode,
}

/// Control-side view of the loaded engine data
pub(super) struct ControlData {
    pub definitions: Vec<DefinitionSlot>,
    pub buses: Vec<MixBus>,
    pub presets: Vec<MixPreset>,
    pub wave_banks: Vec<WaveBank>,
}

pub(super) struct FreeformEvent {
    pub instance: EventInstance,
    /// The host released the event while it was playing
    pub release_requested: bool,
}

/// Result of a wave bank read on the loader thread
struct WaveBankLoad {
    bank_id: Option<String>,
    result: KwlResult<(usize, WaveBankAudio)>,
    callback: WaveBankLoadedCallback,
}

/// Look up an instance without borrowing the whole engine
pub(super) fn lookup<'a>(
    data: &'a mut Option<ControlData>,
    freeform: &'a mut [Option<FreeformEvent>],
    handle: EventHandle,
) -> Option<&'a mut EventInstance> {
    if handle.is_freeform() {
        freeform
            .get_mut(handle.table_index())?
            .as_mut()
            .map(|event| &mut event.instance)
    } else {
        data.as_mut()?
            .definitions
            .get_mut(handle.table_index())?
            .instances
            .get_mut(handle.instance_index())
    }
}

/// The control half of the engine
pub struct Engine {
    pub(super) config: EngineConfig,
    shared: Arc<Mutex<SharedState>>,
    counters: Arc<MixerCounters>,
    last_counters: CounterSnapshot,
    pub(super) outgoing: MessageQueue<ToMixer>,
    incoming: MessageQueue<FromMixer>,

    pub(super) data: Option<ControlData>,
    /// `PrepareEngineDataUnload` is on its way to the mixer
    pub(super) unload_pending: bool,
    pub(super) freeform: Vec<Option<FreeformEvent>>,
    /// Instances the mixer may be rendering
    pub(super) playing: Vec<EventHandle>,
    pub(super) active_decoders: usize,

    pub(super) listener: Listener,
    pub(super) positional: PositionalSettings,
    /// Control slot of the engine-wide parameters
    params: EngineParams,
    /// Mixer readings as of the last update
    stats: MixerStats,
    frames_mixed_read: Option<u64>,

    pub(super) rng: StdRng,
    load_tx: Sender<WaveBankLoad>,
    load_rx: Receiver<WaveBankLoad>,
}

impl Engine {
    /// Create the control engine and the mixer that belongs to it
    pub fn new(config: &EngineConfig) -> KwlResult<(Engine, Mixer)> {
        config.validate()?;

        let params = EngineParams {
            level_metering: config.level_metering,
            ..EngineParams::default()
        };
        let mut state = SharedState::new(config.message_queue_capacity, config.freeform_capacity);
        state.engine.store(&params);
        let shared = Arc::new(Mutex::new(state));
        let counters = Arc::new(MixerCounters::default());

        let format = MixerFormat {
            sample_rate: config.sample_rate,
            num_channels: config.output_channels,
            max_frames: config.buffer_size,
            freeform_capacity: config.freeform_capacity,
        };
        let mixer = Mixer::new(
            format,
            config.message_queue_capacity,
            shared.clone(),
            counters.clone(),
        );

        let (load_tx, load_rx) = unbounded();
        let engine = Engine {
            config: config.clone(),
            shared,
            counters,
            last_counters: CounterSnapshot::default(),
            outgoing: MessageQueue::with_capacity(config.message_queue_capacity),
            incoming: MessageQueue::with_capacity(config.message_queue_capacity),
            data: None,
            unload_pending: false,
            freeform: (0..config.freeform_capacity).map(|_| None).collect(),
            playing: Vec::new(),
            active_decoders: 0,
            listener: Listener::default(),
            positional: PositionalSettings::default(),
            params,
            stats: MixerStats::default(),
            frames_mixed_read: None,
            rng: StdRng::from_os_rng(),
            load_tx,
            load_rx,
        };

        log::info!(
            "Engine: created ({} Hz, {} out / {} in channels, {} frames per pass)",
            config.sample_rate,
            config.output_channels,
            config.input_channels,
            config.buffer_size
        );
        Ok((engine, mixer))
    }

    #[inline]
    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Send a command with the next update
    pub(super) fn send(&mut self, message: ToMixer) -> KwlResult<()> {
        self.outgoing
            .push(message)
            .map_err(|_| KwlError::MessageQueueFull)
    }

    pub(super) fn instance(&self, handle: EventHandle) -> KwlResult<&EventInstance> {
        let instance = if handle.is_freeform() {
            self.freeform
                .get(handle.table_index())
                .and_then(|slot| slot.as_ref())
                .map(|event| &event.instance)
        } else {
            self.data
                .as_ref()
                .and_then(|data| data.definitions.get(handle.table_index()))
                .and_then(|slot| slot.instances.get(handle.instance_index()))
        };
        instance.ok_or(KwlError::InvalidEventInstanceHandle(handle.raw()))
    }

    pub(super) fn instance_mut(&mut self, handle: EventHandle) -> KwlResult<&mut EventInstance> {
        lookup(&mut self.data, &mut self.freeform, handle)
            .ok_or(KwlError::InvalidEventInstanceHandle(handle.raw()))
    }

    pub(super) fn data(&self) -> KwlResult<&ControlData> {
        self.data.as_ref().ok_or(KwlError::EngineDataNotLoaded)
    }

    pub(super) fn data_mut(&mut self) -> KwlResult<&mut ControlData> {
        self.data.as_mut().ok_or(KwlError::EngineDataNotLoaded)
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Update tick
    // ─────────────────────────────────────────────────────────────────────────

    /// Advance the engine by `dt` seconds and exchange state with the mixer
    pub fn update(&mut self, dt: f32) -> KwlResult<()> {
        if !(dt >= 0.0) {
            return Err(KwlError::InvalidParameterValue("time step must be >= 0"));
        }

        self.install_threaded_loads();

        {
            let Self {
                playing,
                data,
                freeform,
                listener,
                positional,
                ..
            } = self;
            for &handle in playing.iter() {
                if let Some(instance) = lookup(data, freeform, handle) {
                    instance.update_params(listener, positional);
                }
            }
        }

        if let Some(data) = self.data.as_mut() {
            preset::update(
                &mut data.presets,
                &mut data.buses,
                dt,
                self.config.preset_fade_secs,
            );
        }

        for unit in [&self.params.input_dsp, &self.params.output_dsp]
            .into_iter()
            .flatten()
        {
            dsp::update_engine(unit);
        }
        if let Some(data) = self.data.as_ref() {
            for unit in data.buses.iter().filter_map(|bus| bus.dsp.as_ref()) {
                dsp::update_engine(unit);
            }
        }

        let waiting = {
            let mut shared = self.shared.lock().unwrap_or_else(PoisonError::into_inner);
            let waiting = self.outgoing.move_into(&mut shared.to_mixer);
            shared.from_mixer.drain_into(&mut self.incoming);

            for &handle in &self.playing {
                let instance = lookup(&mut self.data, &mut self.freeform, handle);
                if let (Some(instance), Some(slot)) = (instance, shared.event_mut(handle)) {
                    slot.store(&instance.params);
                }
            }
            if let Some(data) = self.data.as_ref() {
                for (bus, slot) in data.buses.iter().zip(shared.buses.iter_mut()) {
                    slot.store(&bus.params());
                }
            }
            shared.engine.store(&self.params);
            self.stats = *shared.stats.get();
            waiting
        };
        if waiting > 0 {
            log::debug!("Engine: {} commands wait for the mixer to catch up", waiting);
        }

        self.process_notifications();
        self.log_counters();
        Ok(())
    }

    fn process_notifications(&mut self) {
        let notifications: Vec<FromMixer> = self.incoming.drain().collect();
        let mut unload_data = false;

        for notification in notifications {
            match notification {
                FromMixer::EventStopped(handle) => self.on_event_stopped(handle, false),
                FromMixer::UnloadFreeformEvent(handle) => self.on_event_stopped(handle, true),
                FromMixer::UnloadWaveBank(index) => {
                    if let Some(bank) = self
                        .data
                        .as_mut()
                        .and_then(|data| data.wave_banks.get_mut(index))
                    {
                        if bank.confirm_unload() {
                            log::info!("Engine: unloaded wave bank '{}'", bank.layout.id);
                        } else {
                            log::debug!("Engine: wave bank '{}' was reloaded, kept", bank.layout.id);
                        }
                    }
                }
                FromMixer::UnloadEngineData => unload_data = true,
            }
        }

        // After everything else, so stop notifications still find their instances
        if unload_data {
            self.finish_engine_data_unload();
        }
    }

    fn on_event_stopped(&mut self, handle: EventHandle, unload: bool) {
        self.playing.retain(|h| *h != handle);

        let Some(instance) = lookup(&mut self.data, &mut self.freeform, handle) else {
            return;
        };
        instance.is_playing = false;
        if instance.decoder.take().is_some() {
            self.active_decoders = self.active_decoders.saturating_sub(1);
        }
        instance.notify_stopped();
        log::trace!("Engine: event {} stopped", handle);

        if handle.is_freeform() {
            if let Some(slot) = self.freeform.get_mut(handle.table_index()) {
                if unload || slot.as_ref().is_some_and(|event| event.release_requested) {
                    *slot = None;
                    log::debug!("Engine: released freeform event {}", handle);
                }
            }
        }
    }

    fn log_counters(&mut self) {
        let now = self.counters.snapshot();
        let last = self.last_counters;
        if now == last {
            return;
        }
        if now.dropped_messages > last.dropped_messages {
            log::warn!(
                "Mixer: dropped {} messages (queue full)",
                now.dropped_messages - last.dropped_messages
            );
        }
        if now.missed_buffers > last.missed_buffers {
            log::warn!(
                "Mixer: {} stream buffers were not decoded in time",
                now.missed_buffers - last.missed_buffers
            );
        }
        if now.lock_misses > last.lock_misses {
            log::debug!(
                "Mixer: {} parameter syncs skipped (lock busy)",
                now.lock_misses - last.lock_misses
            );
        }
        if now.busy_dsp_units > last.busy_dsp_units {
            log::debug!(
                "Mixer: skipped {} busy DSP units",
                now.busy_dsp_units - last.busy_dsp_units
            );
        }
        self.last_counters = now;
    }

    /// Totals of the mixer's realtime counters
    pub fn counters(&self) -> CounterSnapshot {
        self.counters.snapshot()
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Engine data
    // ─────────────────────────────────────────────────────────────────────────

    #[inline]
    pub fn is_engine_data_loaded(&self) -> bool {
        self.data.is_some()
    }

    /// Load engine data from a file
    pub fn load_engine_data<P: AsRef<Path>>(&mut self, path: P) -> KwlResult<()> {
        self.check_can_load()?;
        let data = EngineData::load(path)?;
        self.install_engine_data(data)
    }

    /// Load engine data from memory
    pub fn load_engine_data_from_bytes(&mut self, bytes: impl Into<Arc<[u8]>>) -> KwlResult<()> {
        self.check_can_load()?;
        let data = EngineData::from_bytes(bytes.into())?;
        self.install_engine_data(data)
    }

    fn check_can_load(&self) -> KwlResult<()> {
        if self.data.is_some() {
            return Err(KwlError::EngineAlreadyLoaded);
        }
        if self.outgoing.remaining() == 0 {
            return Err(KwlError::MessageQueueFull);
        }
        Ok(())
    }

    fn install_engine_data(&mut self, data: EngineData) -> KwlResult<()> {
        let EngineData {
            mut buses,
            master,
            mut presets,
            wave_banks,
            sounds,
            events,
        } = data;
        preset::update(&mut presets, &mut buses, 0.0, self.config.preset_fade_secs);

        let gc = gc_handle();
        let mut definitions = Vec::with_capacity(events.len());
        let mut render_states = Vec::with_capacity(events.len());
        let mut bus_capacity = vec![0usize; buses.len()];

        for (index, definition) in events.into_iter().enumerate() {
            if let Some(capacity) = definition.mix_bus.and_then(|bus| bus_capacity.get_mut(bus)) {
                *capacity += definition.num_instances;
            }
            let definition = Shared::new(&gc, definition);
            let mut instances = Vec::with_capacity(definition.num_instances);
            let mut states = Vec::with_capacity(definition.num_instances);
            for instance in 0..definition.num_instances {
                let handle = EventHandle::data(index, instance)?;
                instances.push(EventInstance::new(handle, definition.clone()));
                states.push(RenderState::new(handle, definition.clone()));
            }
            definitions.push(DefinitionSlot {
                stealing: definition.stealing,
                definition,
                instances,
            });
            render_states.push(states);
        }

        let mixer_buses = buses
            .iter()
            .zip(&bus_capacity)
            .map(|(bus, &capacity)| MixerBus::new(bus.sub_buses.clone(), capacity, bus.params()))
            .collect();
        let mixer_data = MixerData::new(mixer_buses, master, sounds, render_states, wave_banks.len());

        {
            let mut shared = self.shared.lock().unwrap_or_else(PoisonError::into_inner);
            shared.events = definitions
                .iter()
                .map(|slot| vec![SharedValue::default(); slot.instances.len()])
                .collect();
            shared.buses = buses
                .iter()
                .map(|bus| SharedValue::new(bus.params()))
                .collect();
        }
        self.send(ToMixer::SetMasterBus(Owned::new(&gc, mixer_data)))?;

        log::info!(
            "Engine: loaded engine data ({} events, {} buses, {} presets, {} wave banks)",
            definitions.len(),
            buses.len(),
            presets.len(),
            wave_banks.len()
        );
        self.data = Some(ControlData {
            definitions,
            buses,
            presets,
            wave_banks: wave_banks.into_iter().map(WaveBank::new).collect(),
        });
        Ok(())
    }

    /// Ask the mixer to release the engine data
    ///
    /// The data stays loaded until the mixer confirms; [`Engine::update`]
    /// finishes the unload.
    pub fn request_unload_engine_data(&mut self) -> KwlResult<()> {
        self.data()?;
        if self.unload_pending {
            return Ok(());
        }
        self.send(ToMixer::PrepareEngineDataUnload)?;
        self.unload_pending = true;
        log::info!("Engine: engine data unload requested");
        Ok(())
    }

    /// Unload the engine data, blocking until the mixer has let go of it
    ///
    /// Needs a running mixer; never call this from the audio thread.
    pub fn unload_engine_data(&mut self) -> KwlResult<()> {
        self.request_unload_engine_data()?;
        while self.data.is_some() {
            self.update(0.0)?;
            thread::sleep(BLOCKING_POLL_INTERVAL);
        }
        Ok(())
    }

    fn finish_engine_data_unload(&mut self) {
        let Some(mut data) = self.data.take() else {
            return;
        };
        for instance in data
            .definitions
            .iter_mut()
            .flat_map(|slot| slot.instances.iter_mut())
            .filter(|instance| instance.is_playing)
        {
            instance.is_playing = false;
            if instance.decoder.take().is_some() {
                self.active_decoders = self.active_decoders.saturating_sub(1);
            }
            instance.notify_stopped();
        }
        self.playing.retain(|handle| handle.is_freeform());
        self.unload_pending = false;

        {
            let mut shared = self.shared.lock().unwrap_or_else(PoisonError::into_inner);
            shared.events.clear();
            shared.buses.clear();
        }
        log::info!("Engine: engine data unloaded");
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Wave banks
    // ─────────────────────────────────────────────────────────────────────────

    fn wave_bank_layouts(&self) -> KwlResult<Vec<WaveBankLayout>> {
        Ok(self
            .data()?
            .wave_banks
            .iter()
            .map(|bank| bank.layout.clone())
            .collect())
    }

    fn wave_bank(&self, handle: WaveBankHandle) -> KwlResult<&WaveBank> {
        self.data()?
            .wave_banks
            .get(handle.0)
            .ok_or(KwlError::InvalidWaveBankHandle(handle.0))
    }

    /// Audio of a loaded wave bank
    pub(super) fn wave_bank_audio(&self, index: usize) -> Option<Shared<WaveBankAudio>> {
        self.data
            .as_ref()?
            .wave_banks
            .get(index)?
            .audio
            .clone()
    }

    /// Load a wave bank file; entries flagged for streaming stay on disk
    pub fn load_wave_bank<P: AsRef<Path>>(&mut self, path: P) -> KwlResult<WaveBankHandle> {
        let path = path.as_ref();
        let layouts = self.wave_bank_layouts()?;
        let mut stream = InputStream::open(path)?;
        let index = identify_wave_bank(&mut stream, &layouts)?;
        if self.wave_bank(WaveBankHandle(index))?.is_resident() {
            return Ok(WaveBankHandle(index));
        }
        let audio = read_wave_bank_entries(&mut stream, &layouts[index], Some(path))?;
        self.install_wave_bank(index, audio)
    }

    /// Load a wave bank from memory
    pub fn load_wave_bank_from_bytes(&mut self, bytes: impl Into<Arc<[u8]>>) -> KwlResult<WaveBankHandle> {
        let layouts = self.wave_bank_layouts()?;
        let mut stream = InputStream::from_bytes(bytes.into());
        let index = identify_wave_bank(&mut stream, &layouts)?;
        if self.wave_bank(WaveBankHandle(index))?.is_resident() {
            return Ok(WaveBankHandle(index));
        }
        let audio = read_wave_bank_entries(&mut stream, &layouts[index], None)?;
        self.install_wave_bank(index, audio)
    }

    /// Load a wave bank file on a loader thread
    ///
    /// The bank is installed and `callback` invoked by a later
    /// [`Engine::update`].
    pub fn load_wave_bank_threaded<P, F>(&mut self, path: P, callback: F) -> KwlResult<()>
    where
        P: AsRef<Path>,
        F: FnOnce(KwlResult<WaveBankHandle>) + Send + 'static,
    {
        let layouts = self.wave_bank_layouts()?;
        let path: PathBuf = path.as_ref().to_path_buf();
        let tx = self.load_tx.clone();
        let callback: WaveBankLoadedCallback = Box::new(callback);

        thread::Builder::new()
            .name("kowal-wavebank-loader".to_string())
            .spawn(move || {
                log::info!("[LOADER] Reading wave bank {:?}", path);
                let result = read_wave_bank_file(&path, &layouts);
                let bank_id = result
                    .as_ref()
                    .ok()
                    .map(|(index, _)| layouts[*index].id.clone());
                if let Err(e) = &result {
                    log::error!("[LOADER] Failed to read wave bank {:?}: {}", path, e);
                }
                let _ = tx.send(WaveBankLoad {
                    bank_id,
                    result,
                    callback,
                });
            })?;
        Ok(())
    }

    fn install_threaded_loads(&mut self) {
        while let Ok(load) = self.load_rx.try_recv() {
            let result = load.result.and_then(|(index, audio)| {
                let bank = self.wave_bank(WaveBankHandle(index))?;
                // The engine data may have been swapped while the thread ran
                if Some(&bank.layout.id) != load.bank_id.as_ref() {
                    return Err(KwlError::NoMatchingWaveBank(
                        load.bank_id.clone().unwrap_or_default(),
                    ));
                }
                if bank.is_resident() {
                    return Ok(WaveBankHandle(index));
                }
                self.install_wave_bank(index, audio)
            });
            (load.callback)(result);
        }
    }

    fn install_wave_bank(&mut self, index: usize, audio: WaveBankAudio) -> KwlResult<WaveBankHandle> {
        let audio = Shared::new(&gc_handle(), audio);
        self.send(ToMixer::WaveBankLoaded {
            bank: index,
            audio: audio.clone(),
        })?;

        let bank = self
            .data_mut()?
            .wave_banks
            .get_mut(index)
            .ok_or(KwlError::InvalidWaveBankHandle(index))?;
        bank.audio = Some(audio);
        if bank.unload_pending {
            // The mixer sees the reload after the stop, so its confirmation is stale
            bank.unload_pending = false;
            bank.cancelled_unloads += 1;
        }
        log::info!(
            "Engine: loaded wave bank '{}' ({} entries)",
            bank.layout.id,
            bank.layout.entries.len()
        );
        Ok(WaveBankHandle(index))
    }

    /// Stop every event using the bank and release its audio
    ///
    /// The audio is dropped once the mixer confirms. With `blocking` set
    /// this waits for that, which needs a running mixer.
    pub fn request_unload_wave_bank(&mut self, handle: WaveBankHandle, blocking: bool) -> KwlResult<()> {
        let bank = self.wave_bank(handle)?;
        if !bank.is_loaded() {
            return Ok(());
        }
        if !bank.unload_pending {
            self.send(ToMixer::StopAllReferencingWaveBank(handle.0))?;
            if let Some(bank) = self
                .data
                .as_mut()
                .and_then(|data| data.wave_banks.get_mut(handle.0))
            {
                bank.unload_pending = true;
            }
            log::debug!("Engine: unload of wave bank {} requested", handle.0);
        }

        if blocking {
            while self.is_wave_bank_loaded(handle)? {
                self.update(0.0)?;
                thread::sleep(BLOCKING_POLL_INTERVAL);
            }
        }
        Ok(())
    }

    pub fn is_wave_bank_loaded(&self, handle: WaveBankHandle) -> KwlResult<bool> {
        Ok(self.wave_bank(handle)?.is_loaded())
    }

    /// True while any playing event may read from the bank
    pub fn is_wave_bank_referenced_by_playing_event(&self, handle: WaveBankHandle) -> KwlResult<bool> {
        self.wave_bank(handle)?;
        let data = self.data()?;
        Ok(data.definitions.iter().any(|slot| {
            slot.definition.references_wave_bank(handle.0)
                && slot.instances.iter().any(|instance| instance.is_playing)
        }))
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Mix buses and presets
    // ─────────────────────────────────────────────────────────────────────────

    pub fn mix_bus_handle(&self, id: &str) -> KwlResult<MixBusHandle> {
        self.data()?
            .buses
            .iter()
            .position(|bus| bus.id == id)
            .map(MixBusHandle)
            .ok_or_else(|| KwlError::UnknownMixBusId(id.to_string()))
    }

    fn mix_bus_mut(&mut self, handle: MixBusHandle) -> KwlResult<&mut MixBus> {
        self.data_mut()?
            .buses
            .get_mut(handle.0)
            .ok_or(KwlError::InvalidMixBusHandle(handle.0))
    }

    /// Set a bus's user gain per channel, as log gain unless `linear`
    pub fn set_mix_bus_gain(&mut self, handle: MixBusHandle, gain: [f32; 2], linear: bool) -> KwlResult<()> {
        if gain.iter().any(|g| !(*g >= 0.0)) {
            return Err(KwlError::InvalidParameterValue("gain must be >= 0"));
        }
        let bus = self.mix_bus_mut(handle)?;
        bus.user_gain = if linear {
            gain
        } else {
            gain.map(log_gain_to_linear)
        };
        Ok(())
    }

    pub fn set_mix_bus_pitch(&mut self, handle: MixBusHandle, pitch: f32) -> KwlResult<()> {
        if !(pitch >= 0.0) {
            return Err(KwlError::InvalidParameterValue("pitch must be >= 0"));
        }
        self.mix_bus_mut(handle)?.user_pitch = pitch;
        Ok(())
    }

    /// Attach a DSP unit to a bus, or detach with `None`
    pub fn attach_dsp_to_mix_bus(&mut self, handle: MixBusHandle, unit: Option<DspUnitHandle>) -> KwlResult<()> {
        self.mix_bus_mut(handle)?.dsp = unit;
        Ok(())
    }

    pub fn mix_preset_handle(&self, id: &str) -> KwlResult<MixPresetHandle> {
        self.data()?
            .presets
            .iter()
            .position(|preset| preset.id == id)
            .map(MixPresetHandle)
            .ok_or_else(|| KwlError::UnknownMixPresetId(id.to_string()))
    }

    /// Fade (or jump) to a preset
    pub fn set_active_mix_preset(&mut self, handle: MixPresetHandle, fade: bool) -> KwlResult<()> {
        let fade_secs = self.config.preset_fade_secs;
        let data = self.data_mut()?;
        if handle.0 >= data.presets.len() {
            return Err(KwlError::InvalidMixPresetHandle(handle.0));
        }
        preset::activate(&mut data.presets, handle.0, fade);
        if !fade {
            preset::update(&mut data.presets, &mut data.buses, 0.0, fade_secs);
        }
        Ok(())
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Listener and positional settings
    // ─────────────────────────────────────────────────────────────────────────

    pub fn set_listener_position(&mut self, position: Vec3) {
        self.listener.position = position;
    }

    pub fn set_listener_velocity(&mut self, velocity: Vec3) {
        self.listener.velocity = velocity;
    }

    pub fn set_listener_orientation(&mut self, direction: Vec3, up: Vec3) -> KwlResult<()> {
        self.listener.set_orientation(direction, up)
    }

    /// Cone angles are full angles in degrees
    pub fn set_listener_cone(&mut self, inner_degrees: f32, outer_degrees: f32, outer_gain: f32) -> KwlResult<()> {
        self.listener.set_cone(inner_degrees, outer_degrees, outer_gain)
    }

    pub fn set_distance_attenuation(
        &mut self,
        model: DistanceModel,
        clamp: bool,
        max_distance: f32,
        rolloff: f32,
        reference_distance: f32,
    ) -> KwlResult<()> {
        self.positional.distance =
            DistanceAttenuation::new(model, clamp, max_distance, rolloff, reference_distance)?;
        Ok(())
    }

    pub fn set_doppler(&mut self, speed_of_sound: f32, doppler_scale: f32) -> KwlResult<()> {
        self.positional.set_doppler(speed_of_sound, doppler_scale)
    }

    pub fn set_event_cones_enabled(&mut self, enabled: bool) {
        self.positional.event_cones = enabled;
    }

    pub fn set_listener_cone_enabled(&mut self, enabled: bool) {
        self.positional.listener_cone = enabled;
    }

    #[inline]
    pub fn listener(&self) -> &Listener {
        &self.listener
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Engine-wide DSP, meters and pause
    // ─────────────────────────────────────────────────────────────────────────

    /// Attach the unit captured input runs through, or detach with `None`
    pub fn attach_dsp_to_input(&mut self, unit: Option<DspUnitHandle>) {
        self.params.input_dsp = unit;
    }

    /// Attach the unit the final mix runs through, or detach with `None`
    pub fn attach_dsp_to_output(&mut self, unit: Option<DspUnitHandle>) {
        self.params.output_dsp = unit;
    }

    pub fn set_level_metering_enabled(&mut self, enabled: bool) {
        self.params.level_metering = enabled;
    }

    /// Peak output levels (left, right) as of the last update
    pub fn output_levels(&self) -> KwlResult<(f32, f32)> {
        if !self.params.level_metering {
            return Err(KwlError::LevelMeteringDisabled);
        }
        Ok((self.stats.peak[0], self.stats.peak[1]))
    }

    /// Whether the output clipped since the previous reading the mixer published
    pub fn has_clipped(&self) -> KwlResult<bool> {
        if !self.params.level_metering {
            return Err(KwlError::LevelMeteringDisabled);
        }
        Ok(self.stats.clipped)
    }

    /// Frames mixed since the previous call; the first call returns 0
    pub fn num_frames_mixed(&mut self) -> u64 {
        let total = self.stats.frames_mixed;
        let delta = self
            .frames_mixed_read
            .map_or(0, |previous| total.saturating_sub(previous));
        self.frames_mixed_read = Some(total);
        delta
    }

    pub fn pause_engine(&mut self) {
        self.params.paused = true;
    }

    pub fn resume_engine(&mut self) {
        self.params.paused = false;
    }

    #[inline]
    pub fn is_engine_paused(&self) -> bool {
        self.params.paused
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::engine_data_writer as writer;
    use crate::data::{
        WaveBankWriter, EVENTS_CHUNK_ID, MIX_BUSES_CHUNK_ID, MIX_PRESETS_CHUNK_ID, SOUNDS_CHUNK_ID,
        WAVE_BANKS_CHUNK_ID,
    };

    fn config() -> EngineConfig {
        EngineConfig {
            sample_rate: 1000,
            buffer_size: 64,
            ..EngineConfig::default()
        }
    }

    fn engine_data() -> Vec<u8> {
        writer::engine_data(&writer::all_chunks())
    }

    fn loaded() -> (Engine, Mixer) {
        let (mut engine, mixer) = Engine::new(&config()).unwrap();
        engine.load_engine_data_from_bytes(engine_data()).unwrap();
        (engine, mixer)
    }

    fn tick(engine: &mut Engine, mixer: &mut Mixer) {
        let mut out = vec![0.0; 64 * 2];
        engine.update(0.0).unwrap();
        mixer.render(&mut out, 64);
        engine.update(0.0).unwrap();
    }

    #[test]
    fn test_invalid_settings_are_rejected() {
        let config = EngineConfig {
            output_channels: 6,
            ..EngineConfig::default()
        };
        assert!(matches!(
            Engine::new(&config),
            Err(KwlError::UnsupportedNumOutputChannels(6))
        ));
    }

    #[test]
    fn test_negative_time_step_is_an_error() {
        let (mut engine, _mixer) = Engine::new(&config()).unwrap();
        assert!(matches!(
            engine.update(-0.1),
            Err(KwlError::InvalidParameterValue(_))
        ));
        assert!(engine.update(0.0).is_ok());
    }

    #[test]
    fn test_second_load_fails() {
        let (mut engine, _mixer) = loaded();
        assert!(matches!(
            engine.load_engine_data_from_bytes(engine_data()),
            Err(KwlError::EngineAlreadyLoaded)
        ));
    }

    #[test]
    fn test_failed_load_leaves_engine_empty() {
        let (mut engine, _mixer) = Engine::new(&config()).unwrap();
        let mut bytes = engine_data();
        bytes.truncate(bytes.len() / 2);
        assert!(engine.load_engine_data_from_bytes(bytes).is_err());
        assert!(!engine.is_engine_data_loaded());
        assert!(engine.load_engine_data_from_bytes(engine_data()).is_ok());
    }

    #[test]
    fn test_lookups_by_id() {
        let (engine, _mixer) = loaded();
        assert_eq!(engine.mix_bus_handle("master").unwrap(), MixBusHandle(0));
        assert_eq!(engine.mix_bus_handle("music").unwrap(), MixBusHandle(1));
        assert!(matches!(
            engine.mix_bus_handle("voice"),
            Err(KwlError::UnknownMixBusId(_))
        ));
        assert_eq!(engine.mix_preset_handle("default").unwrap(), MixPresetHandle(0));
        assert!(matches!(
            engine.mix_preset_handle("night"),
            Err(KwlError::UnknownMixPresetId(_))
        ));
    }

    #[test]
    fn test_lookups_without_data() {
        let (engine, _mixer) = Engine::new(&config()).unwrap();
        assert!(matches!(
            engine.mix_bus_handle("master"),
            Err(KwlError::EngineDataNotLoaded)
        ));
    }

    #[test]
    fn test_bus_setters_validate() {
        let (mut engine, _mixer) = loaded();
        let music = engine.mix_bus_handle("music").unwrap();
        assert!(engine.set_mix_bus_gain(music, [-1.0, 1.0], true).is_err());
        assert!(engine.set_mix_bus_pitch(music, -0.5).is_err());
        assert!(matches!(
            engine.set_mix_bus_pitch(MixBusHandle(9), 1.0),
            Err(KwlError::InvalidMixBusHandle(9))
        ));

        engine.set_mix_bus_gain(music, [0.5, 1.0], false).unwrap();
        let bus = &engine.data().unwrap().buses[1];
        assert_eq!(bus.user_gain, [0.0625, 1.0]);
    }

    #[test]
    fn test_unload_round_trip() {
        let (mut engine, mut mixer) = loaded();
        tick(&mut engine, &mut mixer);

        engine.request_unload_engine_data().unwrap();
        assert!(engine.is_engine_data_loaded());
        tick(&mut engine, &mut mixer);
        assert!(!engine.is_engine_data_loaded());

        // A fresh load works afterwards
        engine.load_engine_data_from_bytes(engine_data()).unwrap();
        tick(&mut engine, &mut mixer);
        assert!(engine.is_engine_data_loaded());
    }

    #[test]
    fn test_frames_mixed_is_a_delta() {
        let (mut engine, mut mixer) = Engine::new(&config()).unwrap();
        assert_eq!(engine.num_frames_mixed(), 0);
        tick(&mut engine, &mut mixer);
        assert_eq!(engine.num_frames_mixed(), 64);
        tick(&mut engine, &mut mixer);
        tick(&mut engine, &mut mixer);
        assert_eq!(engine.num_frames_mixed(), 128);
    }

    #[test]
    fn test_meters_need_metering() {
        let (mut engine, _mixer) = Engine::new(&config()).unwrap();
        assert!(matches!(
            engine.output_levels(),
            Err(KwlError::LevelMeteringDisabled)
        ));
        assert!(matches!(
            engine.has_clipped(),
            Err(KwlError::LevelMeteringDisabled)
        ));
        engine.set_level_metering_enabled(true);
        assert_eq!(engine.output_levels().unwrap(), (0.0, 0.0));
    }

    #[test]
    fn test_wave_bank_load_and_unload() {
        let (mut engine, mut mixer) = loaded();
        let bank = WaveBankWriter::new("sfx", 2)
            .pcm_entry("a.wav", 1, &[1000; 32])
            .pcm_entry("b.wav", 1, &[2000; 32])
            .finish();

        let handle = engine.load_wave_bank_from_bytes(bank.clone()).unwrap();
        assert!(engine.is_wave_bank_loaded(handle).unwrap());
        // Loading again is a no-op
        assert_eq!(engine.load_wave_bank_from_bytes(bank).unwrap(), handle);

        engine.request_unload_wave_bank(handle, false).unwrap();
        assert!(engine.is_wave_bank_loaded(handle).unwrap());
        tick(&mut engine, &mut mixer);
        assert!(!engine.is_wave_bank_loaded(handle).unwrap());
    }

    #[test]
    fn test_reload_cancels_a_pending_unload() {
        let (mut engine, mut mixer) = loaded();
        let bank = WaveBankWriter::new("sfx", 2)
            .pcm_entry("a.wav", 1, &[1000; 32])
            .pcm_entry("b.wav", 1, &[2000; 32])
            .finish();
        let handle = engine.load_wave_bank_from_bytes(bank.clone()).unwrap();
        tick(&mut engine, &mut mixer);

        engine.request_unload_wave_bank(handle, false).unwrap();
        assert_eq!(engine.load_wave_bank_from_bytes(bank).unwrap(), handle);
        tick(&mut engine, &mut mixer);
        tick(&mut engine, &mut mixer);
        assert!(engine.is_wave_bank_loaded(handle).unwrap());

        // A later unload still goes through
        engine.request_unload_wave_bank(handle, false).unwrap();
        tick(&mut engine, &mut mixer);
        assert!(!engine.is_wave_bank_loaded(handle).unwrap());
    }

    #[test]
    fn test_repeated_unload_request_is_sent_once() {
        let (mut engine, _mixer) = loaded();
        let bank = WaveBankWriter::new("sfx", 2)
            .pcm_entry("a.wav", 1, &[1000; 32])
            .pcm_entry("b.wav", 1, &[2000; 32])
            .finish();
        let handle = engine.load_wave_bank_from_bytes(bank).unwrap();
        let queued = engine.outgoing.len();
        engine.request_unload_wave_bank(handle, false).unwrap();
        engine.request_unload_wave_bank(handle, false).unwrap();
        assert_eq!(engine.outgoing.len(), queued + 1);
    }

    #[test]
    fn test_wave_bank_must_match_the_data() {
        let (mut engine, _mixer) = loaded();
        let unknown = WaveBankWriter::new("music", 1)
            .pcm_entry("a.wav", 1, &[0; 4])
            .finish();
        assert!(matches!(
            engine.load_wave_bank_from_bytes(unknown),
            Err(KwlError::NoMatchingWaveBank(_))
        ));

        let short = WaveBankWriter::new("sfx", 1)
            .pcm_entry("a.wav", 1, &[0; 4])
            .finish();
        assert!(matches!(
            engine.load_wave_bank_from_bytes(short),
            Err(KwlError::WaveBankEntryMismatch(_))
        ));
    }

    #[test]
    fn test_threaded_wave_bank_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("sfx.kwb");
        let bank = WaveBankWriter::new("sfx", 2)
            .pcm_entry("a.wav", 1, &[1000; 32])
            .pcm_entry("b.wav", 1, &[2000; 32])
            .finish();
        std::fs::write(&path, bank).unwrap();

        let (mut engine, _mixer) = loaded();
        let (tx, rx) = crossbeam::channel::bounded(1);
        engine
            .load_wave_bank_threaded(&path, move |result| {
                tx.send(result.map_err(|e| e.to_string())).unwrap();
            })
            .unwrap();

        let mut result = None;
        for _ in 0..1000 {
            engine.update(0.0).unwrap();
            if let Ok(r) = rx.try_recv() {
                result = Some(r);
                break;
            }
            thread::sleep(Duration::from_millis(2));
        }
        let handle = result.expect("loader never finished").unwrap();
        assert!(engine.is_wave_bank_loaded(handle).unwrap());
    }

    #[test]
    fn test_preset_switch_without_fade_applies_at_once() {
        // Two buses per preset: index, left and right log gain, pitch
        let presets = writer::Body::default()
            .i32(2)
            .string("default")
            .i32(1)
            .i32(0)
            .f32(1.0)
            .f32(1.0)
            .f32(1.0)
            .i32(1)
            .f32(1.0)
            .f32(1.0)
            .f32(1.0)
            .string("quiet")
            .i32(0)
            .i32(0)
            .f32(1.0)
            .f32(1.0)
            .f32(1.0)
            .i32(1)
            .f32(0.5)
            .f32(0.5)
            .f32(1.0);
        let bytes = writer::engine_data(&[
            (MIX_BUSES_CHUNK_ID, writer::buses()),
            (MIX_PRESETS_CHUNK_ID, presets),
            (WAVE_BANKS_CHUNK_ID, writer::wave_banks()),
            (SOUNDS_CHUNK_ID, writer::sounds()),
            (EVENTS_CHUNK_ID, writer::events()),
        ]);
        let (mut engine, _mixer) = Engine::new(&config()).unwrap();
        engine.load_engine_data_from_bytes(bytes).unwrap();

        let quiet = engine.mix_preset_handle("quiet").unwrap();
        engine.set_active_mix_preset(quiet, false).unwrap();
        let music = &engine.data().unwrap().buses[1];
        assert_eq!(music.preset_gain, [0.0625, 0.0625]);
        assert!(matches!(
            engine.set_active_mix_preset(MixPresetHandle(5), true),
            Err(KwlError::InvalidMixPresetHandle(5))
        ));
    }
}
