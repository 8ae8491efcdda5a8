//! Event operations of the control engine
//!
//! Data-driven events come from the loaded engine data; each definition
//! owns a fixed set of instances. Freeform events are created at runtime
//! from PCM and live in their own slot table until released.

use std::path::Path;

use basedrop::{Owned, Shared};
use glam::Vec3;
use rand::Rng;

use super::control::{lookup, Engine, FreeformEvent};
use super::definition::{EventDefinition, RetriggerMode, StealingMode};
use super::dsp::DspUnitHandle;
use super::gc::gc_handle;
use super::handle::{EventDefinitionHandle, EventHandle};
use super::instance::{EventInstance, RenderState, StoppedCallback};
use super::message::ToMixer;
use crate::data::{AudioData, PcmBuffer};
use crate::decoder::Decoder;
use crate::error::{KwlError, KwlResult};
use crate::types::log_gain_to_linear;

/// Whether a freeform event is placed in the world
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FreeformKind {
    Positional,
    NonPositional,
}

impl Engine {
    // ─────────────────────────────────────────────────────────────────────────
    // Handles
    // ─────────────────────────────────────────────────────────────────────────

    /// Claim an instance of the definition `id`
    pub fn event_handle(&mut self, id: &str) -> KwlResult<EventHandle> {
        let data = self.data_mut()?;
        let slot = data
            .definitions
            .iter_mut()
            .find(|slot| slot.definition.id == id)
            .ok_or_else(|| KwlError::UnknownEventDefinitionId(id.to_string()))?;
        let instance = slot
            .instances
            .iter_mut()
            .find(|instance| !instance.associated && !instance.is_playing)
            .ok_or(KwlError::NoFreeEventInstances)?;
        instance.associated = true;
        Ok(instance.handle)
    }

    /// Give an event handle back
    ///
    /// A data-driven instance keeps playing and forgets its user settings.
    /// A freeform event is freed, after its playback stops if it is playing.
    pub fn release_event(&mut self, handle: EventHandle) -> KwlResult<()> {
        if handle.is_freeform() {
            let playing = self.instance(handle)?.is_playing;
            if playing {
                self.send(ToMixer::FreeformEventStop(handle))?;
                if let Some(Some(event)) = self.freeform.get_mut(handle.table_index()) {
                    event.release_requested = true;
                }
            } else if let Some(slot) = self.freeform.get_mut(handle.table_index()) {
                *slot = None;
                log::debug!("Engine: released freeform event {}", handle);
            }
            return Ok(());
        }

        let instance = self.instance_mut(handle)?;
        instance.reset_user_state();
        instance.associated = false;
        Ok(())
    }

    pub fn event_definition_handle(&self, id: &str) -> KwlResult<EventDefinitionHandle> {
        self.data()?
            .definitions
            .iter()
            .position(|slot| slot.definition.id == id)
            .map(EventDefinitionHandle)
            .ok_or_else(|| KwlError::UnknownEventDefinitionId(id.to_string()))
    }

    /// Choose how one-shots of a definition take over busy instances
    pub fn set_event_stealing_mode(&mut self, handle: EventDefinitionHandle, mode: StealingMode) -> KwlResult<()> {
        self.data_mut()?
            .definitions
            .get_mut(handle.0)
            .ok_or(KwlError::InvalidEventDefinitionHandle(handle.0))?
            .stealing = mode;
        Ok(())
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Playback
    // ─────────────────────────────────────────────────────────────────────────

    /// Start an event, or retrigger it if it is already playing
    pub fn start_event(&mut self, handle: EventHandle, fade_in_secs: f32) -> KwlResult<()> {
        if !(fade_in_secs >= 0.0) {
            return Err(KwlError::InvalidParameterValue("fade time must be >= 0"));
        }
        if !handle.is_freeform() && self.unload_pending {
            return Err(KwlError::EngineDataNotLoaded);
        }

        let instance = self.instance(handle)?;
        let definition = instance.definition.clone();
        if instance.is_playing {
            if definition.is_streaming() || definition.retrigger == RetriggerMode::NoRetrigger {
                return Ok(());
            }
            return self.send(ToMixer::EventRetrigger {
                event: handle,
                fade_in_secs,
            });
        }
        if self.outgoing.remaining() == 0 {
            return Err(KwlError::MessageQueueFull);
        }

        let gc = gc_handle();
        let mut voice = None;
        let mut stream = None;
        let mut decoder = None;
        if handle.is_freeform() {
            voice = Some(Owned::new(&gc, RenderState::new(handle, definition.clone())));
        } else if let Some((audio_ref, looping)) = definition.stream_ref() {
            let Some(audio) = self.wave_bank_audio(audio_ref.wave_bank) else {
                log::debug!(
                    "Engine: '{}' not started, its wave bank is not loaded",
                    definition.id
                );
                return Ok(());
            };
            if self.active_decoders >= self.config.num_decoders {
                return Err(KwlError::NoFreeDecoders);
            }
            let (d, tap) = Decoder::new(&audio, audio_ref.entry, looping)?;
            decoder = Some(d);
            stream = Some(Owned::new(&gc, tap));
        }

        self.send(ToMixer::EventStart {
            event: handle,
            fade_in_secs,
            voice,
            stream,
        })?;

        if decoder.is_some() {
            self.active_decoders += 1;
        }
        let Self {
            data,
            freeform,
            listener,
            positional,
            playing,
            ..
        } = self;
        if let Some(instance) = lookup(data, freeform, handle) {
            instance.is_playing = true;
            instance.decoder = decoder;
            instance.update_params(listener, positional);
        }
        playing.push(handle);
        Ok(())
    }

    /// Request a stop; playing sounds may finish their current buffer first
    pub fn stop_event(&mut self, handle: EventHandle, fade_out_secs: f32) -> KwlResult<()> {
        if !(fade_out_secs >= 0.0) {
            return Err(KwlError::InvalidParameterValue("fade time must be >= 0"));
        }
        if !self.instance(handle)?.is_playing {
            return Ok(());
        }
        self.send(ToMixer::EventStop {
            event: handle,
            fade_out_secs,
        })
    }

    pub fn pause_event(&mut self, handle: EventHandle) -> KwlResult<()> {
        self.instance(handle)?;
        self.send(ToMixer::EventPause(handle))
    }

    pub fn resume_event(&mut self, handle: EventHandle) -> KwlResult<()> {
        self.instance(handle)?;
        self.send(ToMixer::EventResume(handle))
    }

    /// True from `start_event` until the mixer reports the stop
    pub fn is_event_playing(&self, handle: EventHandle) -> KwlResult<bool> {
        Ok(self.instance(handle)?.is_playing)
    }

    /// Fire and forget an instance of a definition
    ///
    /// Uses an idle instance, or takes over a playing one according to the
    /// definition's stealing mode. A taken-over instance reports its stop
    /// to its previous callback first.
    pub fn start_one_shot(
        &mut self,
        handle: EventDefinitionHandle,
        position: Option<Vec3>,
        callback: Option<StoppedCallback>,
    ) -> KwlResult<()> {
        if self.unload_pending {
            return Err(KwlError::EngineDataNotLoaded);
        }
        let Self { data, rng, .. } = self;
        let data = data.as_mut().ok_or(KwlError::EngineDataNotLoaded)?;
        let slot = data
            .definitions
            .get_mut(handle.0)
            .ok_or(KwlError::InvalidEventDefinitionHandle(handle.0))?;
        if position.is_some() && !slot.definition.is_positional {
            return Err(KwlError::EventIsNotPositional);
        }

        let idle = slot
            .instances
            .iter()
            .position(|instance| !instance.associated && !instance.is_playing);
        let (index, stolen) = match idle {
            Some(index) => (index, false),
            None => {
                let candidates = slot.instances.iter().enumerate().filter(|(_, i)| !i.associated);
                let index = match slot.stealing {
                    StealingMode::DontSteal => return Ok(()),
                    StealingMode::StealRandom => {
                        let candidates: Vec<usize> = candidates.map(|(index, _)| index).collect();
                        if candidates.is_empty() {
                            None
                        } else {
                            Some(candidates[rng.random_range(0..candidates.len())])
                        }
                    }
                    StealingMode::StealQuietest => candidates
                        .min_by(|(_, a), (_, b)| {
                            let a = a.params.gain[0] + a.params.gain[1];
                            let b = b.params.gain[0] + b.params.gain[1];
                            a.total_cmp(&b)
                        })
                        .map(|(index, _)| index),
                };
                (index.ok_or(KwlError::NoFreeEventInstances)?, true)
            }
        };

        let instance = &mut slot.instances[index];
        if stolen && slot.definition.is_streaming() {
            // A decoder cannot be restarted in place
            log::debug!("Engine: one-shot {} skipped, its stream is busy", instance.handle);
            return Ok(());
        }
        if stolen {
            instance.notify_stopped();
        }
        instance.reset_user_state();
        instance.callback = callback;
        if let Some(position) = position {
            instance.emitter.position = position;
        }
        let event = instance.handle;

        if !stolen {
            return self.start_event(event, 0.0);
        }
        self.send(ToMixer::EventRetrigger {
            event,
            fade_in_secs: 0.0,
        })
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Per-event parameters
    // ─────────────────────────────────────────────────────────────────────────

    /// Set an event's gain, as log gain unless `linear`
    pub fn set_event_gain(&mut self, handle: EventHandle, gain: f32, linear: bool) -> KwlResult<()> {
        if !(gain >= 0.0) {
            return Err(KwlError::InvalidParameterValue("gain must be >= 0"));
        }
        self.instance_mut(handle)?.user_gain = if linear {
            gain
        } else {
            log_gain_to_linear(gain)
        };
        Ok(())
    }

    pub fn set_event_pitch(&mut self, handle: EventHandle, pitch: f32) -> KwlResult<()> {
        if !(pitch >= 0.0) {
            return Err(KwlError::InvalidParameterValue("pitch must be >= 0"));
        }
        self.instance_mut(handle)?.user_pitch = pitch;
        Ok(())
    }

    /// Pan a non-positional event; -1 is hard left, 1 hard right
    pub fn set_event_balance(&mut self, handle: EventHandle, balance: f32) -> KwlResult<()> {
        if !(-1.0..=1.0).contains(&balance) {
            return Err(KwlError::InvalidParameterValue("balance must be in [-1, 1]"));
        }
        let instance = self.instance_mut(handle)?;
        if instance.definition.is_positional {
            return Err(KwlError::EventIsNotNonPositional);
        }
        instance.balance = balance;
        Ok(())
    }

    fn positional_instance(&mut self, handle: EventHandle) -> KwlResult<&mut EventInstance> {
        let instance = self.instance_mut(handle)?;
        if !instance.definition.is_positional {
            return Err(KwlError::EventIsNotPositional);
        }
        Ok(instance)
    }

    pub fn set_event_position(&mut self, handle: EventHandle, position: Vec3) -> KwlResult<()> {
        self.positional_instance(handle)?.emitter.position = position;
        Ok(())
    }

    pub fn set_event_velocity(&mut self, handle: EventHandle, velocity: Vec3) -> KwlResult<()> {
        self.positional_instance(handle)?.emitter.velocity = velocity;
        Ok(())
    }

    /// Point an event's cone along `direction`
    pub fn set_event_orientation(&mut self, handle: EventHandle, direction: Vec3) -> KwlResult<()> {
        if direction == Vec3::ZERO {
            return Err(KwlError::InvalidParameterValue(
                "event direction must be non-zero",
            ));
        }
        self.positional_instance(handle)?.emitter.direction = direction.normalize();
        Ok(())
    }

    /// Called on the control thread when the event stops
    pub fn set_event_stopped_callback<F>(&mut self, handle: EventHandle, callback: F) -> KwlResult<()>
    where
        F: FnMut(EventHandle) + Send + 'static,
    {
        self.instance_mut(handle)?.callback = Some(Box::new(callback));
        Ok(())
    }

    /// Attach a DSP unit to an event, or detach with `None`
    pub fn attach_dsp_to_event(&mut self, handle: EventHandle, unit: Option<DspUnitHandle>) -> KwlResult<()> {
        self.instance_mut(handle)?.dsp = unit;
        Ok(())
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Freeform events
    // ─────────────────────────────────────────────────────────────────────────

    /// Create a freeform event from a WAV, AIFF or AU file
    pub fn create_freeform_event_from_file<P: AsRef<Path>>(&mut self, path: P, kind: FreeformKind) -> KwlResult<EventHandle> {
        let buffer = PcmBuffer::load(path)?;
        self.create_freeform_event_from_buffer(buffer, kind)
    }

    pub fn create_freeform_event_from_buffer(&mut self, buffer: PcmBuffer, kind: FreeformKind) -> KwlResult<EventHandle> {
        if buffer.num_frames == 0 {
            return Err(KwlError::InvalidParameterValue(
                "freeform buffer must have at least one frame",
            ));
        }
        self.create_freeform_event_from_audio_data(
            AudioData::from_pcm(buffer.num_channels, buffer.samples),
            kind,
        )
    }

    /// Create a freeform event from in-memory PCM
    pub fn create_freeform_event_from_audio_data(&mut self, audio: AudioData, kind: FreeformKind) -> KwlResult<EventHandle> {
        let positional = kind == FreeformKind::Positional;
        if !(1..=2).contains(&audio.num_channels) {
            return Err(KwlError::InvalidParameterValue(
                "freeform audio must have 1 or 2 channels",
            ));
        }
        if positional && audio.num_channels != 1 {
            return Err(KwlError::PositionalEventMustBeMono);
        }
        if audio.pcm().is_none() {
            return Err(KwlError::UnsupportedEncoding);
        }
        if audio.num_frames() == 0 {
            return Err(KwlError::InvalidParameterValue(
                "freeform audio must have at least one frame",
            ));
        }

        let slot = self
            .freeform
            .iter()
            .position(Option::is_none)
            .ok_or(KwlError::NoFreeEventInstances)?;
        let handle = EventHandle::freeform(slot)?;
        let definition = Shared::new(&gc_handle(), EventDefinition::freeform(audio, positional));
        let mut instance = EventInstance::new(handle, definition);
        instance.associated = true;
        self.freeform[slot] = Some(FreeformEvent {
            instance,
            release_requested: false,
        });

        log::debug!("Engine: created freeform event {}", handle);
        Ok(handle)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::EngineConfig;
    use crate::data::engine_data_writer as writer;
    use crate::data::WaveBankWriter;
    use crate::engine::mixer::Mixer;
    use crate::KwlError;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    fn engine() -> (Engine, Mixer) {
        let config = EngineConfig {
            sample_rate: 1000,
            buffer_size: 16,
            freeform_capacity: 2,
            ..EngineConfig::default()
        };
        let (mut engine, mixer) = Engine::new(&config).unwrap();
        engine
            .load_engine_data_from_bytes(writer::engine_data(&writer::all_chunks()))
            .unwrap();
        let bank = WaveBankWriter::new("sfx", 2)
            .pcm_entry("a.wav", 1, &[8000; 40])
            .pcm_entry("b.wav", 1, &[4000; 40])
            .finish();
        engine.load_wave_bank_from_bytes(bank).unwrap();
        (engine, mixer)
    }

    fn tick(engine: &mut Engine, mixer: &mut Mixer) -> Vec<f32> {
        let mut out = vec![0.0; 32];
        engine.update(0.0).unwrap();
        mixer.render(&mut out, 16);
        engine.update(0.0).unwrap();
        out
    }

    #[test]
    fn test_handles_run_out() {
        let (mut engine, _mixer) = engine();
        let handles: Vec<_> = (0..4).map(|_| engine.event_handle("hit").unwrap()).collect();
        assert_eq!(handles[3].instance_index(), 3);
        assert!(matches!(
            engine.event_handle("hit"),
            Err(KwlError::NoFreeEventInstances)
        ));
        assert!(matches!(
            engine.event_handle("miss"),
            Err(KwlError::UnknownEventDefinitionId(_))
        ));

        engine.release_event(handles[1]).unwrap();
        assert_eq!(engine.event_handle("hit").unwrap(), handles[1]);
    }

    #[test]
    fn test_start_and_natural_stop() {
        let (mut engine, mut mixer) = engine();
        let hit = engine.event_handle("hit").unwrap();
        let stopped = Arc::new(AtomicUsize::new(0));
        let counter = stopped.clone();
        engine
            .set_event_stopped_callback(hit, move |_| {
                counter.fetch_add(1, Ordering::SeqCst);
            })
            .unwrap();

        engine.start_event(hit, 0.0).unwrap();
        assert!(engine.is_event_playing(hit).unwrap());
        let out = tick(&mut engine, &mut mixer);
        assert!(out.iter().any(|s| *s != 0.0));

        // Sound plays `a` (40 frames) once
        for _ in 0..4 {
            tick(&mut engine, &mut mixer);
        }
        assert!(!engine.is_event_playing(hit).unwrap());
        assert_eq!(stopped.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_negative_fade_is_rejected() {
        let (mut engine, _mixer) = engine();
        let hit = engine.event_handle("hit").unwrap();
        assert!(matches!(
            engine.start_event(hit, -1.0),
            Err(KwlError::InvalidParameterValue(_))
        ));
        assert!(matches!(
            engine.stop_event(hit, -1.0),
            Err(KwlError::InvalidParameterValue(_))
        ));
    }

    #[test]
    fn test_invalid_handles() {
        let (mut engine, _mixer) = engine();
        let bogus = EventHandle::data(7, 0).unwrap();
        assert!(matches!(
            engine.start_event(bogus, 0.0),
            Err(KwlError::InvalidEventInstanceHandle(_))
        ));
        assert!(matches!(
            engine.set_event_gain(EventHandle::INVALID, 1.0, true),
            Err(KwlError::InvalidEventInstanceHandle(_))
        ));
    }

    #[test]
    fn test_streaming_event_uses_a_decoder() {
        let (mut engine, mut mixer) = engine();
        tick(&mut engine, &mut mixer);
        let ambience = engine.event_handle("ambience").unwrap();
        engine.start_event(ambience, 0.0).unwrap();
        assert_eq!(engine.active_decoders, 1);
        // Starting a playing stream does nothing
        engine.start_event(ambience, 0.0).unwrap();
        assert_eq!(engine.outgoing.len(), 1);

        tick(&mut engine, &mut mixer);
        engine.stop_event(ambience, 0.0).unwrap();
        tick(&mut engine, &mut mixer);
        assert!(!engine.is_event_playing(ambience).unwrap());
        assert_eq!(engine.active_decoders, 0);
    }

    #[test]
    fn test_decoders_run_out() {
        let config = EngineConfig {
            num_decoders: 0,
            ..EngineConfig::default()
        };
        let (mut engine, _mixer) = Engine::new(&config).unwrap();
        engine
            .load_engine_data_from_bytes(writer::engine_data(&writer::all_chunks()))
            .unwrap();
        let bank = WaveBankWriter::new("sfx", 2)
            .pcm_entry("a.wav", 1, &[1; 8])
            .pcm_entry("b.wav", 1, &[1; 8])
            .finish();
        engine.load_wave_bank_from_bytes(bank).unwrap();

        let ambience = engine.event_handle("ambience").unwrap();
        assert!(matches!(
            engine.start_event(ambience, 0.0),
            Err(KwlError::NoFreeDecoders)
        ));
    }

    #[test]
    fn test_stream_without_bank_is_a_silent_no_op() {
        let (mut engine, mut mixer) = engine();
        let bank = crate::engine::WaveBankHandle(0);
        engine.request_unload_wave_bank(bank, false).unwrap();
        tick(&mut engine, &mut mixer);

        let ambience = engine.event_handle("ambience").unwrap();
        engine.start_event(ambience, 0.0).unwrap();
        assert!(!engine.is_event_playing(ambience).unwrap());
    }

    #[test]
    fn test_parameter_rules() {
        let (mut engine, _mixer) = engine();
        let hit = engine.event_handle("hit").unwrap();
        assert!(engine.set_event_gain(hit, -0.1, false).is_err());
        assert!(engine.set_event_pitch(hit, -0.1).is_err());
        assert!(engine.set_event_balance(hit, 1.5).is_err());
        assert!(matches!(
            engine.set_event_position(hit, Vec3::ONE),
            Err(KwlError::EventIsNotPositional)
        ));

        engine.set_event_gain(hit, 0.5, false).unwrap();
        engine.set_event_balance(hit, -0.5).unwrap();
        let instance = engine.instance(hit).unwrap();
        assert_eq!(instance.user_gain, 0.0625);
        assert_eq!(instance.balance, -0.5);
    }

    #[test]
    fn test_one_shot_steals_the_quietest() {
        let (mut engine, mut mixer) = engine();
        let hit = engine.event_definition_handle("hit").unwrap();
        engine
            .set_event_stealing_mode(hit, StealingMode::StealQuietest)
            .unwrap();
        for _ in 0..4 {
            engine.start_one_shot(hit, None, None).unwrap();
        }
        tick(&mut engine, &mut mixer);

        let quiet = EventHandle::data(hit.0, 2).unwrap();
        engine.set_event_gain(quiet, 0.1, true).unwrap();
        engine.update(0.0).unwrap();

        let stolen = Arc::new(AtomicUsize::new(usize::MAX));
        let seen = stolen.clone();
        engine.instance_mut(quiet).unwrap().callback = Some(Box::new(move |handle: EventHandle| {
            seen.store(handle.instance_index(), Ordering::SeqCst);
        }));
        engine.start_one_shot(hit, None, None).unwrap();
        assert_eq!(stolen.load(Ordering::SeqCst), 2);
        // The new owner starts from scratch
        assert_eq!(engine.instance(quiet).unwrap().user_gain, 1.0);
    }

    #[test]
    fn test_busy_stream_keeps_its_one_shot_owner() {
        let (mut engine, mut mixer) = engine();
        tick(&mut engine, &mut mixer);
        let ambience = engine.event_definition_handle("ambience").unwrap();

        let first = Arc::new(AtomicUsize::new(0));
        let second = Arc::new(AtomicUsize::new(0));
        let counter = first.clone();
        engine
            .start_one_shot(
                ambience,
                None,
                Some(Box::new(move |_: EventHandle| {
                    counter.fetch_add(1, Ordering::SeqCst);
                })),
            )
            .unwrap();
        tick(&mut engine, &mut mixer);

        let counter = second.clone();
        engine
            .start_one_shot(
                ambience,
                None,
                Some(Box::new(move |_: EventHandle| {
                    counter.fetch_add(1, Ordering::SeqCst);
                })),
            )
            .unwrap();
        assert_eq!(first.load(Ordering::SeqCst), 0);

        let event = EventHandle::data(ambience.0, 0).unwrap();
        engine.stop_event(event, 0.0).unwrap();
        tick(&mut engine, &mut mixer);
        assert!(!engine.is_event_playing(event).unwrap());
        assert_eq!(first.load(Ordering::SeqCst), 1);
        assert_eq!(second.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_one_shot_without_stealing() {
        let (mut engine, _mixer) = engine();
        let hit = engine.event_definition_handle("hit").unwrap();
        engine
            .set_event_stealing_mode(hit, StealingMode::DontSteal)
            .unwrap();
        for _ in 0..5 {
            engine.start_one_shot(hit, None, None).unwrap();
        }
        assert_eq!(engine.playing.len(), 4);
        assert!(matches!(
            engine.start_one_shot(hit, Some(Vec3::ZERO), None),
            Err(KwlError::EventIsNotPositional)
        ));
    }

    #[test]
    fn test_freeform_rules() {
        let (mut engine, _mixer) = engine();
        assert!(matches!(
            engine.create_freeform_event_from_audio_data(
                AudioData::from_pcm(2, vec![0; 8]),
                FreeformKind::Positional
            ),
            Err(KwlError::PositionalEventMustBeMono)
        ));
        assert!(engine
            .create_freeform_event_from_audio_data(AudioData::from_pcm(1, Vec::new()), FreeformKind::NonPositional)
            .is_err());

        let a = engine
            .create_freeform_event_from_audio_data(AudioData::from_pcm(1, vec![1; 8]), FreeformKind::Positional)
            .unwrap();
        let b = engine
            .create_freeform_event_from_audio_data(AudioData::from_pcm(2, vec![1; 8]), FreeformKind::NonPositional)
            .unwrap();
        assert!(a.is_freeform() && b.is_freeform());
        assert!(matches!(
            engine.create_freeform_event_from_audio_data(
                AudioData::from_pcm(1, vec![1; 8]),
                FreeformKind::NonPositional
            ),
            Err(KwlError::NoFreeEventInstances)
        ));

        engine.set_event_position(a, Vec3::X).unwrap();
        assert!(matches!(
            engine.set_event_balance(a, 0.5),
            Err(KwlError::EventIsNotNonPositional)
        ));

        // An idle freeform event is freed at once
        engine.release_event(a).unwrap();
        assert!(matches!(
            engine.is_event_playing(a),
            Err(KwlError::InvalidEventInstanceHandle(_))
        ));
    }

    #[test]
    fn test_released_playing_freeform_event_is_freed_after_stop() {
        let (mut engine, mut mixer) = engine();
        let event = engine
            .create_freeform_event_from_audio_data(AudioData::from_pcm(1, vec![5000; 400]), FreeformKind::NonPositional)
            .unwrap();
        engine.start_event(event, 0.0).unwrap();
        let out = tick(&mut engine, &mut mixer);
        assert!(out.iter().all(|s| *s > 0.0));

        engine.release_event(event).unwrap();
        assert!(engine.is_event_playing(event).unwrap());
        tick(&mut engine, &mut mixer);
        assert!(engine.is_event_playing(event).is_err());
        assert!(engine.playing.is_empty());
    }
}
