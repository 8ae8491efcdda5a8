//! Fixtures shared by the integration tests
//!
//! Builds engine data and wave bank bytes in memory and drives an engine
//! and its mixer on the test thread.

#![allow(dead_code)]

use kowal_core::config::EngineConfig;
use kowal_core::data::{
    ENGINE_DATA_IDENTIFIER, EVENTS_CHUNK_ID, MIX_BUSES_CHUNK_ID, MIX_PRESETS_CHUNK_ID,
    SOUNDS_CHUNK_ID, WAVE_BANKS_CHUNK_ID, WAVE_BANK_IDENTIFIER,
};
use kowal_core::engine::Mixer;
use kowal_core::Engine;

/// Big-endian chunk body writer
#[derive(Default)]
pub struct Body(Vec<u8>);

impl Body {
    pub fn i32(mut self, value: i32) -> Self {
        self.0.extend_from_slice(&value.to_be_bytes());
        self
    }

    pub fn f32(mut self, value: f32) -> Self {
        self.0.extend_from_slice(&value.to_be_bytes());
        self
    }

    pub fn string(mut self, s: &str) -> Self {
        self = self.i32(s.len() as i32);
        self.0.extend_from_slice(s.as_bytes());
        self
    }
}

/// Playback mode codes as stored in engine data
pub const RANDOM: i32 = 0;
pub const SEQUENTIAL: i32 = 2;

pub struct SoundSpec {
    pub playback_count: i32,
    pub mode: i32,
    pub gain: f32,
    /// (wave bank, entry) pairs
    pub entries: Vec<(i32, i32)>,
}

impl Default for SoundSpec {
    fn default() -> Self {
        Self {
            playback_count: 1,
            mode: SEQUENTIAL,
            gain: 1.0,
            entries: vec![(0, 0)],
        }
    }
}

pub struct EventSpec {
    pub id: &'static str,
    pub instances: i32,
    pub gain: f32,
    pub bus: i32,
    pub positional: bool,
    pub sound: i32,
    pub no_retrigger: bool,
    /// (wave bank, entry, looping) of a streaming event
    pub stream: Option<(i32, i32, bool)>,
    pub referenced_banks: Vec<i32>,
}

impl Default for EventSpec {
    fn default() -> Self {
        Self {
            id: "event",
            instances: 1,
            gain: 1.0,
            bus: 0,
            positional: false,
            sound: 0,
            no_retrigger: false,
            stream: None,
            referenced_banks: vec![0],
        }
    }
}

/// Engine data with a master bus and one default preset at unit gain
pub struct DataBuilder {
    buses: Vec<(String, Vec<i32>)>,
    banks: Vec<(String, Vec<String>)>,
    sounds: Vec<SoundSpec>,
    events: Vec<EventSpec>,
}

impl DataBuilder {
    pub fn new() -> Self {
        Self {
            buses: vec![("master".to_string(), Vec::new())],
            banks: Vec::new(),
            sounds: Vec::new(),
            events: Vec::new(),
        }
    }

    /// Add a bus under `parent`; buses are numbered in insertion order
    pub fn bus(mut self, id: &str, parent: usize) -> Self {
        let index = self.buses.len() as i32;
        self.buses[parent].1.push(index);
        self.buses.push((id.to_string(), Vec::new()));
        self
    }

    pub fn bank(mut self, id: &str, entries: &[&str]) -> Self {
        self.banks
            .push((id.to_string(), entries.iter().map(|e| e.to_string()).collect()));
        self
    }

    pub fn sound(mut self, sound: SoundSpec) -> Self {
        self.sounds.push(sound);
        self
    }

    pub fn event(mut self, event: EventSpec) -> Self {
        self.events.push(event);
        self
    }

    pub fn build(&self) -> Vec<u8> {
        let mut buses = Body::default().i32(self.buses.len() as i32);
        for (id, subs) in &self.buses {
            buses = buses.string(id).i32(subs.len() as i32);
            for sub in subs {
                buses = buses.i32(*sub);
            }
        }

        let mut presets = Body::default().i32(1).string("default").i32(1);
        for index in 0..self.buses.len() {
            presets = presets.i32(index as i32).f32(1.0).f32(1.0).f32(1.0);
        }

        let total: usize = self.banks.iter().map(|(_, entries)| entries.len()).sum();
        let mut banks = Body::default().i32(total as i32).i32(self.banks.len() as i32);
        for (id, entries) in &self.banks {
            banks = banks.string(id).i32(entries.len() as i32);
            for entry in entries {
                banks = banks.string(entry);
            }
        }

        let mut sounds = Body::default().i32(self.sounds.len() as i32);
        for sound in &self.sounds {
            sounds = sounds
                .i32(sound.playback_count)
                .i32(0)
                .f32(sound.gain)
                .f32(0.0)
                .f32(1.0)
                .f32(0.0)
                .i32(sound.mode)
                .i32(sound.entries.len() as i32);
            for (bank, entry) in &sound.entries {
                sounds = sounds.i32(*bank).i32(*entry);
            }
        }

        let mut events = Body::default().i32(self.events.len() as i32);
        for event in &self.events {
            let (bank, entry, looping) = event.stream.unwrap_or((-1, -1, false));
            events = events
                .string(event.id)
                .i32(event.instances)
                .f32(event.gain)
                .f32(1.0)
                .f32(360.0)
                .f32(360.0)
                .f32(1.0)
                .i32(event.bus)
                .i32(event.positional as i32)
                .i32(event.sound)
                .i32(event.no_retrigger as i32)
                .i32(bank)
                .i32(entry)
                .i32(looping as i32)
                .i32(event.referenced_banks.len() as i32);
            for bank in &event.referenced_banks {
                events = events.i32(*bank);
            }
        }

        let mut bytes = ENGINE_DATA_IDENTIFIER.to_vec();
        for (id, body) in [
            (MIX_BUSES_CHUNK_ID, buses),
            (MIX_PRESETS_CHUNK_ID, presets),
            (WAVE_BANKS_CHUNK_ID, banks),
            (SOUNDS_CHUNK_ID, sounds),
            (EVENTS_CHUNK_ID, events),
        ] {
            bytes.extend_from_slice(&id.to_be_bytes());
            bytes.extend_from_slice(&(body.0.len() as i32).to_be_bytes());
            bytes.extend_from_slice(&body.0);
        }
        bytes
    }
}

/// Wave bank of in-memory 16-bit PCM entries: (path, channels, samples)
pub fn wave_bank(id: &str, entries: &[(&str, i32, &[i16])]) -> Vec<u8> {
    let mut body = Body(WAVE_BANK_IDENTIFIER.to_vec())
        .string(id)
        .i32(entries.len() as i32);
    for (path, channels, samples) in entries {
        body = body
            .string(path)
            .i32(0)
            .i32(0)
            .i32(*channels)
            .i32(samples.len() as i32 * 2);
        for s in *samples {
            body.0.extend_from_slice(&s.to_le_bytes());
        }
    }
    body.0
}

pub fn engine(sample_rate: u32, output_channels: usize, buffer_size: usize) -> (Engine, Mixer) {
    let config = EngineConfig {
        sample_rate,
        output_channels,
        buffer_size,
        ..EngineConfig::default()
    };
    Engine::new(&config).unwrap()
}

/// Flush control state, then render one buffer
pub fn tick(engine: &mut Engine, mixer: &mut Mixer, frames: usize) -> Vec<f32> {
    engine.update(0.0).unwrap();
    let mut out = vec![0.0; frames * mixer.format().num_channels];
    mixer.render(&mut out, frames);
    out
}

pub fn is_silent(buffer: &[f32]) -> bool {
    buffer.iter().all(|s| *s == 0.0)
}

pub fn peak(buffer: &[f32]) -> f32 {
    buffer.iter().fold(0.0f32, |p, s| p.max(s.abs()))
}
