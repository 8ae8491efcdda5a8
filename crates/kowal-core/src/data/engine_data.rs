//! Engine data files
//!
//! Engine data describes everything the engine can play: the mix bus tree,
//! mix presets, wave bank layouts, sounds and event definitions. The file
//! is a 9-byte identifier followed by chunks, each a big-endian id and size
//! followed by the body. Chunks may appear in any order; they are read in
//! dependency order:
//!
//! ```text
//! mix buses ─► mix presets ─► wave banks ─► sounds ─► events
//! ```
//!
//! Every integer and float is big-endian. Any inconsistency fails the
//! whole load with [`KwlError::CorruptBinaryData`].

use std::path::Path;
use std::sync::Arc;

use super::input_stream::InputStream;
use super::wavebank::WaveBankLayout;
use crate::engine::definition::{EventDefinition, EventSource, RetriggerMode, StealingMode};
use crate::engine::handle::{MAX_INSTANCES_PER_DEFINITION, MAX_TABLE_ENTRIES};
use crate::engine::mixbus::MixBus;
use crate::engine::positional::cone_cos;
use crate::engine::preset::{MixPreset, PresetBusParams};
use crate::engine::sound::{AudioRef, PlaybackMode, Sound};
use crate::error::{KwlError, KwlResult};

/// Leading bytes of every engine data file
pub const ENGINE_DATA_IDENTIFIER: [u8; 9] = [0xab, 0x4b, 0x57, 0x4c, 0xbb, 0x0d, 0x0a, 0x1a, 0x0a];

pub const EVENTS_CHUNK_ID: u32 = 0x7374_7665;
pub const SOUNDS_CHUNK_ID: u32 = 0x7364_6e73;
pub const MIX_BUSES_CHUNK_ID: u32 = 0x7362_786d;
pub const MIX_PRESETS_CHUNK_ID: u32 = 0x7270_786d;
pub const WAVE_BANKS_CHUNK_ID: u32 = 0x736b_6277;

/// Id of the root of the mix bus tree
pub const MASTER_BUS_ID: &str = "master";

/// Largest number of wave banks one event may reference
const MAX_REFERENCED_WAVE_BANKS: usize = 10_000;

/// Parsed engine data
#[derive(Debug, Clone)]
pub struct EngineData {
    pub buses: Vec<MixBus>,
    /// Index of the master bus
    pub master: usize,
    pub presets: Vec<MixPreset>,
    pub wave_banks: Vec<WaveBankLayout>,
    pub sounds: Vec<Sound>,
    pub events: Vec<EventDefinition>,
}

impl EngineData {
    pub fn load<P: AsRef<Path>>(path: P) -> KwlResult<Self> {
        let path = path.as_ref();
        let mut stream = InputStream::open(path)?;
        let data = Self::read(&mut stream)?;
        log::info!(
            "EngineData: Loaded {:?} ({} buses, {} presets, {} wave banks, {} sounds, {} events)",
            path,
            data.buses.len(),
            data.presets.len(),
            data.wave_banks.len(),
            data.sounds.len(),
            data.events.len()
        );
        Ok(data)
    }

    pub fn from_bytes(bytes: Arc<[u8]>) -> KwlResult<Self> {
        Self::read(&mut InputStream::from_bytes(bytes))
    }

    pub fn read(stream: &mut InputStream) -> KwlResult<Self> {
        stream.expect_identifier(&ENGINE_DATA_IDENTIFIER)?;

        seek_to_chunk(stream, MIX_BUSES_CHUNK_ID)?;
        let (buses, master) = read_mix_buses(stream)?;

        seek_to_chunk(stream, MIX_PRESETS_CHUNK_ID)?;
        let presets = read_mix_presets(stream, buses.len())?;

        seek_to_chunk(stream, WAVE_BANKS_CHUNK_ID)?;
        let wave_banks = read_wave_banks(stream)?;

        seek_to_chunk(stream, SOUNDS_CHUNK_ID)?;
        let sounds = read_sounds(stream, &wave_banks)?;

        seek_to_chunk(stream, EVENTS_CHUNK_ID)?;
        let events = read_events(stream, buses.len(), &wave_banks, sounds.len())?;

        Ok(Self {
            buses,
            master,
            presets,
            wave_banks,
            sounds,
            events,
        })
    }

    /// Total number of preallocated event instances
    pub fn num_event_instances(&self) -> usize {
        self.events.iter().map(|def| def.num_instances).sum()
    }
}

fn corrupt(message: String) -> KwlError {
    KwlError::CorruptBinaryData(message)
}

/// Position the stream at the body of chunk `chunk_id`
fn seek_to_chunk(stream: &mut InputStream, chunk_id: u32) -> KwlResult<()> {
    stream.seek(ENGINE_DATA_IDENTIFIER.len() as u64)?;
    while !stream.is_at_end()? {
        let id = stream.read_u32_be()?;
        let size = stream.read_i32_be()?;
        if id == chunk_id {
            return Ok(());
        }
        if size < 0 {
            return Err(corrupt(format!("chunk {:#010x} has negative size", id)));
        }
        stream.skip(size as u64)?;
    }
    Err(corrupt(format!("missing chunk {:#010x}", chunk_id)))
}

/// Read a count that must be at least `min`
fn read_count(stream: &mut InputStream, what: &str, min: i32) -> KwlResult<usize> {
    let count = stream.read_i32_be()?;
    if count < min {
        return Err(corrupt(format!("invalid {} count {}", what, count)));
    }
    Ok(count as usize)
}

/// Read an index that must be below `len`
fn read_index(stream: &mut InputStream, what: &str, len: usize) -> KwlResult<usize> {
    let index = stream.read_i32_be()?;
    if index < 0 || index as usize >= len {
        return Err(corrupt(format!("{} index {} out of range", what, index)));
    }
    Ok(index as usize)
}

fn read_flag(stream: &mut InputStream, what: &str) -> KwlResult<bool> {
    match stream.read_i32_be()? {
        0 => Ok(false),
        1 => Ok(true),
        other => Err(corrupt(format!("invalid {} flag {}", what, other))),
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Chunks
// ─────────────────────────────────────────────────────────────────────────────

fn read_mix_buses(stream: &mut InputStream) -> KwlResult<(Vec<MixBus>, usize)> {
    let num_buses = read_count(stream, "mix bus", 1)?;
    let mut buses = Vec::with_capacity(num_buses);
    let mut master = None;

    for i in 0..num_buses {
        let id = stream.read_ascii_string()?;
        if id == MASTER_BUS_ID {
            if master.is_some() {
                return Err(corrupt("multiple master buses".to_string()));
            }
            master = Some(i);
        }
        let num_sub_buses = read_count(stream, "sub bus", 0)?;
        let sub_buses = (0..num_sub_buses)
            .map(|_| read_index(stream, "sub bus", num_buses))
            .collect::<KwlResult<Vec<_>>>()?;
        buses.push(MixBus::new(id, sub_buses));
    }

    let master = master.ok_or_else(|| corrupt("no master bus".to_string()))?;
    check_bus_tree(&buses, master)?;
    Ok((buses, master))
}

/// The buses must form one tree rooted at the master: no bus is a child
/// twice, the master is nobody's child, every other bus has a parent, and
/// there are no cycles
fn check_bus_tree(buses: &[MixBus], master: usize) -> KwlResult<()> {
    let mut has_parent = vec![false; buses.len()];
    for (index, bus) in buses.iter().enumerate() {
        for &child in &bus.sub_buses {
            if child == index || child == master || has_parent[child] {
                return Err(corrupt(format!(
                    "mix bus '{}' appears more than once in the tree",
                    buses[child].id
                )));
            }
            has_parent[child] = true;
        }
    }
    if let Some(orphan) = (0..buses.len()).find(|&i| i != master && !has_parent[i]) {
        return Err(corrupt(format!(
            "mix bus '{}' is not reachable from the master bus",
            buses[orphan].id
        )));
    }

    // With at most one parent per bus, a cycle is a walk up the parent
    // chain that never reaches a root
    let mut parent = vec![None; buses.len()];
    for (index, bus) in buses.iter().enumerate() {
        for &child in &bus.sub_buses {
            parent[child] = Some(index);
        }
    }
    for start in 0..buses.len() {
        let mut current = start;
        let mut steps = 0;
        while let Some(up) = parent[current] {
            current = up;
            steps += 1;
            if steps > buses.len() {
                return Err(corrupt(format!(
                    "mix bus '{}' is part of a cycle",
                    buses[start].id
                )));
            }
        }
    }
    Ok(())
}

fn read_mix_presets(stream: &mut InputStream, num_buses: usize) -> KwlResult<Vec<MixPreset>> {
    let num_presets = read_count(stream, "mix preset", 1)?;
    let mut presets = Vec::with_capacity(num_presets);
    let mut has_default = false;

    for _ in 0..num_presets {
        let id = stream.read_ascii_string()?;
        let is_default = stream.read_i32_be()? != 0;
        if is_default {
            if has_default {
                return Err(corrupt("multiple default mix presets".to_string()));
            }
            has_default = true;
        }

        let mut params = Vec::with_capacity(num_buses);
        for _ in 0..num_buses {
            let bus = read_index(stream, "mix preset bus", num_buses)?;
            let left = stream.read_f32_be()?;
            let right = stream.read_f32_be()?;
            let pitch = stream.read_f32_be()?;
            params.push(PresetBusParams {
                bus,
                log_gain: [left, right],
                pitch,
            });
        }
        presets.push(MixPreset::new(id, is_default, params));
    }

    if !has_default {
        return Err(corrupt("no default mix preset".to_string()));
    }
    Ok(presets)
}

fn read_wave_banks(stream: &mut InputStream) -> KwlResult<Vec<WaveBankLayout>> {
    let total_entries = read_count(stream, "audio data", 1)?;
    let num_banks = read_count(stream, "wave bank", 1)?;
    let mut banks = Vec::with_capacity(num_banks);
    let mut seen = 0;

    for _ in 0..num_banks {
        let id = stream.read_ascii_string()?;
        let num_entries = read_count(stream, "wave bank entry", 1)?;
        let entries = (0..num_entries)
            .map(|_| stream.read_ascii_string())
            .collect::<KwlResult<Vec<_>>>()?;
        seen += num_entries;
        banks.push(WaveBankLayout { id, entries });
    }

    if seen != total_entries {
        return Err(corrupt(format!(
            "wave banks declare {} entries, found {}",
            total_entries, seen
        )));
    }
    Ok(banks)
}

fn read_audio_ref(stream: &mut InputStream, wave_banks: &[WaveBankLayout]) -> KwlResult<AudioRef> {
    let wave_bank = read_index(stream, "wave bank", wave_banks.len())?;
    let entry = read_index(stream, "audio data", wave_banks[wave_bank].entries.len())?;
    Ok(AudioRef { wave_bank, entry })
}

fn read_sounds(stream: &mut InputStream, wave_banks: &[WaveBankLayout]) -> KwlResult<Vec<Sound>> {
    let num_sounds = read_count(stream, "sound", 0)?;
    let mut sounds = Vec::with_capacity(num_sounds);

    for _ in 0..num_sounds {
        let playback_count = stream.read_i32_be()?;
        let defer_stop = stream.read_i32_be()? != 0;
        let gain = stream.read_f32_be()?;
        let gain_variation = stream.read_f32_be()?;
        let pitch = stream.read_f32_be()?;
        let pitch_variation = stream.read_f32_be()?;
        let mode = PlaybackMode::from_code(stream.read_i32_be()?)?;
        let num_refs = read_count(stream, "sound entry", 1)?;
        let entries = (0..num_refs)
            .map(|_| read_audio_ref(stream, wave_banks))
            .collect::<KwlResult<Vec<_>>>()?;

        sounds.push(Sound {
            playback_count,
            defer_stop,
            gain,
            gain_variation,
            pitch,
            pitch_variation,
            mode,
            entries,
        });
    }
    Ok(sounds)
}

fn read_events(
    stream: &mut InputStream,
    num_buses: usize,
    wave_banks: &[WaveBankLayout],
    num_sounds: usize,
) -> KwlResult<Vec<EventDefinition>> {
    let num_events = read_count(stream, "event definition", 1)?;
    if num_events > MAX_TABLE_ENTRIES {
        return Err(corrupt(format!("{} event definitions", num_events)));
    }
    let mut events = Vec::with_capacity(num_events);

    for _ in 0..num_events {
        let id = stream.read_ascii_string()?;

        let instance_count = stream.read_i32_be()?;
        if instance_count < -1 || instance_count as usize > MAX_INSTANCES_PER_DEFINITION {
            return Err(corrupt(format!(
                "event '{}' has instance count {}",
                id, instance_count
            )));
        }
        let num_instances = instance_count.max(1) as usize;

        let gain = stream.read_f32_be()?;
        let pitch = stream.read_f32_be()?;
        let inner_cone_cos = cone_cos(stream.read_f32_be()?);
        let outer_cone_cos = cone_cos(stream.read_f32_be()?);
        let outer_cone_gain = stream.read_f32_be()?;

        let mix_bus = read_index(stream, "mix bus", num_buses)?;
        let is_positional = read_flag(stream, "positional")?;

        let sound = stream.read_i32_be()?;
        if sound < -1 || sound >= num_sounds as i32 {
            return Err(corrupt(format!("event '{}' references sound {}", id, sound)));
        }

        let retrigger = match stream.read_i32_be()? {
            0 => RetriggerMode::Retrigger,
            1 => RetriggerMode::NoRetrigger,
            other => {
                return Err(corrupt(format!(
                    "event '{}' has retrigger mode {}",
                    id, other
                )))
            }
        };

        let stream_bank = stream.read_i32_be()?;
        let stream_entry = stream.read_i32_be()?;
        let looping = stream.read_i32_be()? != 0;
        let stream_ref = usize::try_from(stream_bank)
            .ok()
            .zip(usize::try_from(stream_entry).ok())
            .filter(|&(bank, entry)| {
                wave_banks
                    .get(bank)
                    .is_some_and(|layout| entry < layout.entries.len())
            })
            .map(|(wave_bank, entry)| AudioRef { wave_bank, entry });

        let source = match (sound, stream_ref) {
            (-1, Some(audio)) => EventSource::Stream { audio, looping },
            (-1, None) => EventSource::None,
            (index, _) => EventSource::Sound(index as usize),
        };

        let num_referenced = stream.read_i32_be()?;
        if num_referenced < 0 || num_referenced as usize >= MAX_REFERENCED_WAVE_BANKS {
            return Err(corrupt(format!(
                "event '{}' references {} wave banks",
                id, num_referenced
            )));
        }
        let referenced_wave_banks = (0..num_referenced)
            .map(|_| read_index(stream, "referenced wave bank", wave_banks.len()))
            .collect::<KwlResult<Vec<_>>>()?;

        events.push(EventDefinition {
            id,
            num_instances,
            gain,
            pitch,
            inner_cone_cos,
            outer_cone_cos,
            outer_cone_gain,
            mix_bus: Some(mix_bus),
            is_positional,
            retrigger,
            stealing: StealingMode::default(),
            source,
            referenced_wave_banks,
        });
    }
    Ok(events)
}


#[cfg(test)]
mod tests {
    use super::writer::*;
    use super::*;

    fn parse(chunks: Vec<(u32, Body)>) -> KwlResult<EngineData> {
        EngineData::from_bytes(Arc::from(engine_data(&chunks)))
    }

    #[test]
    fn test_parses_all_chunks() {
        let data = parse(all_chunks()).unwrap();
        assert_eq!(data.master, 0);
        assert_eq!(data.buses[0].sub_buses, vec![1]);
        assert_eq!(data.presets.len(), 1);
        assert!(data.presets[0].is_default);
        assert_eq!(data.wave_banks[0].entries, vec!["a.wav", "b.wav"]);
        assert_eq!(data.sounds[0].mode, PlaybackMode::Sequential);
        assert_eq!(data.sounds[0].entries.len(), 2);

        let hit = &data.events[0];
        assert_eq!(hit.num_instances, 4);
        assert_eq!(hit.mix_bus, Some(1));
        assert!(matches!(hit.source, EventSource::Sound(0)));
        assert_eq!(hit.referenced_wave_banks, vec![0]);
        assert!((hit.inner_cone_cos - cone_cos(360.0)).abs() < 1e-6);
        assert_eq!(hit.stealing, StealingMode::StealQuietest);

        let ambience = &data.events[1];
        assert_eq!(
            ambience.stream_ref(),
            Some((AudioRef { wave_bank: 0, entry: 1 }, true))
        );
        assert_eq!(data.num_event_instances(), 5);
    }

    #[test]
    fn test_chunk_order_does_not_matter() {
        let mut chunks = all_chunks();
        chunks.reverse();
        chunks.insert(0, (0x1234_5678, Body::default().i32(7).i32(8)));
        assert!(parse(chunks).is_ok());
    }

    #[test]
    fn test_missing_chunk_is_corrupt() {
        let mut chunks = all_chunks();
        chunks.retain(|(id, _)| *id != SOUNDS_CHUNK_ID);
        assert!(matches!(parse(chunks), Err(KwlError::CorruptBinaryData(_))));
    }

    #[test]
    fn test_wrong_identifier() {
        let mut bytes = engine_data(&all_chunks());
        bytes[3] = 0x42;
        assert!(matches!(
            EngineData::from_bytes(Arc::from(bytes)),
            Err(KwlError::UnknownFileFormat)
        ));
    }

    #[test]
    fn test_master_bus_is_required() {
        let mut chunks = all_chunks();
        chunks[0].1 = Body::default().i32(1).string("music").i32(0);
        assert!(parse(chunks).is_err());
    }

    #[test]
    fn test_bus_cycle_is_rejected() {
        let mut chunks = all_chunks();
        chunks[0].1 = Body::default()
            .i32(3)
            .string("master")
            .i32(0)
            .string("a")
            .i32(1)
            .i32(2)
            .string("b")
            .i32(1)
            .i32(1);
        assert!(matches!(parse(chunks), Err(KwlError::CorruptBinaryData(_))));
    }

    #[test]
    fn test_orphan_bus_is_rejected() {
        let mut chunks = all_chunks();
        chunks[0].1 = Body::default()
            .i32(2)
            .string("master")
            .i32(0)
            .string("music")
            .i32(0);
        assert!(matches!(parse(chunks), Err(KwlError::CorruptBinaryData(_))));
    }

    #[test]
    fn test_shared_sub_bus_is_rejected() {
        let mut chunks = all_chunks();
        chunks[0].1 = Body::default()
            .i32(3)
            .string("master")
            .i32(2)
            .i32(1)
            .i32(2)
            .string("a")
            .i32(1)
            .i32(2)
            .string("b")
            .i32(0);
        assert!(parse(chunks).is_err());
    }

    #[test]
    fn test_default_preset_is_required() {
        let mut chunks = all_chunks();
        chunks[1].1 = Body::default()
            .i32(1)
            .string("quiet")
            .i32(0)
            .i32(0)
            .f32(0.5)
            .f32(0.5)
            .f32(1.0)
            .i32(1)
            .f32(0.5)
            .f32(0.5)
            .f32(1.0);
        assert!(parse(chunks).is_err());
    }

    #[test]
    fn test_instance_count_limit() {
        let mut chunks = all_chunks();
        let body = Body::default().i32(1);
        chunks[4].1 = event(body, "many", 0x8000, 0, false)
            .i32(-1)
            .i32(-1)
            .i32(0)
            .i32(0);
        assert!(parse(chunks).is_err());
    }

    #[test]
    fn test_sound_index_out_of_range() {
        let mut chunks = all_chunks();
        let body = Body::default().i32(1);
        chunks[4].1 = event(body, "bad", 1, 5, false).i32(-1).i32(-1).i32(0).i32(0);
        assert!(parse(chunks).is_err());
    }

    #[test]
    fn test_unset_instance_count_allocates_one() {
        let mut chunks = all_chunks();
        let body = Body::default().i32(1);
        chunks[4].1 = event(body, "single", -1, 0, true).i32(-1).i32(-1).i32(0).i32(0);
        let data = parse(chunks).unwrap();
        assert_eq!(data.events[0].num_instances, 1);
        assert!(data.events[0].is_positional);
    }
}
