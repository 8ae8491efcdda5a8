//! Fades, gain ramps, sound sequencing and bus mixing through the public API

mod common;

use common::*;
use kowal_core::engine::{EventHandle, Mixer};
use kowal_core::Engine;

const LEVEL: i16 = 8000;
const FRAMES: usize = 16;

fn level(sample: i16) -> f32 {
    sample as f32 / 32767.0
}

/// One event over a single long constant entry, at 1 kHz with 16-frame buffers
fn steady_engine() -> (Engine, Mixer, EventHandle) {
    let (mut engine, mixer) = engine(1000, 2, FRAMES);
    let data = DataBuilder::new()
        .bank("sfx", &["long.wav"])
        .sound(SoundSpec::default())
        .event(EventSpec::default())
        .build();
    engine.load_engine_data_from_bytes(data).unwrap();
    let samples = vec![LEVEL; 2000];
    engine
        .load_wave_bank_from_bytes(wave_bank("sfx", &[("long.wav", 1, &samples)]))
        .unwrap();
    let handle = engine.event_handle("event").unwrap();
    (engine, mixer, handle)
}

fn left(buffer: &[f32]) -> Vec<f32> {
    buffer.iter().step_by(2).copied().collect()
}

#[test]
fn test_fade_in_rises_monotonically() {
    let (mut engine, mut mixer, handle) = steady_engine();
    engine.start_event(handle, 0.1).unwrap();

    let mut samples = Vec::new();
    for _ in 0..10 {
        samples.extend(left(&tick(&mut engine, &mut mixer, FRAMES)));
    }
    for pair in samples.windows(2) {
        assert!(pair[1] >= pair[0] - 1e-7, "{} then {}", pair[0], pair[1]);
    }
    assert!(samples.iter().all(|s| *s <= level(LEVEL) + 1e-6));
    assert!((samples[samples.len() - 1] - level(LEVEL)).abs() < 1e-6);
}

#[test]
fn test_fade_out_finishes_on_the_render_reaching_zero() {
    let (mut engine, mut mixer, handle) = steady_engine();
    engine.start_event(handle, 0.0).unwrap();
    tick(&mut engine, &mut mixer, FRAMES);

    // 50 frames at 16 per render: 0.68, 0.36, 0.04, then zero
    engine.stop_event(handle, 0.05).unwrap();
    let mut samples = Vec::new();
    let mut silent_render = None;
    for render in 0..8 {
        engine.update(0.0).unwrap();
        if silent_render.is_some() {
            assert!(!engine.is_event_playing(handle).unwrap());
            break;
        }
        assert!(engine.is_event_playing(handle).unwrap());

        let mut out = vec![0.0; FRAMES * 2];
        mixer.render(&mut out, FRAMES);
        if is_silent(&out) {
            silent_render = Some(render);
        }
        samples.extend(left(&out));
    }

    assert_eq!(silent_render, Some(3));
    for pair in samples.windows(2) {
        assert!(pair[1] <= pair[0] + 1e-7, "{} then {}", pair[0], pair[1]);
    }
}

#[test]
fn test_gain_change_ramps_across_one_buffer() {
    let (mut engine, mut mixer, handle) = steady_engine();
    engine.start_event(handle, 0.0).unwrap();
    let steady = left(&tick(&mut engine, &mut mixer, FRAMES));
    let previous = steady[FRAMES - 1];

    engine.set_event_gain(handle, 0.25, true).unwrap();
    let ramp = left(&tick(&mut engine, &mut mixer, FRAMES));
    let step = (0.25 - 1.0) / FRAMES as f32 * level(LEVEL);

    assert!((ramp[0] - previous).abs() <= step.abs() + 1e-6);
    for pair in ramp.windows(2) {
        assert!((pair[1] - pair[0] - step).abs() < 1e-5);
    }

    let settled = left(&tick(&mut engine, &mut mixer, FRAMES));
    assert!(settled.iter().all(|s| (s - 0.25 * level(LEVEL)).abs() < 1e-6));
}

#[test]
fn test_sequential_restart_begins_with_first_entry() {
    let (mut engine, mut mixer) = engine(1000, 2, FRAMES);
    let data = DataBuilder::new()
        .bank("sfx", &["a.wav", "b.wav"])
        .sound(SoundSpec {
            playback_count: 2,
            mode: SEQUENTIAL,
            entries: vec![(0, 0), (0, 1)],
            ..Default::default()
        })
        .event(EventSpec::default())
        .build();
    engine.load_engine_data_from_bytes(data).unwrap();
    let a = [LEVEL; FRAMES];
    let b = [LEVEL / 2; FRAMES];
    engine
        .load_wave_bank_from_bytes(wave_bank("sfx", &[("a.wav", 1, &a), ("b.wav", 1, &b)]))
        .unwrap();
    let handle = engine.event_handle("event").unwrap();

    engine.start_event(handle, 0.0).unwrap();
    assert!((peak(&tick(&mut engine, &mut mixer, FRAMES)) - level(LEVEL)).abs() < 1e-6);
    assert!((peak(&tick(&mut engine, &mut mixer, FRAMES)) - level(LEVEL / 2)).abs() < 1e-6);

    // Retriggering always starts over at the first entry
    engine.start_event(handle, 0.0).unwrap();
    assert!((peak(&tick(&mut engine, &mut mixer, FRAMES)) - level(LEVEL)).abs() < 1e-6);
    assert!((peak(&tick(&mut engine, &mut mixer, FRAMES)) - level(LEVEL / 2)).abs() < 1e-6);
    assert!(is_silent(&tick(&mut engine, &mut mixer, FRAMES)));
}

#[test]
fn test_silent_events_on_a_bus_tree_mix_to_silence() {
    let (mut engine, mut mixer) = engine(1000, 2, FRAMES);
    let data = DataBuilder::new()
        .bus("music", 0)
        .bus("voice", 0)
        .bus("ambience", 1)
        .bank("sfx", &["zero.wav"])
        .sound(SoundSpec::default())
        .event(EventSpec {
            id: "on_music",
            instances: 2,
            bus: 1,
            ..Default::default()
        })
        .event(EventSpec {
            id: "on_voice",
            instances: 2,
            bus: 2,
            ..Default::default()
        })
        .event(EventSpec {
            id: "on_ambience",
            instances: 2,
            bus: 3,
            ..Default::default()
        })
        .build();
    engine.load_engine_data_from_bytes(data).unwrap();
    let zeros = [0i16; 500];
    engine
        .load_wave_bank_from_bytes(wave_bank("sfx", &[("zero.wav", 1, &zeros)]))
        .unwrap();

    let mut handles = Vec::new();
    for id in ["on_music", "on_voice", "on_ambience"] {
        for _ in 0..2 {
            let handle = engine.event_handle(id).unwrap();
            engine.start_event(handle, 0.0).unwrap();
            handles.push(handle);
        }
    }

    for _ in 0..5 {
        assert!(is_silent(&tick(&mut engine, &mut mixer, FRAMES)));
    }
    for handle in handles {
        assert!(engine.is_event_playing(handle).unwrap());
    }
}
