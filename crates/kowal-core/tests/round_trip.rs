//! End-to-end render of a single event at the default host format

mod common;

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use common::*;
use kowal_core::engine::{EventHandle, Mixer};
use kowal_core::{Engine, KwlError};

const TONE: i16 = 10_000;

/// One mono one-shot on the master bus
fn tone_engine(num_frames: usize, queue_capacity: Option<usize>) -> (Engine, Mixer) {
    let (mut engine, mixer) = match queue_capacity {
        Some(capacity) => {
            let config = kowal_core::config::EngineConfig {
                message_queue_capacity: capacity,
                ..Default::default()
            };
            Engine::new(&config).unwrap()
        }
        None => engine(44100, 2, 512),
    };
    let data = DataBuilder::new()
        .bank("sfx", &["tone.wav"])
        .sound(SoundSpec::default())
        .event(EventSpec {
            id: "tone",
            instances: 8,
            ..Default::default()
        })
        .build();
    engine.load_engine_data_from_bytes(data).unwrap();
    let samples = vec![TONE; num_frames];
    engine
        .load_wave_bank_from_bytes(wave_bank("sfx", &[("tone.wav", 1, &samples)]))
        .unwrap();
    (engine, mixer)
}

#[test]
fn test_mono_one_shot_plays_then_reports_stop() {
    let (mut engine, mut mixer) = tone_engine(600, None);
    let tone: EventHandle = engine.event_handle("tone").unwrap();
    let stops = Arc::new(AtomicUsize::new(0));
    let counter = stops.clone();
    engine
        .set_event_stopped_callback(tone, move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        })
        .unwrap();

    engine.start_event(tone, 0.0).unwrap();
    let first = tick(&mut engine, &mut mixer, 512);
    assert!(!is_silent(&first));
    for frame in first.chunks_exact(2) {
        assert_eq!(frame[0].to_bits(), frame[1].to_bits());
    }
    let expected = TONE as f32 / 32767.0;
    assert!((first[0] - expected).abs() < 1e-6);

    // 88 frames remain, then the sound is used up
    let second = tick(&mut engine, &mut mixer, 512);
    assert!(!is_silent(&second[..88 * 2]));
    assert!(is_silent(&second[88 * 2..]));

    let third = tick(&mut engine, &mut mixer, 512);
    assert!(is_silent(&third));
    engine.update(0.0).unwrap();
    assert!(!engine.is_event_playing(tone).unwrap());
    assert_eq!(stops.load(Ordering::SeqCst), 1);
}

#[test]
fn test_parameters_need_a_flush() {
    let (mut engine, mut mixer) = tone_engine(44100, None);
    let tone = engine.event_handle("tone").unwrap();
    engine.start_event(tone, 0.0).unwrap();
    let before = peak(&tick(&mut engine, &mut mixer, 512));

    // Written but not flushed: the mixer keeps its snapshot
    engine.set_event_gain(tone, 0.5, true).unwrap();
    let mut out = vec![0.0; 1024];
    mixer.render(&mut out, 512);
    assert_eq!(peak(&out), before);

    // One flush, one pull: the change arrives as a ramp, then settles
    tick(&mut engine, &mut mixer, 512);
    let settled = tick(&mut engine, &mut mixer, 512);
    for s in &settled {
        assert!((s - before * 0.5).abs() < 1e-6);
    }
}

#[test]
fn test_full_queue_rejects_start() {
    let (mut engine, mut mixer) = tone_engine(44100, Some(4));
    // Deliver the data and wave bank messages first
    tick(&mut engine, &mut mixer, 512);

    let handles: Vec<_> = (0..5).map(|_| engine.event_handle("tone").unwrap()).collect();
    for handle in &handles[..4] {
        engine.start_event(*handle, 0.0).unwrap();
    }
    assert!(matches!(
        engine.start_event(handles[4], 0.0),
        Err(KwlError::MessageQueueFull)
    ));
    assert!(!engine.is_event_playing(handles[4]).unwrap());

    // Draining the queue makes room again
    tick(&mut engine, &mut mixer, 512);
    engine.start_event(handles[4], 0.0).unwrap();
    assert_eq!(engine.counters().dropped_messages, 0);
}
