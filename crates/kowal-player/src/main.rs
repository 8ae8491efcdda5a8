//! Kowal Player - command-line host for the kowal mixing engine
//!
//! Starts the audio system, plays one sound and prints output levels until
//! the sound stops or the time limit runs out.
//!
//! ## Usage
//!
//! ```text
//! kowal-player [options] play <audio file>
//! kowal-player [options] event <engine data> <event id> [wave bank ...]
//! kowal-player devices
//!
//! options:
//!   --config <path>    engine settings (default: <config dir>/kowal/engine.yaml)
//!   --seconds <n>      stop after n seconds (default: 10)
//!   --loop             keep restarting the sound until the time limit
//! ```

use std::path::PathBuf;
use std::time::{Duration, Instant};

use anyhow::{bail, Context, Result};

use kowal_core::audio::{get_available_output_devices, start_audio_system};
use kowal_core::config::{default_config_path, load_config, EngineConfig};
use kowal_core::engine::{EventHandle, FreeformKind};
use kowal_core::Engine;

/// Control update interval
const TICK: Duration = Duration::from_millis(16);

/// Interval between meter lines
const METER_INTERVAL: Duration = Duration::from_millis(500);

enum Command {
    Play(PathBuf),
    Event {
        data: PathBuf,
        event: String,
        banks: Vec<PathBuf>,
    },
    Devices,
}

struct Options {
    command: Command,
    config_path: PathBuf,
    seconds: f32,
    looping: bool,
}

fn parse_args(args: &[String]) -> Result<Options> {
    let mut config_path = default_config_path();
    let mut seconds = 10.0;
    let mut looping = false;
    let mut positional = Vec::new();

    let mut iter = args.iter();
    while let Some(arg) = iter.next() {
        match arg.as_str() {
            "--config" => {
                config_path = iter.next().context("--config needs a path")?.into();
            }
            "--seconds" => {
                let value = iter.next().context("--seconds needs a value")?;
                seconds = value
                    .parse()
                    .with_context(|| format!("invalid --seconds value: {}", value))?;
            }
            "--loop" => looping = true,
            _ => positional.push(arg.clone()),
        }
    }

    let command = match positional.as_slice() {
        [cmd] if cmd == "devices" => Command::Devices,
        [cmd, file] if cmd == "play" => Command::Play(file.into()),
        [cmd, data, event, banks @ ..] if cmd == "event" => Command::Event {
            data: data.into(),
            event: event.clone(),
            banks: banks.iter().map(PathBuf::from).collect(),
        },
        _ => bail!(
            "usage: kowal-player [--config <path>] [--seconds <n>] [--loop] \
             (play <file> | event <engine data> <event id> [wave bank ...] | devices)"
        ),
    };

    Ok(Options {
        command,
        config_path,
        seconds,
        looping,
    })
}

fn main() -> Result<()> {
    // Set RUST_LOG=debug for verbose output
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
        .format_timestamp_millis()
        .init();

    let args: Vec<String> = std::env::args().skip(1).collect();
    let options = parse_args(&args)?;

    if let Command::Devices = options.command {
        for device in get_available_output_devices() {
            let marker = if device.is_default { "*" } else { " " };
            println!(
                "{} {} ({} ch, {:?} Hz)",
                marker, device, device.max_channels, device.sample_rates
            );
        }
        return Ok(());
    }

    let mut config: EngineConfig = load_config(&options.config_path);
    config.level_metering = true;

    let (mut engine, audio) = start_audio_system(&config).context("Failed to start audio")?;
    log::info!(
        "kowal-player running at {} Hz (~{:.1}ms latency)",
        audio.sample_rate(),
        audio.latency_ms()
    );

    let event = match &options.command {
        Command::Play(path) => engine
            .create_freeform_event_from_file(path, FreeformKind::NonPositional)
            .with_context(|| format!("Failed to load {}", path.display()))?,
        Command::Event { data, event, banks } => {
            engine
                .load_engine_data(data)
                .with_context(|| format!("Failed to load engine data {}", data.display()))?;
            for bank in banks {
                engine
                    .load_wave_bank(bank)
                    .with_context(|| format!("Failed to load wave bank {}", bank.display()))?;
            }
            engine
                .event_handle(event)
                .with_context(|| format!("No instance of event '{}'", event))?
        }
        Command::Devices => bail!("nothing to play"),
    };

    engine.start_event(event, 0.0).context("Failed to start event")?;
    run(&mut engine, event, options.seconds, options.looping)?;

    engine.stop_event(event, 0.1)?;
    for _ in 0..10 {
        engine.update(TICK.as_secs_f32())?;
        std::thread::sleep(TICK);
    }
    engine.release_event(event)?;
    if engine.is_engine_data_loaded() {
        engine.unload_engine_data()?;
    }

    let counters = engine.counters();
    log::info!(
        "Done: {} lock misses, {} dropped messages, {} missed decoder buffers",
        counters.lock_misses,
        counters.dropped_messages,
        counters.missed_buffers
    );
    Ok(())
}

/// Drive the control engine and print meters until the event stops
fn run(engine: &mut Engine, event: EventHandle, seconds: f32, looping: bool) -> Result<()> {
    let start = Instant::now();
    let mut last_tick = start;
    let mut last_meter = start;

    while start.elapsed().as_secs_f32() < seconds {
        std::thread::sleep(TICK);
        let now = Instant::now();
        engine.update((now - last_tick).as_secs_f32())?;
        last_tick = now;

        if !engine.is_event_playing(event)? {
            if !looping {
                break;
            }
            engine.start_event(event, 0.0)?;
        }

        if now - last_meter >= METER_INTERVAL {
            last_meter = now;
            let (left, right) = engine.output_levels()?;
            let clipped = engine.has_clipped()?;
            println!(
                "{:6.2}s  L {:5.3}  R {:5.3}{}  ({} frames)",
                start.elapsed().as_secs_f32(),
                left,
                right,
                if clipped { "  CLIP" } else { "" },
                engine.num_frames_mixed()
            );
        }
    }
    Ok(())
}
