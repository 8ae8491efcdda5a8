//! Deferred deallocation for data handed to the mixer
//!
//! Mixer data, wave bank audio, freeform voices, decoder taps and DSP units
//! are allocated on the control thread and may be released by the mixer.
//! Wrapping them in `basedrop::Owned` / `basedrop::Shared` turns a drop on
//! the audio thread into a pointer enqueue; the free itself runs on the
//! `audio-gc` thread started here.

use basedrop::{Collector, Handle};
use std::sync::mpsc;
use std::sync::OnceLock;
use std::thread;
use std::time::Duration;

/// How often the collector thread reclaims queued drops
const COLLECT_INTERVAL: Duration = Duration::from_millis(50);

static GC_HANDLE: OnceLock<Handle> = OnceLock::new();

fn spawn_collector() -> Handle {
    let (tx, rx) = mpsc::channel();

    thread::Builder::new()
        .name("audio-gc".to_string())
        .spawn(move || {
            // Collector is !Sync, so it lives and dies on this thread
            let mut collector = Collector::new();
            tx.send(collector.handle())
                .expect("audio-gc: receiver dropped before handle was sent");
            log::debug!("audio-gc thread started");

            loop {
                collector.collect();
                thread::sleep(COLLECT_INTERVAL);
            }
        })
        .expect("Failed to spawn audio-gc thread");

    rx.recv().expect("Failed to receive audio-gc handle")
}

/// Handle used to allocate `Owned<T>` / `Shared<T>` values
pub fn gc_handle() -> Handle {
    GC_HANDLE.get_or_init(spawn_collector).clone()
}
