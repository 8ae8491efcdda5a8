//! Streaming decoders
//!
//! A [`Codec`] turns encoded bytes into 16-bit PCM through a four-step pull
//! contract: construct, `decode_next_buffer`, `rewind`, drop. A [`Decoder`]
//! runs one codec on its own worker thread and hands decoded buffers to the
//! mixer through a [`StreamTap`].
//!
//! ```text
//!                 ┌──────── ready (rtrb) ────────┐
//!  decoder thread ┤                              ├ StreamTap (mixer)
//!                 └─────── recycle (rtrb) ───────┘
//!                       ▲
//!                       └── wake: crossbeam bounded(1)
//! ```
//!
//! Buffers circulate between the two sides and are allocated once, when
//! the decoder starts. The mixer never waits: if no decoded buffer is
//! ready when it needs one, [`StreamTap::next_buffer`] reports
//! [`TapStatus::Missed`] and the renderer outputs silence for the rest of
//! that render call.

mod pcm;
mod vorbis;

pub use pcm::{MemoryPcmCodec, PcmCodec, PCM_SAMPLES_PER_BUFFER};
pub use vorbis::VorbisCodec;

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use basedrop::Shared;
use crossbeam::channel::{bounded, Receiver, Sender};
use rtrb::{Consumer, Producer, RingBuffer};

use crate::data::{AudioPayload, Encoding, InputStream, WaveBankAudio};
use crate::error::{KwlError, KwlResult};

/// Number of buffers circulating between a decoder thread and the mixer
pub const NUM_STREAM_BUFFERS: usize = 3;

/// Pull interface every codec implements
///
/// Releasing codec state and the input stream happens on drop.
pub trait Codec: Send {
    fn num_channels(&self) -> usize;

    /// Upper bound of samples `decode_next_buffer` produces in one call
    fn max_buffer_samples(&self) -> usize;

    /// Decode the next buffer into `out`, replacing its contents
    ///
    /// Returns true when the source has no data left. The buffer filled by
    /// the call that returns true may still hold samples.
    fn decode_next_buffer(&mut self, out: &mut Vec<i16>) -> KwlResult<bool>;

    /// Start over from the beginning of the source
    fn rewind(&mut self) -> bool;
}

// ────────────────────────────────────────────────────────────────────────────────
// Codec selection
// ────────────────────────────────────────────────────────────────────────────────

/// Encoded bytes a codec can reopen from the start
#[derive(Debug, Clone)]
pub enum StreamOrigin {
    Memory(Arc<[u8]>),
    File { path: PathBuf, offset: u64, len: u64 },
}

impl StreamOrigin {
    pub fn open(&self) -> KwlResult<InputStream> {
        match self {
            StreamOrigin::Memory(bytes) => Ok(InputStream::from_bytes(bytes.clone())),
            StreamOrigin::File { path, offset, len } => InputStream::open_region(path, *offset, *len),
        }
    }
}

/// Create the codec for a wave bank entry
pub fn open_codec(audio: &Shared<WaveBankAudio>, entry: usize) -> KwlResult<Box<dyn Codec>> {
    let data = audio.entry(entry).ok_or_else(|| {
        KwlError::ErrorDecodingAudioData(format!("wave bank has no entry {}", entry))
    })?;

    let origin = match &data.payload {
        AudioPayload::Pcm(_) => return Ok(Box::new(MemoryPcmCodec::new(audio.clone(), entry)?)),
        AudioPayload::Encoded(bytes) => StreamOrigin::Memory(bytes.clone()),
        AudioPayload::File { path, offset, len } => StreamOrigin::File {
            path: path.clone(),
            offset: *offset,
            len: *len,
        },
    };

    match data.encoding {
        Encoding::Vorbis => Ok(Box::new(VorbisCodec::new(origin)?)),
        encoding if encoding.is_pcm() => Ok(Box::new(PcmCodec::new(origin.open()?)?)),
        _ => Err(KwlError::UnsupportedEncoding),
    }
}

// ────────────────────────────────────────────────────────────────────────────────
// Mixer side
// ────────────────────────────────────────────────────────────────────────────────

/// Outcome of asking a tap for its next buffer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TapStatus {
    Advanced,
    /// The source is exhausted and every decoded buffer has been consumed
    EndOfStream,
    /// The decoder has not produced the next buffer yet
    Missed,
}

/// The mixer's end of a streaming decoder
pub struct StreamTap {
    current: Vec<i16>,
    num_channels: usize,
    ready: Consumer<Vec<i16>>,
    recycle: Producer<Vec<i16>>,
    wake: Sender<()>,
    finished: Arc<AtomicBool>,
}

impl StreamTap {
    /// Samples of the buffer currently being played
    #[inline]
    pub fn samples(&self) -> &[i16] {
        &self.current
    }

    #[inline]
    pub fn num_channels(&self) -> usize {
        self.num_channels
    }

    /// Swap in the next decoded buffer
    ///
    /// Never blocks and never allocates. The consumed buffer goes back to
    /// the decoder thread, which is woken to refill it.
    pub fn next_buffer(&mut self) -> TapStatus {
        if let Ok(next) = self.ready.pop() {
            self.advance(next);
            return TapStatus::Advanced;
        }
        if self.finished.load(Ordering::Acquire) {
            // The last buffer may have been pushed just before the flag
            if let Ok(next) = self.ready.pop() {
                self.advance(next);
                return TapStatus::Advanced;
            }
            return TapStatus::EndOfStream;
        }
        let _ = self.wake.try_send(());
        TapStatus::Missed
    }

    fn advance(&mut self, next: Vec<i16>) {
        let consumed = std::mem::replace(&mut self.current, next);
        // Holds every buffer in circulation, so this never fails
        let _ = self.recycle.push(consumed);
        let _ = self.wake.try_send(());
    }
}

// ────────────────────────────────────────────────────────────────────────────────
// Control side
// ────────────────────────────────────────────────────────────────────────────────

/// A codec running on its own thread
///
/// Dropping the decoder cancels the worker and joins it.
pub struct Decoder {
    worker: Option<JoinHandle<()>>,
    cancel: Arc<AtomicBool>,
    wake: Sender<()>,
    num_channels: usize,
}

impl Decoder {
    /// Open a wave bank entry and prime its first buffer
    ///
    /// The first buffer is decoded before this returns, so the tap always
    /// has data when the event starts rendering.
    pub fn new(
        audio: &Shared<WaveBankAudio>,
        entry: usize,
        looping: bool,
    ) -> KwlResult<(Decoder, StreamTap)> {
        let codec = open_codec(audio, entry)?;
        Self::from_codec(codec, looping)
    }

    pub fn from_codec(mut codec: Box<dyn Codec>, looping: bool) -> KwlResult<(Decoder, StreamTap)> {
        let num_channels = codec.num_channels();
        let capacity = codec.max_buffer_samples();

        let mut first = Vec::with_capacity(capacity);
        let mut end_of_stream = codec.decode_next_buffer(&mut first)?;
        if end_of_stream && looping && !first.is_empty() && codec.rewind() {
            end_of_stream = false;
        }

        let (ready_tx, ready_rx) = RingBuffer::new(NUM_STREAM_BUFFERS);
        let (recycle_tx, recycle_rx) = RingBuffer::new(NUM_STREAM_BUFFERS);
        let (wake_tx, wake_rx) = bounded(1);
        let cancel = Arc::new(AtomicBool::new(false));
        let finished = Arc::new(AtomicBool::new(end_of_stream));

        let worker = if end_of_stream {
            None
        } else {
            let spare = (1..NUM_STREAM_BUFFERS)
                .map(|_| Vec::with_capacity(capacity))
                .collect();
            let state = WorkerState {
                codec,
                ready: ready_tx,
                recycle: recycle_rx,
                wake: wake_rx,
                cancel: cancel.clone(),
                finished: finished.clone(),
                looping,
                spare,
            };
            let handle = thread::Builder::new()
                .name("kowal-decoder".to_string())
                .spawn(move || state.run())?;
            // Fill the remaining buffers straight away
            let _ = wake_tx.try_send(());
            Some(handle)
        };

        log::debug!(
            "Decoder: started ({} channels, looping: {}, worker: {})",
            num_channels,
            looping,
            worker.is_some()
        );

        let tap = StreamTap {
            current: first,
            num_channels,
            ready: ready_rx,
            recycle: recycle_tx,
            wake: wake_tx.clone(),
            finished,
        };
        let decoder = Decoder {
            worker,
            cancel,
            wake: wake_tx,
            num_channels,
        };
        Ok((decoder, tap))
    }

    #[inline]
    pub fn num_channels(&self) -> usize {
        self.num_channels
    }
}

impl Drop for Decoder {
    fn drop(&mut self) {
        self.cancel.store(true, Ordering::Release);
        let _ = self.wake.try_send(());
        if let Some(worker) = self.worker.take() {
            if worker.join().is_err() {
                log::error!("Decoder: worker thread panicked");
            }
        }
    }
}

// ────────────────────────────────────────────────────────────────────────────────
// Worker thread
// ────────────────────────────────────────────────────────────────────────────────

struct WorkerState {
    codec: Box<dyn Codec>,
    ready: Producer<Vec<i16>>,
    recycle: Consumer<Vec<i16>>,
    wake: Receiver<()>,
    cancel: Arc<AtomicBool>,
    finished: Arc<AtomicBool>,
    looping: bool,
    spare: Vec<Vec<i16>>,
}

impl WorkerState {
    fn run(mut self) {
        // Samples decoded since the last rewind; a loop over no data would spin
        let mut produced = true;

        while self.wake.recv().is_ok() {
            if self.cancel.load(Ordering::Acquire) {
                break;
            }
            while let Ok(buffer) = self.recycle.pop() {
                self.spare.push(buffer);
            }

            while !self.ready.is_full() {
                if self.cancel.load(Ordering::Acquire) {
                    return;
                }
                let Some(mut buffer) = self.spare.pop() else {
                    break;
                };

                let end_of_stream = match self.codec.decode_next_buffer(&mut buffer) {
                    Ok(end_of_stream) => end_of_stream,
                    Err(e) => {
                        log::warn!("Decoder: decoding failed: {}", e);
                        self.finished.store(true, Ordering::Release);
                        return;
                    }
                };

                if buffer.is_empty() {
                    self.spare.push(buffer);
                } else {
                    produced = true;
                    let _ = self.ready.push(buffer);
                }

                if end_of_stream {
                    if self.looping && produced && self.codec.rewind() {
                        produced = false;
                    } else {
                        self.finished.store(true, Ordering::Release);
                        log::debug!("Decoder: end of stream");
                        return;
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::AudioData;
    use crate::engine::gc::gc_handle;
    use std::time::Duration;

    fn bank(samples: Vec<i16>) -> Shared<WaveBankAudio> {
        Shared::new(
            &gc_handle(),
            WaveBankAudio {
                entries: vec![AudioData::from_pcm(1, samples)],
            },
        )
    }

    /// Pull buffers until `limit` samples or the end, waiting out misses
    fn collect(tap: &mut StreamTap, limit: usize) -> (Vec<i16>, bool) {
        let mut out = tap.samples().to_vec();
        let mut misses = 0;
        while out.len() < limit {
            match tap.next_buffer() {
                TapStatus::Advanced => out.extend_from_slice(tap.samples()),
                TapStatus::EndOfStream => return (out, true),
                TapStatus::Missed => {
                    misses += 1;
                    assert!(misses < 5000, "decoder never delivered");
                    thread::sleep(Duration::from_millis(1));
                }
            }
        }
        (out, false)
    }

    #[test]
    fn test_streams_whole_entry() {
        let samples: Vec<i16> = (0..5000).map(|i| i as i16).collect();
        let (decoder, mut tap) = Decoder::new(&bank(samples.clone()), 0, false).unwrap();
        assert_eq!(decoder.num_channels(), 1);
        assert_eq!(tap.samples().len(), PCM_SAMPLES_PER_BUFFER);

        let (out, ended) = collect(&mut tap, usize::MAX);
        assert!(ended);
        assert_eq!(out, samples);
    }

    #[test]
    fn test_looping_wraps_around() {
        let samples: Vec<i16> = (0..1500).map(|i| i as i16).collect();
        let (_decoder, mut tap) = Decoder::new(&bank(samples.clone()), 0, true).unwrap();

        let (out, ended) = collect(&mut tap, 4000);
        assert!(!ended);
        assert_eq!(out[..1500], samples[..]);
        assert_eq!(out[1500..3000], samples[..]);
    }

    #[test]
    fn test_short_entry_needs_no_worker() {
        let (decoder, mut tap) = Decoder::new(&bank(vec![1, 2, 3]), 0, false).unwrap();
        assert!(decoder.worker.is_none());
        assert_eq!(tap.samples(), &[1, 2, 3]);
        assert_eq!(tap.next_buffer(), TapStatus::EndOfStream);
    }

    #[test]
    fn test_drop_joins_worker() {
        let samples = vec![0i16; 100_000];
        let (decoder, tap) = Decoder::new(&bank(samples), 0, true).unwrap();
        drop(decoder);
        drop(tap);
    }

    #[test]
    fn test_unsupported_encoding() {
        let mut data = AudioData::from_pcm(1, Vec::new());
        data.encoding = Encoding::Aac;
        data.payload = AudioPayload::Encoded(Arc::from(&[0u8; 8][..]));
        let audio = Shared::new(&gc_handle(), WaveBankAudio { entries: vec![data] });
        assert!(matches!(
            open_codec(&audio, 0),
            Err(KwlError::UnsupportedEncoding)
        ));
    }
}
