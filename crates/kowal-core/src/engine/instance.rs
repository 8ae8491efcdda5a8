//! Event instances
//!
//! Each event instance exists twice: the control engine's [`EventInstance`]
//! holds what the host sets (user gain, position, callback, decoder) and
//! the mixer's [`RenderState`] holds what rendering needs (playback state,
//! source buffer, cursor, fades). They only meet through messages and the
//! shared [`EventParams`] slot.

use basedrop::{Owned, Shared};
use rand::rngs::StdRng;

use super::definition::{EventDefinition, EventSource};
use super::dsp::{self, DspUnitHandle};
use super::handle::EventHandle;
use super::message::FromMixer;
use super::positional::{spatialize, Emitter, Listener, PositionalSettings};
use super::shared::{EventParams, MixerCounters};
use super::sound::Sound;
use crate::data::WaveBankAudio;
use crate::decoder::{Decoder, StreamTap, TapStatus};
use crate::types::{Sample, PCM_TO_FLOAT, PITCH_EPSILON};

/// Per-frame gain steps smaller than this are applied as a constant gain
const GAIN_RAMP_THRESHOLD: f32 = 1e-7;

/// Called on the control thread when an event stops
pub type StoppedCallback = Box<dyn FnMut(EventHandle) + Send>;

/// Mixer-side playback state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlaybackState {
    Playing,
    /// The current buffer is the last one the sound will play
    PlayingLastBuffer,
    Stopped,
    StopRequested,
    /// Stop, then report the freeform event for unloading
    StopAndUnloadRequested,
    /// Jump to the last entry of an in-out sound, then stop
    PlayLastBufferAndStopRequested,
}

/// Where the samples being played live
pub(crate) enum SourceBuffer {
    None,
    /// An entry of a loaded wave bank
    Bank {
        audio: Shared<WaveBankAudio>,
        entry: usize,
    },
    /// The PCM owned by the event's own definition
    Definition,
    /// The current buffer of the event's stream tap
    Stream,
}

/// Read position within the source buffer
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub(crate) struct Cursor {
    pub frame: usize,
    /// Fractional position towards the next frame
    pub pitch_acc: f32,
}

/// Objects an event needs from the mixer while rendering
pub(crate) struct RenderEnv<'a> {
    pub sounds: &'a [Sound],
    pub wave_banks: &'a [Option<Shared<WaveBankAudio>>],
    pub rng: &'a mut StdRng,
    pub counters: &'a MixerCounters,
}

/// How an event is fed, looked up from its definition
enum Feed {
    Sound(usize),
    Stream,
    Definition(usize),
    Silent,
}

enum Advance {
    Continue,
    Done,
    Missed,
}

fn source_samples<'a>(
    source: &'a SourceBuffer,
    definition: &'a EventDefinition,
    stream: &'a Option<Owned<StreamTap>>,
) -> &'a [i16] {
    match source {
        SourceBuffer::None => &[],
        SourceBuffer::Bank { audio, entry } => audio
            .entry(*entry)
            .and_then(|data| data.pcm())
            .unwrap_or(&[]),
        SourceBuffer::Definition => match &definition.source {
            EventSource::Freeform(data) => data.pcm().unwrap_or(&[]),
            _ => &[],
        },
        SourceBuffer::Stream => stream.as_deref().map_or(&[], |tap| tap.samples()),
    }
}

#[inline]
fn read_frame(samples: &[i16], num_channels: usize, frame: usize) -> (f32, f32) {
    let i = frame * num_channels;
    let left = samples.get(i).copied().unwrap_or(0) as f32;
    if num_channels == 1 {
        (left, left)
    } else {
        (left, samples.get(i + 1).copied().unwrap_or(0) as f32)
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Mixer side
// ─────────────────────────────────────────────────────────────────────────────

/// The mixer's half of an event instance
pub struct RenderState {
    pub(crate) handle: EventHandle,
    pub(crate) definition: Shared<EventDefinition>,
    /// Mixer slot of the event's parameters
    pub(crate) params: EventParams,
    pub(crate) playback: PlaybackState,
    pub(crate) paused: bool,
    pub(crate) source: SourceBuffer,
    pub(crate) stream: Option<Owned<StreamTap>>,
    /// Channels of the current source buffer
    pub(crate) num_channels: usize,
    pub(crate) cursor: Cursor,
    pub(crate) buffer_frames: usize,
    pub(crate) num_buffers_played: i32,
    /// Index into the sound's entries of the buffer being played
    pub(crate) current_entry: usize,
    pub(crate) sound_pitch: f32,
    pub(crate) sound_gain: f32,
    pub(crate) fade_gain: f32,
    /// Fade gain change per frame
    pub(crate) fade_increment: f32,
    /// Effective gain at the end of the previous render; negative before the first
    pub(crate) prev_gain: [f32; 2],
}

impl RenderState {
    pub fn new(handle: EventHandle, definition: Shared<EventDefinition>) -> Self {
        Self {
            handle,
            definition,
            params: EventParams::default(),
            playback: PlaybackState::Stopped,
            paused: false,
            source: SourceBuffer::None,
            stream: None,
            num_channels: 0,
            cursor: Cursor::default(),
            buffer_frames: 0,
            num_buffers_played: 0,
            current_entry: 0,
            sound_pitch: 1.0,
            sound_gain: 1.0,
            fade_gain: 1.0,
            fade_increment: 0.0,
            prev_gain: [-1.0; 2],
        }
    }

    #[inline]
    pub fn handle(&self) -> EventHandle {
        self.handle
    }

    #[inline]
    pub fn playback(&self) -> PlaybackState {
        self.playback
    }

    /// Reset the per-playback state
    pub(crate) fn start(&mut self) {
        self.playback = PlaybackState::Playing;
        self.paused = false;
        self.num_buffers_played = 0;
        self.cursor = Cursor::default();
        self.sound_pitch = 1.0;
        self.sound_gain = 1.0;
        self.fade_gain = 1.0;
        self.fade_increment = 0.0;
        self.prev_gain = [-1.0; 2];
    }

    pub(crate) fn refresh_buffer_frames(&mut self) {
        let len = source_samples(&self.source, &self.definition, &self.stream).len();
        self.buffer_frames = if self.num_channels > 0 {
            len / self.num_channels
        } else {
            0
        };
    }

    fn feed(&self) -> Feed {
        match &self.definition.source {
            EventSource::Sound(index) => Feed::Sound(*index),
            EventSource::Stream { .. } => Feed::Stream,
            EventSource::Freeform(data) => Feed::Definition(data.num_channels),
            EventSource::None => Feed::Silent,
        }
    }

    fn sound<'a>(&self, sounds: &'a [Sound]) -> Option<&'a Sound> {
        match self.definition.source {
            EventSource::Sound(index) => sounds.get(index),
            _ => None,
        }
    }

    /// Handle `EventStart` and `EventRetrigger`
    ///
    /// Picks the first buffer and sets up the fade-in. An event with nothing
    /// to play is left in `StopRequested` and finishes on its next render.
    pub(crate) fn begin(
        &mut self,
        fade_in_secs: f32,
        sample_rate: f32,
        stream: Option<Owned<StreamTap>>,
        env: &mut RenderEnv,
    ) {
        self.start();
        if stream.is_some() {
            self.stream = stream;
        }

        let stop = match self.feed() {
            Feed::Sound(index) => match env.sounds.get(index) {
                Some(sound) => sound.pick_next_buffer(self, true, env.wave_banks, env.rng),
                None => true,
            },
            Feed::Stream => match self.stream.as_deref() {
                Some(tap) => {
                    self.num_channels = tap.num_channels();
                    self.source = SourceBuffer::Stream;
                    self.refresh_buffer_frames();
                    false
                }
                None => true,
            },
            Feed::Definition(num_channels) => {
                self.num_channels = num_channels;
                self.source = SourceBuffer::Definition;
                self.refresh_buffer_frames();
                false
            }
            Feed::Silent => true,
        };

        if fade_in_secs > 0.0 {
            self.fade_gain = 0.0;
            self.fade_increment = 1.0 / (fade_in_secs * sample_rate);
        }
        if stop {
            self.playback = PlaybackState::StopRequested;
        }
    }

    /// Handle `EventStop`
    pub(crate) fn request_stop(&mut self, fade_out_secs: f32, sample_rate: f32, sounds: &[Sound]) {
        if self.paused {
            self.playback = PlaybackState::StopRequested;
        } else if fade_out_secs > 0.0 {
            self.fade_increment = -1.0 / (fade_out_secs * sample_rate);
        } else if self.sound(sounds).is_some_and(|sound| sound.mode.is_in_out()) {
            self.playback = PlaybackState::PlayLastBufferAndStopRequested;
        } else {
            self.playback = PlaybackState::StopRequested;
        }
    }

    /// Release the playback resources and build the stop notification
    pub(crate) fn finish(&mut self) -> FromMixer {
        let message = if self.playback == PlaybackState::StopAndUnloadRequested {
            FromMixer::UnloadFreeformEvent(self.handle)
        } else {
            FromMixer::EventStopped(self.handle)
        };
        self.playback = PlaybackState::Stopped;
        self.paused = false;
        self.source = SourceBuffer::None;
        self.stream = None;
        self.buffer_frames = 0;
        message
    }

    /// Fetch the next source buffer once the current one is used up
    fn next_buffer(&mut self, env: &mut RenderEnv) -> Advance {
        if let Some(tap) = self.stream.as_deref_mut() {
            return match tap.next_buffer() {
                TapStatus::Advanced => {
                    self.num_buffers_played += 1;
                    self.cursor.frame = self.cursor.frame.saturating_sub(self.buffer_frames);
                    self.num_channels = tap.num_channels();
                    self.refresh_buffer_frames();
                    Advance::Continue
                }
                TapStatus::EndOfStream => Advance::Done,
                TapStatus::Missed => {
                    MixerCounters::add(&env.counters.missed_buffers, 1);
                    Advance::Missed
                }
            };
        }

        self.num_buffers_played += 1;
        match self.feed() {
            Feed::Sound(index) => match env.sounds.get(index) {
                Some(sound) if !sound.pick_next_buffer(self, false, env.wave_banks, env.rng) => {
                    Advance::Continue
                }
                _ => Advance::Done,
            },
            _ => Advance::Done,
        }
    }

    /// Render `num_frames` frames into `out`, replacing its contents
    ///
    /// `bus_pitch` is the accumulated pitch of the bus chain above the
    /// event. Returns true once the event has finished; the caller then
    /// reports it with [`RenderState::finish`].
    pub(crate) fn render(
        &mut self,
        out: &mut [Sample],
        out_channels: usize,
        num_frames: usize,
        bus_pitch: f32,
        env: &mut RenderEnv,
    ) -> bool {
        let out = &mut out[..out_channels * num_frames];
        out.fill(0.0);
        if num_frames == 0 {
            return false;
        }

        let defer_stop = self.sound(env.sounds).is_some_and(|sound| sound.defer_stop);
        match self.playback {
            PlaybackState::StopAndUnloadRequested | PlaybackState::Stopped => return true,
            PlaybackState::StopRequested if !defer_stop => return true,
            PlaybackState::PlayLastBufferAndStopRequested if !defer_stop => {
                if let Advance::Done = self.next_buffer(env) {
                    return true;
                }
            }
            _ => {}
        }

        if self.paused {
            return false;
        }

        self.fade_gain += self.fade_increment * num_frames as f32;
        if self.fade_gain > 1.0 {
            self.fade_gain = 1.0;
        } else if self.fade_increment < 0.0 && self.fade_gain <= 0.0 {
            self.fade_gain = 0.0;
            return true;
        }

        let gain = self.sound_gain * PCM_TO_FLOAT;
        let mut finished = false;
        let mut frame = 0;

        while frame < num_frames {
            if self.cursor.frame >= self.buffer_frames {
                match self.next_buffer(env) {
                    Advance::Continue if self.buffer_frames > 0 => continue,
                    Advance::Continue | Advance::Done => {
                        finished = true;
                        break;
                    }
                    // Silence until the decoder catches up
                    Advance::Missed => break,
                }
            }

            let pitch = (self.params.pitch * self.sound_pitch * bus_pitch).max(PITCH_EPSILON);
            let unit_pitch = (pitch - 1.0).abs() < PITCH_EPSILON;
            let src_channels = self.num_channels;
            let buffer_frames = self.buffer_frames;
            let samples = source_samples(&self.source, &self.definition, &self.stream);
            let cursor = &mut self.cursor;

            while frame < num_frames && cursor.frame < buffer_frames {
                let (left, right) = if unit_pitch {
                    let s = read_frame(samples, src_channels, cursor.frame);
                    cursor.frame += 1;
                    s
                } else {
                    let (a0, a1) = read_frame(samples, src_channels, cursor.frame);
                    let next = (cursor.frame + 1).min(buffer_frames - 1);
                    let (b0, b1) = read_frame(samples, src_channels, next);
                    let t = cursor.pitch_acc;
                    cursor.pitch_acc += pitch;
                    let whole = cursor.pitch_acc.floor();
                    cursor.frame += whole as usize;
                    cursor.pitch_acc -= whole;
                    ((1.0 - t) * a0 + t * b0, (1.0 - t) * a1 + t * b1)
                };

                let dst = frame * out_channels;
                out[dst] = left * gain;
                if out_channels > 1 {
                    out[dst + 1] = right * gain;
                }
                frame += 1;
            }
        }

        if let Some(unit) = &self.params.dsp {
            if !dsp::try_process(unit, out, out_channels, num_frames) {
                MixerCounters::add(&env.counters.busy_dsp_units, 1);
            }
        }

        self.apply_gain_ramp(out, out_channels, num_frames);
        finished
    }

    /// Multiply by the effective gain, ramping from the previous render's value
    fn apply_gain_ramp(&mut self, out: &mut [Sample], out_channels: usize, num_frames: usize) {
        for ch in 0..out_channels.min(2) {
            let target = self.fade_gain * self.params.gain[ch];
            if self.prev_gain[ch] < 0.0 {
                self.prev_gain[ch] = target;
            }
            let start = self.prev_gain[ch];
            let step = (target - start) / num_frames as f32;
            let samples = out.iter_mut().skip(ch).step_by(out_channels);

            if step.abs() < GAIN_RAMP_THRESHOLD {
                samples.for_each(|s| *s *= target);
            } else {
                for (i, s) in samples.enumerate() {
                    *s *= start + step * i as f32;
                }
            }
            self.prev_gain[ch] = target;
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Control side
// ─────────────────────────────────────────────────────────────────────────────

/// The control engine's half of an event instance
pub(crate) struct EventInstance {
    pub handle: EventHandle,
    pub definition: Shared<EventDefinition>,
    pub emitter: Emitter,
    pub user_gain: f32,
    pub user_pitch: f32,
    /// -1 is hard left, 1 hard right
    pub balance: f32,
    pub dsp: Option<DspUnitHandle>,
    pub callback: Option<StoppedCallback>,
    pub is_playing: bool,
    /// A host holds a handle to this instance
    pub associated: bool,
    /// Control slot of the event's parameters
    pub params: EventParams,
    pub decoder: Option<Decoder>,
}

impl EventInstance {
    pub fn new(handle: EventHandle, definition: Shared<EventDefinition>) -> Self {
        Self {
            handle,
            definition,
            emitter: Emitter::default(),
            user_gain: 1.0,
            user_pitch: 1.0,
            balance: 0.0,
            dsp: None,
            callback: None,
            is_playing: false,
            associated: false,
            params: EventParams::default(),
            decoder: None,
        }
    }

    /// Forget everything the previous handle holder set
    pub fn reset_user_state(&mut self) {
        self.user_gain = 1.0;
        self.user_pitch = 1.0;
        self.balance = 0.0;
        self.dsp = None;
        self.callback = None;
    }

    /// Recompute the control slot from the user values and the listener
    pub fn update_params(&mut self, listener: &Listener, settings: &PositionalSettings) {
        let definition = &*self.definition;
        let gain = definition.gain * self.user_gain;
        let pitch = definition.pitch * self.user_pitch;

        if definition.is_positional {
            let spatial = spatialize(listener, settings, &self.emitter, definition);
            self.params.gain = [gain * spatial.gain[0], gain * spatial.gain[1]];
            self.params.pitch = pitch * spatial.pitch;
        } else {
            self.params.gain = [gain * (1.0 - self.balance), gain * (1.0 + self.balance)];
            self.params.pitch = pitch;
        }
        self.params.dsp.clone_from(&self.dsp);

        if let Some(unit) = &self.dsp {
            dsp::update_engine(unit);
        }
    }

    pub fn notify_stopped(&mut self) {
        let handle = self.handle;
        if let Some(callback) = self.callback.as_mut() {
            callback(handle);
        }
    }
}
