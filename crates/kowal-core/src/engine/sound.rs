//! Sounds: buffer sequencing for non-streaming events
//!
//! Each time an event runs out of source audio, its sound picks the next
//! wave bank entry to play according to its [`PlaybackMode`], rolls new
//! gain and pitch jitter, and decides whether playback is over.

use basedrop::Shared;
use rand::Rng;

use super::instance::{PlaybackState, RenderState, SourceBuffer};
use crate::data::WaveBankAudio;
use crate::error::{KwlError, KwlResult};
use crate::types::PITCH_EPSILON;

/// How a sound picks its next entry
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlaybackMode {
    Random = 0,
    RandomNoRepeat = 1,
    Sequential = 2,
    SequentialNoReset = 3,
    InRandomOut = 4,
    InRandomNoRepeatOut = 5,
    InSequentialOut = 6,
}

impl PlaybackMode {
    pub fn from_code(code: i32) -> KwlResult<Self> {
        Ok(match code {
            0 => PlaybackMode::Random,
            1 => PlaybackMode::RandomNoRepeat,
            2 => PlaybackMode::Sequential,
            3 => PlaybackMode::SequentialNoReset,
            4 => PlaybackMode::InRandomOut,
            5 => PlaybackMode::InRandomNoRepeatOut,
            6 => PlaybackMode::InSequentialOut,
            _ => {
                return Err(KwlError::CorruptBinaryData(format!(
                    "unknown playback mode {}",
                    code
                )))
            }
        })
    }

    /// Modes that always start on the first entry and end on the last one
    #[inline]
    pub fn is_in_out(self) -> bool {
        matches!(
            self,
            PlaybackMode::InRandomOut | PlaybackMode::InRandomNoRepeatOut | PlaybackMode::InSequentialOut
        )
    }
}

/// Location of an audio data entry
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AudioRef {
    pub wave_bank: usize,
    pub entry: usize,
}

/// Sequencing policy of a non-streaming event
#[derive(Debug, Clone, PartialEq)]
pub struct Sound {
    /// Number of buffers to play; negative plays until stopped
    pub playback_count: i32,
    /// Let the current buffer finish when a stop is requested
    pub defer_stop: bool,
    pub gain: f32,
    /// Gain jitter in percent
    pub gain_variation: f32,
    pub pitch: f32,
    /// Pitch jitter in percent
    pub pitch_variation: f32,
    pub mode: PlaybackMode,
    pub entries: Vec<AudioRef>,
}

impl Sound {
    /// Select the buffer `state` plays next
    ///
    /// Returns true if playback should stop instead. On success the state's
    /// source, frame index, channel count and per-buffer jitter are updated.
    pub(crate) fn pick_next_buffer<R: Rng>(
        &self,
        state: &mut RenderState,
        first_buffer: bool,
        wave_banks: &[Option<Shared<WaveBankAudio>>],
        rng: &mut R,
    ) -> bool {
        let count = self.playback_count;
        if count >= 0 && state.num_buffers_played >= count {
            return true;
        }
        if matches!(
            state.playback,
            PlaybackState::StopRequested | PlaybackState::PlayingLastBuffer
        ) {
            return true;
        }
        if self.entries.is_empty() {
            return true;
        }

        let last_buffer = count >= 0 && state.num_buffers_played == count - 1;

        let jitter: f32 = rng.random_range(-1.0..1.0);
        state.sound_pitch = (self.pitch + jitter * 0.01 * self.pitch_variation).max(PITCH_EPSILON);
        let jitter: f32 = rng.random_range(-1.0..1.0);
        state.sound_gain = (self.gain + jitter * 0.01 * self.gain_variation).max(0.0);

        let index = self.next_index(state, first_buffer, last_buffer, rng);

        let entry = self.entries[index];
        let Some(audio) = wave_banks.get(entry.wave_bank).and_then(Option::as_ref) else {
            return true;
        };
        let num_channels = match audio.entry(entry.entry) {
            Some(data) if data.pcm().is_some() && data.num_channels > 0 => data.num_channels,
            _ => return true,
        };

        let reset = first_buffer || (self.mode.is_in_out() && !self.defer_stop);
        if reset {
            state.cursor.frame = 0;
        } else {
            state.cursor.frame = state.cursor.frame.saturating_sub(state.buffer_frames);
        }

        state.current_entry = index;
        state.source = SourceBuffer::Bank {
            audio: audio.clone(),
            entry: entry.entry,
        };
        state.num_channels = num_channels;
        state.refresh_buffer_frames();
        false
    }

    fn next_index<R: Rng>(
        &self,
        state: &mut RenderState,
        first_buffer: bool,
        last_buffer: bool,
        rng: &mut R,
    ) -> usize {
        let n = self.entries.len();
        let current = state.current_entry;

        match self.mode {
            PlaybackMode::Random => rng.random_range(0..n),
            PlaybackMode::RandomNoRepeat => {
                let index = rng.random_range(0..n);
                if index == current {
                    (index + 1) % n
                } else {
                    index
                }
            }
            PlaybackMode::Sequential if first_buffer => 0,
            PlaybackMode::Sequential | PlaybackMode::SequentialNoReset => (current + 1) % n,
            _ if first_buffer => 0,
            _ if last_buffer || state.playback == PlaybackState::PlayLastBufferAndStopRequested => {
                state.playback = PlaybackState::PlayingLastBuffer;
                n - 1
            }
            // Entries strictly between the first and the last
            _ if n < 3 => 0,
            PlaybackMode::InRandomOut => rng.random_range(1..n - 1),
            PlaybackMode::InRandomNoRepeatOut => {
                let index = rng.random_range(1..n - 1);
                if index == current {
                    next_in_middle(index, n)
                } else {
                    index
                }
            }
            PlaybackMode::InSequentialOut => next_in_middle(current, n),
        }
    }
}

/// Next index in `1..n-1`, wrapping back to 1
#[inline]
fn next_in_middle(current: usize, n: usize) -> usize {
    if current >= 1 && current + 1 < n - 1 {
        current + 1
    } else {
        1
    }
}
