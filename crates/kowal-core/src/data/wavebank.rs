//! Wave bank files
//!
//! A wave bank file carries the audio of one wave bank declared by the
//! engine data:
//!
//! ```text
//! identifier   AB 4B 57 42 BB 0D 0A 1A 0A
//! id           ascii string
//! num_entries  i32 BE
//! entry*       path (ascii), encoding i32, stream_from_disk i32,
//!              num_channels i32, num_bytes i32, bytes
//! ```
//!
//! Entries flagged `stream_from_disk` keep their bytes in the file; only
//! the offset is recorded.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use super::audio_data::{convert_pcm, AudioData, AudioPayload, ByteOrder, Encoding, WaveBankAudio};
use super::input_stream::InputStream;
use crate::error::{KwlError, KwlResult};

/// Leading bytes of every wave bank file
pub const WAVE_BANK_IDENTIFIER: [u8; 9] = [0xab, 0x4b, 0x57, 0x42, 0xbb, 0x0d, 0x0a, 0x1a, 0x0a];

/// The entries of a wave bank as declared by the engine data
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WaveBankLayout {
    pub id: String,
    /// Entry paths; an entry's index is its audio data index
    pub entries: Vec<String>,
}

impl WaveBankLayout {
    fn entry_index(&self, path: &str) -> Option<usize> {
        self.entries.iter().position(|entry| entry == path)
    }
}

/// Control-side state of a wave bank
pub struct WaveBank {
    pub layout: WaveBankLayout,
    pub audio: Option<basedrop::Shared<WaveBankAudio>>,
    /// An unload was requested and the mixer has not confirmed it yet
    pub unload_pending: bool,
    /// Unload confirmations still in flight for requests a reload cancelled
    pub cancelled_unloads: u32,
}

impl WaveBank {
    pub fn new(layout: WaveBankLayout) -> Self {
        Self {
            layout,
            audio: None,
            unload_pending: false,
            cancelled_unloads: 0,
        }
    }

    #[inline]
    pub fn is_loaded(&self) -> bool {
        self.audio.is_some()
    }

    /// Loaded and staying loaded
    #[inline]
    pub fn is_resident(&self) -> bool {
        self.is_loaded() && !self.unload_pending
    }

    /// Apply the mixer's unload confirmation
    ///
    /// Returns false if a reload cancelled the request it answers.
    pub fn confirm_unload(&mut self) -> bool {
        if self.cancelled_unloads > 0 {
            self.cancelled_unloads -= 1;
            return false;
        }
        self.audio = None;
        self.unload_pending = false;
        true
    }
}

/// Read the header and find the bank it belongs to
///
/// Leaves the stream positioned at the first entry.
pub fn identify_wave_bank(stream: &mut InputStream, layouts: &[WaveBankLayout]) -> KwlResult<usize> {
    stream.expect_identifier(&WAVE_BANK_IDENTIFIER)?;
    let id = stream.read_ascii_string()?;
    let num_entries = stream.read_i32_be()?;

    let index = layouts
        .iter()
        .position(|layout| layout.id == id)
        .ok_or_else(|| KwlError::NoMatchingWaveBank(id.clone()))?;

    if num_entries < 0 || num_entries as usize != layouts[index].entries.len() {
        return Err(KwlError::WaveBankEntryMismatch(id));
    }
    Ok(index)
}

/// Read every entry of a wave bank
///
/// `source` is the file the stream was opened from; entries streamed from
/// disk need it. Without a source file their bytes are loaded into memory.
pub fn read_wave_bank_entries(
    stream: &mut InputStream,
    layout: &WaveBankLayout,
    source: Option<&Path>,
) -> KwlResult<WaveBankAudio> {
    let mut entries: Vec<Option<AudioData>> = vec![None; layout.entries.len()];

    for _ in 0..layout.entries.len() {
        let path = stream.read_ascii_string()?;
        let index = layout
            .entry_index(&path)
            .ok_or_else(|| KwlError::WaveBankEntryMismatch(layout.id.clone()))?;

        let encoding = Encoding::from_code(stream.read_i32_be()?)?;
        let stream_from_disk = stream.read_i32_be()? != 0;
        let num_channels = stream.read_i32_be()?;
        if !(0..=2).contains(&num_channels) {
            return Err(KwlError::CorruptBinaryData(format!(
                "wave bank entry '{}' has {} channels",
                path, num_channels
            )));
        }
        let num_bytes = stream.read_i32_be()?;
        if num_bytes <= 0 {
            return Err(KwlError::CorruptBinaryData(format!(
                "wave bank entry '{}' has no data",
                path
            )));
        }

        let payload = match source {
            Some(file) if stream_from_disk => {
                let offset = stream.tell()?;
                stream.skip(num_bytes as u64)?;
                AudioPayload::File {
                    path: PathBuf::from(file),
                    offset,
                    len: num_bytes as u64,
                }
            }
            _ => {
                let bytes = stream.read_vec(num_bytes as usize)?;
                if encoding.is_pcm() && !stream_from_disk {
                    if num_channels == 0 {
                        return Err(KwlError::CorruptBinaryData(format!(
                            "PCM entry '{}' has no channels",
                            path
                        )));
                    }
                    let mut samples = Vec::new();
                    convert_pcm(&bytes, encoding, ByteOrder::Little, &mut samples);
                    AudioPayload::Pcm(samples)
                } else {
                    AudioPayload::Encoded(Arc::from(bytes))
                }
            }
        };

        let encoding = match payload {
            AudioPayload::Pcm(_) => Encoding::PcmS16,
            _ => encoding,
        };
        entries[index] = Some(AudioData {
            encoding,
            num_channels: num_channels as usize,
            stream_from_disk,
            payload,
        });
    }

    let entries = entries
        .into_iter()
        .collect::<Option<Vec<_>>>()
        .ok_or_else(|| KwlError::WaveBankEntryMismatch(layout.id.clone()))?;
    Ok(WaveBankAudio { entries })
}

/// Identify and read a whole wave bank file
pub fn read_wave_bank_file(path: &Path, layouts: &[WaveBankLayout]) -> KwlResult<(usize, WaveBankAudio)> {
    let mut stream = InputStream::open(path)?;
    let index = identify_wave_bank(&mut stream, layouts)?;
    let audio = read_wave_bank_entries(&mut stream, &layouts[index], Some(path))?;
    log::info!(
        "read_wave_bank_file: Loaded '{}' ({} entries) from {:?}",
        layouts[index].id,
        audio.entries.len(),
        path
    );
    Ok((index, audio))
}

/// Serialized wave bank, used to build fixtures
#[cfg(test)]
pub(crate) struct WaveBankWriter {
    bytes: Vec<u8>,
}

#[cfg(test)]
impl WaveBankWriter {
    pub(crate) fn new(id: &str, num_entries: i32) -> Self {
        let mut writer = Self {
            bytes: WAVE_BANK_IDENTIFIER.to_vec(),
        };
        writer.string(id);
        writer.bytes.extend_from_slice(&num_entries.to_be_bytes());
        writer
    }

    fn string(&mut self, s: &str) {
        self.bytes.extend_from_slice(&(s.len() as i32).to_be_bytes());
        self.bytes.extend_from_slice(s.as_bytes());
    }

    pub(crate) fn entry(
        mut self,
        path: &str,
        encoding: Encoding,
        stream_from_disk: bool,
        num_channels: i32,
        data: &[u8],
    ) -> Self {
        self.string(path);
        for value in [
            encoding as i32,
            stream_from_disk as i32,
            num_channels,
            data.len() as i32,
        ] {
            self.bytes.extend_from_slice(&value.to_be_bytes());
        }
        self.bytes.extend_from_slice(data);
        self
    }

    /// Entry of 16-bit samples
    pub(crate) fn pcm_entry(self, path: &str, num_channels: i32, samples: &[i16]) -> Self {
        let data: Vec<u8> = samples.iter().flat_map(|s| s.to_le_bytes()).collect();
        self.entry(path, Encoding::PcmS16, false, num_channels, &data)
    }

    pub(crate) fn finish(self) -> Vec<u8> {
        self.bytes
    }
}
