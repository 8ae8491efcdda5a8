//! Audio data entries and raw PCM sample conversion

use std::path::PathBuf;
use std::sync::Arc;

use crate::error::{KwlError, KwlResult};

/// Sample encoding of an audio data entry, with its on-disk code
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Encoding {
    PcmS16 = 0,
    Vorbis = 1,
    ImaAdpcm = 2,
    Aac = 3,
    Unknown = 4,
    PcmS24 = 5,
    PcmS32 = 6,
    PcmS8 = 7,
    PcmU8 = 8,
}

impl Encoding {
    pub fn from_code(code: i32) -> KwlResult<Self> {
        Ok(match code {
            0 => Encoding::PcmS16,
            1 => Encoding::Vorbis,
            2 => Encoding::ImaAdpcm,
            3 => Encoding::Aac,
            4 => Encoding::Unknown,
            5 => Encoding::PcmS24,
            6 => Encoding::PcmS32,
            7 => Encoding::PcmS8,
            8 => Encoding::PcmU8,
            _ => {
                return Err(KwlError::CorruptBinaryData(format!(
                    "unknown encoding code {}",
                    code
                )))
            }
        })
    }

    /// Bytes per sample for linear PCM encodings
    pub fn pcm_sample_bytes(self) -> Option<usize> {
        match self {
            Encoding::PcmU8 | Encoding::PcmS8 => Some(1),
            Encoding::PcmS16 => Some(2),
            Encoding::PcmS24 => Some(3),
            Encoding::PcmS32 => Some(4),
            _ => None,
        }
    }

    #[inline]
    pub fn is_pcm(self) -> bool {
        self.pcm_sample_bytes().is_some()
    }
}

/// Byte order of raw PCM sample data
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ByteOrder {
    Little,
    Big,
}

/// Convert one raw sample to 16-bit PCM
///
/// `bytes` holds exactly one sample of `encoding`. Wider samples keep their
/// most significant 16 bits.
#[inline]
pub fn sample_to_i16(bytes: &[u8], encoding: Encoding, order: ByteOrder) -> i16 {
    match (encoding, order) {
        (Encoding::PcmU8, _) => ((bytes[0] as i16) - 128) << 8,
        (Encoding::PcmS8, _) => (bytes[0] as i8 as i16) << 8,
        (Encoding::PcmS16, ByteOrder::Little) => i16::from_le_bytes([bytes[0], bytes[1]]),
        (Encoding::PcmS16, ByteOrder::Big) => i16::from_be_bytes([bytes[0], bytes[1]]),
        (Encoding::PcmS24, ByteOrder::Little) => i16::from_le_bytes([bytes[1], bytes[2]]),
        (Encoding::PcmS24, ByteOrder::Big) => i16::from_be_bytes([bytes[0], bytes[1]]),
        (Encoding::PcmS32, ByteOrder::Little) => i16::from_le_bytes([bytes[2], bytes[3]]),
        (Encoding::PcmS32, ByteOrder::Big) => i16::from_be_bytes([bytes[0], bytes[1]]),
        _ => 0,
    }
}

/// Convert a block of raw PCM bytes, appending to `out`
///
/// Trailing bytes that do not form a whole sample are ignored.
pub fn convert_pcm(bytes: &[u8], encoding: Encoding, order: ByteOrder, out: &mut Vec<i16>) {
    let Some(width) = encoding.pcm_sample_bytes() else {
        return;
    };
    out.extend(
        bytes
            .chunks_exact(width)
            .map(|sample| sample_to_i16(sample, encoding, order)),
    );
}

/// Where the samples of an entry live
#[derive(Debug, Clone)]
pub enum AudioPayload {
    /// Decoded 16-bit PCM, interleaved
    Pcm(Vec<i16>),
    /// Encoded bytes kept in memory and decoded while streaming
    Encoded(Arc<[u8]>),
    /// Bytes left on disk, read by a streaming decoder
    File { path: PathBuf, offset: u64, len: u64 },
}

/// One playable piece of audio
#[derive(Debug, Clone)]
pub struct AudioData {
    pub encoding: Encoding,
    pub num_channels: usize,
    pub stream_from_disk: bool,
    pub payload: AudioPayload,
}

impl AudioData {
    /// In-memory 16-bit PCM
    pub fn from_pcm(num_channels: usize, samples: Vec<i16>) -> Self {
        Self {
            encoding: Encoding::PcmS16,
            num_channels,
            stream_from_disk: false,
            payload: AudioPayload::Pcm(samples),
        }
    }

    /// Interleaved samples, if this entry holds decoded PCM
    #[inline]
    pub fn pcm(&self) -> Option<&[i16]> {
        match &self.payload {
            AudioPayload::Pcm(samples) => Some(samples),
            _ => None,
        }
    }

    /// Number of whole frames of decoded PCM, 0 for encoded entries
    pub fn num_frames(&self) -> usize {
        match (self.pcm(), self.num_channels) {
            (Some(samples), channels) if channels > 0 => samples.len() / channels,
            _ => 0,
        }
    }

    /// Entries that need a decoder rather than direct buffer playback
    #[inline]
    pub fn needs_decoder(&self) -> bool {
        !matches!(self.payload, AudioPayload::Pcm(_))
    }
}

/// The loaded entries of one wave bank, indexed like the engine data's entries
#[derive(Debug, Default)]
pub struct WaveBankAudio {
    pub entries: Vec<AudioData>,
}

impl WaveBankAudio {
    #[inline]
    pub fn entry(&self, index: usize) -> Option<&AudioData> {
        self.entries.get(index)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_encoding_codes() {
        assert_eq!(Encoding::from_code(0).unwrap(), Encoding::PcmS16);
        assert_eq!(Encoding::from_code(8).unwrap(), Encoding::PcmU8);
        assert_eq!(Encoding::Vorbis as i32, 1);
        assert!(Encoding::from_code(9).is_err());
        assert!(!Encoding::Vorbis.is_pcm());
    }

    #[test]
    fn test_sample_conversion() {
        assert_eq!(sample_to_i16(&[128], Encoding::PcmU8, ByteOrder::Little), 0);
        assert_eq!(sample_to_i16(&[0], Encoding::PcmU8, ByteOrder::Little), -32768);
        assert_eq!(sample_to_i16(&[0x7f], Encoding::PcmS8, ByteOrder::Big), 0x7f00);
        assert_eq!(sample_to_i16(&[0xff], Encoding::PcmS8, ByteOrder::Big), -256);
        assert_eq!(
            sample_to_i16(&[0x34, 0x12], Encoding::PcmS16, ByteOrder::Little),
            0x1234
        );
        assert_eq!(
            sample_to_i16(&[0x12, 0x34], Encoding::PcmS16, ByteOrder::Big),
            0x1234
        );
        assert_eq!(
            sample_to_i16(&[0xaa, 0x34, 0x12], Encoding::PcmS24, ByteOrder::Little),
            0x1234
        );
        assert_eq!(
            sample_to_i16(&[0x12, 0x34, 0xaa], Encoding::PcmS24, ByteOrder::Big),
            0x1234
        );
        assert_eq!(
            sample_to_i16(&[0xaa, 0xbb, 0x34, 0x12], Encoding::PcmS32, ByteOrder::Little),
            0x1234
        );
    }

    #[test]
    fn test_convert_ignores_partial_sample() {
        let mut out = Vec::new();
        convert_pcm(&[1, 0, 2, 0, 9], Encoding::PcmS16, ByteOrder::Little, &mut out);
        assert_eq!(out, vec![1, 2]);
    }

    #[test]
    fn test_num_frames() {
        let data = AudioData::from_pcm(2, vec![0; 10]);
        assert_eq!(data.num_frames(), 5);
        assert!(!data.needs_decoder());
    }
}
