//! AIFF, AU and WAV header parsing and whole-file PCM loading
//!
//! Only linear PCM at 8, 16, 24 and 32 bits is accepted, in mono or stereo.
//! Every format converts to interleaved 16-bit samples.

use std::path::Path;

use super::audio_data::{convert_pcm, ByteOrder, Encoding};
use super::input_stream::InputStream;
use crate::error::{KwlError, KwlResult};

/// Container a PCM stream was found in
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContainerFormat {
    Aiff,
    Au,
    Wav,
}

/// Sample layout and data location of a PCM file
#[derive(Debug, Clone, PartialEq)]
pub struct PcmDescription {
    pub container: ContainerFormat,
    pub encoding: Encoding,
    pub byte_order: ByteOrder,
    pub num_channels: usize,
    /// Offset of the first sample from the start of the stream
    pub data_offset: u64,
    /// Length of the sample data in bytes
    pub data_len: u64,
}

impl PcmDescription {
    /// Parse the header of an AIFF, AU or WAV stream
    ///
    /// Formats are tried in that order. On success the stream is positioned
    /// at the first sample.
    pub fn read(stream: &mut InputStream) -> KwlResult<Self> {
        let parsers: [fn(&mut InputStream) -> KwlResult<Self>; 3] =
            [Self::read_aiff, Self::read_au, Self::read_wav];

        for parse in parsers {
            stream.reset()?;
            match parse(stream) {
                Ok(desc) => {
                    stream.seek(desc.data_offset)?;
                    return Ok(desc);
                }
                Err(KwlError::UnknownFileFormat) => continue,
                Err(e) => return Err(e),
            }
        }
        Err(KwlError::UnknownFileFormat)
    }

    #[inline]
    pub fn bytes_per_sample(&self) -> usize {
        self.encoding.pcm_sample_bytes().unwrap_or(2)
    }

    /// Total frames in the data region
    pub fn num_frames(&self) -> usize {
        let frame_bytes = self.bytes_per_sample() * self.num_channels;
        if frame_bytes == 0 {
            return 0;
        }
        (self.data_len / frame_bytes as u64) as usize
    }

    fn read_aiff(stream: &mut InputStream) -> KwlResult<Self> {
        if stream.read_tag().ok().as_ref() != Some(b"FORM") {
            return Err(KwlError::UnknownFileFormat);
        }
        let _form_size = stream.read_u32_be()?;
        if &stream.read_tag()? != b"AIFF" {
            return Err(KwlError::UnknownFileFormat);
        }

        let mut common: Option<(usize, Encoding)> = None;
        let mut data: Option<(u64, u64)> = None;

        while common.is_none() || data.is_none() {
            let chunk_id = stream.read_tag()?;
            let chunk_size = stream.read_u32_be()? as u64;
            let body_start = stream.tell()?;

            match &chunk_id {
                b"COMM" => {
                    let channels = stream.read_i16_be()?;
                    let _num_frames = stream.read_u32_be()?;
                    let sample_size = stream.read_i16_be()?;
                    let encoding = match sample_size {
                        8 => Encoding::PcmS8,
                        16 => Encoding::PcmS16,
                        24 => Encoding::PcmS24,
                        32 => Encoding::PcmS32,
                        _ => return Err(KwlError::UnsupportedEncoding),
                    };
                    common = Some((check_channels(channels as i32)?, encoding));
                }
                b"SSND" => {
                    let offset = stream.read_u32_be()? as u64;
                    let _block_size = stream.read_u32_be()?;
                    if chunk_size < 8 + offset {
                        return Err(KwlError::CorruptBinaryData(
                            "SSND chunk smaller than its header".to_string(),
                        ));
                    }
                    data = Some((body_start + 8 + offset, chunk_size - 8 - offset));
                }
                _ => {}
            }

            stream.seek(padded_end(body_start, chunk_size).min(stream.len()))?;
        }

        let (num_channels, encoding) = common.ok_or(KwlError::UnknownFileFormat)?;
        let (data_offset, data_len) = data.ok_or(KwlError::UnknownFileFormat)?;
        Ok(Self {
            container: ContainerFormat::Aiff,
            encoding,
            byte_order: ByteOrder::Big,
            num_channels,
            data_offset,
            data_len: clamp_len(stream, data_offset, data_len),
        })
    }

    fn read_au(stream: &mut InputStream) -> KwlResult<Self> {
        const AU_MAGIC: u32 = 0x2e73_6e64;
        const AU_UNKNOWN_SIZE: u32 = 0xffff_ffff;

        if stream.read_u32_be().ok() != Some(AU_MAGIC) {
            return Err(KwlError::UnknownFileFormat);
        }
        let data_offset = stream.read_u32_be()? as u64;
        let data_size = stream.read_u32_be()?;
        let encoding = match stream.read_u32_be()? {
            2 => Encoding::PcmS8,
            3 => Encoding::PcmS16,
            4 => Encoding::PcmS24,
            5 => Encoding::PcmS32,
            _ => return Err(KwlError::UnsupportedEncoding),
        };
        let _sample_rate = stream.read_u32_be()?;
        let num_channels = check_channels(stream.read_i32_be()?)?;

        let data_len = if data_size == AU_UNKNOWN_SIZE {
            stream.len().saturating_sub(data_offset)
        } else {
            data_size as u64
        };

        Ok(Self {
            container: ContainerFormat::Au,
            encoding,
            byte_order: ByteOrder::Big,
            num_channels,
            data_offset,
            data_len: clamp_len(stream, data_offset, data_len),
        })
    }

    fn read_wav(stream: &mut InputStream) -> KwlResult<Self> {
        if stream.read_tag().ok().as_ref() != Some(b"RIFF") {
            return Err(KwlError::UnknownFileFormat);
        }
        let _riff_size = stream.read_u32_le()?;
        if &stream.read_tag()? != b"WAVE" {
            return Err(KwlError::UnknownFileFormat);
        }

        let mut format: Option<(usize, Encoding)> = None;
        let mut data: Option<(u64, u64)> = None;

        while format.is_none() || data.is_none() {
            let chunk_id = stream.read_tag()?;
            let chunk_size = stream.read_u32_le()? as u64;
            let body_start = stream.tell()?;

            match &chunk_id {
                b"fmt " => {
                    let format_tag = stream.read_u16_le()?;
                    let channels = stream.read_u16_le()?;
                    let _sample_rate = stream.read_u32_le()?;
                    let _byte_rate = stream.read_u32_le()?;
                    let _block_align = stream.read_u16_le()?;
                    let bits_per_sample = stream.read_u16_le()?;

                    // 1 = integer PCM
                    if format_tag != 1 {
                        return Err(KwlError::UnsupportedEncoding);
                    }
                    let encoding = match bits_per_sample {
                        8 => Encoding::PcmU8,
                        16 => Encoding::PcmS16,
                        24 => Encoding::PcmS24,
                        32 => Encoding::PcmS32,
                        _ => return Err(KwlError::UnsupportedEncoding),
                    };
                    format = Some((check_channels(channels as i32)?, encoding));
                }
                b"data" => {
                    data = Some((body_start, chunk_size));
                }
                _ => {}
            }

            stream.seek(padded_end(body_start, chunk_size).min(stream.len()))?;
        }

        let (num_channels, encoding) = format.ok_or(KwlError::UnknownFileFormat)?;
        let (data_offset, data_len) = data.ok_or(KwlError::UnknownFileFormat)?;
        Ok(Self {
            container: ContainerFormat::Wav,
            encoding,
            byte_order: ByteOrder::Little,
            num_channels,
            data_offset,
            data_len: clamp_len(stream, data_offset, data_len),
        })
    }
}

fn check_channels(channels: i32) -> KwlResult<usize> {
    match channels {
        1 | 2 => Ok(channels as usize),
        _ => Err(KwlError::UnsupportedEncoding),
    }
}

/// Chunk bodies are padded to an even length
#[inline]
fn padded_end(body_start: u64, size: u64) -> u64 {
    body_start + size + (size & 1)
}

/// Truncated files play what they contain
fn clamp_len(stream: &InputStream, offset: u64, len: u64) -> u64 {
    len.min(stream.len().saturating_sub(offset))
}

/// Interleaved 16-bit PCM held in memory
#[derive(Debug, Clone, PartialEq)]
pub struct PcmBuffer {
    pub num_frames: usize,
    pub num_channels: usize,
    pub samples: Vec<i16>,
}

impl PcmBuffer {
    /// Wrap interleaved samples, checking the layout
    pub fn from_samples(num_channels: usize, samples: Vec<i16>) -> KwlResult<Self> {
        if !(1..=2).contains(&num_channels) {
            return Err(KwlError::InvalidParameterValue(
                "buffer must have 1 or 2 channels",
            ));
        }
        let num_frames = samples.len() / num_channels;
        if num_frames == 0 {
            return Err(KwlError::InvalidParameterValue(
                "buffer must hold at least one frame",
            ));
        }
        Ok(Self {
            num_frames,
            num_channels,
            samples,
        })
    }

    /// Load an AIFF, AU or WAV file
    pub fn load<P: AsRef<Path>>(path: P) -> KwlResult<Self> {
        let path = path.as_ref();
        let mut stream = InputStream::open(path)?;
        let buffer = Self::from_stream(&mut stream)?;
        log::debug!(
            "PcmBuffer::load: {:?} ({} frames, {} channels)",
            path,
            buffer.num_frames,
            buffer.num_channels
        );
        Ok(buffer)
    }

    /// Read an entire PCM stream into memory
    pub fn from_stream(stream: &mut InputStream) -> KwlResult<Self> {
        let desc = PcmDescription::read(stream)?;
        let bytes = stream.read_vec(desc.data_len as usize)?;

        let mut samples = Vec::with_capacity(bytes.len() / desc.bytes_per_sample());
        convert_pcm(&bytes, desc.encoding, desc.byte_order, &mut samples);
        samples.truncate(desc.num_frames() * desc.num_channels);

        Self::from_samples(desc.num_channels, samples)
    }
}
