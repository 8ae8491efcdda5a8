//! PCM codecs: WAV/AIFF/AU streams and already decoded bank entries

use basedrop::Shared;

use super::Codec;
use crate::data::{convert_pcm, InputStream, PcmDescription, WaveBankAudio};
use crate::error::{KwlError, KwlResult};

/// Samples produced per decoded buffer
pub const PCM_SAMPLES_PER_BUFFER: usize = 1024;

/// Streams linear PCM out of an AIFF, AU or WAV file
pub struct PcmCodec {
    stream: InputStream,
    desc: PcmDescription,
    bytes_read: u64,
    scratch: Vec<u8>,
}

impl PcmCodec {
    pub fn new(mut stream: InputStream) -> KwlResult<Self> {
        let desc = PcmDescription::read(&mut stream)?;
        let bytes_per_buffer = desc.bytes_per_sample() * PCM_SAMPLES_PER_BUFFER;
        Ok(Self {
            stream,
            desc,
            bytes_read: 0,
            scratch: vec![0; bytes_per_buffer],
        })
    }
}

impl Codec for PcmCodec {
    fn num_channels(&self) -> usize {
        self.desc.num_channels
    }

    fn max_buffer_samples(&self) -> usize {
        PCM_SAMPLES_PER_BUFFER
    }

    fn decode_next_buffer(&mut self, out: &mut Vec<i16>) -> KwlResult<bool> {
        out.clear();
        let left = self.desc.data_len - self.bytes_read;
        // Whole frames only
        let frame_bytes = (self.desc.bytes_per_sample() * self.desc.num_channels) as u64;
        let want = (self.scratch.len() as u64).min(left);
        let want = (want - want % frame_bytes) as usize;

        if want > 0 {
            self.stream.read_bytes(&mut self.scratch[..want])?;
            self.bytes_read += want as u64;
            convert_pcm(
                &self.scratch[..want],
                self.desc.encoding,
                self.desc.byte_order,
                out,
            );
        }

        let remaining = self.desc.data_len - self.bytes_read;
        Ok(remaining < frame_bytes)
    }

    fn rewind(&mut self) -> bool {
        self.bytes_read = 0;
        self.stream.seek(self.desc.data_offset).is_ok()
    }
}

/// Streams a bank entry that is already 16-bit PCM in memory
pub struct MemoryPcmCodec {
    audio: Shared<WaveBankAudio>,
    entry: usize,
    num_channels: usize,
    position: usize,
}

impl MemoryPcmCodec {
    pub fn new(audio: Shared<WaveBankAudio>, entry: usize) -> KwlResult<Self> {
        let num_channels = match audio.entry(entry) {
            Some(data) if data.pcm().is_some() && data.num_channels > 0 => data.num_channels,
            _ => {
                return Err(KwlError::ErrorDecodingAudioData(format!(
                    "entry {} holds no PCM",
                    entry
                )))
            }
        };
        Ok(Self {
            audio,
            entry,
            num_channels,
            position: 0,
        })
    }

    fn samples(&self) -> &[i16] {
        self.audio
            .entry(self.entry)
            .and_then(|data| data.pcm())
            .unwrap_or(&[])
    }
}

impl Codec for MemoryPcmCodec {
    fn num_channels(&self) -> usize {
        self.num_channels
    }

    fn max_buffer_samples(&self) -> usize {
        PCM_SAMPLES_PER_BUFFER
    }

    fn decode_next_buffer(&mut self, out: &mut Vec<i16>) -> KwlResult<bool> {
        out.clear();
        let chunk = PCM_SAMPLES_PER_BUFFER - PCM_SAMPLES_PER_BUFFER % self.num_channels;
        let position = self.position;
        let samples = self.samples();
        let end = (position + chunk).min(samples.len());
        out.extend_from_slice(&samples[position.min(end)..end]);
        let total = samples.len();
        self.position = end;
        Ok(end >= total)
    }

    fn rewind(&mut self) -> bool {
        self.position = 0;
        true
    }
}
