//! Ogg Vorbis codec on top of symphonia

use symphonia::core::audio::SampleBuffer;
use symphonia::core::codecs::{Decoder as SymphoniaDecoder, DecoderOptions, CODEC_TYPE_NULL};
use symphonia::core::errors::Error as SymphoniaError;
use symphonia::core::formats::{FormatOptions, FormatReader};
use symphonia::core::io::MediaSourceStream;
use symphonia::core::meta::MetadataOptions;
use symphonia::core::probe::Hint;

use super::{Codec, StreamOrigin};
use crate::error::{KwlError, KwlResult};

/// Decoded samples gathered before a buffer is handed over
const MIN_SAMPLES_PER_BUFFER: usize = 4096;

pub struct VorbisCodec {
    origin: StreamOrigin,
    format: Box<dyn FormatReader>,
    decoder: Box<dyn SymphoniaDecoder>,
    track_id: u32,
    num_channels: usize,
    sample_buf: Option<SampleBuffer<i16>>,
}

impl VorbisCodec {
    pub fn new(origin: StreamOrigin) -> KwlResult<Self> {
        let (format, decoder, track_id, num_channels) = Self::open(&origin)?;
        Ok(Self {
            origin,
            format,
            decoder,
            track_id,
            num_channels,
            sample_buf: None,
        })
    }

    #[allow(clippy::type_complexity)]
    fn open(
        origin: &StreamOrigin,
    ) -> KwlResult<(Box<dyn FormatReader>, Box<dyn SymphoniaDecoder>, u32, usize)> {
        let stream = origin.open()?;
        let mss = MediaSourceStream::new(Box::new(stream), Default::default());

        let mut hint = Hint::new();
        hint.with_extension("ogg");

        let probed = symphonia::default::get_probe()
            .format(&hint, mss, &FormatOptions::default(), &MetadataOptions::default())
            .map_err(|e| KwlError::ErrorDecodingAudioData(e.to_string()))?;
        let format = probed.format;

        let track = format
            .tracks()
            .iter()
            .find(|t| t.codec_params.codec != CODEC_TYPE_NULL)
            .ok_or_else(|| KwlError::ErrorDecodingAudioData("no audio track".to_string()))?;
        let track_id = track.id;

        let num_channels = track
            .codec_params
            .channels
            .map(|c| c.count())
            .unwrap_or(2);
        if !(1..=2).contains(&num_channels) {
            return Err(KwlError::UnsupportedEncoding);
        }

        let decoder = symphonia::default::get_codecs()
            .make(&track.codec_params, &DecoderOptions::default())
            .map_err(|e| KwlError::ErrorDecodingAudioData(e.to_string()))?;

        Ok((format, decoder, track_id, num_channels))
    }
}

impl Codec for VorbisCodec {
    fn num_channels(&self) -> usize {
        self.num_channels
    }

    fn max_buffer_samples(&self) -> usize {
        // Room for one more packet past the minimum
        MIN_SAMPLES_PER_BUFFER * 4
    }

    fn decode_next_buffer(&mut self, out: &mut Vec<i16>) -> KwlResult<bool> {
        out.clear();

        while out.len() < MIN_SAMPLES_PER_BUFFER {
            let packet = match self.format.next_packet() {
                Ok(packet) => packet,
                Err(SymphoniaError::IoError(e))
                    if e.kind() == std::io::ErrorKind::UnexpectedEof =>
                {
                    return Ok(true);
                }
                Err(e) => return Err(KwlError::ErrorDecodingAudioData(e.to_string())),
            };

            if packet.track_id() != self.track_id {
                continue;
            }

            let decoded = match self.decoder.decode(&packet) {
                Ok(decoded) => decoded,
                Err(SymphoniaError::DecodeError(e)) => {
                    log::debug!("VorbisCodec: skipping corrupt packet: {}", e);
                    continue;
                }
                Err(e) => return Err(KwlError::ErrorDecodingAudioData(e.to_string())),
            };

            let spec = *decoded.spec();
            let capacity = decoded.capacity() as u64;
            let buf = match &mut self.sample_buf {
                Some(buf) if buf.capacity() as u64 >= capacity * spec.channels.count() as u64 => buf,
                slot => slot.insert(SampleBuffer::new(capacity, spec)),
            };
            buf.copy_interleaved_ref(decoded);
            out.extend_from_slice(buf.samples());
        }
        Ok(false)
    }

    fn rewind(&mut self) -> bool {
        match Self::open(&self.origin) {
            Ok((format, decoder, track_id, num_channels)) if num_channels == self.num_channels => {
                self.format = format;
                self.decoder = decoder;
                self.track_id = track_id;
                true
            }
            Ok(_) => false,
            Err(e) => {
                log::warn!("VorbisCodec: rewind failed: {}", e);
                false
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn test_garbage_is_a_decoding_error() {
        let origin = StreamOrigin::Memory(Arc::from(&b"definitely not an ogg stream"[..]));
        assert!(matches!(
            VorbisCodec::new(origin),
            Err(KwlError::ErrorDecodingAudioData(_))
        ));
    }
}
