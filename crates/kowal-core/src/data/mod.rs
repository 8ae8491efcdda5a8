//! Binary data: byte streams, audio files, wave banks and engine data
//!
//! Everything here runs on the control thread (or a loader thread) and
//! produces plain owned values; nothing in this module knows about the
//! mixer.

mod audio_data;
pub mod audio_file;
mod engine_data;
mod input_stream;
mod wavebank;

pub use audio_data::{
    convert_pcm, sample_to_i16, AudioData, AudioPayload, ByteOrder, Encoding, WaveBankAudio,
};
pub use audio_file::{ContainerFormat, PcmBuffer, PcmDescription};
pub use engine_data::{
    EngineData, ENGINE_DATA_IDENTIFIER, EVENTS_CHUNK_ID, MASTER_BUS_ID, MIX_BUSES_CHUNK_ID,
    MIX_PRESETS_CHUNK_ID, SOUNDS_CHUNK_ID, WAVE_BANKS_CHUNK_ID,
};
pub use input_stream::{InputStream, MAX_ASCII_STRING_LEN};
pub use wavebank::{
    identify_wave_bank, read_wave_bank_entries, read_wave_bank_file, WaveBank, WaveBankLayout,
    WAVE_BANK_IDENTIFIER,
};

#[cfg(test)]
pub(crate) use engine_data::writer as engine_data_writer;
#[cfg(test)]
pub(crate) use wavebank::WaveBankWriter;
