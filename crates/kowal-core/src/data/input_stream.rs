//! Seekable byte stream over a file region or an in-memory buffer
//!
//! Engine data, wave banks and streamed audio all read through
//! [`InputStream`]. A stream covers a window `[start, start + len)` of its
//! source; every position is relative to that window, so a wave bank entry
//! embedded in a larger file reads exactly like a standalone file.

use std::fs::File;
use std::io::{self, BufReader, Cursor, Read, Seek, SeekFrom};
use std::path::Path;
use std::sync::Arc;

use crate::error::{KwlError, KwlResult};

/// Longest ASCII string accepted by [`InputStream::read_ascii_string`]
pub const MAX_ASCII_STRING_LEN: i32 = 10_000;

enum Source {
    File(BufReader<File>),
    Memory(Cursor<Arc<[u8]>>),
}

impl Source {
    fn seek_abs(&mut self, pos: u64) -> io::Result<u64> {
        match self {
            Source::File(reader) => reader.seek(SeekFrom::Start(pos)),
            Source::Memory(cursor) => cursor.seek(SeekFrom::Start(pos)),
        }
    }

    fn position(&mut self) -> io::Result<u64> {
        match self {
            Source::File(reader) => reader.stream_position(),
            Source::Memory(cursor) => Ok(cursor.position()),
        }
    }

    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        match self {
            Source::File(reader) => reader.read(buf),
            Source::Memory(cursor) => cursor.read(buf),
        }
    }
}

/// Byte stream with big/little-endian helpers
pub struct InputStream {
    source: Source,
    start: u64,
    len: u64,
}

impl InputStream {
    /// Open a whole file
    pub fn open<P: AsRef<Path>>(path: P) -> KwlResult<Self> {
        let path = path.as_ref();
        let file = File::open(path).map_err(|e| KwlError::from_open(e, path))?;
        let len = file.metadata()?.len();
        Ok(Self {
            source: Source::File(BufReader::new(file)),
            start: 0,
            len,
        })
    }

    /// Open `len` bytes of a file starting at `offset`
    pub fn open_region<P: AsRef<Path>>(path: P, offset: u64, len: u64) -> KwlResult<Self> {
        let path = path.as_ref();
        let file = File::open(path).map_err(|e| KwlError::from_open(e, path))?;
        let file_len = file.metadata()?.len();
        if offset.saturating_add(len) > file_len {
            return Err(KwlError::CorruptBinaryData(format!(
                "region {}+{} exceeds file length {} of {:?}",
                offset, len, file_len, path
            )));
        }

        let mut stream = Self {
            source: Source::File(BufReader::new(file)),
            start: offset,
            len,
        };
        stream.reset()?;
        Ok(stream)
    }

    /// Wrap bytes already in memory
    pub fn from_bytes(bytes: Arc<[u8]>) -> Self {
        let len = bytes.len() as u64;
        Self {
            source: Source::Memory(Cursor::new(bytes)),
            start: 0,
            len,
        }
    }

    /// Length of the stream window in bytes
    #[inline]
    pub fn len(&self) -> u64 {
        self.len
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Current position relative to the window start
    pub fn tell(&mut self) -> KwlResult<u64> {
        let abs = self.source.position()?;
        Ok(abs.saturating_sub(self.start))
    }

    /// Move to an absolute position within the window
    pub fn seek(&mut self, pos: u64) -> KwlResult<()> {
        if pos > self.len {
            return Err(KwlError::CorruptBinaryData(format!(
                "seek to {} past end of {}-byte stream",
                pos, self.len
            )));
        }
        self.source.seek_abs(self.start + pos)?;
        Ok(())
    }

    /// Skip `count` bytes forward
    pub fn skip(&mut self, count: u64) -> KwlResult<()> {
        let pos = self.tell()?;
        self.seek(pos.saturating_add(count))
    }

    /// Go back to the start of the window
    pub fn reset(&mut self) -> KwlResult<()> {
        self.seek(0)
    }

    pub fn is_at_end(&mut self) -> KwlResult<bool> {
        Ok(self.tell()? >= self.len)
    }

    /// Bytes left before the end of the window
    pub fn remaining(&mut self) -> KwlResult<u64> {
        Ok(self.len.saturating_sub(self.tell()?))
    }

    /// Fill `buf` completely or fail with `CorruptBinaryData`
    pub fn read_bytes(&mut self, buf: &mut [u8]) -> KwlResult<()> {
        self.read_exact(buf).map_err(KwlError::from_read)
    }

    /// Read `count` bytes into a new vector
    pub fn read_vec(&mut self, count: usize) -> KwlResult<Vec<u8>> {
        if count as u64 > self.remaining()? {
            return Err(KwlError::CorruptBinaryData(format!(
                "{} bytes requested, stream has fewer left",
                count
            )));
        }
        let mut bytes = vec![0u8; count];
        self.read_bytes(&mut bytes)?;
        Ok(bytes)
    }

    fn read_array<const N: usize>(&mut self) -> KwlResult<[u8; N]> {
        let mut bytes = [0u8; N];
        self.read_bytes(&mut bytes)?;
        Ok(bytes)
    }

    pub fn read_u8(&mut self) -> KwlResult<u8> {
        Ok(self.read_array::<1>()?[0])
    }

    pub fn read_i16_be(&mut self) -> KwlResult<i16> {
        Ok(i16::from_be_bytes(self.read_array()?))
    }

    pub fn read_i16_le(&mut self) -> KwlResult<i16> {
        Ok(i16::from_le_bytes(self.read_array()?))
    }

    pub fn read_u16_le(&mut self) -> KwlResult<u16> {
        Ok(u16::from_le_bytes(self.read_array()?))
    }

    pub fn read_i32_be(&mut self) -> KwlResult<i32> {
        Ok(i32::from_be_bytes(self.read_array()?))
    }

    pub fn read_i32_le(&mut self) -> KwlResult<i32> {
        Ok(i32::from_le_bytes(self.read_array()?))
    }

    pub fn read_u32_be(&mut self) -> KwlResult<u32> {
        Ok(u32::from_be_bytes(self.read_array()?))
    }

    pub fn read_u32_le(&mut self) -> KwlResult<u32> {
        Ok(u32::from_le_bytes(self.read_array()?))
    }

    pub fn read_f32_be(&mut self) -> KwlResult<f32> {
        Ok(f32::from_be_bytes(self.read_array()?))
    }

    pub fn read_f32_le(&mut self) -> KwlResult<f32> {
        Ok(f32::from_le_bytes(self.read_array()?))
    }

    /// Read a 4-byte chunk or format tag
    pub fn read_tag(&mut self) -> KwlResult<[u8; 4]> {
        self.read_array()
    }

    /// Read a string stored as a big-endian length followed by ASCII bytes
    pub fn read_ascii_string(&mut self) -> KwlResult<String> {
        let len = self.read_i32_be()?;
        if len <= 0 || len >= MAX_ASCII_STRING_LEN {
            return Err(KwlError::CorruptBinaryData(format!(
                "invalid string length {}",
                len
            )));
        }
        let bytes = self.read_vec(len as usize)?;
        if !bytes.is_ascii() {
            return Err(KwlError::CorruptBinaryData("non-ASCII string".to_string()));
        }
        // ASCII is valid UTF-8
        String::from_utf8(bytes).map_err(|e| KwlError::CorruptBinaryData(e.to_string()))
    }

    /// Check that the stream starts with `identifier`, then leave it positioned after it
    pub fn expect_identifier(&mut self, identifier: &[u8]) -> KwlResult<()> {
        self.reset()?;
        let mut found = vec![0u8; identifier.len()];
        if self.read_exact(&mut found).is_err() || found != identifier {
            return Err(KwlError::UnknownFileFormat);
        }
        Ok(())
    }
}

impl Read for InputStream {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let pos = self.source.position()?.saturating_sub(self.start);
        let left = self.len.saturating_sub(pos);
        let max = (buf.len() as u64).min(left) as usize;
        if max == 0 {
            return Ok(0);
        }
        self.source.read(&mut buf[..max])
    }
}

impl Seek for InputStream {
    fn seek(&mut self, pos: SeekFrom) -> io::Result<u64> {
        let current = self.source.position()?.saturating_sub(self.start) as i64;
        let target = match pos {
            SeekFrom::Start(n) => n as i64,
            SeekFrom::End(n) => self.len as i64 + n,
            SeekFrom::Current(n) => current + n,
        };
        if target < 0 {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                "seek before start of stream",
            ));
        }
        let abs = self.source.seek_abs(self.start + target as u64)?;
        Ok(abs - self.start)
    }
}

impl symphonia::core::io::MediaSource for InputStream {
    fn is_seekable(&self) -> bool {
        true
    }

    fn byte_len(&self) -> Option<u64> {
        Some(self.len)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn memory(bytes: &[u8]) -> InputStream {
        InputStream::from_bytes(Arc::from(bytes))
    }

    #[test]
    fn test_reads_both_endiannesses() {
        let mut s = memory(&[0x00, 0x00, 0x01, 0x02, 0x02, 0x01, 0x00, 0x00]);
        assert_eq!(s.read_i32_be().unwrap(), 0x0102);
        assert_eq!(s.read_i32_le().unwrap(), 0x0102);
        assert!(s.is_at_end().unwrap());
    }

    #[test]
    fn test_float_be() {
        let mut s = memory(&1.5f32.to_be_bytes());
        assert_eq!(s.read_f32_be().unwrap(), 1.5);
    }

    #[test]
    fn test_ascii_string() {
        let mut bytes = 6i32.to_be_bytes().to_vec();
        bytes.extend_from_slice(b"master");
        let mut s = memory(&bytes);
        assert_eq!(s.read_ascii_string().unwrap(), "master");
    }

    #[test]
    fn test_ascii_string_rejects_bad_length() {
        let mut s = memory(&0i32.to_be_bytes());
        assert!(matches!(
            s.read_ascii_string(),
            Err(KwlError::CorruptBinaryData(_))
        ));

        let mut bytes = 20i32.to_be_bytes().to_vec();
        bytes.extend_from_slice(b"short");
        let mut s = memory(&bytes);
        assert!(s.read_ascii_string().is_err());
    }

    #[test]
    fn test_truncated_read_is_corrupt() {
        let mut s = memory(&[1, 2]);
        assert!(matches!(s.read_i32_be(), Err(KwlError::CorruptBinaryData(_))));
    }

    #[test]
    fn test_region_is_relative() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(b"xxxxABCDyyyy").unwrap();
        file.flush().unwrap();

        let mut s = InputStream::open_region(file.path(), 4, 4).unwrap();
        assert_eq!(s.len(), 4);
        assert_eq!(s.tell().unwrap(), 0);

        let mut buf = [0u8; 8];
        let n = Read::read(&mut s, &mut buf).unwrap();
        assert_eq!(&buf[..n], b"ABCD");
        assert!(s.is_at_end().unwrap());

        s.seek(2).unwrap();
        assert_eq!(s.read_u8().unwrap(), b'C');
        assert!(s.seek(5).is_err());
    }

    #[test]
    fn test_identifier_mismatch_is_unknown_format() {
        let mut s = memory(b"RIFF....");
        assert!(matches!(
            s.expect_identifier(b"FORM"),
            Err(KwlError::UnknownFileFormat)
        ));
        assert!(s.expect_identifier(b"RIFF").is_ok());
        assert_eq!(s.tell().unwrap(), 4);
    }

    #[test]
    fn test_missing_file() {
        assert!(matches!(
            InputStream::open("/nonexistent/kowal/file.kwl"),
            Err(KwlError::FileNotFound(_))
        ));
    }
}
