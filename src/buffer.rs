//! Endian-aware byte buffer
//!
//! Serialisation primitive shared by the packet codec, the encryption
//! layer and the DNS codec. Writes append to a growable buffer; reads
//! advance a cursor and fail loudly instead of panicking when they run
//! past the end. Everything on the wire is big-endian.

use bytes::{BufMut, BytesMut};
use thiserror::Error;

/// Error returned when a read runs past the end of the buffer.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum BufferError {
    #[error("buffer truncated: needed {needed} bytes, {available} available")]
    Truncated { needed: usize, available: usize },

    #[error("string is not NUL-terminated")]
    UnterminatedString,

    #[error("string is not valid UTF-8")]
    InvalidUtf8,
}

/// A growable big-endian byte buffer with a read cursor.
///
/// Invariants: `position <= len()`; reads never advance past the end.
#[derive(Debug, Clone, Default)]
pub struct ByteBuffer {
    data: BytesMut,
    position: usize,
}

impl ByteBuffer {
    pub fn new() -> Self {
        Self {
            data: BytesMut::new(),
            position: 0,
        }
    }

    pub fn with_data(data: &[u8]) -> Self {
        Self {
            data: BytesMut::from(data),
            position: 0,
        }
    }

    /// Total number of bytes in the buffer, read or not.
    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Current read cursor.
    pub fn position(&self) -> usize {
        self.position
    }

    /// Bytes left between the cursor and the end.
    pub fn remaining(&self) -> usize {
        self.data.len() - self.position
    }

    fn check(&self, needed: usize) -> Result<(), BufferError> {
        if self.remaining() < needed {
            return Err(BufferError::Truncated {
                needed,
                available: self.remaining(),
            });
        }
        Ok(())
    }

    // --- writes ---

    pub fn add_u8(&mut self, value: u8) {
        self.data.put_u8(value);
    }

    pub fn add_u16(&mut self, value: u16) {
        self.data.put_u16(value);
    }

    pub fn add_u32(&mut self, value: u32) {
        self.data.put_u32(value);
    }

    pub fn add_bytes(&mut self, bytes: &[u8]) {
        self.data.put_slice(bytes);
    }

    /// Append a string followed by a NUL terminator.
    pub fn add_ntstring(&mut self, s: &str) {
        self.data.put_slice(s.as_bytes());
        self.data.put_u8(0);
    }

    // --- cursor reads ---

    pub fn read_u8(&mut self) -> Result<u8, BufferError> {
        self.check(1)?;
        let v = self.data[self.position];
        self.position += 1;
        Ok(v)
    }

    pub fn read_u16(&mut self) -> Result<u16, BufferError> {
        self.check(2)?;
        let v = u16::from_be_bytes([self.data[self.position], self.data[self.position + 1]]);
        self.position += 2;
        Ok(v)
    }

    pub fn read_u32(&mut self) -> Result<u32, BufferError> {
        self.check(4)?;
        let p = self.position;
        let v = u32::from_be_bytes([
            self.data[p],
            self.data[p + 1],
            self.data[p + 2],
            self.data[p + 3],
        ]);
        self.position += 4;
        Ok(v)
    }

    pub fn read_bytes(&mut self, count: usize) -> Result<Vec<u8>, BufferError> {
        self.check(count)?;
        let out = self.data[self.position..self.position + count].to_vec();
        self.position += count;
        Ok(out)
    }

    /// Read exactly `N` bytes into a fixed array.
    pub fn read_array<const N: usize>(&mut self) -> Result<[u8; N], BufferError> {
        self.check(N)?;
        let mut out = [0u8; N];
        out.copy_from_slice(&self.data[self.position..self.position + N]);
        self.position += N;
        Ok(out)
    }

    /// Read a NUL-terminated UTF-8 string, consuming the terminator.
    pub fn read_ntstring(&mut self) -> Result<String, BufferError> {
        let rest = &self.data[self.position..];
        let nul = rest
            .iter()
            .position(|&b| b == 0)
            .ok_or(BufferError::UnterminatedString)?;
        let s = std::str::from_utf8(&rest[..nul])
            .map_err(|_| BufferError::InvalidUtf8)?
            .to_string();
        self.position += nul + 1;
        Ok(s)
    }

    /// Read everything between the cursor and the end.
    pub fn read_remaining(&mut self) -> Vec<u8> {
        let out = self.data[self.position..].to_vec();
        self.position = self.data.len();
        out
    }

    /// Peek the remaining bytes without moving the cursor.
    pub fn peek_remaining(&self) -> &[u8] {
        &self.data[self.position..]
    }

    /// Drop `count` already-read-or-skipped bytes from the front.
    pub fn consume(&mut self, count: usize) -> Result<(), BufferError> {
        if count > self.data.len() {
            return Err(BufferError::Truncated {
                needed: count,
                available: self.data.len(),
            });
        }
        let _ = self.data.split_to(count);
        self.position = self.position.saturating_sub(count);
        Ok(())
    }

    /// Reset the read cursor to the start.
    pub fn rewind(&mut self) {
        self.position = 0;
    }

    pub fn clear(&mut self) {
        self.data.clear();
        self.position = 0;
    }

    pub fn as_slice(&self) -> &[u8] {
        &self.data
    }

    pub fn into_vec(self) -> Vec<u8> {
        self.data.to_vec()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trip_integers() {
        let mut buf = ByteBuffer::new();
        buf.add_u8(0x41);
        buf.add_u16(0x1234);
        buf.add_u32(0xdeadbeef);

        assert_eq!(buf.read_u8().unwrap(), 0x41);
        assert_eq!(buf.read_u16().unwrap(), 0x1234);
        assert_eq!(buf.read_u32().unwrap(), 0xdeadbeef);
        assert_eq!(buf.remaining(), 0);
    }

    #[test]
    fn read_past_end_fails() {
        let mut buf = ByteBuffer::with_data(&[0x01]);
        assert_eq!(buf.read_u8().unwrap(), 0x01);
        assert!(matches!(
            buf.read_u16(),
            Err(BufferError::Truncated { needed: 2, available: 0 })
        ));
    }

    #[test]
    fn ntstring() {
        let mut buf = ByteBuffer::new();
        buf.add_ntstring("shell");
        buf.add_u8(0xff);

        let mut rd = ByteBuffer::with_data(buf.as_slice());
        assert_eq!(rd.read_ntstring().unwrap(), "shell");
        assert_eq!(rd.read_u8().unwrap(), 0xff);
    }

    #[test]
    fn ntstring_missing_terminator() {
        let mut buf = ByteBuffer::with_data(b"abc");
        assert_eq!(buf.read_ntstring(), Err(BufferError::UnterminatedString));
    }

    #[test]
    fn consume_moves_window() {
        let mut buf = ByteBuffer::with_data(&[1, 2, 3, 4, 5]);
        buf.consume(2).unwrap();
        assert_eq!(buf.len(), 3);
        assert_eq!(buf.read_u8().unwrap(), 3);
    }

    #[test]
    fn consume_more_than_buffered_fails() {
        let mut buf = ByteBuffer::with_data(&[1, 2]);
        assert!(buf.consume(3).is_err());
    }
}
