//! Variable-byte streams
//!
//! Encoding shared by posting segments and node identifiers:
//! - Varint integers (1-5 bytes for u32, 1-10 for u64)
//!   - Each byte: [continuation_bit:1][data:7], little-endian groups
//! - Fixed-width big-endian u32, used for the segment length placeholder
//!   that is backpatched once the payload has been written

use crate::{Result, StorageError};

/// Growable output buffer.
#[derive(Debug, Default, Clone)]
pub struct VariableByteOutput {
    buf: Vec<u8>,
}

impl VariableByteOutput {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            buf: Vec::with_capacity(capacity),
        }
    }

    #[inline]
    pub fn write_byte(&mut self, byte: u8) {
        self.buf.push(byte);
    }

    #[inline]
    pub fn write_int(&mut self, value: u32) {
        self.write_long(value as u64);
    }

    pub fn write_long(&mut self, mut value: u64) {
        loop {
            let mut byte = (value & 0x7F) as u8;
            value >>= 7;
            if value != 0 {
                byte |= 0x80; // continuation bit
            }
            self.buf.push(byte);
            if value == 0 {
                break;
            }
        }
    }

    /// Writes a 4-byte big-endian integer.
    pub fn write_fixed_int(&mut self, value: u32) {
        self.buf.extend_from_slice(&value.to_be_bytes());
    }

    /// Overwrites a fixed-width integer previously written at `position`.
    pub fn write_fixed_int_at(&mut self, position: usize, value: u32) -> Result<()> {
        let end = position + 4;
        if end > self.buf.len() {
            return Err(StorageError::InvalidArgument(format!(
                "backpatch at {} beyond buffer of {} bytes",
                position,
                self.buf.len()
            )));
        }
        self.buf[position..end].copy_from_slice(&value.to_be_bytes());
        Ok(())
    }

    pub fn write_bytes(&mut self, bytes: &[u8]) {
        self.buf.extend_from_slice(bytes);
    }

    /// Current write position (== bytes written so far).
    #[inline]
    pub fn position(&self) -> usize {
        self.buf.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    pub fn clear(&mut self) {
        self.buf.clear();
    }

    pub fn as_slice(&self) -> &[u8] {
        &self.buf
    }

    pub fn into_vec(self) -> Vec<u8> {
        self.buf
    }
}

/// Zero-copy reader over an encoded buffer.
#[derive(Debug, Clone)]
pub struct VariableByteInput<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> VariableByteInput<'a> {
    pub fn new(data: &'a [u8]) -> Self {
        Self { data, pos: 0 }
    }

    /// Bytes left to read.
    #[inline]
    pub fn available(&self) -> usize {
        self.data.len() - self.pos
    }

    #[inline]
    pub fn position(&self) -> usize {
        self.pos
    }

    pub fn read_byte(&mut self) -> Result<u8> {
        let byte = *self
            .data
            .get(self.pos)
            .ok_or_else(|| StorageError::InvalidData("unexpected end of stream".into()))?;
        self.pos += 1;
        Ok(byte)
    }

    pub fn read_int(&mut self) -> Result<u32> {
        let value = self.read_long()?;
        u32::try_from(value)
            .map_err(|_| StorageError::InvalidData(format!("varint {} overflows u32", value)))
    }

    pub fn read_long(&mut self) -> Result<u64> {
        let mut value = 0u64;
        let mut shift = 0;
        loop {
            let byte = self
                .data
                .get(self.pos)
                .copied()
                .ok_or_else(|| StorageError::InvalidData("Incomplete varint".into()))?;
            self.pos += 1;

            value |= ((byte & 0x7F) as u64) << shift;
            shift += 7;

            if (byte & 0x80) == 0 {
                return Ok(value);
            }
            if shift >= 64 {
                return Err(StorageError::InvalidData("Varint overflow".into()));
            }
        }
    }

    pub fn read_fixed_int(&mut self) -> Result<u32> {
        let bytes = self.read_slice(4)?;
        Ok(u32::from_be_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]))
    }

    /// Borrows the next `len` bytes and advances past them.
    pub fn read_slice(&mut self, len: usize) -> Result<&'a [u8]> {
        if len > self.available() {
            return Err(StorageError::InvalidData(format!(
                "need {} bytes, {} available",
                len,
                self.available()
            )));
        }
        let slice = &self.data[self.pos..self.pos + len];
        self.pos += len;
        Ok(slice)
    }

    /// Skips `count` varints without materializing them.
    pub fn skip(&mut self, count: usize) -> Result<()> {
        for _ in 0..count {
            self.read_long()?;
        }
        Ok(())
    }
}
