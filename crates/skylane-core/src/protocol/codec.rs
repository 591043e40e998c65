// ============================================
// File: crates/skylane-core/src/protocol/codec.rs
// ============================================
//! # Binary Codec
//!
//! ## Creation Reason
//! Every packet, token and address crosses the wire as fixed-endianness
//! binary. This module provides the bounds-checked primitive reader and the
//! `Codec` trait that structured types implement on top of it.
//!
//! ## Main Functionality
//! - `Reader`: cursor over a byte slice; every read checks remaining length
//! - `Codec` trait: encode into any `BufMut`, decode from a `Reader`
//!
//! ## Wire Format
//! All multi-byte integers are little-endian.
//!
//! ## ⚠️ Important Note for Next Developer
//! - Never call `bytes::Buf` getters on untrusted input directly; they
//!   panic on underflow. Go through `Reader`, which returns `PacketTooShort`
//! - Writers are not bounds-checked here: callers size buffers from the
//!   layout constants before encoding
//!
//! ## Last Modified
//! v0.1.0 - Initial codec implementation

use bytes::{Buf, BufMut, BytesMut};

use crate::error::{CoreError, Result};

// ============================================
// Reader
// ============================================

/// Bounds-checked little-endian reader over a borrowed byte slice.
///
/// # Example
/// ```
/// use skylane_core::protocol::codec::Reader;
///
/// let data = [0x2a, 0x01, 0x00];
/// let mut reader = Reader::new(&data);
/// assert_eq!(reader.read_u8().unwrap(), 0x2a);
/// assert_eq!(reader.read_u16().unwrap(), 1);
/// assert!(reader.read_u8().is_err());
/// ```
#[derive(Debug, Clone)]
pub struct Reader<'a> {
    buf: &'a [u8],
    total: usize,
}

impl<'a> Reader<'a> {
    /// Creates a reader positioned at the start of `buf`.
    #[must_use]
    pub const fn new(buf: &'a [u8]) -> Self {
        Self {
            buf,
            total: buf.len(),
        }
    }

    /// Bytes consumed so far.
    #[must_use]
    pub const fn position(&self) -> usize {
        self.total - self.buf.len()
    }

    /// Bytes left to read.
    #[must_use]
    pub const fn remaining(&self) -> usize {
        self.buf.len()
    }

    fn need(&self, n: usize) -> Result<()> {
        if self.buf.len() < n {
            return Err(CoreError::too_short(self.position() + n, self.total));
        }
        Ok(())
    }

    /// Reads one byte.
    pub fn read_u8(&mut self) -> Result<u8> {
        self.need(1)?;
        Ok(self.buf.get_u8())
    }

    /// Reads a little-endian `u16`.
    pub fn read_u16(&mut self) -> Result<u16> {
        self.need(2)?;
        Ok(self.buf.get_u16_le())
    }

    /// Reads a little-endian `u32`.
    pub fn read_u32(&mut self) -> Result<u32> {
        self.need(4)?;
        Ok(self.buf.get_u32_le())
    }

    /// Reads a little-endian `u64`.
    pub fn read_u64(&mut self) -> Result<u64> {
        self.need(8)?;
        Ok(self.buf.get_u64_le())
    }

    /// Reads a fixed-size array.
    pub fn read_array<const N: usize>(&mut self) -> Result<[u8; N]> {
        self.need(N)?;
        let mut out = [0u8; N];
        self.buf.copy_to_slice(&mut out);
        Ok(out)
    }

    /// Borrows the next `n` bytes without copying.
    pub fn read_slice(&mut self, n: usize) -> Result<&'a [u8]> {
        self.need(n)?;
        let (head, tail) = self.buf.split_at(n);
        self.buf = tail;
        Ok(head)
    }

    /// Skips `n` bytes.
    pub fn skip(&mut self, n: usize) -> Result<()> {
        self.read_slice(n).map(|_| ())
    }

    /// Borrows everything that is left.
    pub fn rest(&mut self) -> &'a [u8] {
        let rest = self.buf;
        self.buf = &[];
        rest
    }
}

// ============================================
// Codec Trait
// ============================================

/// Binary encoding for fixed-layout wire structures.
pub trait Codec: Sized {
    /// Writes `self` into `buf`.
    fn encode<B: BufMut>(&self, buf: &mut B);

    /// Reads a value from `reader`.
    ///
    /// # Errors
    /// `PacketTooShort` when the input is truncated, or a type-specific
    /// validation error.
    fn decode(reader: &mut Reader<'_>) -> Result<Self>;

    /// Encodes into a fresh buffer.
    fn to_bytes(&self) -> BytesMut {
        let mut buf = BytesMut::new();
        self.encode(&mut buf);
        buf
    }

    /// Decodes from a slice, ignoring trailing bytes.
    ///
    /// # Errors
    /// See [`Codec::decode`].
    fn from_slice(bytes: &[u8]) -> Result<Self> {
        Self::decode(&mut Reader::new(bytes))
    }
}

// ============================================
// Tests
// ============================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reads_are_little_endian() {
        let data = [
            0x08, 0x07, 0x06, 0x05, 0x04, 0x03, 0x02, 0x01, // u64
            0x04, 0x03, 0x02, 0x01, // u32
            0x02, 0x01, // u16
        ];
        let mut reader = Reader::new(&data);
        assert_eq!(reader.read_u64().unwrap(), 0x0102_0304_0506_0708);
        assert_eq!(reader.read_u32().unwrap(), 0x0102_0304);
        assert_eq!(reader.read_u16().unwrap(), 0x0102);
        assert_eq!(reader.remaining(), 0);
    }

    #[test]
    fn test_truncated_read_reports_position() {
        let data = [0u8; 10];
        let mut reader = Reader::new(&data);
        reader.skip(4).unwrap();

        let err = reader.read_u64().unwrap_err();
        assert!(matches!(
            err,
            CoreError::PacketTooShort { expected: 12, actual: 10 }
        ));
        // A failed read consumes nothing
        assert_eq!(reader.position(), 4);
    }

    #[test]
    fn test_slice_and_rest() {
        let data = [1u8, 2, 3, 4, 5];
        let mut reader = Reader::new(&data);
        assert_eq!(reader.read_slice(2).unwrap(), &[1, 2]);
        assert_eq!(reader.read_array::<1>().unwrap(), [3]);
        assert_eq!(reader.rest(), &[4, 5]);
        assert_eq!(reader.remaining(), 0);
    }
}
