//! Big-endian byte cursors used by the frame and information element codecs.
//!
//! [`WireReader`] walks a borrowed datagram and returns [`WireError`] instead of
//! panicking when a field runs past the end. [`WireWriter`] appends to a
//! `BytesMut` and never fails.

use bytes::{BufMut, Bytes, BytesMut};

use crate::error::WireError;

/// Read cursor over a received datagram
#[derive(Debug, Clone)]
pub struct WireReader<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> WireReader<'a> {
    /// Create a reader positioned at the start of `data`
    pub fn new(data: &'a [u8]) -> Self {
        Self { data, pos: 0 }
    }

    /// Current read position
    pub fn position(&self) -> usize {
        self.pos
    }

    /// Number of unread bytes
    pub fn remaining(&self) -> usize {
        self.data.len() - self.pos
    }

    /// True once every byte has been consumed
    pub fn is_empty(&self) -> bool {
        self.remaining() == 0
    }

    fn ensure(&self, needed: usize) -> Result<(), WireError> {
        if self.remaining() < needed {
            return Err(WireError::Overrun {
                needed,
                available: self.remaining(),
            });
        }
        Ok(())
    }

    /// Look at the next `n` bytes without consuming them
    pub fn peek(&self, n: usize) -> Result<&'a [u8], WireError> {
        self.ensure(n)?;
        Ok(&self.data[self.pos..self.pos + n])
    }

    pub fn read_u8(&mut self) -> Result<u8, WireError> {
        self.ensure(1)?;
        let v = self.data[self.pos];
        self.pos += 1;
        Ok(v)
    }

    pub fn read_u16(&mut self) -> Result<u16, WireError> {
        let b = self.read_slice(2)?;
        Ok(u16::from_be_bytes([b[0], b[1]]))
    }

    pub fn read_u32(&mut self) -> Result<u32, WireError> {
        let b = self.read_slice(4)?;
        Ok(u32::from_be_bytes([b[0], b[1], b[2], b[3]]))
    }

    /// Consume `n` bytes and return them as a borrowed slice
    pub fn read_slice(&mut self, n: usize) -> Result<&'a [u8], WireError> {
        self.ensure(n)?;
        let s = &self.data[self.pos..self.pos + n];
        self.pos += n;
        Ok(s)
    }

    /// Consume `n` bytes and copy them out
    pub fn read_bytes(&mut self, n: usize) -> Result<Bytes, WireError> {
        self.read_slice(n).map(Bytes::copy_from_slice)
    }

    /// Consume everything that is left
    pub fn read_rest(&mut self) -> Bytes {
        let rest = Bytes::copy_from_slice(&self.data[self.pos..]);
        self.pos = self.data.len();
        rest
    }
}

/// Write cursor that builds an outgoing datagram
#[derive(Debug, Default)]
pub struct WireWriter {
    buf: BytesMut,
}

impl WireWriter {
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            buf: BytesMut::with_capacity(capacity),
        }
    }

    /// Bytes written so far
    pub fn len(&self) -> usize {
        self.buf.len()
    }

    pub fn write_u8(&mut self, v: u8) {
        self.buf.put_u8(v);
    }

    pub fn write_u16(&mut self, v: u16) {
        self.buf.put_u16(v);
    }

    pub fn write_u32(&mut self, v: u32) {
        self.buf.put_u32(v);
    }

    pub fn write_slice(&mut self, data: &[u8]) {
        self.buf.put_slice(data);
    }

    /// Finish writing and hand out the frozen buffer
    pub fn freeze(self) -> Bytes {
        self.buf.freeze()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reader_big_endian_fields() {
        let data = [0x80, 0x01, 0x00, 0x02, 0x00, 0x00, 0x01, 0x00, 0xaa];
        let mut r = WireReader::new(&data);
        assert_eq!(r.read_u16().unwrap(), 0x8001);
        assert_eq!(r.read_u16().unwrap(), 0x0002);
        assert_eq!(r.read_u32().unwrap(), 0x100);
        assert_eq!(r.position(), 8);
        assert_eq!(r.remaining(), 1);
        assert_eq!(r.read_u8().unwrap(), 0xaa);
        assert!(r.is_empty());
    }

    #[test]
    fn test_reader_overrun_is_an_error() {
        let data = [0x01, 0x02, 0x03];
        let mut r = WireReader::new(&data);
        assert_eq!(
            r.read_u32(),
            Err(WireError::Overrun { needed: 4, available: 3 })
        );
        // a failed read leaves the position untouched
        assert_eq!(r.position(), 0);
        assert_eq!(r.read_bytes(3).unwrap().as_ref(), &data[..]);
        assert!(r.read_u8().is_err());
    }

    #[test]
    fn test_writer_matches_reader() {
        let mut w = WireWriter::with_capacity(8);
        w.write_u16(0xbeef);
        w.write_u32(0x01020304);
        w.write_u8(7);
        assert_eq!(w.len(), 7);
        let bytes = w.freeze();
        let mut r = WireReader::new(&bytes);
        assert_eq!(r.read_u16().unwrap(), 0xbeef);
        assert_eq!(r.read_u32().unwrap(), 0x01020304);
        assert_eq!(r.read_rest().as_ref(), &[7]);
    }
}
