//! Bounds-checked byte cursor and primitive decoders.
//!
//! A [`ByteCursor`] is an absolute read position plus a window `[start, end)`
//! over a shared immutable buffer. Every read fails with
//! [`DecodeError::Bounds`] instead of touching bytes outside the window, and
//! [`ByteCursor::slice`] hands out independent sub-windows. Record and blob
//! decoders only ever receive a sliced cursor, which is what keeps a lying
//! size field from exposing neighbouring bytes.
//!
//! Positions reported by the cursor are absolute offsets into the underlying
//! buffer (the whole file), so byte ranges stay meaningful across fat slices.

use byteorder::{BigEndian, ByteOrder, LittleEndian};

use crate::error::{DecodeError, Result};
use crate::types::{ByteRange, Endianness, Width};

/// Bounded, positioned reader over an immutable buffer.
#[derive(Debug, Clone, Copy)]
pub struct ByteCursor<'a> {
    data: &'a [u8],
    start: usize,
    end: usize,
    pos: usize,
}

impl<'a> ByteCursor<'a> {
    /// Create a cursor covering the whole buffer.
    pub fn new(data: &'a [u8]) -> Self {
        Self {
            data,
            start: 0,
            end: data.len(),
            pos: 0,
        }
    }

    /// Absolute position of the next read.
    pub fn position(&self) -> usize {
        self.pos
    }

    /// Absolute start of this cursor's window.
    pub fn start(&self) -> usize {
        self.start
    }

    /// Absolute end (exclusive) of this cursor's window.
    pub fn end(&self) -> usize {
        self.end
    }

    /// Position relative to the start of the window.
    pub fn offset(&self) -> usize {
        self.pos - self.start
    }

    /// Window length in bytes.
    pub fn len(&self) -> usize {
        self.end - self.start
    }

    /// Whether the window is empty.
    pub fn is_empty(&self) -> bool {
        self.start == self.end
    }

    /// Bytes left between the position and the end of the window.
    pub fn remaining(&self) -> usize {
        self.end - self.pos
    }

    /// The whole window as an absolute byte range.
    pub fn range(&self) -> ByteRange {
        ByteRange {
            start: self.start,
            end: self.end,
        }
    }

    /// Absolute range from `from` up to the current position.
    pub fn range_from(&self, from: usize) -> ByteRange {
        ByteRange {
            start: from,
            end: self.pos.max(from),
        }
    }

    /// All bytes of the window, regardless of position.
    pub fn window(&self) -> &'a [u8] {
        &self.data[self.start..self.end]
    }

    fn bounds(&self, requested: usize) -> DecodeError {
        DecodeError::Bounds {
            offset: self.pos,
            requested,
            available: self.remaining(),
        }
    }

    // =========================================================================
    // Positioning
    // =========================================================================

    /// Move to an absolute position inside the window.
    pub fn seek_absolute(&mut self, pos: usize) -> Result<()> {
        if pos < self.start || pos > self.end {
            return Err(DecodeError::Bounds {
                offset: pos,
                requested: 0,
                available: 0,
            });
        }
        self.pos = pos;
        Ok(())
    }

    /// Move to a position relative to the start of the window.
    pub fn seek_to_offset(&mut self, offset: usize) -> Result<()> {
        let pos = self.start.checked_add(offset).ok_or(DecodeError::Bounds {
            offset: self.start,
            requested: offset,
            available: self.len(),
        })?;
        self.seek_absolute(pos)
    }

    /// Move forwards or backwards from the current position.
    pub fn seek_relative(&mut self, delta: i64) -> Result<()> {
        let target = if delta >= 0 {
            self.pos.checked_add(delta as usize)
        } else {
            self.pos.checked_sub(delta.unsigned_abs() as usize)
        };
        match target {
            Some(pos) => self.seek_absolute(pos),
            None => Err(self.bounds(delta.unsigned_abs() as usize)),
        }
    }

    /// Advance past `n` bytes.
    pub fn skip(&mut self, n: usize) -> Result<()> {
        if n > self.remaining() {
            return Err(self.bounds(n));
        }
        self.pos += n;
        Ok(())
    }

    /// Take the next `n` bytes as an independent cursor and advance past them.
    ///
    /// The returned cursor cannot observe anything outside those `n` bytes.
    pub fn slice(&mut self, n: usize) -> Result<ByteCursor<'a>> {
        if n > self.remaining() {
            return Err(self.bounds(n));
        }
        let sub = ByteCursor {
            data: self.data,
            start: self.pos,
            end: self.pos + n,
            pos: self.pos,
        };
        self.pos += n;
        Ok(sub)
    }

    /// Independent sub-cursor at `offset` (relative to the window start)
    /// spanning `len` bytes. The parent position is left untouched.
    pub fn view(&self, offset: usize, len: usize) -> Result<ByteCursor<'a>> {
        let mut peek = *self;
        peek.seek_to_offset(offset)?;
        peek.slice(len)
    }

    /// Independent sub-cursor from `offset` to the end of the window.
    pub fn view_from(&self, offset: usize) -> Result<ByteCursor<'a>> {
        let len = self.len().checked_sub(offset).ok_or(DecodeError::Bounds {
            offset: self.start.saturating_add(offset),
            requested: 0,
            available: 0,
        })?;
        self.view(offset, len)
    }

    // =========================================================================
    // Primitive reads
    // =========================================================================

    /// Read the next `n` bytes.
    pub fn read_bytes(&mut self, n: usize) -> Result<&'a [u8]> {
        if n > self.remaining() {
            return Err(self.bounds(n));
        }
        let bytes = &self.data[self.pos..self.pos + n];
        self.pos += n;
        Ok(bytes)
    }

    /// Read a fixed-size byte array.
    pub fn read_array<const N: usize>(&mut self) -> Result<[u8; N]> {
        let bytes = self.read_bytes(N)?;
        let mut out = [0u8; N];
        out.copy_from_slice(bytes);
        Ok(out)
    }

    /// Read everything up to the end of the window.
    pub fn read_rest(&mut self) -> &'a [u8] {
        let bytes = &self.data[self.pos..self.end];
        self.pos = self.end;
        bytes
    }

    /// Read a single byte.
    pub fn read_u8(&mut self) -> Result<u8> {
        Ok(self.read_bytes(1)?[0])
    }

    /// Read a u16 with specified endianness.
    pub fn read_u16(&mut self, endian: Endianness) -> Result<u16> {
        let bytes = self.read_bytes(2)?;
        Ok(match endian {
            Endianness::Little => LittleEndian::read_u16(bytes),
            Endianness::Big => BigEndian::read_u16(bytes),
        })
    }

    /// Read a u32 with specified endianness.
    pub fn read_u32(&mut self, endian: Endianness) -> Result<u32> {
        let bytes = self.read_bytes(4)?;
        Ok(match endian {
            Endianness::Little => LittleEndian::read_u32(bytes),
            Endianness::Big => BigEndian::read_u32(bytes),
        })
    }

    /// Read an i32 with specified endianness.
    pub fn read_i32(&mut self, endian: Endianness) -> Result<i32> {
        Ok(self.read_u32(endian)? as i32)
    }

    /// Read a u64 with specified endianness.
    pub fn read_u64(&mut self, endian: Endianness) -> Result<u64> {
        let bytes = self.read_bytes(8)?;
        Ok(match endian {
            Endianness::Little => LittleEndian::read_u64(bytes),
            Endianness::Big => BigEndian::read_u64(bytes),
        })
    }

    /// Read an unsigned integer of `width` bytes (1, 2, 4 or 8).
    pub fn read_uint(&mut self, width: usize, endian: Endianness) -> Result<u64> {
        match width {
            1 => self.read_u8().map(u64::from),
            2 => self.read_u16(endian).map(u64::from),
            4 => self.read_u32(endian).map(u64::from),
            8 => self.read_u64(endian),
            _ => Err(DecodeError::malformed(
                self.pos,
                format!("unsupported integer width {width}"),
            )),
        }
    }

    /// Read a pointer-sized word for the given image width.
    pub fn read_word(&mut self, width: Width, endian: Endianness) -> Result<u64> {
        self.read_uint(width.word_size(), endian)
    }

    /// Read a u32 without advancing.
    pub fn peek_u32(&self, endian: Endianness) -> Result<u32> {
        let mut peek = *self;
        peek.read_u32(endian)
    }

    // =========================================================================
    // Strings
    // =========================================================================

    /// Read a NUL-terminated string and advance past the terminator.
    ///
    /// Fails if no terminator exists before the end of the window.
    pub fn read_cstr(&mut self) -> Result<String> {
        let rest = &self.data[self.pos..self.end];
        match memchr::memchr(0, rest) {
            Some(nul) => {
                let s = String::from_utf8_lossy(&rest[..nul]).into_owned();
                self.pos += nul + 1;
                Ok(s)
            }
            None => Err(self.bounds(rest.len() + 1)),
        }
    }

    /// Read a fixed-size field holding a NUL-padded name (e.g. `segname`).
    pub fn read_fixed_str(&mut self, n: usize) -> Result<String> {
        let bytes = self.read_bytes(n)?;
        let len = memchr::memchr(0, bytes).unwrap_or(n);
        Ok(String::from_utf8_lossy(&bytes[..len]).into_owned())
    }

    /// Read a u32 length prefix followed by that many bytes, then skip
    /// padding up to the next 4-byte boundary (relative to the window start).
    pub fn read_len_prefixed(&mut self, endian: Endianness) -> Result<&'a [u8]> {
        let len = self.read_u32(endian)? as usize;
        let bytes = self.read_bytes(len)?;
        self.align_to(4)?;
        Ok(bytes)
    }

    /// Skip forward to the next multiple of `align` relative to the window start.
    pub fn align_to(&mut self, align: usize) -> Result<()> {
        let misalign = self.offset() % align;
        if misalign != 0 {
            self.skip(align - misalign)?;
        }
        Ok(())
    }

    // =========================================================================
    // LEB128
    // =========================================================================

    /// Read an unsigned LEB128 value.
    pub fn read_uleb128(&mut self) -> Result<u64> {
        let start = self.pos;
        let mut result: u64 = 0;
        let mut shift = 0u32;
        loop {
            let byte = self.read_u8()?;
            let low = u64::from(byte & 0x7F);
            if shift >= 64 || (shift == 63 && low > 1) {
                return Err(DecodeError::malformed(start, "ULEB128 value overflows 64 bits"));
            }
            result |= low << shift;
            if byte & 0x80 == 0 {
                return Ok(result);
            }
            shift += 7;
        }
    }

    /// Read a signed LEB128 value.
    pub fn read_sleb128(&mut self) -> Result<i64> {
        let start = self.pos;
        let mut result: i64 = 0;
        let mut shift = 0u32;
        loop {
            let byte = self.read_u8()?;
            if shift >= 64 {
                return Err(DecodeError::malformed(start, "SLEB128 value overflows 64 bits"));
            }
            result |= i64::from(byte & 0x7F) << shift;
            shift += 7;
            if byte & 0x80 == 0 {
                if shift < 64 && byte & 0x40 != 0 {
                    result |= -1i64 << shift;
                }
                return Ok(result);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_read_u32() {
        let data = [0x01, 0x02, 0x03, 0x04];
        let mut c = ByteCursor::new(&data);
        assert_eq!(c.read_u32(Endianness::Little).unwrap(), 0x04030201);
        c.seek_absolute(0).unwrap();
        assert_eq!(c.read_u32(Endianness::Big).unwrap(), 0x01020304);
        assert!(c.read_u8().is_err());
    }

    #[test]
    fn test_slice_is_isolated() {
        let data = [1u8, 2, 3, 4, 5, 6, 7, 8];
        let mut parent = ByteCursor::new(&data);
        parent.skip(2).unwrap();
        let mut sub = parent.slice(3).unwrap();

        assert_eq!(parent.position(), 5);
        assert_eq!(sub.range(), ByteRange::new(2, 3));
        assert_eq!(sub.read_bytes(3).unwrap(), &[3, 4, 5]);

        // Cannot observe the parent's remaining bytes.
        let err = sub.read_u8().unwrap_err();
        assert!(matches!(
            err,
            DecodeError::Bounds {
                offset: 5,
                requested: 1,
                available: 0
            }
        ));
        assert!(sub.seek_absolute(6).is_err());
        assert!(sub.seek_absolute(1).is_err());
    }

    #[test]
    fn test_slice_past_end() {
        let data = [0u8; 4];
        let mut c = ByteCursor::new(&data);
        let err = c.slice(5).unwrap_err();
        assert!(matches!(err, DecodeError::Bounds { requested: 5, available: 4, .. }));
        assert_eq!(c.position(), 0);
    }

    #[test]
    fn test_seek_relative() {
        let data = [0u8; 8];
        let mut c = ByteCursor::new(&data);
        c.seek_relative(6).unwrap();
        c.seek_relative(-4).unwrap();
        assert_eq!(c.position(), 2);
        assert!(c.seek_relative(-3).is_err());
        assert!(c.seek_relative(7).is_err());
    }

    #[test]
    fn test_view_leaves_parent() {
        let data = [9u8, 8, 7, 6, 5];
        let c = ByteCursor::new(&data);
        let mut v = c.view(1, 2).unwrap();
        assert_eq!(v.read_bytes(2).unwrap(), &[8, 7]);
        assert_eq!(c.position(), 0);
        assert!(c.view(4, 2).is_err());
        assert_eq!(c.view_from(3).unwrap().len(), 2);
    }

    #[test]
    fn test_cstr() {
        let data = b"abc\0def";
        let mut c = ByteCursor::new(data);
        assert_eq!(c.read_cstr().unwrap(), "abc");
        assert_eq!(c.position(), 4);
        // No terminator before the end of the window.
        assert!(c.read_cstr().is_err());
    }

    #[test]
    fn test_fixed_str() {
        let mut data = [0u8; 16];
        data[..6].copy_from_slice(b"__TEXT");
        let mut c = ByteCursor::new(&data);
        assert_eq!(c.read_fixed_str(16).unwrap(), "__TEXT");
        assert_eq!(c.remaining(), 0);
    }

    #[test]
    fn test_len_prefixed_alignment() {
        let data = [0, 0, 0, 5, b'h', b'e', b'l', b'l', b'o', 0, 0, 0, 0xAA];
        let mut c = ByteCursor::new(&data);
        assert_eq!(c.read_len_prefixed(Endianness::Big).unwrap(), b"hello");
        assert_eq!(c.offset(), 12);
        assert_eq!(c.read_u8().unwrap(), 0xAA);
    }

    #[test]
    fn test_uleb128() {
        let data = [0xE5, 0x8E, 0x26, 0x7F];
        let mut c = ByteCursor::new(&data);
        assert_eq!(c.read_uleb128().unwrap(), 624485);
        assert_eq!(c.read_uleb128().unwrap(), 127);

        let truncated = [0x80, 0x80];
        assert!(ByteCursor::new(&truncated).read_uleb128().is_err());

        let overlong = [0xFFu8; 11];
        assert!(ByteCursor::new(&overlong).read_uleb128().is_err());
    }

    #[test]
    fn test_sleb128() {
        let data = [0xC0, 0xBB, 0x78, 0x7F];
        let mut c = ByteCursor::new(&data);
        assert_eq!(c.read_sleb128().unwrap(), -123456);
        assert_eq!(c.read_sleb128().unwrap(), -1);
    }

    #[test]
    fn test_read_uint_widths() {
        let data = [0x12, 0x34, 0x56, 0x78, 0x9A, 0xBC, 0xDE, 0xF0];
        let mut c = ByteCursor::new(&data);
        assert_eq!(c.read_uint(2, Endianness::Big).unwrap(), 0x1234);
        c.seek_absolute(0).unwrap();
        assert_eq!(c.read_word(Width::Bits64, Endianness::Big).unwrap(), 0x123456789ABCDEF0);
        assert!(c.read_uint(3, Endianness::Big).is_err());
    }
}
