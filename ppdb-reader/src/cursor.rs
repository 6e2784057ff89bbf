//! A bounds-checked reader over an in-memory byte buffer.
//!
//! Every structure in a Portable PDB file is addressed by absolute offsets into the file or
//! relative offsets into one of its heaps. [`ByteCursor`] reads those structures without ever
//! touching memory outside of the buffer, and additionally allows restricting reads to a
//! sub-region (a single heap entry, a single stream) via a stack of length limits.

use crate::format::{FormatError, FormatErrorKind};

/// A cursor over a byte buffer that refuses to read past the buffer end or the active length limit.
#[derive(Debug, Clone)]
pub struct ByteCursor<'data> {
    buf: &'data [u8],
    pos: usize,
    /// Stack of absolute end offsets. Only the innermost limit applies.
    limits: Vec<usize>,
}

impl<'data> ByteCursor<'data> {
    /// Creates a cursor positioned at the start of `buf`.
    pub fn new(buf: &'data [u8]) -> Self {
        Self {
            buf,
            pos: 0,
            limits: Vec::new(),
        }
    }

    /// Returns the absolute offset of the next byte to be read.
    pub fn position(&self) -> usize {
        self.pos
    }

    /// The absolute offset reads may not cross.
    fn end(&self) -> usize {
        self.limits.last().copied().unwrap_or(self.buf.len())
    }

    /// Returns the number of bytes left before the active limit.
    pub fn remaining(&self) -> usize {
        self.end().saturating_sub(self.pos)
    }

    /// Returns `true` iff the cursor has not reached the current length limit.
    pub fn has_more(&self) -> bool {
        self.pos < self.end()
    }

    fn out_of_bounds(&self, len: usize) -> FormatError {
        FormatErrorKind::OutOfBounds {
            offset: self.pos,
            len,
        }
        .into()
    }

    /// Moves the cursor to an absolute offset within the buffer.
    ///
    /// Seeking to exactly the end of the buffer is allowed, subsequent reads will fail.
    pub fn seek(&mut self, offset: usize) -> Result<(), FormatError> {
        if offset > self.buf.len() {
            return Err(FormatErrorKind::OutOfBounds { offset, len: 0 }.into());
        }
        self.pos = offset;
        Ok(())
    }

    /// Advances the cursor by `n` bytes.
    pub fn skip(&mut self, n: usize) -> Result<(), FormatError> {
        self.read_bytes(n).map(|_| ())
    }

    /// Restricts all further reads to the next `n` bytes.
    ///
    /// Limits nest: the new limit must lie within the currently active one. Every push must be
    /// paired with a [`pop_length_limit`](Self::pop_length_limit), see
    /// [`with_length_limit`](Self::with_length_limit) for a scoped variant.
    pub fn push_length_limit(&mut self, n: usize) -> Result<(), FormatError> {
        let new_end = self
            .pos
            .checked_add(n)
            .filter(|end| *end <= self.end())
            .ok_or_else(|| self.out_of_bounds(n))?;
        self.limits.push(new_end);
        Ok(())
    }

    /// Restores the length limit that was active before the last push.
    pub fn pop_length_limit(&mut self) {
        self.limits.pop();
    }

    /// Runs `f` with reads restricted to the next `n` bytes.
    ///
    /// The previous limit is restored whether or not `f` succeeds.
    pub fn with_length_limit<T, F>(&mut self, n: usize, f: F) -> Result<T, FormatError>
    where
        F: FnOnce(&mut Self) -> Result<T, FormatError>,
    {
        self.push_length_limit(n)?;
        let depth = self.limits.len();
        let result = f(self);
        self.limits.truncate(depth - 1);
        result
    }

    /// Reads exactly `n` bytes.
    pub fn read_bytes(&mut self, n: usize) -> Result<&'data [u8], FormatError> {
        let end = self
            .pos
            .checked_add(n)
            .filter(|end| *end <= self.end())
            .ok_or_else(|| self.out_of_bounds(n))?;
        let bytes = self
            .buf
            .get(self.pos..end)
            .ok_or_else(|| self.out_of_bounds(n))?;
        self.pos = end;
        Ok(bytes)
    }

    fn read_array<const N: usize>(&mut self) -> Result<[u8; N], FormatError> {
        let mut array = [0; N];
        array.copy_from_slice(self.read_bytes(N)?);
        Ok(array)
    }

    /// Reads a single byte.
    pub fn read_u8(&mut self) -> Result<u8, FormatError> {
        Ok(self.read_array::<1>()?[0])
    }

    /// Reads a little-endian `u16`.
    pub fn read_u16(&mut self) -> Result<u16, FormatError> {
        self.read_array().map(u16::from_le_bytes)
    }

    /// Reads a little-endian `u32`.
    pub fn read_u32(&mut self) -> Result<u32, FormatError> {
        self.read_array().map(u32::from_le_bytes)
    }

    /// Reads a little-endian `u64`.
    pub fn read_u64(&mut self) -> Result<u64, FormatError> {
        self.read_array().map(u64::from_le_bytes)
    }

    /// Reads a little-endian index that is either 2 or 4 bytes wide.
    pub fn read_index(&mut self, width: usize) -> Result<u32, FormatError> {
        match width {
            2 => self.read_u16().map(u32::from),
            4 => self.read_u32(),
            _ => Err(FormatErrorKind::InvalidIndexWidth(width).into()),
        }
    }

    /// Reads bytes up to a null terminator, consuming the terminator.
    ///
    /// The returned slice does not include the terminator. Fails if no terminator is found
    /// before the active limit.
    pub fn read_null_terminated(&mut self) -> Result<&'data [u8], FormatError> {
        let available = self
            .buf
            .get(self.pos..self.end())
            .ok_or_else(|| self.out_of_bounds(1))?;
        let len = available
            .iter()
            .position(|b| *b == 0)
            .ok_or_else(|| self.out_of_bounds(available.len() + 1))?;
        let bytes = self.read_bytes(len)?;
        self.skip(1)?;
        Ok(bytes)
    }

    /// Reads an ECMA-335 compressed unsigned integer.
    ///
    /// The top bits of the first byte select the width:
    /// `0xxxxxxx` is 1 byte, `10xxxxxx` is 2 bytes, `110xxxxx` is 4 bytes (big-endian).
    pub fn read_compressed_u32(&mut self) -> Result<u32, FormatError> {
        let start = self.pos;
        let first = self.read_u8()?;

        if first & 0b1000_0000 == 0 {
            return Ok(first as u32);
        }

        if first & 0b0100_0000 == 0 {
            let second = self.read_u8()?;
            let num = u16::from_be_bytes([first, second]) & 0b0011_1111_1111_1111;
            return Ok(num as u32);
        }

        if first & 0b0010_0000 == 0 {
            let [b1, b2, b3] = self.read_array::<3>()?;
            let num = u32::from_be_bytes([first, b1, b2, b3]);
            return Ok(num & 0b0001_1111_1111_1111_1111_1111_1111_1111);
        }

        Err(FormatErrorKind::InvalidCompressedInteger { offset: start }.into())
    }

    /// Reads an ECMA-335 compressed signed integer.
    ///
    /// The value is stored like an unsigned one, rotated so that the sign bit is the
    /// least significant bit of the encoded value.
    pub fn read_compressed_i32(&mut self) -> Result<i32, FormatError> {
        let start = self.pos;
        let first = *self
            .buf
            .get(start)
            .filter(|_| start < self.end())
            .ok_or_else(|| self.out_of_bounds(1))?;
        let raw = self.read_compressed_u32()?;

        let value_bits = if first & 0b1000_0000 == 0 {
            7
        } else if first & 0b0100_0000 == 0 {
            14
        } else {
            29
        };

        let magnitude = (raw >> 1) as i32;
        if raw & 1 == 0 {
            Ok(magnitude)
        } else {
            // sign-extend from `value_bits - 1` bits
            Ok(magnitude - (1 << (value_bits - 1)))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_compressed_unsigned() {
        let cases = [
            (&[0x03][..], 0x03),
            (&[0x7F], 0x7F),
            (&[0x80, 0x80], 0x80),
            (&[0xAE, 0x57], 0x2E57),
            (&[0xBF, 0xFF], 0x3FFF),
            (&[0xC0, 0x00, 0x40, 0x00], 0x4000),
            (&[0xDF, 0xFF, 0xFF, 0xFF], 0x1FFF_FFFF),
        ];

        for (bytes, expected) in cases.iter() {
            let mut cursor = ByteCursor::new(bytes);
            assert_eq!(cursor.read_compressed_u32().unwrap(), *expected);
            assert!(!cursor.has_more());
        }
    }

    #[test]
    fn test_compressed_signed() {
        let cases = [
            (&[0x06][..], 3),
            (&[0x7B], -3),
            (&[0x01], -64),
            (&[0x7E], 63),
            (&[0x80, 0x80], 64),
            (&[0x80, 0x01], -8192),
            (&[0xC0, 0x00, 0x40, 0x00], 8192),
            (&[0xDF, 0xFF, 0xFF, 0xFE], 268435455),
            (&[0xC0, 0x00, 0x00, 0x01], -268435456),
        ];

        for (bytes, expected) in cases.iter() {
            let mut cursor = ByteCursor::new(bytes);
            assert_eq!(cursor.read_compressed_i32().unwrap(), *expected, "{bytes:x?}");
        }
    }

    #[test]
    fn test_compressed_truncated() {
        for bytes in [&[][..], &[0x80], &[0xC0, 0x00, 0x40]] {
            let err = ByteCursor::new(bytes).read_compressed_u32().unwrap_err();
            assert!(matches!(err.kind(), FormatErrorKind::OutOfBounds { .. }));
        }
    }

    #[test]
    fn test_compressed_reserved_prefix() {
        let err = ByteCursor::new(&[0xE0, 0, 0, 0])
            .read_compressed_u32()
            .unwrap_err();
        assert!(matches!(
            err.kind(),
            FormatErrorKind::InvalidCompressedInteger { offset: 0 }
        ));
    }

    #[test]
    fn test_length_limit() {
        let data = [1, 2, 3, 4, 5, 6];
        let mut cursor = ByteCursor::new(&data);
        cursor.seek(1).unwrap();

        cursor.push_length_limit(2).unwrap();
        assert_eq!(cursor.read_u8().unwrap(), 2);
        assert!(cursor.has_more());
        assert_eq!(cursor.read_u8().unwrap(), 3);
        assert!(!cursor.has_more());
        assert!(cursor.read_u8().is_err());
        cursor.pop_length_limit();

        assert_eq!(cursor.read_u8().unwrap(), 4);
        assert_eq!(cursor.remaining(), 2);
    }

    #[test]
    fn test_nested_limit_cannot_grow() {
        let data = [0; 8];
        let mut cursor = ByteCursor::new(&data);
        cursor.push_length_limit(4).unwrap();
        assert!(cursor.push_length_limit(5).is_err());
        assert!(cursor.push_length_limit(4).is_ok());
    }

    #[test]
    fn test_scoped_limit_restored_on_error() {
        let data = [0xAA; 8];
        let mut cursor = ByteCursor::new(&data);

        let result = cursor.with_length_limit(2, |c| c.read_u32());
        assert!(result.is_err());

        // The outer region is fully readable again.
        cursor.seek(0).unwrap();
        assert_eq!(cursor.read_u64().unwrap(), 0xAAAA_AAAA_AAAA_AAAA);
    }

    #[test]
    fn test_null_terminated() {
        let data = b"abc\0de";
        let mut cursor = ByteCursor::new(data);
        assert_eq!(cursor.read_null_terminated().unwrap(), b"abc");
        assert_eq!(cursor.position(), 4);
        assert!(cursor.read_null_terminated().is_err());
    }

    #[test]
    fn test_seek_past_end() {
        let mut cursor = ByteCursor::new(&[0; 4]);
        assert!(cursor.seek(4).is_ok());
        assert!(cursor.read_u8().is_err());
        assert!(cursor.seek(5).is_err());
    }
}
