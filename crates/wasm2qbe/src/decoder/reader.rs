//! Byte reader with absolute offset tracking, LEB128 and little-endian
//! primitives.

use crate::error::ParseError;

pub type Result<T> = std::result::Result<T, ParseError>;

/// Cursor over a byte slice. `base` is the absolute offset of `data[0]` in
/// the module, so errors from sub-readers still point into the input file.
#[derive(Debug, Clone)]
pub struct BinaryReader<'a> {
    data: &'a [u8],
    pos: usize,
    base: usize,
}

impl<'a> BinaryReader<'a> {
    pub fn new(data: &'a [u8]) -> Self {
        Self::new_at(data, 0)
    }

    pub fn new_at(data: &'a [u8], base: usize) -> Self {
        Self { data, pos: 0, base }
    }

    /// Absolute offset of the next unread byte.
    pub fn offset(&self) -> usize {
        self.base + self.pos
    }

    pub fn remaining(&self) -> usize {
        self.data.len() - self.pos
    }

    pub fn is_eof(&self) -> bool {
        self.pos >= self.data.len()
    }

    pub fn error(&self, reason: impl Into<String>) -> ParseError {
        ParseError::new(self.offset(), reason)
    }

    fn eof(&self) -> ParseError {
        self.error("unexpected end of input")
    }

    pub fn peek_u8(&self) -> Result<u8> {
        self.data.get(self.pos).copied().ok_or_else(|| self.eof())
    }

    pub fn read_u8(&mut self) -> Result<u8> {
        let b = self.peek_u8()?;
        self.pos += 1;
        Ok(b)
    }

    pub fn read_bytes(&mut self, n: usize) -> Result<&'a [u8]> {
        if n > self.remaining() {
            return Err(self.eof());
        }
        let slice = &self.data[self.pos..self.pos + n];
        self.pos += n;
        Ok(slice)
    }

    /// Unread bytes, without consuming them.
    pub fn rest(&self) -> &'a [u8] {
        &self.data[self.pos..]
    }

    /// Split off the next `n` bytes as an independent reader.
    pub fn sub_reader(&mut self, n: usize) -> Result<BinaryReader<'a>> {
        let base = self.offset();
        let data = self.read_bytes(n)?;
        Ok(BinaryReader::new_at(data, base))
    }

    pub fn read_u32_le(&mut self) -> Result<u32> {
        let b = self.read_bytes(4)?;
        Ok(u32::from_le_bytes([b[0], b[1], b[2], b[3]]))
    }

    pub fn read_u64_le(&mut self) -> Result<u64> {
        let b = self.read_bytes(8)?;
        let mut buf = [0u8; 8];
        buf.copy_from_slice(b);
        Ok(u64::from_le_bytes(buf))
    }

    pub fn read_u128_le(&mut self) -> Result<u128> {
        let b = self.read_bytes(16)?;
        let mut buf = [0u8; 16];
        buf.copy_from_slice(b);
        Ok(u128::from_le_bytes(buf))
    }

    pub fn read_var_u32(&mut self) -> Result<u32> {
        self.read_uleb(32).map(|v| v as u32)
    }

    pub fn read_var_u64(&mut self) -> Result<u64> {
        self.read_uleb(64)
    }

    pub fn read_var_i32(&mut self) -> Result<i32> {
        self.read_sleb(32).map(|v| v as i32)
    }

    pub fn read_var_i64(&mut self) -> Result<i64> {
        self.read_sleb(64)
    }

    /// Signed 33-bit LEB128, used by block types and heap types.
    pub fn read_var_s33(&mut self) -> Result<i64> {
        self.read_sleb(33)
    }

    fn read_uleb(&mut self, bits: u32) -> Result<u64> {
        let start = self.offset();
        let max_bytes = bits.div_ceil(7);
        let mut result = 0u64;
        for i in 0..max_bytes {
            let byte = self.read_u8()?;
            let low = u64::from(byte & 0x7f);
            if i + 1 == max_bytes {
                if byte & 0x80 != 0 {
                    return Err(ParseError::new(start, "integer representation too long"));
                }
                let used = bits - 7 * i;
                if low >> used != 0 {
                    return Err(ParseError::new(start, "integer too large"));
                }
            }
            result |= low << (7 * i);
            if byte & 0x80 == 0 {
                return Ok(result);
            }
        }
        Err(ParseError::new(start, "integer representation too long"))
    }

    fn read_sleb(&mut self, bits: u32) -> Result<i64> {
        let start = self.offset();
        let max_bytes = bits.div_ceil(7);
        let mut result = 0i64;
        let mut shift = 0u32;
        for i in 0..max_bytes {
            let byte = self.read_u8()?;
            let low = i64::from(byte & 0x7f);
            if i + 1 == max_bytes {
                if byte & 0x80 != 0 {
                    return Err(ParseError::new(start, "integer representation too long"));
                }
                // The sign bit and every unused bit above it must agree.
                let used = bits - 7 * i;
                let high = low >> (used - 1);
                if high != 0 && high != (0x7f >> (used - 1)) {
                    return Err(ParseError::new(start, "integer too large"));
                }
            }
            result |= low << shift;
            shift += 7;
            if byte & 0x80 == 0 {
                if shift < 64 && byte & 0x40 != 0 {
                    result |= -1i64 << shift;
                }
                return Ok(result);
            }
        }
        Err(ParseError::new(start, "integer representation too long"))
    }

    /// Read a vector length and check it against `limit` before anything is
    /// allocated for it.
    pub fn read_length(&mut self, limit: usize, what: &str) -> Result<u32> {
        let offset = self.offset();
        let count = self.read_var_u32()?;
        if count as usize > limit {
            return Err(ParseError::new(
                offset,
                format!("{} count {} exceeds limit {}", what, count, limit),
            ));
        }
        Ok(count)
    }

    /// Capacity to reserve for `count` items: never more than the bytes left,
    /// since every item takes at least one byte.
    pub fn capacity_for(&self, count: u32) -> usize {
        (count as usize).min(self.remaining())
    }

    /// Length-prefixed UTF-8 name bounded by `max_len`.
    pub fn read_name(&mut self, max_len: usize) -> Result<String> {
        let offset = self.offset();
        let len = self.read_var_u32()? as usize;
        if len > max_len {
            return Err(ParseError::new(
                offset,
                format!("name length {} exceeds limit {}", len, max_len),
            ));
        }
        let bytes = self.read_bytes(len)?;
        std::str::from_utf8(bytes)
            .map(str::to_owned)
            .map_err(|_| ParseError::new(offset, "malformed UTF-8 encoding"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn uleb32_basic() {
        let mut r = BinaryReader::new(&[0xE5, 0x8E, 0x26]);
        assert_eq!(r.read_var_u32().unwrap(), 624485);
        assert!(r.is_eof());
    }

    #[test]
    fn uleb32_max() {
        let mut r = BinaryReader::new(&[0xFF, 0xFF, 0xFF, 0xFF, 0x0F]);
        assert_eq!(r.read_var_u32().unwrap(), u32::MAX);
    }

    #[test]
    fn uleb32_unused_bits_rejected() {
        let mut r = BinaryReader::new(&[0xFF, 0xFF, 0xFF, 0xFF, 0x1F]);
        let err = r.read_var_u32().unwrap_err();
        assert!(err.reason.contains("too large"));
    }

    #[test]
    fn uleb32_too_long() {
        let mut r = BinaryReader::new(&[0x80, 0x80, 0x80, 0x80, 0x80, 0x00]);
        let err = r.read_var_u32().unwrap_err();
        assert!(err.reason.contains("too long"));
    }

    #[test]
    fn sleb32_negative() {
        let mut r = BinaryReader::new(&[0x7F]);
        assert_eq!(r.read_var_i32().unwrap(), -1);
        let mut r = BinaryReader::new(&[0xC0, 0xBB, 0x78]);
        assert_eq!(r.read_var_i32().unwrap(), -123456);
    }

    #[test]
    fn sleb32_extremes() {
        let mut r = BinaryReader::new(&[0x80, 0x80, 0x80, 0x80, 0x78]);
        assert_eq!(r.read_var_i32().unwrap(), i32::MIN);
        let mut r = BinaryReader::new(&[0xFF, 0xFF, 0xFF, 0xFF, 0x07]);
        assert_eq!(r.read_var_i32().unwrap(), i32::MAX);
    }

    #[test]
    fn sleb32_bad_sign_bits() {
        let mut r = BinaryReader::new(&[0xFF, 0xFF, 0xFF, 0xFF, 0x4F]);
        assert!(r.read_var_i32().is_err());
    }

    #[test]
    fn sleb64_min() {
        let bytes = [0x80, 0x80, 0x80, 0x80, 0x80, 0x80, 0x80, 0x80, 0x80, 0x7F];
        let mut r = BinaryReader::new(&bytes);
        assert_eq!(r.read_var_i64().unwrap(), i64::MIN);
    }

    #[test]
    fn s33_block_type_codes() {
        let mut r = BinaryReader::new(&[0x40]);
        assert_eq!(r.read_var_s33().unwrap(), -64);
        let mut r = BinaryReader::new(&[0x05]);
        assert_eq!(r.read_var_s33().unwrap(), 5);
    }

    #[test]
    fn length_limit_checked_before_allocation() {
        let mut r = BinaryReader::new(&[0xE8, 0x07]);
        let err = r.read_length(999, "function").unwrap_err();
        assert_eq!(err.offset, 0);
        assert!(err.reason.contains("1000"));
    }

    #[test]
    fn sub_reader_keeps_absolute_offsets() {
        let data = [1, 2, 3, 4, 5];
        let mut r = BinaryReader::new(&data);
        r.read_u8().unwrap();
        let mut sub = r.sub_reader(3).unwrap();
        assert_eq!(sub.offset(), 1);
        sub.read_u8().unwrap();
        assert_eq!(sub.offset(), 2);
        assert_eq!(r.offset(), 4);
        assert!(sub.read_bytes(5).is_err());
    }

    #[test]
    fn name_rejects_bad_utf8() {
        let mut r = BinaryReader::new(&[2, 0xC3, 0x28]);
        assert!(r.read_name(100).is_err());
        let mut r = BinaryReader::new(&[3, b'a', b'b', b'c']);
        assert_eq!(r.read_name(100).unwrap(), "abc");
        let mut r = BinaryReader::new(&[3, b'a', b'b', b'c']);
        assert!(r.read_name(2).is_err());
    }
}
