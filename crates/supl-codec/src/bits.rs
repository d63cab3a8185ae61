//! Bit-granular buffers used by the unaligned PER engine.

use crate::error::DecodeError;

/// Append-only bit buffer. Bits are written most-significant first.
#[derive(Debug, Default)]
pub struct BitWriter {
    buf: Vec<u8>,
    len: usize,
}

impl BitWriter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of bits written so far.
    pub fn bit_len(&self) -> usize {
        self.len
    }

    pub fn write_bit(&mut self, bit: bool) {
        if self.len % 8 == 0 {
            self.buf.push(0);
        }
        if bit {
            let idx = self.len / 8;
            self.buf[idx] |= 0x80 >> (self.len % 8);
        }
        self.len += 1;
    }

    /// Write the low `count` bits of `value`, most significant first.
    pub fn write_bits(&mut self, value: u64, count: u32) {
        debug_assert!(count <= 64);
        for i in (0..count).rev() {
            self.write_bit((value >> i) & 1 == 1);
        }
    }

    /// Write whole octets without any alignment.
    pub fn write_bytes(&mut self, bytes: &[u8]) {
        if self.len % 8 == 0 {
            self.buf.extend_from_slice(bytes);
            self.len += bytes.len() * 8;
            return;
        }
        for &b in bytes {
            self.write_bits(u64::from(b), 8);
        }
    }

    /// Write the first `count` bits of `bytes`.
    pub fn write_bit_slice(&mut self, bytes: &[u8], count: usize) {
        for i in 0..count {
            self.write_bit(bytes[i / 8] & (0x80 >> (i % 8)) != 0);
        }
    }

    /// Finish the buffer, padding the last octet with zero bits.
    pub fn into_bytes(self) -> Vec<u8> {
        self.buf
    }
}

/// Cursor over a byte slice that reads individual bits.
#[derive(Debug)]
pub struct BitReader<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> BitReader<'a> {
    pub fn new(data: &'a [u8]) -> Self {
        Self { data, pos: 0 }
    }

    /// Current bit offset from the start of the input.
    pub fn position(&self) -> usize {
        self.pos
    }

    pub fn remaining(&self) -> usize {
        self.data.len() * 8 - self.pos
    }

    fn ensure(&self, count: usize) -> Result<(), DecodeError> {
        if self.remaining() < count {
            return Err(DecodeError::Truncated { at: self.pos });
        }
        Ok(())
    }

    pub fn read_bit(&mut self) -> Result<bool, DecodeError> {
        self.ensure(1)?;
        let bit = self.data[self.pos / 8] & (0x80 >> (self.pos % 8)) != 0;
        self.pos += 1;
        Ok(bit)
    }

    pub fn read_bits(&mut self, count: u32) -> Result<u64, DecodeError> {
        debug_assert!(count <= 64);
        self.ensure(count as usize)?;
        let mut value = 0u64;
        for _ in 0..count {
            value = (value << 1) | u64::from(self.read_bit()?);
        }
        Ok(value)
    }

    pub fn read_bytes(&mut self, count: usize) -> Result<Vec<u8>, DecodeError> {
        self.ensure(count * 8)?;
        if self.pos % 8 == 0 {
            let start = self.pos / 8;
            self.pos += count * 8;
            return Ok(self.data[start..start + count].to_vec());
        }
        let mut out = Vec::with_capacity(count);
        for _ in 0..count {
            out.push(self.read_bits(8)? as u8);
        }
        Ok(out)
    }

    /// Read `count` bits into a zero-padded octet vector.
    pub fn read_bit_slice(&mut self, count: usize) -> Result<Vec<u8>, DecodeError> {
        self.ensure(count)?;
        let mut out = vec![0u8; count.div_ceil(8)];
        for i in 0..count {
            if self.read_bit()? {
                out[i / 8] |= 0x80 >> (i % 8);
            }
        }
        Ok(out)
    }
}

/// Number of bits needed to encode `range` distinct values (`ceil(log2(range))`).
pub fn bits_for_range(range: u128) -> u32 {
    if range <= 1 {
        return 0;
    }
    128 - (range - 1).leading_zeros()
}
