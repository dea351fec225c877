//! Fixed-width integer packing.
//!
//! Serializes integers at the byte order and pointer width of a target
//! ABI. Used for relocation entries and the handful of raw fields the
//! `object` struct types do not cover.

use object::Endianness;

/// Packs integers for a given endianness and bit width.
#[derive(Debug, Clone, Copy)]
pub struct Encoder {
    endianness: Endianness,
    bitness: u8,
}

impl Encoder {
    /// `bitness` must be 32 or 64.
    pub fn new(endianness: Endianness, bitness: u8) -> Self {
        debug_assert!(bitness == 32 || bitness == 64);
        Self { endianness, bitness }
    }

    pub fn uint16(&self, value: u16) -> [u8; 2] {
        match self.endianness {
            Endianness::Little => value.to_le_bytes(),
            Endianness::Big => value.to_be_bytes(),
        }
    }

    pub fn uint32(&self, value: u32) -> [u8; 4] {
        match self.endianness {
            Endianness::Little => value.to_le_bytes(),
            Endianness::Big => value.to_be_bytes(),
        }
    }

    pub fn uint64(&self, value: u64) -> [u8; 8] {
        match self.endianness {
            Endianness::Little => value.to_le_bytes(),
            Endianness::Big => value.to_be_bytes(),
        }
    }

    /// Encodes a pointer-width integer: 4 bytes on 32-bit targets,
    /// 8 bytes on 64-bit targets. Values are truncated, which is the
    /// desired behavior for two's-complement addends.
    pub fn word(&self, value: u64) -> Vec<u8> {
        if self.bitness == 32 {
            self.uint32(value as u32).to_vec()
        } else {
            self.uint64(value).to_vec()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn little_endian_widths() {
        let encoder = Encoder::new(Endianness::Little, 64);
        assert_eq!(encoder.uint16(0x1234), [0x34, 0x12]);
        assert_eq!(encoder.uint32(0x12345678), [0x78, 0x56, 0x34, 0x12]);
        assert_eq!(encoder.word(1), vec![1, 0, 0, 0, 0, 0, 0, 0]);
    }

    #[test]
    fn big_endian_widths() {
        let encoder = Encoder::new(Endianness::Big, 32);
        assert_eq!(encoder.uint32(0x12345678), [0x12, 0x34, 0x56, 0x78]);
        assert_eq!(encoder.word(0x0102), vec![0, 0, 0x01, 0x02]);
    }

    #[test]
    fn word_truncates_negative_addend_on_32_bit() {
        let encoder = Encoder::new(Endianness::Little, 32);
        assert_eq!(encoder.word((-4i64) as u64), vec![0xfc, 0xff, 0xff, 0xff]);
    }
}
