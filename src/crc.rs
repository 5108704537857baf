//! Checksums used by the bootload protocol.
//!
//! - CRC-16/XMODEM (polynomial `0x1021`, initial value `0`) protects every
//!   radio data frame and every serial block.
//! - CRC-32 (reflected polynomial `0xEDB88320`, initial value `0xFFFFFFFF`)
//!   runs across a whole cloned image. The accumulator is kept un-inverted
//!   while streaming; [`Crc32::finish`] applies the final inversion.

use crate::consts::CRC32_START;

const CRC32_POLY_REFLECTED: u32 = 0xedb8_8320;

/// Folds one byte into a CRC-16/XMODEM accumulator.
pub fn crc16_update(crc: u16, data: u8) -> u16 {
    let mut crc = crc ^ ((data as u16) << 8);
    for _ in 0..8 {
        crc = if crc & 0x8000 != 0 {
            (crc << 1) ^ 0x1021
        } else {
            crc << 1
        };
    }
    crc
}

/// CRC-16/XMODEM over a whole slice.
pub fn crc16(data: &[u8]) -> u16 {
    data.iter().fold(0, |crc, b| crc16_update(crc, *b))
}

/// Folds one byte into a reflected CRC-32 accumulator.
pub fn crc32_update(crc: u32, data: u8) -> u32 {
    let mut crc = crc ^ data as u32;
    for _ in 0..8 {
        let mask = (crc & 1).wrapping_neg();
        crc = (crc >> 1) ^ (CRC32_POLY_REFLECTED & mask);
    }
    crc
}

/// Streaming CRC-32 over an image.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt-0-3", derive(defmt::Format))]
pub struct Crc32 {
    value: u32,
}

impl Default for Crc32 {
    fn default() -> Self {
        Self::new()
    }
}

impl Crc32 {
    /// A fresh accumulator.
    pub const fn new() -> Self {
        Self { value: CRC32_START }
    }

    /// Folds a single byte.
    pub fn update_byte(&mut self, byte: u8) {
        self.value = crc32_update(self.value, byte);
    }

    /// Folds every byte of `data`.
    pub fn update(&mut self, data: &[u8]) {
        self.value = data.iter().fold(self.value, |crc, b| crc32_update(crc, *b));
    }

    /// The running, un-inverted accumulator.
    pub fn value(&self) -> u32 {
        self.value
    }

    /// The finished checksum as appended to a cloned image.
    pub fn finish(&self) -> u32 {
        !self.value
    }
}

pub(crate) fn lo8(x: u16) -> u8 {
    (x & 0xff) as u8
}

pub(crate) fn hi8(x: u16) -> u8 {
    (x >> 8) as u8
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::consts::CRC32_END;

    #[test]
    fn crc16_check_value() {
        assert_eq!(crc16(b"123456789"), 0x31c3);
    }

    #[test]
    fn crc16_of_nothing_is_zero() {
        assert_eq!(crc16(&[]), 0);
    }

    #[test]
    fn crc32_check_value() {
        let mut crc = Crc32::new();
        crc.update(b"123456789");
        assert_eq!(crc.finish(), 0xcbf4_3926);
    }

    #[test]
    fn crc32_residue_after_appending_checksum() {
        let mut crc = Crc32::new();
        crc.update(b"firmware image bytes");
        let tail = crc.finish().to_le_bytes();
        crc.update(&tail);
        assert_eq!(crc.value(), CRC32_END);
    }

    #[test]
    fn byte_helpers_split_words() {
        assert_eq!(hi8(0xfd03), 0xfd);
        assert_eq!(lo8(0xfd03), 0x03);
    }
}
