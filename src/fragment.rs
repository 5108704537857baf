//! Fragmentation engine.
//!
//! Images move as 128-byte serial blocks numbered from 1. The radio cannot
//! carry a whole block, so block `n` travels as two 64-byte frames numbered
//! `2n - 1` (first half) and `2n` (second half). Each frame carries the
//! complement of its number and a CRC-16 of its payload. Numbers are `u8`
//! and wrap within a long image.
//!
//! The receive side is [`Reassembler`], which checks the complement before
//! the CRC and rebuilds blocks in order.

use crate::codec::DataFrame;
use crate::consts::{RADIO_PAYLOAD_LEN_USIZE, SERIAL_BLOCK_LEN_USIZE};
use crate::crc::crc16;
use crate::error::FrameError;

/// One serial block.
pub type SerialBlock = [u8; SERIAL_BLOCK_LEN_USIZE];

/// Filler used to complete the last block of an image.
pub const BLOCK_FILLER: u8 = 0xff;

/// Frame numbers of serial block `block_number`, first half first.
pub const fn frame_numbers(block_number: u8) -> [u8; 2] {
    let second = block_number.wrapping_mul(2);
    [second.wrapping_sub(1), second]
}

/// Offset inside the serial block carried by `frame_number`.
///
/// Odd frames carry the first half.
pub const fn frame_offset(frame_number: u8) -> usize {
    if frame_number & 1 == 1 {
        0
    } else {
        RADIO_PAYLOAD_LEN_USIZE
    }
}

/// Cuts the frame numbered `frame_number` out of `block`.
pub fn make_frame(block: &SerialBlock, frame_number: u8) -> DataFrame {
    let start = frame_offset(frame_number);
    let mut payload = [0u8; RADIO_PAYLOAD_LEN_USIZE];
    payload.copy_from_slice(&block[start..start + RADIO_PAYLOAD_LEN_USIZE]);
    DataFrame {
        number: frame_number,
        complement: !frame_number,
        crc: crc16(&payload),
        payload,
    }
}

/// Both frames of serial block `block_number`.
pub fn split_block(block_number: u8, block: &SerialBlock) -> [DataFrame; 2] {
    let [first, second] = frame_numbers(block_number);
    [make_frame(block, first), make_frame(block, second)]
}

/// Checks the complement, then the CRC, of a received frame.
pub fn check_frame(frame: &DataFrame) -> Result<(), FrameError> {
    if frame.number != !frame.complement {
        return Err(FrameError::Complement);
    }
    if crc16(&frame.payload) != frame.crc {
        return Err(FrameError::Crc);
    }
    Ok(())
}

/// Iterator over the serial blocks of an image, the last one padded with
/// [`BLOCK_FILLER`].
#[derive(Debug, Clone)]
pub struct ImageBlocks<'a> {
    chunks: core::slice::Chunks<'a, u8>,
}

impl<'a> ImageBlocks<'a> {
    /// Blocks of `image`.
    pub fn new(image: &'a [u8]) -> Self {
        Self {
            chunks: image.chunks(SERIAL_BLOCK_LEN_USIZE),
        }
    }
}

impl Iterator for ImageBlocks<'_> {
    type Item = SerialBlock;

    fn next(&mut self) -> Option<Self::Item> {
        let chunk = self.chunks.next()?;
        let mut block = [BLOCK_FILLER; SERIAL_BLOCK_LEN_USIZE];
        block[..chunk.len()].copy_from_slice(chunk);
        Some(block)
    }
}

/// Rebuilds serial blocks from received frames.
#[derive(Debug, Clone)]
pub struct Reassembler {
    expected: u8,
    block: SerialBlock,
}

impl Default for Reassembler {
    fn default() -> Self {
        Self::new()
    }
}

impl Reassembler {
    /// Expects frame 1 next.
    pub const fn new() -> Self {
        Self {
            expected: 1,
            block: [BLOCK_FILLER; SERIAL_BLOCK_LEN_USIZE],
        }
    }

    /// Frame number accepted next.
    pub fn expected_frame(&self) -> u8 {
        self.expected
    }

    /// Accepts one frame.
    ///
    /// # Returns
    /// * `Ok(Some(block))` when the frame completed a serial block
    /// * `Ok(None)` when it was the first half
    /// * `Err(FrameError::Duplicate)` for a retransmission of the previous
    ///   frame, which the sender expects to be acknowledged again
    pub fn accept(&mut self, frame: &DataFrame) -> Result<Option<SerialBlock>, FrameError> {
        check_frame(frame)?;
        if frame.number == self.expected.wrapping_sub(1) {
            return Err(FrameError::Duplicate(frame.number));
        }
        if frame.number != self.expected {
            return Err(FrameError::Sequence {
                got: frame.number,
                expected: self.expected,
            });
        }
        let start = frame_offset(frame.number);
        self.block[start..start + RADIO_PAYLOAD_LEN_USIZE].copy_from_slice(&frame.payload);
        self.expected = self.expected.wrapping_add(1);
        if frame.number & 1 == 0 {
            let block = self.block;
            self.block = [BLOCK_FILLER; SERIAL_BLOCK_LEN_USIZE];
            Ok(Some(block))
        } else {
            Ok(None)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn counting_block() -> SerialBlock {
        let mut block = [0u8; SERIAL_BLOCK_LEN_USIZE];
        for (i, b) in block.iter_mut().enumerate() {
            *b = i as u8;
        }
        block
    }

    #[test]
    fn frame_numbers_pair_up() {
        assert_eq!(frame_numbers(1), [1, 2]);
        assert_eq!(frame_numbers(2), [3, 4]);
        assert_eq!(frame_numbers(128), [255, 0]);
        assert_eq!(frame_numbers(129), [1, 2]);
    }

    #[test]
    fn odd_frames_carry_first_half() {
        let [first, second] = split_block(1, &counting_block());
        assert_eq!(first.payload[0], 0);
        assert_eq!(second.payload[0], 64);
        assert_eq!(first.complement, 0xfe);
        assert!(check_frame(&first).is_ok());
        assert!(check_frame(&second).is_ok());
    }

    #[test]
    fn complement_is_checked_before_crc() {
        let mut frame = make_frame(&counting_block(), 1);
        frame.complement = 0;
        frame.crc ^= 1;
        assert_eq!(check_frame(&frame), Err(FrameError::Complement));
    }

    #[test]
    fn corrupted_payload_fails_crc() {
        let mut frame = make_frame(&counting_block(), 1);
        frame.payload[10] ^= 0x40;
        assert_eq!(check_frame(&frame), Err(FrameError::Crc));
    }

    #[test]
    fn reassembler_rebuilds_blocks_in_order() {
        let block = counting_block();
        let mut rx = Reassembler::new();
        let [first, second] = split_block(1, &block);
        assert_eq!(rx.accept(&first), Ok(None));
        assert_eq!(rx.accept(&first), Err(FrameError::Duplicate(1)));
        assert_eq!(rx.accept(&second), Ok(Some(block)));
        assert_eq!(rx.expected_frame(), 3);
        let [_, fourth] = split_block(2, &block);
        assert_eq!(
            rx.accept(&fourth),
            Err(FrameError::Sequence {
                got: 4,
                expected: 3
            })
        );
    }

    #[test]
    fn last_block_is_padded() {
        let image = [0xabu8; 130];
        let blocks: std::vec::Vec<SerialBlock> = ImageBlocks::new(&image).collect();
        assert_eq!(blocks.len(), 2);
        assert_eq!(blocks[1][..2], [0xab, 0xab]);
        assert!(blocks[1][2..].iter().all(|b| *b == BLOCK_FILLER));
    }
}
