use aes::Aes128;
use aes::cipher::{BlockEncrypt, KeyInit, generic_array::GenericArray};
use crc::{CRC_16_XMODEM, CRC_32_ISO_HDLC, Crc};
use proptest::prelude::*;

use meshboot::auth::{Aes128Cipher, SharedKey, compute_response, verify_response};
use meshboot::codec::Message;
use meshboot::crc::{Crc32, crc16};
use meshboot::error::FrameError;
use meshboot::fragment::{ImageBlocks, Reassembler, check_frame, make_frame, split_block};

const XMODEM: Crc<u16> = Crc::<u16>::new(&CRC_16_XMODEM);
const ISO_HDLC: Crc<u32> = Crc::<u32>::new(&CRC_32_ISO_HDLC);

proptest! {
    #[test]
    fn both_ends_encrypt_the_challenge_alike(key in any::<[u8; 16]>(), challenge in any::<[u8; 16]>()) {
        let source = compute_response(&Aes128Cipher, &SharedKey::new(key), &challenge);

        let cipher = Aes128::new(GenericArray::from_slice(&key));
        let mut block = GenericArray::clone_from_slice(&challenge);
        cipher.encrypt_block(&mut block);
        prop_assert_eq!(&source[..], block.as_slice());

        prop_assert!(verify_response(&Aes128Cipher, &SharedKey::new(key), &challenge, &source));
    }

    #[test]
    fn a_different_key_never_verifies(
        key in any::<[u8; 16]>(),
        other in any::<[u8; 16]>(),
        challenge in any::<[u8; 16]>(),
    ) {
        prop_assume!(key != other);
        let response = compute_response(&Aes128Cipher, &SharedKey::new(other), &challenge);
        prop_assert!(!verify_response(&Aes128Cipher, &SharedKey::new(key), &challenge, &response));
    }

    #[test]
    fn images_survive_fragmentation(image in proptest::collection::vec(any::<u8>(), 0..2_000)) {
        let mut reassembler = Reassembler::new();
        let mut rebuilt = Vec::new();
        let mut number = 1u8;
        for block in ImageBlocks::new(&image) {
            for frame in split_block(number, &block) {
                let wire = Message::Data(frame).encode();
                let Ok(Message::Data(received)) = Message::decode(&wire) else {
                    return Err(TestCaseError::fail("data frame did not decode"));
                };
                if let Some(done) = reassembler.accept(&received).unwrap() {
                    rebuilt.extend_from_slice(&done);
                }
            }
            number = number.wrapping_add(1);
        }

        prop_assert_eq!(rebuilt.len(), image.len().div_ceil(128) * 128);
        prop_assert_eq!(&rebuilt[..image.len()], &image[..]);
        prop_assert!(rebuilt[image.len()..].iter().all(|&b| b == 0xff));
    }

    #[test]
    fn frame_crc_catches_any_single_byte_change(
        block in any::<[u8; 32]>(),
        position in 0usize..64,
        delta in 1u8..=255,
    ) {
        let mut serial = [0u8; 128];
        serial[..32].copy_from_slice(&block);
        serial[32..64].copy_from_slice(&block);
        let mut frame = make_frame(&serial, 1);
        prop_assert_eq!(check_frame(&frame), Ok(()));
        frame.payload[position] ^= delta;
        prop_assert_eq!(check_frame(&frame), Err(FrameError::Crc));
    }

    #[test]
    fn crc16_matches_xmodem(data in proptest::collection::vec(any::<u8>(), 0..256)) {
        prop_assert_eq!(crc16(&data), XMODEM.checksum(&data));
    }

    #[test]
    fn crc32_streams_in_any_split(
        data in proptest::collection::vec(any::<u8>(), 0..512),
        split in any::<prop::sample::Index>(),
    ) {
        let mut whole = Crc32::new();
        whole.update(&data);

        let at = if data.is_empty() { 0 } else { split.index(data.len()) };
        let mut parts = Crc32::new();
        parts.update(&data[..at]);
        for &b in &data[at..] {
            parts.update_byte(b);
        }

        prop_assert_eq!(parts.value(), whole.value());
        prop_assert_eq!(whole.finish(), ISO_HDLC.checksum(&data));
    }
}
