//! Authentication handshake.
//!
//! Before a node agrees to jump into its bootloader it makes the requester
//! prove possession of a pre-shared 128-bit key:
//!
//! 1. The target builds a 16-byte challenge from its identity and a fresh
//!    timer snapshot, remembers it and sends it to the source.
//! 2. The source encrypts the challenge in place with the shared key and
//!    returns the ciphertext.
//! 3. The target encrypts its stored copy with its own key and compares the
//!    two blocks in constant time.
//!
//! ## Key lifecycle
//!
//! [`SharedKey`] wipes itself on drop. [`AuthMaterial`] holds at most one key
//! and one challenge for the running session; both are released as soon as
//! the response has been sent or checked.
//!
//! ## Challenge layout
//!
//! | Offset | Field |
//! |--------|-------|
//! | 0 | format version (`0x01`) |
//! | 1..3 | bootloader version, high byte first |
//! | 3 | platform |
//! | 4 | micro |
//! | 5 | phy |
//! | 6..14 | issuer identifier |
//! | 14..16 | timer bytes 1 and 2, little-endian |

use core::fmt;

use zeroize::{Zeroize, ZeroizeOnDrop};

use crate::addr::Eui64;
use crate::consts::{AUTH_BLOCK_LEN, CHALLENGE_VERSION, EUI64_LEN, challenge, legacy};
use crate::discovery::DeviceInfo;

/// A challenge or response block.
pub type AuthBlock = [u8; AUTH_BLOCK_LEN];

/// Pre-shared 128-bit key. Wiped when dropped.
pub struct SharedKey([u8; AUTH_BLOCK_LEN]);

impl SharedKey {
    /// Wraps raw key bytes.
    pub const fn new(bytes: [u8; AUTH_BLOCK_LEN]) -> Self {
        Self(bytes)
    }

    /// The key bytes.
    pub fn as_bytes(&self) -> &[u8; AUTH_BLOCK_LEN] {
        &self.0
    }
}

impl From<[u8; AUTH_BLOCK_LEN]> for SharedKey {
    fn from(bytes: [u8; AUTH_BLOCK_LEN]) -> Self {
        Self::new(bytes)
    }
}

impl Drop for SharedKey {
    fn drop(&mut self) {
        self.0.zeroize();
    }
}

impl ZeroizeOnDrop for SharedKey {}

impl fmt::Debug for SharedKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("SharedKey(..)")
    }
}

/// A 128-bit block cipher, encrypting one block in place.
pub trait BlockCipher {
    /// Encrypts `block` under `key`.
    fn encrypt_block(&self, key: &SharedKey, block: &mut AuthBlock);
}

impl<C: BlockCipher> BlockCipher for &C {
    fn encrypt_block(&self, key: &SharedKey, block: &mut AuthBlock) {
        (**self).encrypt_block(key, block)
    }
}

/// AES-128 backed by the RustCrypto `aes` crate.
#[cfg(feature = "aes")]
#[derive(Debug, Default, Clone, Copy)]
pub struct Aes128Cipher;

#[cfg(feature = "aes")]
impl BlockCipher for Aes128Cipher {
    fn encrypt_block(&self, key: &SharedKey, block: &mut AuthBlock) {
        use aes::Aes128;
        use aes::cipher::generic_array::GenericArray;
        use aes::cipher::{BlockEncrypt, KeyInit};

        let cipher = Aes128::new(GenericArray::from_slice(key.as_bytes()));
        cipher.encrypt_block(GenericArray::from_mut_slice(&mut block[..]));
    }
}

/// Builds the challenge a target sends in answer to a launch request.
///
/// # Arguments
/// * `device` - identity of the issuing node
/// * `timer` - free-running timer or random value; its second and third
///   bytes make the challenge unique
pub fn build_challenge(device: &DeviceInfo, timer: u32) -> AuthBlock {
    let mut block = [0u8; AUTH_BLOCK_LEN];
    block[challenge::VERSION] = CHALLENGE_VERSION;
    block[challenge::BL_VERSION..challenge::BL_VERSION + 2]
        .copy_from_slice(&device.bootloader_version.to_be_bytes());
    block[challenge::PLATFORM] = device.platform;
    block[challenge::MICRO] = device.micro;
    block[challenge::PHY] = device.phy;
    block[challenge::DEVICE_ID..challenge::DEVICE_ID + EUI64_LEN]
        .copy_from_slice(device.eui64.as_bytes());
    // The lowest byte moves too fast to be worth the space.
    let timer = timer.to_le_bytes();
    block[challenge::TIMER..].copy_from_slice(&timer[1..1 + AUTH_BLOCK_LEN - challenge::TIMER]);
    block
}

/// Encrypts a received challenge into the response the target expects.
pub fn compute_response<C: BlockCipher>(
    cipher: &C,
    key: &SharedKey,
    challenge: &AuthBlock,
) -> AuthBlock {
    let mut response = *challenge;
    cipher.encrypt_block(key, &mut response);
    response
}

/// Checks a response against the stored challenge.
///
/// The comparison touches every byte regardless of where the first
/// difference is.
pub fn verify_response<C: BlockCipher>(
    cipher: &C,
    key: &SharedKey,
    challenge: &AuthBlock,
    response: &AuthBlock,
) -> bool {
    let mut expected = compute_response(cipher, key, challenge);
    let equal = constant_time_eq(&expected, response);
    expected.zeroize();
    equal
}

fn constant_time_eq(a: &AuthBlock, b: &AuthBlock) -> bool {
    let diff = a.iter().zip(b.iter()).fold(0u8, |acc, (x, y)| acc | (x ^ y));
    core::hint::black_box(diff) == 0
}

/// Whether a challenge came from a first-generation bootloader that only
/// speaks the raw legacy framing.
///
/// Such challenges carry the target's own identifier and either an old
/// bootloader version or an unknown version with phy id 1.
pub fn requires_legacy_framing(block: &AuthBlock, target: &Eui64) -> bool {
    let issued_by_target =
        &block[challenge::DEVICE_ID..challenge::DEVICE_ID + EUI64_LEN] == target.as_bytes();
    let version_hi = block[challenge::BL_VERSION];
    block[challenge::VERSION] == CHALLENGE_VERSION
        && issued_by_target
        && (version_hi < legacy::VERSION_CEILING
            || (version_hi == 0xff && block[challenge::PHY] == 0x01))
}

/// Key and challenge held for the running handshake.
#[derive(Debug, Default)]
pub struct AuthMaterial {
    key: Option<SharedKey>,
    challenge: Option<AuthBlock>,
}

impl AuthMaterial {
    /// Nothing held.
    pub const fn new() -> Self {
        Self {
            key: None,
            challenge: None,
        }
    }

    /// Takes ownership of the session key, wiping any previous one.
    pub fn store_key(&mut self, key: SharedKey) {
        self.key = Some(key);
    }

    /// Remembers a challenge, wiping any previous one.
    pub fn store_challenge(&mut self, block: AuthBlock) {
        self.release_challenge();
        self.challenge = Some(block);
    }

    /// The held key.
    pub fn key(&self) -> Option<&SharedKey> {
        self.key.as_ref()
    }

    /// The held challenge.
    pub fn challenge(&self) -> Option<&AuthBlock> {
        self.challenge.as_ref()
    }

    /// Wipes and drops the key.
    pub fn release_key(&mut self) {
        self.key = None;
    }

    /// Wipes and drops the challenge.
    pub fn release_challenge(&mut self) {
        if let Some(block) = self.challenge.as_mut() {
            block.zeroize();
        }
        self.challenge = None;
    }

    /// Wipes everything.
    pub fn release_all(&mut self) {
        self.release_key();
        self.release_challenge();
    }

    /// Whether a key or challenge is still held.
    pub fn holds_any(&self) -> bool {
        self.key.is_some() || self.challenge.is_some()
    }
}

impl Drop for AuthMaterial {
    fn drop(&mut self) {
        self.release_challenge();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::addr::HardwareTag;

    fn device() -> DeviceInfo {
        DeviceInfo {
            eui64: Eui64([0x10, 0x11, 0x12, 0x13, 0x14, 0x15, 0x16, 0x17]),
            mfg_id: 0x1002,
            hardware_tag: HardwareTag::default(),
            capabilities: 0,
            platform: 2,
            micro: 3,
            phy: 4,
            bootloader_version: 0x4105,
            bootloader_active: false,
        }
    }

    #[test]
    fn aes128_known_answer() {
        let key = SharedKey::new([
            0x00, 0x01, 0x02, 0x03, 0x04, 0x05, 0x06, 0x07, 0x08, 0x09, 0x0a, 0x0b, 0x0c, 0x0d,
            0x0e, 0x0f,
        ]);
        let mut block = [
            0x00, 0x11, 0x22, 0x33, 0x44, 0x55, 0x66, 0x77, 0x88, 0x99, 0xaa, 0xbb, 0xcc, 0xdd,
            0xee, 0xff,
        ];
        Aes128Cipher.encrypt_block(&key, &mut block);
        assert_eq!(
            block,
            [
                0x69, 0xc4, 0xe0, 0xd8, 0x6a, 0x7b, 0x04, 0x30, 0xd8, 0xcd, 0xb7, 0x80, 0x70,
                0xb4, 0xc5, 0x5a
            ]
        );
    }

    #[test]
    fn challenge_layout() {
        let block = build_challenge(&device(), 0x00ab_cdef);
        assert_eq!(block[0], 0x01);
        assert_eq!(&block[1..3], &[0x41, 0x05]);
        assert_eq!(&block[3..6], &[2, 3, 4]);
        assert_eq!(&block[6..14], device().eui64.as_bytes());
        assert_eq!(&block[14..16], &[0xcd, 0xab]);
    }

    #[test]
    fn matching_key_verifies() {
        let challenge = build_challenge(&device(), 42);
        let key = SharedKey::new([0x11; 16]);
        let response = compute_response(&Aes128Cipher, &key, &challenge);
        assert_ne!(response, challenge);
        assert!(verify_response(&Aes128Cipher, &key, &challenge, &response));
    }

    #[test]
    fn wrong_key_is_rejected() {
        let challenge = build_challenge(&device(), 42);
        let response = compute_response(&Aes128Cipher, &SharedKey::new([0x22; 16]), &challenge);
        assert!(!verify_response(
            &Aes128Cipher,
            &SharedKey::new([0x11; 16]),
            &challenge,
            &response
        ));
    }

    #[test]
    fn legacy_detection() {
        let target = Eui64([1, 2, 3, 4, 5, 6, 7, 8]);
        let mut block = [0u8; 16];
        block[0] = 0x01;
        block[1] = 0x10;
        block[6..14].copy_from_slice(target.as_bytes());
        assert!(requires_legacy_framing(&block, &target));

        block[1] = 0xff;
        block[5] = 0x01;
        assert!(requires_legacy_framing(&block, &target));

        block[5] = 0x02;
        assert!(!requires_legacy_framing(&block, &target));

        block[1] = 0x10;
        assert!(!requires_legacy_framing(&block, &Eui64([9; 8])));
    }

    #[test]
    fn current_bootloader_is_not_legacy() {
        let mut info = device();
        info.bootloader_version = 0x4105;
        let block = build_challenge(&info, 7);
        assert!(!requires_legacy_framing(&block, &info.eui64));
    }

    #[test]
    fn material_release() {
        let mut material = AuthMaterial::new();
        material.store_key(SharedKey::new([1; 16]));
        material.store_challenge([2; 16]);
        assert!(material.holds_any());
        material.release_key();
        assert!(material.key().is_none());
        assert!(material.holds_any());
        material.release_all();
        assert!(!material.holds_any());
    }

    #[test]
    fn key_debug_is_redacted() {
        let key = SharedKey::new([0x5a; 16]);
        assert_eq!(std::format!("{:?}", key), "SharedKey(..)");
    }
}
