//! Device identifiers.

use core::fmt;

use crate::consts::{BROADCAST_EUI64, EUI64_LEN, HARDWARE_TAG_LEN};

/// 64-bit device identifier, stored in wire order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct Eui64(pub [u8; EUI64_LEN]);

impl Eui64 {
    /// The broadcast identifier.
    pub const BROADCAST: Self = Self(BROADCAST_EUI64);

    /// Reads an identifier from the first eight bytes of `bytes`.
    ///
    /// # Returns
    /// * `None` when fewer than eight bytes are available
    pub fn from_slice(bytes: &[u8]) -> Option<Self> {
        let raw: [u8; EUI64_LEN] = bytes.get(..EUI64_LEN)?.try_into().ok()?;
        Some(Self(raw))
    }

    /// Whether this is the broadcast identifier.
    pub fn is_broadcast(&self) -> bool {
        *self == Self::BROADCAST
    }

    /// The identifier bytes.
    pub fn as_bytes(&self) -> &[u8; EUI64_LEN] {
        &self.0
    }
}

impl fmt::Display for Eui64 {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for b in self.0.iter().rev() {
            write!(f, "{:02X}", b)?;
        }
        Ok(())
    }
}

#[cfg(feature = "defmt-0-3")]
impl defmt::Format for Eui64 {
    fn format(&self, f: defmt::Formatter) {
        let b = &self.0;
        defmt::write!(
            f,
            "{=u8:02X}{=u8:02X}{=u8:02X}{=u8:02X}{=u8:02X}{=u8:02X}{=u8:02X}{=u8:02X}",
            b[7],
            b[6],
            b[5],
            b[4],
            b[3],
            b[2],
            b[1],
            b[0]
        );
    }
}

/// Opaque 16-byte hardware tag identifying a board revision.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[cfg_attr(feature = "defmt-0-3", derive(defmt::Format))]
pub struct HardwareTag(pub [u8; HARDWARE_TAG_LEN]);

impl HardwareTag {
    /// Reads a tag from the first sixteen bytes of `bytes`.
    pub fn from_slice(bytes: &[u8]) -> Option<Self> {
        let raw: [u8; HARDWARE_TAG_LEN] = bytes.get(..HARDWARE_TAG_LEN)?.try_into().ok()?;
        Some(Self(raw))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn displays_most_significant_byte_first() {
        let eui = Eui64([0x01, 0x02, 0x03, 0x04, 0x05, 0x06, 0x07, 0x08]);
        assert_eq!(std::format!("{}", eui), "0807060504030201");
    }

    #[test]
    fn short_slices_are_rejected() {
        assert!(Eui64::from_slice(&[1, 2, 3]).is_none());
        assert!(HardwareTag::from_slice(&[0; 15]).is_none());
        assert!(Eui64::BROADCAST.is_broadcast());
    }
}
