//! Discovery sub-protocol.
//!
//! A query is a bare header; every listening node that is not busy with a
//! session answers with a [`QueryResponse`] describing itself. Queries are
//! sent either to the broadcast identifier, to find any neighbour, or to a
//! single node, to confirm that a known target is already running its
//! bootloader.
//!
//! The wire format is the same in both cases. What differs is which
//! responses are consumed, decided by [`DiscoveryScope::accepts`].

use crate::addr::{Eui64, HardwareTag};
use crate::consts::{BOOTLOADER_VERSION_UNKNOWN, HARDWARE_TAG_LEN, legacy};

/// Body of a query response.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt-0-3", derive(defmt::Format))]
pub struct QueryResponse {
    /// The responder is running its bootloader right now.
    pub bootloader_active: bool,
    /// Manufacturer id.
    pub mfg_id: u16,
    /// Hardware tag.
    pub hardware_tag: HardwareTag,
    /// Capability bits.
    pub capabilities: u8,
    /// Platform id.
    pub platform: u8,
    /// Micro id.
    pub micro: u8,
    /// Radio phy id.
    pub phy: u8,
    /// Bootloader version, [`BOOTLOADER_VERSION_UNKNOWN`] when not reported.
    pub bootloader_version: u16,
}

impl QueryResponse {
    /// Whether the responder reported a bootloader version.
    pub fn has_known_version(&self) -> bool {
        self.bootloader_version != BOOTLOADER_VERSION_UNKNOWN
    }

    /// The record reported for first-generation bootloaders, which answer
    /// queries without any of these fields.
    pub const fn legacy() -> Self {
        Self {
            bootloader_active: true,
            mfg_id: legacy::MFG_ID,
            hardware_tag: HardwareTag([0xff; HARDWARE_TAG_LEN]),
            capabilities: 0,
            platform: legacy::PLATFORM,
            micro: legacy::MICRO,
            phy: legacy::PHY,
            bootloader_version: legacy::BL_VERSION,
        }
    }
}

/// A discovery result handed to the application.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt-0-3", derive(defmt::Format))]
pub struct QueryResponseRecord {
    /// Who answered.
    pub peer: Eui64,
    /// Last-hop link quality of the answer, when the radio reports it.
    pub link_quality: Option<i8>,
    /// What they said.
    pub response: QueryResponse,
}

/// Identity and capabilities of the local node.
///
/// Used to answer queries and to fill in authentication challenges.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt-0-3", derive(defmt::Format))]
pub struct DeviceInfo {
    /// Local device identifier.
    pub eui64: Eui64,
    /// Manufacturer id.
    pub mfg_id: u16,
    /// Hardware tag.
    pub hardware_tag: HardwareTag,
    /// Capability bits.
    pub capabilities: u8,
    /// Platform id.
    pub platform: u8,
    /// Micro id.
    pub micro: u8,
    /// Radio phy id.
    pub phy: u8,
    /// Installed bootloader version.
    pub bootloader_version: u16,
    /// Whether this image is the bootloader itself.
    pub bootloader_active: bool,
}

impl Default for DeviceInfo {
    fn default() -> Self {
        Self {
            eui64: Eui64::default(),
            mfg_id: 0,
            hardware_tag: HardwareTag::default(),
            capabilities: 0,
            platform: 0,
            micro: 0,
            phy: 0,
            bootloader_version: BOOTLOADER_VERSION_UNKNOWN,
            bootloader_active: false,
        }
    }
}

impl DeviceInfo {
    /// The query response this node sends about itself.
    pub fn query_response(&self) -> QueryResponse {
        QueryResponse {
            bootloader_active: self.bootloader_active,
            mfg_id: self.mfg_id,
            hardware_tag: self.hardware_tag,
            capabilities: self.capabilities,
            platform: self.platform,
            micro: self.micro,
            phy: self.phy,
            bootloader_version: self.bootloader_version,
        }
    }

    /// Whether an image cloned from this node can run on the responder.
    pub fn is_compatible(&self, other: &QueryResponse) -> bool {
        self.platform == other.platform && self.micro == other.micro && self.phy == other.phy
    }
}

/// Who a query was addressed to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt-0-3", derive(defmt::Format))]
pub enum DiscoveryScope {
    /// Any neighbour may answer.
    Broadcast,
    /// Only this node's answer counts.
    Unicast(Eui64),
}

impl DiscoveryScope {
    /// Scope of a query sent to `target`.
    pub fn for_target(target: Eui64) -> Self {
        if target.is_broadcast() {
            DiscoveryScope::Broadcast
        } else {
            DiscoveryScope::Unicast(target)
        }
    }

    /// Destination of the query on the air.
    pub fn destination(&self) -> Eui64 {
        match self {
            DiscoveryScope::Broadcast => Eui64::BROADCAST,
            DiscoveryScope::Unicast(eui) => *eui,
        }
    }

    /// Whether a response from `peer` belongs to this query.
    pub fn accepts(&self, peer: &Eui64) -> bool {
        match self {
            DiscoveryScope::Broadcast => true,
            DiscoveryScope::Unicast(eui) => eui == peer,
        }
    }
}
