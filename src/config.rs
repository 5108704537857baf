//! Session configuration.
//!
//! [`BootloadConfig::default`] reproduces the protocol's stock timing: 200 ms
//! periods, ten retransmissions per state and the per-state timeouts from
//! [`consts`](crate::consts). Only [`DeviceInfo`] normally needs filling in.

use crate::consts::{
    PACKET_RETRIES, PERIOD_MS, TIMEOUT_AUTH_CHALLENGE, TIMEOUT_AUTH_RESPONSE, TIMEOUT_IMAGE_SEND,
    TIMEOUT_QUERY, TIMEOUT_START,
};
use crate::discovery::DeviceInfo;

/// Per-state timeouts, in periods.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt-0-3", derive(defmt::Format))]
pub struct Timeouts {
    /// Waiting for a frame or end-of-transmission acknowledgement.
    pub image_send: u8,
    /// Waiting for the target's challenge.
    pub auth_challenge: u8,
    /// Waiting for the source's response.
    pub auth_response: u8,
    /// Between the handshake and the first bootloader query, and between
    /// bootloader queries.
    pub start: u8,
    /// Collecting discovery responses.
    pub query: u8,
}

impl Default for Timeouts {
    fn default() -> Self {
        Self {
            image_send: TIMEOUT_IMAGE_SEND,
            auth_challenge: TIMEOUT_AUTH_CHALLENGE,
            auth_response: TIMEOUT_AUTH_RESPONSE,
            start: TIMEOUT_START,
            query: TIMEOUT_QUERY,
        }
    }
}

/// Everything a [`Session`](crate::session::Session) needs to know up front.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt-0-3", derive(defmt::Format))]
pub struct BootloadConfig {
    /// Identity of the local node.
    pub device: DeviceInfo,
    /// Per-state timeouts.
    pub timeouts: Timeouts,
    /// Retransmissions per state.
    pub packet_retries: u8,
    /// Length of one timeout period, in milliseconds.
    pub period_ms: u16,
    /// Detect and drive first-generation bootloaders.
    pub legacy_support: bool,
    /// Microseconds the blocking send helper sleeps between polls.
    pub poll_interval_us: u32,
    /// Short network id carried by legacy control frames.
    pub node_id: u16,
}

impl Default for BootloadConfig {
    fn default() -> Self {
        Self {
            device: DeviceInfo::default(),
            timeouts: Timeouts::default(),
            packet_retries: PACKET_RETRIES,
            period_ms: PERIOD_MS,
            legacy_support: true,
            poll_interval_us: 1_000,
            node_id: 0,
        }
    }
}

impl BootloadConfig {
    /// Stock timing for the given node.
    pub fn for_device(device: DeviceInfo) -> Self {
        Self {
            device,
            ..Self::default()
        }
    }
}
