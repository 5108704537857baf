//! Error types.
//!
//! [`BootloadError`] is what the public session API hands back to the
//! caller. [`DecodeError`] and [`FrameError`] describe messages that were
//! received but cannot be trusted; the session drops those silently, they
//! surface only to callers that use the codec or the reassembler directly.

use thiserror::Error;

use crate::session::SessionState;

/// Failures returned by session operations.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt-0-3", derive(defmt::Format))]
pub enum BootloadError {
    /// A session is already in progress.
    #[error("a bootload session is already active")]
    SessionActive,
    /// The radio refused the datagram.
    #[error("the radio rejected the datagram")]
    Transport,
    /// The call is not valid in the current state.
    #[error("operation not valid in state {0:?}")]
    InvalidState(SessionState),
    /// The call is not valid for the requested or current mode.
    #[error("operation not valid for this bootload mode")]
    InvalidMode,
    /// The session was aborted while the caller waited on it.
    #[error("the bootload session was aborted")]
    Aborted,
    /// Reading the local flash failed.
    #[error("flash read failed at word address {0:#x}")]
    FlashRead(u32),
    /// The flash layout cannot be streamed.
    #[error("flash layout is not streamable")]
    InvalidLayout,
    /// The serial port reported an error.
    #[error("serial port error")]
    Serial,
    /// A global session has already been installed.
    #[error("a global bootload session is already installed")]
    AlreadyInstalled,
}

/// Reasons a received message could not be decoded.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt-0-3", derive(defmt::Format))]
pub enum DecodeError {
    /// The version byte is not one this crate speaks.
    #[error("unsupported protocol version {0}")]
    Version(u8),
    /// The kind byte is not a known message kind.
    #[error("unknown message kind {0:#04x}")]
    UnknownKind(u8),
    /// The message ends before its fixed fields do.
    #[error("message truncated")]
    Truncated,
    /// A raw frame that is not legacy bootload traffic.
    #[error("not a bootload frame")]
    NotBootload,
}

/// Integrity failures of received data frames.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt-0-3", derive(defmt::Format))]
pub enum FrameError {
    /// The complement byte does not match the frame number.
    #[error("frame number complement mismatch")]
    Complement,
    /// The CRC-16 does not match the payload.
    #[error("frame CRC mismatch")]
    Crc,
    /// The frame is not the one expected next.
    #[error("frame {got} received, expected {expected}")]
    Sequence {
        /// Frame number that arrived.
        got: u8,
        /// Frame number that was expected.
        expected: u8,
    },
    /// The frame repeats the previously accepted one.
    #[error("duplicate frame {0}")]
    Duplicate(u8),
}
