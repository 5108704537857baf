//! Constants used across the bootload protocol implementation.
//!
//! This module defines the wire-level constants shared by the codec, the
//! fragmentation engine and the session state machine: message kind bytes,
//! header offsets, frame and block sizes, timeouts and retry budgets.
//!
//! ## Key Concepts
//!
//! - **Header**: every bootload message starts with a protocol version byte
//!   followed by a message kind byte.
//! - **Serial block**: the 128-byte unit an uploader hands to the source node.
//! - **Radio frame**: half of a serial block (64 bytes) plus a 6-byte envelope.
//! - **Periods**: all timeouts are counted in periods of [`PERIOD_MS`]
//!   milliseconds, advanced by the session tick.
//! - **Legacy framing**: raw MAC frames understood by first-generation
//!   bootloaders, with their own offsets and sizes.
//!
//! Sizes come in two flavors where both are useful: a `u8` value that matches
//! the wire field, and a `_USIZE` twin for buffer sizing.

/// Version byte carried at offset 0 of every bootload message.
pub const BOOTLOAD_PROTOCOL_VERSION: u8 = 0x01;

/// Start of a data frame (XModem `SOH`).
pub const KIND_DATA: u8 = 0x01;
/// End of transmission (XModem `EOT`).
pub const KIND_EOT: u8 = 0x04;
/// Positive acknowledgement.
pub const KIND_ACK: u8 = 0x06;
/// Negative acknowledgement.
pub const KIND_NAK: u8 = 0x15;
/// Uploader cancellation byte on the serial side.
pub const KIND_CANCEL: u8 = 0x18;
/// Alternate cancellation byte (`Ctrl-C`) on the serial side.
pub const KIND_CTRL_C: u8 = 0x03;
/// Receiver-ready byte (`'C'`) requesting CRC mode on the serial side.
pub const KIND_READY: u8 = b'C';
/// Discovery query.
pub const KIND_QUERY: u8 = b'Q';
/// Discovery query response.
pub const KIND_QUERY_RESPONSE: u8 = b'R';
/// Launch request asking a node to enter its bootloader.
pub const KIND_LAUNCH_REQUEST: u8 = b'L';
/// Authentication challenge issued by the target.
pub const KIND_AUTH_CHALLENGE: u8 = b'c';
/// Authentication response returned by the source.
pub const KIND_AUTH_RESPONSE: u8 = b'r';

/// Offset of the protocol version byte.
pub const OFFSET_VERSION: usize = 0;
/// Offset of the message kind byte.
pub const OFFSET_KIND: usize = 1;
/// Offset of the frame number in data frames and acknowledgements.
pub const OFFSET_BLOCK_NUMBER: usize = 2;
/// Offset of the frame number complement.
pub const OFFSET_BLOCK_CHECK: usize = 3;
/// Offset of the image bytes in a data frame.
pub const OFFSET_IMAGE_CONTENT: usize = 4;
/// Offset of the payload of query responses, launch requests and the auth pair.
pub const OFFSET_PAYLOAD: usize = 2;

/// Length of the `{version, kind}` header.
pub const HEADER_LEN: u8 = 2;
/// Length of the `{version, kind}` header.
pub const HEADER_LEN_USIZE: usize = HEADER_LEN as usize;

/// Bytes of image carried by a single radio frame.
pub const RADIO_PAYLOAD_LEN: u8 = 64;
/// Bytes of image carried by a single radio frame.
pub const RADIO_PAYLOAD_LEN_USIZE: usize = RADIO_PAYLOAD_LEN as usize;

/// Bytes in one serial block.
pub const SERIAL_BLOCK_LEN: u8 = 128;
/// Bytes in one serial block.
pub const SERIAL_BLOCK_LEN_USIZE: usize = SERIAL_BLOCK_LEN as usize;

/// Total length of an encoded data frame: header, number, complement,
/// payload and the trailing CRC-16.
pub const DATA_FRAME_LEN: u8 = HEADER_LEN + 2 + RADIO_PAYLOAD_LEN + 2;
/// Total length of an encoded data frame.
pub const DATA_FRAME_LEN_USIZE: usize = DATA_FRAME_LEN as usize;

/// Largest message the codec ever produces.
pub const MAX_MESSAGE_LEN: u8 = DATA_FRAME_LEN;
/// Largest message the codec ever produces.
pub const MAX_MESSAGE_LEN_USIZE: usize = MAX_MESSAGE_LEN as usize;

/// Bytes in an authentication challenge or response.
pub const AUTH_BLOCK_LEN: usize = 16;
/// Bytes in a hardware tag.
pub const HARDWARE_TAG_LEN: usize = 16;
/// Bytes in a device identifier.
pub const EUI64_LEN: usize = 8;

/// Offsets inside the query response payload, counted from the message start.
pub mod query_response {
    /// Bootloader-active flag.
    pub const ACTIVE: usize = 2;
    /// Manufacturer id, low byte first.
    pub const MFG_ID: usize = 3;
    /// Hardware tag.
    pub const HARDWARE_TAG: usize = 5;
    /// Capability bits.
    pub const CAPABILITIES: usize = 21;
    /// Platform id.
    pub const PLATFORM: usize = 22;
    /// Micro id.
    pub const MICRO: usize = 23;
    /// Radio phy id.
    pub const PHY: usize = 24;
    /// Bootloader version, high byte first.
    pub const BL_VERSION: usize = 25;
    /// Full length including the bootloader version.
    pub const LEN: usize = 27;
}

/// Offsets inside an authentication challenge block.
pub mod challenge {
    /// Challenge format version byte.
    pub const VERSION: usize = 0;
    /// Bootloader version, high byte first.
    pub const BL_VERSION: usize = 1;
    /// Platform id.
    pub const PLATFORM: usize = 3;
    /// Micro id.
    pub const MICRO: usize = 4;
    /// Radio phy id.
    pub const PHY: usize = 5;
    /// Issuer's device identifier.
    pub const DEVICE_ID: usize = 6;
    /// Bytes 1 and 2 of the issuer's timer snapshot, up to the end of the block.
    pub const TIMER: usize = 14;
}

/// Challenge format version written by current bootloaders.
pub const CHALLENGE_VERSION: u8 = 0x01;

/// Bootloader version value meaning "unknown".
pub const BOOTLOADER_VERSION_UNKNOWN: u16 = 0xffff;

/// Length of one timer period in milliseconds.
pub const PERIOD_MS: u16 = 200;

/// Periods to wait for a frame acknowledgement.
pub const TIMEOUT_IMAGE_SEND: u8 = 15;
/// Periods to wait for an authentication challenge.
pub const TIMEOUT_AUTH_CHALLENGE: u8 = 15;
/// Periods to wait for an authentication response.
pub const TIMEOUT_AUTH_RESPONSE: u8 = 15;
/// Periods to wait between the handshake and the bootloader query.
pub const TIMEOUT_START: u8 = 25;
/// Periods to wait for discovery responses.
pub const TIMEOUT_QUERY: u8 = 25;

/// Retransmissions allowed per state before the session gives up.
pub const PACKET_RETRIES: u8 = 10;

/// Broadcast device identifier.
pub const BROADCAST_EUI64: [u8; EUI64_LEN] = [0xff; EUI64_LEN];

/// Tag introducing a page that must be erased and programmed.
pub const TAG_ERASE_PROGRAM: u16 = 0xfd03;
/// Tag introducing data programmed without an erase.
pub const TAG_PROGRAM: u16 = 0xfe01;
/// Tag terminating a cloned image.
pub const TAG_END: u16 = 0xfc04;
/// Length field of the end tag.
pub const TAG_END_LEN: u16 = 4;

/// Initial value of the image CRC-32.
pub const CRC32_START: u32 = 0xffff_ffff;
/// Residue of the image CRC-32 over data followed by its inverted CRC.
pub const CRC32_END: u32 = 0xdebb_20e3;

/// Words read from flash per call in clone mode.
pub const FLASH_READ_WORDS: usize = 16;

/// Serial-side cancellation bytes sent when a relay aborts.
pub const SERIAL_CANCEL_REPEAT: usize = 5;
/// Milliseconds between ready bytes before the first serial block arrives.
pub const SERIAL_READY_INTERVAL_MS: u16 = 1_000;
/// Milliseconds without progress before a serial relay gives up.
pub const SERIAL_STALL_TIMEOUT_MS: u16 = 20_000;
/// Milliseconds of silence inside a serial block before it is discarded.
pub const SERIAL_BYTE_TIMEOUT_MS: u16 = 1_000;

/// Constants of the first-generation raw framing.
pub mod legacy {
    /// Length of the raw MAC header.
    pub const MAC_HEADER_LEN: usize = 9;
    /// First frame-control byte (data frame, intra-PAN).
    pub const FRAME_CONTROL_LO: u8 = 0x41;
    /// Second frame-control byte (short destination and source addresses).
    pub const FRAME_CONTROL_HI: u8 = 0x88;
    /// Security-enabled bit in the frame-control field.
    pub const FRAME_CONTROL_SECURITY: u16 = 0x0008;
    /// Segment byte marking bootload traffic.
    pub const SEGMENT_BOOTLOAD: u8 = 0x08;

    /// Offset of the segment byte.
    pub const OFFSET_SEGMENT: usize = 9;
    /// Offset of the payload size byte.
    pub const OFFSET_SIZE: usize = 10;
    /// Offset of the message kind.
    pub const OFFSET_KIND: usize = 11;
    /// Offset of the destination identifier.
    pub const OFFSET_DEST: usize = 12;
    /// Offset of the source identifier in control frames.
    pub const OFFSET_SOURCE: usize = 20;
    /// Offset of the sequence byte in control frames.
    pub const OFFSET_SEQUENCE: usize = 28;
    /// Offset of the source node id in control frames, low byte first.
    pub const OFFSET_NODE_ID: usize = 29;
    /// Offset of the block number in data frames.
    pub const OFFSET_BLOCK: usize = 20;
    /// Offset of the block complement in data frames.
    pub const OFFSET_BLOCK_CHECK: usize = 21;
    /// Offset of the image bytes in data frames.
    pub const OFFSET_DATA: usize = 22;

    /// Payload size advertised by control frames.
    pub const CONTROL_PAYLOAD_LEN: u8 = 20;
    /// Payload size advertised by data frames.
    pub const DATA_PAYLOAD_LEN: u8 = 75;
    /// Encoded length of a control frame.
    pub const CONTROL_FRAME_LEN: usize = MAC_HEADER_LEN + 2 + CONTROL_PAYLOAD_LEN as usize;
    /// Encoded length of a data frame.
    pub const DATA_FRAME_LEN: usize = MAC_HEADER_LEN + 2 + DATA_PAYLOAD_LEN as usize;
    /// Largest raw frame.
    pub const MAX_FRAME_LEN: usize = DATA_FRAME_LEN;

    /// Sequence byte of a session query.
    pub const SEQUENCE_SESSION_QUERY: u8 = 0xff;
    /// Sequence byte of a discovery query.
    pub const SEQUENCE_DISCOVERY_QUERY: u8 = 0xfe;

    /// Platform reported for legacy responders.
    pub const PLATFORM: u8 = 1;
    /// Micro reported for legacy responders.
    pub const MICRO: u8 = 2;
    /// Phy reported for legacy responders.
    pub const PHY: u8 = 1;
    /// Bootloader version reported for legacy responders.
    pub const BL_VERSION: u16 = 0x1000;
    /// Manufacturer id reported for legacy responders.
    pub const MFG_ID: u16 = 0xffff;

    /// Highest bootloader version byte still answered with legacy framing.
    pub const VERSION_CEILING: u8 = 0x20;
}
