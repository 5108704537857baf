//! Legacy (v1) framing.
//!
//! First-generation bootloaders sit below the network layer and exchange raw
//! 802.15.4 frames. Every frame starts with a fixed MAC header (broadcast PAN
//! and destination, source short address 0), followed by a bootload segment
//! byte, a payload size and the message kind. Data frames carry no CRC.
//!
//! | Offset | Control frame | Data frame |
//! |--------|---------------|------------|
//! | 0..9 | MAC header | MAC header |
//! | 9 | segment | segment |
//! | 10 | payload size (20) | payload size (75) |
//! | 11 | kind | kind (`SOH`) |
//! | 12..20 | destination | destination |
//! | 20..28 | source | block, complement, then 64 data bytes |
//! | 28 | sequence | |
//! | 29..31 | source node id (LE) | |
//!
//! [`LegacyLink`] is the small state machine that runs these frames
//! alongside the main session, with its own deadline and retry counter.

#[cfg(not(feature = "std"))]
use heapless::Vec;
#[cfg(feature = "std")]
use std::vec::Vec;

use crate::addr::Eui64;
use crate::codec::MessageKind;
use crate::consts::{EUI64_LEN, RADIO_PAYLOAD_LEN_USIZE, legacy::*};
use crate::error::DecodeError;
use crate::timer::{ActionTimer, TimerEvent};

/// Buffer holding one encoded raw frame.
#[cfg(not(feature = "std"))]
pub type RawFrameBuf = Vec<u8, MAX_FRAME_LEN>;
/// Buffer holding one encoded raw frame.
#[cfg(feature = "std")]
pub type RawFrameBuf = Vec<u8>;

/// A decoded legacy frame.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "defmt-0-3", derive(defmt::Format))]
pub enum LegacyFrame {
    /// Query, query response, acknowledgements and end of transmission.
    Control {
        /// Message kind.
        kind: MessageKind,
        /// Addressee.
        destination: Eui64,
        /// Sender.
        source: Eui64,
        /// Frame number or query marker.
        sequence: u8,
        /// Sender's short node id.
        node_id: u16,
    },
    /// Half a serial block.
    Data {
        /// Addressee.
        destination: Eui64,
        /// Frame number.
        block: u8,
        /// Image bytes.
        payload: [u8; RADIO_PAYLOAD_LEN_USIZE],
    },
}

impl LegacyFrame {
    /// Serializes the frame behind a MAC header carrying `mac_sequence`.
    pub fn encode(&self, mac_sequence: u8) -> RawFrameBuf {
        let mut buf = RawFrameBuf::new();
        let _ = buf.extend_from_slice(&[
            FRAME_CONTROL_LO,
            FRAME_CONTROL_HI,
            mac_sequence,
            0xff,
            0xff,
            0xff,
            0xff,
            0x00,
            0x00,
            SEGMENT_BOOTLOAD,
        ]);
        match self {
            LegacyFrame::Control {
                kind,
                destination,
                source,
                sequence,
                node_id,
            } => {
                let _ = buf.push(CONTROL_PAYLOAD_LEN);
                let _ = buf.push(kind.as_byte());
                let _ = buf.extend_from_slice(destination.as_bytes());
                let _ = buf.extend_from_slice(source.as_bytes());
                let _ = buf.push(*sequence);
                let _ = buf.extend_from_slice(&node_id.to_le_bytes());
            }
            LegacyFrame::Data {
                destination,
                block,
                payload,
            } => {
                let _ = buf.push(DATA_PAYLOAD_LEN);
                let _ = buf.push(MessageKind::Data.as_byte());
                let _ = buf.extend_from_slice(destination.as_bytes());
                let _ = buf.push(*block);
                let _ = buf.push(0xff - *block);
                let _ = buf.extend_from_slice(payload);
            }
        }
        buf
    }

    /// Parses a raw MAC frame.
    ///
    /// Frames with security enabled, a non-zero source short address or a
    /// foreign segment byte are not bootload traffic.
    pub fn decode(raw: &[u8]) -> Result<Self, DecodeError> {
        let header = raw.get(..OFFSET_DEST).ok_or(DecodeError::Truncated)?;
        let frame_control = u16::from_le_bytes([header[0], header[1]]);
        let source_short = u16::from_le_bytes([header[7], header[8]]);
        if frame_control & FRAME_CONTROL_SECURITY != 0
            || source_short != 0
            || header[OFFSET_SEGMENT] != SEGMENT_BOOTLOAD
        {
            return Err(DecodeError::NotBootload);
        }
        let kind = MessageKind::try_from(header[OFFSET_KIND])?;
        let destination = Eui64::from_slice(&raw[OFFSET_DEST..]).ok_or(DecodeError::Truncated)?;

        if kind == MessageKind::Data {
            let body = raw
                .get(OFFSET_BLOCK..OFFSET_DATA + RADIO_PAYLOAD_LEN_USIZE)
                .ok_or(DecodeError::Truncated)?;
            let mut payload = [0u8; RADIO_PAYLOAD_LEN_USIZE];
            payload.copy_from_slice(&body[2..]);
            return Ok(LegacyFrame::Data {
                destination,
                block: body[0],
                payload,
            });
        }

        let body = raw
            .get(OFFSET_SOURCE..OFFSET_NODE_ID + 2)
            .ok_or(DecodeError::Truncated)?;
        Ok(LegacyFrame::Control {
            kind,
            destination,
            source: Eui64::from_slice(body).ok_or(DecodeError::Truncated)?,
            sequence: body[EUI64_LEN],
            node_id: u16::from_le_bytes([body[EUI64_LEN + 1], body[EUI64_LEN + 2]]),
        })
    }
}

/// State of the legacy link.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt-0-3", derive(defmt::Format))]
pub enum LegacyState {
    /// Not in use.
    Idle,
    /// Querying the target bootloader.
    AwaitingQueryResponse,
    /// Target found, waiting for the next serial block.
    AwaitingImage,
    /// A data frame is in flight.
    AwaitingDataAck,
    /// End of transmission is in flight.
    AwaitingEotAck,
}

/// Legacy sub-state machine: state, deadline, retry budget and MAC sequence.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt-0-3", derive(defmt::Format))]
pub struct LegacyLink {
    state: LegacyState,
    timer: ActionTimer,
    retries_remaining: u8,
    mac_sequence: u8,
}

impl LegacyLink {
    /// An idle link counting periods of `period_ms`.
    pub const fn new(period_ms: u16) -> Self {
        Self {
            state: LegacyState::Idle,
            timer: ActionTimer::new(period_ms),
            retries_remaining: 0,
            mac_sequence: 0,
        }
    }

    /// Current state.
    pub fn state(&self) -> LegacyState {
        self.state
    }

    /// Whether the link drives the running session.
    pub fn is_engaged(&self) -> bool {
        self.state != LegacyState::Idle
    }

    /// Retransmissions left in the current state.
    pub fn retries_remaining(&self) -> u8 {
        self.retries_remaining
    }

    /// Enters `state` with a fresh deadline and retry budget.
    pub fn enter(&mut self, state: LegacyState, periods: u8, retries: u8) {
        self.state = state;
        self.timer.arm(periods);
        self.retries_remaining = retries;
    }

    /// Restarts the deadline without touching the retry budget.
    pub fn restart_deadline(&mut self, periods: u8) {
        self.timer.arm(periods);
    }

    /// Spends one retry and re-arms the deadline.
    ///
    /// # Returns
    /// * `false` when the budget was already exhausted
    pub fn consume_retry(&mut self, periods: u8) -> bool {
        if self.retries_remaining == 0 {
            return false;
        }
        self.retries_remaining -= 1;
        self.timer.arm(periods);
        true
    }

    /// Back to idle.
    pub fn reset(&mut self) {
        self.state = LegacyState::Idle;
        self.timer.expire_now();
        self.retries_remaining = 0;
    }

    /// Advances the deadline.
    pub fn poll(&mut self, now_ms: u16) -> TimerEvent {
        self.timer.poll(now_ms)
    }

    /// MAC sequence number for the next outgoing frame.
    pub fn next_mac_sequence(&mut self) -> u8 {
        let seq = self.mac_sequence;
        self.mac_sequence = self.mac_sequence.wrapping_add(1);
        seq
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const DEST: Eui64 = Eui64([1, 2, 3, 4, 5, 6, 7, 8]);
    const SRC: Eui64 = Eui64([9, 10, 11, 12, 13, 14, 15, 16]);

    #[test]
    fn control_frame_layout() {
        let frame = LegacyFrame::Control {
            kind: MessageKind::Query,
            destination: DEST,
            source: SRC,
            sequence: SEQUENCE_SESSION_QUERY,
            node_id: 0x1234,
        };
        let raw = frame.encode(7);
        assert_eq!(raw.len(), CONTROL_FRAME_LEN);
        assert_eq!(&raw[..9], &[0x41, 0x88, 7, 0xff, 0xff, 0xff, 0xff, 0, 0]);
        assert_eq!(&raw[9..12], &[SEGMENT_BOOTLOAD, 20, b'Q']);
        assert_eq!(&raw[28..], &[0xff, 0x34, 0x12]);
        assert_eq!(LegacyFrame::decode(&raw).unwrap(), frame);
    }

    #[test]
    fn data_frame_has_no_crc() {
        let frame = LegacyFrame::Data {
            destination: DEST,
            block: 5,
            payload: [0x42; RADIO_PAYLOAD_LEN_USIZE],
        };
        let raw = frame.encode(0);
        assert_eq!(raw.len(), DATA_FRAME_LEN);
        assert_eq!(&raw[20..22], &[5, 0xfa]);
        assert_eq!(raw[DATA_FRAME_LEN - 1], 0x42);
        assert_eq!(LegacyFrame::decode(&raw).unwrap(), frame);
    }

    #[test]
    fn secured_or_addressed_frames_are_not_bootload() {
        let frame = LegacyFrame::Control {
            kind: MessageKind::Ack,
            destination: DEST,
            source: SRC,
            sequence: 1,
            node_id: 0,
        };
        let mut raw = frame.encode(0);
        raw[0] |= 0x08;
        assert_eq!(LegacyFrame::decode(&raw), Err(DecodeError::NotBootload));

        let mut raw = frame.encode(0);
        raw[7] = 0x01;
        assert_eq!(LegacyFrame::decode(&raw), Err(DecodeError::NotBootload));

        let mut raw = frame.encode(0);
        raw[OFFSET_SEGMENT] = 0x00;
        assert_eq!(LegacyFrame::decode(&raw), Err(DecodeError::NotBootload));
    }

    #[test]
    fn link_retries_are_bounded() {
        let mut link = LegacyLink::new(200);
        link.enter(LegacyState::AwaitingDataAck, 3, 2);
        assert!(link.is_engaged());
        assert!(link.consume_retry(3));
        assert!(link.consume_retry(3));
        assert!(!link.consume_retry(3));
        link.reset();
        assert_eq!(link.state(), LegacyState::Idle);
    }

    #[test]
    fn mac_sequence_wraps() {
        let mut link = LegacyLink::new(200);
        for _ in 0..255 {
            let _ = link.next_mac_sequence();
        }
        assert_eq!(link.next_mac_sequence(), 255);
        assert_eq!(link.next_mac_sequence(), 0);
    }
}
