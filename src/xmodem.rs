//! XModem-CRC pass-through.
//!
//! An external uploader pushes the image over a serial line with XModem-CRC.
//! [`SerialRelay`] receives it one packet at a time and hands each 128-byte
//! block to the [`Session`], acknowledging the uploader only once both radio
//! frames of the block were acknowledged by the target. The uploader's
//! block numbers are the session's, so a repeat of the previous number is a
//! duplicate whose ACK was lost.
//!
//! Packet layout: `SOH`, block number, its complement, 128 data bytes and a
//! CRC-16/XMODEM of the data, high byte first.

use crate::auth::BlockCipher;
use crate::consts::{
    KIND_ACK, KIND_CANCEL, KIND_CTRL_C, KIND_DATA, KIND_EOT, KIND_NAK, KIND_READY,
    SERIAL_BLOCK_LEN_USIZE, SERIAL_BYTE_TIMEOUT_MS, SERIAL_CANCEL_REPEAT,
    SERIAL_READY_INTERVAL_MS, SERIAL_STALL_TIMEOUT_MS,
};
use crate::crc::crc16;
use crate::error::BootloadError;
use crate::fragment::SerialBlock;
use crate::platform::{Host, Radio, SerialPort};
use crate::session::{AbortReason, Session, SessionState};

const PACKET_LEN: usize = 3 + SERIAL_BLOCK_LEN_USIZE + 2;

/// What a completed packet turned out to be.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "defmt-0-3", derive(defmt::Format))]
pub enum XmodemEvent {
    /// A well-formed data packet.
    Block {
        /// Block number.
        number: u8,
        /// Block contents.
        data: SerialBlock,
    },
    /// A data packet with a bad complement or CRC.
    Corrupt,
    /// End of transmission.
    EndOfTransmission,
    /// The uploader gave up.
    Cancel,
}

/// Byte-at-a-time XModem-CRC packet parser.
#[derive(Debug, Clone)]
pub struct XmodemParser {
    buf: [u8; PACKET_LEN],
    index: usize,
}

impl Default for XmodemParser {
    fn default() -> Self {
        Self::new()
    }
}

impl XmodemParser {
    /// A parser waiting for the start of a packet.
    pub const fn new() -> Self {
        Self {
            buf: [0; PACKET_LEN],
            index: 0,
        }
    }

    /// Whether a data packet is partially received.
    pub fn in_packet(&self) -> bool {
        self.index > 0
    }

    /// Drops a partial packet.
    pub fn reset(&mut self) {
        self.index = 0;
    }

    /// Feeds one received byte.
    ///
    /// # Returns
    /// * `Some` when the byte completes a packet or is a control byte
    pub fn push(&mut self, byte: u8) -> Option<XmodemEvent> {
        if self.index == 0 {
            return match byte {
                KIND_DATA => {
                    self.buf[0] = byte;
                    self.index = 1;
                    None
                }
                KIND_EOT => Some(XmodemEvent::EndOfTransmission),
                KIND_CANCEL | KIND_CTRL_C => Some(XmodemEvent::Cancel),
                _ => None,
            };
        }

        self.buf[self.index] = byte;
        self.index += 1;
        if self.index < PACKET_LEN {
            return None;
        }
        self.index = 0;

        let number = self.buf[1];
        let data = &self.buf[3..3 + SERIAL_BLOCK_LEN_USIZE];
        let crc = u16::from_be_bytes([self.buf[PACKET_LEN - 2], self.buf[PACKET_LEN - 1]]);
        if self.buf[2] != !number || crc16(data) != crc {
            return Some(XmodemEvent::Corrupt);
        }
        let mut block = [0u8; SERIAL_BLOCK_LEN_USIZE];
        block.copy_from_slice(data);
        Some(XmodemEvent::Block {
            number,
            data: block,
        })
    }
}

/// Where the relay stands.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt-0-3", derive(defmt::Format))]
pub enum RelayStatus {
    /// Waiting for the target's bootloader or for the uploader's first block.
    Waiting,
    /// Blocks are flowing.
    Transferring,
    /// The image went through and the uploader was acknowledged.
    Finished,
    /// The transfer was abandoned and the uploader told so.
    Cancelled,
}

/// Relays an XModem upload into a pass-through session.
#[derive(Debug)]
pub struct SerialRelay<S> {
    port: S,
    parser: XmodemParser,
    status: RelayStatus,
    forwarding: bool,
    finishing: bool,
    last_ready_ms: Option<u16>,
    last_byte_ms: u16,
    last_progress_ms: u16,
}

impl<S: SerialPort> SerialRelay<S> {
    /// A relay reading from `port`.
    pub fn new(port: S) -> Self {
        Self {
            port,
            parser: XmodemParser::new(),
            status: RelayStatus::Waiting,
            forwarding: false,
            finishing: false,
            last_ready_ms: None,
            last_byte_ms: 0,
            last_progress_ms: 0,
        }
    }

    /// Current status.
    pub fn status(&self) -> RelayStatus {
        self.status
    }

    /// The underlying port.
    pub fn port_mut(&mut self) -> &mut S {
        &mut self.port
    }

    /// Gives the port back.
    pub fn into_inner(self) -> S {
        self.port
    }

    /// Runs one pass of the relay. Call alongside [`Session::tick`].
    ///
    /// # Returns
    /// * [`BootloadError::Serial`] if the port failed; the session is
    ///   aborted first
    pub fn poll<R, H, C>(
        &mut self,
        session: &mut Session<R, H, C>,
    ) -> Result<RelayStatus, BootloadError>
    where
        R: Radio,
        H: Host,
        C: BlockCipher,
    {
        if matches!(self.status, RelayStatus::Finished | RelayStatus::Cancelled) {
            return Ok(self.status);
        }
        let now = session.host.millis();
        if self.last_ready_ms.is_none() {
            self.last_progress_ms = now;
        }

        if self.forwarding {
            match session.state() {
                SessionState::AwaitingFrameAck => {}
                SessionState::SendingImage => {
                    self.forwarding = false;
                    self.last_progress_ms = now;
                    self.write(session, KIND_ACK)?;
                }
                _ => return self.cancel(session, AbortReason::Transport),
            }
        }
        if self.finishing {
            return match session.state() {
                SessionState::AwaitingCompletionAck => Ok(self.status),
                SessionState::Done => {
                    self.write(session, KIND_ACK)?;
                    info!("upload relayed");
                    self.status = RelayStatus::Finished;
                    Ok(self.status)
                }
                _ => self.cancel(session, AbortReason::Transport),
            };
        }
        if !self.forwarding {
            loop {
                let byte = match self.port.read() {
                    Ok(byte) => byte,
                    Err(nb::Error::WouldBlock) => break,
                    Err(nb::Error::Other(_)) => {
                        error!("serial read failed");
                        session.cancel(AbortReason::Cancelled);
                        self.status = RelayStatus::Cancelled;
                        return Err(BootloadError::Serial);
                    }
                };
                self.last_byte_ms = now;
                if let Some(event) = self.parser.push(byte) {
                    self.on_event(session, event, now)?;
                    break;
                }
            }
        }
        if matches!(self.status, RelayStatus::Finished | RelayStatus::Cancelled) {
            return Ok(self.status);
        }

        if self.parser.in_packet() && now.wrapping_sub(self.last_byte_ms) > SERIAL_BYTE_TIMEOUT_MS {
            self.parser.reset();
            self.write(session, KIND_NAK)?;
        }

        if self.status == RelayStatus::Waiting && session.is_ready_for_block() {
            let due = self
                .last_ready_ms
                .is_none_or(|last| now.wrapping_sub(last) >= SERIAL_READY_INTERVAL_MS);
            if due {
                self.last_ready_ms = Some(now);
                self.write(session, KIND_READY)?;
            }
        }

        if self.last_ready_ms.is_some()
            && !self.forwarding
            && now.wrapping_sub(self.last_progress_ms) > SERIAL_STALL_TIMEOUT_MS
        {
            warn!("upload stalled");
            return self.cancel(session, AbortReason::Cancelled);
        }
        Ok(self.status)
    }

    fn on_event<R, H, C>(
        &mut self,
        session: &mut Session<R, H, C>,
        event: XmodemEvent,
        now: u16,
    ) -> Result<(), BootloadError>
    where
        R: Radio,
        H: Host,
        C: BlockCipher,
    {
        match event {
            XmodemEvent::Block { number, data } => {
                let expected = session.expected_block();
                if number == expected.wrapping_sub(1) {
                    trace!("duplicate block {}", number);
                    return self.write(session, KIND_ACK);
                }
                if number != expected {
                    warn!("block {} out of sequence, expected {}", number, expected);
                    return self.cancel(session, AbortReason::Cancelled).map(|_| ());
                }
                match session.queue_block(&data) {
                    Ok(()) => {
                        self.status = RelayStatus::Transferring;
                        self.forwarding = true;
                        self.last_progress_ms = now;
                        Ok(())
                    }
                    Err(nb::Error::WouldBlock) => self.write(session, KIND_NAK),
                    Err(nb::Error::Other(_)) => {
                        self.cancel(session, AbortReason::Transport).map(|_| ())
                    }
                }
            }
            XmodemEvent::Corrupt => {
                debug!("corrupt block");
                self.write(session, KIND_NAK)
            }
            XmodemEvent::EndOfTransmission => match session.queue_end_of_transmission() {
                Ok(()) => {
                    self.finishing = true;
                    Ok(())
                }
                Err(_) => self.cancel(session, AbortReason::Transport).map(|_| ()),
            },
            XmodemEvent::Cancel => {
                info!("uploader cancelled");
                session.cancel(AbortReason::Cancelled);
                self.status = RelayStatus::Cancelled;
                Ok(())
            }
        }
    }

    fn cancel<R, H, C>(
        &mut self,
        session: &mut Session<R, H, C>,
        reason: AbortReason,
    ) -> Result<RelayStatus, BootloadError>
    where
        R: Radio,
        H: Host,
        C: BlockCipher,
    {
        session.cancel(reason);
        self.status = RelayStatus::Cancelled;
        self.forwarding = false;
        self.finishing = false;
        for _ in 0..SERIAL_CANCEL_REPEAT {
            self.write(session, KIND_CANCEL)?;
        }
        Ok(self.status)
    }

    fn write<R, H, C>(
        &mut self,
        session: &mut Session<R, H, C>,
        byte: u8,
    ) -> Result<(), BootloadError>
    where
        R: Radio,
        H: Host,
        C: BlockCipher,
    {
        nb::block!(self.port.write(byte)).map_err(|_| {
            error!("serial write failed");
            session.cancel(AbortReason::Cancelled);
            self.status = RelayStatus::Cancelled;
            BootloadError::Serial
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn packet(number: u8, fill: u8) -> [u8; PACKET_LEN] {
        let mut raw = [0u8; PACKET_LEN];
        raw[0] = KIND_DATA;
        raw[1] = number;
        raw[2] = !number;
        raw[3..3 + SERIAL_BLOCK_LEN_USIZE].fill(fill);
        let crc = crc16(&raw[3..3 + SERIAL_BLOCK_LEN_USIZE]);
        raw[PACKET_LEN - 2..].copy_from_slice(&crc.to_be_bytes());
        raw
    }

    fn feed(parser: &mut XmodemParser, bytes: &[u8]) -> Option<XmodemEvent> {
        let mut last = None;
        for &b in bytes {
            if let Some(event) = parser.push(b) {
                assert!(last.is_none(), "more than one event");
                last = Some(event);
            }
        }
        last
    }

    #[test]
    fn parses_a_clean_packet() {
        let mut parser = XmodemParser::new();
        match feed(&mut parser, &packet(3, 0x5a)) {
            Some(XmodemEvent::Block { number, data }) => {
                assert_eq!(number, 3);
                assert!(data.iter().all(|&b| b == 0x5a));
            }
            other => panic!("unexpected {:?}", other),
        }
        assert!(!parser.in_packet());
    }

    #[test]
    fn flags_bad_crc_and_complement() {
        let mut parser = XmodemParser::new();
        let mut raw = packet(1, 0);
        raw[10] ^= 0x01;
        assert_eq!(feed(&mut parser, &raw), Some(XmodemEvent::Corrupt));

        let mut raw = packet(1, 0);
        raw[2] = 0x00;
        assert_eq!(feed(&mut parser, &raw), Some(XmodemEvent::Corrupt));
    }

    #[test]
    fn control_bytes_and_noise() {
        let mut parser = XmodemParser::new();
        assert_eq!(parser.push(b'x'), None);
        assert_eq!(parser.push(KIND_EOT), Some(XmodemEvent::EndOfTransmission));
        assert_eq!(parser.push(KIND_CANCEL), Some(XmodemEvent::Cancel));
        assert_eq!(parser.push(KIND_CTRL_C), Some(XmodemEvent::Cancel));
    }

    #[test]
    fn control_bytes_inside_a_packet_are_data() {
        let mut parser = XmodemParser::new();
        let raw = packet(2, KIND_EOT);
        assert!(matches!(
            feed(&mut parser, &raw),
            Some(XmodemEvent::Block { number: 2, .. })
        ));
    }

    #[test]
    fn reset_drops_partial_packet() {
        let mut parser = XmodemParser::new();
        let raw = packet(1, 0);
        assert_eq!(feed(&mut parser, &raw[..40]), None);
        assert!(parser.in_packet());
        parser.reset();
        assert_eq!(parser.push(KIND_EOT), Some(XmodemEvent::EndOfTransmission));
    }
}
