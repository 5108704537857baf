//! Block codec.
//!
//! Builds and parses the fixed-layout bootload messages. Every message starts
//! with `{protocol version, kind}`; kind-specific fields follow at fixed
//! offsets:
//!
//! | Kind | Payload after the header |
//! |------|--------------------------|
//! | [`Message::Query`] | none |
//! | [`Message::QueryResponse`] | active:1, mfg id:2 (LE), hardware tag:16, capabilities:1, platform:1, micro:1, phy:1, bootloader version:2 (BE) |
//! | [`Message::LaunchRequest`] | mfg id:2 (LE), hardware tag:16 |
//! | [`Message::AuthChallenge`] | challenge:16 |
//! | [`Message::AuthResponse`] | encrypted challenge:16 |
//! | [`Message::Data`] | frame number:1, complement:1, payload:64, CRC-16:2 (BE) |
//! | [`Message::EndOfTransmission`] | none |
//! | [`Message::Ack`] / [`Message::Nak`] | frame number:1, complement:1 |
//!
//! Encoding is pure. Decoding checks the version and kind bytes and that the
//! fixed fields are present; anything past them is ignored. Whether the
//! sender or the frame number make sense is up to the session.

#[cfg(not(feature = "std"))]
use heapless::Vec;
#[cfg(feature = "std")]
use std::vec::Vec;

use crate::addr::HardwareTag;
use crate::auth::AuthBlock;
use crate::consts::*;
use crate::discovery::QueryResponse;
use crate::error::DecodeError;

/// Buffer holding one encoded message.
#[cfg(not(feature = "std"))]
pub type FrameBuf = Vec<u8, MAX_MESSAGE_LEN_USIZE>;
/// Buffer holding one encoded message.
#[cfg(feature = "std")]
pub type FrameBuf = Vec<u8>;

/// Message kind byte.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt-0-3", derive(defmt::Format))]
pub enum MessageKind {
    /// Radio data frame.
    Data,
    /// End of transmission.
    EndOfTransmission,
    /// Positive acknowledgement.
    Ack,
    /// Negative acknowledgement.
    Nak,
    /// Discovery query.
    Query,
    /// Discovery response.
    QueryResponse,
    /// Request to launch the bootloader.
    LaunchRequest,
    /// Authentication challenge.
    AuthChallenge,
    /// Authentication response.
    AuthResponse,
}

impl MessageKind {
    /// The wire byte for this kind.
    pub const fn as_byte(self) -> u8 {
        match self {
            MessageKind::Data => KIND_DATA,
            MessageKind::EndOfTransmission => KIND_EOT,
            MessageKind::Ack => KIND_ACK,
            MessageKind::Nak => KIND_NAK,
            MessageKind::Query => KIND_QUERY,
            MessageKind::QueryResponse => KIND_QUERY_RESPONSE,
            MessageKind::LaunchRequest => KIND_LAUNCH_REQUEST,
            MessageKind::AuthChallenge => KIND_AUTH_CHALLENGE,
            MessageKind::AuthResponse => KIND_AUTH_RESPONSE,
        }
    }
}

impl TryFrom<u8> for MessageKind {
    type Error = DecodeError;

    fn try_from(byte: u8) -> Result<Self, Self::Error> {
        Ok(match byte {
            KIND_DATA => MessageKind::Data,
            KIND_EOT => MessageKind::EndOfTransmission,
            KIND_ACK => MessageKind::Ack,
            KIND_NAK => MessageKind::Nak,
            KIND_QUERY => MessageKind::Query,
            KIND_QUERY_RESPONSE => MessageKind::QueryResponse,
            KIND_LAUNCH_REQUEST => MessageKind::LaunchRequest,
            KIND_AUTH_CHALLENGE => MessageKind::AuthChallenge,
            KIND_AUTH_RESPONSE => MessageKind::AuthResponse,
            other => return Err(DecodeError::UnknownKind(other)),
        })
    }
}

/// One 64-byte fragment of a serial block as it travels over the air.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt-0-3", derive(defmt::Format))]
pub struct DataFrame {
    /// Frame number, `2n - 1` or `2n` for serial block `n`.
    pub number: u8,
    /// Should be `!number`; checked before the CRC.
    pub complement: u8,
    /// Image bytes.
    pub payload: [u8; RADIO_PAYLOAD_LEN_USIZE],
    /// CRC-16/XMODEM of `payload`.
    pub crc: u16,
}

/// Body of a launch request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt-0-3", derive(defmt::Format))]
pub struct LaunchRequest {
    /// Manufacturer id of the image on offer.
    pub mfg_id: u16,
    /// Hardware tag the image was built for.
    pub hardware_tag: HardwareTag,
}

/// A decoded bootload message.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "defmt-0-3", derive(defmt::Format))]
pub enum Message {
    /// Discovery query.
    Query,
    /// Discovery response.
    QueryResponse(QueryResponse),
    /// Request to launch the bootloader.
    LaunchRequest(LaunchRequest),
    /// Challenge issued by the target.
    AuthChallenge(AuthBlock),
    /// Encrypted challenge returned by the source.
    AuthResponse(AuthBlock),
    /// Radio data frame.
    Data(DataFrame),
    /// End of the image.
    EndOfTransmission,
    /// Acknowledges a frame number.
    Ack(u8),
    /// Rejects a frame number.
    Nak(u8),
}

impl Message {
    /// Kind of this message.
    pub fn kind(&self) -> MessageKind {
        match self {
            Message::Query => MessageKind::Query,
            Message::QueryResponse(_) => MessageKind::QueryResponse,
            Message::LaunchRequest(_) => MessageKind::LaunchRequest,
            Message::AuthChallenge(_) => MessageKind::AuthChallenge,
            Message::AuthResponse(_) => MessageKind::AuthResponse,
            Message::Data(_) => MessageKind::Data,
            Message::EndOfTransmission => MessageKind::EndOfTransmission,
            Message::Ack(_) => MessageKind::Ack,
            Message::Nak(_) => MessageKind::Nak,
        }
    }

    /// Serializes the message.
    pub fn encode(&self) -> FrameBuf {
        let mut buf = FrameBuf::new();
        let _ = buf.push(BOOTLOAD_PROTOCOL_VERSION);
        let _ = buf.push(self.kind().as_byte());
        match self {
            Message::Query | Message::EndOfTransmission => {}
            Message::QueryResponse(resp) => {
                let _ = buf.push(resp.bootloader_active as u8);
                let _ = buf.extend_from_slice(&resp.mfg_id.to_le_bytes());
                let _ = buf.extend_from_slice(&resp.hardware_tag.0);
                let _ = buf.extend_from_slice(&[
                    resp.capabilities,
                    resp.platform,
                    resp.micro,
                    resp.phy,
                ]);
                let _ = buf.extend_from_slice(&resp.bootloader_version.to_be_bytes());
            }
            Message::LaunchRequest(req) => {
                let _ = buf.extend_from_slice(&req.mfg_id.to_le_bytes());
                let _ = buf.extend_from_slice(&req.hardware_tag.0);
            }
            Message::AuthChallenge(block) | Message::AuthResponse(block) => {
                let _ = buf.extend_from_slice(block);
            }
            Message::Data(frame) => {
                let _ = buf.push(frame.number);
                let _ = buf.push(frame.complement);
                let _ = buf.extend_from_slice(&frame.payload);
                let _ = buf.extend_from_slice(&frame.crc.to_be_bytes());
            }
            Message::Ack(number) | Message::Nak(number) => {
                let _ = buf.push(*number);
                let _ = buf.push(!*number);
            }
        }
        buf
    }

    /// Parses a received message.
    ///
    /// # Arguments
    /// * `bytes` - the message exactly as delivered, bounded to its length
    ///
    /// # Returns
    /// * The decoded message, or why it cannot be trusted
    pub fn decode(bytes: &[u8]) -> Result<Self, DecodeError> {
        let header = bytes.get(..HEADER_LEN_USIZE).ok_or(DecodeError::Truncated)?;
        if header[OFFSET_VERSION] != BOOTLOAD_PROTOCOL_VERSION {
            return Err(DecodeError::Version(header[OFFSET_VERSION]));
        }
        let kind = MessageKind::try_from(header[OFFSET_KIND])?;
        let field = |start: usize, len: usize| {
            bytes
                .get(start..start + len)
                .ok_or(DecodeError::Truncated)
        };

        Ok(match kind {
            MessageKind::Query => Message::Query,
            MessageKind::EndOfTransmission => Message::EndOfTransmission,
            MessageKind::Ack => Message::Ack(field(OFFSET_BLOCK_NUMBER, 1)?[0]),
            MessageKind::Nak => Message::Nak(field(OFFSET_BLOCK_NUMBER, 1)?[0]),
            MessageKind::QueryResponse => {
                use crate::consts::query_response as qr;
                let fixed = field(0, qr::BL_VERSION)?;
                let bootloader_version = match bytes.get(qr::BL_VERSION..qr::LEN) {
                    Some(v) => u16::from_be_bytes([v[0], v[1]]),
                    None => BOOTLOADER_VERSION_UNKNOWN,
                };
                Message::QueryResponse(QueryResponse {
                    bootloader_active: fixed[qr::ACTIVE] != 0,
                    mfg_id: u16::from_le_bytes([fixed[qr::MFG_ID], fixed[qr::MFG_ID + 1]]),
                    hardware_tag: HardwareTag::from_slice(&fixed[qr::HARDWARE_TAG..])
                        .ok_or(DecodeError::Truncated)?,
                    capabilities: fixed[qr::CAPABILITIES],
                    platform: fixed[qr::PLATFORM],
                    micro: fixed[qr::MICRO],
                    phy: fixed[qr::PHY],
                    bootloader_version,
                })
            }
            MessageKind::LaunchRequest => {
                let body = field(OFFSET_PAYLOAD, 2 + HARDWARE_TAG_LEN)?;
                Message::LaunchRequest(LaunchRequest {
                    mfg_id: u16::from_le_bytes([body[0], body[1]]),
                    hardware_tag: HardwareTag::from_slice(&body[2..])
                        .ok_or(DecodeError::Truncated)?,
                })
            }
            MessageKind::AuthChallenge | MessageKind::AuthResponse => {
                let mut block = [0u8; AUTH_BLOCK_LEN];
                block.copy_from_slice(field(OFFSET_PAYLOAD, AUTH_BLOCK_LEN)?);
                if kind == MessageKind::AuthChallenge {
                    Message::AuthChallenge(block)
                } else {
                    Message::AuthResponse(block)
                }
            }
            MessageKind::Data => {
                let body = field(OFFSET_BLOCK_NUMBER, DATA_FRAME_LEN_USIZE - HEADER_LEN_USIZE)?;
                let mut payload = [0u8; RADIO_PAYLOAD_LEN_USIZE];
                payload.copy_from_slice(&body[2..2 + RADIO_PAYLOAD_LEN_USIZE]);
                let crc_at = 2 + RADIO_PAYLOAD_LEN_USIZE;
                Message::Data(DataFrame {
                    number: body[0],
                    complement: body[1],
                    payload,
                    crc: u16::from_be_bytes([body[crc_at], body[crc_at + 1]]),
                })
            }
        })
    }
}
