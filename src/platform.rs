//! Collaborator interfaces.
//!
//! The protocol core owns no hardware. Everything it needs from the outside
//! world comes through these traits:
//!
//! | Trait | Provides |
//! |-------|----------|
//! | [`Radio`] | datagram send/receive, link quality, raw legacy frames |
//! | [`Host`] | clock, timer snapshot, policy callbacks, bootloader launch, watchdog |
//! | [`FlashReader`] | word reads of the local flash, clone mode only |
//! | [`SerialPort`] | byte I/O towards an external uploader, pass-through relay only |
//!
//! The cipher is a separate seam, [`BlockCipher`](crate::auth::BlockCipher).

use crate::addr::{Eui64, HardwareTag};
use crate::auth::SharedKey;
use crate::discovery::QueryResponseRecord;
use crate::session::SessionEvent;

/// How a received datagram was framed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt-0-3", derive(defmt::Format))]
pub enum Framing {
    /// A bootload message from the network layer.
    Bootload,
    /// A raw MAC frame, as used by first-generation bootloaders.
    Raw,
}

/// A datagram delivered by [`Radio::receive`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt-0-3", derive(defmt::Format))]
pub struct Incoming {
    /// Sender of a [`Framing::Bootload`] datagram. Raw frames carry their
    /// addressing inline.
    pub source: Eui64,
    /// Bytes written into the caller's buffer.
    pub len: usize,
    /// Framing of the datagram.
    pub framing: Framing,
}

/// Single-hop radio transport.
pub trait Radio {
    /// Transport error.
    type Error: core::fmt::Debug;

    /// Sends one bootload datagram.
    ///
    /// # Arguments
    /// * `destination` - peer identifier, or [`Eui64::BROADCAST`]
    /// * `payload` - encoded message
    fn send(&mut self, destination: &Eui64, payload: &[u8]) -> Result<(), Self::Error>;

    /// Sends one raw MAC frame, header included.
    fn send_raw(&mut self, frame: &[u8]) -> Result<(), Self::Error>;

    /// Polls for a received datagram.
    ///
    /// Only the blocking send helper calls this; firmware that delivers
    /// datagrams from its own receive path hands them to the session
    /// directly.
    fn receive(&mut self, buf: &mut [u8]) -> nb::Result<Incoming, Self::Error>;

    /// Link quality of the last received datagram's final hop.
    fn last_hop_link_quality(&self) -> Option<i8> {
        None
    }
}

/// Services and policy supplied by the application.
pub trait Host {
    /// Wrapping millisecond clock.
    fn millis(&self) -> u16;

    /// Free-running timer or random value used to make challenges unique.
    fn timer_snapshot(&mut self) -> u32;

    /// Decides whether a launch request may proceed to a challenge.
    fn approve_launch_request(
        &mut self,
        mfg_id: u16,
        hardware_tag: &HardwareTag,
        requester: &Eui64,
    ) -> bool;

    /// The key a target checks responses with. `None` when it cannot be
    /// read, which aborts the handshake.
    fn verification_key(&mut self) -> Option<SharedKey>;

    /// Jumps into the bootloader after a verified handshake.
    fn launch_bootloader(&mut self);

    /// Receives each accepted discovery result.
    fn on_query_response(&mut self, record: &QueryResponseRecord) {
        let _ = record;
    }

    /// Receives completion and abort signals.
    fn on_event(&mut self, event: SessionEvent) {
        let _ = event;
    }

    /// Whether `peer` is a sleepy child of this node, whose auth response
    /// must wait until it polls.
    fn is_sleepy_child(&self, peer: &Eui64) -> bool {
        let _ = peer;
        false
    }

    /// Called on every pass of the blocking send helper.
    fn reset_watchdog(&mut self) {}
}

/// Read access to the local flash, addressed in 16-bit words.
pub trait FlashReader {
    /// Read error.
    type Error: core::fmt::Debug;

    /// Fills `words` starting at `word_address`.
    fn read_words(&mut self, word_address: u32, words: &mut [u16]) -> Result<(), Self::Error>;
}

/// Byte-oriented serial port towards an external uploader.
pub trait SerialPort {
    /// Port error.
    type Error: core::fmt::Debug;

    /// Reads one byte if available.
    fn read(&mut self) -> nb::Result<u8, Self::Error>;

    /// Writes one byte if the transmitter has room.
    fn write(&mut self, byte: u8) -> nb::Result<(), Self::Error>;
}
