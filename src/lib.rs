//! # meshboot
//!
//! A portable, no_std engine for the over-the-air bootload protocol spoken
//! by mesh-radio nodes: one node pushes a firmware image into a neighbour's
//! bootloader over the radio, after proving it holds a shared key.
//!
//! The crate owns no hardware. The radio, the clock, the flash and the
//! serial line come in through the traits in [`platform`]; the session is a
//! plain state machine driven by whoever owns those.
//!
//! - discovery queries and responses, unicast or broadcast
//! - an AES-128 challenge/response handshake before the target launches its
//!   bootloader
//! - 128-byte serial blocks sent as two 64-byte radio frames, each with a
//!   CRC-16 and per-frame retransmission
//! - an XModem-CRC relay for pass-through from an external uploader
//! - clone-from-flash, where a node sends its own application with a CRC-32
//! - raw-frame support for first-generation bootloaders
//!
//! ## Crate features
//! | Feature                    | Description |
//! |----------------------------|-------------|
//! | `std`                      | Disables `#![no_std]` support and replaces `heapless::Vec`s with `std::vec::Vec`s |
//! | `aes` (default)            | Provides [`auth::Aes128Cipher`] |
//! | `global-session` (default) | `critical_section` guarded global session slot and macros |
//! | `defmt-0-3`                | Uses `defmt` logging |
//! | `log`                      | Uses `log` logging |
//!
//! ## Usage
//!
//! ```rust,ignore
//! use meshboot::auth::{Aes128Cipher, SharedKey};
//! use meshboot::config::BootloadConfig;
//! use meshboot::session::{BootloadMode, Session};
//!
//! let mut session = Session::new(radio, host, Aes128Cipher, BootloadConfig::for_device(me));
//! session.request_session(target, mfg_id, tag, SharedKey::new(key), BootloadMode::PassThroughRelay)?;
//! loop {
//!     if let Ok(rx) = session.radio.receive(&mut buf) {
//!         session.handle_message(rx.source, &buf[..rx.len]);
//!     }
//!     session.tick();
//!     relay.poll(&mut session)?;
//! }
//! ```
//!
//! Or, once the target's bootloader answered, push a whole image with
//! [`session::Session::send_image_blocking`] and a `DelayNs` implementation.
//!
//! ## Integration Notes
//!
//! - Deadlines count 200 ms periods of the host's millisecond clock; call
//!   `tick()` at least that often
//! - Only one session may run per node; the global slot enforces it in
//!   interrupt-driven firmware
//! - Key material is zeroized as soon as the handshake no longer needs it

#![deny(
    bad_style,
    dead_code,
    improper_ctypes,
    non_shorthand_field_patterns,
    no_mangle_generic_items,
    overflowing_literals,
    path_statements,
    patterns_in_fns_without_body,
    unconditional_recursion,
    while_true,
    missing_debug_implementations,
    missing_docs,
    trivial_casts,
    unused_extern_crates,
    unused_import_braces
)]
#![warn(
    unused,
    trivial_numeric_casts,
    unused_qualifications,
    unused_results
)]
#![cfg_attr(not(feature = "std"), no_std)]

#[cfg(feature = "global-session")]
pub use critical_section;

#[cfg(not(feature = "std"))]
pub use heapless;

#[macro_use]
mod fmt;

pub mod addr;
pub mod auth;
pub mod clone;
pub mod codec;
pub mod config;
pub mod consts;
pub mod crc;
pub mod discovery;
pub mod error;
pub mod fragment;
pub mod legacy;
pub mod platform;
pub mod session;
pub mod timer;
pub mod xmodem;

pub use addr::{Eui64, HardwareTag};
pub use error::{BootloadError, DecodeError, FrameError};
pub use session::{BootloadMode, Session, SessionEvent, SessionState};
