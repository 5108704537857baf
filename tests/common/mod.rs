#![allow(dead_code)]

use std::cell::Cell;
use std::collections::VecDeque;

use meshboot::auth::{Aes128Cipher, SharedKey};
use meshboot::codec::Message;
use meshboot::config::BootloadConfig;
use meshboot::discovery::{DeviceInfo, QueryResponse, QueryResponseRecord};
use meshboot::error::FrameError;
use meshboot::fragment::Reassembler;
use meshboot::platform::{FlashReader, Framing, Host, Incoming, Radio, SerialPort};
use meshboot::{Eui64, HardwareTag, Session, SessionEvent};

pub const SOURCE: Eui64 = Eui64([0x00, 0x0d, 0x6f, 0x00, 0x00, 0x00, 0x00, 0x01]);
pub const TARGET: Eui64 = Eui64([0x00, 0x0d, 0x6f, 0x00, 0x00, 0x00, 0x00, 0x02]);
pub const KEY: [u8; 16] = [
    0x2b, 0x7e, 0x15, 0x16, 0x28, 0xae, 0xd2, 0xa6, 0xab, 0xf7, 0x15, 0x88, 0x09, 0xcf, 0x4f, 0x3c,
];
pub const TAG: HardwareTag = HardwareTag(*b"meshboot-test-hw");

#[derive(Debug)]
pub struct RadioDown;

/// Records everything sent; hands back queued datagrams.
#[derive(Debug, Default)]
pub struct FakeRadio {
    pub sent: Vec<(Eui64, Vec<u8>)>,
    pub raw_sent: Vec<Vec<u8>>,
    pub inbox: VecDeque<(Eui64, Framing, Vec<u8>)>,
    pub fail_sends: bool,
    pub link_quality: Option<i8>,
    pub bootloader: Option<FakeBootloader>,
}

impl FakeRadio {
    /// Decoded bootload messages sent so far, oldest first.
    pub fn messages(&self) -> Vec<(Eui64, Message)> {
        self.sent
            .iter()
            .map(|(dest, bytes)| (*dest, Message::decode(bytes).unwrap()))
            .collect()
    }

    pub fn last_message(&self) -> Option<(Eui64, Message)> {
        self.messages().pop()
    }

    pub fn take_sent(&mut self) -> Vec<(Eui64, Vec<u8>)> {
        std::mem::take(&mut self.sent)
    }
}

impl Radio for FakeRadio {
    type Error = RadioDown;

    fn send(&mut self, destination: &Eui64, payload: &[u8]) -> Result<(), RadioDown> {
        if self.fail_sends {
            return Err(RadioDown);
        }
        self.sent.push((*destination, payload.to_vec()));
        if let Some(bootloader) = self.bootloader.as_mut() {
            if *destination == bootloader.eui || destination.is_broadcast() {
                if let Some(reply) = bootloader.respond(payload) {
                    self.inbox.push_back((bootloader.eui, Framing::Bootload, reply));
                }
            }
        }
        Ok(())
    }

    fn send_raw(&mut self, frame: &[u8]) -> Result<(), RadioDown> {
        if self.fail_sends {
            return Err(RadioDown);
        }
        self.raw_sent.push(frame.to_vec());
        Ok(())
    }

    fn receive(&mut self, buf: &mut [u8]) -> nb::Result<Incoming, RadioDown> {
        let (source, framing, bytes) = self.inbox.pop_front().ok_or(nb::Error::WouldBlock)?;
        buf[..bytes.len()].copy_from_slice(&bytes);
        Ok(Incoming {
            source,
            len: bytes.len(),
            framing,
        })
    }

    fn last_hop_link_quality(&self) -> Option<i8> {
        self.link_quality
    }
}

/// A bootloader that reassembles frames and acknowledges them.
#[derive(Debug)]
pub struct FakeBootloader {
    pub eui: Eui64,
    pub response: QueryResponse,
    pub reassembler: Reassembler,
    pub image: Vec<u8>,
    pub got_eot: bool,
    /// Acknowledgements to swallow before answering again.
    pub drop_acks: usize,
    pub frames_seen: Vec<u8>,
}

impl FakeBootloader {
    pub fn new(eui: Eui64) -> Self {
        let mut response = device(eui).query_response();
        response.bootloader_active = true;
        Self {
            eui,
            response,
            reassembler: Reassembler::new(),
            image: Vec::new(),
            got_eot: false,
            drop_acks: 0,
            frames_seen: Vec::new(),
        }
    }

    fn ack(&mut self, number: u8) -> Option<Vec<u8>> {
        if self.drop_acks > 0 {
            self.drop_acks -= 1;
            return None;
        }
        Some(Message::Ack(number).encode())
    }

    pub fn respond(&mut self, payload: &[u8]) -> Option<Vec<u8>> {
        match Message::decode(payload).ok()? {
            Message::Query => Some(Message::QueryResponse(self.response).encode()),
            Message::Data(frame) => {
                self.frames_seen.push(frame.number);
                match self.reassembler.accept(&frame) {
                    Ok(Some(block)) => {
                        self.image.extend_from_slice(&block);
                        self.ack(frame.number)
                    }
                    Ok(None) => self.ack(frame.number),
                    Err(FrameError::Duplicate(n)) => self.ack(n),
                    Err(_) => Some(Message::Nak(self.reassembler.expected_frame()).encode()),
                }
            }
            Message::EndOfTransmission => {
                self.got_eot = true;
                let number = self.reassembler.expected_frame();
                self.ack(number)
            }
            _ => None,
        }
    }
}

/// Host with a manually stepped clock.
#[derive(Debug)]
pub struct FakeHost {
    pub now: Cell<u16>,
    /// Added to the clock on every read, so blocking loops see time pass.
    pub auto_advance_ms: u16,
    pub timer: u32,
    pub approve: bool,
    pub key: Option<[u8; 16]>,
    pub sleepy: Vec<Eui64>,
    pub events: Vec<SessionEvent>,
    pub records: Vec<QueryResponseRecord>,
    pub launched: u32,
    pub watchdog_kicks: u32,
}

impl Default for FakeHost {
    fn default() -> Self {
        Self {
            now: Cell::new(0),
            auto_advance_ms: 0,
            timer: 0x00c0_ffee,
            approve: true,
            key: Some(KEY),
            sleepy: Vec::new(),
            events: Vec::new(),
            records: Vec::new(),
            launched: 0,
            watchdog_kicks: 0,
        }
    }
}

impl Host for FakeHost {
    fn millis(&self) -> u16 {
        let now = self.now.get();
        self.now.set(now.wrapping_add(self.auto_advance_ms));
        now
    }

    fn timer_snapshot(&mut self) -> u32 {
        self.timer
    }

    fn approve_launch_request(&mut self, _: u16, _: &HardwareTag, _: &Eui64) -> bool {
        self.approve
    }

    fn verification_key(&mut self) -> Option<SharedKey> {
        self.key.map(SharedKey::new)
    }

    fn launch_bootloader(&mut self) {
        self.launched += 1;
    }

    fn on_query_response(&mut self, record: &QueryResponseRecord) {
        self.records.push(*record);
    }

    fn on_event(&mut self, event: SessionEvent) {
        self.events.push(event);
    }

    fn is_sleepy_child(&self, peer: &Eui64) -> bool {
        self.sleepy.contains(peer)
    }

    fn reset_watchdog(&mut self) {
        self.watchdog_kicks += 1;
    }
}

pub type TestSession = Session<FakeRadio, FakeHost, Aes128Cipher>;

pub fn device(eui: Eui64) -> DeviceInfo {
    DeviceInfo {
        eui64: eui,
        mfg_id: 0x1002,
        hardware_tag: TAG,
        platform: 4,
        micro: 3,
        phy: 2,
        bootloader_version: 0x2000,
        ..DeviceInfo::default()
    }
}

pub fn session(eui: Eui64) -> TestSession {
    session_with(BootloadConfig::for_device(device(eui)))
}

pub fn session_with(config: BootloadConfig) -> TestSession {
    Session::new(FakeRadio::default(), FakeHost::default(), Aes128Cipher, config)
}

/// Lets `periods` whole periods pass, ticking once per period.
pub fn run_periods(session: &mut TestSession, periods: u32) {
    let step = session.config().period_ms + 1;
    for _ in 0..periods {
        let now = session.host.now.get();
        session.host.now.set(now.wrapping_add(step));
        session.tick();
    }
}

/// Hands every datagram `from` sent so far to `to`.
pub fn deliver(from: &mut TestSession, to: &mut TestSession) {
    let sender = from.config().device.eui64;
    let receiver = to.config().device.eui64;
    for (dest, bytes) in from.radio.take_sent() {
        if dest == receiver || dest.is_broadcast() {
            to.handle_message(sender, &bytes);
        }
    }
}

/// Flash backed by a word vector.
#[derive(Debug)]
pub struct VecFlash(pub Vec<u16>);

impl FlashReader for VecFlash {
    type Error = ();

    fn read_words(&mut self, word_address: u32, words: &mut [u16]) -> Result<(), ()> {
        let start = word_address as usize;
        let src = self.0.get(start..start + words.len()).ok_or(())?;
        words.copy_from_slice(src);
        Ok(())
    }
}

/// Serial line scripted from the uploader's side.
#[derive(Debug, Default)]
pub struct FakeSerial {
    pub incoming: VecDeque<u8>,
    pub written: Vec<u8>,
}

impl SerialPort for FakeSerial {
    type Error = ();

    fn read(&mut self) -> nb::Result<u8, ()> {
        self.incoming.pop_front().ok_or(nb::Error::WouldBlock)
    }

    fn write(&mut self, byte: u8) -> nb::Result<(), ()> {
        self.written.push(byte);
        Ok(())
    }
}

/// An XModem-CRC packet as an uploader would send it.
pub fn xmodem_packet(number: u8, data: &[u8; 128]) -> Vec<u8> {
    let mut packet = vec![0x01, number, !number];
    packet.extend_from_slice(data);
    packet.extend_from_slice(&meshboot::crc::crc16(data).to_be_bytes());
    packet
}
