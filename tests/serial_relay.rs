mod common;

use common::*;
use meshboot::consts::{KIND_ACK, KIND_CANCEL, KIND_EOT, KIND_NAK, KIND_READY};
use meshboot::session::AbortReason;
use meshboot::xmodem::{RelayStatus, SerialRelay};
use meshboot::{BootloadMode, SessionEvent, SessionState};

/// A source talking to a scripted bootloader that has already answered,
/// and a relay that has announced itself to the uploader.
fn relaying_source() -> (TestSession, SerialRelay<FakeSerial>) {
    let mut source = session(SOURCE);
    source.radio.bootloader = Some(FakeBootloader::new(TARGET));
    source.start_bootload(TARGET, BootloadMode::PassThroughRelay).unwrap();
    source.poll();
    assert_eq!(source.state(), SessionState::SendingImage);

    let mut relay = SerialRelay::new(FakeSerial::default());
    assert_eq!(relay.poll(&mut source), Ok(RelayStatus::Waiting));
    assert_eq!(relay.port_mut().written, vec![KIND_READY]);
    (source, relay)
}

fn pump(source: &mut TestSession, relay: &mut SerialRelay<FakeSerial>, rounds: usize) -> RelayStatus {
    let mut status = relay.status();
    for _ in 0..rounds {
        source.poll();
        status = relay.poll(source).unwrap();
        if matches!(status, RelayStatus::Finished | RelayStatus::Cancelled) {
            break;
        }
    }
    status
}

#[test]
fn relay_stays_quiet_until_the_bootloader_answers() {
    let mut source = session(SOURCE);
    let mut relay = SerialRelay::new(FakeSerial::default());
    for _ in 0..5 {
        assert_eq!(relay.poll(&mut source), Ok(RelayStatus::Waiting));
    }
    source.host.now.set(30_000);
    assert_eq!(relay.poll(&mut source), Ok(RelayStatus::Waiting));
    assert!(relay.into_inner().written.is_empty());
}

#[test]
fn uploaded_image_reaches_the_target() {
    let first = [0x11u8; 128];
    let second: [u8; 128] = core::array::from_fn(|i| i as u8);

    let (mut source, mut relay) = relaying_source();
    let port = relay.port_mut();
    port.incoming.extend(xmodem_packet(1, &first));
    port.incoming.extend(xmodem_packet(2, &second));
    port.incoming.push_back(KIND_EOT);
    assert_eq!(pump(&mut source, &mut relay, 50), RelayStatus::Finished);

    assert_eq!(source.state(), SessionState::Done);
    assert!(source.host.events.contains(&SessionEvent::Completed {
        target: TARGET,
        acknowledged: true,
    }));
    let bootloader = source.radio.bootloader.as_ref().unwrap();
    assert!(bootloader.got_eot);
    assert_eq!(&bootloader.image[..128], &first[..]);
    assert_eq!(&bootloader.image[128..], &second[..]);
    assert_eq!(bootloader.frames_seen, vec![1, 2, 3, 4]);

    let written = relay.into_inner().written;
    assert_eq!(written, vec![KIND_READY, KIND_ACK, KIND_ACK, KIND_ACK]);
}

#[test]
fn repeated_block_is_acknowledged_without_resending() {
    let data = [0x42u8; 128];
    let (mut source, mut relay) = relaying_source();
    let port = relay.port_mut();
    port.incoming.extend(xmodem_packet(1, &data));
    port.incoming.extend(xmodem_packet(1, &data));
    let _ = pump(&mut source, &mut relay, 20);

    assert_eq!(relay.status(), RelayStatus::Transferring);
    assert_eq!(source.expected_block(), 2);
    assert_eq!(source.radio.bootloader.as_ref().unwrap().frames_seen, vec![1, 2]);
    assert_eq!(relay.into_inner().written, vec![KIND_READY, KIND_ACK, KIND_ACK]);
}

#[test]
fn corrupt_packet_is_refused() {
    let mut packet = xmodem_packet(1, &[0u8; 128]);
    packet[50] ^= 0x80;
    let (mut source, mut relay) = relaying_source();
    relay.port_mut().incoming.extend(packet);
    let _ = pump(&mut source, &mut relay, 5);

    assert_eq!(source.state(), SessionState::SendingImage);
    assert!(source.radio.bootloader.as_ref().unwrap().frames_seen.is_empty());
    assert_eq!(relay.into_inner().written, vec![KIND_READY, KIND_NAK]);
}

#[test]
fn out_of_sequence_block_cancels_both_sides() {
    let (mut source, mut relay) = relaying_source();
    relay.port_mut().incoming.extend(xmodem_packet(3, &[0u8; 128]));
    assert_eq!(pump(&mut source, &mut relay, 5), RelayStatus::Cancelled);

    assert_eq!(source.state(), SessionState::Idle);
    assert_eq!(
        source.host.events.last(),
        Some(&SessionEvent::Aborted(AbortReason::Cancelled))
    );
    let written = relay.into_inner().written;
    assert_eq!(written[0], KIND_READY);
    assert_eq!(&written[1..], &[KIND_CANCEL; 5]);
}

#[test]
fn uploader_cancel_aborts_the_session() {
    let (mut source, mut relay) = relaying_source();
    relay.port_mut().incoming.push_back(KIND_CANCEL);
    assert_eq!(relay.poll(&mut source), Ok(RelayStatus::Cancelled));

    assert_eq!(source.state(), SessionState::Idle);
    assert_eq!(
        source.host.events.last(),
        Some(&SessionEvent::Aborted(AbortReason::Cancelled))
    );
    assert_eq!(relay.into_inner().written, vec![KIND_READY]);
}

#[test]
fn partial_packet_times_out_with_a_nak() {
    let packet = xmodem_packet(1, &[0u8; 128]);
    let (mut source, mut relay) = relaying_source();
    relay.port_mut().incoming.extend(packet[..40].iter().copied());
    assert_eq!(relay.poll(&mut source), Ok(RelayStatus::Waiting));

    source.host.now.set(1_001);
    assert_eq!(relay.poll(&mut source), Ok(RelayStatus::Waiting));
    assert_eq!(relay.into_inner().written, vec![KIND_READY, KIND_NAK, KIND_READY]);
}

#[test]
fn silent_uploader_is_cancelled_after_the_stall_timeout() {
    let (mut source, mut relay) = relaying_source();

    source.host.now.set(10_000);
    assert_eq!(relay.poll(&mut source), Ok(RelayStatus::Waiting));

    source.host.now.set(20_001);
    assert_eq!(relay.poll(&mut source), Ok(RelayStatus::Cancelled));
    assert_eq!(source.state(), SessionState::Idle);

    let written = relay.into_inner().written;
    assert_eq!(&written[..3], &[KIND_READY; 3]);
    assert_eq!(&written[3..], &[KIND_CANCEL; 5]);
}
