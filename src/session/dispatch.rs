//! Incoming traffic.
//!
//! Anything that fails to decode, arrives from the wrong peer or does not
//! fit the current state is dropped with a trace; a stray datagram never
//! moves the machine.

use super::{AbortReason, BootloadMode, Session, SessionEvent, SessionState};
use crate::addr::Eui64;
use crate::auth::{AuthBlock, BlockCipher, build_challenge, requires_legacy_framing, verify_response};
use crate::codec::{LaunchRequest, Message, MessageKind};
use crate::discovery::{QueryResponse, QueryResponseRecord};
use crate::legacy::{LegacyFrame, LegacyState};
use crate::platform::{Host, Radio};

impl<R, H, C> Session<R, H, C>
where
    R: Radio,
    H: Host,
    C: BlockCipher,
{
    /// Handles one received bootload datagram.
    ///
    /// # Arguments
    /// * `source` - sender, as reported by the network layer
    /// * `bytes` - the datagram, bounded to its length
    pub fn handle_message(&mut self, source: Eui64, bytes: &[u8]) {
        let message = match Message::decode(bytes) {
            Ok(message) => message,
            Err(e) => {
                trace!("dropped datagram from {}: {:?}", source, e);
                return;
            }
        };
        trace!("{:?} from {} in state {:?}", message.kind(), source, self.state);

        match message {
            Message::Query => self.on_query(source),
            Message::QueryResponse(response) => self.on_query_response(source, response),
            Message::LaunchRequest(request) => self.on_launch_request(source, request),
            Message::AuthChallenge(block) => self.on_auth_challenge(source, block),
            Message::AuthResponse(block) => self.on_auth_response(source, block),
            Message::Ack(number) => self.on_ack(source, number),
            Message::Nak(number) => self.on_nak(source, number),
            // Image data only ever flows towards bootloaders.
            Message::Data(_) | Message::EndOfTransmission => {}
        }
    }

    /// Handles one received raw MAC frame from a first-generation
    /// bootloader.
    pub fn handle_raw_frame(&mut self, raw: &[u8]) {
        if !self.config.legacy_support {
            return;
        }
        let (kind, source, sequence) = match LegacyFrame::decode(raw) {
            Ok(LegacyFrame::Control {
                kind,
                destination,
                source,
                sequence,
                ..
            }) if destination == self.config.device.eui64 || destination.is_broadcast() => {
                (kind, source, sequence)
            }
            Ok(_) => return,
            Err(e) => {
                trace!("dropped raw frame: {:?}", e);
                return;
            }
        };

        match kind {
            MessageKind::QueryResponse => self.on_legacy_query_response(source),
            MessageKind::Ack if source == self.target => self.on_legacy_ack(sequence),
            _ => trace!("ignored legacy {:?} from {}", kind, source),
        }
    }

    fn on_query(&mut self, source: Eui64) {
        if self.is_active() {
            return;
        }
        let response = Message::QueryResponse(self.config.device.query_response());
        if self.send(&source, &response).is_ok() {
            debug!("answered query from {}", source);
        }
    }

    fn on_query_response(&mut self, source: Eui64, response: QueryResponse) {
        match self.state {
            SessionState::AwaitingQueryResponses => {
                let accepted = self
                    .query_scope
                    .is_some_and(|scope| scope.accepts(&source));
                if !accepted {
                    return;
                }
                let record = QueryResponseRecord {
                    peer: source,
                    link_quality: self.radio.last_hop_link_quality(),
                    response,
                };
                self.host.on_query_response(&record);
            }
            SessionState::StartingUnicast | SessionState::StartingBroadcast => {
                if self.legacy.is_engaged() {
                    return;
                }
                if self.state == SessionState::StartingUnicast && source != self.target {
                    trace!("query response from unexpected {}", source);
                    return;
                }
                if !response.bootloader_active {
                    debug!("{} is not running its bootloader yet", source);
                    return;
                }
                if self.mode == BootloadMode::CloneFromFlash
                    && !self.config.device.is_compatible(&response)
                {
                    warn!("{} cannot run this image", source);
                    return;
                }
                self.target = source;
                self.ready_for_image();
            }
            _ => {}
        }
    }

    fn on_legacy_query_response(&mut self, source: Eui64) {
        match self.state {
            SessionState::AwaitingQueryResponses => {
                if !self
                    .query_scope
                    .is_some_and(|scope| scope.accepts(&source))
                {
                    return;
                }
                let record = QueryResponseRecord {
                    peer: source,
                    link_quality: self.radio.last_hop_link_quality(),
                    response: QueryResponse::legacy(),
                };
                self.host.on_query_response(&record);
            }
            SessionState::StartingUnicast
                if self.legacy.state() == LegacyState::AwaitingQueryResponse
                    && source == self.target =>
            {
                self.legacy.enter(LegacyState::AwaitingImage, 0, 0);
                self.ready_for_image();
            }
            _ => {}
        }
    }

    fn on_launch_request(&mut self, source: Eui64, request: LaunchRequest) {
        if self.is_active() {
            trace!("launch request from {} while busy", source);
            return;
        }
        if !self
            .host
            .approve_launch_request(request.mfg_id, &request.hardware_tag, &source)
        {
            info!("launch request from {} refused", source);
            self.abort(AbortReason::Refused);
            return;
        }

        let challenge = build_challenge(&self.config.device, self.host.timer_snapshot());
        self.auth.release_all();
        self.auth.store_challenge(challenge);
        self.target = source;
        if self.send(&source, &Message::AuthChallenge(challenge)).is_err() {
            self.abort(AbortReason::Transport);
            return;
        }
        debug!("challenge sent to {}", source);
        self.enter(SessionState::AwaitingAuthResponse);
        self.timer.arm(self.config.timeouts.auth_response);
    }

    fn on_auth_challenge(&mut self, source: Eui64, challenge: AuthBlock) {
        if self.state != SessionState::AwaitingAuthChallenge || source != self.target {
            return;
        }
        self.auth.store_challenge(challenge);

        if self.mode == BootloadMode::PassThroughRelay
            && self.config.legacy_support
            && requires_legacy_framing(&challenge, &source)
        {
            info!("{} runs a legacy bootloader", source);
            self.mode = BootloadMode::LegacyPassThroughV1;
        }

        self.enter(SessionState::DelayBeforeStart);
        self.timer.arm(self.config.timeouts.start);

        if self.host.is_sleepy_child(&source) {
            debug!("holding auth response for sleepy child {}", source);
            self.host
                .on_event(SessionEvent::ResponseDeferred { target: source });
            return;
        }
        let _ = self.send_auth_response(source);
    }

    fn on_auth_response(&mut self, source: Eui64, response: AuthBlock) {
        if self.state != SessionState::AwaitingAuthResponse || source != self.target {
            return;
        }
        let Some(key) = self.host.verification_key() else {
            warn!("no key to check the response from {}", source);
            self.abort(AbortReason::NoBuffers);
            return;
        };
        let verified = self
            .auth
            .challenge()
            .is_some_and(|challenge| verify_response(&self.cipher, &key, challenge, &response));
        drop(key);
        self.auth.release_challenge();

        if !verified {
            warn!("auth response from {} does not verify", source);
            self.abort(AbortReason::AuthenticationFailed);
            return;
        }
        info!("launching bootloader for {}", source);
        self.mode = BootloadMode::None;
        self.enter(SessionState::Idle);
        self.host
            .on_event(SessionEvent::BootloaderLaunched { requester: source });
        self.host.launch_bootloader();
    }

    fn on_ack(&mut self, source: Eui64, number: u8) {
        if source != self.target || number != self.current_frame {
            return;
        }
        match self.state {
            SessionState::AwaitingFrameAck => self.frame_acknowledged(),
            SessionState::AwaitingCompletionAck => self.complete(true),
            _ => {}
        }
    }

    fn on_nak(&mut self, source: Eui64, number: u8) {
        // A bootloader waiting for frame 1 answers our query with a NAK.
        if self.state == SessionState::StartingUnicast
            && !self.legacy.is_engaged()
            && source == self.target
            && number == 1
        {
            self.ready_for_image();
        }
    }

    fn on_legacy_ack(&mut self, sequence: u8) {
        if sequence != self.current_frame {
            return;
        }
        match (self.legacy.state(), self.state) {
            (LegacyState::AwaitingDataAck, SessionState::AwaitingFrameAck) => {
                self.frame_acknowledged()
            }
            (LegacyState::AwaitingEotAck, SessionState::AwaitingCompletionAck) => {
                self.complete(true)
            }
            _ => {}
        }
    }

    fn ready_for_image(&mut self) {
        info!("bootloader of {} ready", self.target);
        self.expected_block = 1;
        self.retries_remaining = self.config.packet_retries;
        self.enter(SessionState::SendingImage);
        self.host.on_event(SessionEvent::ReadyForImage {
            target: self.target,
            mode: self.mode,
        });
    }
}
