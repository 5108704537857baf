//! The bootload session state machine.
//!
//! One [`Session`] runs on each node and plays either side of the protocol:
//!
//! * **Source**: discovers targets, requests a launch, answers the
//!   challenge, then feeds the target's bootloader an image one serial block
//!   at a time ([`Session::queue_block`]), either relayed from an uploader or
//!   cloned from local flash.
//! * **Target**: answers discovery queries and, when the host approves a
//!   launch request, issues a challenge and launches the bootloader once the
//!   response verifies.
//!
//! The machine is driven from three places: [`Session::tick`] on every main
//! loop pass, [`Session::handle_message`] / [`Session::handle_raw_frame`] for
//! each received datagram, and [`Session::transmit_complete`] when the radio
//! reports the fate of an earlier send. No call blocks, except the
//! `*_blocking` helpers in the transfer layer.
//!
//! Deadlines count periods of [`BootloadConfig::period_ms`]. Every state
//! that waits on the peer arms a deadline on entry; states that retransmit
//! also reset their retry budget on entry.

mod dispatch;
mod transfer;

use crate::addr::{Eui64, HardwareTag};
use crate::auth::{AuthMaterial, BlockCipher, SharedKey, compute_response};
use crate::codec::{LaunchRequest, Message, MessageKind};
use crate::config::BootloadConfig;
use crate::consts::SERIAL_BLOCK_LEN_USIZE;
use crate::consts::legacy::{SEQUENCE_DISCOVERY_QUERY, SEQUENCE_SESSION_QUERY};
use crate::discovery::DiscoveryScope;
use crate::error::BootloadError;
use crate::fragment::{BLOCK_FILLER, SerialBlock, make_frame};
use crate::legacy::{LegacyFrame, LegacyLink, LegacyState};
use crate::platform::{Host, Radio};
use crate::timer::{ActionTimer, TimerEvent};

/// Where the session stands.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt-0-3", derive(defmt::Format))]
pub enum SessionState {
    /// Nothing in progress.
    Idle,
    /// Collecting discovery responses.
    AwaitingQueryResponses,
    /// Launch request sent, waiting for the target's challenge.
    AwaitingAuthChallenge,
    /// Challenge sent, waiting for the source's response.
    AwaitingAuthResponse,
    /// Response sent, or held for a sleepy child; gives the target time to
    /// restart into its bootloader.
    DelayBeforeStart,
    /// Querying one target's bootloader.
    StartingUnicast,
    /// Querying for any bootloader.
    StartingBroadcast,
    /// Ready for the next serial block.
    SendingImage,
    /// A data frame is in flight.
    AwaitingFrameAck,
    /// End of transmission is in flight.
    AwaitingCompletionAck,
    /// The image went out.
    Done,
}

/// What the running session is for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt-0-3", derive(defmt::Format))]
pub enum BootloadMode {
    /// No transfer.
    None,
    /// Image arrives over serial from an uploader.
    PassThroughRelay,
    /// Image is the local application, read from flash.
    CloneFromFlash,
    /// Pass-through towards a first-generation bootloader.
    LegacyPassThroughV1,
}

/// Why a session ended early.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt-0-3", derive(defmt::Format))]
pub enum AbortReason {
    /// A handshake message could not be sent.
    Transport,
    /// The peer did not answer the handshake in time.
    Timeout,
    /// The response did not match the challenge.
    AuthenticationFailed,
    /// The host turned the launch request down.
    Refused,
    /// No key was available to check the response.
    NoBuffers,
    /// The image source failed mid-transfer.
    ImageSource,
    /// The uploader cancelled.
    Cancelled,
}

/// Signals delivered to [`Host::on_event`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt-0-3", derive(defmt::Format))]
pub enum SessionEvent {
    /// A bootloader answered; [`Session::queue_block`] may be called.
    ReadyForImage {
        /// Bootloader that answered.
        target: Eui64,
        /// Transfer mode in effect.
        mode: BootloadMode,
    },
    /// The image went out.
    Completed {
        /// Target that received it.
        target: Eui64,
        /// `false` when the end-of-transmission acknowledgement never came.
        acknowledged: bool,
    },
    /// The session ended early.
    Aborted(AbortReason),
    /// The session ran out of retries and went back to idle.
    NoResponse,
    /// A verified launch request; the bootloader is about to run.
    BootloaderLaunched {
        /// Node that asked for it.
        requester: Eui64,
    },
    /// The auth response is held until the sleepy child polls; call
    /// [`Session::send_auth_response`] then.
    ResponseDeferred {
        /// Child the response is for.
        target: Eui64,
    },
}

/// One node's side of the bootload protocol.
///
/// # Type Parameters
/// * `R` - radio transport
/// * `H` - host services and policy
/// * `C` - block cipher for the handshake
#[derive(Debug)]
pub struct Session<R, H, C> {
    /// Radio transport.
    pub radio: R,
    /// Host services.
    pub host: H,
    cipher: C,
    config: BootloadConfig,
    state: SessionState,
    mode: BootloadMode,
    target: Eui64,
    query_scope: Option<DiscoveryScope>,
    retries_remaining: u8,
    timer: ActionTimer,
    expected_block: u8,
    current_frame: u8,
    block: SerialBlock,
    auth: AuthMaterial,
    legacy: LegacyLink,
    image_crc: Option<u32>,
}

impl<R, H, C> Session<R, H, C>
where
    R: Radio,
    H: Host,
    C: BlockCipher,
{
    /// Creates an idle session.
    ///
    /// # Arguments
    /// * `radio` - transport for bootload datagrams and raw frames
    /// * `host` - clock, policy and event sink
    /// * `cipher` - block cipher for the challenge/response handshake
    /// * `config` - identity of this node and protocol timing
    pub fn new(radio: R, host: H, cipher: C, config: BootloadConfig) -> Self {
        Self {
            radio,
            host,
            cipher,
            config,
            state: SessionState::Idle,
            mode: BootloadMode::None,
            target: Eui64::BROADCAST,
            query_scope: None,
            retries_remaining: 0,
            timer: ActionTimer::new(config.period_ms),
            expected_block: 1,
            current_frame: 0,
            block: [BLOCK_FILLER; SERIAL_BLOCK_LEN_USIZE],
            auth: AuthMaterial::new(),
            legacy: LegacyLink::new(config.period_ms),
            image_crc: None,
        }
    }

    /// Current state.
    pub fn state(&self) -> SessionState {
        self.state
    }

    /// Current transfer mode.
    pub fn mode(&self) -> BootloadMode {
        self.mode
    }

    /// Peer of the running session.
    pub fn target(&self) -> Eui64 {
        self.target
    }

    /// Configuration the session was built with.
    pub fn config(&self) -> &BootloadConfig {
        &self.config
    }

    /// Retransmissions left in the current state.
    pub fn retries_remaining(&self) -> u8 {
        self.retries_remaining
    }

    /// Periods left before the current state times out.
    pub fn deadline_ticks(&self) -> u8 {
        self.timer.remaining()
    }

    /// Serial block number the next [`queue_block`](Self::queue_block) call
    /// will carry.
    pub fn expected_block(&self) -> u8 {
        self.expected_block
    }

    /// Frame number most recently put on the air.
    pub fn current_frame(&self) -> u8 {
        self.current_frame
    }

    /// Whether anything other than `Idle` or `Done` is in progress.
    pub fn is_active(&self) -> bool {
        !matches!(self.state, SessionState::Idle | SessionState::Done)
    }

    /// Whether [`queue_block`](Self::queue_block) would accept a block now.
    pub fn is_ready_for_block(&self) -> bool {
        self.state == SessionState::SendingImage
    }

    /// Whether a key or challenge is still held.
    pub fn holds_key_material(&self) -> bool {
        self.auth.holds_any()
    }

    /// State of the legacy link, [`LegacyState::Idle`] unless a
    /// first-generation bootloader is being driven.
    pub fn legacy_state(&self) -> LegacyState {
        self.legacy.state()
    }

    /// CRC-32 of the last image cloned from flash.
    pub fn image_crc(&self) -> Option<u32> {
        self.image_crc
    }

    /// Starts a session by asking `target` to launch its bootloader.
    ///
    /// The key is held until the challenge is answered or the session ends,
    /// and zeroized on release.
    ///
    /// # Arguments
    /// * `target` - node to update
    /// * `mfg_id` - manufacturer id of the image on offer
    /// * `hardware_tag` - hardware the image was built for
    /// * `key` - shared secret for the challenge
    /// * `mode` - [`BootloadMode::PassThroughRelay`] or
    ///   [`BootloadMode::CloneFromFlash`]
    ///
    /// # Returns
    /// * [`BootloadError::SessionActive`] if a session is in progress
    /// * [`BootloadError::InvalidMode`] for any other mode
    /// * [`BootloadError::Transport`] if the request could not be sent
    pub fn request_session(
        &mut self,
        target: Eui64,
        mfg_id: u16,
        hardware_tag: HardwareTag,
        key: SharedKey,
        mode: BootloadMode,
    ) -> Result<(), BootloadError> {
        if self.is_active() {
            warn!("session already active in state {:?}", self.state);
            return Err(BootloadError::SessionActive);
        }
        if !matches!(
            mode,
            BootloadMode::PassThroughRelay | BootloadMode::CloneFromFlash
        ) {
            return Err(BootloadError::InvalidMode);
        }

        self.auth.release_all();
        self.target = target;
        self.mode = mode;
        self.query_scope = None;
        self.auth.store_key(key);

        let request = Message::LaunchRequest(LaunchRequest {
            mfg_id,
            hardware_tag,
        });
        if self.send(&target, &request).is_err() {
            self.abort(AbortReason::Transport);
            return Err(BootloadError::Transport);
        }
        info!("launch request sent to {}", target);
        self.enter(SessionState::AwaitingAuthChallenge);
        self.timer.arm(self.config.timeouts.auth_challenge);
        Ok(())
    }

    /// Sends a discovery query and collects answers for a while.
    ///
    /// Each accepted answer goes to [`Host::on_query_response`]. A broadcast
    /// `target` accepts everyone; a unicast one only that node.
    pub fn send_query(&mut self, target: Eui64) -> Result<(), BootloadError> {
        if self.is_active() {
            return Err(BootloadError::SessionActive);
        }
        let scope = DiscoveryScope::for_target(target);
        if self.send(&scope.destination(), &Message::Query).is_err() {
            return Err(BootloadError::Transport);
        }
        if self.config.legacy_support {
            // Old bootloaders only hear raw frames.
            let _ = self.send_legacy_query(target, SEQUENCE_DISCOVERY_QUERY);
        }
        debug!("query sent to {}", target);
        self.mode = BootloadMode::None;
        self.query_scope = Some(scope);
        self.enter(SessionState::AwaitingQueryResponses);
        self.timer.arm(self.config.timeouts.query);
        Ok(())
    }

    /// Starts looking for the bootloader of `target`, or of anyone when
    /// `target` is broadcast.
    ///
    /// Normally reached on its own once the handshake's start delay runs
    /// out. Called directly it recovers a transfer towards a node that is
    /// already sitting in its bootloader: any session in progress is
    /// dropped, key material included.
    pub fn start_bootload(&mut self, target: Eui64, mode: BootloadMode) -> Result<(), BootloadError> {
        if mode == BootloadMode::None {
            return Err(BootloadError::InvalidMode);
        }
        self.auth.release_all();
        self.legacy.reset();
        self.target = target;
        self.mode = mode;
        self.query_scope = None;
        self.expected_block = 1;
        self.current_frame = 0;
        self.image_crc = None;
        self.retries_remaining = self.config.packet_retries;

        if mode == BootloadMode::LegacyPassThroughV1 {
            info!("starting legacy bootload of {}", target);
            self.legacy.enter(
                LegacyState::AwaitingQueryResponse,
                self.config.timeouts.start,
                self.config.packet_retries,
            );
            self.enter(SessionState::StartingUnicast);
            if self.send_legacy_query(target, SEQUENCE_SESSION_QUERY).is_err() {
                self.legacy.restart_deadline(0);
            }
            return Ok(());
        }

        info!("starting bootload of {}", target);
        self.enter(if target.is_broadcast() {
            SessionState::StartingBroadcast
        } else {
            SessionState::StartingUnicast
        });
        self.timer.arm(self.config.timeouts.start);
        if self.send(&target, &Message::Query).is_err() {
            self.timer.expire_now();
        }
        Ok(())
    }

    /// Sends the response held for a sleepy child.
    ///
    /// The start delay restarts once the response is out. A failed send
    /// ends the session.
    ///
    /// # Returns
    /// * [`BootloadError::InvalidState`] if no challenge is waiting
    /// * [`BootloadError::Transport`] if the radio refused the response
    pub fn send_auth_response(&mut self, target: Eui64) -> Result<(), BootloadError> {
        let response = match (self.state, self.auth.key(), self.auth.challenge()) {
            (SessionState::DelayBeforeStart, Some(key), Some(challenge)) => {
                compute_response(&self.cipher, key, challenge)
            }
            _ => return Err(BootloadError::InvalidState(self.state)),
        };
        self.auth.release_all();
        if self.send(&target, &Message::AuthResponse(response)).is_err() {
            self.abort(AbortReason::Transport);
            return Err(BootloadError::Transport);
        }
        debug!("auth response sent to {}", target);
        self.timer.arm(self.config.timeouts.start);
        Ok(())
    }

    /// Advances deadlines. Call on every main loop pass.
    pub fn tick(&mut self) {
        let now = self.host.millis();
        if self.legacy.is_engaged() {
            self.legacy_tick(now);
        }
        if self.timer.poll(now) == TimerEvent::Expired {
            self.on_timeout();
        }
    }

    /// Reports the outcome of an earlier send.
    ///
    /// A failed frame, end of transmission or bootloader query is retried
    /// at the next period out of the state's budget; a failed handshake
    /// message ends the session.
    pub fn transmit_complete(&mut self, kind: MessageKind, delivered: bool) {
        if delivered {
            return;
        }
        warn!("{:?} not delivered in state {:?}", kind, self.state);
        match (self.state, kind) {
            (SessionState::AwaitingFrameAck, MessageKind::Data)
            | (SessionState::AwaitingCompletionAck, MessageKind::EndOfTransmission)
            | (SessionState::StartingUnicast, MessageKind::Query)
            | (SessionState::StartingBroadcast, MessageKind::Query) => self.retry_at_next_period(),
            (SessionState::AwaitingAuthChallenge, MessageKind::LaunchRequest)
            | (SessionState::AwaitingAuthResponse, MessageKind::AuthChallenge)
            | (SessionState::DelayBeforeStart, MessageKind::AuthResponse) => {
                self.abort(AbortReason::Transport)
            }
            _ => {}
        }
    }

    fn on_timeout(&mut self) {
        if self.legacy.is_engaged()
            && matches!(
                self.state,
                SessionState::StartingUnicast
                    | SessionState::StartingBroadcast
                    | SessionState::AwaitingFrameAck
                    | SessionState::AwaitingCompletionAck
            )
        {
            return;
        }

        match self.state {
            SessionState::Idle => {
                if self.mode != BootloadMode::None {
                    warn!("no response from {}", self.target);
                    self.mode = BootloadMode::None;
                    self.host.on_event(SessionEvent::NoResponse);
                }
            }
            SessionState::Done => self.mode = BootloadMode::None,
            SessionState::AwaitingQueryResponses => {
                debug!("query window closed");
                self.query_scope = None;
                self.enter(SessionState::Idle);
            }
            SessionState::AwaitingAuthChallenge => {
                warn!("no challenge from {}", self.target);
                self.auth.release_key();
                self.abort(AbortReason::Timeout);
            }
            SessionState::AwaitingAuthResponse => {
                warn!("no auth response from {}", self.target);
                self.auth.release_challenge();
                self.abort(AbortReason::Timeout);
            }
            SessionState::DelayBeforeStart => {
                if self.auth.key().is_some() {
                    // Response still held for a sleepy child.
                    self.timer.arm(self.config.timeouts.start);
                    return;
                }
                let (target, mode) = (self.target, self.mode);
                let _ = self.start_bootload(target, mode);
            }
            SessionState::StartingUnicast | SessionState::StartingBroadcast => {
                if self.consume_retry(self.config.timeouts.query) {
                    let target = self.target;
                    if self.send(&target, &Message::Query).is_err() {
                        self.timer.expire_now();
                    }
                } else {
                    self.enter(SessionState::Idle);
                }
            }
            SessionState::AwaitingFrameAck => {
                if self.consume_retry(self.config.timeouts.image_send) {
                    debug!("retransmitting frame {}", self.current_frame);
                    self.transmit_frame();
                } else {
                    self.enter(SessionState::Idle);
                }
            }
            SessionState::AwaitingCompletionAck => {
                if self.consume_retry(self.config.timeouts.image_send) {
                    self.transmit_end_of_transmission();
                } else {
                    warn!("end of transmission unacknowledged, check {}", self.target);
                    self.complete(false);
                }
            }
            SessionState::SendingImage => {}
        }
    }

    fn legacy_tick(&mut self, now: u16) {
        if self.legacy.poll(now) != TimerEvent::Expired {
            return;
        }
        let periods = match self.legacy.state() {
            LegacyState::AwaitingQueryResponse => self.config.timeouts.start,
            LegacyState::AwaitingDataAck | LegacyState::AwaitingEotAck => {
                self.config.timeouts.image_send
            }
            LegacyState::Idle | LegacyState::AwaitingImage => return,
        };
        if self.legacy.consume_retry(periods) {
            match self.legacy.state() {
                LegacyState::AwaitingQueryResponse => {
                    let target = self.target;
                    let _ = self.send_legacy_query(target, SEQUENCE_SESSION_QUERY);
                }
                LegacyState::AwaitingDataAck => self.transmit_frame(),
                _ => self.transmit_end_of_transmission(),
            }
            return;
        }

        let state = self.legacy.state();
        self.legacy.reset();
        if state == LegacyState::AwaitingEotAck {
            warn!("legacy end of transmission unacknowledged, check {}", self.target);
            self.complete(false);
        } else {
            self.enter(SessionState::Idle);
        }
    }

    fn consume_retry(&mut self, periods: u8) -> bool {
        if self.retries_remaining == 0 {
            return false;
        }
        self.retries_remaining -= 1;
        self.timer.arm(periods);
        true
    }

    fn enter(&mut self, state: SessionState) {
        if self.state != state {
            trace!("{:?} -> {:?}", self.state, state);
        }
        self.state = state;
    }

    /// Ends the session, wiping key material.
    pub(crate) fn abort(&mut self, reason: AbortReason) {
        debug!("session aborted: {:?}", reason);
        self.auth.release_all();
        self.legacy.reset();
        self.query_scope = None;
        self.mode = BootloadMode::None;
        self.enter(SessionState::Idle);
        self.host.on_event(SessionEvent::Aborted(reason));
    }

    fn complete(&mut self, acknowledged: bool) {
        self.legacy.reset();
        self.enter(SessionState::Done);
        self.timer.arm(self.config.timeouts.image_send);
        info!("image sent to {}", self.target);
        self.host.on_event(SessionEvent::Completed {
            target: self.target,
            acknowledged,
        });
    }

    fn send(&mut self, destination: &Eui64, message: &Message) -> Result<(), BootloadError> {
        let bytes = message.encode();
        self.radio.send(destination, &bytes).map_err(|_| {
            warn!("send of {:?} to {} failed", message.kind(), destination);
            BootloadError::Transport
        })
    }

    fn send_legacy(&mut self, frame: &LegacyFrame) -> Result<(), BootloadError> {
        let raw = frame.encode(self.legacy.next_mac_sequence());
        self.radio.send_raw(&raw).map_err(|_| {
            warn!("raw send failed");
            BootloadError::Transport
        })
    }

    fn legacy_control(&self, kind: MessageKind, destination: Eui64, sequence: u8) -> LegacyFrame {
        LegacyFrame::Control {
            kind,
            destination,
            source: self.config.device.eui64,
            sequence,
            node_id: self.config.node_id,
        }
    }

    fn send_legacy_query(&mut self, target: Eui64, sequence: u8) -> Result<(), BootloadError> {
        let frame = self.legacy_control(MessageKind::Query, target, sequence);
        self.send_legacy(&frame)
    }

    /// Puts the frame numbered `current_frame` of the held block on the air.
    ///
    /// Send failures leave the deadline to retry.
    fn transmit_frame(&mut self) {
        let target = self.target;
        let sent = if self.legacy.is_engaged() {
            let data = make_frame(&self.block, self.current_frame);
            let frame = LegacyFrame::Data {
                destination: target,
                block: self.current_frame,
                payload: data.payload,
            };
            self.send_legacy(&frame)
        } else {
            let frame = Message::Data(make_frame(&self.block, self.current_frame));
            self.send(&target, &frame)
        };
        if sent.is_err() {
            self.retry_at_next_period();
        }
    }

    fn retry_at_next_period(&mut self) {
        if self.legacy.is_engaged() {
            self.legacy.restart_deadline(0);
        } else {
            self.timer.expire_now();
        }
    }

    fn transmit_end_of_transmission(&mut self) {
        let target = self.target;
        let sent = if self.legacy.is_engaged() {
            let frame =
                self.legacy_control(MessageKind::EndOfTransmission, target, self.current_frame);
            self.send_legacy(&frame)
        } else {
            self.send(&target, &Message::EndOfTransmission)
        };
        if sent.is_err() {
            self.retry_at_next_period();
        }
    }
}
