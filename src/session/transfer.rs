//! Image transfer: queueing serial blocks, end of transmission, and the
//! blocking helpers used by the relay and by flash cloning.

use embedded_hal::delay::DelayNs;

use super::{AbortReason, BootloadMode, Session, SessionState};
use crate::auth::BlockCipher;
use crate::clone::{BlockSink, FlashLayout, stream_image};
use crate::consts::legacy::MAX_FRAME_LEN;
use crate::error::BootloadError;
use crate::fragment::{ImageBlocks, SerialBlock, frame_numbers};
use crate::legacy::LegacyState;
use crate::platform::{FlashReader, Framing, Host, Radio};
use crate::timer::spin_until;

impl<R, H, C> Session<R, H, C>
where
    R: Radio,
    H: Host,
    C: BlockCipher,
{
    /// Starts sending the next serial block.
    ///
    /// The block goes out as two frames, each retransmitted until
    /// acknowledged or out of retries. When the second frame is
    /// acknowledged the session is ready for the following block.
    ///
    /// # Returns
    /// * `WouldBlock` while the previous block is still in flight
    /// * [`BootloadError::InvalidState`] when no transfer is running
    pub fn queue_block(&mut self, block: &SerialBlock) -> nb::Result<(), BootloadError> {
        match self.state {
            SessionState::SendingImage => {}
            SessionState::AwaitingFrameAck => return Err(nb::Error::WouldBlock),
            state => return Err(nb::Error::Other(BootloadError::InvalidState(state))),
        }
        self.block.copy_from_slice(block);
        self.current_frame = frame_numbers(self.expected_block)[0];
        trace!("queued block {}", self.expected_block);
        self.begin_frame();
        Ok(())
    }

    /// Sends end of transmission once the last block is through.
    pub fn queue_end_of_transmission(&mut self) -> nb::Result<(), BootloadError> {
        match self.state {
            SessionState::SendingImage => {}
            SessionState::AwaitingFrameAck => return Err(nb::Error::WouldBlock),
            state => return Err(nb::Error::Other(BootloadError::InvalidState(state))),
        }
        self.current_frame = frame_numbers(self.expected_block)[0];
        self.retries_remaining = self.config.packet_retries;
        self.enter(SessionState::AwaitingCompletionAck);
        self.timer.arm(self.config.timeouts.image_send);
        if self.legacy.is_engaged() {
            self.legacy.enter(
                LegacyState::AwaitingEotAck,
                self.config.timeouts.image_send,
                self.config.packet_retries,
            );
        }
        debug!("end of transmission after block {}", self.expected_block);
        self.transmit_end_of_transmission();
        Ok(())
    }

    /// Abandons the transfer on behalf of the image source.
    pub fn cancel(&mut self, reason: AbortReason) {
        if self.is_active() {
            self.abort(reason);
        }
    }

    pub(super) fn frame_acknowledged(&mut self) {
        if self.current_frame & 1 == 1 {
            self.current_frame = self.current_frame.wrapping_add(1);
            self.enter(SessionState::SendingImage);
            self.begin_frame();
            return;
        }
        trace!("block {} acknowledged", self.expected_block);
        self.expected_block = self.expected_block.wrapping_add(1);
        if self.legacy.is_engaged() {
            self.legacy.enter(LegacyState::AwaitingImage, 0, 0);
        }
        self.enter(SessionState::SendingImage);
    }

    fn begin_frame(&mut self) {
        self.retries_remaining = self.config.packet_retries;
        self.enter(SessionState::AwaitingFrameAck);
        self.timer.arm(self.config.timeouts.image_send);
        if self.legacy.is_engaged() {
            self.legacy.enter(
                LegacyState::AwaitingDataAck,
                self.config.timeouts.image_send,
                self.config.packet_retries,
            );
        }
        self.transmit_frame();
    }

    /// One pass of the blocking loop: watchdog, one received datagram, tick.
    pub fn poll(&mut self) {
        self.host.reset_watchdog();
        let mut buf = [0u8; MAX_FRAME_LEN];
        match self.radio.receive(&mut buf) {
            Ok(incoming) => {
                let bytes = &buf[..incoming.len.min(buf.len())];
                match incoming.framing {
                    Framing::Bootload => self.handle_message(incoming.source, bytes),
                    Framing::Raw => self.handle_raw_frame(bytes),
                }
            }
            Err(nb::Error::WouldBlock) => {}
            Err(nb::Error::Other(_)) => warn!("receive failed"),
        }
        self.tick();
    }

    /// Sends one block and waits until both halves are acknowledged.
    ///
    /// # Returns
    /// * [`BootloadError::Aborted`] if the target stopped answering
    pub fn send_block_blocking<D: DelayNs>(
        &mut self,
        block: &SerialBlock,
        delay: &mut D,
    ) -> Result<(), BootloadError> {
        let poll_us = self.config.poll_interval_us;
        spin_until(delay, poll_us, || match self.queue_block(block) {
            Ok(()) => Some(Ok(())),
            Err(nb::Error::WouldBlock) => {
                self.poll();
                None
            }
            Err(nb::Error::Other(e)) => Some(Err(e)),
        })?;
        self.wait_for_acknowledgement(delay)
    }

    /// Sends end of transmission and waits for the session to finish.
    ///
    /// A missing final acknowledgement still counts as finished.
    pub fn finish_blocking<D: DelayNs>(&mut self, delay: &mut D) -> Result<(), BootloadError> {
        self.queue_end_of_transmission().map_err(|e| match e {
            nb::Error::WouldBlock => BootloadError::InvalidState(self.state),
            nb::Error::Other(e) => e,
        })?;
        self.wait_for_acknowledgement(delay)
    }

    /// Sends a whole in-memory image, padding the last block, then ends
    /// the transmission.
    pub fn send_image_blocking<D: DelayNs>(
        &mut self,
        image: &[u8],
        delay: &mut D,
    ) -> Result<(), BootloadError> {
        for block in ImageBlocks::new(image) {
            self.send_block_blocking(&block, delay)?;
        }
        self.finish_blocking(delay)
    }

    /// Streams the local application from flash into the target.
    ///
    /// The session must be in [`BootloadMode::CloneFromFlash`] and ready for
    /// the first block.
    ///
    /// # Returns
    /// * The image CRC-32 that went out after the end tag
    pub fn clone_from_flash<F: FlashReader, D: DelayNs>(
        &mut self,
        flash: &mut F,
        layout: &FlashLayout<'_>,
        delay: &mut D,
    ) -> Result<u32, BootloadError> {
        if self.mode != BootloadMode::CloneFromFlash {
            return Err(BootloadError::InvalidMode);
        }
        if self.state != SessionState::SendingImage {
            return Err(BootloadError::InvalidState(self.state));
        }

        let streamed = {
            let mut sink = BlockingSink {
                session: &mut *self,
                delay: &mut *delay,
            };
            stream_image(flash, layout, &mut sink)
        };
        let crc = match streamed {
            Ok(crc) => crc,
            Err(e) => {
                if e != BootloadError::Aborted {
                    self.cancel(AbortReason::ImageSource);
                }
                return Err(e);
            }
        };
        info!("image crc {}", crc);
        self.image_crc = Some(crc);
        self.finish_blocking(delay)?;
        Ok(crc)
    }

    fn wait_for_acknowledgement<D: DelayNs>(&mut self, delay: &mut D) -> Result<(), BootloadError> {
        let poll_us = self.config.poll_interval_us;
        spin_until(delay, poll_us, || {
            self.poll();
            match self.state {
                SessionState::AwaitingFrameAck | SessionState::AwaitingCompletionAck => None,
                SessionState::SendingImage | SessionState::Done => Some(Ok(())),
                _ => Some(Err(BootloadError::Aborted)),
            }
        })
    }
}

struct BlockingSink<'a, R, H, C, D> {
    session: &'a mut Session<R, H, C>,
    delay: &'a mut D,
}

impl<R, H, C, D> BlockSink for BlockingSink<'_, R, H, C, D>
where
    R: Radio,
    H: Host,
    C: BlockCipher,
    D: DelayNs,
{
    fn send_block(&mut self, block: &SerialBlock) -> Result<(), BootloadError> {
        self.session.send_block_blocking(block, self.delay)
    }
}
