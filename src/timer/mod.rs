//! Deadline timers and tick scheduling.
//!
//! The protocol counts time in periods of [`PERIOD_MS`](crate::consts::PERIOD_MS)
//! milliseconds. An [`ActionTimer`] is armed with a number of periods when a
//! state is entered, counts down once per elapsed period while the session is
//! ticked, and reports [`TimerEvent::Expired`] once it has run out.
//!
//! Contains helpers for polling- and ISR-based scheduling, including:
//! - `ActionTimer`: the period countdown shared by the session and its legacy link
//! - `spin_until`: blocking poll loop over `DelayNs` used by the one blocking send
//! - `install_global_session`, `declare_bootload_session!()` and
//!   `tick_bootload_session!()`: a `critical_section` guarded global session
//!   for interrupt or scheduler driven firmware (feature `global-session`)

mod delay;
pub(crate) use delay::*;

#[cfg(feature = "global-session")]
mod isr;
#[cfg_attr(feature = "global-session", allow(unused_imports))]
#[cfg(feature = "global-session")]
pub use isr::*;

#[cfg(feature = "global-session")]
mod macros;
#[cfg_attr(feature = "global-session", allow(unused_imports))]
#[cfg(feature = "global-session")]
pub use macros::*;

/// What a call to [`ActionTimer::poll`] observed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt-0-3", derive(defmt::Format))]
pub enum TimerEvent {
    /// Less than one period has passed since the last poll that counted.
    Idle,
    /// A period passed and the countdown moved by one.
    Counted,
    /// A period passed with nothing left on the countdown.
    Expired,
}

/// Countdown measured in whole periods of a millisecond clock.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt-0-3", derive(defmt::Format))]
pub struct ActionTimer {
    remaining: u8,
    last_period_ms: u16,
    period_ms: u16,
}

impl ActionTimer {
    /// A disarmed timer counting periods of `period_ms`.
    pub const fn new(period_ms: u16) -> Self {
        Self {
            remaining: 0,
            last_period_ms: 0,
            period_ms,
        }
    }

    /// Sets the countdown to `periods`.
    pub fn arm(&mut self, periods: u8) {
        self.remaining = periods;
    }

    /// Makes the next elapsed period expire the timer.
    pub fn expire_now(&mut self) {
        self.remaining = 0;
    }

    /// Periods left before the timer expires.
    pub fn remaining(&self) -> u8 {
        self.remaining
    }

    /// Advances the countdown if a full period passed since the last count.
    ///
    /// # Arguments
    /// * `now_ms` - wrapping millisecond clock
    pub fn poll(&mut self, now_ms: u16) -> TimerEvent {
        if now_ms.wrapping_sub(self.last_period_ms) <= self.period_ms {
            return TimerEvent::Idle;
        }
        self.last_period_ms = now_ms;
        if self.remaining == 0 {
            TimerEvent::Expired
        } else {
            self.remaining -= 1;
            TimerEvent::Counted
        }
    }
}
