use embedded_hal::delay::DelayNs;

/// Runs `step` until it produces a value, sleeping `poll_us` between attempts.
///
/// This is a simple blocking loop for the few places where the protocol has
/// to stall the caller until the peer answers. `step` is responsible for
/// eventually returning `Some`, typically because a deadline it drives ran
/// out.
///
/// # Arguments
/// - `delay`: A delay provider implementing `DelayNs`, typically from the HAL.
/// - `poll_us`: The delay between each attempt, in microseconds.
/// - `step`: One polling pass.
///
/// # Notes
/// - Nothing else in the firmware runs while this loops, apart from what
///   `step` itself calls.
pub(crate) fn spin_until<D, T, F>(delay: &mut D, poll_us: u32, mut step: F) -> T
where
    D: DelayNs,
    F: FnMut() -> Option<T>,
{
    loop {
        if let Some(done) = step() {
            return done;
        }
        delay.delay_us(poll_us);
    }
}
