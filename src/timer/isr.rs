use crate::auth::BlockCipher;
use crate::error::BootloadError;
use crate::platform::{Host, Radio};
use crate::session::Session;
use core::cell::RefCell;
use critical_section::Mutex;

/// A global session slot shared between the main loop and an interrupt.
pub type GlobalSession<R, H, C> = Mutex<RefCell<Option<Session<R, H, C>>>>;

/// Used to initialize the global static session slot.
///
/// # Returns
/// * An empty slot
///
/// # Example
/// ```rust,ignore
/// use meshboot::auth::Aes128Cipher;
/// use meshboot::timer::{GlobalSession, global_session_init};
///
/// static BOOTLOAD: GlobalSession<MyRadio, MyHost, Aes128Cipher> = global_session_init();
/// ```
pub const fn global_session_init<R, H, C>() -> GlobalSession<R, H, C> {
    Mutex::new(RefCell::new(None))
}

/// Moves `session` into the global slot.
///
/// # Returns
/// * [`BootloadError::AlreadyInstalled`] if the slot is occupied; only one
///   session may run per node
pub fn install_global_session<R, H, C>(
    slot: &'static GlobalSession<R, H, C>,
    session: Session<R, H, C>,
) -> Result<(), BootloadError> {
    critical_section::with(|cs| {
        let mut cell = slot.borrow(cs).borrow_mut();
        if cell.is_some() {
            return Err(BootloadError::AlreadyInstalled);
        }
        *cell = Some(session);
        Ok(())
    })
}

/// Runs the session tick, if a session is installed.
///
/// # Example
/// ```rust,ignore
/// #[interrupt]
/// fn TIM2() {
///     meshboot::timer::tick_global_session(&BOOTLOAD);
/// }
/// ```
pub fn tick_global_session<R, H, C>(slot: &'static GlobalSession<R, H, C>)
where
    R: Radio,
    H: Host,
    C: BlockCipher,
{
    critical_section::with(|cs| {
        if let Some(session) = slot.borrow(cs).borrow_mut().as_mut() {
            session.tick();
        }
    });
}

/// Runs `f` against the installed session inside a critical section.
///
/// # Returns
/// * `None` if no session is installed
pub fn with_global_session<R, H, C, T>(
    slot: &'static GlobalSession<R, H, C>,
    f: impl FnOnce(&mut Session<R, H, C>) -> T,
) -> Option<T> {
    critical_section::with(|cs| slot.borrow(cs).borrow_mut().as_mut().map(f))
}

/// Empties the slot, handing the session back.
pub fn take_global_session<R, H, C>(
    slot: &'static GlobalSession<R, H, C>,
) -> Option<Session<R, H, C>> {
    critical_section::with(|cs| slot.borrow(cs).borrow_mut().take())
}
