/// Declares a static global bootload session slot protected by a
/// `critical_section` mutex.
///
/// The main loop installs the session with
/// [`install_global_session`](crate::timer::install_global_session); a timer
/// interrupt or scheduler then drives it with [`tick_bootload_session!`].
///
/// # Arguments
/// - `$name`: name of the static
/// - `$radio`: the concrete [`Radio`](crate::platform::Radio) type
/// - `$host`: the concrete [`Host`](crate::platform::Host) type
/// - `$cipher`: the concrete [`BlockCipher`](crate::auth::BlockCipher) type
///
/// # Example
/// ```rust,ignore
/// declare_bootload_session!(BOOTLOAD, MyRadio, MyHost, meshboot::auth::Aes128Cipher);
/// ```
#[macro_export]
macro_rules! declare_bootload_session {
    ( $name:ident, $radio:ty, $host:ty, $cipher:ty ) => {
        pub static $name: $crate::timer::GlobalSession<$radio, $host, $cipher> =
            $crate::critical_section::Mutex::new(core::cell::RefCell::new(None));
    };
}

/// Calls `tick()` on a global session declared with
/// [`declare_bootload_session!`], if one has been installed.
///
/// # Example
/// ```rust,ignore
/// #[interrupt]
/// fn TIM2() {
///     tick_bootload_session!(BOOTLOAD);
/// }
/// ```
///
/// # Notes
/// - Does nothing until a session is installed.
#[macro_export]
macro_rules! tick_bootload_session {
    ( $name:ident ) => {
        $crate::critical_section::with(|cs| {
            if let Some(session) = $name.borrow(cs).borrow_mut().as_mut() {
                session.tick();
            }
        })
    };
}
