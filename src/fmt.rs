//! Logging shims.
//!
//! Forwards to `defmt` when `defmt-0-3` is enabled, otherwise to `log` when
//! `log` is enabled. With neither, the macros compile to nothing but still
//! borrow their arguments.

#![allow(unused_macros)]

macro_rules! log_dispatch {
    ($level:ident, $s:literal $(, $x:expr)* $(,)?) => {{
        #[cfg(feature = "defmt-0-3")]
        ::defmt::$level!($s $(, $x)*);
        #[cfg(all(feature = "log", not(feature = "defmt-0-3")))]
        ::log::$level!($s $(, $x)*);
        #[cfg(not(any(feature = "log", feature = "defmt-0-3")))]
        let _ = ($( & $x ),*);
    }};
}

macro_rules! trace {
    ($($arg:tt)*) => { log_dispatch!(trace, $($arg)*) };
}

macro_rules! debug {
    ($($arg:tt)*) => { log_dispatch!(debug, $($arg)*) };
}

macro_rules! info {
    ($($arg:tt)*) => { log_dispatch!(info, $($arg)*) };
}

macro_rules! warn {
    ($($arg:tt)*) => { log_dispatch!(warn, $($arg)*) };
}

macro_rules! error {
    ($($arg:tt)*) => { log_dispatch!(error, $($arg)*) };
}
