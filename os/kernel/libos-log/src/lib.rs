//! # Host Console Logging
//!
//! The core never owns a console. The module host hands it a printk-style
//! function once at load time; this crate turns that into a `log::Log`
//! backend and a direct [`host_trace!`] macro for places that must not go
//! through the `log` facade (for example while the logger itself is
//! being installed).
//!
//! ```text
//! info!/warn!/...        host_trace!
//!        │                    │
//!   HostLogger::log           │
//!        └──────► ConsoleSink (fn(fmt::Arguments)) ◄── installed by the host
//! ```
//!
//! ## Features
//!
//! * `enabled` (default): records reach the sink. Without it every output
//!   path compiles to a no-op.

#![cfg_attr(not(any(test, doctest)), no_std)]

mod logger;

pub use logger::{ConsoleSink, HostLogger, LoggerError, install_console_sink};

#[doc(hidden)]
pub mod host_fmt {
    use core::fmt;

    #[doc(hidden)]
    #[inline]
    pub fn host_write(args: fmt::Arguments<'_>) {
        #[cfg(feature = "enabled")]
        if let Some(sink) = crate::logger::console_sink() {
            sink(args);
        }
        #[cfg(not(feature = "enabled"))]
        let _ = args;
    }
}

/// Write straight to the host console, bypassing level filtering.
#[macro_export]
macro_rules! host_trace {
    ($($arg:tt)*) => {{
        $crate::host_fmt::host_write(core::format_args!($($arg)*));
    }};
}
