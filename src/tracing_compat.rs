//! Optional tracing integration.
//!
//! With the `tracing-integration` feature enabled these macros forward to
//! [`tracing`]; without it they compile to nothing.

#[cfg(feature = "tracing-integration")]
macro_rules! rt_trace {
    ($($arg:tt)*) => { tracing::trace!($($arg)*) };
}

#[cfg(not(feature = "tracing-integration"))]
macro_rules! rt_trace {
    ($($arg:tt)*) => {};
}

#[cfg(feature = "tracing-integration")]
macro_rules! rt_debug {
    ($($arg:tt)*) => { tracing::debug!($($arg)*) };
}

#[cfg(not(feature = "tracing-integration"))]
macro_rules! rt_debug {
    ($($arg:tt)*) => {};
}

pub(crate) use {rt_debug, rt_trace};
