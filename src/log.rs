//! Kernel diagnostics
//!
//! Every kernel log line goes through [`klog!`]: one single-line
//! message per event (task registration, heap corruption, stack
//! overflow, ...) tagged with a severity. With the `defmt` feature
//! the lines reach the defmt transport, timestamped with the system
//! tick; without it the macro compiles away and the call sites cost
//! nothing.

/// Emit one kernel log line at the given severity.
///
/// The first argument selects the severity (`debug`, `info`, `warn`,
/// or `error`); the rest is a defmt format string and its arguments.
///
/// ```ignore
/// crate::klog!(error, "stack overflow in task '{=str}'", name);
/// ```
#[cfg(feature = "defmt")]
#[macro_export]
macro_rules! klog {
    (debug, $($arg:tt)*) => { defmt::debug!($($arg)*) };
    (info, $($arg:tt)*) => { defmt::info!($($arg)*) };
    (warn, $($arg:tt)*) => { defmt::warn!($($arg)*) };
    (error, $($arg:tt)*) => { defmt::error!($($arg)*) };
}

/// No-op rendition when logging is disabled
#[cfg(not(feature = "defmt"))]
#[macro_export]
macro_rules! klog {
    ($level:ident, $($arg:tt)*) => {};
}
