//! Kernel error codes
//!
//! Every fallible kernel operation returns `KernelResult`. There is
//! no non-local control transfer on error anywhere in the kernel.

/// Error code returned by kernel operations
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum KernelError {
    /// Out of memory
    Nomem = 1,
    /// Invalid parameter (null handle, out-of-range size, non-owner
    /// unlock, ...)
    InvalidParam = 2,
    /// Operation timed out
    Timeout = 3,
    /// Resource not found
    NotFound = 4,
    /// Resource already exists
    AlreadyExists = 5,
    /// Resource busy, or a non-blocking attempt that would block
    Busy = 6,
    /// Subsystem not ready, or operation invoked from the wrong
    /// context
    NotReady = 7,
    /// I/O error
    Io = 8,
    /// Container full
    Full = 9,
    /// Container empty
    Empty = 10,
    /// Integrity failure; details are logged
    Generic = 11,
}

/// Result type alias for kernel operations
pub type KernelResult<T> = Result<T, KernelError>;

impl KernelError {
    /// Whether the error represents an expected outcome of a
    /// non-blocking or time-bounded operation
    #[inline]
    pub fn is_contention(self) -> bool {
        matches!(self, KernelError::Busy | KernelError::Timeout)
    }
}

#[cfg(feature = "defmt")]
impl defmt::Format for KernelError {
    fn format(&self, fmt: defmt::Formatter) {
        defmt::write!(fmt, "{}", *self as u8);
    }
}
