//! Critical section handling
//!
//! All kernel mutable state is protected by a single interrupt mask.
//! Entries nest: a counter increments on entry and decrements on
//! exit; interrupts are restored only when the counter returns to
//! zero. State that lives under the mask is held in a [`CsCell`],
//! which only opens against the guard handed out on entry.

use core::cell::UnsafeCell;
use core::sync::atomic::{AtomicUsize, Ordering};

use crate::port;

/// Critical section nesting depth
static NESTING: AtomicUsize = AtomicUsize::new(0);

/// Interrupt state captured at the outermost entry
static mut SAVED_STATE: bool = false;

/// RAII guard for critical sections
///
/// Creating the guard masks interrupts (at the outermost nesting
/// level); dropping it restores the previous state once the last
/// guard is gone.
pub struct CriticalSection {
    _private: (),
}

impl CriticalSection {
    /// Enter a critical section
    #[inline(always)]
    pub fn enter() -> Self {
        let prev = port::interrupts_disable();
        if NESTING.fetch_add(1, Ordering::Acquire) == 0 {
            // Outermost entry owns the saved interrupt state
            unsafe { SAVED_STATE = prev };
        }
        CriticalSection { _private: () }
    }

    /// Current nesting depth
    #[inline(always)]
    pub fn depth() -> usize {
        NESTING.load(Ordering::Relaxed)
    }

    /// Check if a critical section is active
    #[inline(always)]
    pub fn is_active() -> bool {
        Self::depth() > 0
    }
}

impl Drop for CriticalSection {
    #[inline(always)]
    fn drop(&mut self) {
        if NESTING.fetch_sub(1, Ordering::Release) == 1 {
            let state = unsafe { SAVED_STATE };
            port::interrupts_restore(state);
        }
    }
}

/// Execute a closure with interrupts masked
///
/// The closure receives a reference to the guard, which is the token
/// required to open [`CsCell`] protected data.
#[inline]
pub fn critical_section<F, R>(f: F) -> R
where
    F: FnOnce(&CriticalSection) -> R,
{
    let cs = CriticalSection::enter();
    f(&cs)
}

/// A cell holding kernel state that may only be touched with
/// interrupts masked.
///
/// The guard parameter of [`CsCell::get`] is a proof token: the only
/// way to obtain one is [`CriticalSection::enter`], so every access
/// happens while the nesting counter is nonzero and interrupts are
/// off. The scheduler singleton and the kernel heap both live behind
/// one of these.
pub struct CsCell<T>(UnsafeCell<T>);

unsafe impl<T> Sync for CsCell<T> {}

impl<T> CsCell<T> {
    /// Create a new cell
    #[inline(always)]
    pub const fn new(value: T) -> Self {
        Self(UnsafeCell::new(value))
    }

    /// Borrow the protected state for the duration of the critical
    /// section.
    #[inline(always)]
    #[allow(clippy::mut_from_ref)]
    pub fn get(&self, _cs: &CriticalSection) -> &mut T {
        debug_assert!(CriticalSection::is_active());
        unsafe { &mut *self.0.get() }
    }
}

/// Check if currently executing in an ISR context
#[inline]
pub fn is_isr_context() -> bool {
    #[cfg(target_arch = "arm")]
    {
        let ipsr: u32;
        unsafe {
            core::arch::asm!(
                "mrs {}, IPSR",
                out(reg) ipsr,
                options(nomem, nostack, preserves_flags)
            );
        }
        ipsr != 0
    }

    #[cfg(not(target_arch = "arm"))]
    {
        false
    }
}
