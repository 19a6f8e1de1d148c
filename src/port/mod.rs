//! Port layer: CPU-specific hooks
//!
//! The kernel reaches the hardware through this interface only:
//! `stack_init`, `tick_enable`, `yield_request`,
//! `interrupts_disable`/`interrupts_restore`, and
//! `wait_for_interrupt`, plus the one-time `start_first_task`.
//!
//! On non-ARM targets a stub port is compiled instead: interrupts
//! and context switches become no-ops, which lets host tests drive
//! the scheduler state machine directly.

#[cfg(target_arch = "arm")]
pub mod cortex_m4;

#[cfg(target_arch = "arm")]
pub use cortex_m4::*;

#[cfg(not(target_arch = "arm"))]
pub mod stub {
    use crate::types::{StackElement, TaskEntry};

    /// Saved interrupt state; meaningless on the host
    pub type IntState = bool;

    /// Program the periodic tick source. No-op on the host; tests
    /// advance time by calling `time::tick`.
    pub fn tick_enable(_rate_hz: u32, _cpu_clock_hz: u32) {}

    /// Request a deferred context switch. No-op on the host; the
    /// scheduler's logical selection already happened.
    pub fn yield_request() {}

    pub fn interrupts_disable() -> IntState {
        false
    }

    pub fn interrupts_restore(_state: IntState) {}

    pub fn wait_for_interrupt() {}

    /// Fabricate an initial frame. The host never executes task
    /// code, so the saved stack pointer is simply the aligned top.
    ///
    /// # Safety
    /// `stack_top` must point one past a writable stack region.
    pub unsafe fn stack_init(
        stack_top: *mut StackElement,
        _entry: TaskEntry,
        _param: *mut (),
    ) -> *mut StackElement {
        ((stack_top as usize) & !7) as *mut StackElement
    }

    /// Hand control to the first task. Returns on the host so a test
    /// harness can keep driving the kernel.
    ///
    /// # Safety
    /// Must only be called by `kernel::start`.
    pub unsafe fn start_first_task() {}
}

#[cfg(not(target_arch = "arm"))]
pub use stub::*;
