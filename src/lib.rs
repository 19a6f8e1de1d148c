//! Kestrel: a small preemptive RTOS kernel
//!
//! A real-time kernel for 32-bit microcontrollers providing:
//! - A task scheduler with round-robin, priority, and cooperative policies
//! - Inter-task synchronization (mutexes, semaphores, message queues)
//! - Software timers driven by the periodic system tick
//! - A deterministic first-fit heap and a fixed-block object pool
//!
//! The hardware-facing surface is confined to the `port` module; on
//! non-ARM targets a stub port is compiled in so the kernel state
//! machine can be exercised by host tests.

#![no_std]
#![deny(unsafe_op_in_unsafe_fn)]

// ============ Critical Section ============

#[cfg(target_arch = "arm")]
mod cs_impl {
    use cortex_m::interrupt;
    use cortex_m::register::primask;
    use critical_section::{set_impl, Impl, RawRestoreState};

    struct SingleCoreCriticalSection;
    set_impl!(SingleCoreCriticalSection);

    unsafe impl Impl for SingleCoreCriticalSection {
        unsafe fn acquire() -> RawRestoreState {
            let was_active = primask::read().is_active();
            interrupt::disable();
            was_active
        }

        unsafe fn release(was_active: RawRestoreState) {
            if was_active {
                unsafe { interrupt::enable() }
            }
        }
    }
}

// ============ Modules ============

pub mod log;
mod lang_items;

pub mod core;
pub mod mem;
pub mod port;
pub mod sync;

// ============ Re-exports ============

pub use crate::core::config;
pub use crate::core::config::*;
pub use crate::core::critical;
pub use crate::core::error;
pub use crate::core::error::{KernelError, KernelResult};
pub use crate::core::kernel;
pub use crate::core::sched;
pub use crate::core::sched::Scheduler;
pub use crate::core::task;
pub use crate::core::task::TaskParams;
pub use crate::core::time;
pub use crate::core::timer;
pub use crate::core::types;
pub use crate::core::types::*;

pub use crate::sync::mutex::{Mutex, RecursiveMutex};
pub use crate::sync::queue::MessageQueue;
pub use crate::sync::sem::Semaphore;
