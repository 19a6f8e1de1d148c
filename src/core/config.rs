//! Compile-time configuration
//!
//! These constants control the behavior and resource limits of the
//! kernel.

use crate::types::Tick;

/// Upper bound of concurrent tasks, not counting the builtin idle task
pub const MAX_TASKS: usize = 16;

/// Software timer capacity
pub const MAX_TIMERS: usize = 32;

/// Round-robin time quantum in ticks
pub const TIME_SLICE_TICKS: Tick = 10;

/// Minimum task stack size in bytes
pub const STACK_MIN: usize = 256;

/// Default task stack size in bytes
pub const STACK_DEFAULT: usize = 512;

/// Maximum task stack size in bytes
pub const STACK_MAX: usize = 2048;

/// Byte pattern the stack area is filled with at creation
pub const STACK_FILL_BYTE: u8 = 0xA5;

/// Number of low-end stack bytes inspected for overflow detection
pub const STACK_GUARD_BYTES: usize = 16;

/// Heap payload alignment in bytes
pub const HEAP_ALIGNMENT: usize = 8;

/// Smallest payload worth splitting a heap block for
pub const HEAP_MIN_BLOCK: usize = 16;

/// Magic word stamped into every heap block header
pub const HEAP_MAGIC: u32 = 0xDEAD_BEEF;

/// Size of the kernel heap arena in bytes
pub const KERNEL_HEAP_SIZE: usize = 64 * 1024;

/// System tick rate in Hz
pub const TICK_RATE_HZ: u32 = 1000;

/// CPU core clock in Hz, used to program the tick source
pub const CPU_CLOCK_HZ: u32 = 16_000_000;
