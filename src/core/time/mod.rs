//! Time management
//!
//! The tick entry point invoked from the periodic tick interrupt,
//! and tick-based time queries. Delays live in the task API; the
//! tick handler here advances the whole kernel state machine.

use crate::config::TICK_RATE_HZ;
use crate::critical::critical_section;
use crate::kernel;
use crate::types::Tick;

/// Current system tick count.
pub fn now() -> Tick {
    critical_section(|cs| kernel::sched_mut(cs).tick_count())
}

/// Convert milliseconds to ticks, rounding up.
pub fn ms_to_ticks(ms: u32) -> Tick {
    let num = (ms as u64) * (TICK_RATE_HZ as u64);
    num.div_ceil(1000) as Tick
}

/// System tick handler.
///
/// Advances the tick counter, wakes expired delays and timeouts,
/// evaluates software timers, and applies the time-slice policy.
/// Called from the tick interrupt on hardware; host tests call it
/// directly to advance virtual time.
pub fn tick() {
    if !kernel::is_running() {
        return;
    }
    critical_section(|cs| {
        kernel::sched_mut(cs).on_tick();
        kernel::commit_switch(cs);
    });
}

/// SysTick interrupt handler
#[cfg(target_arch = "arm")]
#[no_mangle]
pub extern "C" fn SysTick() {
    tick();
}
