//! Software timers
//!
//! Timers are evaluated on every system tick. Callbacks run in the
//! tick path with interrupts masked and must not block.

use core::num::NonZeroU32;

use crate::config::MAX_TIMERS;
use crate::critical::critical_section;
use crate::error::{KernelError, KernelResult};
use crate::kernel;
use crate::types::Tick;

/// Opaque, nonzero timer handle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimerHandle(NonZeroU32);

impl TimerHandle {
    /// Raw handle value
    #[inline]
    pub fn get(self) -> u32 {
        self.0.get()
    }
}

/// Callback invoked when a timer expires
pub type TimerCallback = fn(TimerHandle, *mut ());

/// Timer firing behavior
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimerKind {
    /// Fires once, then stops
    OneShot,
    /// Fires repeatedly at a fixed period
    Periodic,
}

/// Timer lifecycle state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimerState {
    Stopped,
    Running,
    /// Transient state visible to the callback at the moment of
    /// firing
    Expired,
}

/// One timer slot
struct TimerCb {
    handle: TimerHandle,
    name: &'static str,
    kind: TimerKind,
    state: TimerState,
    period: Tick,
    remaining: Tick,
    callback: Option<TimerCallback>,
    user: *mut (),
    expiry_count: u32,
}

/// Aggregate timer statistics
#[derive(Debug, Clone, Copy, Default)]
pub struct TimerStats {
    pub total_timers: u32,
    pub active_timers: u32,
    pub stopped_timers: u32,
    pub total_callbacks: u32,
    pub missed_callbacks: u32,
}

const NO_TIMER: Option<TimerCb> = None;

/// Fixed-capacity timer table
pub struct TimerManager {
    timers: [Option<TimerCb>; MAX_TIMERS],
    next_handle: u32,
    total_callbacks: u32,
    missed_callbacks: u32,
}

impl TimerManager {
    /// Create an empty manager
    pub const fn new() -> Self {
        TimerManager {
            timers: [NO_TIMER; MAX_TIMERS],
            next_handle: 1,
            total_callbacks: 0,
            missed_callbacks: 0,
        }
    }

    /// Create a timer in the STOPPED state.
    ///
    /// Fails with `Full` at capacity and `InvalidParam` on a zero
    /// period or missing callback.
    pub fn create(
        &mut self,
        name: &'static str,
        period: Tick,
        kind: TimerKind,
        callback: Option<TimerCallback>,
        user: *mut (),
    ) -> KernelResult<TimerHandle> {
        if period == 0 || callback.is_none() {
            return Err(KernelError::InvalidParam);
        }

        let slot = self
            .timers
            .iter_mut()
            .find(|s| s.is_none())
            .ok_or(KernelError::Full)?;

        let handle = TimerHandle(
            NonZeroU32::new(self.next_handle).ok_or(KernelError::Generic)?,
        );
        self.next_handle = self.next_handle.wrapping_add(1).max(1);

        *slot = Some(TimerCb {
            handle,
            name,
            kind,
            state: TimerState::Stopped,
            period,
            remaining: period,
            callback,
            user,
            expiry_count: 0,
        });

        crate::klog!(debug, "timer '{=str}' created, period {=u32}", name, period);
        Ok(handle)
    }

    /// Remove a timer entirely.
    pub fn destroy(&mut self, handle: TimerHandle) -> KernelResult<()> {
        let slot = self
            .timers
            .iter_mut()
            .find(|s| s.as_ref().is_some_and(|t| t.handle == handle))
            .ok_or(KernelError::NotFound)?;
        *slot = None;
        Ok(())
    }

    /// Start a timer: RUNNING with a full period ahead of it.
    pub fn start(&mut self, handle: TimerHandle) -> KernelResult<()> {
        let t = self.find_mut(handle)?;
        if t.state != TimerState::Running {
            t.remaining = t.period;
            t.state = TimerState::Running;
        }
        Ok(())
    }

    /// Stop a timer; `remaining` is preserved.
    pub fn stop(&mut self, handle: TimerHandle) -> KernelResult<()> {
        let t = self.find_mut(handle)?;
        t.state = TimerState::Stopped;
        Ok(())
    }

    /// Restart a timer from a full period, regardless of its state.
    pub fn reset(&mut self, handle: TimerHandle) -> KernelResult<()> {
        let t = self.find_mut(handle)?;
        t.remaining = t.period;
        t.state = TimerState::Running;
        Ok(())
    }

    /// Change the period. A RUNNING timer restarts its countdown at
    /// the new period.
    pub fn change_period(&mut self, handle: TimerHandle, new_period: Tick) -> KernelResult<()> {
        if new_period == 0 {
            return Err(KernelError::InvalidParam);
        }
        let t = self.find_mut(handle)?;
        t.period = new_period;
        if t.state == TimerState::Running {
            t.remaining = new_period;
        }
        Ok(())
    }

    /// Whether the timer is counting down.
    pub fn is_active(&self, handle: TimerHandle) -> bool {
        self.find(handle)
            .map(|t| t.state == TimerState::Running)
            .unwrap_or(false)
    }

    /// Ticks left until the next expiry.
    pub fn remaining(&self, handle: TimerHandle) -> KernelResult<Tick> {
        self.find(handle).map(|t| t.remaining).ok_or(KernelError::NotFound)
    }

    /// Timer name.
    pub fn name(&self, handle: TimerHandle) -> KernelResult<&'static str> {
        self.find(handle).map(|t| t.name).ok_or(KernelError::NotFound)
    }

    /// Number of expiries so far.
    pub fn expiry_count(&self, handle: TimerHandle) -> KernelResult<u32> {
        self.find(handle).map(|t| t.expiry_count).ok_or(KernelError::NotFound)
    }

    /// Aggregate statistics.
    pub fn stats(&self) -> TimerStats {
        let mut stats = TimerStats {
            total_callbacks: self.total_callbacks,
            missed_callbacks: self.missed_callbacks,
            ..TimerStats::default()
        };
        for t in self.timers.iter().flatten() {
            stats.total_timers += 1;
            match t.state {
                TimerState::Running => stats.active_timers += 1,
                TimerState::Stopped => stats.stopped_timers += 1,
                TimerState::Expired => {}
            }
        }
        stats
    }

    /// Advance every RUNNING timer by one tick, firing those that
    /// reach zero.
    pub fn on_tick(&mut self) {
        for slot in self.timers.iter_mut() {
            let Some(t) = slot.as_mut() else { continue };
            if t.state != TimerState::Running {
                continue;
            }

            if t.remaining > 0 {
                t.remaining -= 1;
            }
            if t.remaining > 0 {
                continue;
            }

            t.state = TimerState::Expired;
            t.expiry_count = t.expiry_count.wrapping_add(1);

            match t.callback {
                Some(cb) => {
                    self.total_callbacks = self.total_callbacks.wrapping_add(1);
                    cb(t.handle, t.user);
                }
                None => {
                    self.missed_callbacks = self.missed_callbacks.wrapping_add(1);
                }
            }

            match t.kind {
                TimerKind::Periodic => {
                    t.remaining = t.period;
                    t.state = TimerState::Running;
                }
                TimerKind::OneShot => {
                    t.state = TimerState::Stopped;
                }
            }
        }
    }

    fn find(&self, handle: TimerHandle) -> Option<&TimerCb> {
        self.timers
            .iter()
            .flatten()
            .find(|t| t.handle == handle)
    }

    fn find_mut(&mut self, handle: TimerHandle) -> KernelResult<&mut TimerCb> {
        self.timers
            .iter_mut()
            .flatten()
            .find(|t| t.handle == handle)
            .ok_or(KernelError::NotFound)
    }
}

impl Default for TimerManager {
    fn default() -> Self {
        Self::new()
    }
}

// ============ Global timer API ============

/// Create a software timer on the kernel timer table.
pub fn create(
    name: &'static str,
    period: Tick,
    kind: TimerKind,
    callback: TimerCallback,
    user: *mut (),
) -> KernelResult<TimerHandle> {
    critical_section(|cs| {
        kernel::sched_mut(cs)
            .timers_mut()
            .create(name, period, kind, Some(callback), user)
    })
}

/// Remove a timer.
pub fn destroy(handle: TimerHandle) -> KernelResult<()> {
    critical_section(|cs| kernel::sched_mut(cs).timers_mut().destroy(handle))
}

/// Start a timer.
pub fn start(handle: TimerHandle) -> KernelResult<()> {
    critical_section(|cs| kernel::sched_mut(cs).timers_mut().start(handle))
}

/// Stop a timer, preserving its remaining count.
pub fn stop(handle: TimerHandle) -> KernelResult<()> {
    critical_section(|cs| kernel::sched_mut(cs).timers_mut().stop(handle))
}

/// Restart a timer from a full period.
pub fn reset(handle: TimerHandle) -> KernelResult<()> {
    critical_section(|cs| kernel::sched_mut(cs).timers_mut().reset(handle))
}

/// Change a timer's period.
pub fn change_period(handle: TimerHandle, new_period: Tick) -> KernelResult<()> {
    critical_section(|cs| kernel::sched_mut(cs).timers_mut().change_period(handle, new_period))
}

/// Whether a timer is counting down.
pub fn is_active(handle: TimerHandle) -> bool {
    critical_section(|cs| kernel::sched_mut(cs).timers().is_active(handle))
}

/// Ticks until the next expiry.
pub fn remaining(handle: TimerHandle) -> KernelResult<Tick> {
    critical_section(|cs| kernel::sched_mut(cs).timers().remaining(handle))
}

/// Number of expiries so far.
pub fn expiry_count(handle: TimerHandle) -> KernelResult<u32> {
    critical_section(|cs| kernel::sched_mut(cs).timers().expiry_count(handle))
}

/// Aggregate timer statistics.
pub fn stats() -> TimerStats {
    critical_section(|cs| kernel::sched_mut(cs).timers().stats())
}
