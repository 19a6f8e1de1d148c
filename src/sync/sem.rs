//! Semaphores
//!
//! Binary and counting semaphores with timeout. A give with waiters
//! hands the unit directly to the head of the wait queue: the count
//! is not incremented and the woken taker does not re-decrement it.

use core::cell::UnsafeCell;

use crate::core::sched::WaitList;
use crate::critical::{critical_section, is_isr_context, CriticalSection};
use crate::error::{KernelError, KernelResult};
use crate::kernel;
use crate::sync::{alloc_obj_id, enqueue_waiter, wake_first};
use crate::types::{ObjId, PendStatus, Tick, NO_WAIT};

/// Semaphore flavor
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SemKind {
    /// Degenerate counting semaphore with `max == 1`
    Binary,
    Counting,
}

struct SemState {
    id: Option<ObjId>,
    name: &'static str,
    kind: SemKind,
    count: u32,
    max: u32,
    waiters: WaitList,
}

impl SemState {
    const fn new() -> Self {
        SemState {
            id: None,
            name: "",
            kind: SemKind::Counting,
            count: 0,
            max: 0,
            waiters: WaitList::new(),
        }
    }

    fn ensure_id(&mut self) -> ObjId {
        match self.id {
            Some(id) => id,
            None => {
                let id = alloc_obj_id();
                self.id = Some(id);
                id
            }
        }
    }

    fn take(&mut self, cs: &CriticalSection, timeout: Tick) -> KernelResult<()> {
        if self.count > 0 {
            self.count -= 1;
            return Ok(());
        }

        if timeout == NO_WAIT {
            return Err(KernelError::Busy);
        }

        let sched = kernel::sched_mut(cs);
        let cur = sched.current().ok_or(KernelError::NotReady)?;
        let obj = self.ensure_id();
        enqueue_waiter(&mut self.waiters, sched, obj, cur);
        sched.block_current(obj, timeout);
        kernel::commit_switch(cs);

        match kernel::sched_mut(cs).pend_status(cur) {
            // The giver transferred our unit by waking us
            PendStatus::Ok => Ok(()),
            PendStatus::Timeout => Err(KernelError::Timeout),
        }
    }

    fn give(&mut self, cs: &CriticalSection) -> KernelResult<()> {
        if self.count >= self.max {
            return Err(KernelError::Full);
        }

        let sched = kernel::sched_mut(cs);
        let obj = self.ensure_id();
        if wake_first(&mut self.waiters, sched, obj, PendStatus::Ok).is_some() {
            // Unit consumed by the woken waiter; count unchanged
            sched.preempt_check();
            kernel::commit_switch(cs);
        } else {
            self.count += 1;
        }
        Ok(())
    }
}

/// Counting or binary semaphore
pub struct Semaphore {
    state: UnsafeCell<SemState>,
}

unsafe impl Sync for Semaphore {}
unsafe impl Send for Semaphore {}

impl Semaphore {
    /// A semaphore that rejects every operation until one of the
    /// `create_*` calls configures it.
    pub const fn new() -> Self {
        Semaphore {
            state: UnsafeCell::new(SemState::new()),
        }
    }

    /// Configure as a binary semaphore.
    pub fn create_binary(&self, initially_available: bool, name: &'static str) -> KernelResult<()> {
        if is_isr_context() {
            return Err(KernelError::NotReady);
        }
        critical_section(|_cs| {
            let st = unsafe { &mut *self.state.get() };
            st.name = name;
            st.kind = SemKind::Binary;
            st.max = 1;
            st.count = initially_available as u32;
            st.ensure_id();
            Ok(())
        })
    }

    /// Configure as a counting semaphore.
    pub fn create_counting(&self, max: u32, initial: u32, name: &'static str) -> KernelResult<()> {
        if is_isr_context() {
            return Err(KernelError::NotReady);
        }
        if max == 0 || initial > max {
            return Err(KernelError::InvalidParam);
        }
        critical_section(|_cs| {
            let st = unsafe { &mut *self.state.get() };
            st.name = name;
            st.kind = SemKind::Counting;
            st.max = max;
            st.count = initial;
            st.ensure_id();
            Ok(())
        })
    }

    /// Take one unit, waiting at most `timeout` ticks.
    pub fn take(&self, timeout: Tick) -> KernelResult<()> {
        if is_isr_context() {
            return Err(KernelError::NotReady);
        }
        critical_section(|cs| {
            let st = unsafe { &mut *self.state.get() };
            st.take(cs, timeout)
        })
    }

    /// Take without blocking.
    pub fn try_take(&self) -> KernelResult<()> {
        self.take(NO_WAIT)
    }

    /// Release one unit, or hand it to the first waiter. Reports
    /// `Full` when the count already sits at its maximum.
    pub fn give(&self) -> KernelResult<()> {
        critical_section(|cs| {
            let st = unsafe { &mut *self.state.get() };
            st.give(cs)
        })
    }

    /// Current count.
    pub fn count(&self) -> u32 {
        critical_section(|_cs| unsafe { &*self.state.get() }.count)
    }

    /// Binary or counting.
    pub fn kind(&self) -> SemKind {
        critical_section(|_cs| unsafe { &*self.state.get() }.kind)
    }

    pub fn name(&self) -> &'static str {
        critical_section(|_cs| unsafe { &*self.state.get() }.name)
    }
}

impl Default for Semaphore {
    fn default() -> Self {
        Self::new()
    }
}
