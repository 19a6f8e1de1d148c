//! Mutex and recursive mutex
//!
//! Ownership-tracking locks with timeout. Release hands the lock to
//! the head of the wait queue inside the same critical section that
//! wakes it, so no interloper can acquire in between.
//!
//! The plain mutex treats a second acquisition by the owner as an
//! error; the recursive variant counts nested acquisitions and
//! releases the lock when the count returns to zero. Priority
//! inversion is not mitigated.

use core::cell::UnsafeCell;

use crate::critical::{critical_section, is_isr_context, CriticalSection};
use crate::error::{KernelError, KernelResult};
use crate::kernel;
use crate::sync::{alloc_obj_id, enqueue_waiter, wake_first};
use crate::types::{ObjId, PendStatus, TaskId, Tick, NO_WAIT};

use crate::core::sched::WaitList;

struct MutexState {
    id: Option<ObjId>,
    name: &'static str,
    owner: Option<TaskId>,
    nesting: u32,
    waiters: WaitList,
}

impl MutexState {
    const fn new() -> Self {
        MutexState {
            id: None,
            name: "",
            owner: None,
            nesting: 0,
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

    fn acquire(&mut self, cs: &CriticalSection, timeout: Tick, recursive: bool) -> KernelResult<()> {
        let sched = kernel::sched_mut(cs);
        let cur = sched.current().ok_or(KernelError::NotReady)?;

        if self.owner.is_none() {
            self.owner = Some(cur);
            self.nesting = 1;
            return Ok(());
        }

        if self.owner == Some(cur) {
            if recursive {
                self.nesting = self.nesting.checked_add(1).ok_or(KernelError::Generic)?;
                return Ok(());
            }
            return Err(KernelError::Busy);
        }

        if timeout == NO_WAIT {
            return Err(KernelError::Busy);
        }

        let obj = self.ensure_id();
        enqueue_waiter(&mut self.waiters, sched, obj, cur);
        sched.block_current(obj, timeout);
        kernel::commit_switch(cs);

        // Here after the wake; the releaser made us owner, or the
        // deadline fired
        match kernel::sched_mut(cs).pend_status(cur) {
            PendStatus::Ok => Ok(()),
            PendStatus::Timeout => Err(KernelError::Timeout),
        }
    }

    fn release(&mut self, cs: &CriticalSection) -> KernelResult<()> {
        let sched = kernel::sched_mut(cs);
        let cur = sched.current().ok_or(KernelError::NotReady)?;

        if self.owner != Some(cur) {
            return Err(KernelError::InvalidParam);
        }

        if self.nesting > 1 {
            self.nesting -= 1;
            return Ok(());
        }

        let obj = self.ensure_id();
        match wake_first(&mut self.waiters, sched, obj, PendStatus::Ok) {
            Some(next_owner) => {
                // FIFO hand-off: the woken task owns the lock already
                self.owner = Some(next_owner);
                self.nesting = 1;
                sched.preempt_check();
                kernel::commit_switch(cs);
            }
            None => {
                self.owner = None;
                self.nesting = 0;
            }
        }
        Ok(())
    }
}

/// Mutual exclusion lock
pub struct Mutex {
    state: UnsafeCell<MutexState>,
}

unsafe impl Sync for Mutex {}
unsafe impl Send for Mutex {}

impl Mutex {
    pub const fn new() -> Self {
        Mutex {
            state: UnsafeCell::new(MutexState::new()),
        }
    }

    /// Name the mutex and register its object identity.
    pub fn create(&self, name: &'static str) -> KernelResult<()> {
        if is_isr_context() {
            return Err(KernelError::NotReady);
        }
        critical_section(|_cs| {
            let st = unsafe { &mut *self.state.get() };
            st.name = name;
            st.ensure_id();
            Ok(())
        })
    }

    /// Acquire the lock, waiting at most `timeout` ticks.
    ///
    /// A second acquisition by the owner reports `Busy`; use
    /// [`RecursiveMutex`] where nesting is intended.
    pub fn acquire(&self, timeout: Tick) -> KernelResult<()> {
        if is_isr_context() {
            return Err(KernelError::NotReady);
        }
        critical_section(|cs| {
            let st = unsafe { &mut *self.state.get() };
            st.acquire(cs, timeout, false)
        })
    }

    /// Acquire without blocking.
    pub fn try_acquire(&self) -> KernelResult<()> {
        self.acquire(NO_WAIT)
    }

    /// Release the lock. Only the owner may release; the head waiter
    /// (if any) becomes the new owner atomically.
    pub fn release(&self) -> KernelResult<()> {
        if is_isr_context() {
            return Err(KernelError::NotReady);
        }
        critical_section(|cs| {
            let st = unsafe { &mut *self.state.get() };
            st.release(cs)
        })
    }

    pub fn is_locked(&self) -> bool {
        critical_section(|_cs| unsafe { &*self.state.get() }.owner.is_some())
    }

    pub fn owner(&self) -> Option<TaskId> {
        critical_section(|_cs| unsafe { &*self.state.get() }.owner)
    }

    pub fn name(&self) -> &'static str {
        critical_section(|_cs| unsafe { &*self.state.get() }.name)
    }
}

impl Default for Mutex {
    fn default() -> Self {
        Self::new()
    }
}

/// Mutex permitting nested acquisition by its owner
pub struct RecursiveMutex {
    state: UnsafeCell<MutexState>,
}

unsafe impl Sync for RecursiveMutex {}
unsafe impl Send for RecursiveMutex {}

impl RecursiveMutex {
    pub const fn new() -> Self {
        RecursiveMutex {
            state: UnsafeCell::new(MutexState::new()),
        }
    }

    /// Name the mutex and register its object identity.
    pub fn create(&self, name: &'static str) -> KernelResult<()> {
        if is_isr_context() {
            return Err(KernelError::NotReady);
        }
        critical_section(|_cs| {
            let st = unsafe { &mut *self.state.get() };
            st.name = name;
            st.ensure_id();
            Ok(())
        })
    }

    /// Acquire the lock; the owner may nest acquisitions.
    pub fn acquire(&self, timeout: Tick) -> KernelResult<()> {
        if is_isr_context() {
            return Err(KernelError::NotReady);
        }
        critical_section(|cs| {
            let st = unsafe { &mut *self.state.get() };
            st.acquire(cs, timeout, true)
        })
    }

    /// Acquire without blocking.
    pub fn try_acquire(&self) -> KernelResult<()> {
        self.acquire(NO_WAIT)
    }

    /// Undo one acquisition; the lock is released when the count
    /// returns to zero.
    pub fn release(&self) -> KernelResult<()> {
        if is_isr_context() {
            return Err(KernelError::NotReady);
        }
        critical_section(|cs| {
            let st = unsafe { &mut *self.state.get() };
            st.release(cs)
        })
    }

    /// Current nesting depth.
    pub fn depth(&self) -> u32 {
        critical_section(|_cs| unsafe { &*self.state.get() }.nesting)
    }

    pub fn is_locked(&self) -> bool {
        critical_section(|_cs| unsafe { &*self.state.get() }.owner.is_some())
    }

    pub fn owner(&self) -> Option<TaskId> {
        critical_section(|_cs| unsafe { &*self.state.get() }.owner)
    }

    pub fn name(&self) -> &'static str {
        critical_section(|_cs| unsafe { &*self.state.get() }.name)
    }
}

impl Default for RecursiveMutex {
    fn default() -> Self {
        Self::new()
    }
}
