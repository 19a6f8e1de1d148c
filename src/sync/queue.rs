//! Message queues
//!
//! Typed FIFO with blocking send and receive over a bounded ring.
//! Receivers wait only while the queue is empty, senders only while
//! it is full; wait queues are strict FIFO. A woken sender retries
//! its push once, so a lost race against another producer reports
//! `Full` rather than spinning.

use core::cell::UnsafeCell;

use crate::core::sched::WaitList;
use crate::critical::{critical_section, is_isr_context, CriticalSection};
use crate::error::{KernelError, KernelResult};
use crate::kernel;
use crate::mem::ring::BoundedRing;
use crate::sync::{alloc_obj_id, enqueue_waiter, wake_first};
use crate::types::{ObjId, PendStatus, Tick, NO_WAIT};

struct QueueState<T, const N: usize> {
    id: Option<ObjId>,
    name: &'static str,
    ring: BoundedRing<T, N>,
    rx_waiters: WaitList,
    tx_waiters: WaitList,
}

impl<T, const N: usize> QueueState<T, N> {
    const fn new() -> Self {
        QueueState {
            id: None,
            name: "",
            ring: BoundedRing::new(),
            rx_waiters: WaitList::new(),
            tx_waiters: WaitList::new(),
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

    fn send(&mut self, cs: &CriticalSection, item: T, timeout: Tick) -> KernelResult<()> {
        let item = match self.ring.push_back(item) {
            Ok(()) => {
                // A receiver may be waiting on the formerly-empty
                // queue; it dequeues after it resumes
                let sched = kernel::sched_mut(cs);
                let obj = self.ensure_id();
                if wake_first(&mut self.rx_waiters, sched, obj, PendStatus::Ok).is_some() {
                    sched.preempt_check();
                    kernel::commit_switch(cs);
                }
                return Ok(());
            }
            Err(item) => item,
        };

        if timeout == NO_WAIT {
            return Err(KernelError::Full);
        }

        let sched = kernel::sched_mut(cs);
        let cur = sched.current().ok_or(KernelError::NotReady)?;
        let obj = self.ensure_id();
        enqueue_waiter(&mut self.tx_waiters, sched, obj, cur);
        sched.block_current(obj, timeout);
        kernel::commit_switch(cs);

        if kernel::sched_mut(cs).pend_status(cur) == PendStatus::Timeout {
            return Err(KernelError::Timeout);
        }
        // Woken by a consumer dequeue; retry the push once
        self.ring.push_back(item).map_err(|_| KernelError::Full)
    }

    fn receive(&mut self, cs: &CriticalSection, timeout: Tick) -> KernelResult<T> {
        if let Some(item) = self.ring.pop_front() {
            // Space opened up for the first blocked sender
            let sched = kernel::sched_mut(cs);
            let obj = self.ensure_id();
            if wake_first(&mut self.tx_waiters, sched, obj, PendStatus::Ok).is_some() {
                sched.preempt_check();
                kernel::commit_switch(cs);
            }
            return Ok(item);
        }

        if timeout == NO_WAIT {
            return Err(KernelError::Empty);
        }

        let sched = kernel::sched_mut(cs);
        let cur = sched.current().ok_or(KernelError::NotReady)?;
        let obj = self.ensure_id();
        enqueue_waiter(&mut self.rx_waiters, sched, obj, cur);
        sched.block_current(obj, timeout);
        kernel::commit_switch(cs);

        if kernel::sched_mut(cs).pend_status(cur) == PendStatus::Timeout {
            return Err(KernelError::Timeout);
        }
        self.ring.pop_front().ok_or(KernelError::Empty)
    }
}

/// Bounded FIFO for inter-task messages
pub struct MessageQueue<T, const N: usize> {
    state: UnsafeCell<QueueState<T, N>>,
}

unsafe impl<T: Send, const N: usize> Sync for MessageQueue<T, N> {}
unsafe impl<T: Send, const N: usize> Send for MessageQueue<T, N> {}

impl<T, const N: usize> MessageQueue<T, N> {
    pub const fn new() -> Self {
        MessageQueue {
            state: UnsafeCell::new(QueueState::new()),
        }
    }

    /// Name the queue and register its object identity.
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

    /// Enqueue a message, waiting at most `timeout` ticks for space.
    pub fn send(&self, item: T, timeout: Tick) -> KernelResult<()> {
        if is_isr_context() && timeout != NO_WAIT {
            return Err(KernelError::NotReady);
        }
        critical_section(|cs| {
            let st = unsafe { &mut *self.state.get() };
            st.send(cs, item, timeout)
        })
    }

    /// Enqueue without blocking.
    pub fn try_send(&self, item: T) -> KernelResult<()> {
        self.send(item, NO_WAIT)
    }

    /// Dequeue a message, waiting at most `timeout` ticks for one.
    pub fn receive(&self, timeout: Tick) -> KernelResult<T> {
        if is_isr_context() && timeout != NO_WAIT {
            return Err(KernelError::NotReady);
        }
        critical_section(|cs| {
            let st = unsafe { &mut *self.state.get() };
            st.receive(cs, timeout)
        })
    }

    /// Dequeue without blocking.
    pub fn try_receive(&self) -> KernelResult<T> {
        self.receive(NO_WAIT)
    }

    /// Copy of the head message, if any.
    pub fn peek(&self) -> Option<T>
    where
        T: Copy,
    {
        critical_section(|_cs| {
            let st = unsafe { &*self.state.get() };
            st.ring.peek_front().copied()
        })
    }

    /// Number of queued messages.
    pub fn len(&self) -> usize {
        critical_section(|_cs| unsafe { &*self.state.get() }.ring.len())
    }

    /// Capacity in messages.
    pub fn capacity(&self) -> usize {
        N
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn is_full(&self) -> bool {
        self.len() == N
    }

    /// Drop every queued message.
    pub fn clear(&self) {
        critical_section(|_cs| {
            let st = unsafe { &mut *self.state.get() };
            st.ring.clear();
        })
    }

    pub fn name(&self) -> &'static str {
        critical_section(|_cs| unsafe { &*self.state.get() }.name)
    }
}

impl<T, const N: usize> Default for MessageQueue<T, N> {
    fn default() -> Self {
        Self::new()
    }
}
