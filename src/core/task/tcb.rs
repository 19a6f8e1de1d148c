//! Task Control Block
//!
//! The record that describes one schedulable activity. The saved
//! stack pointer sits at offset 0; the context-switch code in the
//! port addresses it by that offset.

use crate::config::{STACK_FILL_BYTE, STACK_GUARD_BYTES};
use crate::types::{
    ObjId, PendStatus, StackElement, TaskEntry, TaskId, TaskPriority, TaskState, Tick,
};

/// Task Control Block
#[repr(C)]
pub struct Tcb {
    /// Saved stack pointer; offset 0, see module docs
    pub(crate) stack_ptr: *mut StackElement,

    // ============ Identification ============
    /// Stable identifier assigned at registration
    pub id: TaskId,
    /// Short task name
    pub name: &'static str,

    // ============ Entry ============
    pub(crate) entry: TaskEntry,
    pub(crate) param: *mut (),

    // ============ Stack region ============
    /// Base (lowest address) of the stack region
    pub(crate) stack_base: *mut u8,
    /// Stack size in bytes
    pub(crate) stack_size: usize,

    // ============ Scheduling state ============
    pub state: TaskState,
    pub priority: TaskPriority,
    /// Remaining round-robin slice
    pub(crate) time_slice: Tick,
    /// Absolute wake tick while BLOCKED with a deadline
    pub(crate) wake_tick: Option<Tick>,

    // ============ Pend bookkeeping ============
    /// Object this task is blocked on, if any
    pub(crate) pend_on: Option<ObjId>,
    /// Outcome of the last blocking wait
    pub(crate) pend_status: PendStatus,

    // ============ Statistics ============
    /// Times the task entered RUNNING
    pub run_count: u32,
    /// Ticks spent RUNNING
    pub total_runtime: Tick,
}

impl Tcb {
    /// Create a TCB with no stack attached.
    ///
    /// The scheduler assigns the id on registration; `task::create`
    /// attaches a heap-backed stack before registering.
    pub fn new(name: &'static str, entry: TaskEntry, param: *mut (), priority: TaskPriority) -> Self {
        Tcb {
            stack_ptr: core::ptr::null_mut(),
            id: TaskId(0),
            name,
            entry,
            param,
            stack_base: core::ptr::null_mut(),
            stack_size: 0,
            state: TaskState::Ready,
            priority,
            time_slice: 0,
            wake_tick: None,
            pend_on: None,
            pend_status: PendStatus::Ok,
            run_count: 0,
            total_runtime: 0,
        }
    }

    /// Attach a stack region and the saved stack pointer produced by
    /// the port's `stack_init`.
    pub(crate) fn set_stack(
        &mut self,
        base: *mut u8,
        size: usize,
        saved_sp: *mut StackElement,
    ) {
        self.stack_base = base;
        self.stack_size = size;
        self.stack_ptr = saved_sp;
    }

    /// Entry function the task was created with.
    #[inline]
    pub fn entry(&self) -> TaskEntry {
        self.entry
    }

    /// Opaque parameter handed to the entry function.
    #[inline]
    pub fn param(&self) -> *mut () {
        self.param
    }

    /// Saved stack pointer, as left by the last context switch.
    #[inline]
    pub fn saved_sp(&self) -> *mut StackElement {
        self.stack_ptr
    }

    /// Stack region bounds: base address and size in bytes.
    #[inline]
    pub fn stack_region(&self) -> (*mut u8, usize) {
        (self.stack_base, self.stack_size)
    }

    #[inline]
    pub fn is_ready(&self) -> bool {
        self.state == TaskState::Ready
    }

    #[inline]
    pub fn is_blocked(&self) -> bool {
        self.state == TaskState::Blocked
    }

    /// Whether the sentinel fill at the low end of the stack has been
    /// overwritten.
    ///
    /// Detection only; recovery is impossible without memory
    /// protection.
    pub fn stack_overflowed(&self) -> bool {
        if self.stack_base.is_null() {
            return false;
        }
        let guard = self.stack_size.min(STACK_GUARD_BYTES);
        for i in 0..guard {
            if unsafe { *self.stack_base.add(i) } != STACK_FILL_BYTE {
                return true;
            }
        }
        false
    }
}

// TCBs live inside the scheduler, which is only reached through the
// kernel critical section.
unsafe impl Send for Tcb {}
unsafe impl Sync for Tcb {}
