//! Task management
//!
//! Creation, destruction, and control of tasks on the global
//! scheduler. Task stacks are carved out of the kernel heap, filled
//! with the sentinel pattern, and topped with a fabricated initial
//! frame from the port layer.

mod tcb;

pub use tcb::Tcb;

use core::ptr;

use crate::config::{STACK_DEFAULT, STACK_FILL_BYTE, STACK_MAX, STACK_MIN};
use crate::critical::{critical_section, is_isr_context};
use crate::error::{KernelError, KernelResult};
use crate::kernel;
use crate::mem::heap;
use crate::port;
use crate::types::{StackElement, TaskEntry, TaskId, TaskPriority, TaskState, Tick};

/// Task creation parameters
pub struct TaskParams {
    pub name: &'static str,
    pub entry: TaskEntry,
    pub param: *mut (),
    /// Stack size in bytes, validated against `[STACK_MIN, STACK_MAX]`
    pub stack_size: usize,
    pub priority: TaskPriority,
}

impl TaskParams {
    /// Parameters with the default stack size and NORMAL priority
    pub fn new(name: &'static str, entry: TaskEntry) -> Self {
        TaskParams {
            name,
            entry,
            param: ptr::null_mut(),
            stack_size: STACK_DEFAULT,
            priority: TaskPriority::Normal,
        }
    }
}

/// Create a task and register it with the scheduler.
///
/// The stack region is allocated from the kernel heap and filled
/// with the sentinel byte pattern; the port fabricates an initial
/// frame so the first context switch enters `entry(param)`.
pub fn create(params: &TaskParams) -> KernelResult<TaskId> {
    if is_isr_context() {
        return Err(KernelError::NotReady);
    }
    if params.stack_size < STACK_MIN || params.stack_size > STACK_MAX {
        crate::klog!(
            error,
            "task '{=str}': stack size {=usize} out of range",
            params.name,
            params.stack_size
        );
        return Err(KernelError::InvalidParam);
    }

    critical_section(|cs| {
        let stack = heap::alloc(params.stack_size).ok_or(KernelError::Nomem)?;
        let base = stack.as_ptr();
        unsafe { ptr::write_bytes(base, STACK_FILL_BYTE, params.stack_size) };

        // The port aligns the top; the region itself is 8-aligned by
        // the heap
        let top = unsafe { base.add(params.stack_size) } as *mut StackElement;
        let saved_sp = unsafe { port::stack_init(top, params.entry, params.param) };

        let mut tcb = Tcb::new(params.name, params.entry, params.param, params.priority);
        tcb.set_stack(base, params.stack_size, saved_sp);

        let sched = kernel::sched_mut(cs);
        let id = match sched.add_task(tcb) {
            Ok(id) => id,
            Err(e) => {
                heap::free(base);
                return Err(e);
            }
        };

        sched.preempt_check();
        kernel::commit_switch(cs);
        Ok(id)
    })
}

/// Destroy a task: unregister it, release its stack, and mark it
/// DELETED. Destroying the running task selects a successor.
pub fn destroy(id: TaskId) -> KernelResult<()> {
    if is_isr_context() {
        return Err(KernelError::NotReady);
    }

    critical_section(|cs| {
        let sched = kernel::sched_mut(cs);
        let (stack_base, _size) = sched.remove_task(id)?;
        if !stack_base.is_null() {
            heap::free(stack_base);
        }
        kernel::commit_switch(cs);
        Ok(())
    })
}

/// Move a task to SUSPENDED.
pub fn suspend(id: TaskId) -> KernelResult<()> {
    critical_section(|cs| {
        kernel::sched_mut(cs).suspend(id)?;
        kernel::commit_switch(cs);
        Ok(())
    })
}

/// Move a SUSPENDED task back to READY.
pub fn resume(id: TaskId) -> KernelResult<()> {
    critical_section(|cs| {
        kernel::sched_mut(cs).resume(id)?;
        kernel::commit_switch(cs);
        Ok(())
    })
}

/// Id of the RUNNING task, or `None` during bring-up.
pub fn current() -> Option<TaskId> {
    critical_section(|cs| kernel::sched_mut(cs).current())
}

/// State of a task.
pub fn state(id: TaskId) -> KernelResult<TaskState> {
    critical_section(|cs| kernel::sched_mut(cs).task_state(id)).ok_or(KernelError::NotFound)
}

/// Priority of a task.
pub fn priority(id: TaskId) -> KernelResult<TaskPriority> {
    critical_section(|cs| kernel::sched_mut(cs).task_priority(id)).ok_or(KernelError::NotFound)
}

/// Change the priority of a task.
pub fn set_priority(id: TaskId, priority: TaskPriority) -> KernelResult<()> {
    critical_section(|cs| {
        kernel::sched_mut(cs).set_priority(id, priority)?;
        kernel::commit_switch(cs);
        Ok(())
    })
}

/// Voluntarily hand the CPU to the next READY task. Returns
/// immediately when no other task is eligible.
pub fn yield_now() {
    if is_isr_context() {
        return;
    }
    critical_section(|cs| {
        kernel::sched_mut(cs).yield_now();
        kernel::commit_switch(cs);
    });
}

/// Block the calling task until `now + ticks`. `delay(0)` is
/// equivalent to a yield.
pub fn delay(ticks: Tick) -> KernelResult<()> {
    if is_isr_context() {
        return Err(KernelError::NotReady);
    }
    if !kernel::is_running() {
        return Err(KernelError::NotReady);
    }
    critical_section(|cs| {
        kernel::sched_mut(cs).delay(ticks);
        kernel::commit_switch(cs);
    });
    Ok(())
}
