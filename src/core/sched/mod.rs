//! Task scheduler
//!
//! The scheduler owns the fixed task table, the registration-order
//! list used for round-robin rotation, the builtin idle task, and
//! the software timer table. It is a pure state machine: selection
//! updates the table and raises a switch request that the kernel
//! layer converts into a port-level context switch.

mod wait_list;

pub use wait_list::WaitList;

use core::mem::size_of;
use core::ptr;

use crate::config::{MAX_TASKS, STACK_FILL_BYTE, STACK_MIN, TIME_SLICE_TICKS};
use crate::core::task::Tcb;
use crate::core::timer::TimerManager;
use crate::error::{KernelError, KernelResult};
use crate::port;
use crate::types::{
    ObjId, PendStatus, SchedPolicy, StackElement, TaskId, TaskPriority, TaskState, Tick,
    WAIT_FOREVER,
};

/// Words in the idle task's stack
const IDLE_STACK_WORDS: usize = STACK_MIN / size_of::<StackElement>();

/// Which task the scheduler is pointing at
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum TaskRef {
    /// An application task, by slot index
    Slot(usize),
    /// The builtin idle task
    Idle,
}

/// Aggregate scheduler statistics
#[derive(Debug, Clone, Copy, Default)]
pub struct SchedulerStats {
    pub total_tasks: u32,
    pub ready_tasks: u32,
    pub blocked_tasks: u32,
    pub suspended_tasks: u32,
    pub uptime_ticks: Tick,
    pub context_switches: u32,
}

const NO_TASK: Option<Tcb> = None;

/// The kernel scheduler
pub struct Scheduler {
    /// Task slots; a slot stays put for the task's whole lifetime so
    /// TCB addresses handed to the port remain stable
    slots: [Option<Tcb>; MAX_TASKS],
    /// Slot indices in registration order
    order: [u8; MAX_TASKS],
    task_count: usize,
    current: Option<TaskRef>,
    idle: Tcb,
    idle_stack: [StackElement; IDLE_STACK_WORDS],
    timers: TimerManager,
    policy: SchedPolicy,
    time_slice_ticks: Tick,
    tick_count: Tick,
    next_task_id: u32,
    initialized: bool,
    running: bool,
    context_switches: u32,
    switch_pending: bool,
}

/// Entry of the builtin idle task: park the CPU until the next
/// interrupt.
fn idle_entry(_: *mut ()) -> ! {
    loop {
        port::wait_for_interrupt();
    }
}

impl Scheduler {
    /// Create an uninitialized scheduler. `init` must run before any
    /// other operation.
    pub const fn new() -> Self {
        Scheduler {
            slots: [NO_TASK; MAX_TASKS],
            order: [0; MAX_TASKS],
            task_count: 0,
            current: None,
            idle: Tcb {
                stack_ptr: ptr::null_mut(),
                id: TaskId::IDLE,
                name: "idle",
                entry: idle_entry,
                param: ptr::null_mut(),
                stack_base: ptr::null_mut(),
                stack_size: 0,
                state: TaskState::Ready,
                priority: TaskPriority::Idle,
                time_slice: 0,
                wake_tick: None,
                pend_on: None,
                pend_status: PendStatus::Ok,
                run_count: 0,
                total_runtime: 0,
            },
            idle_stack: [0; IDLE_STACK_WORDS],
            timers: TimerManager::new(),
            policy: SchedPolicy::RoundRobin,
            time_slice_ticks: TIME_SLICE_TICKS,
            tick_count: 0,
            next_task_id: 1,
            initialized: false,
            running: false,
            context_switches: 0,
            switch_pending: false,
        }
    }

    /// Reset the scheduler and select the scheduling policy.
    ///
    /// Re-initialization tears down whatever was there before; the
    /// kernel layer guards against calling this at a bad time.
    pub fn init(&mut self, policy: SchedPolicy) -> KernelResult<()> {
        self.running = false;
        self.slots = [NO_TASK; MAX_TASKS];
        self.order = [0; MAX_TASKS];
        self.task_count = 0;
        self.current = None;
        self.timers = TimerManager::new();
        self.policy = policy;
        self.time_slice_ticks = TIME_SLICE_TICKS;
        self.tick_count = 0;
        self.next_task_id = 1;
        self.context_switches = 0;
        self.switch_pending = false;

        self.init_idle();
        self.initialized = true;
        Ok(())
    }

    fn init_idle(&mut self) {
        let base = self.idle_stack.as_mut_ptr() as *mut u8;
        let size = IDLE_STACK_WORDS * size_of::<StackElement>();
        unsafe { ptr::write_bytes(base, STACK_FILL_BYTE, size) };

        let top = unsafe { self.idle_stack.as_mut_ptr().add(IDLE_STACK_WORDS) };
        let saved_sp = unsafe { port::stack_init(top, idle_entry, ptr::null_mut()) };

        self.idle = Tcb::new("idle", idle_entry, ptr::null_mut(), TaskPriority::Idle);
        self.idle.id = TaskId::IDLE;
        self.idle.set_stack(base, size, saved_sp);
        self.idle.time_slice = self.time_slice_ticks;
    }

    /// Mark the scheduler running and select the first task.
    pub fn start(&mut self) -> KernelResult<()> {
        if !self.initialized {
            return Err(KernelError::NotReady);
        }
        if self.running {
            return Err(KernelError::Busy);
        }
        self.running = true;
        self.select_next();
        Ok(())
    }

    // ============ Task registration ============

    /// Register a task; assigns its id and resets its slice.
    pub fn add_task(&mut self, mut tcb: Tcb) -> KernelResult<TaskId> {
        if self.task_count >= MAX_TASKS {
            return Err(KernelError::Full);
        }
        let slot = self
            .slots
            .iter()
            .position(|s| s.is_none())
            .ok_or(KernelError::Full)?;

        let id = TaskId(self.next_task_id);
        self.next_task_id += 1;
        tcb.id = id;
        tcb.state = TaskState::Ready;
        tcb.time_slice = self.time_slice_ticks;

        crate::klog!(info, "task '{=str}' registered (id {=u32})", tcb.name, id.0);

        self.slots[slot] = Some(tcb);
        self.order[self.task_count] = slot as u8;
        self.task_count += 1;
        Ok(id)
    }

    /// Unregister a task: mark it DELETED and drop it from the
    /// rotation. Returns the stack region for the caller to release.
    ///
    /// Removing the running task selects a successor.
    pub fn remove_task(&mut self, id: TaskId) -> KernelResult<(*mut u8, usize)> {
        if id == TaskId::IDLE {
            return Err(KernelError::InvalidParam);
        }
        let slot = self.find(id).ok_or(KernelError::NotFound)?;

        let stack = {
            let t = self.slots[slot].as_mut().ok_or(KernelError::NotFound)?;
            let stack = (t.stack_base, t.stack_size);
            t.state = TaskState::Deleted;
            t.wake_tick = None;
            t.pend_on = None;
            t.stack_base = ptr::null_mut();
            t.stack_size = 0;
            t.stack_ptr = ptr::null_mut();
            stack
        };

        if let Some(pos) = self.order_pos(slot) {
            for i in pos..self.task_count - 1 {
                self.order[i] = self.order[i + 1];
            }
            self.task_count -= 1;
        }

        crate::klog!(info, "task id {=u32} removed", id.0);

        if self.current == Some(TaskRef::Slot(slot)) {
            self.select_next();
        }
        Ok(stack)
    }

    // ============ Scheduling points ============

    /// Voluntary reschedule. Returns immediately when no other READY
    /// task is eligible.
    pub fn yield_now(&mut self) {
        if !self.running || self.current.is_none() {
            return;
        }
        self.select_next();
    }

    /// Block the caller until `now + ticks`. `delay(0)` is a yield.
    pub fn delay(&mut self, ticks: Tick) {
        if !self.running {
            return;
        }
        let Some(cur) = self.current else { return };
        if cur == TaskRef::Idle {
            return;
        }
        if ticks == 0 {
            self.yield_now();
            return;
        }

        let wake = self.tick_count.wrapping_add(ticks);
        let t = self.tcb_mut(cur);
        t.state = TaskState::Blocked;
        t.wake_tick = Some(wake);
        t.pend_on = None;
        t.pend_status = PendStatus::Ok;
        self.select_next();
    }

    /// Block the caller on a kernel object, with an optional
    /// deadline. Used by the synchronization primitives.
    pub(crate) fn block_current(&mut self, obj: ObjId, timeout: Tick) {
        let Some(cur) = self.current else { return };
        if cur == TaskRef::Idle {
            return;
        }
        let wake = (timeout != WAIT_FOREVER).then(|| self.tick_count.wrapping_add(timeout));
        let t = self.tcb_mut(cur);
        t.state = TaskState::Blocked;
        t.wake_tick = wake;
        t.pend_on = Some(obj);
        t.pend_status = PendStatus::Ok;
        self.select_next();
    }

    /// Wake a blocked task, recording the wait outcome. Returns false
    /// when the task is not blocked.
    pub(crate) fn wake(&mut self, id: TaskId, status: PendStatus) -> bool {
        let Some(slot) = self.find(id) else { return false };
        let Some(t) = self.slots[slot].as_mut() else { return false };
        if t.state != TaskState::Blocked {
            return false;
        }
        t.state = TaskState::Ready;
        t.wake_tick = None;
        t.pend_on = None;
        t.pend_status = status;
        true
    }

    /// Under the PRIORITY policy, hand the CPU over when a wake made
    /// a strictly higher-priority task READY.
    pub(crate) fn preempt_check(&mut self) {
        if !self.running || self.policy != SchedPolicy::Priority {
            return;
        }
        let Some(cur) = self.current else { return };
        let cur_prio = self.tcb(cur).priority;
        if self.any_ready_above(cur_prio) {
            self.select_next();
        }
    }

    /// System tick: advance time, wake expired delays, run timers,
    /// and evaluate time slicing.
    pub fn on_tick(&mut self) {
        if !self.running {
            return;
        }
        self.tick_count = self.tick_count.wrapping_add(1);
        let now = self.tick_count;

        if let Some(cur) = self.current {
            let t = self.tcb_mut(cur);
            t.total_runtime = t.total_runtime.wrapping_add(1);
        }

        // Wake expired delays and timeouts; sweep DELETED slots
        for slot in 0..MAX_TASKS {
            let sweep = match self.slots[slot].as_mut() {
                None => false,
                Some(t) => match t.state {
                    TaskState::Deleted => true,
                    TaskState::Blocked => {
                        if let Some(wake) = t.wake_tick {
                            if (now.wrapping_sub(wake) as i32) >= 0 {
                                t.wake_tick = None;
                                t.pend_status = if t.pend_on.take().is_some() {
                                    PendStatus::Timeout
                                } else {
                                    PendStatus::Ok
                                };
                                t.state = TaskState::Ready;
                            }
                        }
                        false
                    }
                    _ => false,
                },
            };
            if sweep {
                self.slots[slot] = None;
            }
        }

        self.timers.on_tick();

        // Time slicing and priority preemption
        if self.policy != SchedPolicy::Cooperative {
            if let Some(cur) = self.current {
                let expired = {
                    let t = self.tcb_mut(cur);
                    if t.time_slice > 0 {
                        t.time_slice -= 1;
                    }
                    t.time_slice == 0
                };
                let preempt = self.policy == SchedPolicy::Priority
                    && self.any_ready_above(self.tcb(cur).priority);
                if expired || preempt {
                    let slice = self.time_slice_ticks;
                    self.tcb_mut(cur).time_slice = slice;
                    self.select_next();
                }
            }
        }

        if let Some(cur) = self.current {
            let t = self.tcb(cur);
            if t.stack_overflowed() {
                crate::klog!(error, "stack overflow in task '{=str}'", t.name);
            }
        }
    }

    /// Pick the successor of the current task and update states.
    ///
    /// Sets the switch-request flag when the selection actually
    /// changed; the kernel layer turns that into a port context
    /// switch.
    pub fn select_next(&mut self) {
        let old = self.current;

        if let Some(r) = old {
            let t = self.tcb_mut(r);
            if t.state == TaskState::Running {
                t.state = TaskState::Ready;
            }
        }

        let next = self.pick(old);
        let switched = old != Some(next);

        {
            let slice = self.time_slice_ticks;
            let t = self.tcb_mut(next);
            t.state = TaskState::Running;
            if switched {
                t.run_count = t.run_count.wrapping_add(1);
                t.time_slice = slice;
            }
        }

        self.current = Some(next);
        if switched {
            self.context_switches = self.context_switches.wrapping_add(1);
            self.switch_pending = true;
        }
    }

    fn pick(&self, from: Option<TaskRef>) -> TaskRef {
        match self.policy {
            SchedPolicy::RoundRobin | SchedPolicy::Cooperative => self.pick_rotation(from, None),
            SchedPolicy::Priority => match self.highest_ready_priority() {
                Some(prio) => self.pick_rotation(from, Some(prio)),
                None => TaskRef::Idle,
            },
        }
    }

    /// Registration-order rotation: scan forward from the task after
    /// `from`, wrapping around up to and including `from` itself.
    fn pick_rotation(&self, from: Option<TaskRef>, prio: Option<TaskPriority>) -> TaskRef {
        let n = self.task_count;
        if n == 0 {
            return TaskRef::Idle;
        }
        let start = match from {
            Some(TaskRef::Slot(slot)) => self.order_pos(slot).map(|p| p + 1).unwrap_or(0),
            _ => 0,
        };
        for i in 0..n {
            let slot = self.order[(start + i) % n] as usize;
            if let Some(t) = self.slots[slot].as_ref() {
                if t.state == TaskState::Ready && prio.map_or(true, |p| t.priority == p) {
                    return TaskRef::Slot(slot);
                }
            }
        }
        TaskRef::Idle
    }

    fn highest_ready_priority(&self) -> Option<TaskPriority> {
        self.slots
            .iter()
            .flatten()
            .filter(|t| t.state == TaskState::Ready)
            .map(|t| t.priority)
            .max()
    }

    fn any_ready_above(&self, prio: TaskPriority) -> bool {
        self.slots
            .iter()
            .flatten()
            .any(|t| t.state == TaskState::Ready && t.priority > prio)
    }

    // ============ Task control ============

    /// Move a task to SUSPENDED. Suspending the running task selects
    /// a successor.
    pub fn suspend(&mut self, id: TaskId) -> KernelResult<()> {
        if id == TaskId::IDLE {
            return Err(KernelError::InvalidParam);
        }
        let slot = self.find(id).ok_or(KernelError::NotFound)?;
        {
            let t = self.slots[slot].as_mut().ok_or(KernelError::NotFound)?;
            if t.state == TaskState::Deleted {
                return Err(KernelError::InvalidParam);
            }
            t.state = TaskState::Suspended;
            t.wake_tick = None;
            t.pend_on = None;
        }
        if self.current == Some(TaskRef::Slot(slot)) {
            self.select_next();
        }
        Ok(())
    }

    /// Move a SUSPENDED task back to READY.
    pub fn resume(&mut self, id: TaskId) -> KernelResult<()> {
        let slot = self.find(id).ok_or(KernelError::NotFound)?;
        {
            let t = self.slots[slot].as_mut().ok_or(KernelError::NotFound)?;
            if t.state != TaskState::Suspended {
                return Err(KernelError::InvalidParam);
            }
            t.state = TaskState::Ready;
        }
        self.preempt_check();
        Ok(())
    }

    /// Change a task's priority.
    pub fn set_priority(&mut self, id: TaskId, priority: TaskPriority) -> KernelResult<()> {
        let slot = self.find(id).ok_or(KernelError::NotFound)?;
        {
            let t = self.slots[slot].as_mut().ok_or(KernelError::NotFound)?;
            if t.state == TaskState::Deleted {
                return Err(KernelError::NotFound);
            }
            t.priority = priority;
        }
        self.preempt_check();
        Ok(())
    }

    // ============ Queries ============

    /// Id of the RUNNING task; `None` during bring-up.
    pub fn current(&self) -> Option<TaskId> {
        self.current.map(|r| self.tcb(r).id)
    }

    /// Whether the idle task is the one running.
    pub fn current_is_idle(&self) -> bool {
        self.current == Some(TaskRef::Idle)
    }

    pub fn task_state(&self, id: TaskId) -> Option<TaskState> {
        if id == TaskId::IDLE {
            return Some(self.idle.state);
        }
        self.find(id)
            .and_then(|slot| self.slots[slot].as_ref())
            .map(|t| t.state)
    }

    pub fn task_priority(&self, id: TaskId) -> Option<TaskPriority> {
        if id == TaskId::IDLE {
            return Some(self.idle.priority);
        }
        self.find(id)
            .and_then(|slot| self.slots[slot].as_ref())
            .map(|t| t.priority)
    }

    /// Times the task entered RUNNING.
    pub fn task_run_count(&self, id: TaskId) -> Option<u32> {
        if id == TaskId::IDLE {
            return Some(self.idle.run_count);
        }
        self.find(id)
            .and_then(|slot| self.slots[slot].as_ref())
            .map(|t| t.run_count)
    }

    /// Ticks the task has spent RUNNING.
    pub fn task_runtime(&self, id: TaskId) -> Option<Tick> {
        if id == TaskId::IDLE {
            return Some(self.idle.total_runtime);
        }
        self.find(id)
            .and_then(|slot| self.slots[slot].as_ref())
            .map(|t| t.total_runtime)
    }

    pub(crate) fn pend_status(&self, id: TaskId) -> PendStatus {
        self.find(id)
            .and_then(|slot| self.slots[slot].as_ref())
            .map(|t| t.pend_status)
            .unwrap_or(PendStatus::Ok)
    }

    /// Whether `id` is currently blocked on `obj`; used to weed out
    /// stale wait-list entries.
    pub(crate) fn is_blocked_on(&self, id: TaskId, obj: ObjId) -> bool {
        self.find(id)
            .and_then(|slot| self.slots[slot].as_ref())
            .map(|t| t.state == TaskState::Blocked && t.pend_on == Some(obj))
            .unwrap_or(false)
    }

    pub fn tick_count(&self) -> Tick {
        self.tick_count
    }

    pub fn policy(&self) -> SchedPolicy {
        self.policy
    }

    pub fn is_running(&self) -> bool {
        self.running
    }

    /// Aggregate statistics over registered tasks.
    pub fn stats(&self) -> SchedulerStats {
        let mut stats = SchedulerStats {
            uptime_ticks: self.tick_count,
            context_switches: self.context_switches,
            ..SchedulerStats::default()
        };
        for i in 0..self.task_count {
            let slot = self.order[i] as usize;
            let Some(t) = self.slots[slot].as_ref() else { continue };
            stats.total_tasks += 1;
            match t.state {
                TaskState::Ready => stats.ready_tasks += 1,
                TaskState::Blocked => stats.blocked_tasks += 1,
                TaskState::Suspended => stats.suspended_tasks += 1,
                TaskState::Running | TaskState::Deleted => {}
            }
        }
        stats
    }

    /// Software timer table.
    pub fn timers(&self) -> &TimerManager {
        &self.timers
    }

    pub fn timers_mut(&mut self) -> &mut TimerManager {
        &mut self.timers
    }

    /// Consume the pending switch request raised by the last
    /// selection.
    pub(crate) fn take_switch_request(&mut self) -> bool {
        core::mem::replace(&mut self.switch_pending, false)
    }

    /// Pointer to the TCB that should run next; stable for the
    /// lifetime of the task because slots never move.
    pub(crate) fn current_tcb_ptr(&mut self) -> *mut Tcb {
        match self.current {
            Some(TaskRef::Slot(slot)) => match self.slots[slot].as_mut() {
                Some(t) => t as *mut Tcb,
                None => &mut self.idle as *mut Tcb,
            },
            Some(TaskRef::Idle) => &mut self.idle as *mut Tcb,
            None => ptr::null_mut(),
        }
    }

    // ============ Internal helpers ============

    fn find(&self, id: TaskId) -> Option<usize> {
        self.slots
            .iter()
            .position(|s| s.as_ref().is_some_and(|t| t.id == id))
    }

    fn order_pos(&self, slot: usize) -> Option<usize> {
        self.order[..self.task_count]
            .iter()
            .position(|&s| s as usize == slot)
    }

    fn tcb(&self, r: TaskRef) -> &Tcb {
        match r {
            TaskRef::Slot(slot) => self.slots[slot].as_ref().unwrap_or(&self.idle),
            TaskRef::Idle => &self.idle,
        }
    }

    fn tcb_mut(&mut self, r: TaskRef) -> &mut Tcb {
        match r {
            TaskRef::Slot(slot) => {
                if self.slots[slot].is_some() {
                    self.slots[slot].as_mut().unwrap()
                } else {
                    &mut self.idle
                }
            }
            TaskRef::Idle => &mut self.idle,
        }
    }
}

impl Default for Scheduler {
    fn default() -> Self {
        Self::new()
    }
}

/// Statistics of the global scheduler.
pub fn stats() -> SchedulerStats {
    crate::critical::critical_section(|cs| crate::kernel::sched_mut(cs).stats())
}
