//! Core type definitions
//!
//! Strong types shared by the scheduler, the synchronization
//! primitives, and the timer subsystem.

/// Tick counter type
pub type Tick = u32;

/// Stack element type (the stack is built of 32-bit words)
pub type StackElement = u32;

/// Task entry point type
pub type TaskEntry = fn(*mut ()) -> !;

/// Timeout value meaning "fail immediately"
pub const NO_WAIT: Tick = 0;

/// Timeout value meaning "wait forever"
pub const WAIT_FOREVER: Tick = Tick::MAX;

/// Stable task identifier assigned at creation
///
/// The builtin idle task has id 0; application tasks count up from 1.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TaskId(pub u32);

impl TaskId {
    /// Identifier of the builtin idle task
    pub const IDLE: TaskId = TaskId(0);
}

/// Identity of a kernel object a task may block on
///
/// Assigned from a process-wide counter when a primitive is first
/// used, and stored in the blocked task's TCB as the back-reference
/// required to match wait-queue entries against their owner.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ObjId(pub u32);

/// Task state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum TaskState {
    /// Eligible to run
    Ready = 0,
    /// Currently executing (at most one task at a time)
    Running = 1,
    /// Waiting on a delay or a kernel object
    Blocked = 2,
    /// Taken out of scheduling until resumed
    Suspended = 3,
    /// Destroyed; the slot is swept on a later scheduler walk
    Deleted = 4,
}

/// Task priority levels, lowest first
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
#[repr(u8)]
pub enum TaskPriority {
    Idle = 0,
    Low = 1,
    Normal = 2,
    High = 3,
    Realtime = 4,
}

/// Scheduling policy, selected once at kernel init
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SchedPolicy {
    /// Rotate through READY tasks in registration order, each granted
    /// a time slice
    RoundRobin,
    /// Strictly-highest-priority READY task runs; round-robin among
    /// equals
    Priority,
    /// The running task keeps the CPU until it yields, blocks, or
    /// delays
    Cooperative,
}

/// Outcome of a blocking wait, recorded in the TCB by whoever wakes
/// the task
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum PendStatus {
    /// Woken by the object being signalled or handed over
    Ok = 0,
    /// Woken by deadline expiry
    Timeout = 1,
}
