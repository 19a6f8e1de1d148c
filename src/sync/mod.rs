//! Inter-task synchronization primitives
//!
//! Mutexes, semaphores, and message queues. All primitives share the
//! same blocking machinery: the caller is appended to a FIFO wait
//! list of task ids and blocked on the scheduler with the primitive's
//! object id as back-reference; wakes go strictly to the head of the
//! list. Entries for tasks that timed out are skipped lazily.

pub mod mutex;
pub mod queue;
pub mod sem;

use core::sync::atomic::{AtomicU32, Ordering};

use crate::core::sched::{Scheduler, WaitList};
use crate::types::{ObjId, PendStatus, TaskId};

/// Process-wide object id counter; 0 is never handed out
static NEXT_OBJ_ID: AtomicU32 = AtomicU32::new(1);

/// Allocate the identity of a kernel object.
pub(crate) fn alloc_obj_id() -> ObjId {
    ObjId(NEXT_OBJ_ID.fetch_add(1, Ordering::Relaxed))
}

/// Wake the first wait-list entry that is still validly blocked on
/// `obj`, skipping and discarding stale entries.
pub(crate) fn wake_first(
    waiters: &mut WaitList,
    sched: &mut Scheduler,
    obj: ObjId,
    status: PendStatus,
) -> Option<TaskId> {
    while let Some(id) = waiters.pop() {
        if sched.is_blocked_on(id, obj) && sched.wake(id, status) {
            return Some(id);
        }
    }
    None
}

/// Append a waiter, purging stale entries first if the list is full.
pub(crate) fn enqueue_waiter(waiters: &mut WaitList, sched: &Scheduler, obj: ObjId, id: TaskId) {
    if waiters.is_full() {
        waiters.purge(|w| sched.is_blocked_on(w, obj));
    }
    let _ = waiters.push(id);
}
