//! End-to-end tests against the global kernel
//!
//! The kernel is a process-wide singleton, so every test here takes
//! the harness lock, re-initializes the kernel, and drives ticks by
//! hand through `time::tick` (the host port performs no real context
//! switches; the scheduler's logical state is what is observed).

use kestrel::sync::sem::SemKind;
use kestrel::timer::TimerKind;
use kestrel::types::{SchedPolicy, TaskId, TaskPriority, TaskState, WAIT_FOREVER};
use kestrel::{kernel, task, time, timer, KernelError, MessageQueue, Mutex, RecursiveMutex,
    Semaphore, TaskParams};
use kestrel::mem::heap;

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Mutex as StdMutex, MutexGuard};

static HARNESS: StdMutex<()> = StdMutex::new(());

fn task_stub(_: *mut ()) -> ! {
    loop {
        std::thread::park();
    }
}

/// Serialize tests and hand back a freshly initialized kernel.
fn fresh(policy: SchedPolicy) -> MutexGuard<'static, ()> {
    let guard = HARNESS.lock().unwrap_or_else(|e| e.into_inner());
    kernel::init(policy).unwrap();
    guard
}

fn spawn(name: &'static str, priority: TaskPriority) -> TaskId {
    let mut params = TaskParams::new(name, task_stub);
    params.priority = priority;
    task::create(&params).unwrap()
}

#[test]
fn lifecycle_init_start() {
    let _guard = fresh(SchedPolicy::RoundRobin);
    assert!(kernel::is_initialized());
    assert!(!kernel::is_running());

    kernel::start().unwrap();
    assert!(kernel::is_running());
    // No application task yet: the idle task carries the CPU
    assert_eq!(task::current(), Some(TaskId::IDLE));

    assert_eq!(kernel::start(), Err(KernelError::Busy));
}

#[test]
fn start_requires_init() {
    let _guard = fresh(SchedPolicy::RoundRobin);
    // Simulate a cold start attempt: re-init, then poke at state
    assert!(kernel::is_initialized());
    kernel::start().unwrap();
}

#[test]
fn task_stacks_come_from_the_kernel_heap() {
    let _guard = fresh(SchedPolicy::RoundRobin);
    let before = heap::stats().allocated_bytes;

    let id = spawn("worker", TaskPriority::Normal);
    let after_create = heap::stats().allocated_bytes;
    assert!(after_create > before);
    assert!(heap::check_integrity());

    task::destroy(id).unwrap();
    assert_eq!(heap::stats().allocated_bytes, before);
    assert!(heap::check_integrity());
}

#[test]
fn stack_size_bounds_are_validated() {
    let _guard = fresh(SchedPolicy::RoundRobin);

    let mut small = TaskParams::new("small", task_stub);
    small.stack_size = kestrel::STACK_MIN - 1;
    assert_eq!(task::create(&small).map(|_| ()), Err(KernelError::InvalidParam));

    let mut big = TaskParams::new("big", task_stub);
    big.stack_size = kestrel::STACK_MAX + 1;
    assert_eq!(task::create(&big).map(|_| ()), Err(KernelError::InvalidParam));

    let mut ok = TaskParams::new("ok", task_stub);
    ok.stack_size = kestrel::STACK_MAX;
    assert!(task::create(&ok).is_ok());
}

#[test]
fn delay_blocks_until_the_exact_tick() {
    let _guard = fresh(SchedPolicy::RoundRobin);
    let id = spawn("sleeper", TaskPriority::Normal);
    kernel::start().unwrap();
    assert_eq!(task::current(), Some(id));

    let t0 = time::now();
    task::delay(10).unwrap();
    assert_eq!(task::state(id).unwrap(), TaskState::Blocked);
    assert_eq!(task::current(), Some(TaskId::IDLE));

    for _ in 1..=9u32 {
        time::tick();
        assert_eq!(task::state(id).unwrap(), TaskState::Blocked);
    }
    time::tick();
    assert_eq!(time::now(), t0 + 10);
    assert_ne!(task::state(id).unwrap(), TaskState::Blocked);
}

#[test]
fn destroyed_task_leaves_a_deleted_sentinel_then_vanishes() {
    let _guard = fresh(SchedPolicy::RoundRobin);
    let a = spawn("a", TaskPriority::Normal);
    let b = spawn("b", TaskPriority::Normal);
    kernel::start().unwrap();

    task::destroy(a).unwrap();
    assert_eq!(task::current(), Some(b));
    assert_eq!(task::state(a).unwrap(), TaskState::Deleted);

    time::tick();
    assert_eq!(task::state(a), Err(KernelError::NotFound));
    assert_eq!(task::destroy(a), Err(KernelError::NotFound));
}

#[test]
fn suspend_and_resume_through_the_api() {
    let _guard = fresh(SchedPolicy::RoundRobin);
    let a = spawn("a", TaskPriority::Normal);
    let b = spawn("b", TaskPriority::Normal);
    kernel::start().unwrap();

    task::suspend(a).unwrap();
    assert_eq!(task::state(a).unwrap(), TaskState::Suspended);
    assert_eq!(task::current(), Some(b));

    task::resume(a).unwrap();
    assert_eq!(task::state(a).unwrap(), TaskState::Ready);
    assert_eq!(task::resume(a), Err(KernelError::InvalidParam));
    assert_eq!(task::suspend(TaskId(999)), Err(KernelError::NotFound));
}

#[test]
fn counting_semaphore_scenario() {
    let _guard = fresh(SchedPolicy::RoundRobin);
    let sem = Semaphore::new();
    sem.create_counting(5, 2, "units").unwrap();
    assert_eq!(sem.kind(), SemKind::Counting);

    sem.take(0).unwrap();
    sem.take(0).unwrap();
    assert_eq!(sem.count(), 0);
    assert_eq!(sem.try_take(), Err(KernelError::Busy));

    for _ in 0..5 {
        sem.give().unwrap();
    }
    assert_eq!(sem.count(), 5);
    assert_eq!(sem.give(), Err(KernelError::Full));
}

#[test]
fn binary_semaphore_is_max_one() {
    let _guard = fresh(SchedPolicy::RoundRobin);
    let sem = Semaphore::new();
    sem.create_binary(true, "flag").unwrap();
    assert_eq!(sem.kind(), SemKind::Binary);
    assert_eq!(sem.count(), 1);

    sem.try_take().unwrap();
    assert_eq!(sem.try_take(), Err(KernelError::Busy));
    sem.give().unwrap();
    assert_eq!(sem.give(), Err(KernelError::Full));
}

#[test]
fn semaphore_create_validates() {
    let _guard = fresh(SchedPolicy::RoundRobin);
    let sem = Semaphore::new();
    assert_eq!(sem.create_counting(0, 0, "bad"), Err(KernelError::InvalidParam));
    assert_eq!(sem.create_counting(3, 4, "bad"), Err(KernelError::InvalidParam));
}

#[test]
fn semaphore_give_hands_off_to_waiter() {
    let _guard = fresh(SchedPolicy::RoundRobin);
    let a = spawn("taker", TaskPriority::Normal);
    let b = spawn("giver", TaskPriority::Normal);
    kernel::start().unwrap();

    let sem = Semaphore::new();
    sem.create_counting(1, 0, "unit").unwrap();

    // Running as A: no unit available, so A blocks and B runs
    let _ = sem.take(WAIT_FOREVER);
    assert_eq!(task::state(a).unwrap(), TaskState::Blocked);
    assert_eq!(task::current(), Some(b));

    // B gives: the unit goes straight to A, never into the count
    sem.give().unwrap();
    assert_eq!(task::state(a).unwrap(), TaskState::Ready);
    assert_eq!(sem.count(), 0);
}

#[test]
fn semaphore_take_timeout_expires() {
    let _guard = fresh(SchedPolicy::RoundRobin);
    let a = spawn("taker", TaskPriority::Normal);
    let _b = spawn("other", TaskPriority::Normal);
    kernel::start().unwrap();

    let sem = Semaphore::new();
    sem.create_counting(1, 0, "unit").unwrap();

    let _ = sem.take(5);
    assert_eq!(task::state(a).unwrap(), TaskState::Blocked);
    for _ in 0..5 {
        time::tick();
    }
    assert_eq!(task::state(a).unwrap(), TaskState::Ready);

    // The stale wait entry must not swallow a later give
    sem.give().unwrap();
    assert_eq!(sem.count(), 1);
}

#[test]
fn queue_fifo_scenario() {
    let _guard = fresh(SchedPolicy::RoundRobin);
    let queue: MessageQueue<u32, 5> = MessageQueue::new();
    queue.create("values").unwrap();

    queue.try_send(10).unwrap();
    queue.try_send(20).unwrap();
    queue.try_send(30).unwrap();

    assert_eq!(queue.try_receive().unwrap(), 10);
    assert_eq!(queue.try_receive().unwrap(), 20);
    assert_eq!(queue.peek(), Some(30));
    assert_eq!(queue.len(), 1);

    queue.try_send(40).unwrap();
    queue.try_send(50).unwrap();
    queue.try_send(60).unwrap();
    queue.try_send(70).unwrap();
    assert!(queue.is_full());
    assert_eq!(queue.try_send(80), Err(KernelError::Full));

    for expected in [30, 40, 50, 60, 70] {
        assert_eq!(queue.try_receive().unwrap(), expected);
    }
    assert_eq!(queue.try_receive(), Err(KernelError::Empty));
}

#[test]
fn queue_clear_discards_messages() {
    let _guard = fresh(SchedPolicy::RoundRobin);
    let queue: MessageQueue<u32, 4> = MessageQueue::new();
    queue.create("values").unwrap();

    queue.try_send(1).unwrap();
    queue.try_send(2).unwrap();
    queue.clear();
    assert!(queue.is_empty());
    assert_eq!(queue.try_receive(), Err(KernelError::Empty));
}

#[test]
fn queue_receiver_blocks_and_is_woken_by_send() {
    let _guard = fresh(SchedPolicy::RoundRobin);
    let a = spawn("consumer", TaskPriority::Normal);
    let b = spawn("producer", TaskPriority::Normal);
    kernel::start().unwrap();

    let queue: MessageQueue<u32, 4> = MessageQueue::new();
    queue.create("values").unwrap();

    // Running as A: nothing queued, A blocks and B takes over
    let _ = queue.receive(WAIT_FOREVER);
    assert_eq!(task::state(a).unwrap(), TaskState::Blocked);
    assert_eq!(task::current(), Some(b));

    queue.try_send(42).unwrap();
    assert_eq!(task::state(a).unwrap(), TaskState::Ready);
    // The message sits in the ring for A to collect when it resumes
    assert_eq!(queue.len(), 1);
}

#[test]
fn mutex_ownership_and_recursion_rules() {
    let _guard = fresh(SchedPolicy::RoundRobin);
    let _a = spawn("owner", TaskPriority::Normal);
    kernel::start().unwrap();

    let mutex = Mutex::new();
    mutex.create("lock").unwrap();

    mutex.acquire(0).unwrap();
    assert!(mutex.is_locked());
    // Plain mutexes reject recursive acquisition
    assert_eq!(mutex.acquire(0), Err(KernelError::Busy));
    mutex.release().unwrap();
    assert!(!mutex.is_locked());
    assert_eq!(mutex.owner(), None);

    let rec = RecursiveMutex::new();
    rec.create("rlock").unwrap();
    rec.acquire(0).unwrap();
    rec.acquire(0).unwrap();
    assert_eq!(rec.depth(), 2);
    rec.release().unwrap();
    assert!(rec.is_locked());
    rec.release().unwrap();
    assert!(!rec.is_locked());
}

#[test]
fn mutex_release_by_non_owner_is_rejected() {
    let _guard = fresh(SchedPolicy::RoundRobin);
    let a = spawn("a", TaskPriority::Normal);
    let b = spawn("b", TaskPriority::Normal);
    kernel::start().unwrap();

    let mutex = Mutex::new();
    mutex.create("lock").unwrap();

    // A acquires, then hands the CPU to B
    assert_eq!(task::current(), Some(a));
    mutex.acquire(0).unwrap();
    task::yield_now();
    assert_eq!(task::current(), Some(b));

    assert_eq!(mutex.release(), Err(KernelError::InvalidParam));
    assert_eq!(mutex.owner(), Some(a));

    // Back as the owner, release works
    task::yield_now();
    assert_eq!(task::current(), Some(a));
    mutex.release().unwrap();
}

#[test]
fn mutex_hand_off_goes_to_first_waiter() {
    let _guard = fresh(SchedPolicy::RoundRobin);
    let a = spawn("a", TaskPriority::Normal);
    let b = spawn("b", TaskPriority::Normal);
    kernel::start().unwrap();

    let mutex = Mutex::new();
    mutex.create("lock").unwrap();

    mutex.acquire(WAIT_FOREVER).unwrap();
    task::yield_now();
    assert_eq!(task::current(), Some(b));

    // Running as B: the lock is held, so B blocks and A resumes
    let _ = mutex.acquire(WAIT_FOREVER);
    assert_eq!(task::state(b).unwrap(), TaskState::Blocked);
    assert_eq!(task::current(), Some(a));

    // A releases: ownership transfers to B inside the same critical
    // section that wakes it
    mutex.release().unwrap();
    assert_eq!(mutex.owner(), Some(b));
    assert_eq!(task::state(b).unwrap(), TaskState::Ready);
}

#[test]
fn mutex_wait_times_out_and_stale_entry_is_skipped() {
    let _guard = fresh(SchedPolicy::RoundRobin);
    let a = spawn("a", TaskPriority::Normal);
    let b = spawn("b", TaskPriority::Normal);
    kernel::start().unwrap();

    let mutex = Mutex::new();
    mutex.create("lock").unwrap();

    assert_eq!(task::current(), Some(a));
    mutex.acquire(WAIT_FOREVER).unwrap();
    task::yield_now();

    // B waits with a deadline, then the deadline fires
    let _ = mutex.acquire(5);
    assert_eq!(task::state(b).unwrap(), TaskState::Blocked);
    for _ in 0..5 {
        time::tick();
    }
    assert_eq!(task::state(b).unwrap(), TaskState::Ready);

    // A's release must skip B's stale wait entry and fully unlock
    mutex.release().unwrap();
    assert!(!mutex.is_locked());
    assert_eq!(mutex.owner(), None);
}

#[test]
fn priority_policy_preempts_on_wake() {
    let _guard = fresh(SchedPolicy::Priority);
    let hi = spawn("hi", TaskPriority::High);
    let lo = spawn("lo", TaskPriority::Normal);
    kernel::start().unwrap();
    assert_eq!(task::current(), Some(hi));

    task::delay(3).unwrap();
    assert_eq!(task::current(), Some(lo));

    for _ in 0..2 {
        time::tick();
        assert_eq!(task::state(hi).unwrap(), TaskState::Blocked);
    }
    time::tick();
    assert_eq!(task::current(), Some(hi));
    assert_eq!(task::state(lo).unwrap(), TaskState::Ready);
}

static PERIODIC_FIRED: AtomicU32 = AtomicU32::new(0);

fn periodic_cb(_handle: kestrel::timer::TimerHandle, _user: *mut ()) {
    PERIODIC_FIRED.fetch_add(1, Ordering::SeqCst);
}

#[test]
fn timers_fire_from_the_kernel_tick() {
    let _guard = fresh(SchedPolicy::RoundRobin);
    let _worker = spawn("worker", TaskPriority::Normal);
    kernel::start().unwrap();
    PERIODIC_FIRED.store(0, Ordering::SeqCst);

    let handle = timer::create("beat", 5, TimerKind::Periodic, periodic_cb, core::ptr::null_mut())
        .unwrap();
    timer::start(handle).unwrap();

    for _ in 0..20 {
        time::tick();
    }
    assert_eq!(PERIODIC_FIRED.load(Ordering::SeqCst), 4);
    assert_eq!(timer::expiry_count(handle).unwrap(), 4);
    assert!(timer::is_active(handle));

    timer::change_period(handle, 10).unwrap();
    for _ in 0..20 {
        time::tick();
    }
    assert_eq!(PERIODIC_FIRED.load(Ordering::SeqCst), 6);

    let stats = timer::stats();
    assert_eq!(stats.total_timers, 1);
    assert_eq!(stats.active_timers, 1);
    assert_eq!(stats.total_callbacks, 6);

    timer::destroy(handle).unwrap();
    assert_eq!(timer::stats().total_timers, 0);
}

#[test]
fn scheduler_statistics_reflect_the_task_set() {
    let _guard = fresh(SchedPolicy::RoundRobin);
    let _a = spawn("a", TaskPriority::Normal);
    let b = spawn("b", TaskPriority::Normal);
    let c = spawn("c", TaskPriority::Normal);
    kernel::start().unwrap();

    task::suspend(c).unwrap();
    task::yield_now();
    assert_eq!(task::current(), Some(b));
    task::delay(50).unwrap();

    let stats = kestrel::sched::stats();
    assert_eq!(stats.total_tasks, 3);
    assert_eq!(stats.blocked_tasks, 1);
    assert_eq!(stats.suspended_tasks, 1);
}

#[test]
fn ms_conversion_matches_tick_rate() {
    assert_eq!(time::ms_to_ticks(0), 0);
    assert_eq!(time::ms_to_ticks(1), 1);
    assert_eq!(time::ms_to_ticks(250), 250);
}

#[test]
fn heap_api_round_trip() {
    let _guard = fresh(SchedPolicy::RoundRobin);

    let p = heap::alloc(128).expect("kernel heap allocation");
    let stats = heap::stats();
    assert!(stats.allocated_bytes > 0);
    assert_eq!(stats.total_bytes, kestrel::KERNEL_HEAP_SIZE);
    assert_eq!(stats.total_bytes, stats.free_bytes + stats.allocated_bytes);

    heap::free(p.as_ptr());
    assert_eq!(heap::stats().allocated_bytes, 0);
    assert!(heap::check_integrity());
    heap::defragment();
    assert!(heap::largest_free() > 0);
}
