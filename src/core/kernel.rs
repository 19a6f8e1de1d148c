//! Global kernel state
//!
//! The scheduler is a process-wide singleton reached only through the
//! kernel critical section. This module owns that singleton, the
//! lifecycle (`init`/`start`), and the bridge between logical task
//! selection and the port-level context switch.

use core::ptr;
use core::sync::atomic::{AtomicBool, Ordering};

use crate::config::{CPU_CLOCK_HZ, TICK_RATE_HZ};
use crate::core::sched::Scheduler;
use crate::core::task::Tcb;
use crate::critical::{critical_section, CriticalSection, CsCell};
use crate::error::{KernelError, KernelResult};
use crate::mem::heap;
use crate::port;
use crate::types::SchedPolicy;

// ============ Kernel flags ============

/// Atomic kernel lifecycle flags
pub struct KernelFlags {
    initialized: AtomicBool,
    running: AtomicBool,
}

impl KernelFlags {
    const fn new() -> Self {
        Self {
            initialized: AtomicBool::new(false),
            running: AtomicBool::new(false),
        }
    }

    #[inline(always)]
    pub fn is_initialized(&self) -> bool {
        self.initialized.load(Ordering::Acquire)
    }

    #[inline(always)]
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    #[inline(always)]
    pub(crate) fn set_initialized(&self, val: bool) {
        self.initialized.store(val, Ordering::SeqCst);
    }

    #[inline(always)]
    pub(crate) fn set_running(&self, val: bool) {
        self.running.store(val, Ordering::SeqCst);
    }
}

/// Global kernel flags instance
pub(crate) static KERNEL: KernelFlags = KernelFlags::new();

/// Global scheduler instance
static SCHED: CsCell<Scheduler> = CsCell::new(Scheduler::new());

// ============ CPU switch state ============

/// Pointers the context-switch exception uses to save and restore
/// stacks. `cur` lags the scheduler's logical selection until the
/// deferred switch actually runs.
#[repr(C)]
pub struct CpuState {
    /// TCB whose context is live on the CPU
    pub cur: *mut Tcb,
    /// TCB selected to run next
    pub next: *mut Tcb,
}

impl CpuState {
    const fn new() -> Self {
        Self {
            cur: ptr::null_mut(),
            next: ptr::null_mut(),
        }
    }
}

/// Global CPU switch state, addressed from the PendSV handler
#[no_mangle]
#[used]
pub static mut KERNEL_CPU_STATE: CpuState = CpuState::new();

// ============ Public API ============

/// Initialize the kernel: set up the heap arena and the scheduler
/// with the chosen policy. Must run before any other kernel call.
///
/// Re-initialization tears the previous kernel state down and starts
/// over, which is how a bring-up retry (or a test harness) gets a
/// clean slate.
pub fn init(policy: SchedPolicy) -> KernelResult<()> {
    KERNEL.set_running(false);

    critical_section(|cs| {
        heap::init_kernel_heap(cs)?;
        SCHED.get(cs).init(policy)?;
        unsafe {
            KERNEL_CPU_STATE.cur = ptr::null_mut();
            KERNEL_CPU_STATE.next = ptr::null_mut();
        }
        KERNEL.set_running(false);
        KERNEL.set_initialized(true);
        Ok(())
    })
}

/// Start multitasking: select the first task, program the tick
/// source, and hand control over through the port layer.
///
/// On hardware this does not return; the host port stub performs no
/// switch, so the caller (a test harness) keeps driving the kernel.
pub fn start() -> KernelResult<()> {
    if !KERNEL.is_initialized() {
        return Err(KernelError::NotReady);
    }
    if KERNEL.is_running() {
        return Err(KernelError::Busy);
    }

    critical_section(|cs| {
        let sched = SCHED.get(cs);
        sched.start()?;
        let _ = sched.take_switch_request();
        sync_cpu_state(sched);
        KERNEL.set_running(true);
        Ok(())
    })?;

    crate::klog!(info, "kernel starting, tick {=u32} Hz", TICK_RATE_HZ);

    port::tick_enable(TICK_RATE_HZ, CPU_CLOCK_HZ);
    unsafe { port::start_first_task() };

    Ok(())
}

/// Whether `start` has run
#[inline]
pub fn is_running() -> bool {
    KERNEL.is_running()
}

/// Whether `init` has run
#[inline]
pub fn is_initialized() -> bool {
    KERNEL.is_initialized()
}

// ============ Internal plumbing ============

/// Access the scheduler singleton under a held critical section.
#[inline(always)]
pub(crate) fn sched_mut(cs: &CriticalSection) -> &'static mut Scheduler {
    SCHED.get(cs)
}

/// Point the switch state at the scheduler's current selection.
fn sync_cpu_state(sched: &mut Scheduler) {
    unsafe {
        KERNEL_CPU_STATE.next = sched.current_tcb_ptr();
    }
}

/// Convert a pending logical selection into a port-level context
/// switch request. Call after any operation that may have
/// rescheduled.
pub(crate) fn commit_switch(cs: &CriticalSection) {
    let sched = SCHED.get(cs);
    if sched.take_switch_request() {
        sync_cpu_state(sched);
        port::yield_request();
    }
}
